use crate::error::{Result, SubqueueError};
use crate::segment::TranscriptSegment;

/// Render segments as SRT text
pub fn format_srt(segments: &[TranscriptSegment]) -> String {
    let mut srt_content = String::new();

    for (index, segment) in segments.iter().enumerate() {
        srt_content.push_str(&format!(
            "{}\n{} --> {}\n{}\n\n",
            index + 1,
            format_srt_time(segment.start),
            format_srt_time(segment.end),
            cue_text(&segment.text)
        ));
    }

    srt_content
}

/// Cue body with blank lines removed; a blank line would end the cue early.
fn cue_text(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Format time in seconds to SRT time format (HH:MM:SS,mmm)
pub fn format_srt_time(seconds: f64) -> String {
    let total_milliseconds = (seconds.max(0.0) * 1000.0).round() as u64;
    let hours = total_milliseconds / 3_600_000;
    let minutes = (total_milliseconds % 3_600_000) / 60_000;
    let secs = (total_milliseconds % 60_000) / 1_000;
    let millis = total_milliseconds % 1_000;

    format!("{:02}:{:02}:{:02},{:03}", hours, minutes, secs, millis)
}

/// Parse an SRT timestamp (HH:MM:SS,mmm; a '.' separator is accepted too)
pub fn parse_srt_time(value: &str) -> Result<f64> {
    let invalid = || SubqueueError::SubtitleParse(format!("Invalid SRT timestamp '{}'", value));

    let (clock, millis) = value.trim().split_once([',', '.']).ok_or_else(invalid)?;
    let parts: Vec<&str> = clock.split(':').collect();
    if parts.len() != 3 {
        return Err(invalid());
    }

    let number = |s: &str| s.trim().parse::<u64>().map_err(|_| invalid());
    let hours = number(parts[0])?;
    let minutes = number(parts[1])?;
    let secs = number(parts[2])?;
    let millis = number(millis)?;

    let total_ms = ((hours * 60 + minutes) * 60 + secs) * 1000 + millis;
    Ok(total_ms as f64 / 1000.0)
}

/// Parse SRT text back into segments
pub fn parse_srt(content: &str) -> Result<Vec<TranscriptSegment>> {
    let content = content.trim_start_matches('\u{feff}').replace("\r\n", "\n");
    let mut segments = Vec::new();

    for block in content.split("\n\n") {
        let mut lines = block.lines().filter(|l| !l.trim().is_empty());

        // Index line; blocks without one are padding
        if lines.next().is_none() {
            continue;
        }

        let timing = lines
            .next()
            .ok_or_else(|| SubqueueError::SubtitleParse(format!("SRT block without timing: '{}'", block)))?;
        let (start, end) = timing
            .split_once("-->")
            .ok_or_else(|| SubqueueError::SubtitleParse(format!("Invalid SRT timing line '{}'", timing)))?;

        let text = lines.collect::<Vec<_>>().join("\n");
        segments.push(TranscriptSegment::new(parse_srt_time(start)?, parse_srt_time(end)?, text));
    }

    Ok(segments)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_srt_time() {
        assert_eq!(format_srt_time(0.0), "00:00:00,000");
        assert_eq!(format_srt_time(65.123), "00:01:05,123");
        assert_eq!(format_srt_time(3661.500), "01:01:01,500");
    }

    #[test]
    fn test_parse_srt_time() {
        assert_eq!(parse_srt_time("01:01:01,500").unwrap(), 3661.5);
        assert_eq!(parse_srt_time(" 00:00:02.250 ").unwrap(), 2.25);
        assert!(parse_srt_time("2.5").is_err());
    }

    #[test]
    fn test_round_trip_recovers_timing_and_text() {
        let original = vec![
            TranscriptSegment::new(0.0, 5.0, "Hello"),
            TranscriptSegment::new(5.25, 7.9996, "Second line\nwith a break"),
        ];

        let parsed = parse_srt(&format_srt(&original)).unwrap();
        assert_eq!(parsed.len(), 2);
        for (a, b) in original.iter().zip(&parsed) {
            assert!((a.start - b.start).abs() < 0.001);
            assert!((a.end - b.end).abs() < 0.001);
            assert_eq!(a.text, b.text);
        }
    }

    #[test]
    fn test_blank_lines_inside_text_stay_in_one_cue() {
        let segments = vec![
            TranscriptSegment::new(0.0, 5.0, "Hello\n\nWorld"),
            TranscriptSegment::new(5.0, 6.0, "\r\n  Next  \n   \n"),
        ];

        let srt = format_srt(&segments);
        let parsed = parse_srt(&srt).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].text, "Hello\nWorld");
        assert!((parsed[0].end - 5.0).abs() < 0.001);
        assert_eq!(parsed[1].text, "Next");
    }

    #[test]
    fn test_parse_srt_tolerates_crlf_and_bom() {
        let content = "\u{feff}1\r\n00:00:01,000 --> 00:00:02,000\r\nHi\r\n\r\n";
        let parsed = parse_srt(content).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].text, "Hi");
        assert_eq!(parsed[0].start, 1.0);
    }
}
