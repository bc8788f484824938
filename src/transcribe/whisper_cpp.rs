use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::fs;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::cancel::StopPoll;
use crate::config::TranscriberConfig;
use crate::error::{Result, SubqueueError};
use crate::events::ProgressCallback;
use crate::segment::TranscriptSegment;
use super::Transcriber;

const STDERR_TAIL_LINES: usize = 20;

// Structs for parsing whisper.cpp JSON output (-oj)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhisperCppOutput {
    pub result: Option<WhisperCppResult>,
    #[serde(default)]
    pub transcription: Vec<WhisperCppSegment>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhisperCppResult {
    pub language: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhisperCppSegment {
    pub offsets: WhisperCppOffsets,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhisperCppOffsets {
    pub from: i64,
    pub to: i64,
}

/// Convert whisper.cpp JSON into transcript segments.
///
/// Offsets are milliseconds. Blank segments are dropped and degenerate
/// spans are widened by one millisecond so that `end > start` holds.
pub fn parse_whisper_json(json: &str) -> Result<Vec<TranscriptSegment>> {
    let output: WhisperCppOutput = serde_json::from_str(json)
        .map_err(|e| SubqueueError::Model(format!("Failed to parse transcription JSON: {}", e)))?;

    let language = output.result.map(|r| r.language);

    let mut segments: Vec<TranscriptSegment> = output
        .transcription
        .into_iter()
        .filter(|seg| !seg.text.trim().is_empty())
        .map(|seg| {
            let start = seg.offsets.from.max(0) as f64 / 1000.0;
            let end = (seg.offsets.to.max(seg.offsets.from + 1)) as f64 / 1000.0;
            let mut segment = TranscriptSegment::new(start, end, seg.text.trim());
            segment.language_tag = language.clone();
            segment
        })
        .collect();

    segments.sort_by(|a, b| a.start.total_cmp(&b.start));
    Ok(segments)
}

/// Read a percentage from whisper.cpp's `-pp` progress lines
fn parse_progress_line(line: &str) -> Option<f64> {
    let (_, rest) = line.split_once("progress =")?;
    rest.trim().trim_end_matches('%').trim().parse::<f64>().ok()
}

/// whisper.cpp command line transcriber
pub struct WhisperCppTranscriber {
    config: TranscriberConfig,
}

impl WhisperCppTranscriber {
    pub fn new(config: TranscriberConfig) -> Self {
        Self { config }
    }

    /// Resolve a model name ("base", "ggml-base.bin" or a path) to a file
    pub fn model_path(&self, model_name: &str) -> PathBuf {
        let name = if model_name.is_empty() { self.config.default_model.as_str() } else { model_name };
        let direct = PathBuf::from(name);
        if direct.extension().is_some_and(|ext| ext == "bin") {
            if direct.is_absolute() || direct.exists() {
                return direct;
            }
            return self.config.models_dir.join(direct);
        }
        self.config.models_dir.join(format!("ggml-{}.bin", name))
    }

    fn build_command(&self, audio_path: &Path, language: &str, model: &Path, output_base: &Path) -> Command {
        let mut cmd = Command::new(&self.config.binary_path);
        cmd.arg("-oj")  // Output JSON format
           .arg("-pp")  // Print progress to stderr
           .arg("-of").arg(output_base)
           .arg("-m").arg(model)
           .arg("-f").arg(audio_path);

        if !language.is_empty() {
            cmd.arg("-l").arg(language);
        }

        if self.config.temperature > 0.0 {
            cmd.arg("-tp").arg(format!("{:.2}", self.config.temperature));
        }

        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl Transcriber for WhisperCppTranscriber {
    async fn transcribe(
        &self,
        audio_path: &Path,
        language: &str,
        model_name: &str,
        on_progress: ProgressCallback,
        should_stop: StopPoll,
    ) -> Result<Vec<TranscriptSegment>> {
        let model = self.model_path(model_name);
        if !model.exists() {
            return Err(SubqueueError::Model(format!(
                "Model not ready: {} does not exist",
                model.display()
            )));
        }

        let temp_dir = tempfile::tempdir()
            .map_err(|e| SubqueueError::Model(format!("Failed to create temp dir: {}", e)))?;
        let output_base = temp_dir.path().join("transcript");
        let output_path = temp_dir.path().join("transcript.json");

        info!("Transcribing {} with {}", audio_path.display(), model.display());
        let mut cmd = self.build_command(audio_path, language, &model, &output_base);
        debug!("Executing whisper command: {:?}", cmd);

        let mut child = cmd.spawn()
            .map_err(|e| SubqueueError::Model(format!("Failed to execute whisper: {}", e)))?;
        let stderr = child.stderr.take()
            .ok_or_else(|| SubqueueError::Internal("whisper stderr was not captured".to_string()))?;

        let mut lines = BufReader::new(stderr).lines();
        let mut stderr_open = true;
        let mut stderr_tail: VecDeque<String> = VecDeque::with_capacity(STDERR_TAIL_LINES);
        let mut ticker = tokio::time::interval(Duration::from_millis(self.config.poll_interval_ms.max(1)));

        on_progress(0.0, "Transcribing");

        let status = loop {
            tokio::select! {
                status = child.wait() => {
                    break status.map_err(|e| SubqueueError::Model(format!("Failed to wait for whisper: {}", e)))?;
                }
                line = lines.next_line(), if stderr_open => {
                    match line {
                        Ok(Some(line)) => {
                            if let Some(percent) = parse_progress_line(&line) {
                                on_progress(percent, "Transcribing");
                            } else {
                                if stderr_tail.len() == STDERR_TAIL_LINES {
                                    stderr_tail.pop_front();
                                }
                                stderr_tail.push_back(line);
                            }
                        }
                        _ => stderr_open = false,
                    }
                }
                _ = ticker.tick() => {
                    if should_stop() {
                        warn!("Stop requested; terminating whisper");
                        if let Err(e) = child.kill().await {
                            warn!("Failed to kill whisper: {}", e);
                        }
                        return Err(SubqueueError::Model("Transcription cancelled".to_string()));
                    }
                }
            }
        };

        if !status.success() {
            let stderr = stderr_tail.into_iter().collect::<Vec<_>>().join("\n");
            return Err(SubqueueError::Model(format!("Whisper failed ({}): {}", status, stderr)));
        }

        let json_content = fs::read_to_string(&output_path).await
            .map_err(|e| SubqueueError::Model(format!("Failed to read transcription: {}", e)))?;

        let segments = parse_whisper_json(&json_content)?;
        on_progress(100.0, "Transcription finished");
        info!("Transcription produced {} segments", segments.len());
        Ok(segments)
    }
}
