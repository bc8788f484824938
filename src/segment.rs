use serde::{Deserialize, Serialize};

/// Shortest span given to a synthesized segment when the media reports no
/// usable duration.
const MIN_PLACEHOLDER_SECONDS: f64 = 0.001;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptSegment {
    /// Start time in seconds
    pub start: f64,
    /// End time in seconds, always after `start`
    pub end: f64,
    pub text: String,
    pub translated_text: Option<String>,
    pub language_tag: Option<String>,
}

impl TranscriptSegment {
    pub fn new<S: Into<String>>(start: f64, end: f64, text: S) -> Self {
        Self {
            start,
            end,
            text: text.into(),
            translated_text: None,
            language_tag: None,
        }
    }

    pub fn with_language<S: Into<String>>(mut self, language: S) -> Self {
        self.language_tag = Some(language.into());
        self
    }

    /// Single segment covering the whole file, used when no speech was found.
    pub fn placeholder(duration_seconds: f64, text: &str) -> Self {
        let end = if duration_seconds.is_finite() && duration_seconds > 0.0 {
            duration_seconds
        } else {
            MIN_PLACEHOLDER_SECONDS
        };
        Self::new(0.0, end, text)
    }

    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    /// Copy of this segment whose text is the translation, or the original
    /// text when none was produced.
    pub fn translated_view(&self) -> Self {
        Self {
            start: self.start,
            end: self.end,
            text: self.translated_text.clone().unwrap_or_else(|| self.text.clone()),
            translated_text: None,
            language_tag: self.language_tag.clone(),
        }
    }
}
