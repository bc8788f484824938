// Speech-to-text stage
//
// - WhisperCpp: whisper.cpp command line implementation
//
// Implementations must poll `should_stop` while they work and give up
// promptly once it returns true.

pub mod whisper_cpp;

use async_trait::async_trait;
use std::path::Path;

pub use whisper_cpp::*;
use crate::cancel::StopPoll;
use crate::config::TranscriberConfig;
use crate::error::Result;
use crate::events::ProgressCallback;
use crate::segment::TranscriptSegment;

/// Main trait for transcription operations
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe an audio file into time-ordered segments
    async fn transcribe(
        &self,
        audio_path: &Path,
        language: &str,
        model_name: &str,
        on_progress: ProgressCallback,
        should_stop: StopPoll,
    ) -> Result<Vec<TranscriptSegment>>;
}

/// Factory for creating transcriber instances
pub struct TranscriberFactory;

impl TranscriberFactory {
    pub fn create_default(config: TranscriberConfig) -> Box<dyn Transcriber> {
        Box::new(whisper_cpp::WhisperCppTranscriber::new(config))
    }
}
