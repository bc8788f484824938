// Audio extraction stage
//
// - Commands: ffmpeg/ffprobe command builders
// - Processor: ffmpeg-backed AudioExtractor implementation

pub mod commands;
pub mod processor;

use async_trait::async_trait;
use std::path::{Path, PathBuf};

pub use commands::*;
pub use processor::*;

use crate::config::{MediaConfig, PipelineConfig};
use crate::error::Result;
use crate::events::ProgressCallback;

/// Audio track pulled out of an input file.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedAudio {
    pub audio_path: PathBuf,
    pub duration_seconds: f64,
}

/// First stage of the pipeline: produce a transcribable audio file.
#[async_trait]
pub trait AudioExtractor: Send + Sync {
    async fn extract(
        &self,
        file_path: &Path,
        on_progress: ProgressCallback,
    ) -> Result<ExtractedAudio>;
}

/// Factory for creating audio extractor instances
pub struct AudioExtractorFactory;

impl AudioExtractorFactory {
    /// Create the default extractor implementation (FFmpeg-based)
    pub fn create_extractor(
        config: MediaConfig,
        pipeline: &PipelineConfig,
    ) -> Result<Box<dyn AudioExtractor>> {
        Ok(Box::new(processor::FfmpegAudioExtractor::new(config, pipeline)?))
    }
}
