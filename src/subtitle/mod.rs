// Subtitle emission stage
//
// - Srt: SRT rendering and parsing
// - Emitter: writes sidecar files and burns subtitles in on request

pub mod emitter;
pub mod srt;

use async_trait::async_trait;
use std::path::PathBuf;

pub use emitter::*;
pub use srt::*;

use crate::error::Result;
use crate::queue::SubtitleMode;
use crate::segment::TranscriptSegment;

/// Where and how a file's subtitles are written.
#[derive(Debug, Clone, PartialEq)]
pub struct EmitContext {
    pub input_path: PathBuf,
    pub output_dir: PathBuf,
    pub subtitle_mode: SubtitleMode,
    pub target_language: String,
}

/// Last stage of the pipeline: turn segments into subtitle artifacts.
#[async_trait]
pub trait SubtitleEmitter: Send + Sync {
    /// Write subtitles and return the paths of everything produced
    async fn emit(
        &self,
        segments: &[TranscriptSegment],
        translated: Option<&[TranscriptSegment]>,
        ctx: &EmitContext,
    ) -> Result<Vec<PathBuf>>;
}
