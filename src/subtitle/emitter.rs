use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::{info, warn};

use crate::config::{MediaConfig, PipelineConfig};
use crate::error::{Result, SubqueueError};
use crate::media::MediaCommandBuilder;
use crate::queue::SubtitleMode;
use crate::segment::TranscriptSegment;
use super::{EmitContext, SubtitleEmitter, format_srt};

/// Inputs without a video stream; burn-in is skipped for these.
const AUDIO_ONLY_EXTENSIONS: [&str; 7] = ["mp3", "wav", "m4a", "flac", "ogg", "aac", "opus"];

/// Writes SRT sidecar files and, in hard-subtitle mode, a burned-in copy
/// of the video.
pub struct SrtEmitter {
    command_builder: MediaCommandBuilder,
    subtitle_options: Vec<String>,
    emission_timeout: Duration,
}

impl SrtEmitter {
    pub fn new(config: &MediaConfig, pipeline: &PipelineConfig) -> Self {
        Self {
            command_builder: MediaCommandBuilder::new(&config.binary_path, &config.probe_binary_path),
            subtitle_options: config.subtitle_options.clone(),
            emission_timeout: pipeline.emission_timeout(),
        }
    }

    /// Write one SRT file
    pub async fn write_srt(segments: &[TranscriptSegment], output_path: &Path) -> Result<()> {
        info!("Generating SRT file: {}", output_path.display());
        fs::write(output_path, format_srt(segments)).await?;
        Ok(())
    }

    async fn burn_in(&self, ctx: &EmitContext, srt_path: &Path, stem: &str) -> Result<Option<PathBuf>> {
        let is_audio_only = ctx
            .input_path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| AUDIO_ONLY_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
            .unwrap_or(false);

        if is_audio_only {
            warn!("{} has no video stream; skipping burn-in", ctx.input_path.display());
            return Ok(None);
        }

        let output_video = ctx.output_dir.join(format!("{}_subtitled.mp4", stem));
        self.command_builder
            .embed_subtitles(ctx.input_path.as_path(), srt_path, output_video.as_path(), &self.subtitle_options)
            .execute(self.emission_timeout)
            .await?;

        info!("Subtitles burned into {}", output_video.display());
        Ok(Some(output_video))
    }
}

#[async_trait]
impl SubtitleEmitter for SrtEmitter {
    async fn emit(
        &self,
        segments: &[TranscriptSegment],
        translated: Option<&[TranscriptSegment]>,
        ctx: &EmitContext,
    ) -> Result<Vec<PathBuf>> {
        let stem = ctx
            .input_path
            .file_stem()
            .ok_or_else(|| SubqueueError::UnsupportedInput(format!(
                "Invalid media filename: {}",
                ctx.input_path.display()
            )))?
            .to_string_lossy()
            .to_string();

        fs::create_dir_all(&ctx.output_dir).await?;

        let mut outputs = Vec::new();

        let original_path = ctx.output_dir.join(format!("{}.srt", stem));
        Self::write_srt(segments, &original_path).await?;
        outputs.push(original_path.clone());

        let mut primary = original_path;
        if let Some(translated) = translated {
            let translated_path = ctx.output_dir.join(format!("{}.{}.srt", stem, ctx.target_language));
            Self::write_srt(translated, &translated_path).await?;
            outputs.push(translated_path.clone());
            primary = translated_path;
        }

        if ctx.subtitle_mode == SubtitleMode::HardSubtitle {
            if let Some(video) = self.burn_in(ctx, &primary, &stem).await? {
                outputs.push(video);
            }
        }

        Ok(outputs)
    }
}
