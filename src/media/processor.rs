use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use tracing::info;
use uuid::Uuid;

use crate::config::{MediaConfig, PipelineConfig};
use crate::error::{Result, SubqueueError};
use crate::events::ProgressCallback;
use super::{AudioExtractor, ExtractedAudio, MediaCommandBuilder, parse_probe_duration};

/// FFmpeg-based audio extractor
pub struct FfmpegAudioExtractor {
    command_builder: MediaCommandBuilder,
    extraction_timeout: Duration,
    probe_timeout: Duration,
    work_dir: PathBuf,
    // Keeps the scratch directory alive when no work_dir was configured
    _scratch: Option<TempDir>,
}

impl FfmpegAudioExtractor {
    pub fn new(config: MediaConfig, pipeline: &PipelineConfig) -> Result<Self> {
        let command_builder =
            MediaCommandBuilder::new(&config.binary_path, &config.probe_binary_path);

        let (work_dir, scratch) = match config.work_dir {
            Some(dir) => {
                std::fs::create_dir_all(&dir)?;
                (dir, None)
            }
            None => {
                let scratch = tempfile::tempdir()?;
                (scratch.path().to_path_buf(), Some(scratch))
            }
        };

        Ok(Self {
            command_builder,
            extraction_timeout: pipeline.extraction_timeout(),
            probe_timeout: Duration::from_secs(pipeline.probe_timeout_secs),
            work_dir,
            _scratch: scratch,
        })
    }

    /// Check that ffmpeg answers a version query
    pub async fn check_availability(&self) -> Result<String> {
        let stdout = self.command_builder.version_check().execute(self.probe_timeout).await?;
        let first_line = stdout.lines().next().unwrap_or("Unknown version").to_string();
        info!("Media processor is available: {}", first_line);
        Ok(first_line)
    }

    fn audio_path_for(&self, file_path: &Path) -> Result<PathBuf> {
        let stem = file_path
            .file_stem()
            .ok_or_else(|| SubqueueError::UnsupportedInput(format!(
                "Invalid media filename: {}",
                file_path.display()
            )))?
            .to_string_lossy();
        Ok(self.work_dir.join(format!("{}-{}.wav", stem, Uuid::new_v4().simple())))
    }
}

#[async_trait]
impl AudioExtractor for FfmpegAudioExtractor {
    async fn extract(
        &self,
        file_path: &Path,
        on_progress: ProgressCallback,
    ) -> Result<ExtractedAudio> {
        info!("Extracting audio from {}", file_path.display());

        on_progress(0.0, "Probing media duration");
        let probe = self.command_builder.probe_duration(file_path);
        let duration_seconds = parse_probe_duration(&probe.execute(self.probe_timeout).await?)?;

        on_progress(10.0, "Extracting audio track");
        let audio_path = self.audio_path_for(file_path)?;
        self.command_builder
            .extract_audio(file_path, audio_path.as_path())
            .execute(self.extraction_timeout)
            .await?;

        on_progress(100.0, "Audio extracted");
        info!("Audio extraction completed: {} ({:.1}s)", audio_path.display(), duration_seconds);

        Ok(ExtractedAudio {
            audio_path,
            duration_seconds,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_configured_work_dir_is_created() {
        let root = assert_fs::TempDir::new().unwrap();
        let dir = root.path().join("audio");
        let config = MediaConfig {
            work_dir: Some(dir.clone()),
            ..MediaConfig::default()
        };

        let extractor = FfmpegAudioExtractor::new(config, &PipelineConfig::default()).unwrap();
        assert!(dir.is_dir());

        let audio = extractor.audio_path_for(Path::new("/videos/talk.mkv")).unwrap();
        assert_eq!(audio.parent().unwrap(), dir);
        assert!(audio.file_name().unwrap().to_string_lossy().starts_with("talk-"));
    }

    #[tokio::test]
    async fn test_missing_probe_binary_fails_extraction() {
        let config = MediaConfig {
            probe_binary_path: "/nonexistent/subqueue-ffprobe".to_string(),
            ..MediaConfig::default()
        };
        let extractor = FfmpegAudioExtractor::new(config, &PipelineConfig::default()).unwrap();

        let progress: ProgressCallback = Arc::new(|_: f64, _: &str| {});
        let err = extractor.extract(Path::new("clip.mp4"), progress).await.unwrap_err();
        assert!(matches!(err, SubqueueError::ExternalTool(_)));
    }
}
