use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use crate::error::{Result, SubqueueError};
use crate::progress::StageWeights;

fn default_poll_interval_ms() -> u64 {
    200
}

fn default_worker_count() -> usize {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub throttle: ThrottleConfig,
    #[serde(default)]
    pub media: MediaConfig,
    #[serde(default)]
    pub transcriber: TranscriberConfig,
    #[serde(default)]
    pub translate: TranslateConfig,
    #[serde(default)]
    pub subtitle: SubtitleConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Upper bound for audio extraction (long transcodes)
    pub extraction_timeout_secs: u64,
    /// Upper bound for metadata probes
    pub probe_timeout_secs: u64,
    /// Upper bound for one speech-to-text call
    pub transcription_timeout_secs: u64,
    /// Upper bound for subtitle emission, burn-in included
    pub emission_timeout_secs: u64,
    /// Share of the per-file progress range given to each stage
    pub stage_weights: StageWeights,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThrottleConfig {
    /// Maximum translation requests inside any 60 second window
    pub max_requests_per_minute: usize,
    /// Minimum delay between requests for up to two workers
    pub base_delay_ms: u64,
    /// Number of concurrent callers sharing the translation service
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaConfig {
    /// Path to ffmpeg binary
    pub binary_path: String,
    /// Path to ffprobe binary
    pub probe_binary_path: String,
    /// Directory for extracted audio; a temporary directory when unset
    pub work_dir: Option<PathBuf>,
    /// Recognized media file extensions (lowercase, without dot)
    pub extensions: Vec<String>,
    /// Additional encoding options for subtitle burn-in
    /// Common options: ["-preset", "medium", "-crf", "23"]
    pub subtitle_options: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriberConfig {
    /// Path to transcriber binary (e.g., whisper-cli)
    pub binary_path: String,
    /// Directory holding ggml model files
    pub models_dir: PathBuf,
    /// Model used when a work item does not name one
    pub default_model: String,
    /// Temperature for transcription
    pub temperature: f32,
    /// How often the stop callback is polled while the transcriber runs
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslateConfig {
    /// Ollama endpoint URL
    pub endpoint: String,
    /// LLM model to use for translation
    pub model: String,
    /// Per-request HTTP timeout
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubtitleConfig {
    /// Text of the segment synthesized when no speech is found
    pub placeholder_text: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            extraction_timeout_secs: 600,
            probe_timeout_secs: 60,
            transcription_timeout_secs: 3600,
            emission_timeout_secs: 600,
            stage_weights: StageWeights::default(),
        }
    }
}

impl PipelineConfig {
    pub fn extraction_timeout(&self) -> Duration {
        Duration::from_secs(self.extraction_timeout_secs)
    }

    pub fn transcription_timeout(&self) -> Duration {
        Duration::from_secs(self.transcription_timeout_secs)
    }

    pub fn emission_timeout(&self) -> Duration {
        Duration::from_secs(self.emission_timeout_secs)
    }
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            max_requests_per_minute: 60,
            base_delay_ms: 500,
            worker_count: 1,
        }
    }
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            binary_path: "ffmpeg".to_string(),
            probe_binary_path: "ffprobe".to_string(),
            work_dir: None,
            extensions: [
                "mp4", "avi", "mov", "mkv", "wmv", "flv", "webm", "m4v",
                "mp3", "wav", "m4a", "flac", "ogg", "aac", "opus",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            subtitle_options: vec![],
        }
    }
}

impl MediaConfig {
    /// Whether the file extension names a media type the pipeline accepts
    pub fn is_supported<P: AsRef<Path>>(&self, path: P) -> bool {
        path.as_ref()
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| {
                let ext = ext.to_lowercase();
                self.extensions.iter().any(|known| *known == ext)
            })
            .unwrap_or(false)
    }
}

impl Default for TranscriberConfig {
    fn default() -> Self {
        Self {
            binary_path: "whisper-cli".to_string(),
            models_dir: PathBuf::from(".subqueue/models"),
            default_model: "base".to_string(),
            temperature: 0.0,
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl Default for TranslateConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:11434".to_string(),
            model: "llama3.2:3b".to_string(),
            request_timeout_secs: 120,
        }
    }
}

impl Default for SubtitleConfig {
    fn default() -> Self {
        Self {
            placeholder_text: "[no speech detected]".to_string(),
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| SubqueueError::Config(format!("Failed to read config file: {}", e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| SubqueueError::Config(format!("Failed to parse config file: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| SubqueueError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| SubqueueError::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.pipeline.stage_weights.validate()?;

        if self.throttle.max_requests_per_minute == 0 {
            return Err(SubqueueError::Config(
                "throttle.max_requests_per_minute must be at least 1".to_string(),
            ));
        }

        if self.media.extensions.is_empty() {
            return Err(SubqueueError::Config(
                "media.extensions must list at least one extension".to_string(),
            ));
        }

        Ok(())
    }
}
