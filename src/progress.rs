//! Per-file progress blending and batch ETA estimation.
//!
//! Each stage owns a band of the 0-100 range of a file according to the
//! [`StageWeights`] table. Stage-internal progress (0.0-1.0) is mapped into
//! the band, so the file percentage only ever moves forward. Durations of
//! completed files feed the ETA estimate.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use crate::error::{Result, SubqueueError};

/// Processing stages a file passes through, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stage {
    ExtractingAudio,
    Transcribing,
    Translating,
    EmittingOutput,
}

impl Stage {
    pub const ORDER: [Stage; 4] = [
        Stage::ExtractingAudio,
        Stage::Transcribing,
        Stage::Translating,
        Stage::EmittingOutput,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Stage::ExtractingAudio => "Extracting audio",
            Stage::Transcribing => "Transcribing",
            Stage::Translating => "Translating",
            Stage::EmittingOutput => "Writing subtitles",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Share of a file's progress range given to each stage. The four weights
/// must add up to 100.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageWeights {
    pub extraction: u32,
    pub transcription: u32,
    pub translation: u32,
    pub emission: u32,
}

impl Default for StageWeights {
    fn default() -> Self {
        Self {
            extraction: 15,
            transcription: 50,
            translation: 15,
            emission: 20,
        }
    }
}

impl StageWeights {
    pub fn validate(&self) -> Result<()> {
        let total = self.extraction + self.transcription + self.translation + self.emission;
        if total != 100 {
            return Err(SubqueueError::Config(format!(
                "Stage weights must sum to 100, got {}",
                total
            )));
        }
        Ok(())
    }

    /// Weight of a stage. Without translation its share moves to emission.
    pub fn weight(&self, stage: Stage, translation_enabled: bool) -> f64 {
        let weight = match stage {
            Stage::ExtractingAudio => self.extraction,
            Stage::Transcribing => self.transcription,
            Stage::Translating if translation_enabled => self.translation,
            Stage::Translating => 0,
            Stage::EmittingOutput if translation_enabled => self.emission,
            Stage::EmittingOutput => self.emission + self.translation,
        };
        weight as f64
    }

    /// Sum of the weights of every stage before `stage`.
    pub fn offset(&self, stage: Stage, translation_enabled: bool) -> f64 {
        Stage::ORDER
            .iter()
            .take_while(|s| **s != stage)
            .map(|s| self.weight(*s, translation_enabled))
            .sum()
    }
}

/// A time estimate that is not available until one file has completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eta {
    Unknown,
    Known(Duration),
}

impl Eta {
    pub fn as_duration(&self) -> Option<Duration> {
        match self {
            Eta::Unknown => None,
            Eta::Known(d) => Some(*d),
        }
    }
}

impl fmt::Display for Eta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Eta::Unknown => f.write_str("unknown"),
            Eta::Known(d) => f.write_str(&format_duration(d.as_secs())),
        }
    }
}

/// Format duration in seconds to human readable string
pub fn format_duration(seconds: u64) -> String {
    if seconds < 60 {
        format!("{}s", seconds)
    } else if seconds < 3600 {
        format!("{}m {}s", seconds / 60, seconds % 60)
    } else {
        format!("{}h {}m", seconds / 3600, (seconds % 3600) / 60)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProgressSnapshot {
    pub file_index: usize,
    pub total_files: usize,
    pub stage: Option<Stage>,
    pub percent_within_file: f64,
    /// Time since tracking started
    pub elapsed: Duration,
    pub elapsed_current_file: Duration,
    pub eta_current_file: Eta,
    pub eta_remaining_files: Eta,
}

#[derive(Debug)]
struct ActiveFile {
    started: Instant,
    stage: Option<Stage>,
    translation_enabled: bool,
    percent: f64,
}

#[derive(Debug)]
pub struct ProgressTracker {
    weights: StageWeights,
    total_files: usize,
    file_index: usize,
    run_started: Option<Instant>,
    active: Option<ActiveFile>,
    history: Vec<Duration>,
}

impl ProgressTracker {
    /// Fails with `Config` when the weights do not sum to 100.
    pub fn new(weights: StageWeights) -> Result<Self> {
        weights.validate()?;
        Ok(Self {
            weights,
            total_files: 0,
            file_index: 0,
            run_started: None,
            active: None,
            history: Vec::new(),
        })
    }

    pub fn start_tracking(&mut self, total_files: usize) {
        self.reset();
        self.total_files = total_files;
        self.run_started = Some(Instant::now());
    }

    /// Adjust the batch size when items are enqueued during a run.
    pub fn set_total_files(&mut self, total_files: usize) {
        self.total_files = total_files.max(self.file_index);
    }

    pub fn start_file(&mut self, index: usize, name: &str, translation_enabled: bool) {
        debug!("Tracking file {} ({}/{})", name, index + 1, self.total_files);
        self.file_index = index;
        self.total_files = self.total_files.max(index + 1);
        self.active = Some(ActiveFile {
            started: Instant::now(),
            stage: None,
            translation_enabled,
            percent: 0.0,
        });
    }

    /// Move to the start of a stage's band and return the file percentage.
    pub fn enter_stage(&mut self, stage: Stage) -> f64 {
        let weights = self.weights;
        match self.active.as_mut() {
            Some(file) => {
                file.stage = Some(stage);
                let offset = weights.offset(stage, file.translation_enabled);
                file.percent = file.percent.max(offset);
                file.percent
            }
            None => 0.0,
        }
    }

    /// Map stage-internal progress (0.0-1.0) into the current stage's band
    /// and return the file percentage.
    pub fn update_stage_progress(&mut self, fraction: f64) -> f64 {
        let weights = self.weights;
        match self.active.as_mut() {
            Some(file) => {
                if let Some(stage) = file.stage {
                    let offset = weights.offset(stage, file.translation_enabled);
                    let weight = weights.weight(stage, file.translation_enabled);
                    let fraction = if fraction.is_finite() { fraction.clamp(0.0, 1.0) } else { 0.0 };
                    file.percent = file.percent.max(offset + weight * fraction);
                }
                file.percent
            }
            None => 0.0,
        }
    }

    /// Set the file percentage directly. Values below the current one are ignored.
    pub fn update_file_progress(&mut self, percent: f64) -> f64 {
        match self.active.as_mut() {
            Some(file) => {
                if percent.is_finite() {
                    file.percent = file.percent.max(percent.clamp(0.0, 100.0));
                }
                file.percent
            }
            None => 0.0,
        }
    }

    /// Finish the active file and add its duration to the ETA history.
    pub fn complete_file(&mut self, name: &str) {
        if let Some(file) = self.active.take() {
            let duration = file.started.elapsed();
            debug!("File {} completed in {:?}", name, duration);
            self.history.push(duration);
        }
        self.file_index += 1;
    }

    /// Finish the active file without recording its duration.
    pub fn abandon_file(&mut self, name: &str) {
        if self.active.take().is_some() {
            debug!("File {} left the tracker without completing", name);
        }
        self.file_index += 1;
    }

    pub fn reset(&mut self) {
        self.total_files = 0;
        self.file_index = 0;
        self.run_started = None;
        self.active = None;
        self.history.clear();
    }

    pub fn average_file_duration(&self) -> Option<Duration> {
        if self.history.is_empty() {
            return None;
        }
        let total: Duration = self.history.iter().sum();
        Some(total / self.history.len() as u32)
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        let now = Instant::now();
        let elapsed = self
            .run_started
            .map(|start| now.saturating_duration_since(start))
            .unwrap_or_default();
        let elapsed_current_file = self
            .active
            .as_ref()
            .map(|f| now.saturating_duration_since(f.started))
            .unwrap_or_default();

        let remaining_after_current = self
            .total_files
            .saturating_sub(self.file_index)
            .saturating_sub(usize::from(self.active.is_some()));

        let (eta_current_file, eta_remaining_files) = match self.average_file_duration() {
            Some(avg) => {
                let current = if self.active.is_some() {
                    avg.saturating_sub(elapsed_current_file)
                } else {
                    Duration::ZERO
                };
                let remaining = current + avg * remaining_after_current as u32;
                (Eta::Known(current), Eta::Known(remaining))
            }
            None if self.active.is_none() && self.file_index >= self.total_files => {
                (Eta::Known(Duration::ZERO), Eta::Known(Duration::ZERO))
            }
            None => (Eta::Unknown, Eta::Unknown),
        };

        ProgressSnapshot {
            file_index: self.file_index,
            total_files: self.total_files,
            stage: self.active.as_ref().and_then(|f| f.stage),
            percent_within_file: self.active.as_ref().map(|f| f.percent).unwrap_or(0.0),
            elapsed,
            elapsed_current_file,
            eta_current_file,
            eta_remaining_files,
        }
    }
}
