use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::error::{Result, SubqueueError};

pub type WorkItemId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubtitleMode {
    /// Sidecar subtitle files next to the media
    SoftSubtitle,
    /// Sidecar files plus a copy of the video with the subtitles burned in
    HardSubtitle,
}

/// Processing options attached to a work item at enqueue time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Source language code, or "auto"
    pub language: String,
    pub model_name: String,
    pub enable_translation: bool,
    pub target_language: String,
    pub subtitle_mode: SubtitleMode,
    /// Where subtitles are written; the input's directory when unset
    pub output_dir: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            language: "auto".to_string(),
            model_name: "base".to_string(),
            enable_translation: false,
            target_language: "en".to_string(),
            subtitle_mode: SubtitleMode::SoftSubtitle,
            output_dir: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl WorkStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Pending -> Processing -> terminal; nothing leaves a terminal state.
    pub fn can_transition_to(&self, next: WorkStatus) -> bool {
        match (self, next) {
            (Self::Pending, Self::Processing) => true,
            (Self::Processing, next) => next.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for WorkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: WorkItemId,
    pub input_path: PathBuf,
    pub settings: Settings,
    pub status: WorkStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Reason for the last failure or cancellation
    pub message: Option<String>,
    pub outputs: Vec<PathBuf>,
}

impl WorkItem {
    pub fn new<P: Into<PathBuf>>(input_path: P, settings: Settings) -> Self {
        Self {
            id: Uuid::new_v4(),
            input_path: input_path.into(),
            settings,
            status: WorkStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            message: None,
            outputs: Vec::new(),
        }
    }

    pub fn display_name(&self) -> String {
        self.input_path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| self.input_path.display().to_string())
    }
}

/// Ordered, shareable collection of work items.
///
/// Clones share the same items, so a submitter can keep enqueueing while a
/// run is consuming the queue.
#[derive(Debug, Clone, Default)]
pub struct WorkQueue {
    items: Arc<Mutex<Vec<WorkItem>>>,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue<P: AsRef<Path>>(&self, input_path: P, settings: Settings) -> WorkItemId {
        self.enqueue_item(WorkItem::new(input_path.as_ref(), settings))
    }

    pub fn enqueue_item(&self, item: WorkItem) -> WorkItemId {
        let id = item.id;
        debug!("Enqueued {} as {}", item.input_path.display(), id);
        self.items.lock().push(item);
        id
    }

    /// First pending item in insertion order.
    pub fn peek_next(&self) -> Option<WorkItem> {
        self.items
            .lock()
            .iter()
            .find(|item| item.status == WorkStatus::Pending)
            .cloned()
    }

    /// Claim the first pending item: mark it `Processing` and return a copy,
    /// all under one lock so a concurrent `remove` cannot slip in between.
    pub fn take_next(&self) -> Option<WorkItem> {
        let mut items = self.items.lock();
        let item = items.iter_mut().find(|item| item.status == WorkStatus::Pending)?;
        item.status = WorkStatus::Processing;
        item.started_at = Some(Utc::now());
        debug!("Claimed {} for processing", item.id);
        Some(item.clone())
    }

    pub fn mark_status(&self, id: WorkItemId, status: WorkStatus) -> Result<()> {
        let mut items = self.items.lock();
        let item = items
            .iter_mut()
            .find(|item| item.id == id)
            .ok_or_else(|| SubqueueError::NotFound(format!("work item {}", id)))?;

        if !item.status.can_transition_to(status) {
            return Err(SubqueueError::InvalidTransition(format!(
                "{}: {} -> {}",
                item.display_name(),
                item.status,
                status
            )));
        }

        match status {
            WorkStatus::Processing => item.started_at = Some(Utc::now()),
            s if s.is_terminal() => item.finished_at = Some(Utc::now()),
            _ => {}
        }
        item.status = status;
        Ok(())
    }

    pub fn record_message<S: Into<String>>(&self, id: WorkItemId, message: S) -> Result<()> {
        self.with_item(id, |item| item.message = Some(message.into()))
    }

    pub fn record_outputs(&self, id: WorkItemId, outputs: Vec<PathBuf>) -> Result<()> {
        self.with_item(id, |item| item.outputs = outputs)
    }

    pub fn remove(&self, id: WorkItemId) -> Result<WorkItem> {
        let mut items = self.items.lock();
        let index = items
            .iter()
            .position(|item| item.id == id)
            .ok_or_else(|| SubqueueError::NotFound(format!("work item {}", id)))?;

        if items[index].status == WorkStatus::Processing {
            return Err(SubqueueError::Conflict(format!(
                "{} is being processed",
                items[index].display_name()
            )));
        }

        Ok(items.remove(index))
    }

    pub fn clear(&self) -> Result<()> {
        let mut items = self.items.lock();
        if let Some(active) = items.iter().find(|item| item.status == WorkStatus::Processing) {
            return Err(SubqueueError::Conflict(format!(
                "{} is being processed",
                active.display_name()
            )));
        }
        items.clear();
        Ok(())
    }

    pub fn get(&self, id: WorkItemId) -> Option<WorkItem> {
        self.items.lock().iter().find(|item| item.id == id).cloned()
    }

    pub fn list(&self) -> Vec<WorkItem> {
        self.items.lock().clone()
    }

    pub fn pending_count(&self) -> usize {
        self.count(WorkStatus::Pending)
    }

    pub fn count(&self, status: WorkStatus) -> usize {
        self.items.lock().iter().filter(|item| item.status == status).count()
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    fn with_item<F: FnOnce(&mut WorkItem)>(&self, id: WorkItemId, f: F) -> Result<()> {
        let mut items = self.items.lock();
        let item = items
            .iter_mut()
            .find(|item| item.id == id)
            .ok_or_else(|| SubqueueError::NotFound(format!("work item {}", id)))?;
        f(item);
        Ok(())
    }
}
