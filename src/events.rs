use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// Stage-internal progress callback: percent (0-100) and a short message.
pub type ProgressCallback = Arc<dyn Fn(f64, &str) + Send + Sync>;

/// Events emitted to the submitter during a run, in emission order.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    /// Progress within the current file, 0-100
    Progress { percent: f64, message: String },
    Status(String),
    Error(String),
    /// One emitted subtitle artifact for a finished input
    FileCompleted { input_path: PathBuf, output_path: PathBuf },
    /// Always the last event of a run
    Finished,
}

pub type EventReceiver = mpsc::UnboundedReceiver<PipelineEvent>;

/// Sending half of the event stream.
///
/// Emission never blocks and never fails: a submitter that dropped its
/// receiver simply stops hearing about the run.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<PipelineEvent>,
}

impl EventSink {
    pub fn channel() -> (Self, EventReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn emit(&self, event: PipelineEvent) {
        if self.tx.send(event).is_err() {
            debug!("Event receiver dropped; discarding event");
        }
    }

    pub fn progress<S: Into<String>>(&self, percent: f64, message: S) {
        self.emit(PipelineEvent::Progress {
            percent: percent.clamp(0.0, 100.0),
            message: message.into(),
        });
    }

    pub fn status<S: Into<String>>(&self, message: S) {
        self.emit(PipelineEvent::Status(message.into()));
    }

    pub fn error<S: Into<String>>(&self, message: S) {
        self.emit(PipelineEvent::Error(message.into()));
    }

    pub fn file_completed(&self, input_path: PathBuf, output_path: PathBuf) {
        self.emit(PipelineEvent::FileCompleted { input_path, output_path });
    }

    pub fn finished(&self) {
        self.emit(PipelineEvent::Finished);
    }
}
