use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Callback a long-running collaborator polls to learn it should stop.
pub type StopPoll = Arc<dyn Fn() -> bool + Send + Sync>;

/// Shared stop signal polled cooperatively by the pipeline.
///
/// Clones share the same flag. Nothing is interrupted when the token is
/// signaled; the orchestrator and the stage collaborators check it at their
/// own poll points and wind down from there.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Calling this more than once has no further effect.
    pub fn signal(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_signaled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Closure form of [`is_signaled`](Self::is_signaled) for collaborators
    /// that take a stop-poll callback.
    pub fn stop_poll(&self) -> StopPoll {
        let token = self.clone();
        Arc::new(move || token.is_signaled())
    }
}
