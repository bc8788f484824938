use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep_until, Instant};
use tracing::debug;

use crate::cancel::CancellationToken;
use crate::config::ThrottleConfig;

const WINDOW: Duration = Duration::from_secs(60);
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Request bookkeeping guarded by the throttle's lock.
#[derive(Debug, Default)]
pub struct ThrottleState {
    request_timestamps: VecDeque<Instant>,
    last_request_time: Option<Instant>,
    request_count: u64,
}

impl ThrottleState {
    /// Drop timestamps that have aged out of the sliding window.
    fn prune(&mut self, now: Instant) {
        while let Some(oldest) = self.request_timestamps.front() {
            if now.saturating_duration_since(*oldest) >= WINDOW {
                self.request_timestamps.pop_front();
            } else {
                break;
            }
        }
    }

    fn record(&mut self, now: Instant) {
        self.request_timestamps.push_back(now);
        self.last_request_time = Some(now);
        self.request_count += 1;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThrottleStats {
    pub requests_in_window: usize,
    pub request_count: u64,
    pub last_request_time: Option<Instant>,
}

/// Paces outbound translation requests.
///
/// Two limits apply: no more than `max_requests_per_minute` requests in any
/// 60 second window, and a minimum gap between consecutive requests that
/// grows with the number of workers sharing the service. The lock is held
/// for the whole wait, so concurrent callers are admitted one at a time in
/// arrival order.
#[derive(Debug)]
pub struct ThrottleManager {
    max_requests_per_minute: usize,
    base_delay: Duration,
    state: Mutex<ThrottleState>,
}

impl ThrottleManager {
    pub fn new(max_requests_per_minute: usize, base_delay: Duration) -> Self {
        Self {
            max_requests_per_minute: max_requests_per_minute.max(1),
            base_delay,
            state: Mutex::new(ThrottleState::default()),
        }
    }

    pub fn from_config(config: &ThrottleConfig) -> Self {
        Self::new(
            config.max_requests_per_minute,
            Duration::from_millis(config.base_delay_ms),
        )
    }

    /// Minimum gap between requests when `worker_count` callers share the service
    pub fn min_interval(&self, worker_count: usize) -> Duration {
        let factor = match worker_count {
            0..=2 => 1.0,
            3..=4 => 1.5,
            5..=6 => 2.0,
            _ => 3.0,
        };
        self.base_delay.mul_f64(factor)
    }

    /// Wait until a request may be sent, then record it.
    ///
    /// Returns false without recording when `cancel` is signaled first.
    pub async fn wait_if_needed(&self, worker_count: usize, cancel: &CancellationToken) -> bool {
        let mut state = self.state.lock().await;
        let min_interval = self.min_interval(worker_count);

        loop {
            if cancel.is_signaled() {
                debug!("Throttle wait abandoned: cancellation requested");
                return false;
            }

            let now = Instant::now();
            state.prune(now);

            let mut ready_at = now;

            if state.request_timestamps.len() >= self.max_requests_per_minute {
                if let Some(oldest) = state.request_timestamps.front() {
                    ready_at = ready_at.max(*oldest + WINDOW);
                }
            }

            if let Some(last) = state.last_request_time {
                ready_at = ready_at.max(last + min_interval);
            }

            if ready_at <= now {
                break;
            }

            debug!(
                "Throttling translation request for {:?} ({} in window, {} workers)",
                ready_at - now,
                state.request_timestamps.len(),
                worker_count
            );
            sleep_until(ready_at.min(now + CANCEL_POLL_INTERVAL)).await;
        }

        state.record(Instant::now());
        true
    }

    pub async fn stats(&self) -> ThrottleStats {
        let mut state = self.state.lock().await;
        state.prune(Instant::now());
        ThrottleStats {
            requests_in_window: state.request_timestamps.len(),
            request_count: state.request_count,
            last_request_time: state.last_request_time,
        }
    }

    pub async fn reset(&self) {
        *self.state.lock().await = ThrottleState::default();
    }
}
