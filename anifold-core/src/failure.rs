//! Per-source consecutive failure tracking with automatic recovery.
//!
//! A source goes offline after a run of consecutive counted failures and comes
//! back on its own after a recovery window. Cancellations and timeouts are
//! never counted.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::SourceConfig;
use crate::source::SourceError;

/// Failures in a row before a source is taken offline.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;

/// Time an offline source waits before it is tried again.
pub const DEFAULT_RECOVERY_WINDOW: Duration = Duration::from_secs(30);

/// Point-in-time view of a tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureSnapshot {
    pub available: bool,
    pub consecutive_failures: u32,
    pub last_failure: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct TrackerState {
    available: bool,
    consecutive_failures: u32,
    last_failure: Option<DateTime<Utc>>,
    /// Deadline of the armed recovery, honoured lazily when no runtime
    /// was available to spawn the timer.
    recover_at: Option<Instant>,
    /// Bumped on every arm so a stale timer cannot flip a newer state.
    generation: u64,
}

/// Consecutive-failure state machine owned by one source.
///
/// Cloning shares the underlying state.
#[derive(Debug, Clone)]
pub struct FailureTracker {
    source_name: Arc<str>,
    threshold: u32,
    recovery_window: Duration,
    state: Arc<Mutex<TrackerState>>,
    recovery_timer: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl FailureTracker {
    /// Creates a tracker with explicit threshold and recovery window.
    ///
    /// A zero threshold is treated as one.
    pub fn new(source_name: impl Into<String>, threshold: u32, recovery_window: Duration) -> Self {
        let source_name: String = source_name.into();
        Self {
            source_name: Arc::from(source_name),
            threshold: threshold.max(1),
            recovery_window,
            state: Arc::new(Mutex::new(TrackerState {
                available: true,
                consecutive_failures: 0,
                last_failure: None,
                recover_at: None,
                generation: 0,
            })),
            recovery_timer: Arc::new(Mutex::new(None)),
        }
    }

    /// Creates a tracker from the source section of the configuration.
    pub fn from_config(source_name: impl Into<String>, config: &SourceConfig) -> Self {
        Self::new(
            source_name,
            config.max_consecutive_failures,
            config.recovery_window,
        )
    }

    /// Name of the source this tracker belongs to.
    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    /// Failure threshold.
    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// Recovery window.
    pub fn recovery_window(&self) -> Duration {
        self.recovery_window
    }

    /// Returns true when the source may be selected.
    pub fn is_available(&self) -> bool {
        let mut state = self.state.lock();
        Self::apply_lazy_recovery(&mut state);
        state.available
    }

    /// Current consecutive failure count.
    pub fn consecutive_failures(&self) -> u32 {
        let mut state = self.state.lock();
        Self::apply_lazy_recovery(&mut state);
        state.consecutive_failures
    }

    /// Snapshot of the full state.
    pub fn snapshot(&self) -> FailureSnapshot {
        let mut state = self.state.lock();
        Self::apply_lazy_recovery(&mut state);
        FailureSnapshot {
            available: state.available,
            consecutive_failures: state.consecutive_failures,
            last_failure: state.last_failure,
        }
    }

    /// Resets the failure counter after a fully successful operation.
    pub fn record_success(&self) {
        let mut state = self.state.lock();
        Self::apply_lazy_recovery(&mut state);
        state.consecutive_failures = 0;
    }

    /// Records the outcome of a failed operation.
    ///
    /// Returns true when this failure took the source offline.
    pub fn record_error(&self, error: &SourceError) -> bool {
        if !error.counts_as_failure() {
            tracing::debug!(
                source = %self.source_name,
                error = %error,
                "Ignoring non-counted source error"
            );
            return false;
        }
        self.record_failure()
    }

    /// Counts one failure. No-op while the source is offline.
    ///
    /// Returns true when this failure took the source offline.
    pub fn record_failure(&self) -> bool {
        let generation = {
            let mut state = self.state.lock();
            Self::apply_lazy_recovery(&mut state);
            if !state.available {
                return false;
            }

            state.consecutive_failures += 1;
            state.last_failure = Some(Utc::now());

            if state.consecutive_failures < self.threshold {
                tracing::debug!(
                    source = %self.source_name,
                    failures = state.consecutive_failures,
                    threshold = self.threshold,
                    "Source failure recorded"
                );
                return false;
            }

            state.available = false;
            state.consecutive_failures = 0;
            state.generation += 1;
            state.recover_at = Some(Instant::now() + self.recovery_window);
            state.generation
        };

        tracing::warn!(
            source = %self.source_name,
            recovery_secs = self.recovery_window.as_secs(),
            "Source marked offline after {} consecutive failures",
            self.threshold
        );
        self.arm_recovery(generation);
        true
    }

    /// Marks the source available immediately, cancelling any pending
    /// recovery timer.
    pub fn mark_available(&self) {
        {
            let mut state = self.state.lock();
            if !state.available {
                tracing::info!(source = %self.source_name, "Source marked online");
            }
            state.available = true;
            state.consecutive_failures = 0;
            state.recover_at = None;
            state.generation += 1;
        }
        if let Some(timer) = self.recovery_timer.lock().take() {
            timer.abort();
        }
    }

    /// Returns true while a recovery timer is armed and has not fired.
    pub fn has_pending_recovery(&self) -> bool {
        self.recovery_timer
            .lock()
            .as_ref()
            .is_some_and(|timer| !timer.is_finished())
    }

    fn arm_recovery(&self, generation: u64) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::debug!(
                source = %self.source_name,
                "No runtime available, recovery will be applied on next read"
            );
            return;
        };

        let state = Arc::clone(&self.state);
        let source_name = Arc::clone(&self.source_name);
        let window = self.recovery_window;
        let timer = runtime.spawn(async move {
            tokio::time::sleep(window).await;
            let mut state = state.lock();
            if state.generation == generation && !state.available {
                state.available = true;
                state.consecutive_failures = 0;
                state.recover_at = None;
                tracing::info!(source = %source_name, "Source recovered after cooldown");
            }
        });

        if let Some(previous) = self.recovery_timer.lock().replace(timer) {
            previous.abort();
        }
    }

    fn apply_lazy_recovery(state: &mut TrackerState) {
        if let Some(deadline) = state.recover_at {
            if !state.available && Instant::now() >= deadline {
                state.available = true;
                state.consecutive_failures = 0;
                state.recover_at = None;
            }
        }
    }
}

impl Drop for FailureTracker {
    fn drop(&mut self) {
        // Only the last clone owns the timer.
        if Arc::strong_count(&self.recovery_timer) == 1 {
            if let Some(timer) = self.recovery_timer.lock().take() {
                timer.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upstream_error() -> SourceError {
        SourceError::Upstream {
            status: 502,
            url: "https://upstream.test".to_string(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_goes_offline_at_threshold() {
        let tracker = FailureTracker::new("test", 5, Duration::from_secs(30));

        for _ in 0..4 {
            assert!(!tracker.record_error(&upstream_error()));
            assert!(tracker.is_available());
        }
        assert!(tracker.record_error(&upstream_error()));
        assert!(!tracker.is_available());
        assert_eq!(tracker.consecutive_failures(), 0);
        assert!(tracker.has_pending_recovery());
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_window() {
        let tracker = FailureTracker::new("test", 2, Duration::from_secs(30));
        tracker.record_failure();
        tracker.record_failure();
        assert!(!tracker.is_available());

        tokio::time::sleep(Duration::from_secs(29)).await;
        assert!(!tracker.is_available());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(tracker.is_available());
        assert_eq!(tracker.consecutive_failures(), 0);
        assert!(!tracker.has_pending_recovery());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_never_counts() {
        let tracker = FailureTracker::new("test", 2, Duration::from_secs(30));
        tracker.record_failure();

        assert!(!tracker.record_error(&SourceError::Cancelled));
        assert!(!tracker.record_error(&SourceError::Timeout {
            after: Duration::from_secs(5)
        }));
        assert_eq!(tracker.consecutive_failures(), 1);
        assert!(tracker.is_available());
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_counter() {
        let tracker = FailureTracker::new("test", 3, Duration::from_secs(30));
        tracker.record_failure();
        tracker.record_failure();
        tracker.record_success();
        tracker.record_failure();
        tracker.record_failure();

        assert!(tracker.is_available());
        assert_eq!(tracker.consecutive_failures(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_offline_does_not_pile_up() {
        let tracker = FailureTracker::new("test", 1, Duration::from_secs(30));
        assert!(tracker.record_failure());
        assert!(!tracker.record_failure());
        assert!(!tracker.record_failure());
        assert_eq!(tracker.consecutive_failures(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_replaces_timer() {
        let tracker = FailureTracker::new("test", 1, Duration::from_secs(30));
        tracker.record_failure();

        // Manual recovery, then a fresh outage 20s later.
        tokio::time::sleep(Duration::from_secs(20)).await;
        tracker.mark_available();
        tracker.record_failure();
        assert!(!tracker.is_available());

        // The first timer would have fired at t=30; the source must stay
        // offline until t=50.
        tokio::time::sleep(Duration::from_secs(15)).await;
        assert!(!tracker.is_available());

        tokio::time::sleep(Duration::from_secs(16)).await;
        assert!(tracker.is_available());
    }

    #[test]
    fn test_lazy_recovery_without_runtime() {
        let tracker = FailureTracker::new("test", 1, Duration::ZERO);
        tracker.record_failure();
        assert!(tracker.is_available());
    }

    #[tokio::test(start_paused = true)]
    async fn test_mark_available_cancels_timer() {
        let tracker = FailureTracker::new("test", 1, Duration::from_secs(30));
        tracker.record_failure();
        tracker.mark_available();

        assert!(tracker.is_available());
        assert!(!tracker.has_pending_recovery());
    }
}
