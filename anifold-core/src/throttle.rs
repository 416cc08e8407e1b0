//! Per-source admission throttle.
//!
//! Bounds both the number of simultaneous outbound requests and the spacing
//! between two dispatches, independent of how many callers are waiting.
//! Waiters are served strictly in arrival order.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::config::ThrottleConfig;

/// Point-in-time view of a throttle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottleStats {
    pub active: usize,
    pub queued: usize,
    pub max_concurrent: usize,
    pub min_delay: Duration,
    /// Total operations dispatched since creation
    pub dispatched: u64,
}

#[derive(Debug)]
struct ThrottleState {
    queue: VecDeque<oneshot::Sender<ActiveSlot>>,
    active: usize,
    last_dispatch: Option<Instant>,
    pump_scheduled: bool,
    dispatched: u64,
}

#[derive(Debug)]
struct ThrottleInner {
    max_concurrent: usize,
    min_delay: Duration,
    state: Mutex<ThrottleState>,
}

/// Concurrency slot held while an admitted operation runs.
///
/// Dropping it, including when the operation future is dropped mid-flight,
/// frees the slot and dispatches the next waiter.
#[derive(Debug)]
struct ActiveSlot {
    inner: Arc<ThrottleInner>,
}

impl Drop for ActiveSlot {
    fn drop(&mut self) {
        {
            let mut state = self.inner.state.lock();
            state.active = state.active.saturating_sub(1);
        }
        pump(&self.inner);
    }
}

/// FIFO admission queue limiting concurrency and dispatch rate.
///
/// Cloning shares the queue.
#[derive(Debug, Clone)]
pub struct AdmissionThrottle {
    inner: Arc<ThrottleInner>,
}

impl AdmissionThrottle {
    /// Creates a throttle. A zero `max_concurrent` is treated as one.
    pub fn new(max_concurrent: usize, min_delay: Duration) -> Self {
        Self {
            inner: Arc::new(ThrottleInner {
                max_concurrent: max_concurrent.max(1),
                min_delay,
                state: Mutex::new(ThrottleState {
                    queue: VecDeque::new(),
                    active: 0,
                    last_dispatch: None,
                    pump_scheduled: false,
                    dispatched: 0,
                }),
            }),
        }
    }

    /// Builds a throttle from configuration, or `None` when throttling is
    /// disabled.
    pub fn from_config(config: &ThrottleConfig) -> Option<Self> {
        config
            .enabled
            .then(|| Self::new(config.max_concurrent, config.min_delay))
    }

    /// Waits for admission, then runs `op` while holding a concurrency slot.
    ///
    /// Dropping the returned future before admission removes the waiter
    /// without consuming a slot.
    pub async fn run<F, T>(&self, op: F) -> T
    where
        F: Future<Output = T>,
    {
        let (tx, rx) = oneshot::channel();
        self.inner.state.lock().queue.push_back(tx);
        pump(&self.inner);

        // The sender is only dropped unsent when this receiver is gone.
        let _slot = rx.await.ok();
        op.await
    }

    /// Current counters.
    pub fn stats(&self) -> ThrottleStats {
        let state = self.inner.state.lock();
        ThrottleStats {
            active: state.active,
            queued: state.queue.iter().filter(|tx| !tx.is_closed()).count(),
            max_concurrent: self.inner.max_concurrent,
            min_delay: self.inner.min_delay,
            dispatched: state.dispatched,
        }
    }
}

/// Dispatches as many waiters as the concurrency bound and spacing allow.
fn pump(inner: &Arc<ThrottleInner>) {
    loop {
        let (waiter, slot) = {
            let mut state = inner.state.lock();

            while state.queue.front().is_some_and(|tx| tx.is_closed()) {
                state.queue.pop_front();
            }
            if state.active >= inner.max_concurrent || state.queue.is_empty() {
                return;
            }

            let now = Instant::now();
            if let Some(last) = state.last_dispatch {
                let elapsed = now.duration_since(last);
                if elapsed < inner.min_delay {
                    if !state.pump_scheduled {
                        state.pump_scheduled = true;
                        schedule_pump(inner, inner.min_delay - elapsed);
                    }
                    return;
                }
            }

            let Some(waiter) = state.queue.pop_front() else {
                return;
            };
            state.active += 1;
            state.dispatched += 1;
            state.last_dispatch = Some(now);
            (
                waiter,
                ActiveSlot {
                    inner: Arc::clone(inner),
                },
            )
        };

        // A waiter that vanished after the closed check hands the slot back
        // through ActiveSlot::drop.
        if let Err(slot) = waiter.send(slot) {
            drop(slot);
        }
    }
}

fn schedule_pump(inner: &Arc<ThrottleInner>, delay: Duration) {
    let inner = Arc::clone(inner);
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        inner.state.lock().pump_scheduled = false;
        pump(&inner);
    });
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_bounds_concurrency_and_spacing() {
        let throttle = AdmissionThrottle::new(2, Duration::from_millis(100));
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let starts = Arc::new(Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let throttle = throttle.clone();
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            let starts = Arc::clone(&starts);
            handles.push(tokio::spawn(async move {
                throttle
                    .run(async {
                        starts.lock().push(Instant::now());
                        let now_active = active.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now_active, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(250)).await;
                        active.fetch_sub(1, Ordering::SeqCst);
                    })
                    .await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 2);

        let mut starts = starts.lock().clone();
        assert_eq!(starts.len(), 8);
        starts.sort();
        for pair in starts.windows(2) {
            assert!(
                pair[1].duration_since(pair[0]) >= Duration::from_millis(100),
                "dispatches closer than min_delay"
            );
        }

        let stats = throttle.stats();
        assert_eq!(stats.active, 0);
        assert_eq!(stats.queued, 0);
        assert_eq!(stats.dispatched, 8);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_waiter_does_not_consume_slot() {
        let throttle = AdmissionThrottle::new(1, Duration::ZERO);
        let (release_tx, release_rx) = oneshot::channel::<()>();

        let holder = {
            let throttle = throttle.clone();
            tokio::spawn(async move {
                throttle
                    .run(async {
                        let _ = release_rx.await;
                    })
                    .await;
            })
        };
        tokio::task::yield_now().await;
        assert_eq!(throttle.stats().active, 1);

        // Gives up while still queued behind the holder.
        let abandoned =
            tokio::time::timeout(Duration::from_millis(10), throttle.run(async { 1 })).await;
        assert!(abandoned.is_err());

        release_tx.send(()).unwrap();
        holder.await.unwrap();

        assert_eq!(throttle.run(async { 2 }).await, 2);
        let stats = throttle.stats();
        assert_eq!(stats.active, 0);
        assert_eq!(stats.dispatched, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_running_operation_frees_slot() {
        let throttle = AdmissionThrottle::new(1, Duration::ZERO);

        let stuck = {
            let throttle = throttle.clone();
            tokio::spawn(async move {
                throttle.run(std::future::pending::<()>()).await;
            })
        };
        tokio::task::yield_now().await;
        assert_eq!(throttle.stats().active, 1);

        stuck.abort();
        let _ = stuck.await;

        let value = tokio::time::timeout(Duration::from_secs(1), throttle.run(async { 7 }))
            .await
            .expect("slot should have been released");
        assert_eq!(value, 7);
    }

    #[test]
    fn test_disabled_config_yields_no_throttle() {
        let config = ThrottleConfig::default();
        assert!(AdmissionThrottle::from_config(&config).is_none());

        let enabled = ThrottleConfig {
            enabled: true,
            ..config
        };
        let throttle = AdmissionThrottle::from_config(&enabled).unwrap();
        assert_eq!(throttle.stats().max_concurrent, 2);
    }
}
