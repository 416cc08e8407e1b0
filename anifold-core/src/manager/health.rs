//! Concurrent health probing of every registered source.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::SourceManager;
use crate::retry::with_timeout;
use crate::source::{HealthState, HealthStatus, RequestOptions, Source};

impl SourceManager {
    /// Probes every source concurrently, each bounded by `timeout`, and
    /// records the outcome.
    ///
    /// A healthy probe marks the source available. A probe answering
    /// `false` reports the source offline without touching its tracker.
    /// Errors and timeouts leave the previous status in place.
    pub async fn check_all_health(
        &self,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Vec<HealthStatus> {
        let probes = self
            .sources
            .iter()
            .map(|source| probe(Arc::clone(source), timeout, cancel.child_token()));
        let outcomes = join_all(probes).await;

        {
            let mut health = self.health.write();
            for (name, outcome) in outcomes {
                let now = Utc::now();
                match outcome {
                    ProbeOutcome::Answered { healthy, latency } => {
                        let status = if healthy {
                            HealthState::Online
                        } else {
                            HealthState::Offline
                        };
                        health.insert(
                            name.clone(),
                            HealthStatus {
                                name,
                                status,
                                latency: Some(latency.as_millis() as u64),
                                last_check: now,
                            },
                        );
                    }
                    ProbeOutcome::Failed { available } => {
                        let fallback = if available {
                            HealthState::Online
                        } else {
                            HealthState::Offline
                        };
                        let status = health.get(&name).map_or(fallback, |h| h.status);
                        health.insert(
                            name.clone(),
                            HealthStatus {
                                name,
                                status,
                                latency: None,
                                last_check: now,
                            },
                        );
                    }
                }
            }
        }

        self.health_report()
    }

    /// Same as [`Self::check_all_health`] with the configured probe timeout.
    pub async fn check_all_health_default(&self, cancel: &CancellationToken) -> Vec<HealthStatus> {
        self.check_all_health(self.health_timeout, cancel).await
    }

    /// Latest health per source in registration order, reconciled with the
    /// failure trackers.
    ///
    /// An unavailable tracker always reports `offline`; an available tracker
    /// with failures since its last success reports `degraded`.
    pub fn health_report(&self) -> Vec<HealthStatus> {
        let health = self.health.read();
        self.sources
            .iter()
            .map(|source| {
                let snapshot = source.tracker().snapshot();
                let recorded = health.get(source.name());
                let status = if !snapshot.available {
                    HealthState::Offline
                } else if snapshot.consecutive_failures > 0 {
                    HealthState::Degraded
                } else {
                    recorded.map_or(HealthState::Online, |h| h.status)
                };

                HealthStatus {
                    name: source.name().to_string(),
                    status,
                    latency: recorded.and_then(|h| h.latency),
                    last_check: recorded.map_or_else(Utc::now, |h| h.last_check),
                }
            })
            .collect()
    }

    /// Runs [`Self::check_all_health`] immediately and then every `interval`
    /// until `cancel` fires.
    pub fn spawn_health_monitor(
        self: &Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::debug!("Health monitor stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        let report = manager.check_all_health_default(&cancel).await;
                        let offline = report
                            .iter()
                            .filter(|h| h.status == HealthState::Offline)
                            .count();
                        tracing::info!(
                            sources = report.len(),
                            offline,
                            "Health check completed"
                        );
                    }
                }
            }
        })
    }
}

enum ProbeOutcome {
    Answered { healthy: bool, latency: Duration },
    Failed { available: bool },
}

async fn probe(
    source: Arc<dyn Source>,
    timeout: Duration,
    cancel: CancellationToken,
) -> (String, ProbeOutcome) {
    let name = source.name().to_string();
    let opts = RequestOptions::with_cancel(cancel.clone()).timeout(timeout);
    let started = Instant::now();

    let outcome = match with_timeout(source.health_check(&opts), timeout, &cancel).await {
        Ok(true) => {
            source.tracker().mark_available();
            ProbeOutcome::Answered {
                healthy: true,
                latency: started.elapsed(),
            }
        }
        Ok(false) => {
            tracing::warn!(source = %name, "Health probe reported source unhealthy");
            ProbeOutcome::Answered {
                healthy: false,
                latency: started.elapsed(),
            }
        }
        Err(error) => {
            tracing::warn!(source = %name, error = %error, "Health probe failed");
            ProbeOutcome::Failed {
                available: source.is_available(),
            }
        }
    };
    (name, outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::SourceError;
    use crate::testing::MockSource;

    #[tokio::test(start_paused = true)]
    async fn test_probes_run_concurrently_and_record_latency() {
        let slow = Arc::new(MockSource::new("Slow").with_latency(Duration::from_secs(2)));
        let fast = Arc::new(MockSource::new("Fast"));
        let manager = SourceManager::builder()
            .register(slow.clone())
            .register(fast.clone())
            .build()
            .unwrap();

        let started = Instant::now();
        let report = manager
            .check_all_health(Duration::from_secs(5), &CancellationToken::new())
            .await;

        assert!(started.elapsed() < Duration::from_secs(3));
        assert_eq!(report.len(), 2);
        assert!(report.iter().all(|h| h.status == HealthState::Online));
        assert_eq!(report[0].latency, Some(2000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_successful_probe_restores_offline_source() {
        let source = Arc::new(MockSource::new("A"));
        for _ in 0..source.tracker().threshold() {
            source.tracker().record_failure();
        }
        let manager = SourceManager::builder()
            .register(source.clone())
            .build()
            .unwrap();
        assert_eq!(manager.health_report()[0].status, HealthState::Offline);

        manager
            .check_all_health(Duration::from_secs(5), &CancellationToken::new())
            .await;
        assert!(source.is_available());
        assert_eq!(manager.health_report()[0].status, HealthState::Online);
    }

    #[tokio::test(start_paused = true)]
    async fn test_health_check_error_keeps_previous_status() {
        let source = Arc::new(MockSource::new("A"));
        let manager = SourceManager::builder()
            .register(source.clone())
            .build()
            .unwrap();
        let cancel = CancellationToken::new();

        manager.check_all_health(Duration::from_secs(5), &cancel).await;
        source.set_health(Err(SourceError::Network {
            reason: "refused".to_string(),
        }));
        let report = manager.check_all_health(Duration::from_secs(5), &cancel).await;
        assert_eq!(report[0].status, HealthState::Online);
        assert_eq!(report[0].latency, None);
        assert_eq!(source.tracker().consecutive_failures(), 0);

        source.set_health(Ok(false));
        let report = manager.check_all_health(Duration::from_secs(5), &cancel).await;
        assert_eq!(report[0].status, HealthState::Offline);
        assert!(source.is_available(), "false probe must not touch the tracker");
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_probe_is_not_a_downgrade() {
        let source = Arc::new(MockSource::new("Slow").with_latency(Duration::from_secs(30)));
        let manager = SourceManager::builder()
            .register(source.clone())
            .build()
            .unwrap();

        let report = manager
            .check_all_health(Duration::from_secs(5), &CancellationToken::new())
            .await;
        assert_eq!(report[0].status, HealthState::Online);
        assert_eq!(source.tracker().consecutive_failures(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_degraded_when_failures_pending() {
        let source = Arc::new(MockSource::new("A"));
        let manager = SourceManager::builder()
            .register(source.clone())
            .build()
            .unwrap();

        source.tracker().record_failure();
        assert_eq!(manager.health_report()[0].status, HealthState::Degraded);
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_stops_on_cancel() {
        let source = Arc::new(MockSource::new("A"));
        let manager = Arc::new(
            SourceManager::builder()
                .register(source.clone())
                .build()
                .unwrap(),
        );
        let cancel = CancellationToken::new();
        let handle = manager.spawn_health_monitor(Duration::from_secs(60), cancel.clone());

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(source.call_count("health"), 1);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(source.call_count("health"), 2);

        cancel.cancel();
        handle.await.unwrap();
    }
}
