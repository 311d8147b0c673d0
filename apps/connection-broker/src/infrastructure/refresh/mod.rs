//! Credential Refresh Scheduler
//!
//! Periodically scans the registry for live sessions whose credentials are
//! about to expire and renews them. Refreshes run sequentially so one slow
//! upstream cannot multiply its load.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::application::services::ConnectionService;
use crate::infrastructure::metrics;

/// Outcome of a single scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshReport {
    /// Connections that were due.
    pub due: usize,
    /// Refreshes that failed.
    pub failed: usize,
}

/// Background loop renewing credentials.
pub struct RefreshScheduler {
    service: Arc<ConnectionService>,
    interval: Duration,
    cancel: CancellationToken,
}

impl RefreshScheduler {
    /// Create a new scheduler.
    #[must_use]
    pub const fn new(
        service: Arc<ConnectionService>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            service,
            interval,
            cancel,
        }
    }

    /// Run the scheduler until cancelled.
    pub async fn run(self) {
        tracing::info!(interval_secs = self.interval.as_secs(), "Refresh scheduler started");

        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::debug!("Refresh scheduler cancelled");
                    break;
                }
                _ = interval.tick() => {
                    let report = self.tick().await;
                    if report.due > 0 {
                        tracing::info!(
                            due = report.due,
                            failed = report.failed,
                            "Refresh scan finished"
                        );
                    }
                }
            }
        }

        tracing::info!("Refresh scheduler stopped");
    }

    /// Run one scan.
    pub async fn tick(&self) -> RefreshReport {
        let due = self.service.get_connections_to_refresh();
        let mut report = RefreshReport {
            due: due.len(),
            failed: 0,
        };

        for context in &due {
            if self.cancel.is_cancelled() {
                break;
            }
            if self.service.refresh_connection(context).await.is_err() {
                report.failed += 1;
            }
        }

        metrics::set_connections(&self.service.registry_stats());
        report
    }
}

// =============================================================================
// Tests
// =============================================================================
