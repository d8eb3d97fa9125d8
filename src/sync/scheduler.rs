use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;

use super::engine::{SyncEngine, SyncSettings};
use super::retention::{RetentionManager, RetentionPolicy, RetentionReport};
use crate::source::ContentSource;
use crate::storage::Database;

/// Default time between cycles (10 minutes)
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// Shortest accepted time between cycles; `tokio::time::interval` panics on zero
pub const MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(1);

/// Result of one scheduler cycle.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub succeeded: usize,
    pub failed: usize,
    pub retention: RetentionReport,
}

/// Periodically syncs every subscription, then prunes old items.
pub struct Scheduler {
    db: Database,
    source: Arc<dyn ContentSource>,
    engine: SyncEngine,
    retention: RetentionManager,
    interval: Duration,
}

impl Scheduler {
    /// Build a scheduler from injected dependencies.
    ///
    /// `interval` is raised to [`MIN_REFRESH_INTERVAL`] if shorter.
    pub fn new(
        db: Database,
        source: Arc<dyn ContentSource>,
        settings: SyncSettings,
        policy: RetentionPolicy,
        interval: Duration,
    ) -> Self {
        if interval < MIN_REFRESH_INTERVAL {
            tracing::warn!(
                requested_ms = interval.as_millis() as u64,
                "Refresh interval too short, using minimum"
            );
        }
        Self {
            engine: SyncEngine::new(db.clone(), settings),
            retention: RetentionManager::new(db.clone(), policy),
            db,
            source,
            interval: interval.max(MIN_REFRESH_INTERVAL),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run one cycle now, then one per interval, forever.
    ///
    /// A cycle that overruns the interval delays the next tick instead of
    /// triggering a burst of catch-up cycles.
    pub async fn start(&self) {
        tracing::info!(
            interval_secs = self.interval.as_secs(),
            "Feed scheduler started"
        );

        let mut timer = tokio::time::interval(self.interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            // First tick completes immediately
            timer.tick().await;
            self.run_cycle().await;
        }
    }

    /// Sync each subscription in turn (oldest first), then run retention once.
    ///
    /// One subscription failing never affects the others, and retention runs
    /// even when subscriptions could not be listed.
    pub async fn run_cycle(&self) -> CycleReport {
        let mut report = CycleReport::default();

        match self.db.list_all_subscriptions().await {
            Ok(subscriptions) => {
                tracing::debug!(count = subscriptions.len(), "Starting sync cycle");
                for subscription in &subscriptions {
                    match self
                        .engine
                        .synchronize(subscription, self.source.as_ref())
                        .await
                    {
                        Ok(_) => report.succeeded += 1,
                        Err(e) => {
                            tracing::warn!(
                                subscription_id = %subscription.id,
                                kind = %subscription.kind,
                                term = %subscription.search_term,
                                error = %e,
                                "Subscription sync failed"
                            );
                            report.failed += 1;
                        }
                    }
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to list subscriptions");
            }
        }

        report.retention = self.retention.run_cleanup().await;

        tracing::info!(
            succeeded = report.succeeded,
            failed = report.failed,
            pruned = report.retention.total_deleted(),
            "Sync cycle complete"
        );
        report
    }
}
