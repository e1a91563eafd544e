use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use ember_store::ObjectStore;
use futures::StreamExt;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Counters from a single sweep cycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Objects seen in the listing.
    pub scanned: usize,
    /// Expired objects this cycle deleted.
    pub expired: usize,
    /// Listing or deletion errors that were logged and skipped.
    pub failed: usize,
    /// Leftover staging and claimed files removed.
    pub purged: usize,
}

/// Periodically deletes objects older than the TTL.
///
/// Runs independently of request traffic. Deletes are idempotent, so racing
/// a burn retrieval or another sweep for the same object is harmless.
#[derive(Clone)]
pub struct ExpirySweeper {
    store: Arc<dyn ObjectStore>,
    ttl: Duration,
    interval: Duration,
    stale_artifact_age: Duration,
}

impl ExpirySweeper {
    pub fn new(store: Arc<dyn ObjectStore>, ttl: Duration, interval: Duration) -> Self {
        Self {
            store,
            ttl,
            interval,
            stale_artifact_age: Duration::from_secs(crate::config::DEFAULT_STALE_ARTIFACT_SECS),
        }
    }

    /// Override how old leftover staging and claimed files must be before
    /// a cycle purges them.
    pub fn with_stale_artifact_age(mut self, age: Duration) -> Self {
        self.stale_artifact_age = age;
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run one cycle as if the current time were `now`.
    ///
    /// Per-object failures are logged and counted; they never stop the
    /// cycle. A failing listing ends the scan early.
    pub async fn run_once(&self, now: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport::default();
        let mut listing = self.store.list_all();

        while let Some(entry) = listing.next().await {
            let info = match entry {
                Ok(info) => info,
                Err(e) => {
                    warn!(error = %e, "object listing failed; ending scan early");
                    report.failed += 1;
                    break;
                }
            };
            report.scanned += 1;
            if !info.is_expired(now, self.ttl) {
                continue;
            }
            match self.store.delete(&info.id).await {
                Ok(true) => {
                    report.expired += 1;
                    debug!(object_id = %info.id.short(), mode = %info.mode, "expired object deleted");
                }
                // Already gone: burned or swept concurrently.
                Ok(false) => {}
                Err(e) => {
                    report.failed += 1;
                    warn!(object_id = %info.id.short(), error = %e, "failed to delete expired object");
                }
            }
        }

        match self.store.purge_stale_artifacts(self.stale_artifact_age).await {
            Ok(purged) => report.purged = purged,
            Err(e) => {
                report.failed += 1;
                warn!(error = %e, "failed to purge stale artifacts");
            }
        }

        info!(
            scanned = report.scanned,
            expired = report.expired,
            failed = report.failed,
            purged = report.purged,
            "sweep cycle complete"
        );
        report
    }

    /// Start the background loop. The first cycle runs immediately.
    pub fn spawn(self) -> SweeperHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        // tokio's interval panics on a zero period.
        let period = self.interval.max(Duration::from_millis(1));

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(
                ttl_secs = self.ttl.as_secs(),
                interval_secs = period.as_secs(),
                backend = self.store.backend_name(),
                "expiry sweeper started"
            );

            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    _ = ticker.tick() => {}
                }
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    _ = self.run_once(Utc::now()) => {}
                }
            }
            info!("expiry sweeper stopped");
        });

        SweeperHandle {
            shutdown: shutdown_tx,
            task,
        }
    }
}

/// Owner of a running sweeper. Dropping the handle also stops the loop.
pub struct SweeperHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Stop the loop and wait for it to exit.
    pub async fn cancel(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            if !e.is_cancelled() {
                warn!(error = %e, "expiry sweeper task panicked");
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
