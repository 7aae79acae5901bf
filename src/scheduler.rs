//! Background ingestion: periodic tree sync plus a per-event odds fan-out.
//!
//! The fan-out is a dispatcher/worker-pool: one job per known event is
//! queued, workers pull and execute independently, and per-unit failures are
//! collected into an aggregate report instead of cancelling the cycle.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::cache::{odds_key, CacheStore};
use crate::config::Config;
use crate::db::{self, FanoutTarget, PgTreeStore};
use crate::error::{NormalizeError, Result};
use crate::feed::FeedClient;
use crate::normalize::normalize_event;
use crate::reconcile::reconcile_event_markets;
use crate::tree::{sync_tree, TreeSyncSummary};

/// Queued-but-unclaimed jobs; backpressures the dispatcher, not the workers.
const JOB_CHANNEL_CAPACITY: usize = 256;

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

/// Service health state surfaced by the /health endpoint.
#[derive(Clone)]
pub struct HealthState {
    pub last_sync_time: Arc<RwLock<Option<DateTime<Utc>>>>,
    pub last_event_count: Arc<RwLock<usize>>,
    pub error_count: Arc<RwLock<usize>>,
}

impl HealthState {
    pub fn new() -> Self {
        Self {
            last_sync_time: Arc::new(RwLock::new(None)),
            last_event_count: Arc::new(RwLock::new(0)),
            error_count: Arc::new(RwLock::new(0)),
        }
    }

    pub async fn record_success(&self, count: usize) {
        *self.last_sync_time.write().await = Some(Utc::now());
        *self.last_event_count.write().await = count;
        *self.error_count.write().await = 0;
    }

    pub async fn record_error(&self) {
        *self.error_count.write().await += 1;
    }
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Fan-out worker pool
// ---------------------------------------------------------------------------

/// What one unit of work produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitOutcome {
    /// Canonical document written to the cache, market ids reconciled.
    Stored,
    /// Upstream had nothing usable for this event.
    NoData,
}

#[derive(Debug, Default)]
pub struct FanoutReport {
    pub total: usize,
    pub stored: usize,
    pub empty: usize,
    /// (event_id, error) per failed unit.
    pub failed: Vec<(i64, String)>,
}

impl FanoutReport {
    pub fn failed_count(&self) -> usize {
        self.failed.len()
    }
}

/// Run `handler` over every target with a pool of `workers` pullers.
///
/// A unit's failure is captured in the report and never cancels its
/// siblings. Jobs are unordered across workers.
pub async fn run_fanout<F, Fut>(
    targets: Vec<FanoutTarget>,
    workers: usize,
    handler: F,
) -> FanoutReport
where
    F: Fn(FanoutTarget) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<UnitOutcome>> + Send + 'static,
{
    let total = targets.len();
    let mut report = FanoutReport { total, ..Default::default() };
    if total == 0 {
        return report;
    }

    let (job_tx, job_rx) = mpsc::channel::<FanoutTarget>(JOB_CHANNEL_CAPACITY);
    let job_rx = Arc::new(Mutex::new(job_rx));
    // Unbounded so a slow aggregator can never wedge the workers.
    let (done_tx, mut done_rx) = mpsc::unbounded_channel();
    let handler = Arc::new(handler);

    for _ in 0..workers.clamp(1, total) {
        let job_rx = Arc::clone(&job_rx);
        let done_tx = done_tx.clone();
        let handler = Arc::clone(&handler);
        tokio::spawn(async move {
            loop {
                let job = { job_rx.lock().await.recv().await };
                let Some(target) = job else { break };
                let outcome = (*handler)(target).await;
                if done_tx.send((target, outcome)).is_err() {
                    break;
                }
            }
        });
    }
    drop(done_tx);

    for target in targets {
        if job_tx.send(target).await.is_err() {
            break;
        }
    }
    drop(job_tx);

    while let Some((target, outcome)) = done_rx.recv().await {
        match outcome {
            Ok(UnitOutcome::Stored) => report.stored += 1,
            Ok(UnitOutcome::NoData) => report.empty += 1,
            Err(e) => report.failed.push((target.event_id, e.to_string())),
        }
    }
    report
}

// ---------------------------------------------------------------------------
// Ingestion service
// ---------------------------------------------------------------------------

pub struct IngestionService {
    config: Config,
    db: PgPool,
    cache: Arc<dyn CacheStore>,
    feed: Arc<FeedClient>,
    pub health: HealthState,
}

impl IngestionService {
    pub fn new(
        config: Config,
        db: PgPool,
        cache: Arc<dyn CacheStore>,
        feed: Arc<FeedClient>,
    ) -> Self {
        Self {
            config,
            db,
            cache,
            feed,
            health: HealthState::new(),
        }
    }

    /// Periodic loops, first iteration immediate. Runs until the process is
    /// shut down.
    pub async fn run(self: Arc<Self>) {
        info!(
            "Starting ingestion loops (tree every {}s, odds every {}s, {} workers)",
            self.config.tree_sync_interval_seconds,
            self.config.odds_sync_interval_seconds,
            self.config.fanout_workers,
        );

        let tree_svc = Arc::clone(&self);
        let tree_loop = tokio::spawn(async move { tree_svc.tree_loop().await });
        let odds_svc = Arc::clone(&self);
        let odds_loop = tokio::spawn(async move { odds_svc.odds_loop().await });

        let _ = tokio::join!(tree_loop, odds_loop);
    }

    async fn tree_loop(self: Arc<Self>) {
        let mut interval =
            tokio::time::interval(Duration::from_secs(self.config.tree_sync_interval_seconds));
        loop {
            interval.tick().await;
            match self.sync_tree_once().await {
                Ok(summary) => info!(
                    "Tree sync: +{} sports, +{} competitions, +{} events ({} skipped)",
                    summary.sports_created,
                    summary.competitions_created,
                    summary.events_created,
                    summary.skipped_items,
                ),
                Err(e) => {
                    self.health.record_error().await;
                    error!("Tree sync failed: {e:?}");
                }
            }
        }
    }

    async fn odds_loop(self: Arc<Self>) {
        let mut interval =
            tokio::time::interval(Duration::from_secs(self.config.odds_sync_interval_seconds));
        loop {
            interval.tick().await;
            match Arc::clone(&self).reconcile_all_events().await {
                Ok(report) => {
                    self.health.record_success(report.stored).await;
                    info!(
                        "Odds cycle: {} events, {} stored, {} empty, {} failed",
                        report.total,
                        report.stored,
                        report.empty,
                        report.failed_count(),
                    );
                    for (event_id, err) in &report.failed {
                        warn!(event_id, "event refresh failed: {err}");
                    }
                }
                Err(e) => {
                    self.health.record_error().await;
                    error!("Odds cycle failed to start: {e:?}");
                }
            }
        }
    }

    /// Fetch the tree snapshot and sync it in one transaction.
    pub async fn sync_tree_once(&self) -> Result<TreeSyncSummary> {
        let doc = self.feed.fetch_tree_record().await?;
        let mut store = PgTreeStore::begin(&self.db).await?;
        let summary = sync_tree(&mut store, &doc).await?;
        store.commit().await?;
        Ok(summary)
    }

    /// One odds cycle: one unit of work per known event.
    pub async fn reconcile_all_events(self: Arc<Self>) -> Result<FanoutReport> {
        let targets = db::fanout_targets(&self.db).await?;
        let svc = Arc::clone(&self);
        let report = run_fanout(targets, self.config.fanout_workers, move |target| {
            let svc = Arc::clone(&svc);
            async move { svc.process_event(target).await }
        })
        .await;
        Ok(report)
    }

    /// One unit: fetch, normalize, cache, reconcile.
    ///
    /// The cache write and the relational transaction are independent
    /// resources: a cache failure is logged and does not roll back (or
    /// block) the reconciliation, and vice versa.
    async fn process_event(&self, target: FanoutTarget) -> Result<UnitOutcome> {
        let payload = self.feed.fetch_odds(target.sport_id, target.event_id).await?;

        let normalized = match normalize_event(&payload) {
            Ok(output) => {
                if output.skipped_records > 0 {
                    debug!(
                        event_id = target.event_id,
                        skipped = output.skipped_records,
                        "malformed records skipped during normalization"
                    );
                }
                Some(output.event)
            }
            Err(NormalizeError::NoData) => {
                debug!(event_id = target.event_id, "no odds data for event");
                None
            }
        };

        let mut cached = false;
        if let Some(event) = &normalized {
            let key = odds_key(target.sport_id, target.event_id);
            let value = serde_json::to_value(event)?;
            match self.cache.set(&key, &value, self.config.odds_cache_ttl_seconds).await {
                Ok(()) => cached = true,
                Err(e) => warn!(event_id = target.event_id, "cache write failed: {e}"),
            }
        }

        let mut store = PgTreeStore::begin(&self.db).await?;
        let summary = reconcile_event_markets(&mut store, target.event_id, &payload).await?;
        store.commit().await?;
        debug!(
            event_id = target.event_id,
            market_count = summary.market_count(),
            cached,
            "event reconciled"
        );

        Ok(if normalized.is_some() { UnitOutcome::Stored } else { UnitOutcome::NoData })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;

    fn targets(n: i64) -> Vec<FanoutTarget> {
        (1..=n).map(|i| FanoutTarget { sport_id: 4, event_id: i }).collect()
    }

    #[tokio::test]
    async fn fanout_collects_all_outcomes() {
        let report = run_fanout(targets(10), 3, |target| async move {
            match target.event_id % 3 {
                0 => Err(AppError::Feed("boom".to_string())),
                1 => Ok(UnitOutcome::Stored),
                _ => Ok(UnitOutcome::NoData),
            }
        })
        .await;

        assert_eq!(report.total, 10);
        assert_eq!(report.stored, 4); // 1,4,7,10
        assert_eq!(report.empty, 3); // 2,5,8
        assert_eq!(report.failed_count(), 3); // 3,6,9
    }

    #[tokio::test]
    async fn one_failure_never_cancels_siblings() {
        let report = run_fanout(targets(50), 8, |target| async move {
            if target.event_id == 25 {
                Err(AppError::Feed("isolated failure".to_string()))
            } else {
                Ok(UnitOutcome::Stored)
            }
        })
        .await;

        assert_eq!(report.stored, 49);
        assert_eq!(report.failed, vec![(25, "upstream feed error: isolated failure".to_string())]);
    }

    #[tokio::test]
    async fn empty_target_list_is_a_noop() {
        let report = run_fanout(Vec::new(), 4, |_| async { Ok(UnitOutcome::Stored) }).await;
        assert_eq!(report.total, 0);
        assert_eq!(report.stored, 0);
    }

    #[tokio::test]
    async fn more_targets_than_channel_capacity_all_complete() {
        let n = (JOB_CHANNEL_CAPACITY * 2 + 7) as i64;
        let report = run_fanout(targets(n), 2, |_| async { Ok(UnitOutcome::Stored) }).await;
        assert_eq!(report.stored as i64, n);
    }
}
