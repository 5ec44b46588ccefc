//! Per-account sync loop
//!
//! Pages are fetched strictly in order. A fetched page is merged record by
//! record through the [`ConflictResolver`], each record committed on its own.
//! A failed page is skipped and logged; a streak of skipped pages fails the
//! run. The whole loop runs under a wall-clock watchdog.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::fetcher::{PageResult, PageSource};
use super::resolver::{ConflictResolver, ConflictStrategy, OrderResolution, Resolution};
use super::tracker::SyncStateTracker;
use crate::config::Config;
use crate::database::Database;
use crate::error::{AppError, DbError, TrackerError};
use crate::models::{
    Account, CatalogRecord, OrderRecord, ProductField, ProductWrite, ProgressDelta, SyncMode,
    SyncRun, SyncType,
};

/// Orchestrator policy
#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorConfig {
    /// Consecutive skipped pages that fail the run
    pub max_consecutive_skips: u32,
    /// Wall-clock budget of one run
    pub run_timeout: Duration,
    pub strategy: ConflictStrategy,
    pub local_only: Vec<ProductField>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_consecutive_skips: 3,
            run_timeout: Duration::from_secs(600),
            strategy: ConflictStrategy::RemotePriority,
            local_only: vec![ProductField::CostPrice],
        }
    }
}

impl From<&Config> for OrchestratorConfig {
    fn from(config: &Config) -> Self {
        Self {
            max_consecutive_skips: config.sync.max_consecutive_skips,
            run_timeout: Duration::from_secs(config.sync.run_timeout_secs),
            strategy: config.sync.strategy,
            local_only: config.sync.local_only_fields.clone(),
        }
    }
}

/// How the page loop ended
#[derive(Debug, Clone, PartialEq)]
enum RunEnding {
    Completed,
    Failed(String),
    TimedOut,
}

/// Effect of merging one record
#[derive(Debug, Clone, Copy, PartialEq)]
enum MergeOutcome {
    Created,
    Updated,
    Unchanged,
}

/// Mutable state of one run, owned by the loop
#[derive(Debug)]
struct RunState {
    run_id: i64,
    /// Counters not yet written to the tracker
    pending: ProgressDelta,
    skip_streak: u32,
    /// Watchdog deadline, `None` when the timeout is out of range
    deadline: Option<Instant>,
}

impl RunState {
    fn expired(&self) -> bool {
        self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
    }
}

/// Sync loop of one account
pub struct SyncOrchestrator {
    account: Account,
    db: Arc<dyn Database>,
    tracker: SyncStateTracker,
    resolver: ConflictResolver,
    config: OrchestratorConfig,
}

impl SyncOrchestrator {
    pub fn new(account: Account, db: Arc<dyn Database>, config: OrchestratorConfig) -> Self {
        Self {
            account,
            tracker: SyncStateTracker::new(db.clone()),
            resolver: ConflictResolver::new(config.strategy, config.local_only.iter().copied()),
            db,
            config,
        }
    }

    pub fn account(&self) -> Account {
        self.account
    }

    /// Run one sync of `sync_type` over pages from `source`
    ///
    /// Returns the finished run as stored. Page and record failures end up in
    /// the run's error log; only bookkeeping failures are returned as errors.
    ///
    /// The watchdog deadline is checked before every page and record, and it
    /// cancels a page fetch in flight. Store writes are never cancelled, so
    /// every committed record is counted exactly once.
    pub async fn run(
        &self,
        sync_type: SyncType,
        mode: SyncMode,
        source: &dyn PageSource,
    ) -> Result<SyncRun, TrackerError> {
        let since = self.updated_since(sync_type, mode).await?;
        let run_id = self.tracker.start(self.account, sync_type, mode).await?;
        let mut state = RunState {
            run_id,
            pending: ProgressDelta::default(),
            skip_streak: 0,
            deadline: Instant::now().checked_add(self.config.run_timeout),
        };

        let ending = match self.page_loop(sync_type, source, since, &mut state).await {
            Ok(ending) => ending,
            Err(e) => {
                warn!(run_id = run_id, account = %self.account, error = %e, "Sync run aborted");
                if let Err(fail_err) = self.tracker.fail(run_id, &format!("run aborted: {}", e)).await
                {
                    warn!(run_id = run_id, error = %fail_err, "Could not mark run failed");
                }
                return Err(e);
            }
        };

        // Records merged before the deadline stay committed; count them
        self.flush(&mut state).await?;

        match &ending {
            RunEnding::Completed => self.tracker.complete(run_id).await?,
            RunEnding::Failed(reason) => self.tracker.fail(run_id, reason).await?,
            RunEnding::TimedOut => {
                let reason = format!(
                    "run timed out after {} seconds",
                    self.config.run_timeout.as_secs_f64()
                );
                self.tracker.time_out(run_id, &reason).await?
            }
        }

        let run = self
            .tracker
            .get_run(run_id)
            .await?
            .ok_or(TrackerError::UnknownRun(run_id))?;

        info!(
            run_id = run_id,
            account = %self.account,
            sync_type = %sync_type,
            status = %run.status,
            pages = run.pages_processed,
            records = run.records_processed,
            created = run.records_created,
            updated = run.records_updated,
            failed = run.records_failed,
            skipped_pages = run.skipped_pages,
            "Sync run finished"
        );

        Ok(run)
    }

    async fn updated_since(
        &self,
        sync_type: SyncType,
        mode: SyncMode,
    ) -> Result<Option<DateTime<Utc>>, TrackerError> {
        match mode {
            SyncMode::Full => Ok(None),
            SyncMode::Incremental => Ok(self
                .tracker
                .last_completed(self.account, sync_type)
                .await?
                .map(|run| run.started_at)),
        }
    }

    async fn page_loop(
        &self,
        sync_type: SyncType,
        source: &dyn PageSource,
        since: Option<DateTime<Utc>>,
        state: &mut RunState,
    ) -> Result<RunEnding, TrackerError> {
        let mut page = 1u32;

        loop {
            if state.expired() {
                return Ok(RunEnding::TimedOut);
            }

            let fetched = match state.deadline {
                Some(deadline) => {
                    match tokio::time::timeout_at(deadline, source.fetch_page(page, since)).await {
                        Ok(fetched) => fetched,
                        Err(_) => return Ok(RunEnding::TimedOut),
                    }
                }
                None => source.fetch_page(page, since).await,
            };

            match fetched {
                Ok(result) => {
                    state.skip_streak = 0;
                    if !self.merge_page(sync_type, &result, state).await? {
                        return Ok(RunEnding::TimedOut);
                    }
                    state.pending.pages_processed += 1;
                    self.flush(state).await?;

                    if result.is_last() {
                        return Ok(RunEnding::Completed);
                    }
                }
                Err(failure) => {
                    state.skip_streak += 1;
                    state.pending.skipped_pages += 1;
                    self.tracker
                        .log_error(state.run_id, &failure.to_string())
                        .await?;
                    self.flush(state).await?;

                    warn!(
                        run_id = state.run_id,
                        account = %self.account,
                        page = page,
                        skip_streak = state.skip_streak,
                        "Skipped page"
                    );

                    if state.skip_streak >= self.config.max_consecutive_skips {
                        return Ok(RunEnding::Failed(format!(
                            "aborted after {} consecutive skipped pages (last page {})",
                            state.skip_streak, page
                        )));
                    }
                    if source.last_known_page().is_some_and(|last| page >= last) {
                        return Ok(RunEnding::Completed);
                    }
                }
            }
            page += 1;
        }
    }

    /// Merge every record of a page, returns false if the deadline cut it short
    async fn merge_page(
        &self,
        sync_type: SyncType,
        page: &PageResult,
        state: &mut RunState,
    ) -> Result<bool, TrackerError> {
        for item in &page.items {
            if state.expired() {
                return Ok(false);
            }

            let merged = match sync_type {
                SyncType::Catalog | SyncType::Offers => self.merge_catalog_item(item).await,
                SyncType::Orders => self.merge_order_item(item).await,
            };

            state.pending.records_processed += 1;
            match merged {
                Ok(MergeOutcome::Created) => state.pending.records_created += 1,
                Ok(MergeOutcome::Updated) => state.pending.records_updated += 1,
                Ok(MergeOutcome::Unchanged) => {}
                Err(e) => {
                    state.pending.records_failed += 1;
                    warn!(
                        run_id = state.run_id,
                        account = %self.account,
                        page = page.page,
                        error = %e,
                        "Record not merged"
                    );
                    self.tracker
                        .log_error(state.run_id, &format!("page {}: {}", page.page, e))
                        .await?;
                }
            }
        }
        Ok(true)
    }

    async fn merge_catalog_item(&self, item: &Value) -> Result<MergeOutcome, AppError> {
        let record = CatalogRecord::from_remote(self.account, item)?;
        let local = self.db.find_by_sku(&record.sku).await?;

        let write = match self.resolver.resolve(&record, local.as_ref()) {
            Resolution::NoOp => return Ok(MergeOutcome::Unchanged),
            Resolution::Update { write, .. } => return self.apply_update(&write).await,
            Resolution::Create(write) => write,
        };

        match self.db.create_by_sku(&write).await {
            Ok(_) => Ok(MergeOutcome::Created),
            // Another writer created the SKU after our lookup; resolve against it once
            Err(DbError::DuplicateKey(sku)) => {
                debug!(account = %self.account, sku = %sku, "SKU created concurrently, resolving again");
                let local = self.db.find_by_sku(&record.sku).await?;
                match self.resolver.resolve(&record, local.as_ref()) {
                    Resolution::NoOp => Ok(MergeOutcome::Unchanged),
                    Resolution::Update { write, .. } => self.apply_update(&write).await,
                    Resolution::Create(_) => Err(DbError::ConstraintViolation(format!(
                        "sku {} is taken but not readable",
                        sku
                    ))
                    .into()),
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn apply_update(&self, write: &ProductWrite) -> Result<MergeOutcome, AppError> {
        let (_, created) = self.db.upsert_by_sku(write).await?;
        Ok(if created {
            MergeOutcome::Created
        } else {
            MergeOutcome::Updated
        })
    }

    async fn merge_order_item(&self, item: &Value) -> Result<MergeOutcome, AppError> {
        let order = OrderRecord::from_remote(self.account, item)?;
        let local = self
            .db
            .find_order(self.account, &order.posting_number)
            .await?;

        match self.resolver.resolve_order(&order, local.as_ref()) {
            OrderResolution::NoOp => Ok(MergeOutcome::Unchanged),
            OrderResolution::Create(order) | OrderResolution::Update(order) => {
                let created = self.db.upsert_order(&order).await?;
                Ok(if created {
                    MergeOutcome::Created
                } else {
                    MergeOutcome::Updated
                })
            }
        }
    }

    /// Write pending counters; they leave the state before the write starts
    async fn flush(&self, state: &mut RunState) -> Result<(), TrackerError> {
        let delta = std::mem::take(&mut state.pending);
        self.tracker.record_progress(state.run_id, &delta).await
    }
}
