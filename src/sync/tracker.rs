//! Sync run bookkeeping
//!
//! The tracker owns every write to the `sync_runs` table. Terminal writes are
//! conditional on the run still being `running`, so a run is finished exactly
//! once no matter who gets there first.

use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{info, warn};

use crate::database::Database;
use crate::error::TrackerError;
use crate::models::{Account, ProgressDelta, SyncMode, SyncRun, SyncRunStatus, SyncType};

/// Persists sync run state
#[derive(Clone)]
pub struct SyncStateTracker {
    db: Arc<dyn Database>,
}

impl SyncStateTracker {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self { db }
    }

    /// Record the start of a run, returns the run id
    pub async fn start(
        &self,
        account: Account,
        sync_type: SyncType,
        mode: SyncMode,
    ) -> Result<i64, TrackerError> {
        let run = SyncRun::new(account, sync_type, mode);
        let id = self.db.insert_sync_run(&run).await?;
        info!(
            run_id = id,
            account = %account,
            sync_type = %sync_type,
            mode = %mode,
            "Sync run started"
        );
        Ok(id)
    }

    /// Add counters to a running run
    pub async fn record_progress(
        &self,
        run_id: i64,
        delta: &ProgressDelta,
    ) -> Result<(), TrackerError> {
        if delta.is_empty() {
            return Ok(());
        }
        if self.db.add_sync_progress(run_id, delta).await? {
            Ok(())
        } else {
            Err(self.rejected(run_id).await)
        }
    }

    /// Append an entry to the error log of a running run
    pub async fn log_error(&self, run_id: i64, entry: &str) -> Result<(), TrackerError> {
        if self.db.append_sync_error(run_id, entry).await? {
            Ok(())
        } else {
            Err(self.rejected(run_id).await)
        }
    }

    /// Mark a run completed
    pub async fn complete(&self, run_id: i64) -> Result<(), TrackerError> {
        self.finish(run_id, SyncRunStatus::Completed, None).await
    }

    /// Mark a run failed with a summarizing reason
    pub async fn fail(&self, run_id: i64, reason: &str) -> Result<(), TrackerError> {
        self.finish(run_id, SyncRunStatus::Failed, Some(reason.to_string()))
            .await
    }

    /// Mark a run timed out
    pub async fn time_out(&self, run_id: i64, reason: &str) -> Result<(), TrackerError> {
        self.finish(run_id, SyncRunStatus::Timeout, Some(reason.to_string()))
            .await
    }

    /// Fail every run that has been running for longer than the timeout
    ///
    /// Safe to call at any time and from several places at once; each stale
    /// run is changed by exactly one caller. Returns the number changed.
    /// A zero timeout would fail runs that are still active and is rejected.
    pub async fn cleanup_stuck(&self, timeout_minutes: u32) -> Result<u64, TrackerError> {
        if timeout_minutes == 0 {
            return Err(TrackerError::InvalidTimeout(
                "timeout must be at least one minute".to_string(),
            ));
        }

        let now = Utc::now();
        let cutoff = Duration::try_minutes(i64::from(timeout_minutes))
            .and_then(|age| now.checked_sub_signed(age))
            .ok_or_else(|| {
                TrackerError::InvalidTimeout(format!("{} minutes is out of range", timeout_minutes))
            })?;
        let entry = format!(
            "stuck: run exceeded {} minutes in running state",
            timeout_minutes
        );

        let count = self.db.fail_stale_sync_runs(cutoff, &entry, now).await?;
        if count > 0 {
            warn!(
                count = count,
                timeout_minutes = timeout_minutes,
                "Failed stuck sync runs"
            );
        }
        Ok(count)
    }

    /// Get a run by id
    pub async fn get_run(&self, run_id: i64) -> Result<Option<SyncRun>, TrackerError> {
        Ok(self.db.get_sync_run(run_id).await?)
    }

    /// Latest runs, newest first
    pub async fn recent_runs(&self, limit: u32) -> Result<Vec<SyncRun>, TrackerError> {
        Ok(self.db.list_sync_runs(limit).await?)
    }

    /// Latest completed run of an account and sync type
    pub async fn last_completed(
        &self,
        account: Account,
        sync_type: SyncType,
    ) -> Result<Option<SyncRun>, TrackerError> {
        Ok(self.db.last_completed_sync_run(account, sync_type).await?)
    }

    async fn finish(
        &self,
        run_id: i64,
        status: SyncRunStatus,
        entry: Option<String>,
    ) -> Result<(), TrackerError> {
        if self
            .db
            .finish_sync_run(run_id, status, Utc::now(), entry)
            .await?
        {
            info!(run_id = run_id, status = %status, "Sync run finished");
            Ok(())
        } else {
            Err(self.rejected(run_id).await)
        }
    }

    /// Explain why a conditional write did not apply
    async fn rejected(&self, run_id: i64) -> TrackerError {
        match self.db.get_sync_run(run_id).await {
            Ok(Some(_)) => TrackerError::AlreadyFinished(run_id),
            Ok(None) => TrackerError::UnknownRun(run_id),
            Err(e) => e.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{MockDatabase, SqliteDatabase};
    use crate::error::DbError;

    async fn tracker() -> SyncStateTracker {
        SyncStateTracker::new(Arc::new(SqliteDatabase::in_memory().await.unwrap()))
    }

    // Test 1: Start, progress and complete
    #[tokio::test]
    async fn test_run_lifecycle() {
        let tracker = tracker().await;

        let id = tracker
            .start(Account::Primary, SyncType::Catalog, SyncMode::Full)
            .await
            .unwrap();
        tracker
            .record_progress(
                id,
                &ProgressDelta {
                    pages_processed: 1,
                    records_processed: 100,
                    records_created: 100,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        tracker.complete(id).await.unwrap();

        let run = tracker.get_run(id).await.unwrap().unwrap();
        assert_eq!(run.status, SyncRunStatus::Completed);
        assert_eq!(run.records_created, 100);
        assert!(run.completed_at.is_some());
    }

    // Test 2: Second terminal write is rejected
    #[tokio::test]
    async fn test_double_terminal_write_rejected() {
        let tracker = tracker().await;
        let id = tracker
            .start(Account::Primary, SyncType::Catalog, SyncMode::Full)
            .await
            .unwrap();

        tracker.time_out(id, "run timed out").await.unwrap();

        let result = tracker.complete(id).await;
        assert!(matches!(result, Err(TrackerError::AlreadyFinished(i)) if i == id));
        let result = tracker.fail(id, "late").await;
        assert!(matches!(result, Err(TrackerError::AlreadyFinished(_))));

        let run = tracker.get_run(id).await.unwrap().unwrap();
        assert_eq!(run.status, SyncRunStatus::Timeout);
        assert_eq!(run.error_log, vec!["run timed out"]);
    }

    // Test 3: Writes to a missing run report it as unknown
    #[tokio::test]
    async fn test_unknown_run() {
        let tracker = tracker().await;

        assert!(matches!(
            tracker.complete(42).await,
            Err(TrackerError::UnknownRun(42))
        ));
        assert!(matches!(
            tracker.log_error(42, "x").await,
            Err(TrackerError::UnknownRun(42))
        ));
    }

    // Test 4: Empty deltas do not touch the database
    #[tokio::test]
    async fn test_empty_progress_is_noop() {
        let mock = MockDatabase::new();
        let tracker = SyncStateTracker::new(Arc::new(mock));

        tracker
            .record_progress(1, &ProgressDelta::default())
            .await
            .unwrap();
    }

    // Test 5: Cleanup fails only stale runs and is idempotent
    #[tokio::test]
    async fn test_cleanup_stuck() {
        let db = Arc::new(SqliteDatabase::in_memory().await.unwrap());
        let tracker = SyncStateTracker::new(db.clone());

        let stale = SyncRun::new(Account::Primary, SyncType::Catalog, SyncMode::Full)
            .with_started_at(Utc::now() - Duration::minutes(20));
        let stale_id = db.insert_sync_run(&stale).await.unwrap();
        let fresh_id = tracker
            .start(Account::Fulfillment, SyncType::Catalog, SyncMode::Full)
            .await
            .unwrap();

        assert_eq!(tracker.cleanup_stuck(15).await.unwrap(), 1);
        assert_eq!(tracker.cleanup_stuck(15).await.unwrap(), 0);

        let run = tracker.get_run(stale_id).await.unwrap().unwrap();
        assert_eq!(run.status, SyncRunStatus::Failed);
        assert_eq!(run.error_log.len(), 1);
        assert!(run.error_log[0].contains("stuck"));

        let run = tracker.get_run(fresh_id).await.unwrap().unwrap();
        assert_eq!(run.status, SyncRunStatus::Running);
    }

    // Test 6: Database errors propagate
    #[tokio::test]
    async fn test_database_error_propagates() {
        let mut mock = MockDatabase::new();
        mock.expect_insert_sync_run()
            .returning(|_| Err(DbError::Connection("closed".to_string())));
        mock.expect_fail_stale_sync_runs()
            .returning(|_, _, _| Err(DbError::Connection("closed".to_string())));

        let tracker = SyncStateTracker::new(Arc::new(mock));

        let result = tracker
            .start(Account::Primary, SyncType::Orders, SyncMode::Full)
            .await;
        assert!(matches!(
            result,
            Err(TrackerError::Database(DbError::Connection(_)))
        ));
        assert!(tracker.cleanup_stuck(15).await.is_err());
    }

    // Test 7: Rejected write classification falls back to a lookup
    #[tokio::test]
    async fn test_rejected_write_uses_lookup() {
        let mut mock = MockDatabase::new();
        mock.expect_append_sync_error().returning(|_, _| Ok(false));
        mock.expect_get_sync_run().returning(|id| {
            let mut run = SyncRun::new(Account::Primary, SyncType::Catalog, SyncMode::Full);
            run.id = Some(id);
            run.status = SyncRunStatus::Failed;
            Ok(Some(run))
        });

        let tracker = SyncStateTracker::new(Arc::new(mock));
        assert!(matches!(
            tracker.log_error(5, "late entry").await,
            Err(TrackerError::AlreadyFinished(5))
        ));
    }

    // Test 8: A zero timeout is rejected and leaves active runs alone
    #[tokio::test]
    async fn test_cleanup_rejects_zero_timeout() {
        let tracker = tracker().await;
        let id = tracker
            .start(Account::Primary, SyncType::Catalog, SyncMode::Full)
            .await
            .unwrap();

        let result = tracker.cleanup_stuck(0).await;
        assert!(matches!(result, Err(TrackerError::InvalidTimeout(_))));

        let run = tracker.get_run(id).await.unwrap().unwrap();
        assert_eq!(run.status, SyncRunStatus::Running);
    }

    // Test 9: The largest timeout computes a cutoff without overflowing
    #[tokio::test]
    async fn test_cleanup_with_maximum_timeout() {
        let tracker = tracker().await;
        let id = tracker
            .start(Account::Fulfillment, SyncType::Orders, SyncMode::Full)
            .await
            .unwrap();

        assert_eq!(tracker.cleanup_stuck(u32::MAX).await.unwrap(), 0);

        let run = tracker.get_run(id).await.unwrap().unwrap();
        assert_eq!(run.status, SyncRunStatus::Running);
    }
}
