//! Database layer for marketplace-sync
//!
//! This module defines the database trait and SQLite implementation.

pub mod migrations;
pub mod sqlite;

pub use sqlite::SqliteDatabase;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::DbError;
use crate::models::{
    Account, LocalProduct, OrderRecord, ProductWrite, ProgressDelta, SyncRun, SyncRunStatus,
    SyncType,
};

/// Database trait for data persistence
///
/// Every write is committed on its own, so a failure in the middle of a page
/// loses at most the record being written.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Database: Send + Sync {
    // =========================================================================
    // Catalog operations
    // =========================================================================

    /// Look up a product and all of its account listings by SKU
    async fn find_by_sku(&self, sku: &str) -> Result<Option<LocalProduct>, DbError>;

    /// Create a new product by SKU, together with one account listing
    ///
    /// Fails with [`DbError::DuplicateKey`] when the SKU already exists, so a
    /// caller whose lookup went stale can resolve again.
    async fn create_by_sku(&self, write: &ProductWrite) -> Result<i64, DbError>;

    /// Create or update a product by SKU, together with one account listing
    ///
    /// Returns the product id and whether the product row was created. Two
    /// writers racing on a new SKU end up with one row.
    async fn upsert_by_sku(&self, write: &ProductWrite) -> Result<(i64, bool), DbError>;

    // =========================================================================
    // Order operations
    // =========================================================================

    /// Get an order posting of one account
    async fn find_order(
        &self,
        account: Account,
        posting_number: &str,
    ) -> Result<Option<OrderRecord>, DbError>;

    /// Create or replace an order posting, returns true if it was created
    async fn upsert_order(&self, order: &OrderRecord) -> Result<bool, DbError>;

    // =========================================================================
    // Sync run operations
    // =========================================================================

    /// Insert a sync run and return its id
    async fn insert_sync_run(&self, run: &SyncRun) -> Result<i64, DbError>;

    /// Get a sync run by id
    async fn get_sync_run(&self, id: i64) -> Result<Option<SyncRun>, DbError>;

    /// Add counters to a running sync run
    ///
    /// Returns false when the run does not exist or is no longer running.
    async fn add_sync_progress(&self, id: i64, delta: &ProgressDelta) -> Result<bool, DbError>;

    /// Append one entry to the error log of a running sync run
    async fn append_sync_error(&self, id: i64, entry: &str) -> Result<bool, DbError>;

    /// Move a running sync run to a terminal status
    ///
    /// Returns false when the run was not in `running` state.
    async fn finish_sync_run(
        &self,
        id: i64,
        status: SyncRunStatus,
        completed_at: DateTime<Utc>,
        error_entry: Option<String>,
    ) -> Result<bool, DbError>;

    /// Fail every running sync run started before the cutoff
    ///
    /// Returns the number of runs changed.
    async fn fail_stale_sync_runs(
        &self,
        started_before: DateTime<Utc>,
        error_entry: &str,
        completed_at: DateTime<Utc>,
    ) -> Result<u64, DbError>;

    /// Most recent completed run of an account and sync type
    async fn last_completed_sync_run(
        &self,
        account: Account,
        sync_type: SyncType,
    ) -> Result<Option<SyncRun>, DbError>;

    /// List sync runs, newest first
    async fn list_sync_runs(&self, limit: u32) -> Result<Vec<SyncRun>, DbError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AccountListing, ProductFields, SyncMode};

    // Test 1: MockDatabase can be created and used
    #[tokio::test]
    async fn test_mock_database_find_by_sku() {
        let mut mock = MockDatabase::new();

        mock.expect_find_by_sku()
            .withf(|sku| sku == "ABC-1")
            .returning(|sku| {
                Ok(Some(LocalProduct {
                    id: 7,
                    sku: sku.to_string(),
                    fields: ProductFields::default(),
                    listings: vec![AccountListing::empty(Account::Primary)],
                }))
            });

        let product = mock.find_by_sku("ABC-1").await.unwrap().unwrap();
        assert_eq!(product.id, 7);
        assert!(product.listing(Account::Primary).is_some());
    }

    // Test 2: MockDatabase reports an upsert as an update
    #[tokio::test]
    async fn test_mock_database_upsert() {
        let mut mock = MockDatabase::new();

        mock.expect_upsert_by_sku().returning(|_| Ok((3, false)));

        let write = ProductWrite {
            sku: "ABC-1".to_string(),
            fields: ProductFields::default(),
            listing: AccountListing::empty(Account::Fulfillment),
        };
        let (id, created) = mock.upsert_by_sku(&write).await.unwrap();
        assert_eq!(id, 3);
        assert!(!created);
    }

    // Test 3: MockDatabase can return errors
    #[tokio::test]
    async fn test_mock_database_error() {
        let mut mock = MockDatabase::new();

        mock.expect_insert_sync_run()
            .returning(|_| Err(DbError::Connection("database is gone".to_string())));

        let run = SyncRun::new(Account::Primary, SyncType::Catalog, SyncMode::Full);
        let result = mock.insert_sync_run(&run).await;
        assert!(matches!(result, Err(DbError::Connection(_))));
    }

    // Test 4: MockDatabase finish returns false for a finished run
    #[tokio::test]
    async fn test_mock_database_finish_already_finished() {
        let mut mock = MockDatabase::new();

        mock.expect_finish_sync_run()
            .withf(|id, status, _, _| *id == 1 && *status == SyncRunStatus::Completed)
            .returning(|_, _, _, _| Ok(false));

        let finished = mock
            .finish_sync_run(1, SyncRunStatus::Completed, Utc::now(), None)
            .await
            .unwrap();
        assert!(!finished);
    }
}
