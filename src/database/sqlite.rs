//! SQLite implementation of the Database trait
//!
//! This module provides a SQLite-based implementation of the Database trait
//! using rusqlite and tokio-rusqlite for async operations.

use std::collections::BTreeMap;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{ErrorCode, OptionalExtension, Transaction};
use serde_json::Value;
use tokio_rusqlite::Connection;

use super::migrations::{migration_version, CREATE_SCHEMA};
use super::Database;
use crate::error::DbError;
use crate::models::{
    Account, AccountListing, LocalProduct, OrderRecord, ProductFields, ProductWrite,
    ProgressDelta, SyncRun, SyncRunStatus, SyncType,
};

const SYNC_RUN_COLUMNS: &str = "id, account, sync_type, mode, status, started_at, completed_at, \
     pages_processed, records_processed, records_created, records_updated, records_failed, \
     skipped_pages, error_log";

/// SQLite database implementation
pub struct SqliteDatabase {
    conn: Connection,
}

impl SqliteDatabase {
    /// Create a new SQLite database connection
    ///
    /// Use `:memory:` for in-memory database or a file path for persistent storage.
    pub async fn new(path: &str) -> Result<Self, DbError> {
        let conn = Connection::open(path).await?;

        // Run migrations
        conn.call(|conn| {
            conn.execute_batch(CREATE_SCHEMA)?;
            conn.pragma_update(None, "user_version", migration_version())?;
            Ok(())
        })
        .await?;

        Ok(Self { conn })
    }

    /// Create a new in-memory database (useful for testing)
    pub async fn in_memory() -> Result<Self, DbError> {
        Self::new(":memory:").await
    }
}

#[async_trait]
impl Database for SqliteDatabase {
    // =========================================================================
    // Catalog operations
    // =========================================================================

    async fn find_by_sku(&self, sku: &str) -> Result<Option<LocalProduct>, DbError> {
        let sku = sku.to_string();

        self.conn
            .call(move |conn| {
                let product = conn
                    .query_row(
                        r#"
                        SELECT id, sku, name, description, barcode, cost_price
                        FROM products
                        WHERE sku = ?1
                        "#,
                        [&sku],
                        |row| {
                            Ok(LocalProduct {
                                id: row.get(0)?,
                                sku: row.get(1)?,
                                fields: ProductFields {
                                    name: row.get(2)?,
                                    description: row.get(3)?,
                                    barcode: row.get(4)?,
                                    cost_price: row.get(5)?,
                                },
                                listings: Vec::new(),
                            })
                        },
                    )
                    .optional()?;

                let Some(mut product) = product else {
                    return Ok(None);
                };

                let mut stmt = conn.prepare(
                    r#"
                    SELECT account, remote_id, price, stock, validation_status, raw
                    FROM product_listings
                    WHERE product_id = ?1
                    ORDER BY account
                    "#,
                )?;

                product.listings = stmt
                    .query_map([product.id], listing_from_row)?
                    .collect::<Result<Vec<_>, _>>()?;

                Ok(Some(product))
            })
            .await
            .map_err(Into::into)
    }

    async fn create_by_sku(&self, write: &ProductWrite) -> Result<i64, DbError> {
        let sku = write.sku.clone();
        let fields = write.fields.clone();
        let listing = ListingParams::from_write(write)?;

        let created = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;

                let id = match insert_product(&tx, &sku, &fields, &listing.updated_at) {
                    Ok(id) => id,
                    Err(e) if is_constraint_violation(&e) => return Ok(None),
                    Err(e) => return Err(e.into()),
                };
                listing.upsert(&tx, id)?;

                tx.commit()?;
                Ok(Some(id))
            })
            .await?;

        created.ok_or_else(|| DbError::DuplicateKey(write.sku.clone()))
    }

    async fn upsert_by_sku(&self, write: &ProductWrite) -> Result<(i64, bool), DbError> {
        let sku = write.sku.clone();
        let fields = write.fields.clone();
        let listing = ListingParams::from_write(write)?;

        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let now = listing.updated_at.clone();

                // The unique index on sku turns an existing product into an update
                let (id, created) = match insert_product(&tx, &sku, &fields, &now) {
                    Ok(id) => (id, true),
                    Err(e) if is_constraint_violation(&e) => {
                        let id = tx.query_row(
                            r#"
                            UPDATE products SET
                                name = COALESCE(?2, name),
                                description = COALESCE(?3, description),
                                barcode = COALESCE(?4, barcode),
                                cost_price = COALESCE(?5, cost_price),
                                updated_at = ?6
                            WHERE sku = ?1
                            RETURNING id
                            "#,
                            rusqlite::params![
                                sku,
                                fields.name,
                                fields.description,
                                fields.barcode,
                                fields.cost_price,
                                now
                            ],
                            |row| row.get::<_, i64>(0),
                        )?;
                        (id, false)
                    }
                    Err(e) => return Err(e.into()),
                };
                listing.upsert(&tx, id)?;

                tx.commit()?;
                Ok((id, created))
            })
            .await
            .map_err(Into::into)
    }

    // =========================================================================
    // Order operations
    // =========================================================================

    async fn find_order(
        &self,
        account: Account,
        posting_number: &str,
    ) -> Result<Option<OrderRecord>, DbError> {
        let posting_number = posting_number.to_string();

        self.conn
            .call(move |conn| {
                let order = conn
                    .query_row(
                        r#"
                        SELECT account, posting_number, remote_id, status, total, raw
                        FROM orders
                        WHERE account = ?1 AND posting_number = ?2
                        "#,
                        rusqlite::params![account.as_str(), posting_number],
                        |row| {
                            Ok(OrderRecord {
                                account: parse_column(row, 0)?,
                                posting_number: row.get(1)?,
                                remote_id: row.get(2)?,
                                status: row.get(3)?,
                                total: row.get(4)?,
                                raw: parse_json_column::<Value>(row, 5)?.unwrap_or(Value::Null),
                            })
                        },
                    )
                    .optional()?;

                Ok(order)
            })
            .await
            .map_err(Into::into)
    }

    async fn upsert_order(&self, order: &OrderRecord) -> Result<bool, DbError> {
        let account = order.account.as_str();
        let posting_number = order.posting_number.clone();
        let remote_id = order.remote_id;
        let status = order.status.clone();
        let total = order.total;
        let raw = to_json(&order.raw)?;
        let now = format_datetime(Utc::now());

        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;

                let exists: bool = tx.query_row(
                    "SELECT EXISTS(SELECT 1 FROM orders WHERE account = ?1 AND posting_number = ?2)",
                    rusqlite::params![account, posting_number],
                    |row| row.get(0),
                )?;

                tx.execute(
                    r#"
                    INSERT INTO orders
                    (account, posting_number, remote_id, status, total, raw, updated_at)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                    ON CONFLICT(account, posting_number) DO UPDATE SET
                        remote_id = excluded.remote_id,
                        status = excluded.status,
                        total = excluded.total,
                        raw = excluded.raw,
                        updated_at = excluded.updated_at
                    "#,
                    rusqlite::params![account, posting_number, remote_id, status, total, raw, now],
                )?;

                tx.commit()?;
                Ok(!exists)
            })
            .await
            .map_err(Into::into)
    }

    // =========================================================================
    // Sync run operations
    // =========================================================================

    async fn insert_sync_run(&self, run: &SyncRun) -> Result<i64, DbError> {
        let account = run.account.as_str();
        let sync_type = run.sync_type.as_str();
        let mode = run.mode.as_str();
        let status = run.status.as_str();
        let started_at = format_datetime(run.started_at);
        let completed_at = run.completed_at.map(format_datetime);
        let counters = run.progress();
        let error_log = to_json(&run.error_log)?;

        self.conn
            .call(move |conn| {
                conn.execute(
                    r#"
                    INSERT INTO sync_runs
                    (account, sync_type, mode, status, started_at, completed_at,
                     pages_processed, records_processed, records_created, records_updated,
                     records_failed, skipped_pages, error_log)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
                    "#,
                    rusqlite::params![
                        account,
                        sync_type,
                        mode,
                        status,
                        started_at,
                        completed_at,
                        counters.pages_processed as i64,
                        counters.records_processed as i64,
                        counters.records_created as i64,
                        counters.records_updated as i64,
                        counters.records_failed as i64,
                        counters.skipped_pages as i64,
                        error_log
                    ],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await
            .map_err(Into::into)
    }

    async fn get_sync_run(&self, id: i64) -> Result<Option<SyncRun>, DbError> {
        self.conn
            .call(move |conn| {
                let sql = format!("SELECT {} FROM sync_runs WHERE id = ?1", SYNC_RUN_COLUMNS);
                let run = conn.query_row(&sql, [id], sync_run_from_row).optional()?;
                Ok(run)
            })
            .await
            .map_err(Into::into)
    }

    async fn add_sync_progress(&self, id: i64, delta: &ProgressDelta) -> Result<bool, DbError> {
        let delta = *delta;

        self.conn
            .call(move |conn| {
                let changed = conn.execute(
                    r#"
                    UPDATE sync_runs SET
                        pages_processed = pages_processed + ?2,
                        records_processed = records_processed + ?3,
                        records_created = records_created + ?4,
                        records_updated = records_updated + ?5,
                        records_failed = records_failed + ?6,
                        skipped_pages = skipped_pages + ?7
                    WHERE id = ?1 AND status = 'running'
                    "#,
                    rusqlite::params![
                        id,
                        delta.pages_processed as i64,
                        delta.records_processed as i64,
                        delta.records_created as i64,
                        delta.records_updated as i64,
                        delta.records_failed as i64,
                        delta.skipped_pages as i64
                    ],
                )?;
                Ok(changed == 1)
            })
            .await
            .map_err(Into::into)
    }

    async fn append_sync_error(&self, id: i64, entry: &str) -> Result<bool, DbError> {
        let entry = entry.to_string();

        self.conn
            .call(move |conn| {
                let changed = conn.execute(
                    r#"
                    UPDATE sync_runs SET error_log = json_insert(error_log, '$[#]', ?2)
                    WHERE id = ?1 AND status = 'running'
                    "#,
                    rusqlite::params![id, entry],
                )?;
                Ok(changed == 1)
            })
            .await
            .map_err(Into::into)
    }

    async fn finish_sync_run(
        &self,
        id: i64,
        status: SyncRunStatus,
        completed_at: DateTime<Utc>,
        error_entry: Option<String>,
    ) -> Result<bool, DbError> {
        let status = status.as_str();
        let completed_at = format_datetime(completed_at);

        self.conn
            .call(move |conn| {
                // Conditional on 'running' so only the first terminal write lands
                let changed = conn.execute(
                    r#"
                    UPDATE sync_runs SET
                        status = ?2,
                        completed_at = ?3,
                        error_log = CASE
                            WHEN ?4 IS NULL THEN error_log
                            ELSE json_insert(error_log, '$[#]', ?4)
                        END
                    WHERE id = ?1 AND status = 'running'
                    "#,
                    rusqlite::params![id, status, completed_at, error_entry],
                )?;
                Ok(changed == 1)
            })
            .await
            .map_err(Into::into)
    }

    async fn fail_stale_sync_runs(
        &self,
        started_before: DateTime<Utc>,
        error_entry: &str,
        completed_at: DateTime<Utc>,
    ) -> Result<u64, DbError> {
        let started_before = format_datetime(started_before);
        let error_entry = error_entry.to_string();
        let completed_at = format_datetime(completed_at);

        self.conn
            .call(move |conn| {
                let changed = conn.execute(
                    r#"
                    UPDATE sync_runs SET
                        status = 'failed',
                        completed_at = ?3,
                        error_log = json_insert(error_log, '$[#]', ?2)
                    WHERE status = 'running' AND started_at < ?1
                    "#,
                    rusqlite::params![started_before, error_entry, completed_at],
                )?;
                Ok(changed as u64)
            })
            .await
            .map_err(Into::into)
    }

    async fn last_completed_sync_run(
        &self,
        account: Account,
        sync_type: SyncType,
    ) -> Result<Option<SyncRun>, DbError> {
        self.conn
            .call(move |conn| {
                let sql = format!(
                    r#"
                    SELECT {}
                    FROM sync_runs
                    WHERE account = ?1 AND sync_type = ?2 AND status = 'completed'
                    ORDER BY started_at DESC, id DESC
                    LIMIT 1
                    "#,
                    SYNC_RUN_COLUMNS
                );
                let run = conn
                    .query_row(
                        &sql,
                        rusqlite::params![account.as_str(), sync_type.as_str()],
                        sync_run_from_row,
                    )
                    .optional()?;
                Ok(run)
            })
            .await
            .map_err(Into::into)
    }

    async fn list_sync_runs(&self, limit: u32) -> Result<Vec<SyncRun>, DbError> {
        self.conn
            .call(move |conn| {
                let sql = format!(
                    "SELECT {} FROM sync_runs ORDER BY started_at DESC, id DESC LIMIT ?1",
                    SYNC_RUN_COLUMNS
                );
                let mut stmt = conn.prepare(&sql)?;
                let runs = stmt
                    .query_map([limit], sync_run_from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(runs)
            })
            .await
            .map_err(Into::into)
    }
}

// =========================================================================
// Helper functions
// =========================================================================

/// Format a timestamp so that stored values sort chronologically as text
/// Owned listing columns of a product write
struct ListingParams {
    account: &'static str,
    remote_id: Option<i64>,
    price: Option<f64>,
    stock: String,
    validation_status: Option<String>,
    raw: Option<String>,
    updated_at: String,
}

impl ListingParams {
    fn from_write(write: &ProductWrite) -> Result<Self, DbError> {
        Ok(Self {
            account: write.listing.account.as_str(),
            remote_id: write.listing.remote_id,
            price: write.listing.price,
            stock: to_json(&write.listing.stock)?,
            validation_status: write.listing.validation_status.clone(),
            raw: write.listing.raw.as_ref().map(to_json).transpose()?,
            updated_at: format_datetime(Utc::now()),
        })
    }

    fn upsert(&self, tx: &Transaction<'_>, product_id: i64) -> rusqlite::Result<()> {
        tx.execute(
            r#"
            INSERT INTO product_listings
            (product_id, account, remote_id, price, stock, validation_status, raw, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(product_id, account) DO UPDATE SET
                remote_id = COALESCE(excluded.remote_id, remote_id),
                price = COALESCE(excluded.price, price),
                stock = excluded.stock,
                validation_status = COALESCE(excluded.validation_status, validation_status),
                raw = COALESCE(excluded.raw, raw),
                updated_at = excluded.updated_at
            "#,
            rusqlite::params![
                product_id,
                self.account,
                self.remote_id,
                self.price,
                self.stock,
                self.validation_status,
                self.raw,
                self.updated_at
            ],
        )?;
        Ok(())
    }
}

fn insert_product(
    tx: &Transaction<'_>,
    sku: &str,
    fields: &ProductFields,
    now: &str,
) -> rusqlite::Result<i64> {
    tx.query_row(
        r#"
        INSERT INTO products
        (sku, name, description, barcode, cost_price, created_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
        RETURNING id
        "#,
        rusqlite::params![
            sku,
            fields.name,
            fields.description,
            fields.barcode,
            fields.cost_price,
            now
        ],
        |row| row.get(0),
    )
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation
    )
}

fn format_datetime(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse datetime string from SQLite
fn parse_datetime(s: Option<String>) -> Option<DateTime<Utc>> {
    s.and_then(|s| {
        DateTime::parse_from_rfc3339(&s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
            .or_else(|| {
                // Try parsing SQLite's datetime format
                chrono::NaiveDateTime::parse_from_str(&s, "%Y-%m-%d %H:%M:%S")
                    .ok()
                    .map(|dt| dt.and_utc())
            })
    })
}

fn to_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<String, DbError> {
    serde_json::to_string(value).map_err(|e| DbError::Serialization(e.to_string()))
}

fn conversion_error(idx: usize, message: impl Into<String>) -> rusqlite::Error {
    let message: String = message.into();
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, message.into())
}

/// Parse a text column through `FromStr`
fn parse_column<T>(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr<Err = String>,
{
    let value: String = row.get(idx)?;
    value.parse().map_err(|e: String| conversion_error(idx, e))
}

/// Decode a nullable JSON text column
fn parse_json_column<T>(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Option<T>>
where
    T: serde::de::DeserializeOwned,
{
    match row.get::<_, Option<String>>(idx)? {
        Some(text) => serde_json::from_str(&text)
            .map(Some)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))),
        None => Ok(None),
    }
}

fn listing_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<AccountListing> {
    Ok(AccountListing {
        account: parse_column(row, 0)?,
        remote_id: row.get(1)?,
        price: row.get(2)?,
        stock: parse_json_column::<BTreeMap<String, i64>>(row, 3)?.unwrap_or_default(),
        validation_status: row.get(4)?,
        raw: parse_json_column(row, 5)?,
    })
}

fn sync_run_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SyncRun> {
    let started_at = parse_datetime(Some(row.get(5)?))
        .ok_or_else(|| conversion_error(5, "invalid started_at"))?;

    Ok(SyncRun {
        id: Some(row.get(0)?),
        account: parse_column(row, 1)?,
        sync_type: parse_column(row, 2)?,
        mode: parse_column(row, 3)?,
        status: parse_column(row, 4)?,
        started_at,
        completed_at: parse_datetime(row.get(6)?),
        pages_processed: row.get::<_, i64>(7)? as u64,
        records_processed: row.get::<_, i64>(8)? as u64,
        records_created: row.get::<_, i64>(9)? as u64,
        records_updated: row.get::<_, i64>(10)? as u64,
        records_failed: row.get::<_, i64>(11)? as u64,
        skipped_pages: row.get::<_, i64>(12)? as u64,
        error_log: parse_json_column(row, 13)?.unwrap_or_default(),
    })
}
