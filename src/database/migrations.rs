//! Database migrations for marketplace-sync
//!
//! This module contains SQL migrations for the SQLite database schema.

/// SQL statement to create the initial database schema
pub const CREATE_SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

-- Local catalog, one row per seller SKU
CREATE TABLE IF NOT EXISTS products (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    sku TEXT NOT NULL UNIQUE,
    name TEXT,
    description TEXT,
    barcode TEXT,
    cost_price REAL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- Account-scoped marketplace state of a product
CREATE TABLE IF NOT EXISTS product_listings (
    product_id INTEGER NOT NULL REFERENCES products(id) ON DELETE CASCADE,
    account TEXT NOT NULL,
    remote_id INTEGER,
    price REAL,
    stock TEXT NOT NULL DEFAULT '{}',
    validation_status TEXT,
    raw TEXT,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (product_id, account)
);

CREATE INDEX IF NOT EXISTS idx_listings_remote ON product_listings(account, remote_id);

-- Order postings per account
CREATE TABLE IF NOT EXISTS orders (
    account TEXT NOT NULL,
    posting_number TEXT NOT NULL,
    remote_id INTEGER,
    status TEXT NOT NULL,
    total REAL,
    raw TEXT,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (account, posting_number)
);

-- Audit trail of sync runs
CREATE TABLE IF NOT EXISTS sync_runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    account TEXT NOT NULL,
    sync_type TEXT NOT NULL,
    mode TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'running',
    started_at TEXT NOT NULL,
    completed_at TEXT,
    pages_processed INTEGER NOT NULL DEFAULT 0,
    records_processed INTEGER NOT NULL DEFAULT 0,
    records_created INTEGER NOT NULL DEFAULT 0,
    records_updated INTEGER NOT NULL DEFAULT 0,
    records_failed INTEGER NOT NULL DEFAULT 0,
    skipped_pages INTEGER NOT NULL DEFAULT 0,
    error_log TEXT NOT NULL DEFAULT '[]'
);

CREATE INDEX IF NOT EXISTS idx_sync_runs_status ON sync_runs(status, started_at);
CREATE INDEX IF NOT EXISTS idx_sync_runs_account ON sync_runs(account, sync_type, status);
"#;

/// Get the migration version
pub fn migration_version() -> i32 {
    1
}
