//! Domain models for marketplace-sync
//!
//! This module contains the core domain models used throughout the engine.

pub mod account;
pub mod catalog;
pub mod sync_run;

// Re-export commonly used types
pub use account::{Account, AccountSelector};
pub use catalog::{
    AccountListing, CatalogRecord, LocalProduct, OrderRecord, ProductField, ProductFields,
    ProductWrite,
};
pub use sync_run::{ProgressDelta, SyncMode, SyncOutcome, SyncRun, SyncRunStatus, SyncType};
