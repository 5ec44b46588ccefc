//! Marketplace synchronization
//!
//! This module pulls catalog, offer and order data from the marketplace for
//! each seller account and merges it into the local store.
//!
//! # Components
//!
//! - [`rate_limiter`]: Per-account request budgets (token bucket plus sixty second window)
//! - [`client`]: Authenticated, rate-limited requests with classified failures
//! - [`retry`]: Retry manager with exponential backoff for handling transient failures
//! - [`fetcher`]: Page fetching that reports a failed page instead of aborting
//! - [`resolver`]: Field-level conflict resolution between remote and local records
//! - [`tracker`]: Persistent sync run bookkeeping
//! - [`orchestrator`]: Per-account page loop with skip streak and watchdog
//! - [`service`]: Entry points for a scheduling collaborator
//!
//! # Example
//!
//! ```ignore
//! use marketplace_sync::sync::SyncService;
//! use marketplace_sync::models::{AccountSelector, SyncMode, SyncType};
//!
//! let service = SyncService::new(&config, database)?;
//! let runs = service
//!     .trigger_sync(AccountSelector::Both, SyncType::Catalog, SyncMode::Incremental)
//!     .await?;
//! ```

pub mod client;
pub mod fetcher;
pub mod orchestrator;
pub mod rate_limiter;
pub mod resolver;
pub mod retry;
pub mod service;
pub mod tracker;

// Re-export main types for convenience
pub use client::{ApiResponse, FetchOutcome, MarketplaceClient, Resource};
pub use fetcher::{PageFailure, PageResult, PageSource, PaginatedFetcher};
pub use orchestrator::{OrchestratorConfig, SyncOrchestrator};
pub use rate_limiter::{OperationClass, RateLimiter};
pub use resolver::{ConflictResolver, ConflictStrategy, OrderResolution, Resolution};
pub use retry::RetryManager;
pub use service::SyncService;
pub use tracker::SyncStateTracker;
