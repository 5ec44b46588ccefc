//! Sync run models
//!
//! A [`SyncRun`] is one execution of "synchronize account X in mode Y". The
//! `sync_runs` table built from these rows is the audit trail of the engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Account;

/// Kind of data a run synchronizes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncType {
    /// Product identity and listing state
    Catalog,
    /// Prices and stock
    Offers,
    /// Order postings
    Orders,
}

impl SyncType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncType::Catalog => "catalog",
            SyncType::Offers => "offers",
            SyncType::Orders => "orders",
        }
    }
}

impl std::fmt::Display for SyncType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SyncType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "catalog" => Ok(SyncType::Catalog),
            "offers" => Ok(SyncType::Offers),
            "orders" => Ok(SyncType::Orders),
            _ => Err(format!("Invalid sync type: {}", s)),
        }
    }
}

/// Full or incremental synchronization
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    #[default]
    Full,
    /// Only records changed since the last completed run
    Incremental,
}

impl SyncMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncMode::Full => "full",
            SyncMode::Incremental => "incremental",
        }
    }
}

impl std::fmt::Display for SyncMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SyncMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "full" => Ok(SyncMode::Full),
            "incremental" => Ok(SyncMode::Incremental),
            _ => Err(format!("Invalid sync mode: {}", s)),
        }
    }
}

/// Status of a sync run
///
/// Only `Running -> {Completed, Failed, Timeout}` transitions exist.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncRunStatus {
    #[default]
    Running,
    Completed,
    Failed,
    Timeout,
}

impl SyncRunStatus {
    /// Whether this status is final
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SyncRunStatus::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SyncRunStatus::Running => "running",
            SyncRunStatus::Completed => "completed",
            SyncRunStatus::Failed => "failed",
            SyncRunStatus::Timeout => "timeout",
        }
    }
}

impl std::fmt::Display for SyncRunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SyncRunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(SyncRunStatus::Running),
            "completed" => Ok(SyncRunStatus::Completed),
            "failed" => Ok(SyncRunStatus::Failed),
            "timeout" => Ok(SyncRunStatus::Timeout),
            _ => Err(format!("Invalid sync run status: {}", s)),
        }
    }
}

/// How a run ended, as reported to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOutcome {
    Running,
    CompletedClean,
    /// Completed, but some pages were skipped or records failed
    CompletedWithSkips,
    Failed,
    TimedOut,
}

/// Counter increments reported by the orchestrator
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressDelta {
    pub pages_processed: u64,
    pub records_processed: u64,
    pub records_created: u64,
    pub records_updated: u64,
    pub records_failed: u64,
    pub skipped_pages: u64,
}

impl ProgressDelta {
    /// True when nothing would change
    pub fn is_empty(&self) -> bool {
        *self == ProgressDelta::default()
    }

    /// Add another delta into this one
    pub fn merge(&mut self, other: &ProgressDelta) {
        self.pages_processed += other.pages_processed;
        self.records_processed += other.records_processed;
        self.records_created += other.records_created;
        self.records_updated += other.records_updated;
        self.records_failed += other.records_failed;
        self.skipped_pages += other.skipped_pages;
    }
}

/// One execution of the sync loop for one account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRun {
    /// Row id, `None` until stored
    pub id: Option<i64>,
    pub account: Account,
    pub sync_type: SyncType,
    pub mode: SyncMode,
    pub status: SyncRunStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub pages_processed: u64,
    pub records_processed: u64,
    pub records_created: u64,
    pub records_updated: u64,
    pub records_failed: u64,
    pub skipped_pages: u64,
    /// Error entries in the order they happened
    pub error_log: Vec<String>,
}

impl SyncRun {
    /// Create a new running sync run starting now
    pub fn new(account: Account, sync_type: SyncType, mode: SyncMode) -> Self {
        Self {
            id: None,
            account,
            sync_type,
            mode,
            status: SyncRunStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            pages_processed: 0,
            records_processed: 0,
            records_created: 0,
            records_updated: 0,
            records_failed: 0,
            skipped_pages: 0,
            error_log: Vec::new(),
        }
    }

    /// Override the start time
    pub fn with_started_at(mut self, started_at: DateTime<Utc>) -> Self {
        self.started_at = started_at;
        self
    }

    /// Counters of this run as a delta from zero
    pub fn progress(&self) -> ProgressDelta {
        ProgressDelta {
            pages_processed: self.pages_processed,
            records_processed: self.records_processed,
            records_created: self.records_created,
            records_updated: self.records_updated,
            records_failed: self.records_failed,
            skipped_pages: self.skipped_pages,
        }
    }

    /// Classify the run for reporting
    pub fn outcome(&self) -> SyncOutcome {
        match self.status {
            SyncRunStatus::Running => SyncOutcome::Running,
            SyncRunStatus::Failed => SyncOutcome::Failed,
            SyncRunStatus::Timeout => SyncOutcome::TimedOut,
            SyncRunStatus::Completed => {
                if self.skipped_pages > 0 || self.records_failed > 0 || !self.error_log.is_empty()
                {
                    SyncOutcome::CompletedWithSkips
                } else {
                    SyncOutcome::CompletedClean
                }
            }
        }
    }
}
