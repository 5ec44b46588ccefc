//! Error types for marketplace-sync
//!
//! This module defines the error taxonomy shared by the synchronization
//! engine. All error types use `thiserror` for ergonomic error handling.

use thiserror::Error;

/// Errors produced while talking to the marketplace API
///
/// Every variant maps onto one of the failure classes the retry logic
/// reasons about; see [`RetryableError`].
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SyncError {
    /// Network timeout
    #[error("Network timeout")]
    NetworkTimeout,

    /// Connection refused
    #[error("Connection refused")]
    ConnectionRefused,

    /// Generic transport error (connection reset, body closed mid-read, ...)
    #[error("Network error: {0}")]
    Network(String),

    /// Throttled by the marketplace, retry after the given number of seconds
    #[error("Rate limited, retry after {0} seconds")]
    RateLimited(u64),

    /// Server error
    #[error("Server error: HTTP {0}")]
    ServerError(u16),

    /// Request rejected by the marketplace (4xx other than auth and 429)
    #[error("Client error: HTTP {0}")]
    ClientError(u16),

    /// Credentials rejected
    #[error("Unauthorized: HTTP {0}")]
    Unauthorized(u16),

    /// Response body could not be parsed as JSON
    #[error("Malformed response body: HTTP {0}")]
    MalformedBody(u16),

    /// Body parsed but did not have the expected shape
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Gave up waiting for a local rate limit token
    #[error("Rate limit token not acquired: {0}")]
    RateLimitTimeout(String),
}

impl SyncError {
    /// HTTP status associated with this error, `0` for transport-level failures
    pub fn http_status(&self) -> u16 {
        match self {
            SyncError::RateLimited(_) => 429,
            SyncError::ServerError(code)
            | SyncError::ClientError(code)
            | SyncError::Unauthorized(code)
            | SyncError::MalformedBody(code) => *code,
            _ => 0,
        }
    }
}

/// Local rate limiter errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RateLimitError {
    /// No token could be granted before the deadline
    #[error("Timed out waiting for a '{0}' rate limit token")]
    TimedOut(String),

    /// The operation class has no configured budget
    #[error("Unknown operation class: {0}")]
    UnknownClass(String),
}

impl From<RateLimitError> for SyncError {
    fn from(err: RateLimitError) -> Self {
        SyncError::RateLimitTimeout(err.to_string())
    }
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DbError {
    /// SQLite error
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// The background connection thread is gone or failed
    #[error("Database connection error: {0}")]
    Connection(String),

    /// Record not found
    #[error("Record not found")]
    NotFound,

    /// Constraint violation
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    /// A create found the natural key already taken
    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    /// A stored JSON column could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<tokio_rusqlite::Error> for DbError {
    fn from(err: tokio_rusqlite::Error) -> Self {
        match err {
            tokio_rusqlite::Error::Rusqlite(e) => DbError::Sqlite(e),
            other => DbError::Connection(other.to_string()),
        }
    }
}

/// Sync state tracker errors
#[derive(Debug, Error)]
pub enum TrackerError {
    /// The run already reached a terminal state
    #[error("Sync run {0} is already finished")]
    AlreadyFinished(i64),

    /// The run id does not exist
    #[error("Sync run {0} not found")]
    UnknownRun(i64),

    /// A stuck-run timeout that cannot be applied
    #[error("Invalid stuck timeout: {0}")]
    InvalidTimeout(String),

    /// Database error
    #[error(transparent)]
    Database(#[from] DbError),
}

/// Application-level error type
///
/// Aggregates the domain-specific error types for the entry points.
#[derive(Debug, Error)]
pub enum AppError {
    /// Sync error
    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] DbError),

    /// Tracker error
    #[error("Tracker error: {0}")]
    Tracker(#[from] TrackerError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Trait for determining if an error is retryable
pub trait RetryableError {
    /// Returns true if the error is retryable
    fn is_retryable(&self) -> bool;

    /// HTTP status that triggered the error, if any
    fn status_code(&self) -> Option<u16> {
        None
    }

    /// Minimum delay requested by the remote side before the next attempt
    fn retry_after_secs(&self) -> Option<u64> {
        None
    }
}

impl RetryableError for SyncError {
    fn is_retryable(&self) -> bool {
        match self {
            // Retryable errors
            SyncError::NetworkTimeout => true,
            SyncError::ConnectionRefused => true,
            SyncError::Network(_) => true,
            SyncError::RateLimited(_) => true,
            SyncError::ServerError(_) => true,
            SyncError::MalformedBody(_) => true,
            SyncError::RateLimitTimeout(_) => true,

            // Non-retryable errors
            SyncError::ClientError(_) => false,
            SyncError::Unauthorized(_) => false,
            SyncError::InvalidData(_) => false,
        }
    }

    fn status_code(&self) -> Option<u16> {
        Some(self.http_status())
    }

    fn retry_after_secs(&self) -> Option<u64> {
        match self {
            SyncError::RateLimited(secs) => Some(*secs),
            _ => None,
        }
    }
}
