//! Paginated fetching with bounded retries
//!
//! A failed page is reported as a [`PageFailure`] value instead of aborting
//! the run, so the orchestrator can skip it and move on.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use super::client::{MarketplaceClient, Resource};
use super::retry::RetryManager;
use crate::error::SyncError;

/// One successfully fetched page
#[derive(Debug, Clone, PartialEq)]
pub struct PageResult {
    /// Page number, starting at 1
    pub page: u32,
    /// Total pages reported by the marketplace, if any
    pub total_pages: Option<u32>,
    pub items: Vec<Value>,
}

impl PageResult {
    /// Whether no page follows this one
    pub fn is_last(&self) -> bool {
        self.items.is_empty() || self.total_pages.is_some_and(|total| self.page >= total)
    }
}

/// A page given up on, after retries or immediately for unrecoverable errors
#[derive(Debug, Clone, PartialEq, Error)]
#[error("page {page} skipped after {attempts} attempt(s): {last_error}")]
pub struct PageFailure {
    pub page: u32,
    pub attempts: u32,
    pub last_error: SyncError,
}

/// Source of pages for the orchestrator
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PageSource: Send + Sync {
    /// Fetch one page, optionally limited to records changed since a time
    async fn fetch_page(
        &self,
        page: u32,
        since: Option<DateTime<Utc>>,
    ) -> Result<PageResult, PageFailure>;

    /// Page number of the last known page, from previous responses
    fn last_known_page(&self) -> Option<u32> {
        None
    }
}

/// Page fetcher for one marketplace resource
pub struct PaginatedFetcher {
    client: Arc<MarketplaceClient>,
    resource: Resource,
    retry: RetryManager,
    page_size: u32,
    total_pages: AtomicU32,
}

impl PaginatedFetcher {
    /// Create a fetcher for a resource of the client's account
    pub fn new(
        client: Arc<MarketplaceClient>,
        resource: Resource,
        retry: RetryManager,
        page_size: u32,
    ) -> Self {
        Self {
            client,
            resource,
            retry,
            page_size,
            total_pages: AtomicU32::new(0),
        }
    }

    async fn fetch_once(
        &self,
        page: u32,
        since: Option<DateTime<Utc>>,
    ) -> Result<PageResult, SyncError> {
        let mut params = vec![
            ("page", page.to_string()),
            ("pageSize", self.page_size.to_string()),
        ];
        if let Some(since) = since {
            params.push((
                "updatedSince",
                since.to_rfc3339_opts(SecondsFormat::Secs, true),
            ));
        }

        let body = self
            .client
            .fetch(self.resource, &params)
            .await
            .outcome()
            .into_result()?;

        parse_page(page, &body)
    }
}

#[async_trait]
impl PageSource for PaginatedFetcher {
    async fn fetch_page(
        &self,
        page: u32,
        since: Option<DateTime<Utc>>,
    ) -> Result<PageResult, PageFailure> {
        let attempts = AtomicU32::new(0);

        let result = self
            .retry
            .execute(|| {
                attempts.fetch_add(1, Ordering::Relaxed);
                self.fetch_once(page, since)
            })
            .await;

        let attempts = attempts.load(Ordering::Relaxed);
        match result {
            Ok(result) => {
                if let Some(total) = result.total_pages {
                    self.total_pages.store(total, Ordering::Relaxed);
                }
                debug!(
                    account = %self.client.account(),
                    path = self.resource.path(),
                    page = page,
                    items = result.items.len(),
                    attempts = attempts,
                    "Fetched page"
                );
                Ok(result)
            }
            Err(last_error) => {
                warn!(
                    account = %self.client.account(),
                    path = self.resource.path(),
                    page = page,
                    attempts = attempts,
                    max_retries = self.retry.config().max_retries,
                    status = last_error.http_status(),
                    error = %last_error,
                    "Giving up on page"
                );
                Err(PageFailure {
                    page,
                    attempts,
                    last_error,
                })
            }
        }
    }

    fn last_known_page(&self) -> Option<u32> {
        match self.total_pages.load(Ordering::Relaxed) {
            0 => None,
            total => Some(total),
        }
    }
}

/// Parse a `{results, currentPage, totalPages}` page body
fn parse_page(requested: u32, body: &Value) -> Result<PageResult, SyncError> {
    let items = body
        .get("results")
        .and_then(Value::as_array)
        .cloned()
        .ok_or_else(|| {
            SyncError::InvalidData(format!("page {} has no results array", requested))
        })?;

    let page = body
        .get("currentPage")
        .and_then(Value::as_u64)
        .map(|p| p as u32)
        .unwrap_or(requested);
    let total_pages = body
        .get("totalPages")
        .and_then(Value::as_u64)
        .map(|t| t as u32);

    Ok(PageResult {
        page,
        total_pages,
        items,
    })
}
