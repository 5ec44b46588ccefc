//! Marketplace API client for one seller account
//!
//! Every request first takes a token from the account's [`RateLimiter`],
//! carries the account credentials and comes back as an [`ApiResponse`].
//! Transport failures never escape as errors: they degrade to a response
//! with status `0` and no body, so callers handle a single failure shape.

use std::time::Duration;

use reqwest::header::RETRY_AFTER;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde_json::Value;
use tracing::{debug, warn};

use super::rate_limiter::{OperationClass, RateLimiter};
use crate::config::{AccountConfig, MarketplaceConfig};
use crate::error::{RetryableError, SyncError};
use crate::models::{Account, SyncType};

/// Wait used for a 429 that carries no usable `Retry-After`
const DEFAULT_RETRY_AFTER_SECS: u64 = 1;

/// Marketplace resource endpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resource {
    Catalog,
    Offers,
    Orders,
}

impl Resource {
    /// Path relative to the API base URL
    pub fn path(&self) -> &'static str {
        match self {
            Resource::Catalog => "/v1/catalog",
            Resource::Offers => "/v1/offers",
            Resource::Orders => "/v1/orders",
        }
    }

    /// Rate budget the resource draws from
    pub fn class(&self) -> OperationClass {
        match self {
            Resource::Catalog | Resource::Offers => OperationClass::Catalog,
            Resource::Orders => OperationClass::Orders,
        }
    }
}

impl From<SyncType> for Resource {
    fn from(sync_type: SyncType) -> Self {
        match sync_type {
            SyncType::Catalog => Resource::Catalog,
            SyncType::Offers => Resource::Offers,
            SyncType::Orders => Resource::Orders,
        }
    }
}

/// Raw result of one request
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    /// HTTP status, `0` when no complete response was received
    pub status: u16,
    /// Parsed JSON body, `None` when missing or unparseable
    pub body: Option<Value>,
    /// Seconds from a `Retry-After` header
    pub retry_after_secs: Option<u64>,
    transport_error: Option<SyncError>,
}

impl ApiResponse {
    /// Response that never made it back from the wire
    fn degraded(error: SyncError) -> Self {
        Self {
            status: 0,
            body: None,
            retry_after_secs: None,
            transport_error: Some(error),
        }
    }

    /// Classify the response
    pub fn outcome(self) -> FetchOutcome {
        if self.status == 0 {
            let error = self
                .transport_error
                .unwrap_or_else(|| SyncError::Network("no response".to_string()));
            return FetchOutcome::from_error(error);
        }

        let status = self.status;
        let error = match StatusCode::from_u16(status) {
            Ok(code) if code.is_success() => match self.body {
                Some(body) => return FetchOutcome::Success(body),
                None => SyncError::MalformedBody(status),
            },
            Ok(StatusCode::TOO_MANY_REQUESTS) => SyncError::RateLimited(
                self.retry_after_secs.unwrap_or(DEFAULT_RETRY_AFTER_SECS),
            ),
            Ok(StatusCode::UNAUTHORIZED) | Ok(StatusCode::FORBIDDEN) => {
                SyncError::Unauthorized(status)
            }
            Ok(code) if code.is_client_error() => SyncError::ClientError(status),
            _ => SyncError::ServerError(status),
        };

        FetchOutcome::from_error(error)
    }
}

/// Classified outcome of a request
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    /// 2xx with a JSON body
    Success(Value),
    /// Worth retrying
    Recoverable(SyncError),
    /// Retrying will not help
    Unrecoverable(SyncError),
}

impl FetchOutcome {
    fn from_error(error: SyncError) -> Self {
        if error.is_retryable() {
            FetchOutcome::Recoverable(error)
        } else {
            FetchOutcome::Unrecoverable(error)
        }
    }

    /// Convert into a result, keeping the error classification
    pub fn into_result(self) -> Result<Value, SyncError> {
        match self {
            FetchOutcome::Success(body) => Ok(body),
            FetchOutcome::Recoverable(e) | FetchOutcome::Unrecoverable(e) => Err(e),
        }
    }
}

/// Marketplace client bound to one account
#[derive(Debug)]
pub struct MarketplaceClient {
    client: Client,
    base_url: String,
    account: Account,
    client_id: String,
    api_key: String,
    limiter: RateLimiter,
    acquire_timeout: Duration,
}

impl MarketplaceClient {
    /// Create a client for an account
    pub fn new(
        account: Account,
        marketplace: &MarketplaceConfig,
        account_config: &AccountConfig,
        acquire_timeout: Duration,
    ) -> Result<Self, SyncError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(marketplace.request_timeout_secs))
            .build()
            .map_err(|e| SyncError::Network(e.to_string()))?;

        Ok(Self::with_client(
            client,
            &marketplace.base_url,
            account,
            account_config,
            acquire_timeout,
        ))
    }

    /// Create a client with a custom reqwest Client
    pub fn with_client(
        client: Client,
        base_url: &str,
        account: Account,
        account_config: &AccountConfig,
        acquire_timeout: Duration,
    ) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            account,
            client_id: account_config.client_id.clone(),
            api_key: account_config.api_key.clone(),
            limiter: RateLimiter::new(account, account_config),
            acquire_timeout,
        }
    }

    /// Account this client acts for
    pub fn account(&self) -> Account {
        self.account
    }

    /// Rate limiter owned by this client
    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// GET a resource with query parameters
    pub async fn fetch(&self, resource: Resource, params: &[(&str, String)]) -> ApiResponse {
        let request = self.client.get(self.url(resource)).query(params);
        self.execute(resource, request).await
    }

    /// POST a JSON payload to a resource
    pub async fn post(&self, resource: Resource, payload: &Value) -> ApiResponse {
        let request = self.client.post(self.url(resource)).json(payload);
        self.execute(resource, request).await
    }

    fn url(&self, resource: Resource) -> String {
        format!("{}{}", self.base_url, resource.path())
    }

    async fn execute(&self, resource: Resource, request: RequestBuilder) -> ApiResponse {
        if let Err(e) = self
            .limiter
            .acquire(resource.class(), self.acquire_timeout)
            .await
        {
            return ApiResponse::degraded(e.into());
        }

        debug!(
            account = %self.account,
            path = resource.path(),
            "Sending marketplace request"
        );

        let response = match request
            .header("Client-Id", &self.client_id)
            .header("Api-Key", &self.api_key)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                let error = if e.is_timeout() {
                    SyncError::NetworkTimeout
                } else if e.is_connect() {
                    SyncError::ConnectionRefused
                } else {
                    SyncError::Network(e.to_string())
                };
                warn!(
                    account = %self.account,
                    path = resource.path(),
                    error = %error,
                    "Marketplace request failed"
                );
                return ApiResponse::degraded(error);
            }
        };

        let status = response.status().as_u16();
        let retry_after_secs = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok());

        // The connection can still drop while the body is streaming
        let bytes = match response.bytes().await {
            Ok(bytes) => bytes,
            Err(e) => {
                let error = if e.is_timeout() {
                    SyncError::NetworkTimeout
                } else {
                    SyncError::Network(e.to_string())
                };
                warn!(
                    account = %self.account,
                    path = resource.path(),
                    status = status,
                    error = %error,
                    "Response body read failed"
                );
                return ApiResponse::degraded(error);
            }
        };

        let body = if bytes.is_empty() {
            None
        } else {
            serde_json::from_slice(&bytes).ok()
        };

        if !(200..300).contains(&status) {
            warn!(
                account = %self.account,
                path = resource.path(),
                status = status,
                "Marketplace returned an error status"
            );
        }

        ApiResponse {
            status,
            body,
            retry_after_secs,
            transport_error: None,
        }
    }
}
