//! Common test utilities and helpers for integration tests

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use marketplace_sync::config::{AccountConfig, RetryConfig};
use marketplace_sync::database::SqliteDatabase;
use marketplace_sync::models::Account;
use marketplace_sync::sync::{
    MarketplaceClient, OrchestratorConfig, RetryManager, SyncService,
};

/// Create an in-memory database for testing
pub async fn create_test_database() -> Arc<SqliteDatabase> {
    Arc::new(
        SqliteDatabase::in_memory()
            .await
            .expect("Failed to create test database"),
    )
}

/// Client id used for an account in tests
pub fn client_id(account: Account) -> String {
    format!("{}-client", account)
}

/// Account configuration with default budgets and no jitter
pub fn test_account_config(account: Account) -> AccountConfig {
    AccountConfig {
        client_id: client_id(account),
        api_key: format!("{}-key", account),
        jitter_ms: 0,
        ..Default::default()
    }
}

/// Create a client for an account against a mock server
pub fn create_test_client(uri: &str, account: Account) -> Arc<MarketplaceClient> {
    Arc::new(MarketplaceClient::with_client(
        reqwest::Client::new(),
        uri,
        account,
        &test_account_config(account),
        Duration::from_secs(10),
    ))
}

/// Retry manager that retries without waiting
pub fn instant_retries(max_retries: u32) -> RetryManager {
    RetryManager::new(RetryConfig {
        max_retries,
        initial_backoff_secs: 0.0,
        max_backoff_secs: 0.0,
        backoff_multiplier: 2.0,
        jitter: false,
    })
}

/// Create a service for both accounts against a mock server
pub fn create_test_service(
    uri: &str,
    database: Arc<SqliteDatabase>,
    max_retries: u32,
    orchestrator_config: OrchestratorConfig,
) -> SyncService {
    SyncService::with_clients(
        database,
        Account::ALL
            .into_iter()
            .map(|account| create_test_client(uri, account))
            .collect(),
        instant_retries(max_retries),
        100,
        orchestrator_config,
    )
}

/// Catalog items `{prefix}-{start}` .. `{prefix}-{start + count - 1}`
pub fn catalog_items(prefix: &str, start: usize, count: usize) -> Vec<Value> {
    (start..start + count)
        .map(|i| {
            json!({
                "sku": format!("{}-{}", prefix, i),
                "id": i as i64 + 1000,
                "name": format!("Product {}", i),
                "price": "19.90",
                "stocks": [{"warehouse": "main", "present": 5}]
            })
        })
        .collect()
}

/// A page body in the marketplace format
pub fn page_body(items: Vec<Value>, current_page: u32, total_pages: u32) -> Value {
    json!({
        "results": items,
        "currentPage": current_page,
        "totalPages": total_pages
    })
}
