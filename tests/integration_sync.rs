//! Sync engine integration tests
//!
//! Tests the synchronization system end to end:
//! - Page fetching against a mock marketplace
//! - Merging into the local store
//! - Skip streaks, watchdog timeouts and stuck run cleanup

mod common;

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::*;
use marketplace_sync::database::Database;
use marketplace_sync::error::{SyncError, TrackerError};
use marketplace_sync::models::{
    Account, AccountListing, AccountSelector, ProductFields, ProductWrite, SyncMode, SyncOutcome,
    SyncRun, SyncRunStatus, SyncType,
};
use marketplace_sync::sync::{
    ConflictStrategy, OperationClass, OrchestratorConfig, PageFailure, PageResult, PageSource,
    Resource, SyncOrchestrator, SyncStateTracker,
};

/// Page source replaying success/failure outcomes in order
struct OutcomeSource {
    outcomes: Mutex<VecDeque<bool>>,
}

impl OutcomeSource {
    fn new(outcomes: &[bool]) -> Self {
        Self {
            outcomes: Mutex::new(outcomes.iter().copied().collect()),
        }
    }
}

#[async_trait]
impl PageSource for OutcomeSource {
    async fn fetch_page(
        &self,
        page: u32,
        _since: Option<DateTime<Utc>>,
    ) -> Result<PageResult, PageFailure> {
        let outcome = self.outcomes.lock().unwrap().pop_front();
        match outcome {
            Some(true) => Ok(PageResult {
                page,
                total_pages: None,
                items: catalog_items("P2", page as usize * 10, 1),
            }),
            Some(false) => Err(PageFailure {
                page,
                attempts: 6,
                last_error: SyncError::ServerError(503),
            }),
            None => Ok(PageResult {
                page,
                total_pages: None,
                items: Vec::new(),
            }),
        }
    }
}

async fn run_outcomes(outcomes: &[bool]) -> SyncRun {
    let database = create_test_database().await;
    let orchestrator =
        SyncOrchestrator::new(Account::Primary, database, OrchestratorConfig::default());
    orchestrator
        .run(
            SyncType::Catalog,
            SyncMode::Full,
            &OutcomeSource::new(outcomes),
        )
        .await
        .unwrap()
}

/// Test 1: First page of new SKUs creates every product
#[tokio::test]
async fn test_new_skus_are_created() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/catalog"))
        .and(query_param("page", "1"))
        .and(header("Client-Id", client_id(Account::Primary).as_str()))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(page_body(catalog_items("NEW", 0, 100), 1, 1)),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let database = create_test_database().await;
    let service = create_test_service(
        &mock_server.uri(),
        database.clone(),
        5,
        OrchestratorConfig::default(),
    );

    let runs = service
        .trigger_sync(AccountSelector::Primary, SyncType::Catalog, SyncMode::Full)
        .await
        .unwrap();

    assert_eq!(runs.len(), 1);
    let run = &runs[0];
    assert_eq!(run.status, SyncRunStatus::Completed);
    assert_eq!(run.records_created, 100);
    assert_eq!(run.skipped_pages, 0);
    assert_eq!(run.outcome(), SyncOutcome::CompletedClean);

    let product = database.find_by_sku("NEW-99").await.unwrap().unwrap();
    let listing = product.listing(Account::Primary).unwrap();
    assert_eq!(listing.price, Some(19.90));
    assert_eq!(listing.stock.get("main"), Some(&5));
}

/// Test 2: A page failing every attempt is skipped once and the run moves on
#[tokio::test]
async fn test_failing_page_is_skipped() {
    let mock_server = MockServer::start().await;
    for page in [1u32, 2, 4] {
        Mock::given(method("GET"))
            .and(path("/v1/catalog"))
            .and(query_param("page", page.to_string().as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_json(page_body(
                catalog_items("B", page as usize * 10, 2),
                page,
                4,
            )))
            .expect(1)
            .mount(&mock_server)
            .await;
    }
    Mock::given(method("GET"))
        .and(path("/v1/catalog"))
        .and(query_param("page", "3"))
        .respond_with(ResponseTemplate::new(504))
        .expect(5)
        .mount(&mock_server)
        .await;

    let database = create_test_database().await;
    let service = create_test_service(
        &mock_server.uri(),
        database,
        4,
        OrchestratorConfig::default(),
    );

    let runs = service
        .trigger_sync(AccountSelector::Primary, SyncType::Catalog, SyncMode::Full)
        .await
        .unwrap();
    let run = &runs[0];

    assert_eq!(run.status, SyncRunStatus::Completed);
    assert_eq!(run.skipped_pages, 1);
    assert_eq!(run.pages_processed, 3);
    assert_eq!(run.records_created, 6);
    assert_eq!(run.error_log.len(), 1);
    assert!(run.error_log[0].contains("page 3"));
    assert!(run.error_log[0].contains("5 attempt"));
    assert_eq!(run.outcome(), SyncOutcome::CompletedWithSkips);
}

/// Test 3: Remote-priority update of an existing SKU
#[tokio::test]
async fn test_existing_sku_price_is_updated() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/catalog"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page_body(
            vec![json!({"sku": "ABC-1", "id": 7, "name": "Widget", "price": 12})],
            1,
            1,
        )))
        .mount(&mock_server)
        .await;

    let database = create_test_database().await;
    database
        .upsert_by_sku(&ProductWrite {
            sku: "ABC-1".to_string(),
            fields: ProductFields {
                name: Some("Widget".to_string()),
                cost_price: Some(4.0),
                ..Default::default()
            },
            listing: AccountListing {
                remote_id: Some(7),
                price: Some(10.0),
                ..AccountListing::empty(Account::Primary)
            },
        })
        .await
        .unwrap();

    let service = create_test_service(
        &mock_server.uri(),
        database.clone(),
        0,
        OrchestratorConfig::default(),
    );
    let runs = service
        .trigger_sync(AccountSelector::Primary, SyncType::Catalog, SyncMode::Full)
        .await
        .unwrap();

    assert_eq!(runs[0].records_updated, 1);
    assert_eq!(runs[0].records_created, 0);

    let product = database.find_by_sku("ABC-1").await.unwrap().unwrap();
    assert_eq!(product.listing(Account::Primary).unwrap().price, Some(12.0));
    assert_eq!(product.fields.cost_price, Some(4.0));
}

/// Test 4: Replaying identical data creates nothing and changes nothing
#[tokio::test]
async fn test_replay_is_idempotent() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/catalog"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(page_body(catalog_items("IDEM", 0, 20), 1, 1)),
        )
        .mount(&mock_server)
        .await;

    let database = create_test_database().await;
    let service = create_test_service(
        &mock_server.uri(),
        database.clone(),
        0,
        OrchestratorConfig::default(),
    );

    let first = service
        .trigger_sync(AccountSelector::Primary, SyncType::Catalog, SyncMode::Full)
        .await
        .unwrap();
    let second = service
        .trigger_sync(AccountSelector::Primary, SyncType::Catalog, SyncMode::Full)
        .await
        .unwrap();

    assert_eq!(first[0].records_created, 20);
    assert_eq!(second[0].records_created, 0);
    assert_eq!(second[0].records_updated, 0);
    assert_eq!(second[0].records_processed, 20);

    let product = database.find_by_sku("IDEM-3").await.unwrap().unwrap();
    assert_eq!(product.listings.len(), 1);
}

/// Test 5: Abort happens exactly on the third consecutive skipped page
#[tokio::test]
async fn test_skip_streak_threshold() {
    // fail, fail, success, fail, fail, fail
    let run = run_outcomes(&[false, false, true, false, false, false, true]).await;
    assert_eq!(run.status, SyncRunStatus::Failed);
    assert_eq!(run.skipped_pages, 5);

    // Never three in a row
    let run = run_outcomes(&[false, false, true, false, true, false, false, true]).await;
    assert_eq!(run.status, SyncRunStatus::Completed);
    assert_eq!(run.skipped_pages, 5);

    let run = run_outcomes(&[true, false, false, false]).await;
    assert_eq!(run.status, SyncRunStatus::Failed);
    assert_eq!(run.pages_processed, 1);
    assert_eq!(run.skipped_pages, 3);
}

/// Test 6: Requests of one account never spend the other account's budget
#[tokio::test]
async fn test_accounts_have_separate_budgets() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page_body(vec![], 1, 1)))
        .mount(&mock_server)
        .await;

    let primary = create_test_client(&mock_server.uri(), Account::Primary);
    let fulfillment = create_test_client(&mock_server.uri(), Account::Fulfillment);

    let before = fulfillment
        .limiter()
        .available_tokens(OperationClass::Catalog)
        .await;

    for _ in 0..3 {
        let response = primary
            .fetch(Resource::Catalog, &[("page", "1".to_string())])
            .await;
        assert_eq!(response.status, 200);
    }

    assert_eq!(
        primary.limiter().window_count(OperationClass::Catalog).await,
        Some(3)
    );
    assert_eq!(
        fulfillment
            .limiter()
            .window_count(OperationClass::Catalog)
            .await,
        Some(0)
    );
    assert_eq!(
        fulfillment
            .limiter()
            .available_tokens(OperationClass::Catalog)
            .await,
        before
    );
}

/// Test 7: Local priority keeps populated local values
#[tokio::test]
async fn test_local_priority_keeps_local_values() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/catalog"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page_body(
            vec![json!({
                "sku": "LOC-1",
                "id": 3,
                "name": "Remote name",
                "barcode": "4600000000001",
                "price": 99.0
            })],
            1,
            1,
        )))
        .mount(&mock_server)
        .await;

    let database = create_test_database().await;
    database
        .upsert_by_sku(&ProductWrite {
            sku: "LOC-1".to_string(),
            fields: ProductFields {
                name: Some("Local name".to_string()),
                ..Default::default()
            },
            listing: AccountListing {
                remote_id: Some(3),
                price: Some(50.0),
                ..AccountListing::empty(Account::Primary)
            },
        })
        .await
        .unwrap();

    let service = create_test_service(
        &mock_server.uri(),
        database.clone(),
        0,
        OrchestratorConfig {
            strategy: ConflictStrategy::LocalPriority,
            ..Default::default()
        },
    );
    let runs = service
        .trigger_sync(AccountSelector::Primary, SyncType::Catalog, SyncMode::Full)
        .await
        .unwrap();
    assert_eq!(runs[0].records_updated, 1);

    let product = database.find_by_sku("LOC-1").await.unwrap().unwrap();
    assert_eq!(product.fields.name.as_deref(), Some("Local name"));
    // Empty locally, so filled from remote
    assert_eq!(product.fields.barcode.as_deref(), Some("4600000000001"));
    assert_eq!(product.listing(Account::Primary).unwrap().price, Some(50.0));
}

/// Test 8: Watchdog timeout keeps merged records and finishes the run once
#[tokio::test]
async fn test_watchdog_timeout() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/catalog"))
        .and(query_param("page", "1"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(page_body(catalog_items("TO", 0, 5), 1, 3)),
        )
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/catalog"))
        .and(query_param("page", "2"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(page_body(catalog_items("TO", 5, 5), 2, 3))
                .set_delay(Duration::from_secs(10)),
        )
        .mount(&mock_server)
        .await;

    let database = create_test_database().await;
    let service = create_test_service(
        &mock_server.uri(),
        database.clone(),
        0,
        OrchestratorConfig {
            run_timeout: Duration::from_millis(500),
            ..Default::default()
        },
    );

    let runs = service
        .trigger_sync(AccountSelector::Primary, SyncType::Catalog, SyncMode::Full)
        .await
        .unwrap();
    let run = &runs[0];

    assert_eq!(run.status, SyncRunStatus::Timeout);
    assert_eq!(run.records_created, 5);
    assert_eq!(run.error_log.len(), 1);
    assert!(database.find_by_sku("TO-4").await.unwrap().is_some());
    assert!(database.find_by_sku("TO-5").await.unwrap().is_none());

    // A late terminal write is refused
    let tracker = SyncStateTracker::new(database.clone());
    let run_id = run.id.unwrap();
    assert!(matches!(
        tracker.complete(run_id).await,
        Err(TrackerError::AlreadyFinished(id)) if id == run_id
    ));
    let stored = tracker.get_run(run_id).await.unwrap().unwrap();
    assert_eq!(stored.status, SyncRunStatus::Timeout);
    assert_eq!(stored.error_log.len(), 1);
}

/// Test 9: Runs stuck in running are failed by cleanup
#[tokio::test]
async fn test_cleanup_stuck_runs() {
    let database = create_test_database().await;
    let stuck = SyncRun::new(Account::Fulfillment, SyncType::Orders, SyncMode::Full)
        .with_started_at(Utc::now() - chrono::Duration::minutes(20));
    let stuck_id = database.insert_sync_run(&stuck).await.unwrap();

    let service = create_test_service(
        "http://127.0.0.1:9",
        database.clone(),
        0,
        OrchestratorConfig::default(),
    );

    assert_eq!(service.cleanup_stuck_runs(15).await.unwrap(), 1);
    assert_eq!(service.cleanup_stuck_runs(15).await.unwrap(), 0);

    let run = service.get_run(stuck_id).await.unwrap().unwrap();
    assert_eq!(run.status, SyncRunStatus::Failed);
    assert!(run.completed_at.is_some());
    assert_eq!(run.error_log.len(), 1);
    assert!(run.error_log[0].contains("stuck"));
}

/// Test 10: Both accounts sync concurrently into one catalog
#[tokio::test]
async fn test_both_accounts_share_products() {
    let mock_server = MockServer::start().await;
    for (account, remote_id, price) in [(Account::Primary, 1, 10.0), (Account::Fulfillment, 2, 11.0)]
    {
        Mock::given(method("GET"))
            .and(path("/v1/offers"))
            .and(header("Client-Id", client_id(account).as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_json(page_body(
                vec![json!({"sku": "SHARED-1", "id": remote_id, "price": price})],
                1,
                1,
            )))
            .mount(&mock_server)
            .await;
    }

    let database = create_test_database().await;
    let service = create_test_service(
        &mock_server.uri(),
        database.clone(),
        0,
        OrchestratorConfig::default(),
    );

    let runs = service
        .trigger_sync(AccountSelector::Both, SyncType::Offers, SyncMode::Full)
        .await
        .unwrap();
    assert_eq!(runs.len(), 2);
    assert!(runs.iter().all(|r| r.status == SyncRunStatus::Completed));
    // One SKU, so exactly one run created the product row
    let created: u64 = runs.iter().map(|r| r.records_created).sum();
    let updated: u64 = runs.iter().map(|r| r.records_updated).sum();
    assert_eq!(created + updated, 2);
    assert_eq!(created, 1);

    let product = database.find_by_sku("SHARED-1").await.unwrap().unwrap();
    assert_eq!(product.listings.len(), 2);
    assert_eq!(product.listing(Account::Primary).unwrap().remote_id, Some(1));
    assert_eq!(
        product.listing(Account::Fulfillment).unwrap().remote_id,
        Some(2)
    );
    assert_eq!(
        product.listing(Account::Fulfillment).unwrap().price,
        Some(11.0)
    );
}

/// Test 11: Incremental runs ask only for changes since the last completed run
#[tokio::test]
async fn test_incremental_sends_updated_since() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/orders"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page_body(
            vec![json!({"posting_number": "77-1", "id": 1, "status": "delivering", "total": 15.5})],
            1,
            1,
        )))
        .mount(&mock_server)
        .await;

    let database = create_test_database().await;
    let service = create_test_service(
        &mock_server.uri(),
        database.clone(),
        0,
        OrchestratorConfig::default(),
    );

    let first = service
        .trigger_sync(
            AccountSelector::Fulfillment,
            SyncType::Orders,
            SyncMode::Incremental,
        )
        .await
        .unwrap();
    assert_eq!(first[0].records_created, 1);

    let second = service
        .trigger_sync(
            AccountSelector::Fulfillment,
            SyncType::Orders,
            SyncMode::Incremental,
        )
        .await
        .unwrap();
    assert_eq!(second[0].records_created, 0);
    assert_eq!(second[0].records_updated, 0);

    let requests = mock_server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);
    let has_since = |i: usize| {
        requests[i]
            .url
            .query_pairs()
            .any(|(key, _)| key == "updatedSince")
    };
    assert!(!has_since(0));
    assert!(has_since(1));

    let order = database
        .find_order(Account::Fulfillment, "77-1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(order.total, Some(15.5));
}
