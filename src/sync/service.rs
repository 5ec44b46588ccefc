//! Entry points for a scheduling collaborator
//!
//! The service owns one client and one orchestrator per account. `Both`
//! runs the two accounts concurrently as independent runs.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use super::client::{MarketplaceClient, Resource};
use super::fetcher::PaginatedFetcher;
use super::orchestrator::{OrchestratorConfig, SyncOrchestrator};
use super::retry::RetryManager;
use super::tracker::SyncStateTracker;
use crate::config::Config;
use crate::database::Database;
use crate::error::AppError;
use crate::models::{Account, AccountSelector, SyncMode, SyncRun, SyncType};

/// Client and sync loop of one account
struct AccountSync {
    client: Arc<MarketplaceClient>,
    orchestrator: SyncOrchestrator,
}

/// Sync service
pub struct SyncService {
    accounts: HashMap<Account, AccountSync>,
    tracker: SyncStateTracker,
    retry: RetryManager,
    page_size: u32,
}

impl SyncService {
    /// Build clients for both accounts from configuration
    pub fn new(config: &Config, db: Arc<dyn Database>) -> Result<Self, AppError> {
        let acquire_timeout = Duration::from_secs(config.sync.acquire_timeout_secs);
        let clients = Account::ALL
            .into_iter()
            .map(|account| {
                MarketplaceClient::new(
                    account,
                    &config.marketplace,
                    config.accounts.get(account),
                    acquire_timeout,
                )
                .map(Arc::new)
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self::with_clients(
            db,
            clients,
            RetryManager::new(config.retry.clone()),
            config.marketplace.page_size,
            OrchestratorConfig::from(config),
        ))
    }

    /// Build a service from prepared clients, one per account
    pub fn with_clients(
        db: Arc<dyn Database>,
        clients: Vec<Arc<MarketplaceClient>>,
        retry: RetryManager,
        page_size: u32,
        orchestrator_config: OrchestratorConfig,
    ) -> Self {
        let accounts = clients
            .into_iter()
            .map(|client| {
                let account = client.account();
                let orchestrator =
                    SyncOrchestrator::new(account, db.clone(), orchestrator_config.clone());
                (
                    account,
                    AccountSync {
                        client,
                        orchestrator,
                    },
                )
            })
            .collect();

        Self {
            accounts,
            tracker: SyncStateTracker::new(db),
            retry,
            page_size,
        }
    }

    /// Run a sync for the selected accounts, returns one run per account
    pub async fn trigger_sync(
        &self,
        selector: AccountSelector,
        sync_type: SyncType,
        mode: SyncMode,
    ) -> Result<Vec<SyncRun>, AppError> {
        info!(
            selector = ?selector,
            sync_type = %sync_type,
            mode = %mode,
            "Sync triggered"
        );

        match selector {
            AccountSelector::Both => {
                let (primary, fulfillment) = tokio::join!(
                    self.sync_account(Account::Primary, sync_type, mode),
                    self.sync_account(Account::Fulfillment, sync_type, mode),
                );
                Ok(vec![primary?, fulfillment?])
            }
            AccountSelector::Primary => Ok(vec![
                self.sync_account(Account::Primary, sync_type, mode).await?,
            ]),
            AccountSelector::Fulfillment => Ok(vec![
                self.sync_account(Account::Fulfillment, sync_type, mode)
                    .await?,
            ]),
        }
    }

    /// Fail runs stuck in `running` longer than the timeout
    pub async fn cleanup_stuck_runs(&self, timeout_minutes: u32) -> Result<u64, AppError> {
        Ok(self.tracker.cleanup_stuck(timeout_minutes).await?)
    }

    /// Latest runs, newest first
    pub async fn recent_runs(&self, limit: u32) -> Result<Vec<SyncRun>, AppError> {
        Ok(self.tracker.recent_runs(limit).await?)
    }

    pub async fn get_run(&self, run_id: i64) -> Result<Option<SyncRun>, AppError> {
        Ok(self.tracker.get_run(run_id).await?)
    }

    async fn sync_account(
        &self,
        account: Account,
        sync_type: SyncType,
        mode: SyncMode,
    ) -> Result<SyncRun, AppError> {
        let account_sync = self
            .accounts
            .get(&account)
            .ok_or_else(|| AppError::Config(format!("account {} is not configured", account)))?;

        let fetcher = PaginatedFetcher::new(
            account_sync.client.clone(),
            Resource::from(sync_type),
            self.retry.clone(),
            self.page_size,
        );

        Ok(account_sync
            .orchestrator
            .run(sync_type, mode, &fetcher)
            .await?)
    }
}
