//! Configuration management for marketplace-sync
//!
//! This module handles loading, parsing, and validating application configuration
//! from YAML files and environment variables.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::models::{Account, ProductField};
use crate::sync::resolver::ConflictStrategy;

/// Upper bound for configured timeouts (one year)
const MAX_TIMEOUT_SECS: u64 = 365 * 24 * 60 * 60;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Marketplace API endpoint configuration
    #[serde(default)]
    pub marketplace: MarketplaceConfig,

    /// Per-account credentials and rate plans
    #[serde(default)]
    pub accounts: AccountsConfig,

    /// Retry configuration for page fetches
    #[serde(default)]
    pub retry: RetryConfig,

    /// Orchestrator policy
    #[serde(default)]
    pub sync: SyncConfig,
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::FileRead(format!("Failed to read config file: {}", e)))?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        // First, expand environment variables in the YAML string
        let expanded = expand_env_vars(yaml);
        let config: Config = serde_yaml::from_str(&expanded)
            .map_err(|e| ConfigError::Parse(format!("Failed to parse YAML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables with prefix MARKETPLACE_SYNC_
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Config::default();

        if let Ok(path) = std::env::var("MARKETPLACE_SYNC_DATABASE_PATH") {
            config.database.path = path;
        }
        if let Ok(url) = std::env::var("MARKETPLACE_SYNC_BASE_URL") {
            config.marketplace.base_url = url;
        }
        if let Ok(level) = std::env::var("MARKETPLACE_SYNC_LOG_LEVEL") {
            config.logging.level = level;
        }

        for account in Account::ALL {
            let prefix = format!("MARKETPLACE_SYNC_{}", account.as_str().to_uppercase());
            let account_config = config.accounts.get_mut(account);
            if let Ok(client_id) = std::env::var(format!("{}_CLIENT_ID", prefix)) {
                account_config.client_id = client_id;
            }
            if let Ok(api_key) = std::env::var(format!("{}_API_KEY", prefix)) {
                account_config.api_key = api_key;
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Check values that serde cannot reject on its own
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.marketplace.base_url.trim().is_empty() {
            return Err(ConfigError::MissingRequired("marketplace.base_url".to_string()));
        }
        if self.marketplace.page_size == 0 {
            return Err(ConfigError::InvalidValue(
                "marketplace.page_size must be positive".to_string(),
            ));
        }
        if self.sync.max_consecutive_skips == 0 {
            return Err(ConfigError::InvalidValue(
                "sync.max_consecutive_skips must be positive".to_string(),
            ));
        }
        if self.sync.stuck_timeout_minutes == 0 {
            return Err(ConfigError::InvalidValue(
                "sync.stuck_timeout_minutes must be at least 1".to_string(),
            ));
        }
        for (key, secs) in [
            ("sync.run_timeout_secs", self.sync.run_timeout_secs),
            ("sync.acquire_timeout_secs", self.sync.acquire_timeout_secs),
        ] {
            if secs == 0 || secs > MAX_TIMEOUT_SECS {
                return Err(ConfigError::InvalidValue(format!(
                    "{} must be between 1 and {}",
                    key, MAX_TIMEOUT_SECS
                )));
            }
        }
        let retry = &self.retry;
        for (key, value) in [
            ("retry.initial_backoff_secs", retry.initial_backoff_secs),
            ("retry.max_backoff_secs", retry.max_backoff_secs),
            ("retry.backoff_multiplier", retry.backoff_multiplier),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::InvalidValue(format!(
                    "{} must be a finite non-negative number",
                    key
                )));
            }
        }
        for account in Account::ALL {
            let limits = &self.accounts.get(account).rate_limits;
            for (class, budget) in [("catalog", &limits.catalog), ("orders", &limits.orders)] {
                // NaN fails every comparison, so check finiteness first
                if budget.burst == 0
                    || budget.per_minute == 0
                    || !budget.refill_per_sec.is_finite()
                    || budget.refill_per_sec <= 0.0
                {
                    return Err(ConfigError::InvalidValue(format!(
                        "accounts.{}.rate_limits.{} must allow at least one request",
                        account, class
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file
    #[serde(default = "default_database_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

fn default_database_path() -> String {
    "marketplace-sync.db".to_string()
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (`json` or `pretty`)
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

/// Marketplace API configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MarketplaceConfig {
    /// Base URL of the marketplace API
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Records requested per page
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

impl Default for MarketplaceConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout_secs: default_request_timeout(),
            page_size: default_page_size(),
        }
    }
}

fn default_base_url() -> String {
    "https://api.marketplace.example".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

fn default_page_size() -> u32 {
    100
}

/// Configuration of both seller accounts
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AccountsConfig {
    #[serde(default)]
    pub primary: AccountConfig,

    #[serde(default)]
    pub fulfillment: AccountConfig,
}

impl AccountsConfig {
    /// Configuration of one account
    pub fn get(&self, account: Account) -> &AccountConfig {
        match account {
            Account::Primary => &self.primary,
            Account::Fulfillment => &self.fulfillment,
        }
    }

    fn get_mut(&mut self, account: Account) -> &mut AccountConfig {
        match account {
            Account::Primary => &mut self.primary,
            Account::Fulfillment => &mut self.fulfillment,
        }
    }
}

/// Credentials and rate plan of one account
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AccountConfig {
    /// Seller client id, sent as `Client-Id`
    #[serde(default)]
    pub client_id: String,

    /// API key, sent as `Api-Key`
    #[serde(default)]
    pub api_key: String,

    /// Negotiated request budgets
    #[serde(default)]
    pub rate_limits: RateLimitsConfig,

    /// Upper bound of the random delay added when a token is refused
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,
}

impl Default for AccountConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            api_key: String::new(),
            rate_limits: RateLimitsConfig::default(),
            jitter_ms: default_jitter_ms(),
        }
    }
}

fn default_jitter_ms() -> u64 {
    250
}

/// Request budgets per operation class
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RateLimitsConfig {
    /// Catalog and offers endpoints
    #[serde(default = "default_catalog_budget")]
    pub catalog: RateBudgetConfig,

    /// Order endpoints
    #[serde(default = "default_orders_budget")]
    pub orders: RateBudgetConfig,
}

impl Default for RateLimitsConfig {
    fn default() -> Self {
        Self {
            catalog: default_catalog_budget(),
            orders: default_orders_budget(),
        }
    }
}

fn default_catalog_budget() -> RateBudgetConfig {
    RateBudgetConfig {
        burst: 3,
        refill_per_sec: 3.0,
        per_minute: 150,
    }
}

fn default_orders_budget() -> RateBudgetConfig {
    RateBudgetConfig {
        burst: 6,
        refill_per_sec: 6.0,
        per_minute: 300,
    }
}

/// Token bucket and sliding window limits of one operation class
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct RateBudgetConfig {
    /// Bucket capacity
    pub burst: u32,

    /// Tokens added per second
    pub refill_per_sec: f64,

    /// Requests allowed in any sixty second window
    pub per_minute: u32,
}

/// Retry configuration for page fetches
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of retry attempts
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Initial backoff duration in seconds
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_secs: f64,

    /// Maximum backoff duration in seconds
    #[serde(default = "default_max_backoff")]
    pub max_backoff_secs: f64,

    /// Backoff multiplier
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Whether to add jitter to backoff
    #[serde(default)]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_secs: default_initial_backoff(),
            max_backoff_secs: default_max_backoff(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: false,
        }
    }
}

fn default_max_retries() -> u32 {
    5
}

fn default_initial_backoff() -> f64 {
    2.0
}

fn default_max_backoff() -> f64 {
    30.0
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

/// Orchestrator policy
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncConfig {
    /// Consecutive skipped pages that abort a run
    #[serde(default = "default_max_consecutive_skips")]
    pub max_consecutive_skips: u32,

    /// Wall-clock budget of one run in seconds
    #[serde(default = "default_run_timeout")]
    pub run_timeout_secs: u64,

    /// How long a request may wait for a rate limit token
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_secs: u64,

    /// Conflict resolution strategy
    #[serde(default)]
    pub strategy: ConflictStrategy,

    /// Product fields the marketplace never overwrites
    #[serde(default = "default_local_only_fields")]
    pub local_only_fields: Vec<ProductField>,

    /// Age after which a running run counts as stuck
    #[serde(default = "default_stuck_timeout")]
    pub stuck_timeout_minutes: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_consecutive_skips: default_max_consecutive_skips(),
            run_timeout_secs: default_run_timeout(),
            acquire_timeout_secs: default_acquire_timeout(),
            strategy: ConflictStrategy::default(),
            local_only_fields: default_local_only_fields(),
            stuck_timeout_minutes: default_stuck_timeout(),
        }
    }
}

fn default_max_consecutive_skips() -> u32 {
    3
}

fn default_run_timeout() -> u64 {
    600
}

fn default_acquire_timeout() -> u64 {
    30
}

fn default_local_only_fields() -> Vec<ProductField> {
    vec![ProductField::CostPrice]
}

fn default_stuck_timeout() -> u32 {
    15
}

/// Configuration error types
#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum ConfigError {
    /// Error reading configuration file
    #[error("Failed to read configuration file: {0}")]
    FileRead(String),

    /// Error parsing configuration
    #[error("Failed to parse configuration: {0}")]
    Parse(String),

    /// Invalid configuration value
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    /// Missing required configuration
    #[error("Missing required configuration: {0}")]
    MissingRequired(String),
}

/// Expand environment variables in a string
///
/// Supports `${VAR_NAME}` syntax
fn expand_env_vars(input: &str) -> String {
    let re = match regex_lite::Regex::new(r"\$\{([^}]+)\}") {
        Ok(re) => re,
        Err(_) => return input.to_string(),
    };

    re.replace_all(input, |caps: &regex_lite::Captures| {
        let var_name = &caps[1];
        std::env::var(var_name).unwrap_or_else(|_| caps[0].to_string())
    })
    .into_owned()
}
