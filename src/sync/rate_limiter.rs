//! Per-account request budgets
//!
//! Every operation class has a token bucket for short bursts and a sliding
//! one-minute window for the per-minute ceiling. A request is admitted only
//! when both agree. One [`RateLimiter`] belongs to exactly one account.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use rand::Rng;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::{AccountConfig, RateBudgetConfig};
use crate::error::RateLimitError;
use crate::models::Account;

const WINDOW: Duration = Duration::from_secs(60);

/// Class of marketplace operation sharing one budget
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationClass {
    /// Catalog, offers and other general calls
    Catalog,
    /// Order endpoints, usually with a larger allowance
    Orders,
}

impl OperationClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationClass::Catalog => "catalog",
            OperationClass::Orders => "orders",
        }
    }
}

impl std::fmt::Display for OperationClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Limiter state of one operation class
#[derive(Debug)]
struct RateBudget {
    capacity: f64,
    refill_per_sec: f64,
    tokens: f64,
    last_refill: Instant,
    per_minute: usize,
    /// Grant times inside the current window, oldest first
    window: VecDeque<Instant>,
}

impl RateBudget {
    fn new(config: &RateBudgetConfig, now: Instant) -> Self {
        let capacity = f64::from(config.burst);
        Self {
            capacity,
            refill_per_sec: config.refill_per_sec,
            tokens: capacity,
            last_refill: now,
            per_minute: config.per_minute as usize,
            window: VecDeque::new(),
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        self.last_refill = now;

        while let Some(&oldest) = self.window.front() {
            if oldest + WINDOW <= now {
                self.window.pop_front();
            } else {
                break;
            }
        }
    }

    /// Take one token, or return how long to wait before asking again
    fn try_acquire(&mut self, now: Instant) -> Result<(), Duration> {
        self.refill(now);

        if self.window.len() >= self.per_minute {
            let wait = self
                .window
                .front()
                .map(|oldest| (*oldest + WINDOW).saturating_duration_since(now))
                .unwrap_or(WINDOW);
            return Err(wait);
        }

        if self.tokens < 1.0 {
            let missing = 1.0 - self.tokens;
            let wait = Duration::try_from_secs_f64(missing / self.refill_per_sec).unwrap_or(WINDOW);
            return Err(wait);
        }

        self.tokens -= 1.0;
        self.window.push_back(now);
        Ok(())
    }
}

/// Rate limiter for one account
#[derive(Debug)]
pub struct RateLimiter {
    account: Account,
    budgets: Mutex<HashMap<OperationClass, RateBudget>>,
    jitter: Duration,
}

impl RateLimiter {
    /// Create the limiter of an account from its configuration
    pub fn new(account: Account, config: &AccountConfig) -> Self {
        Self::with_budgets(
            account,
            [
                (OperationClass::Catalog, config.rate_limits.catalog),
                (OperationClass::Orders, config.rate_limits.orders),
            ],
            Duration::from_millis(config.jitter_ms),
        )
    }

    /// Create a limiter with an explicit set of budgets
    pub fn with_budgets(
        account: Account,
        budgets: impl IntoIterator<Item = (OperationClass, RateBudgetConfig)>,
        jitter: Duration,
    ) -> Self {
        let now = Instant::now();
        let budgets = budgets
            .into_iter()
            .map(|(class, config)| (class, RateBudget::new(&config, now)))
            .collect();

        Self {
            account,
            budgets: Mutex::new(budgets),
            jitter,
        }
    }

    /// Account this limiter belongs to
    pub fn account(&self) -> Account {
        self.account
    }

    /// Wait for a token of the given class
    ///
    /// Sleeps with random jitter between attempts and gives up once `timeout`
    /// has elapsed. A timeout past the clock's range waits without a deadline.
    pub async fn acquire(
        &self,
        class: OperationClass,
        timeout: Duration,
    ) -> Result<(), RateLimitError> {
        let deadline = Instant::now().checked_add(timeout);

        loop {
            let wait = {
                let mut budgets = self.budgets.lock().await;
                let budget = budgets
                    .get_mut(&class)
                    .ok_or_else(|| RateLimitError::UnknownClass(class.to_string()))?;
                match budget.try_acquire(Instant::now()) {
                    Ok(()) => return Ok(()),
                    Err(wait) => wait,
                }
            };

            let now = Instant::now();
            if deadline.is_some_and(|d| now >= d) {
                warn!(
                    account = %self.account,
                    class = %class,
                    timeout_ms = timeout.as_millis() as u64,
                    "Rate limit token not acquired in time"
                );
                return Err(RateLimitError::TimedOut(class.to_string()));
            }

            let mut sleep = wait.saturating_add(self.random_jitter());
            if let Some(deadline) = deadline {
                sleep = sleep.min(deadline - now);
            }
            debug!(
                account = %self.account,
                class = %class,
                wait_ms = sleep.as_millis() as u64,
                "Waiting for rate limit token"
            );
            tokio::time::sleep(sleep).await;
        }
    }

    /// Tokens currently in the bucket of a class
    pub async fn available_tokens(&self, class: OperationClass) -> Option<f64> {
        let mut budgets = self.budgets.lock().await;
        budgets.get_mut(&class).map(|budget| {
            budget.refill(Instant::now());
            budget.tokens
        })
    }

    /// Requests granted for a class within the last minute
    pub async fn window_count(&self, class: OperationClass) -> Option<usize> {
        let mut budgets = self.budgets.lock().await;
        budgets.get_mut(&class).map(|budget| {
            budget.refill(Instant::now());
            budget.window.len()
        })
    }

    fn random_jitter(&self) -> Duration {
        let max = self.jitter.as_millis() as u64;
        if max == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=max))
    }
}
