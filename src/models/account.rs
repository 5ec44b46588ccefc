//! Seller account models
//!
//! The marketplace is accessed through two independent seller identities.
//! Each one has its own credentials, rate quota and remote id space.

use serde::{Deserialize, Serialize};

/// One of the two seller accounts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Account {
    /// Main seller account
    Primary,
    /// Fulfillment-by-marketplace account
    Fulfillment,
}

impl Account {
    /// All accounts, in a stable order
    pub const ALL: [Account; 2] = [Account::Primary, Account::Fulfillment];

    /// Lowercase identifier used in storage and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            Account::Primary => "primary",
            Account::Fulfillment => "fulfillment",
        }
    }
}

impl std::fmt::Display for Account {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Account {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "primary" => Ok(Account::Primary),
            "fulfillment" => Ok(Account::Fulfillment),
            _ => Err(format!("Invalid account: {}", s)),
        }
    }
}

/// Which accounts a sync request targets
///
/// `Both` never has a code path of its own: it expands into one
/// independent run per account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountSelector {
    Primary,
    Fulfillment,
    Both,
}

impl AccountSelector {
    /// Expand into the concrete accounts to synchronize
    pub fn accounts(&self) -> Vec<Account> {
        match self {
            AccountSelector::Primary => vec![Account::Primary],
            AccountSelector::Fulfillment => vec![Account::Fulfillment],
            AccountSelector::Both => Account::ALL.to_vec(),
        }
    }
}

impl From<Account> for AccountSelector {
    fn from(account: Account) -> Self {
        match account {
            Account::Primary => AccountSelector::Primary,
            Account::Fulfillment => AccountSelector::Fulfillment,
        }
    }
}

impl std::str::FromStr for AccountSelector {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "both" => Ok(AccountSelector::Both),
            other => other.parse::<Account>().map(Into::into),
        }
    }
}
