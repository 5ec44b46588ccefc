//! Catalog domain models
//!
//! Remote records as delivered by the marketplace for one account, and the
//! local product they are merged into.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::Account;
use crate::error::SyncError;

/// Shared catalog identity fields of a local product
///
/// These are the same for every account. `cost_price` never comes from the
/// marketplace.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProductFields {
    pub name: Option<String>,
    pub description: Option<String>,
    pub barcode: Option<String>,
    /// Internal cost basis
    pub cost_price: Option<f64>,
}

/// Product-level field names, used to mark fields as local-only
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductField {
    Name,
    Description,
    Barcode,
    CostPrice,
}

/// Account-scoped state of a product on the marketplace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountListing {
    pub account: Account,
    /// Marketplace id; only meaningful together with `account`
    pub remote_id: Option<i64>,
    pub price: Option<f64>,
    /// Units in stock keyed by warehouse name
    pub stock: BTreeMap<String, i64>,
    pub validation_status: Option<String>,
    /// Last raw payload seen for this listing
    pub raw: Option<Value>,
}

impl AccountListing {
    /// Create an empty listing for an account
    pub fn empty(account: Account) -> Self {
        Self {
            account,
            remote_id: None,
            price: None,
            stock: BTreeMap::new(),
            validation_status: None,
            raw: None,
        }
    }
}

/// A product in the local catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalProduct {
    pub id: i64,
    pub sku: String,
    pub fields: ProductFields,
    /// At most one listing per account
    pub listings: Vec<AccountListing>,
}

impl LocalProduct {
    /// Listing for the given account, if the product is known there
    pub fn listing(&self, account: Account) -> Option<&AccountListing> {
        self.listings.iter().find(|l| l.account == account)
    }
}

/// A product write for one (SKU, account) pair
///
/// Carries the complete new shared state plus the listing of one account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductWrite {
    pub sku: String,
    pub fields: ProductFields,
    pub listing: AccountListing,
}

/// Remote representation of a product/offer for one account
///
/// Optional fields are `None` when the payload does not carry them (an
/// offers page has prices and stock but no names, for example).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogRecord {
    /// Seller SKU, the natural key
    pub sku: String,
    pub account: Account,
    pub remote_id: i64,
    pub name: Option<String>,
    pub description: Option<String>,
    pub barcode: Option<String>,
    pub price: Option<f64>,
    pub stock: Option<BTreeMap<String, i64>>,
    pub validation_status: Option<String>,
    pub raw: Value,
}

impl CatalogRecord {
    /// Create a record carrying only its keys
    pub fn new(account: Account, sku: impl Into<String>, remote_id: i64) -> Self {
        Self {
            sku: sku.into(),
            account,
            remote_id,
            name: None,
            description: None,
            barcode: None,
            price: None,
            stock: None,
            validation_status: None,
            raw: Value::Null,
        }
    }

    /// Set the product name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the barcode
    pub fn with_barcode(mut self, barcode: impl Into<String>) -> Self {
        self.barcode = Some(barcode.into());
        self
    }

    /// Set the price
    pub fn with_price(mut self, price: f64) -> Self {
        self.price = Some(price);
        self
    }

    /// Set stock by warehouse
    pub fn with_stock(mut self, stock: BTreeMap<String, i64>) -> Self {
        self.stock = Some(stock);
        self
    }

    /// Set the validation status
    pub fn with_validation_status(mut self, status: impl Into<String>) -> Self {
        self.validation_status = Some(status.into());
        self
    }

    /// Parse one item of a catalog or offers page
    ///
    /// Expected shape:
    /// `{"sku": "ABC-1", "id": 123, "name": ..., "description": ..., "barcode": ...,
    ///   "status": ..., "price": "12.50", "stocks": [{"warehouse": "w1", "present": 3}]}`
    pub fn from_remote(account: Account, item: &Value) -> Result<Self, SyncError> {
        let sku = item
            .get("sku")
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| SyncError::InvalidData("catalog item without sku".to_string()))?;

        let remote_id = item.get("id").and_then(as_i64).ok_or_else(|| {
            SyncError::InvalidData(format!("catalog item {} without numeric id", sku))
        })?;

        let stock = match item.get("stocks") {
            Some(Value::Array(entries)) => {
                let mut stock = BTreeMap::new();
                for entry in entries {
                    let warehouse = entry
                        .get("warehouse")
                        .and_then(Value::as_str)
                        .ok_or_else(|| {
                            SyncError::InvalidData(format!("stock entry of {} without warehouse", sku))
                        })?;
                    let present = entry.get("present").and_then(as_i64).unwrap_or(0);
                    *stock.entry(warehouse.to_string()).or_insert(0) += present;
                }
                Some(stock)
            }
            Some(Value::Null) | None => None,
            Some(_) => {
                return Err(SyncError::InvalidData(format!(
                    "stocks of {} is not an array",
                    sku
                )))
            }
        };

        Ok(Self {
            sku: sku.trim().to_string(),
            account,
            remote_id,
            name: string_field(item, "name"),
            description: string_field(item, "description"),
            barcode: string_field(item, "barcode"),
            price: item.get("price").and_then(as_f64),
            stock,
            validation_status: string_field(item, "status"),
            raw: item.clone(),
        })
    }
}

/// A marketplace order posting for one account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRecord {
    pub account: Account,
    /// Posting number, unique within an account
    pub posting_number: String,
    pub remote_id: Option<i64>,
    pub status: String,
    pub total: Option<f64>,
    pub raw: Value,
}

impl OrderRecord {
    /// Parse one item of an orders page
    pub fn from_remote(account: Account, item: &Value) -> Result<Self, SyncError> {
        let posting_number = item
            .get("posting_number")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| SyncError::InvalidData("order without posting_number".to_string()))?;

        let status = string_field(item, "status").ok_or_else(|| {
            SyncError::InvalidData(format!("order {} without status", posting_number))
        })?;

        Ok(Self {
            account,
            posting_number: posting_number.to_string(),
            remote_id: item.get("id").and_then(as_i64),
            status,
            total: item.get("total").and_then(as_f64),
            raw: item.clone(),
        })
    }
}

fn string_field(item: &Value, key: &str) -> Option<String> {
    item.get(key).and_then(Value::as_str).map(String::from)
}

// Prices arrive either as JSON numbers or as decimal strings.
fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
