//! Conflict resolution between marketplace records and the local catalog
//!
//! The resolver is pure: it decides what a (SKU, account) pair should look
//! like locally and whether that is a create, an update or nothing at all.
//! Persisting the decision is left to the caller.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::models::{
    AccountListing, CatalogRecord, LocalProduct, OrderRecord, ProductField, ProductFields,
    ProductWrite,
};

/// Which side wins when both have a value
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStrategy {
    /// Remote values overwrite local ones, except local-only fields
    #[default]
    RemotePriority,
    /// Remote values only fill fields that are empty locally
    LocalPriority,
}

/// Decision for one remote catalog record
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Create(ProductWrite),
    Update { id: i64, write: ProductWrite },
    /// Local state already matches
    NoOp,
}

/// Decision for one remote order
#[derive(Debug, Clone, PartialEq)]
pub enum OrderResolution {
    Create(OrderRecord),
    Update(OrderRecord),
    NoOp,
}

/// Values that can be "empty" locally
trait Blank {
    fn is_blank(&self) -> bool;
}

impl Blank for String {
    fn is_blank(&self) -> bool {
        self.trim().is_empty()
    }
}

impl Blank for f64 {
    fn is_blank(&self) -> bool {
        false
    }
}

impl Blank for i64 {
    fn is_blank(&self) -> bool {
        false
    }
}

impl Blank for BTreeMap<String, i64> {
    fn is_blank(&self) -> bool {
        self.is_empty()
    }
}

/// Conflict resolver configured with a strategy and local-only fields
#[derive(Debug, Clone, Default)]
pub struct ConflictResolver {
    strategy: ConflictStrategy,
    local_only: BTreeSet<ProductField>,
}

impl ConflictResolver {
    pub fn new(
        strategy: ConflictStrategy,
        local_only: impl IntoIterator<Item = ProductField>,
    ) -> Self {
        Self {
            strategy,
            local_only: local_only.into_iter().collect(),
        }
    }

    pub fn strategy(&self) -> ConflictStrategy {
        self.strategy
    }

    /// Resolve a remote record against the local product with the same SKU
    ///
    /// Only the listing of the record's account is touched; the shared
    /// identity fields go through the strategy like any other field.
    pub fn resolve(&self, remote: &CatalogRecord, local: Option<&LocalProduct>) -> Resolution {
        let Some(local) = local else {
            return Resolution::Create(ProductWrite {
                sku: remote.sku.clone(),
                fields: ProductFields {
                    name: remote.name.clone(),
                    description: remote.description.clone(),
                    barcode: remote.barcode.clone(),
                    cost_price: None,
                },
                listing: AccountListing {
                    account: remote.account,
                    remote_id: Some(remote.remote_id),
                    price: remote.price,
                    stock: remote.stock.clone().unwrap_or_default(),
                    validation_status: remote.validation_status.clone(),
                    raw: Some(remote.raw.clone()),
                },
            });
        };

        let mut fields = local.fields.clone();
        self.merge_field(Some(ProductField::Name), &mut fields.name, &remote.name);
        self.merge_field(
            Some(ProductField::Description),
            &mut fields.description,
            &remote.description,
        );
        self.merge_field(Some(ProductField::Barcode), &mut fields.barcode, &remote.barcode);

        let current = local
            .listing(remote.account)
            .cloned()
            .unwrap_or_else(|| AccountListing::empty(remote.account));
        let mut listing = current.clone();
        self.merge_field(None, &mut listing.remote_id, &Some(remote.remote_id));
        self.merge_field(None, &mut listing.price, &remote.price);
        self.merge_field(
            None,
            &mut listing.validation_status,
            &remote.validation_status,
        );
        if let Some(stock) = &remote.stock {
            let take = match self.strategy {
                ConflictStrategy::RemotePriority => true,
                ConflictStrategy::LocalPriority => listing.stock.is_blank(),
            };
            if take {
                listing.stock = stock.clone();
            }
        }

        // The raw snapshot is bookkeeping; a payload that differs only in
        // untracked keys is not a change.
        let unchanged = fields == local.fields
            && AccountListing { raw: None, ..listing.clone() }
                == AccountListing { raw: None, ..current };
        if unchanged {
            return Resolution::NoOp;
        }

        listing.raw = Some(remote.raw.clone());
        Resolution::Update {
            id: local.id,
            write: ProductWrite {
                sku: local.sku.clone(),
                fields,
                listing,
            },
        }
    }

    /// Resolve a remote order against the stored one
    ///
    /// Orders belong to the marketplace, so the remote side always wins.
    pub fn resolve_order(
        &self,
        remote: &OrderRecord,
        local: Option<&OrderRecord>,
    ) -> OrderResolution {
        match local {
            None => OrderResolution::Create(remote.clone()),
            Some(local)
                if local.status == remote.status
                    && local.total == remote.total
                    && local.remote_id == remote.remote_id =>
            {
                OrderResolution::NoOp
            }
            Some(_) => OrderResolution::Update(remote.clone()),
        }
    }

    /// Merge one carried remote value into a local slot
    fn merge_field<T>(&self, field: Option<ProductField>, local: &mut Option<T>, remote: &Option<T>)
    where
        T: Clone + Blank,
    {
        if field.is_some_and(|f| self.local_only.contains(&f)) {
            return;
        }
        let Some(remote) = remote else {
            return;
        };

        let take = match self.strategy {
            ConflictStrategy::RemotePriority => true,
            ConflictStrategy::LocalPriority => local.as_ref().map_or(true, Blank::is_blank),
        };
        if take {
            *local = Some(remote.clone());
        }
    }
}
