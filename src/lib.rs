//! marketplace-sync - Catalog synchronization for a two-account marketplace seller
//!
//! This crate pulls catalog, offer and order data for two seller accounts
//! under per-account rate limits, merges it into a local SQLite store and
//! keeps an audit trail of every sync run.

pub mod config;
pub mod database;
pub mod error;
pub mod logging;
pub mod models;
pub mod sync;
