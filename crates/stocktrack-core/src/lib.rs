//! stocktrack core library.
//!
//! Client-side data access for an inventory service: an authenticated
//! session with single-flight token refresh, a transport that classifies
//! every failure, a per-query entity cache that goes stale on writes, and
//! the demand forecast / pricing arithmetic.
//!
//! Presentation is left to the consumer (see the `stocktrack` binary).

pub mod api;
pub mod auth;
pub mod cache;
pub mod client;
pub mod config;
pub mod metrics;
pub mod models;

#[cfg(test)]
pub(crate) mod testing;

pub use api::{ApiError, ErrorKind};
pub use auth::Session;
pub use cache::{CacheEntry, CacheStatus, EntityCache};
pub use client::{CompareError, InventoryClient};
pub use config::Config;
