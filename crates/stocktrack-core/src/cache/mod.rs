//! Query result caching for remote collections.
//!
//! - `EntityCache`: one entry per (collection, filters) key, shared fetches,
//!   stale-on-write invalidation
//! - `Collection`: the list/create/update/delete seam a cache sits on
//! - `CacheEntry`, `CacheStatus`, `CacheStats`: what readers observe

pub mod collection;
pub mod entry;
pub mod key;
pub mod store;

pub use collection::{Collection, WriteOp, WriteOutcome};
pub use entry::{format_age, CacheEntry, CacheStats, CacheStatus};
pub use key::{Filters, QueryKey};
pub use store::EntityCache;
