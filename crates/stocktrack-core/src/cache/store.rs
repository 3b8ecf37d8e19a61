//! In-memory, per-query result cache for one collection.
//!
//! Reads return the fresh entry for a key or fetch it, with concurrent reads
//! of the same key sharing one fetch. Writes go through the collection and
//! then mark every entry of that collection stale; the next read refetches.
//!
//! Each slot carries a generation number. Starting a fetch and invalidating
//! both bump it, and a fetch only lands if the generation it started under
//! is still current, so a response issued before a write never shows up as
//! fresh after it.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tracing::{debug, warn};

use super::collection::{Collection, WriteOp, WriteOutcome};
use super::entry::{CacheEntry, CacheStats, CacheStatus};
use super::key::{Filters, QueryKey};
use crate::api::ApiError;

type SharedFetch<R> = Shared<BoxFuture<'static, CacheEntry<R>>>;

struct Slot<R> {
    entry: CacheEntry<R>,
    generation: u64,
    in_flight: Option<SharedFetch<R>>,
}

struct Inner<C: Collection> {
    collection: C,
    slots: Mutex<HashMap<QueryKey, Slot<C::Record>>>,
    stats: Mutex<CacheStats>,
}

/// Clone is cheap; clones share entries.
pub struct EntityCache<C: Collection> {
    inner: Arc<Inner<C>>,
}

impl<C: Collection> Clone for EntityCache<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: Collection> EntityCache<C> {
    pub fn new(collection: C) -> Self {
        Self {
            inner: Arc::new(Inner {
                collection,
                slots: Mutex::new(HashMap::new()),
                stats: Mutex::new(CacheStats::default()),
            }),
        }
    }

    pub fn collection(&self) -> &C {
        &self.inner.collection
    }

    pub fn key(&self, filters: Filters) -> QueryKey {
        QueryKey::new(self.inner.collection.name(), filters)
    }

    /// Current state of a key without fetching.
    pub fn peek(&self, filters: Filters) -> Option<CacheEntry<C::Record>> {
        let key = self.key(filters);
        self.inner.slots.lock().get(&key).map(|slot| slot.entry.clone())
    }

    /// The fresh entry for `filters`, fetching it if needed.
    ///
    /// Never fails: a failed fetch comes back as an `Errored` entry. A fetch
    /// superseded by a write comes back marked `Stale` and is not stored.
    pub async fn read(&self, filters: Filters) -> CacheEntry<C::Record> {
        let key = self.key(filters);
        let pending = {
            let mut slots = self.inner.slots.lock();
            let slot = slots.entry(key.clone()).or_insert_with(|| Slot {
                entry: CacheEntry::new(key.clone()),
                generation: 0,
                in_flight: None,
            });

            if slot.entry.status == CacheStatus::Fresh {
                self.inner.stats.lock().hits += 1;
                return slot.entry.clone();
            }

            if let Some(fetch) = slot.in_flight.clone() {
                self.inner.stats.lock().deduplicated += 1;
                debug!(key = %key, "Joining in-flight fetch");
                fetch
            } else {
                self.inner.stats.lock().misses += 1;
                slot.generation += 1;
                slot.entry.status = CacheStatus::Loading;
                let fetch = Inner::start_fetch(&self.inner, key.clone(), slot.generation);
                slot.in_flight = Some(fetch.clone());
                fetch
            }
        };
        pending.await
    }

    /// Apply a write, then mark this collection's entries stale.
    /// Nothing is invalidated when the write fails.
    pub async fn write(
        &self,
        op: WriteOp<C::Draft, C::Patch>,
    ) -> Result<WriteOutcome<C::Record>, ApiError> {
        let collection = &self.inner.collection;
        let outcome = match op {
            WriteOp::Create(draft) => WriteOutcome::Created(collection.create(draft).await?),
            WriteOp::Update { id, patch } => {
                WriteOutcome::Updated(collection.update(&id, patch).await?)
            }
            WriteOp::Delete { id } => {
                collection.delete(&id).await?;
                WriteOutcome::Deleted { id }
            }
        };
        self.invalidate_collection(collection.name());
        Ok(outcome)
    }

    pub async fn create(&self, draft: C::Draft) -> Result<C::Record, ApiError> {
        match self.write(WriteOp::Create(draft)).await? {
            WriteOutcome::Created(record) | WriteOutcome::Updated(record) => Ok(record),
            WriteOutcome::Deleted { .. } => Err(ApiError::system("Create returned no record")),
        }
    }

    pub async fn update(&self, id: &str, patch: C::Patch) -> Result<C::Record, ApiError> {
        let op = WriteOp::Update {
            id: id.to_string(),
            patch,
        };
        match self.write(op).await? {
            WriteOutcome::Created(record) | WriteOutcome::Updated(record) => Ok(record),
            WriteOutcome::Deleted { .. } => Err(ApiError::system("Update returned no record")),
        }
    }

    pub async fn delete(&self, id: &str) -> Result<(), ApiError> {
        self.write(WriteOp::Delete { id: id.to_string() }).await?;
        Ok(())
    }

    /// Mark every entry of `collection` stale and orphan its in-flight
    /// fetches. Data is kept for display. Returns the number of entries marked.
    pub fn invalidate_collection(&self, collection: &str) -> usize {
        let mut slots = self.inner.slots.lock();
        let mut marked = 0;
        for (key, slot) in slots.iter_mut() {
            if !key.belongs_to(collection) {
                continue;
            }
            slot.generation += 1;
            slot.in_flight = None;
            if matches!(slot.entry.status, CacheStatus::Fresh | CacheStatus::Loading) {
                slot.entry.status = CacheStatus::Stale;
                marked += 1;
            }
        }
        drop(slots);

        self.inner.stats.lock().invalidated += marked as u64;
        debug!(collection, marked, "Invalidated cache entries");
        marked
    }

    /// Drop the data of every entry and orphan in-flight fetches, as when the
    /// records on the other side belong to someone else now.
    pub fn reset(&self) -> usize {
        let mut slots = self.inner.slots.lock();
        let dropped = slots.len();
        for (key, slot) in slots.iter_mut() {
            slot.generation += 1;
            slot.in_flight = None;
            slot.entry = CacheEntry::new(key.clone());
            slot.entry.status = CacheStatus::Stale;
        }
        drop(slots);

        debug!(dropped, "Reset cache");
        dropped
    }

    pub fn invalidate(&self) -> usize {
        self.invalidate_collection(self.inner.collection.name())
    }

    pub fn stats(&self) -> CacheStats {
        let mut stats = self.inner.stats.lock().clone();
        stats.entry_count = self.inner.slots.lock().len() as u64;
        stats
    }
}

impl<C: Collection> Inner<C> {
    /// Spawn the fetch so it completes even if every reader goes away.
    fn start_fetch(inner: &Arc<Self>, key: QueryKey, generation: u64) -> SharedFetch<C::Record> {
        debug!(key = %key, generation, "Fetching");
        let task = tokio::spawn(Arc::clone(inner).fetch(key.clone(), generation));
        async move {
            task.await.unwrap_or_else(|e| {
                CacheEntry::failed(key, ApiError::system(format!("Fetch task failed: {}", e)))
            })
        }
        .boxed()
        .shared()
    }

    async fn fetch(self: Arc<Self>, key: QueryKey, generation: u64) -> CacheEntry<C::Record> {
        let result = self.collection.list(&key.filters).await;

        let mut entry = match result {
            Ok(records) => CacheEntry::fetched(key.clone(), records),
            Err(e) => {
                warn!(key = %key, kind = %e.kind(), error = %e, "Fetch failed");
                CacheEntry::failed(key.clone(), e)
            }
        };

        let mut slots = self.slots.lock();
        match slots.get_mut(&key) {
            Some(slot) if slot.generation == generation => {
                slot.entry = entry.clone();
                slot.in_flight = None;
            }
            _ => {
                drop(slots);
                debug!(key = %key, generation, "Discarding superseded fetch");
                self.stats.lock().discarded += 1;
                if entry.status == CacheStatus::Fresh {
                    entry.status = CacheStatus::Stale;
                }
            }
        }
        entry
    }
}
