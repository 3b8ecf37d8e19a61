use chrono::{DateTime, Utc};

use super::key::QueryKey;
use crate::api::ApiError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    /// A fetch is in flight; `data` still holds the previous result, if any.
    Loading,
    Fresh,
    /// Needs a refetch: a write on the collection or a change of session
    /// happened since this data was fetched.
    Stale,
    Errored,
}

/// One cached query result.
#[derive(Debug, Clone)]
pub struct CacheEntry<R> {
    pub key: QueryKey,
    pub data: Option<Vec<R>>,
    pub status: CacheStatus,
    pub last_error: Option<ApiError>,
    pub fetched_at: Option<DateTime<Utc>>,
}

impl<R> CacheEntry<R> {
    pub fn new(key: QueryKey) -> Self {
        Self {
            key,
            data: None,
            status: CacheStatus::Loading,
            last_error: None,
            fetched_at: None,
        }
    }

    pub(crate) fn fetched(key: QueryKey, data: Vec<R>) -> Self {
        Self {
            key,
            data: Some(data),
            status: CacheStatus::Fresh,
            last_error: None,
            fetched_at: Some(Utc::now()),
        }
    }

    pub(crate) fn failed(key: QueryKey, error: ApiError) -> Self {
        Self {
            key,
            data: None,
            status: CacheStatus::Errored,
            last_error: Some(error),
            fetched_at: Some(Utc::now()),
        }
    }

    pub fn is_fresh(&self) -> bool {
        self.status == CacheStatus::Fresh
    }

    pub fn records(&self) -> &[R] {
        self.data.as_deref().unwrap_or(&[])
    }

    /// The records, or the error that replaced them.
    pub fn result(&self) -> Result<&[R], ApiError> {
        match (&self.data, &self.last_error) {
            (Some(data), _) => Ok(data),
            (None, Some(error)) => Err(error.clone()),
            (None, None) => Ok(&[]),
        }
    }

    pub fn age_minutes(&self) -> Option<i64> {
        self.fetched_at.map(|at| (Utc::now() - at).num_minutes())
    }

    pub fn age_display(&self) -> Option<String> {
        self.age_minutes().map(format_age)
    }
}

/// Display units, largest first: minutes per unit and suffix.
const AGE_UNITS: [(i64, &str); 3] = [(1440, "d"), (60, "h"), (1, "m")];

/// Relative age for display: "just now", "5m ago", "2h ago", "3d ago".
/// Hours and days round to the nearest whole unit.
pub fn format_age(minutes: i64) -> String {
    AGE_UNITS
        .iter()
        .find(|(size, _)| minutes >= *size)
        .map(|(size, suffix)| format!("{}{} ago", (minutes + size / 2) / size, suffix))
        .unwrap_or_else(|| "just now".to_string())
}

/// Counters for one entity cache.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Reads answered from a fresh entry
    pub hits: u64,
    /// Reads that started a fetch
    pub misses: u64,
    /// Reads that joined a fetch already in flight
    pub deduplicated: u64,
    /// Fetch results dropped because a write superseded them
    pub discarded: u64,
    /// Entries marked stale by writes
    pub invalidated: u64,
    pub entry_count: u64,
}

impl CacheStats {
    /// Fraction of reads served without a new fetch (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses + self.deduplicated;
        if total == 0 {
            0.0
        } else {
            (self.hits + self.deduplicated) as f64 / total as f64
        }
    }
}
