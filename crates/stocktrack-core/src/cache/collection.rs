use async_trait::async_trait;

use super::key::Filters;
use crate::api::ApiError;

/// A remote resource collection the cache can list and write through.
#[async_trait]
pub trait Collection: Send + Sync + 'static {
    type Record: Clone + Send + Sync + 'static;
    type Draft: Send + 'static;
    type Patch: Send + 'static;

    /// Collection name used in cache keys
    fn name(&self) -> &'static str;

    async fn list(&self, filters: &Filters) -> Result<Vec<Self::Record>, ApiError>;

    async fn create(&self, draft: Self::Draft) -> Result<Self::Record, ApiError>;

    async fn update(&self, id: &str, patch: Self::Patch) -> Result<Self::Record, ApiError>;

    async fn delete(&self, id: &str) -> Result<(), ApiError>;
}

#[derive(Debug, Clone)]
pub enum WriteOp<D, P> {
    Create(D),
    Update { id: String, patch: P },
    Delete { id: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum WriteOutcome<R> {
    Created(R),
    Updated(R),
    Deleted { id: String },
}

impl<R> WriteOutcome<R> {
    /// The record the server returned, if the write produced one.
    pub fn record(&self) -> Option<&R> {
        match self {
            WriteOutcome::Created(r) | WriteOutcome::Updated(r) => Some(r),
            WriteOutcome::Deleted { .. } => None,
        }
    }

    pub fn into_record(self) -> Option<R> {
        match self {
            WriteOutcome::Created(r) | WriteOutcome::Updated(r) => Some(r),
            WriteOutcome::Deleted { .. } => None,
        }
    }
}
