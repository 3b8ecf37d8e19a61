//! Top-level handle tying the session to the cached product collection.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use crate::api::{ApiError, HttpBackend, ProductsApi};
use crate::auth::{CredentialStore, Session};
use crate::cache::{CacheEntry, CacheStats, EntityCache};
use crate::config::Config;
use crate::metrics::{self, ForecastPoint, MetricsError};
use crate::models::{Product, ProductDraft, ProductFilters, ProductPatch};

/// Cached records are only valid for the session that fetched them: any
/// login or logout since the last read empties the cache first.
#[derive(Clone)]
pub struct InventoryClient {
    session: Arc<Session>,
    products: EntityCache<ProductsApi>,
    seen_epoch: Arc<AtomicU64>,
}

impl InventoryClient {
    pub fn new(session: Arc<Session>) -> Self {
        let products = EntityCache::new(ProductsApi::new(session.clone()));
        let seen_epoch = Arc::new(AtomicU64::new(session.credentials().epoch()));
        Self {
            session,
            products,
            seen_epoch,
        }
    }

    /// Production client built from `config`, with persisted credentials loaded.
    pub fn connect(config: &Config) -> Result<Self> {
        let session = Arc::new(Session::init(config)?);
        info!(authenticated = session.is_authenticated(), "Inventory client ready");
        Ok(Self::new(session))
    }

    pub fn with_backend(backend: Arc<dyn HttpBackend>, credentials: Arc<CredentialStore>) -> Self {
        Self::new(Arc::new(Session::with_backend(backend, credentials)))
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn products(&self) -> &EntityCache<ProductsApi> {
        &self.products
    }

    pub async fn list_products(&self, filters: &ProductFilters) -> CacheEntry<Product> {
        self.sync_session();
        self.products.read(filters.to_filters()).await
    }

    pub async fn get_product(&self, id: &str) -> Result<Product, ApiError> {
        self.products.collection().get(id).await
    }

    pub async fn add_product(&self, draft: ProductDraft) -> Result<Product, ApiError> {
        self.products.create(draft).await
    }

    pub async fn update_product(&self, id: &str, patch: ProductPatch) -> Result<Product, ApiError> {
        self.products.update(id, patch).await
    }

    pub async fn delete_product(&self, id: &str) -> Result<(), ApiError> {
        self.products.delete(id).await
    }

    /// Demand comparison for the listed products with the given ids, in list order.
    pub async fn compare(&self, ids: &[String]) -> Result<Vec<ForecastPoint>, CompareError> {
        self.sync_session();
        let entry = self.products.read(ProductFilters::default().to_filters()).await;
        let all = entry.result().map_err(CompareError::Api)?;
        let chosen: Vec<Product> = all
            .iter()
            .filter(|p| ids.contains(&p.id))
            .cloned()
            .collect();
        metrics::compare_products(&chosen).map_err(CompareError::Metrics)
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.products.stats()
    }

    fn sync_session(&self) {
        let epoch = self.session.credentials().epoch();
        if self.seen_epoch.swap(epoch, Ordering::SeqCst) != epoch {
            let dropped = self.products.reset();
            info!(epoch, dropped, "Session changed, dropped cached products");
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CompareError {
    #[error(transparent)]
    Api(ApiError),
    #[error(transparent)]
    Metrics(MetricsError),
}
