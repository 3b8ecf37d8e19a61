use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::{ApiError, ApiRequest, PRODUCT_PATH};
use crate::auth::Session;
use crate::cache::{Collection, Filters};
use crate::models::{Product, ProductDraft, ProductPatch};

/// The `product` collection over the authorized session.
#[derive(Clone)]
pub struct ProductsApi {
    session: Arc<Session>,
}

impl ProductsApi {
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }

    /// The id is one path segment, whatever characters it holds.
    fn item_path(id: &str) -> String {
        format!("{}{}/", PRODUCT_PATH, urlencoding::encode(id))
    }

    /// A single product, bypassing any cache.
    pub async fn get(&self, id: &str) -> Result<Product, ApiError> {
        let response = self.session.execute(ApiRequest::get(Self::item_path(id))).await?;
        response.data()
    }
}

#[async_trait]
impl Collection for ProductsApi {
    type Record = Product;
    type Draft = ProductDraft;
    type Patch = ProductPatch;

    fn name(&self) -> &'static str {
        "product"
    }

    async fn list(&self, filters: &Filters) -> Result<Vec<Product>, ApiError> {
        let request = ApiRequest::get(PRODUCT_PATH)
            .with_query(filters.iter().map(|(k, v)| (k.clone(), v.clone())));
        let response = self.session.execute(request).await?;
        let products: Vec<Product> = response.data()?;
        debug!(count = products.len(), "Fetched products");
        Ok(products)
    }

    async fn create(&self, draft: ProductDraft) -> Result<Product, ApiError> {
        draft.validate()?;
        let request = ApiRequest::post(PRODUCT_PATH)
            .with_json(&draft)
            .map_err(|e| ApiError::system(e.to_string()))?;
        self.session.execute(request).await?.data()
    }

    async fn update(&self, id: &str, patch: ProductPatch) -> Result<Product, ApiError> {
        patch.validate()?;
        let request = ApiRequest::put(Self::item_path(id))
            .with_json(&patch)
            .map_err(|e| ApiError::system(e.to_string()))?;
        self.session.execute(request).await?.data()
    }

    async fn delete(&self, id: &str) -> Result<(), ApiError> {
        self.session
            .execute(ApiRequest::delete(Self::item_path(id)))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ErrorKind, HttpResponse};
    use crate::auth::{CredentialStore, CredentialUpdate};
    use crate::cache::{CacheStatus, EntityCache};
    use crate::models::{Category, ProductFilters};
    use crate::testing::{ok_body, ScriptedBackend};
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn product_json(id: &str, name: &str) -> serde_json::Value {
        json!({
            "id": id,
            "name": name,
            "description": "",
            "cost_price": "1.00",
            "selling_price": "2.50",
            "category": "books",
            "stock_available": 3,
            "units_sold": 1,
            "customer_rating": null,
            "demand_forecast": null,
            "optimized_price": null,
            "profit_margin": 150.0,
            "created_at": "2024-05-01T10:00:00Z",
            "updated_at": "2024-05-01T10:00:00Z"
        })
    }

    fn api(backend: Arc<ScriptedBackend>) -> ProductsApi {
        let credentials = Arc::new(CredentialStore::in_memory());
        credentials.set(CredentialUpdate::default().access_token("tok").refresh_token("r"));
        ProductsApi::new(Arc::new(Session::with_backend(backend, credentials)))
    }

    #[tokio::test]
    async fn test_list_sends_filters_as_query() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.respond("GET", PRODUCT_PATH, |_| {
            Ok(HttpResponse::new(200, ok_body(json!([product_json("a", "Atlas")]))))
        });
        let products = api(backend.clone());

        let filters = ProductFilters::default()
            .category(Category::Books)
            .search("atl")
            .to_filters();
        let list = products.list(&filters).await.expect("listed");

        assert_eq!(list.len(), 1);
        assert_eq!(list[0].name, "Atlas");
        let sent = &backend.requests()[0];
        assert_eq!(
            sent.query,
            vec![
                ("category".to_string(), "books".to_string()),
                ("search".to_string(), "atl".to_string())
            ]
        );
        assert_eq!(sent.header("Authorization"), Some("Bearer tok"));
    }

    #[tokio::test]
    async fn test_unexpected_record_shape_is_validation_error() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.respond("GET", PRODUCT_PATH, |_| {
            Ok(HttpResponse::new(200, ok_body(json!([{"id": "a", "title": "x"}]))))
        });

        let err = api(backend).list(&Filters::new()).await.expect_err("bad shape");
        assert_eq!(err.kind(), ErrorKind::ValidationError);
    }

    #[tokio::test]
    async fn test_invalid_draft_never_reaches_network() {
        let backend = Arc::new(ScriptedBackend::new());
        let err = api(backend.clone())
            .create(ProductDraft::new("Pen", dec!(3), dec!(2)))
            .await
            .expect_err("selling below cost");
        assert_eq!(err.kind(), ErrorKind::ValidationError);
        assert_eq!(backend.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_server_field_errors_surface() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.respond("POST", PRODUCT_PATH, |_| {
            Ok(HttpResponse::new(
                400,
                r#"{"meta": {"message": "Validation failed."}, "errors": {"name": ["This field may not be blank."]}}"#,
            ))
        });

        let err = api(backend)
            .create(ProductDraft::new("Pen", dec!(1), dec!(2)))
            .await
            .expect_err("400");
        let ApiError::ValidationError { message, fields, .. } = err else {
            panic!("expected validation error");
        };
        assert_eq!(message, "Validation failed.");
        assert_eq!(fields.unwrap()["name"][0], "This field may not be blank.");
    }

    #[tokio::test]
    async fn test_update_and_delete_paths() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.respond("PUT", "/product/a/", |req| {
            assert_eq!(req.body, Some(json!({"units_sold": 7})));
            Ok(HttpResponse::new(200, ok_body(product_json("a", "Atlas"))))
        });
        backend.respond("DELETE", "/product/a/", |_| Ok(HttpResponse::new(204, "")));
        let products = api(backend.clone());

        let patch = ProductPatch {
            units_sold: Some(7),
            ..ProductPatch::default()
        };
        let updated = products.update("a", patch).await.expect("updated");
        assert_eq!(updated.id, "a");
        products.delete("a").await.expect("deleted");
        assert_eq!(backend.calls("DELETE", "/product/a/"), 1);
    }

    #[tokio::test]
    async fn test_id_is_escaped_into_one_segment() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.respond("DELETE", "/product/a%2Fb%3Fx%3D1/", |_| Ok(HttpResponse::new(204, "")));
        let products = api(backend.clone());

        products.delete("a/b?x=1").await.expect("deleted");
        assert_eq!(backend.requests()[0].path, "/product/a%2Fb%3Fx%3D1/");
        assert!(backend.requests()[0].query.is_empty());
    }

    #[tokio::test]
    async fn test_cache_refetches_after_create() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.respond("GET", PRODUCT_PATH, |_| {
            Ok(HttpResponse::new(200, ok_body(json!([product_json("a", "Atlas")]))))
        });
        backend.respond("POST", PRODUCT_PATH, |_| {
            Ok(HttpResponse::new(201, ok_body(product_json("b", "Bible"))))
        });
        let cache = EntityCache::new(api(backend.clone()));

        let books = ProductFilters::default().category(Category::Books).to_filters();
        cache.read(Filters::new()).await;
        cache.read(books.clone()).await;
        cache
            .create(ProductDraft::new("Bible", dec!(1), dec!(2)))
            .await
            .expect("created");

        assert_eq!(cache.peek(books.clone()).unwrap().status, CacheStatus::Stale);
        assert!(cache.read(books.clone()).await.is_fresh());
        cache.read(books).await;
        assert_eq!(backend.calls("GET", PRODUCT_PATH), 3);
    }
}
