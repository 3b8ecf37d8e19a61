//! Request dispatch: middleware, rate-limit backoff and error classification.

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use super::backend::{ApiRequest, HttpBackend};
use super::middleware::{
    BearerAuth, JsonHeaders, LogoutOnAuthFailure, RequestMiddleware, ResponseMiddleware,
    TraceResponses,
};
use super::{ApiError, ApiResponse};
use crate::auth::CredentialStore;

/// Maximum number of retries for rate-limited (429) requests.
pub const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
pub const INITIAL_BACKOFF_MS: u64 = 1000;

const TOO_MANY_REQUESTS: u16 = 429;

/// Sends requests and resolves every call to a success or one [`ApiError`].
/// Clone is cheap; the backend and middleware are shared.
#[derive(Clone)]
pub struct Transport {
    backend: Arc<dyn HttpBackend>,
    request_chain: Vec<Arc<dyn RequestMiddleware>>,
    response_chain: Vec<Arc<dyn ResponseMiddleware>>,
    rate_limit_retries: u32,
    initial_backoff: Duration,
}

impl Transport {
    /// Transport with the default chain: JSON headers, bearer auth,
    /// tracing and logout-on-auth-failure.
    pub fn new(backend: Arc<dyn HttpBackend>, credentials: Arc<CredentialStore>) -> Self {
        Self::bare(backend)
            .with_request_middleware(Arc::new(JsonHeaders))
            .with_request_middleware(Arc::new(BearerAuth::new(credentials.clone())))
            .with_response_middleware(Arc::new(TraceResponses))
            .with_response_middleware(Arc::new(LogoutOnAuthFailure::new(credentials)))
    }

    /// Transport with no middleware at all.
    pub fn bare(backend: Arc<dyn HttpBackend>) -> Self {
        Self {
            backend,
            request_chain: Vec::new(),
            response_chain: Vec::new(),
            rate_limit_retries: MAX_RATE_LIMIT_RETRIES,
            initial_backoff: Duration::from_millis(INITIAL_BACKOFF_MS),
        }
    }

    pub fn with_request_middleware(mut self, middleware: Arc<dyn RequestMiddleware>) -> Self {
        self.request_chain.push(middleware);
        self
    }

    pub fn with_response_middleware(mut self, middleware: Arc<dyn ResponseMiddleware>) -> Self {
        self.response_chain.push(middleware);
        self
    }

    pub fn with_rate_limit(mut self, retries: u32, initial_backoff: Duration) -> Self {
        self.rate_limit_retries = retries;
        self.initial_backoff = initial_backoff;
        self
    }

    pub async fn send(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        let request = self
            .request_chain
            .iter()
            .fold(request, |req, middleware| middleware.on_request(req));

        let result = self.dispatch(&request).await;

        self.response_chain
            .iter()
            .fold(result, |res, middleware| middleware.on_response(&request, res))
    }

    async fn dispatch(&self, request: &ApiRequest) -> Result<ApiResponse, ApiError> {
        let mut retries = 0;
        let mut backoff = self.initial_backoff;

        loop {
            let response = self.backend.execute(request).await?;

            if response.status == TOO_MANY_REQUESTS && retries < self.rate_limit_retries {
                retries += 1;
                warn!(
                    path = %request.path,
                    retry = retries,
                    backoff_ms = backoff.as_millis() as u64,
                    "Rate limited, backing off"
                );
                tokio::time::sleep(backoff).await;
                backoff *= 2; // Exponential backoff
                continue;
            }

            return ApiResponse::from_http(response);
        }
    }
}
