//! Ordered request/response transforms applied by [`Transport`](super::Transport).

use std::sync::Arc;

use tracing::{debug, warn};

use super::backend::ApiRequest;
use super::{ApiError, ApiResponse};
use crate::auth::{CredentialStore, LogoutReason};

pub trait RequestMiddleware: Send + Sync {
    fn on_request(&self, request: ApiRequest) -> ApiRequest;
}

pub trait ResponseMiddleware: Send + Sync {
    fn on_response(
        &self,
        request: &ApiRequest,
        result: Result<ApiResponse, ApiError>,
    ) -> Result<ApiResponse, ApiError>;
}

/// JSON content negotiation headers.
pub struct JsonHeaders;

impl RequestMiddleware for JsonHeaders {
    fn on_request(&self, mut request: ApiRequest) -> ApiRequest {
        request.set_header("Accept", "application/json");
        if request.body.is_some() {
            request.set_header("Content-Type", "application/json");
        }
        request
    }
}

/// Attaches the current access token, if there is one.
pub struct BearerAuth {
    credentials: Arc<CredentialStore>,
}

impl BearerAuth {
    pub fn new(credentials: Arc<CredentialStore>) -> Self {
        Self { credentials }
    }
}

impl RequestMiddleware for BearerAuth {
    fn on_request(&self, mut request: ApiRequest) -> ApiRequest {
        if request.anonymous {
            return request;
        }
        let (epoch, credentials) = self.credentials.snapshot();
        request.session_epoch = Some(epoch);
        if let Some(token) = credentials.access_token {
            request.set_header("Authorization", format!("Bearer {}", token));
        }
        request
    }
}

/// Authentication failures can only be fixed by logging in again, so the
/// session is torn down as soon as one is seen. A failure answered to a
/// request from an older session leaves the current one alone.
pub struct LogoutOnAuthFailure {
    credentials: Arc<CredentialStore>,
}

impl LogoutOnAuthFailure {
    pub fn new(credentials: Arc<CredentialStore>) -> Self {
        Self { credentials }
    }
}

impl ResponseMiddleware for LogoutOnAuthFailure {
    fn on_response(
        &self,
        request: &ApiRequest,
        result: Result<ApiResponse, ApiError>,
    ) -> Result<ApiResponse, ApiError> {
        if let Err(ApiError::AuthenticationFailed { ref message, .. }) = result {
            if !request.anonymous {
                warn!(path = %request.path, message = %message, "Authentication failed, logging out");
                let reason = LogoutReason::AuthenticationFailed;
                match request.session_epoch {
                    Some(epoch) => {
                        self.credentials.logout_in_epoch(epoch, reason);
                    }
                    None => self.credentials.logout(reason),
                }
            }
        }
        result
    }
}

/// Structured trace of every exchange.
pub struct TraceResponses;

impl ResponseMiddleware for TraceResponses {
    fn on_response(
        &self,
        request: &ApiRequest,
        result: Result<ApiResponse, ApiError>,
    ) -> Result<ApiResponse, ApiError> {
        match &result {
            Ok(response) => {
                debug!(method = %request.method, path = %request.path, status = response.status, "Response received")
            }
            Err(e) => {
                debug!(method = %request.method, path = %request.path, kind = %e.kind(), status = ?e.http_status(), "Request failed")
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{CredentialUpdate, SessionEvent};

    fn store_with_token() -> Arc<CredentialStore> {
        let store = Arc::new(CredentialStore::in_memory());
        store.set(CredentialUpdate::default().access_token("abc").refresh_token("r"));
        store
    }

    #[test]
    fn test_bearer_attached_when_token_present() {
        let auth = BearerAuth::new(store_with_token());
        let request = auth.on_request(ApiRequest::get("/product/"));
        assert_eq!(request.header("Authorization"), Some("Bearer abc"));
    }

    #[test]
    fn test_bearer_skipped_without_token_or_for_anonymous() {
        let auth = BearerAuth::new(Arc::new(CredentialStore::in_memory()));
        assert!(auth.on_request(ApiRequest::get("/product/")).header("Authorization").is_none());

        let auth = BearerAuth::new(store_with_token());
        let request = auth.on_request(ApiRequest::post("/auth/login/").anonymous());
        assert!(request.header("Authorization").is_none());
    }

    #[test]
    fn test_json_headers() {
        let request = JsonHeaders.on_request(ApiRequest::post("/product/").with_body(serde_json::json!({})));
        assert_eq!(request.header("content-type"), Some("application/json"));
        assert_eq!(request.header("accept"), Some("application/json"));
    }

    #[test]
    fn test_auth_failure_logs_out() {
        let store = store_with_token();
        let mut events = store.subscribe();
        let middleware = LogoutOnAuthFailure::new(store.clone());

        let result = middleware.on_response(
            &ApiRequest::get("/product/"),
            Err(ApiError::authentication("blacklisted")),
        );

        assert!(result.is_err());
        assert_eq!(store.get(), Default::default());
        assert_eq!(
            events.try_recv().ok(),
            Some(SessionEvent::LoggedOut {
                reason: LogoutReason::AuthenticationFailed
            })
        );
    }

    #[test]
    fn test_auth_failure_from_older_session_keeps_new_login() {
        let store = store_with_token();
        let request = BearerAuth::new(store.clone()).on_request(ApiRequest::get("/product/"));
        store.start_session(CredentialUpdate::default().access_token("fresh"));

        let _ = LogoutOnAuthFailure::new(store.clone())
            .on_response(&request, Err(ApiError::authentication("blacklisted")));

        assert_eq!(store.access_token().as_deref(), Some("fresh"));
    }

    #[test]
    fn test_token_expired_does_not_log_out() {
        let store = store_with_token();
        let middleware = LogoutOnAuthFailure::new(store.clone());
        let _ = middleware.on_response(
            &ApiRequest::get("/product/"),
            Err(ApiError::TokenExpired {
                status: Some(401),
                message: "expired".into(),
            }),
        );
        assert_eq!(store.access_token().as_deref(), Some("abc"));
    }
}
