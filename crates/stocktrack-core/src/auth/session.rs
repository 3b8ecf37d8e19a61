use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::credentials::{CredentialStore, CredentialUpdate, LogoutReason, SessionEvent};
use super::refresh::{RefreshCoordinator, RefreshState, DEFAULT_REFRESH_TIMEOUT_SECS};
use crate::api::{
    ApiError, ApiRequest, ApiResponse, HttpBackend, ReqwestBackend, RetryDecision, RetryPolicy,
    Transport, LOGIN_PATH, REGISTER_PATH,
};
use crate::config::Config;
use crate::models::{LoginRequest, LoginResponse, RegisterRequest};

const SESSION_EXPIRED_MESSAGE: &str = "Session expired. Please log in again.";

/// An authenticated connection to the inventory API.
///
/// Owns the credential store, the transport and the refresh coordinator.
/// Share it behind an `Arc`; every method takes `&self`.
pub struct Session {
    transport: Transport,
    credentials: Arc<CredentialStore>,
    coordinator: RefreshCoordinator,
    retry: RetryPolicy,
}

impl Session {
    pub fn new(transport: Transport, credentials: Arc<CredentialStore>, refresh_timeout: Duration) -> Self {
        let coordinator =
            RefreshCoordinator::new(transport.clone(), credentials.clone(), refresh_timeout);
        Self {
            transport,
            credentials,
            coordinator,
            retry: RetryPolicy::default(),
        }
    }

    /// Session over `backend` with the default middleware chain.
    pub fn with_backend(backend: Arc<dyn HttpBackend>, credentials: Arc<CredentialStore>) -> Self {
        let transport = Transport::new(backend, credentials.clone());
        Self::new(
            transport,
            credentials,
            Duration::from_secs(DEFAULT_REFRESH_TIMEOUT_SECS),
        )
    }

    /// Build the production session and load persisted credentials.
    pub fn init(config: &Config) -> Result<Self> {
        let backend = ReqwestBackend::new(
            config.api_base_url(),
            Duration::from_secs(config.request_timeout_secs),
        )?;
        let credentials = Arc::new(CredentialStore::load(config.credential_storage()?));
        let transport = Transport::new(Arc::new(backend), credentials.clone()).with_rate_limit(
            config.rate_limit_retries,
            Duration::from_millis(config.initial_backoff_ms),
        );

        info!(
            base_url = %config.api_base_url(),
            authenticated = credentials.access_token().is_some(),
            "Session initialized"
        );
        Ok(Self::new(
            transport,
            credentials,
            Duration::from_secs(config.refresh_timeout_secs),
        ))
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Create an account. Returns the server's confirmation message.
    pub async fn register(&self, username: &str, email: &str, password: &str) -> Result<String, ApiError> {
        let request = ApiRequest::post(REGISTER_PATH)
            .with_json(&RegisterRequest {
                username: username.to_string(),
                email: email.to_string(),
                password: password.to_string(),
            })
            .map_err(|e| ApiError::system(e.to_string()))?
            .anonymous();

        let response = self.transport.send(request).await?;
        info!(username, "Registered");
        Ok(response
            .message()
            .unwrap_or("Registration successful")
            .to_string())
    }

    /// Log in and store the returned tokens. Returns the display name.
    pub async fn login(&self, username: &str, password: &str) -> Result<String, ApiError> {
        debug!(username, "Logging in");
        let request = ApiRequest::post(LOGIN_PATH)
            .with_json(&LoginRequest {
                username: username.to_string(),
                password: password.to_string(),
            })
            .map_err(|e| ApiError::system(e.to_string()))?
            .anonymous();

        let response = self.transport.send(request).await?;
        let tokens: LoginResponse = response.data()?;
        let name = if tokens.name.is_empty() {
            username.to_string()
        } else {
            tokens.name
        };

        // New epoch first, so a refresh from the previous session cannot land
        self.credentials.start_session(
            CredentialUpdate::default()
                .access_token(tokens.access)
                .refresh_token(tokens.refresh)
                .display_name(name.clone()),
        );
        self.coordinator.reset();
        self.credentials.emit(SessionEvent::LoggedIn {
            display_name: Some(name.clone()),
        });

        info!(display_name = %name, "Logged in");
        Ok(name)
    }

    /// Renew the access token now, sharing any refresh already in flight.
    pub async fn refresh(&self) -> Result<(), ApiError> {
        self.coordinator.refresh().await
    }

    pub fn logout(&self) {
        self.credentials.logout(LogoutReason::UserRequested);
        self.coordinator.reset();
        info!("Logged out");
    }

    pub fn is_authenticated(&self) -> bool {
        self.credentials.access_token().is_some()
    }

    pub fn display_name(&self) -> Option<String> {
        self.credentials.display_name()
    }

    pub fn credentials(&self) -> &Arc<CredentialStore> {
        &self.credentials
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.credentials.subscribe()
    }

    pub fn refresh_state(&self) -> RefreshState {
        self.coordinator.state()
    }

    pub fn refresh_calls(&self) -> u64 {
        self.coordinator.refresh_calls()
    }

    /// Send an authorized request, refreshing and replaying on token expiry.
    pub async fn execute(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        let mut replays = 0;
        loop {
            let (epoch, sent) = self.credentials.snapshot();
            let sent_with = sent.access_token;
            let error = match self.transport.send(request.clone()).await {
                Ok(response) => return Ok(response),
                Err(e) => e,
            };

            match self.retry.decide(&error, replays) {
                RetryDecision::Propagate => return Err(error),
                RetryDecision::Refresh => {
                    replays += 1;
                    // Someone else already refreshed after this request went out
                    let current = self.credentials.access_token();
                    if current.is_some() && current != sent_with {
                        debug!(path = %request.path, "Token already renewed, replaying");
                        continue;
                    }
                    debug!(path = %request.path, replay = replays, "Access token expired, refreshing");
                    self.coordinator.refresh().await?;
                }
                RetryDecision::GiveUp => {
                    warn!(path = %request.path, "Token still rejected after refresh");
                    self.credentials.logout_in_epoch(epoch, LogoutReason::RetryExhausted);
                    return Err(ApiError::AuthenticationFailed {
                        status: error.http_status(),
                        message: SESSION_EXPIRED_MESSAGE.to_string(),
                    });
                }
            }
        }
    }
}
