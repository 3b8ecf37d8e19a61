//! Single-flight access token refresh.
//!
//! Any number of requests can fail with an expired token at the same time;
//! the first one to report it starts a refresh and the rest attach to it.
//! One refresh HTTP call is made per episode, never one per request.
//!
//! An episode belongs to the session epoch it started in. If a login or
//! logout happens while it runs, its result is dropped: it neither stores
//! tokens nor logs the newer session out.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::credentials::{CredentialStore, CredentialUpdate, LogoutReason, SessionEvent};
use crate::api::{ApiError, ApiRequest, Transport, REFRESH_PATH};
use crate::models::{RefreshRequest, RefreshResponse};

/// Upper bound on a refresh call so the coordinator cannot stay `Refreshing` forever.
pub const DEFAULT_REFRESH_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshState {
    Idle,
    Refreshing,
    /// The refresh endpoint itself failed; nothing more is attempted until
    /// the next login.
    Exhausted,
}

type SharedRefresh = Shared<BoxFuture<'static, Result<(), ApiError>>>;

enum Phase {
    Idle,
    Refreshing { episode: u64, shared: SharedRefresh },
    Exhausted,
}

/// How a refresh episode ended.
enum Outcome {
    Refreshed,
    /// Refresh token missing, rejected or timed out
    Rejected(String),
    /// The refresh call hit a non-token error
    Failed(ApiError),
    /// A login or logout happened while the call was out
    Superseded,
}

#[derive(Clone)]
pub struct RefreshCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    transport: Transport,
    credentials: Arc<CredentialStore>,
    timeout: Duration,
    phase: Mutex<Phase>,
    episodes: AtomicU64,
    refresh_calls: AtomicU64,
}

impl RefreshCoordinator {
    pub fn new(transport: Transport, credentials: Arc<CredentialStore>, timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport,
                credentials,
                timeout,
                phase: Mutex::new(Phase::Idle),
                episodes: AtomicU64::new(0),
                refresh_calls: AtomicU64::new(0),
            }),
        }
    }

    pub fn state(&self) -> RefreshState {
        match *self.inner.phase.lock() {
            Phase::Idle => RefreshState::Idle,
            Phase::Refreshing { .. } => RefreshState::Refreshing,
            Phase::Exhausted => RefreshState::Exhausted,
        }
    }

    /// Number of refresh HTTP calls issued so far.
    pub fn refresh_calls(&self) -> u64 {
        self.inner.refresh_calls.load(Ordering::Relaxed)
    }

    /// Back to `Idle` for a new session. An in-flight refresh is detached:
    /// its waiters still get its result, but the next caller starts over.
    pub fn reset(&self) {
        *self.inner.phase.lock() = Phase::Idle;
    }

    /// Refresh the access token, or join the refresh already under way.
    ///
    /// Resolves `Ok(())` once a new access token is stored; every failure
    /// resolves to [`ApiError::AuthenticationFailed`] with credentials cleared,
    /// unless a login or logout already replaced the session it started in.
    pub async fn refresh(&self) -> Result<(), ApiError> {
        let shared = {
            let mut phase = self.inner.phase.lock();
            match &*phase {
                Phase::Refreshing { shared, .. } => {
                    debug!("Joining in-flight token refresh");
                    shared.clone()
                }
                Phase::Exhausted => {
                    return Err(ApiError::authentication(
                        "Session could not be renewed. Please log in again.",
                    ));
                }
                Phase::Idle => {
                    let episode = self.inner.episodes.fetch_add(1, Ordering::Relaxed);
                    let shared = Inner::start(Arc::clone(&self.inner), episode);
                    *phase = Phase::Refreshing {
                        episode,
                        shared: shared.clone(),
                    };
                    shared
                }
            }
        };
        shared.await
    }
}

impl Inner {
    /// Runs on its own task so it finishes even if every waiter goes away.
    fn start(inner: Arc<Inner>, episode: u64) -> SharedRefresh {
        let (epoch, credentials) = inner.credentials.snapshot();
        info!(episode, epoch, "Starting token refresh");
        let handle = tokio::spawn(inner.run(episode, epoch, credentials.refresh_token));
        async move {
            handle.await.unwrap_or_else(|e| {
                Err(ApiError::system(format!("Token refresh task failed: {}", e)))
            })
        }
        .boxed()
        .shared()
    }

    async fn run(
        self: Arc<Self>,
        episode: u64,
        epoch: u64,
        refresh_token: Option<String>,
    ) -> Result<(), ApiError> {
        let outcome = match refresh_token {
            None => Outcome::Rejected("No refresh token available".to_string()),
            Some(token) => {
                self.refresh_calls.fetch_add(1, Ordering::Relaxed);
                match tokio::time::timeout(self.timeout, self.call_refresh(token)).await {
                    Ok(Ok(tokens)) => {
                        let mut update = CredentialUpdate::default().access_token(tokens.access);
                        update.refresh_token = tokens.refresh;
                        if self.credentials.set_in_epoch(epoch, update) {
                            Outcome::Refreshed
                        } else {
                            Outcome::Superseded
                        }
                    }
                    Ok(Err(e)) if e.is_token_error() => Outcome::Rejected(e.message().to_string()),
                    Ok(Err(e)) => Outcome::Failed(e),
                    Err(_) => Outcome::Rejected("Token refresh timed out".to_string()),
                }
            }
        };

        let (next, result) = match outcome {
            Outcome::Refreshed => {
                info!("Token refresh succeeded");
                self.credentials.emit(SessionEvent::TokenRefreshed);
                (Phase::Idle, Ok(()))
            }
            Outcome::Rejected(reason) => {
                warn!(reason = %reason, "Token refresh rejected, logging out");
                if self.credentials.logout_in_epoch(epoch, LogoutReason::RefreshFailed) {
                    (
                        Phase::Idle,
                        Err(ApiError::authentication("Session expired. Please log in again.")),
                    )
                } else {
                    (Phase::Idle, Err(Self::superseded()))
                }
            }
            Outcome::Failed(e) => {
                warn!(kind = %e.kind(), error = %e, "Token refresh call failed, logging out");
                if self.credentials.logout_in_epoch(epoch, LogoutReason::RefreshFailed) {
                    (
                        Phase::Exhausted,
                        Err(ApiError::authentication(format!(
                            "Session could not be renewed: {}",
                            e.message()
                        ))),
                    )
                } else {
                    (Phase::Idle, Err(Self::superseded()))
                }
            }
            Outcome::Superseded => {
                debug!(epoch, "Session changed during token refresh, dropping result");
                (Phase::Idle, Err(Self::superseded()))
            }
        };

        let mut phase = self.phase.lock();
        if matches!(*phase, Phase::Refreshing { episode: current, .. } if current == episode) {
            *phase = next;
        }
        result
    }

    fn superseded() -> ApiError {
        ApiError::authentication("Session changed while the token was being renewed.")
    }

    async fn call_refresh(&self, refresh_token: String) -> Result<RefreshResponse, ApiError> {
        let request = ApiRequest::post(REFRESH_PATH)
            .with_json(&RefreshRequest {
                refresh: refresh_token,
            })
            .map_err(|e| ApiError::system(e.to_string()))?
            .anonymous();

        let response = self.transport.send(request).await?;
        response.data()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::HttpResponse;
    use crate::testing::{expired_body, ScriptedBackend};

    fn setup(backend: Arc<ScriptedBackend>) -> (RefreshCoordinator, Arc<CredentialStore>) {
        let credentials = Arc::new(CredentialStore::in_memory());
        credentials.set(
            CredentialUpdate::default()
                .access_token("old")
                .refresh_token("r1")
                .display_name("ann"),
        );
        let transport = Transport::new(backend, credentials.clone());
        let coordinator = RefreshCoordinator::new(
            transport,
            credentials.clone(),
            Duration::from_secs(DEFAULT_REFRESH_TIMEOUT_SECS),
        );
        (coordinator, credentials)
    }

    #[tokio::test]
    async fn test_concurrent_refreshes_share_one_call() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.respond("POST", REFRESH_PATH, |_| {
            Ok(HttpResponse::new(200, r#"{"data": {"access": "new"}}"#))
        });
        let (coordinator, credentials) = setup(backend.clone());

        let results = futures::future::join_all((0..5).map(|_| coordinator.refresh())).await;

        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(backend.calls("POST", REFRESH_PATH), 1);
        assert_eq!(coordinator.refresh_calls(), 1);
        assert_eq!(credentials.access_token().as_deref(), Some("new"));
        assert_eq!(credentials.refresh_token().as_deref(), Some("r1"));
        assert_eq!(coordinator.state(), RefreshState::Idle);
    }

    #[tokio::test]
    async fn test_refresh_sends_stored_token_without_bearer() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.respond("POST", REFRESH_PATH, |_| {
            Ok(HttpResponse::new(200, r#"{"data": {"access": "new", "refresh": "r2"}}"#))
        });
        let (coordinator, credentials) = setup(backend.clone());

        coordinator.refresh().await.expect("refresh succeeds");

        let sent = &backend.requests()[0];
        assert!(sent.header("Authorization").is_none());
        assert_eq!(sent.body, Some(serde_json::json!({"refresh": "r1"})));
        assert_eq!(credentials.refresh_token().as_deref(), Some("r2"));
    }

    #[tokio::test]
    async fn test_rejected_refresh_logs_out_and_returns_idle() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.respond("POST", REFRESH_PATH, |_| Ok(HttpResponse::new(401, expired_body())));
        let (coordinator, credentials) = setup(backend.clone());
        let mut events = credentials.subscribe();

        let results = futures::future::join_all((0..3).map(|_| coordinator.refresh())).await;

        for result in results {
            let err = result.expect_err("refresh must fail");
            assert_eq!(err.kind(), crate::api::ErrorKind::AuthenticationFailed);
        }
        assert_eq!(backend.calls("POST", REFRESH_PATH), 1);
        assert!(credentials.get().is_empty());
        assert_eq!(coordinator.state(), RefreshState::Idle);
        assert_eq!(
            events.try_recv().ok(),
            Some(SessionEvent::LoggedOut {
                reason: LogoutReason::RefreshFailed
            })
        );
    }

    #[tokio::test]
    async fn test_missing_refresh_token_makes_no_call() {
        let backend = Arc::new(ScriptedBackend::new());
        let credentials = Arc::new(CredentialStore::in_memory());
        credentials.set(CredentialUpdate::default().access_token("old"));
        let transport = Transport::new(backend.clone(), credentials.clone());
        let coordinator = RefreshCoordinator::new(transport, credentials.clone(), Duration::from_secs(1));

        let err = coordinator.refresh().await.expect_err("no refresh token");
        assert_eq!(err.kind(), crate::api::ErrorKind::AuthenticationFailed);
        assert_eq!(backend.total_calls(), 0);
        assert!(credentials.get().is_empty());
    }

    #[tokio::test]
    async fn test_server_failure_exhausts_until_reset() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.respond("POST", REFRESH_PATH, |_| Ok(HttpResponse::new(503, "down")));
        let (coordinator, credentials) = setup(backend.clone());

        assert!(coordinator.refresh().await.is_err());
        assert_eq!(coordinator.state(), RefreshState::Exhausted);
        assert!(credentials.get().is_empty());

        // No further network calls while exhausted
        credentials.set(CredentialUpdate::default().refresh_token("r9"));
        assert!(coordinator.refresh().await.is_err());
        assert_eq!(backend.calls("POST", REFRESH_PATH), 1);

        coordinator.reset();
        assert_eq!(coordinator.state(), RefreshState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_timeout_is_a_failure() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.respond_delayed("POST", REFRESH_PATH, Duration::from_secs(60), |_| {
            Ok(HttpResponse::new(200, r#"{"data": {"access": "late"}}"#))
        });
        let (coordinator, credentials) = setup(backend);

        let err = coordinator.refresh().await.expect_err("timed out");
        assert_eq!(err.kind(), crate::api::ErrorKind::AuthenticationFailed);
        assert_eq!(coordinator.state(), RefreshState::Idle);
        assert!(credentials.access_token().is_none());
    }

    #[tokio::test]
    async fn test_refresh_survives_cancelled_caller() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.respond("POST", REFRESH_PATH, |_| {
            Ok(HttpResponse::new(200, r#"{"data": {"access": "new"}}"#))
        });
        let (coordinator, credentials) = setup(backend.clone());

        // Poll once so the refresh starts, then drop the caller
        {
            let fut = coordinator.refresh();
            futures::pin_mut!(fut);
            assert!(futures::poll!(fut.as_mut()).is_pending());
        }

        // The spawned task still completes and a later caller sees Idle
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(credentials.access_token().as_deref(), Some("new"));
        assert_eq!(coordinator.state(), RefreshState::Idle);
    }
}
