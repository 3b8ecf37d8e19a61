//! Scripted HTTP backend for unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::api::{ApiRequest, BackendError, HttpBackend, HttpResponse};

type Handler = Arc<dyn Fn(&ApiRequest) -> Result<HttpResponse, BackendError> + Send + Sync>;

struct Route {
    handler: Handler,
    delay: Option<Duration>,
}

/// Answers requests from per-route handlers and records everything it sees.
/// Unscripted routes answer 404.
#[derive(Default)]
pub struct ScriptedBackend {
    routes: Mutex<HashMap<(String, String), Route>>,
    sequences: Mutex<HashMap<(String, String), VecDeque<HttpResponse>>>,
    seen: Mutex<Vec<ApiRequest>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond<F>(&self, method: &str, path: &str, handler: F)
    where
        F: Fn(&ApiRequest) -> Result<HttpResponse, BackendError> + Send + Sync + 'static,
    {
        self.routes.lock().insert(
            (method.to_string(), path.to_string()),
            Route {
                handler: Arc::new(handler),
                delay: None,
            },
        );
    }

    /// Like `respond`, but sleeps before answering.
    pub fn respond_delayed<F>(&self, method: &str, path: &str, delay: Duration, handler: F)
    where
        F: Fn(&ApiRequest) -> Result<HttpResponse, BackendError> + Send + Sync + 'static,
    {
        self.routes.lock().insert(
            (method.to_string(), path.to_string()),
            Route {
                handler: Arc::new(handler),
                delay: Some(delay),
            },
        );
    }

    /// Answers in order; once drained the route falls back to `respond`.
    pub fn respond_sequence(&self, method: &str, path: &str, responses: Vec<HttpResponse>) {
        self.sequences
            .lock()
            .insert((method.to_string(), path.to_string()), responses.into());
    }

    pub fn requests(&self) -> Vec<ApiRequest> {
        self.seen.lock().clone()
    }

    pub fn calls(&self, method: &str, path: &str) -> usize {
        self.seen
            .lock()
            .iter()
            .filter(|r| r.method.as_str() == method && r.path == path)
            .count()
    }

    pub fn total_calls(&self) -> usize {
        self.seen.lock().len()
    }
}

#[async_trait]
impl HttpBackend for ScriptedBackend {
    async fn execute(&self, request: &ApiRequest) -> Result<HttpResponse, BackendError> {
        self.seen.lock().push(request.clone());
        let key = (request.method.as_str().to_string(), request.path.clone());

        let queued = self
            .sequences
            .lock()
            .get_mut(&key)
            .and_then(|queue| queue.pop_front());
        if let Some(response) = queued {
            return Ok(response);
        }

        let route = self
            .routes
            .lock()
            .get(&key)
            .map(|route| (route.handler.clone(), route.delay));
        match route {
            Some((handler, delay)) => {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                handler(request)
            }
            None => Ok(HttpResponse::new(404, r#"{"detail": "Not found."}"#)),
        }
    }
}

/// 401 body for an expired access token.
pub fn expired_body() -> &'static str {
    r#"{"detail": "Given token not valid for any token type", "code": "token_not_valid"}"#
}

/// Success envelope around `data`.
pub fn ok_body(data: serde_json::Value) -> String {
    serde_json::json!({ "meta": { "status_code": 200 }, "data": data }).to_string()
}
