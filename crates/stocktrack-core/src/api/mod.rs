//! REST API access for the inventory service.
//!
//! This module provides the [`Transport`] that every remote call goes
//! through, the error taxonomy callers see, and the typed product
//! collection built on top of a [`Session`](crate::auth::Session).
//!
//! The API uses JWT bearer token authentication obtained from
//! `/auth/login/` and renewed through `/auth/token/refresh/`.

pub mod backend;
pub mod envelope;
pub mod error;
pub mod middleware;
pub mod products;
pub mod retry;
pub mod transport;

pub use backend::{ApiRequest, BackendError, HttpBackend, HttpResponse, ReqwestBackend};
pub use envelope::{ApiResponse, Envelope, Meta};
pub use error::{ApiError, ErrorEnvelope, ErrorKind};
pub use products::ProductsApi;
pub use retry::{RetryDecision, RetryPolicy};
pub use transport::Transport;

pub const REGISTER_PATH: &str = "/auth/register/";
pub const LOGIN_PATH: &str = "/auth/login/";
pub const REFRESH_PATH: &str = "/auth/token/refresh/";
pub const PRODUCT_PATH: &str = "/product/";
