//! Authentication module for managing user sessions and credentials.
//!
//! This module provides:
//! - `Session`: login/logout lifecycle and the authorized send path
//! - `CredentialStore`: access/refresh tokens and display name, write-through
//!   to a `KeyValueStore` (memory, JSON file or OS keyring)
//! - `RefreshCoordinator`: one token refresh in flight, shared by every caller
//!
//! Access tokens are short-lived; an expired one is renewed through
//! `/auth/token/refresh/` and the failed request replayed once.

pub mod credentials;
pub mod refresh;
pub mod session;
pub mod storage;

pub use credentials::{
    CredentialSet, CredentialStore, CredentialUpdate, LogoutReason, SessionEvent, NAME_KEY,
    REFRESH_TOKEN_KEY, TOKEN_KEY,
};
pub use refresh::{RefreshCoordinator, RefreshState};
pub use session::Session;
pub use storage::{FileStore, KeyValueStore, KeyringStore, MemoryStore};
