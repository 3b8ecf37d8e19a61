use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::storage::{KeyValueStore, MemoryStore};

/// Persisted key for the access token
pub const TOKEN_KEY: &str = "token";
/// Persisted key for the refresh token
pub const REFRESH_TOKEN_KEY: &str = "refreshToken";
/// Persisted key for the display name
pub const NAME_KEY: &str = "name";

const EVENT_CHANNEL_CAPACITY: usize = 16;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CredentialSet {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub display_name: Option<String>,
}

impl CredentialSet {
    pub fn is_empty(&self) -> bool {
        self.access_token.is_none() && self.refresh_token.is_none() && self.display_name.is_none()
    }
}

/// Fields to overwrite; `None` leaves the current value alone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CredentialUpdate {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub display_name: Option<String>,
}

impl CredentialUpdate {
    pub fn access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    pub fn refresh_token(mut self, token: impl Into<String>) -> Self {
        self.refresh_token = Some(token.into());
        self
    }

    pub fn display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogoutReason {
    UserRequested,
    AuthenticationFailed,
    RefreshFailed,
    RetryExhausted,
}

/// Session lifecycle notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    LoggedIn { display_name: Option<String> },
    TokenRefreshed,
    LoggedOut { reason: LogoutReason },
}

/// The process-wide credential record, write-through to a [`KeyValueStore`].
///
/// Every mutation replaces the whole record under the write lock, so readers
/// never observe a half-applied update.
///
/// The session epoch counts logins and logouts. It only changes under the
/// write lock, so a write guarded by [`CredentialStore::set_in_epoch`] cannot
/// land on a session that started after the epoch was read.
pub struct CredentialStore {
    current: RwLock<CredentialSet>,
    epoch: AtomicU64,
    storage: Arc<dyn KeyValueStore>,
    events: broadcast::Sender<SessionEvent>,
}

impl CredentialStore {
    /// Empty store; does not read `storage`.
    pub fn new(storage: Arc<dyn KeyValueStore>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            current: RwLock::new(CredentialSet::default()),
            epoch: AtomicU64::new(0),
            storage,
            events,
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    /// Store initialized from whatever `storage` holds.
    pub fn load(storage: Arc<dyn KeyValueStore>) -> Self {
        let read = |key: &str| match storage.get(key) {
            Ok(value) => value,
            Err(e) => {
                warn!(key, error = %e, "Failed to read persisted credential");
                None
            }
        };
        let loaded = CredentialSet {
            access_token: read(TOKEN_KEY),
            refresh_token: read(REFRESH_TOKEN_KEY),
            display_name: read(NAME_KEY),
        };
        debug!(has_token = loaded.access_token.is_some(), "Credentials loaded");

        let store = Self::new(storage);
        *store.current.write() = loaded;
        store
    }

    pub fn get(&self) -> CredentialSet {
        self.current.read().clone()
    }

    pub fn access_token(&self) -> Option<String> {
        self.current.read().access_token.clone()
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.current.read().refresh_token.clone()
    }

    pub fn display_name(&self) -> Option<String> {
        self.current.read().display_name.clone()
    }

    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// Current record together with the epoch it belongs to.
    pub fn snapshot(&self) -> (u64, CredentialSet) {
        let current = self.current.read();
        (self.epoch(), current.clone())
    }

    pub fn set(&self, update: CredentialUpdate) {
        let mut current = self.current.write();
        self.apply(&mut current, update);
    }

    /// Replace the whole record with a new session's credentials.
    pub fn start_session(&self, update: CredentialUpdate) {
        let mut current = self.current.write();
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.remove_persisted();
        *current = CredentialSet::default();
        self.apply(&mut current, update);
    }

    /// Apply `update` only if no login or logout happened since `epoch`.
    pub fn set_in_epoch(&self, epoch: u64, update: CredentialUpdate) -> bool {
        let mut current = self.current.write();
        if self.epoch() != epoch {
            return false;
        }
        self.apply(&mut current, update);
        true
    }

    pub fn clear(&self) {
        let mut current = self.current.write();
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.remove_persisted();
        *current = CredentialSet::default();
    }

    /// Clear everything and tell subscribers the session is over.
    pub fn logout(&self, reason: LogoutReason) {
        self.clear();
        debug!(?reason, "Logged out");
        self.emit(SessionEvent::LoggedOut { reason });
    }

    /// Log out only if the session is still the one from `epoch`.
    pub fn logout_in_epoch(&self, epoch: u64, reason: LogoutReason) -> bool {
        {
            let mut current = self.current.write();
            if self.epoch() != epoch {
                return false;
            }
            self.epoch.fetch_add(1, Ordering::SeqCst);
            self.remove_persisted();
            *current = CredentialSet::default();
        }
        debug!(?reason, "Logged out");
        self.emit(SessionEvent::LoggedOut { reason });
        true
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub(crate) fn emit(&self, event: SessionEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn apply(&self, current: &mut CredentialSet, update: CredentialUpdate) {
        let mut next = current.clone();
        if let Some(token) = update.access_token {
            self.persist(TOKEN_KEY, &token);
            next.access_token = Some(token);
        }
        if let Some(token) = update.refresh_token {
            self.persist(REFRESH_TOKEN_KEY, &token);
            next.refresh_token = Some(token);
        }
        if let Some(name) = update.display_name {
            self.persist(NAME_KEY, &name);
            next.display_name = Some(name);
        }
        *current = next;
    }

    fn remove_persisted(&self) {
        for key in [TOKEN_KEY, REFRESH_TOKEN_KEY, NAME_KEY] {
            if let Err(e) = self.storage.remove(key) {
                warn!(key, error = %e, "Failed to remove persisted credential");
            }
        }
    }

    fn persist(&self, key: &str, value: &str) {
        if let Err(e) = self.storage.set(key, value) {
            warn!(key, error = %e, "Failed to persist credential");
        }
    }
}
