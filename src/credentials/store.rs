use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tracing::{debug, warn};

use super::persist::CredentialPersistence;

/// An access/refresh credential pair. Always replaced as a whole.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialPair {
    pub access: String,
    pub refresh: String,
}

impl CredentialPair {
    pub fn new(access: impl Into<String>, refresh: impl Into<String>) -> Self {
        Self {
            access: access.into(),
            refresh: refresh.into(),
        }
    }
}

// Token values never end up in logs.
impl std::fmt::Debug for CredentialPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialPair")
            .field("access", &"<redacted>")
            .field("refresh", &"<redacted>")
            .finish()
    }
}

/// Authentication state broadcast to store observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    SignedOut,
    /// A pair is present. `generation` increases on every `set_pair`.
    Authenticated { generation: u64 },
}

impl SessionState {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, SessionState::Authenticated { .. })
    }
}

struct Slot {
    pair: Option<CredentialPair>,
    generation: u64,
    /// Bumped each time a pair is dropped, so a session that ended is
    /// distinguishable from its successor even if observers only see the
    /// final state.
    epoch: u64,
}

/// Single source of truth for the current credential pair.
///
/// Reads and writes go through one mutex, so no reader ever sees an access
/// value from one pair next to the refresh value of another. Notifications
/// are published while the lock is held, which keeps observers in the same
/// order as the writes.
pub struct CredentialStore {
    slot: Mutex<Slot>,
    notify: watch::Sender<SessionState>,
    persistence: Option<Box<dyn CredentialPersistence>>,
}

impl CredentialStore {
    /// An empty, signed-out store with no durable storage.
    pub fn new() -> Self {
        let (notify, _) = watch::channel(SessionState::SignedOut);
        Self {
            slot: Mutex::new(Slot {
                pair: None,
                generation: 0,
                epoch: 0,
            }),
            notify,
            persistence: None,
        }
    }

    /// A store that starts authenticated with `pair`.
    pub fn with_pair(pair: CredentialPair) -> Self {
        let store = Self::new();
        store.set_pair(pair.access, pair.refresh);
        store
    }

    /// A store backed by durable storage. A previously saved pair is loaded
    /// immediately; later writes go through to `persistence`.
    pub fn with_persistence(persistence: impl CredentialPersistence + 'static) -> Self {
        let loaded = match persistence.load() {
            Ok(pair) => pair,
            Err(e) => {
                warn!(error = %e, "Failed to load saved credentials; starting signed out");
                None
            }
        };

        let generation = u64::from(loaded.is_some());
        let initial = if loaded.is_some() {
            SessionState::Authenticated { generation }
        } else {
            SessionState::SignedOut
        };
        let (notify, _) = watch::channel(initial);

        Self {
            slot: Mutex::new(Slot {
                pair: loaded,
                generation,
                epoch: 0,
            }),
            notify,
            persistence: Some(Box::new(persistence)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        // The slot holds plain data; a panic elsewhere cannot leave it half-written.
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn access(&self) -> Option<String> {
        self.lock().pair.as_ref().map(|p| p.access.clone())
    }

    pub fn refresh_value(&self) -> Option<String> {
        self.lock().pair.as_ref().map(|p| p.refresh.clone())
    }

    /// Both values, read under one lock.
    pub fn pair(&self) -> Option<CredentialPair> {
        self.lock().pair.clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.lock().pair.is_some()
    }

    pub fn session_state(&self) -> SessionState {
        *self.notify.borrow()
    }

    /// Number of sessions that have ended. Increases when `clear` or `revoke`
    /// drops a pair; replacing or rotating a pair leaves it unchanged.
    pub fn session_epoch(&self) -> u64 {
        self.lock().epoch
    }

    /// The access value together with the session epoch it belongs to.
    pub fn access_with_epoch(&self) -> Option<(String, u64)> {
        let slot = self.lock();
        slot.pair.as_ref().map(|p| (p.access.clone(), slot.epoch))
    }

    /// Replace both values atomically and notify observers.
    pub fn set_pair(&self, access: impl Into<String>, refresh: impl Into<String>) {
        let pair = CredentialPair::new(access, refresh);
        let mut slot = self.lock();

        if let Some(persistence) = &self.persistence {
            if let Err(e) = persistence.save(&pair) {
                warn!(error = %e, "Failed to persist credentials");
            }
        }

        slot.pair = Some(pair);
        slot.generation += 1;
        let generation = slot.generation;
        self.notify
            .send_replace(SessionState::Authenticated { generation });
        debug!(generation, "Credentials replaced");
    }

    /// Drop the pair. Observers treat this as the end of the session.
    pub fn clear(&self) {
        let mut slot = self.lock();

        if let Some(persistence) = &self.persistence {
            if let Err(e) = persistence.erase() {
                warn!(error = %e, "Failed to erase persisted credentials");
            }
        }

        let had_pair = slot.pair.take().is_some();
        if had_pair {
            slot.epoch += 1;
        }
        self.notify.send_replace(SessionState::SignedOut);
        if had_pair {
            debug!(epoch = slot.epoch, "Credentials cleared");
        }
    }

    /// Replace the pair only if it still carries `expected_refresh`.
    ///
    /// Used by the refresh procedure so a refresh that finishes after a
    /// logout (or a fresh login) cannot resurrect or overwrite that session.
    pub fn rotate(&self, expected_refresh: &str, replacement: CredentialPair) -> bool {
        let mut slot = self.lock();
        let current = slot.pair.as_ref().map(|p| p.refresh.as_str());
        if current != Some(expected_refresh) {
            return false;
        }

        if let Some(persistence) = &self.persistence {
            if let Err(e) = persistence.save(&replacement) {
                warn!(error = %e, "Failed to persist credentials");
            }
        }

        slot.pair = Some(replacement);
        slot.generation += 1;
        let generation = slot.generation;
        self.notify
            .send_replace(SessionState::Authenticated { generation });
        debug!(generation, "Credentials rotated");
        true
    }

    /// Clear the pair only if it still carries `expected_refresh`.
    pub fn revoke(&self, expected_refresh: &str) -> bool {
        let mut slot = self.lock();
        let current = slot.pair.as_ref().map(|p| p.refresh.as_str());
        if current != Some(expected_refresh) {
            return false;
        }

        if let Some(persistence) = &self.persistence {
            if let Err(e) = persistence.erase() {
                warn!(error = %e, "Failed to erase persisted credentials");
            }
        }

        slot.pair = None;
        slot.epoch += 1;
        self.notify.send_replace(SessionState::SignedOut);
        debug!(epoch = slot.epoch, "Credentials revoked");
        true
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.notify.subscribe()
    }
}

impl Default for CredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialStore")
            .field("state", &self.session_state())
            .field("persistent", &self.persistence.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_new_store_is_signed_out() {
        let store = CredentialStore::new();
        assert!(store.access().is_none());
        assert!(store.refresh_value().is_none());
        assert!(!store.is_authenticated());
        assert_eq!(store.session_state(), SessionState::SignedOut);
    }

    #[test]
    fn test_set_pair_replaces_both_values() {
        let store = CredentialStore::with_pair(CredentialPair::new("A1", "R1"));
        store.set_pair("A2", "R2");
        assert_eq!(store.pair(), Some(CredentialPair::new("A2", "R2")));
        assert_eq!(
            store.session_state(),
            SessionState::Authenticated { generation: 2 }
        );
    }

    #[test]
    fn test_clear_drops_pair() {
        let store = CredentialStore::with_pair(CredentialPair::new("A1", "R1"));
        store.clear();
        assert!(store.access().is_none());
        assert!(!store.is_authenticated());
        // Clearing twice is harmless
        store.clear();
        assert_eq!(store.session_state(), SessionState::SignedOut);
    }

    #[test]
    fn test_rotate_requires_matching_refresh() {
        let store = CredentialStore::with_pair(CredentialPair::new("A1", "R1"));
        assert!(!store.rotate("R0", CredentialPair::new("A2", "R2")));
        assert_eq!(store.access().as_deref(), Some("A1"));

        assert!(store.rotate("R1", CredentialPair::new("A2", "R1")));
        assert_eq!(store.pair(), Some(CredentialPair::new("A2", "R1")));
    }

    #[test]
    fn test_rotate_after_clear_does_not_resurrect_session() {
        let store = CredentialStore::with_pair(CredentialPair::new("A1", "R1"));
        store.clear();
        assert!(!store.rotate("R1", CredentialPair::new("A2", "R2")));
        assert!(!store.is_authenticated());
    }

    #[test]
    fn test_revoke_leaves_newer_session_alone() {
        let store = CredentialStore::with_pair(CredentialPair::new("A1", "R1"));
        store.set_pair("B1", "S1");
        assert!(!store.revoke("R1"));
        assert_eq!(store.access().as_deref(), Some("B1"));
        assert!(store.revoke("S1"));
        assert!(store.access().is_none());
    }

    #[test]
    fn test_session_epoch_moves_only_when_a_session_ends() {
        let store = CredentialStore::with_pair(CredentialPair::new("A1", "R1"));
        assert_eq!(store.access_with_epoch(), Some(("A1".to_string(), 0)));

        store.set_pair("A2", "R2");
        assert!(store.rotate("R2", CredentialPair::new("A3", "R3")));
        assert_eq!(store.session_epoch(), 0);

        store.clear();
        store.clear();
        assert_eq!(store.session_epoch(), 1);
        assert!(store.access_with_epoch().is_none());

        store.set_pair("B1", "S1");
        assert_eq!(store.access_with_epoch(), Some(("B1".to_string(), 1)));
        assert!(!store.revoke("R3"));
        assert!(store.revoke("S1"));
        assert_eq!(store.session_epoch(), 2);
    }

    #[tokio::test]
    async fn test_observers_see_changes() {
        let store = CredentialStore::new();
        let mut rx = store.subscribe();

        store.set_pair("A1", "R1");
        rx.changed().await.unwrap();
        assert!(rx.borrow_and_update().is_authenticated());

        store.clear();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), SessionState::SignedOut);
    }

    #[test]
    fn test_debug_output_redacts_tokens() {
        let pair = CredentialPair::new("secret-access", "secret-refresh");
        let rendered = format!("{:?}", pair);
        assert!(!rendered.contains("secret"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn test_concurrent_writers_never_tear_pairs() {
        let store = Arc::new(CredentialStore::new());
        let mut handles = Vec::new();
        for i in 0..8 {
            let store = Arc::clone(&store);
            handles.push(std::thread::spawn(move || {
                for j in 0..200 {
                    let tag = format!("{}-{}", i, j);
                    store.set_pair(format!("A{}", tag), format!("R{}", tag));
                    if let Some(pair) = store.pair() {
                        assert_eq!(pair.access[1..], pair.refresh[1..]);
                    }
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        let pair = store.pair().unwrap();
        assert_eq!(pair.access[1..], pair.refresh[1..]);
    }
}
