//! Session invalidation
//!
//! Clears the credential store and tells the UI layer the session is over.
//! Delivery is twofold: a `broadcast` of `SessionEvent::Ended` for code that
//! reacts to the moment, and a `watch` of `SessionState` for code that polls.
//!
//! Every invalidation bumps the session epoch. A refresh cycle records the
//! epoch it started in and only writes the store while holding the epoch
//! lock with the epoch unchanged, so a credential minted for an ended
//! session is never persisted.

use std::sync::Arc;

use session_auth::{CredentialStore, StoreError};
use tokio::sync::{Mutex, MutexGuard, broadcast, watch};
use tracing::{debug, info, warn};

use crate::metrics;

/// Capacity of the session event channel. Events are rare; slow receivers
/// lag rather than block the invalidator.
const EVENT_CAPACITY: usize = 16;

/// Whether a usable session currently exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Authenticated,
    Unauthenticated,
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// A refresh cycle failed; every caller waiting on it got `Unauthenticated`.
    RefreshFailed,
    /// The user signed out.
    Logout,
}

impl EndReason {
    pub fn label(&self) -> &'static str {
        match self {
            EndReason::RefreshFailed => "refresh_failed",
            EndReason::Logout => "logout",
        }
    }
}

/// Notification delivered to the UI layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Ended { reason: EndReason },
}

/// Clears the store and emits the "session ended" notification.
///
/// Cheap to clone; clones share the same channels.
#[derive(Clone)]
pub struct SessionInvalidator {
    store: Arc<dyn CredentialStore>,
    events: broadcast::Sender<SessionEvent>,
    state: Arc<watch::Sender<SessionState>>,
    epoch: Arc<Mutex<u64>>,
}

impl SessionInvalidator {
    pub fn new(store: Arc<dyn CredentialStore>, initial: SessionState) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (state, _) = watch::channel(initial);
        Self {
            store,
            events,
            state: Arc::new(state),
            epoch: Arc::new(Mutex::new(0)),
        }
    }

    /// Build an invalidator whose initial state reflects what the store holds.
    pub async fn from_store(store: Arc<dyn CredentialStore>) -> Result<Self, StoreError> {
        let initial = match store.get().await? {
            Some(_) => SessionState::Authenticated,
            None => SessionState::Unauthenticated,
        };
        Ok(Self::new(store, initial))
    }

    /// Receive every future `SessionEvent`.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Observe the current `SessionState` and its changes.
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Record that an external login stored a fresh credential.
    pub fn mark_authenticated(&self) {
        self.state.send_replace(SessionState::Authenticated);
    }

    /// Current session epoch. Incremented by every invalidation.
    pub async fn epoch(&self) -> u64 {
        *self.epoch.lock().await
    }

    /// Hold the epoch so no invalidation can run until the guard drops.
    pub(crate) async fn lock_epoch(&self) -> MutexGuard<'_, u64> {
        self.epoch.lock().await
    }

    /// End the session.
    ///
    /// The notification is emitted even if clearing the store fails; the
    /// store error is still returned to the caller.
    pub async fn invalidate(&self, reason: EndReason) -> Result<(), StoreError> {
        let mut epoch = self.epoch.lock().await;
        self.end(&mut epoch, reason).await
    }

    /// End the session only if it is still the one observed at `epoch`.
    ///
    /// Returns `None` when another invalidation already ended it.
    pub async fn invalidate_if_current(
        &self,
        epoch: u64,
        reason: EndReason,
    ) -> Option<Result<(), StoreError>> {
        let mut current = self.epoch.lock().await;
        if *current != epoch {
            debug!(reason = reason.label(), "session already ended, skipping invalidation");
            return None;
        }
        Some(self.end(&mut current, reason).await)
    }

    async fn end(&self, epoch: &mut u64, reason: EndReason) -> Result<(), StoreError> {
        *epoch += 1;

        let cleared = self.store.clear().await;
        if let Err(e) = &cleared {
            warn!(reason = reason.label(), error = %e, "failed to clear credential store, ending session anyway");
        }

        self.state.send_replace(SessionState::Unauthenticated);
        // No receivers is fine: nobody is listening yet.
        let _ = self.events.send(SessionEvent::Ended { reason });
        metrics::record_invalidation(reason.label());
        info!(reason = reason.label(), epoch = *epoch, "session ended");

        cleared
    }
}
