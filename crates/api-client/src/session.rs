//! Session wiring
//!
//! `AuthSession` is the explicitly constructed singleton for one application
//! session: it owns the store handle, the invalidator, and the one
//! `RefreshCoordinator` every executor it hands out shares. Build it at
//! startup, pass it (or its executors) to whatever issues requests, drop it
//! at teardown.

use std::sync::Arc;

use session_auth::{Credential, CredentialStore, StoreError};
use session_refresh::{
    EndReason, RefreshCoordinator, SessionEvent, SessionInvalidator, SessionState,
};
use tokio::sync::{broadcast, watch};
use tracing::info;

use crate::config::ClientConfig;
use crate::error::SetupError;
use crate::executor::RequestExecutor;

pub struct AuthSession {
    store: Arc<dyn CredentialStore>,
    invalidator: SessionInvalidator,
    coordinator: RefreshCoordinator,
    executor: RequestExecutor,
}

impl AuthSession {
    /// Validate `config`, build the HTTP client and wire the layer around
    /// `store`. The initial session state reflects what the store holds.
    pub async fn new(config: &ClientConfig, store: Arc<dyn CredentialStore>) -> Result<Self, SetupError> {
        config.validate()?;

        let timeout = config.timeout();
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SetupError::Client(e.to_string()))?;

        let invalidator = SessionInvalidator::from_store(store.clone()).await?;
        let coordinator = RefreshCoordinator::new(
            client.clone(),
            config.refresh_url(),
            timeout,
            store.clone(),
            invalidator.clone(),
        );
        let executor = RequestExecutor::new(
            client,
            config.base_url.clone(),
            timeout,
            store.clone(),
            coordinator.clone(),
        );

        info!(
            base_url = %config.base_url,
            state = ?invalidator.state(),
            "auth session ready"
        );

        Ok(Self {
            store,
            invalidator,
            coordinator,
            executor,
        })
    }

    /// An executor bound to this session. Clones share the coordinator.
    pub fn executor(&self) -> RequestExecutor {
        self.executor.clone()
    }

    pub fn coordinator(&self) -> &RefreshCoordinator {
        &self.coordinator
    }

    /// Store the credential obtained by an external login flow.
    pub async fn login(&self, credential: Credential) -> Result<(), StoreError> {
        self.store.set(credential).await?;
        self.invalidator.mark_authenticated();
        info!("session started");
        Ok(())
    }

    /// Explicit sign-out. Emits `SessionEvent::Ended` with `EndReason::Logout`.
    pub async fn logout(&self) -> Result<(), StoreError> {
        self.invalidator.invalidate(EndReason::Logout).await
    }

    pub fn state(&self) -> SessionState {
        self.invalidator.state()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.invalidator.subscribe()
    }

    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.invalidator.watch_state()
    }
}
