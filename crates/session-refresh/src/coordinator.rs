//! Single-flight access-token refresh
//!
//! The coordinator is the only shared mutable state of the request layer.
//! `RefreshState` is either `Idle` or `Refreshing` with a FIFO queue of
//! waiters. Checking the state, enqueueing, and becoming the owner of a new
//! cycle all happen under one lock, so concurrent 401s can never start two
//! refresh calls.
//!
//! The refresh itself runs on a spawned task. The caller that started it is
//! just the first waiter; dropping that caller does not cancel the refresh.
//!
//! A cycle is bound to the session epoch it started in. If the session is
//! invalidated (for example by a logout) while the network call is in
//! flight, the new credential is discarded and waiters get `SessionEnded`.

use std::sync::Arc;
use std::time::Duration;

use session_auth::{Credential, CredentialStore};
use tokio::sync::{Mutex, oneshot};
use tracing::{debug, info, warn};

use crate::error::{RefreshFailure, Result};
use crate::invalidator::{EndReason, SessionInvalidator};
use crate::metrics;

type Waiter = oneshot::Sender<Result<Credential>>;

enum RefreshState {
    Idle,
    Refreshing(Vec<Waiter>),
}

struct Inner {
    state: Mutex<RefreshState>,
    store: Arc<dyn CredentialStore>,
    invalidator: SessionInvalidator,
    client: reqwest::Client,
    refresh_url: String,
    timeout: Duration,
}

/// Process-wide refresh coordinator.
///
/// Created once per application session and shared (by clone) with every
/// request executor. Clones share the same state.
#[derive(Clone)]
pub struct RefreshCoordinator {
    inner: Arc<Inner>,
}

impl RefreshCoordinator {
    /// `refresh_url` is the full URL of the backend refresh endpoint.
    /// `timeout` should match the timeout of ordinary requests.
    pub fn new(
        client: reqwest::Client,
        refresh_url: String,
        timeout: Duration,
        store: Arc<dyn CredentialStore>,
        invalidator: SessionInvalidator,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(RefreshState::Idle),
                store,
                invalidator,
                client,
                refresh_url,
                timeout,
            }),
        }
    }

    /// Refresh the credential, or join the refresh already in flight.
    ///
    /// Every caller of the same cycle receives the same outcome.
    pub async fn refresh(&self) -> Result<Credential> {
        let rx = {
            let mut state = self.inner.state.lock().await;
            self.enqueue(&mut state)
        };
        settle(rx).await
    }

    /// Refresh after the backend rejected `rejected_access_token`.
    ///
    /// If no refresh is in flight and the store already holds a different
    /// access token, a refresh finished after that request was sent; the
    /// stored credential is returned without another network call. If the
    /// store is empty the session already ended and `NoSession` is returned
    /// without starting a cycle.
    pub async fn refresh_rejected(&self, rejected_access_token: &str) -> Result<Credential> {
        let rx = {
            let mut state = self.inner.state.lock().await;
            if matches!(*state, RefreshState::Idle) {
                match self.inner.store.get().await {
                    Ok(Some(current)) if current.access_token() != rejected_access_token => {
                        debug!("credential already rotated, skipping refresh");
                        return Ok(current);
                    }
                    Ok(Some(_)) => {}
                    Ok(None) => return Err(RefreshFailure::NoSession),
                    Err(e) => {
                        warn!(error = %e, "could not read credential store, refreshing anyway");
                    }
                }
            }
            self.enqueue(&mut state)
        };
        settle(rx).await
    }

    /// Whether a refresh cycle is currently in flight.
    pub async fn is_refreshing(&self) -> bool {
        matches!(*self.inner.state.lock().await, RefreshState::Refreshing(_))
    }

    /// Add a waiter to the current cycle, starting one if the state is Idle.
    ///
    /// Must be called with the state lock held.
    fn enqueue(&self, state: &mut RefreshState) -> oneshot::Receiver<Result<Credential>> {
        let (tx, rx) = oneshot::channel();
        match *state {
            RefreshState::Refreshing(ref mut waiters) => {
                waiters.push(tx);
                debug!(waiters = waiters.len(), "joined in-flight refresh");
            }
            RefreshState::Idle => {
                *state = RefreshState::Refreshing(vec![tx]);
                debug!("starting refresh cycle");
                let inner = self.inner.clone();
                tokio::spawn(async move { inner.run_cycle().await });
            }
        }
        rx
    }
}

async fn settle(rx: oneshot::Receiver<Result<Credential>>) -> Result<Credential> {
    rx.await.unwrap_or(Err(RefreshFailure::Abandoned))
}

impl Inner {
    /// Perform one refresh cycle and settle every waiter.
    async fn run_cycle(self: Arc<Self>) {
        let epoch = self.invalidator.epoch().await;
        let outcome = self.exchange(epoch).await;

        // Invalidate before releasing waiters so they observe a cleared store.
        if let Err(failure) = &outcome {
            if failure.ends_session() {
                warn!(error = %failure, "refresh cycle failed, ending session");
                let _ = self
                    .invalidator
                    .invalidate_if_current(epoch, EndReason::RefreshFailed)
                    .await;
            } else {
                info!(error = %failure, "refresh cycle found no live session");
            }
        }

        let waiters = {
            let mut state = self.state.lock().await;
            match std::mem::replace(&mut *state, RefreshState::Idle) {
                RefreshState::Refreshing(waiters) => waiters,
                RefreshState::Idle => Vec::new(),
            }
        };

        metrics::record_refresh(outcome.is_ok(), waiters.len());
        if outcome.is_ok() {
            info!(waiters = waiters.len(), "refresh cycle succeeded");
        }

        // FIFO; a waiter that gave up has dropped its receiver.
        for waiter in waiters {
            let _ = waiter.send(outcome.clone());
        }
    }

    /// Exchange the stored refresh token and persist the new credential.
    ///
    /// The write happens under the epoch lock and only if no invalidation
    /// ran since `epoch`.
    async fn exchange(&self, epoch: u64) -> Result<Credential> {
        let current = self.store.get().await?.ok_or(RefreshFailure::NoSession)?;
        if !current.has_refresh_token() {
            return Err(RefreshFailure::MissingRefreshToken);
        }

        let credential = session_auth::refresh_credential(
            &self.client,
            &self.refresh_url,
            current.refresh_token(),
            self.timeout,
        )
        .await?;

        let guard = self.invalidator.lock_epoch().await;
        if *guard != epoch {
            return Err(RefreshFailure::SessionEnded);
        }
        // A rotated refresh token that was not saved cannot be used again.
        self.store.set(credential.clone()).await?;
        drop(guard);

        Ok(credential)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invalidator::{SessionEvent, SessionState};
    use axum::Json;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use axum::routing::post;
    use session_auth::MemoryCredentialStore;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::net::TcpListener;

    /// Mock refresh endpoint that counts calls and answers after `delay`.
    ///
    /// Successful answers hand out `at_<n>`/`rt_<n>` where n is the call number.
    async fn start_refresh_server(
        status: StatusCode,
        delay: Duration,
    ) -> (String, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let counter = calls.clone();
        tokio::spawn(async move {
            let app = axum::Router::new().route(
                "/auth/refresh",
                post(move || {
                    let counter = counter.clone();
                    async move {
                        let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                        tokio::time::sleep(delay).await;
                        if status.is_success() {
                            Json(serde_json::json!({
                                "accessToken": format!("at_{n}"),
                                "refreshToken": format!("rt_{n}"),
                            }))
                            .into_response()
                        } else {
                            (status, r#"{"message":"refresh token expired"}"#).into_response()
                        }
                    }
                }),
            );
            axum::serve(listener, app).await.unwrap();
        });

        (format!("http://{addr}/auth/refresh"), calls)
    }

    struct Harness {
        coordinator: RefreshCoordinator,
        invalidator: SessionInvalidator,
        store: Arc<MemoryCredentialStore>,
        calls: Arc<AtomicUsize>,
    }

    async fn harness(status: StatusCode, delay: Duration, credential: Option<Credential>) -> Harness {
        let (url, calls) = start_refresh_server(status, delay).await;
        let store = Arc::new(match credential {
            Some(c) => MemoryCredentialStore::with_credential(c),
            None => MemoryCredentialStore::new(),
        });
        let invalidator = SessionInvalidator::from_store(store.clone()).await.unwrap();
        let coordinator = RefreshCoordinator::new(
            reqwest::Client::new(),
            url,
            Duration::from_secs(5),
            store.clone(),
            invalidator.clone(),
        );
        Harness {
            coordinator,
            invalidator,
            store,
            calls,
        }
    }

    fn expired() -> Option<Credential> {
        Some(Credential::new("at_0", "rt_0"))
    }

    #[tokio::test]
    async fn refresh_persists_new_credential() {
        let h = harness(StatusCode::OK, Duration::ZERO, expired()).await;
        let mut events = h.invalidator.subscribe();

        let cred = h.coordinator.refresh().await.unwrap();

        assert_eq!(cred.access_token(), "at_1");
        assert_eq!(h.store.get().await.unwrap(), Some(cred));
        assert_eq!(h.calls.load(Ordering::SeqCst), 1);
        assert!(!h.coordinator.is_refreshing().await);
        assert_eq!(h.invalidator.state(), SessionState::Authenticated);
        assert!(events.try_recv().is_err(), "a successful refresh emits no event");
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_refresh() {
        let h = harness(StatusCode::OK, Duration::from_millis(100), expired()).await;

        let mut handles = vec![];
        for _ in 0..5 {
            let coordinator = h.coordinator.clone();
            handles.push(tokio::spawn(async move { coordinator.refresh().await }));
        }

        for handle in handles {
            let cred = handle.await.unwrap().unwrap();
            assert_eq!(cred.access_token(), "at_1");
        }
        assert_eq!(h.calls.load(Ordering::SeqCst), 1, "exactly one refresh call");
    }

    #[tokio::test]
    async fn failed_refresh_rejects_all_and_invalidates_once() {
        let h = harness(StatusCode::UNAUTHORIZED, Duration::from_millis(100), expired()).await;
        let mut events = h.invalidator.subscribe();

        let mut handles = vec![];
        for _ in 0..5 {
            let coordinator = h.coordinator.clone();
            handles.push(tokio::spawn(async move { coordinator.refresh().await }));
        }

        for handle in handles {
            let result = handle.await.unwrap();
            assert!(
                matches!(result, Err(RefreshFailure::Rejected { status: 401, .. })),
                "got {result:?}"
            );
        }

        assert_eq!(h.calls.load(Ordering::SeqCst), 1);
        assert!(h.store.get().await.unwrap().is_none(), "store must be cleared");
        assert_eq!(h.invalidator.state(), SessionState::Unauthenticated);
        assert_eq!(
            events.try_recv().unwrap(),
            SessionEvent::Ended {
                reason: EndReason::RefreshFailed
            }
        );
        assert!(events.try_recv().is_err(), "session ended must fire once");
    }

    #[tokio::test]
    async fn state_is_reusable_after_a_cycle() {
        let h = harness(StatusCode::OK, Duration::ZERO, expired()).await;

        let first = h.coordinator.refresh().await.unwrap();
        let second = h.coordinator.refresh().await.unwrap();

        assert_eq!(first.access_token(), "at_1");
        assert_eq!(second.access_token(), "at_2");
        assert_eq!(h.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn missing_refresh_token_fails_without_network() {
        let h = harness(StatusCode::OK, Duration::ZERO, Some(Credential::new("at", ""))).await;
        let mut events = h.invalidator.subscribe();

        let result = h.coordinator.refresh().await;

        assert_eq!(result, Err(RefreshFailure::MissingRefreshToken));
        assert_eq!(h.calls.load(Ordering::SeqCst), 0);
        assert!(h.store.get().await.unwrap().is_none());
        assert!(events.try_recv().is_ok());
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_network_failure() {
        let store = Arc::new(MemoryCredentialStore::with_credential(Credential::new(
            "at", "rt",
        )));
        let invalidator = SessionInvalidator::from_store(store.clone()).await.unwrap();
        // Bind then drop to get a port nothing listens on
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let coordinator = RefreshCoordinator::new(
            reqwest::Client::new(),
            format!("http://{addr}/auth/refresh"),
            Duration::from_secs(5),
            store.clone(),
            invalidator.clone(),
        );

        let result = coordinator.refresh().await;
        assert!(matches!(result, Err(RefreshFailure::Network(_))), "got {result:?}");
        assert_eq!(invalidator.state(), SessionState::Unauthenticated);
    }

    #[tokio::test]
    async fn rotated_credential_skips_refresh() {
        let h = harness(StatusCode::OK, Duration::ZERO, Some(Credential::new("at_new", "rt_new"))).await;

        // The request was sent with a token that has since been replaced
        let cred = h.coordinator.refresh_rejected("at_stale").await.unwrap();

        assert_eq!(cred.access_token(), "at_new");
        assert_eq!(h.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn rejected_current_token_starts_refresh() {
        let h = harness(StatusCode::OK, Duration::ZERO, expired()).await;

        let cred = h.coordinator.refresh_rejected("at_0").await.unwrap();

        assert_eq!(cred.access_token(), "at_1");
        assert_eq!(h.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn rejected_after_session_ended_does_not_invalidate_again() {
        let h = harness(StatusCode::OK, Duration::ZERO, None).await;
        let mut events = h.invalidator.subscribe();

        let result = h.coordinator.refresh_rejected("at_0").await;

        assert_eq!(result, Err(RefreshFailure::NoSession));
        assert_eq!(h.calls.load(Ordering::SeqCst), 0);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn dropped_initiator_does_not_cancel_refresh() {
        let h = harness(StatusCode::OK, Duration::from_millis(100), expired()).await;

        // Start a cycle, then abandon the initiating call
        let initiator = {
            let coordinator = h.coordinator.clone();
            tokio::spawn(async move { coordinator.refresh().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        initiator.abort();

        // A later caller joins the same cycle and still gets its outcome
        let cred = h.coordinator.refresh().await.unwrap();

        assert_eq!(cred.access_token(), "at_1");
        assert_eq!(h.calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.store.get().await.unwrap(), Some(cred));
    }

    #[tokio::test]
    async fn waiters_are_settled_in_arrival_order() {
        let h = harness(StatusCode::OK, Duration::from_millis(200), expired()).await;
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));

        let mut handles = vec![];
        for i in 0..5u64 {
            let coordinator = h.coordinator.clone();
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(i * 20)).await;
                let result = coordinator.refresh().await;
                order.lock().unwrap().push(i);
                result
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap().access_token(), "at_1");
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
        assert_eq!(h.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn refresh_without_session_emits_no_event() {
        let h = harness(StatusCode::OK, Duration::ZERO, None).await;
        let mut events = h.invalidator.subscribe();

        let result = h.coordinator.refresh().await;

        assert_eq!(result, Err(RefreshFailure::NoSession));
        assert_eq!(h.calls.load(Ordering::SeqCst), 0);
        assert!(events.try_recv().is_err());
        assert!(!h.coordinator.is_refreshing().await);
    }

    #[tokio::test]
    async fn logout_during_refresh_is_not_undone() {
        let h = harness(StatusCode::OK, Duration::from_millis(200), expired()).await;
        let mut events = h.invalidator.subscribe();

        let refresh = {
            let coordinator = h.coordinator.clone();
            tokio::spawn(async move { coordinator.refresh().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        h.invalidator.invalidate(EndReason::Logout).await.unwrap();

        let result = refresh.await.unwrap();

        assert_eq!(result, Err(RefreshFailure::SessionEnded));
        assert_eq!(h.calls.load(Ordering::SeqCst), 1);
        assert!(h.store.get().await.unwrap().is_none(), "logout must stick");
        assert_eq!(h.invalidator.state(), SessionState::Unauthenticated);
        assert_eq!(
            events.try_recv().unwrap(),
            SessionEvent::Ended {
                reason: EndReason::Logout
            }
        );
        assert!(events.try_recv().is_err(), "only the logout ends the session");
    }

    #[tokio::test]
    async fn failed_refresh_after_logout_emits_no_second_event() {
        let h = harness(StatusCode::UNAUTHORIZED, Duration::from_millis(200), expired()).await;
        let mut events = h.invalidator.subscribe();

        let refresh = {
            let coordinator = h.coordinator.clone();
            tokio::spawn(async move { coordinator.refresh().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        h.invalidator.invalidate(EndReason::Logout).await.unwrap();

        let result = refresh.await.unwrap();
        assert!(matches!(result, Err(RefreshFailure::Rejected { .. })), "got {result:?}");

        assert!(h.store.get().await.unwrap().is_none());
        assert_eq!(
            events.try_recv().unwrap(),
            SessionEvent::Ended {
                reason: EndReason::Logout
            }
        );
        assert!(events.try_recv().is_err());
    }
}
