//! Request execution with one coordinated auth retry
//!
//! Each call goes through at most two attempts. The attempt number is passed
//! down explicitly rather than stored on the request, so a second 401 can
//! only ever end the call.
//!
//! The executor reads the credential store but never writes it. Rotation
//! happens in the coordinator, clearing in the invalidator.

use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderValue};
use session_auth::CredentialStore;
use session_refresh::RefreshCoordinator;
use tracing::{debug, instrument, warn};

use crate::classify;
use crate::config::join_url;
use crate::error::{RequestError, Result};
use crate::metrics;
use crate::request::{ApiResponse, RequestSpec};

/// Header carrying the per-call request id
const REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attempt {
    First,
    Retry,
}

impl Attempt {
    fn number(self) -> u8 {
        match self {
            Attempt::First => 1,
            Attempt::Retry => 2,
        }
    }
}

/// What the executor does with a response.
enum Outcome {
    Done(Result<ApiResponse>),
    /// First-attempt 401 on an authenticated call.
    Reauthenticate,
}

/// Executes requests against the backend.
///
/// Clone is cheap: the HTTP client, store and coordinator are all shared.
/// Every executor of one session must share the same `RefreshCoordinator`.
#[derive(Clone)]
pub struct RequestExecutor {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
    store: Arc<dyn CredentialStore>,
    coordinator: RefreshCoordinator,
}

impl RequestExecutor {
    pub fn new(
        client: reqwest::Client,
        base_url: String,
        timeout: Duration,
        store: Arc<dyn CredentialStore>,
        coordinator: RefreshCoordinator,
    ) -> Self {
        Self {
            client,
            base_url,
            timeout,
            store,
            coordinator,
        }
    }

    /// Perform one logical request.
    ///
    /// Returns the response for any 2xx. A 401 on the first attempt triggers
    /// a coordinated refresh and exactly one retry with the new token.
    pub async fn execute(&self, spec: &RequestSpec) -> Result<ApiResponse> {
        let request_id = uuid::Uuid::new_v4().to_string();
        let start = Instant::now();

        let result = self.run(spec, &request_id).await;

        let outcome = match &result {
            Ok(_) => "success",
            Err(e) => e.label(),
        };
        metrics::record_request(outcome, start.elapsed().as_secs_f64());
        result
    }

    #[instrument(skip_all, fields(request_id = %request_id, method = %spec.method, path = %spec.path))]
    async fn run(&self, spec: &RequestSpec, request_id: &str) -> Result<ApiResponse> {
        let token = match self.store.get().await? {
            Some(credential) => Some(credential.access_token().to_owned()),
            None if spec.requires_auth => {
                debug!("no stored session, failing fast");
                return Err(RequestError::Unauthenticated);
            }
            None => None,
        };

        let first = self
            .attempt(spec, token.as_deref(), request_id, Attempt::First)
            .await?;
        let rejected = match first {
            Outcome::Done(result) => return result,
            Outcome::Reauthenticate => token.unwrap_or_default(),
        };

        let credential = match self.coordinator.refresh_rejected(&rejected).await {
            Ok(credential) => credential,
            Err(failure) => {
                warn!(error = %failure, "refresh failed, request is unauthenticated");
                return Err(RequestError::Unauthenticated);
            }
        };

        match self
            .attempt(spec, Some(credential.access_token()), request_id, Attempt::Retry)
            .await?
        {
            Outcome::Done(result) => result,
            Outcome::Reauthenticate => Err(RequestError::Unauthenticated),
        }
    }

    /// Send once and classify the response.
    async fn attempt(
        &self,
        spec: &RequestSpec,
        token: Option<&str>,
        request_id: &str,
        attempt: Attempt,
    ) -> Result<Outcome> {
        let response = self.send(spec, token, request_id).await?;
        let status = response.status;
        debug!(status, attempt = attempt.number(), "backend responded");

        if (200..300).contains(&status) {
            return Ok(Outcome::Done(Ok(response)));
        }

        if status == 401 {
            return Ok(match (attempt, token) {
                (Attempt::First, Some(_)) => Outcome::Reauthenticate,
                (Attempt::First, None) => Outcome::Done(Err(RequestError::Unauthenticated)),
                (Attempt::Retry, _) => {
                    warn!("rejected again after refresh");
                    Outcome::Done(Err(RequestError::Unauthenticated))
                }
            });
        }

        Ok(Outcome::Done(Err(classify::error_for_status(
            status,
            &response.body,
        ))))
    }

    async fn send(
        &self,
        spec: &RequestSpec,
        token: Option<&str>,
        request_id: &str,
    ) -> Result<ApiResponse> {
        let url = join_url(&self.base_url, &spec.path);
        let request_id = HeaderValue::from_str(request_id)
            .map_err(|e| RequestError::InvalidRequest(format!("invalid request id: {e}")))?;

        let mut request = self
            .client
            .request(spec.method.clone(), &url)
            .timeout(self.timeout)
            .header(ACCEPT, "application/json")
            .header(CONTENT_TYPE, "application/json")
            .header(REQUEST_ID_HEADER, request_id);

        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        if !spec.query.is_empty() {
            request = request.query(&spec.query);
        }
        if let Some(body) = &spec.body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                RequestError::Network(format!("request timed out: {e}"))
            } else if e.is_builder() {
                RequestError::InvalidRequest(e.to_string())
            } else {
                RequestError::Network(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response
            .text()
            .await
            .map_err(|e| RequestError::Network(format!("reading response body: {e}")))?;

        Ok(ApiResponse {
            status,
            headers,
            body,
        })
    }
}
