//! Refresh endpoint exchange
//!
//! POSTs `{"refreshToken": "..."}` to the backend's refresh endpoint and
//! expects `{"accessToken": "...", "refreshToken": "..."}` back. This is one
//! network call with no retry; callers decide what a failure means.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::credentials::Credential;
use crate::error::TokenError;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

/// Response from the refresh endpoint.
#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
}

impl From<TokenResponse> for Credential {
    fn from(response: TokenResponse) -> Self {
        Credential::new(response.access_token, response.refresh_token)
    }
}

/// Exchange a refresh token for a new credential.
///
/// `timeout` bounds the whole call; a timed-out exchange is reported as
/// `TokenError::Http` like any other transport failure. Any non-2xx status is
/// `TokenError::Rejected`, carrying at most `common::MAX_ERROR_BODY_LENGTH` bytes of
/// the body.
pub async fn refresh_credential(
    client: &reqwest::Client,
    url: &str,
    refresh_token: &str,
    timeout: Duration,
) -> Result<Credential, TokenError> {
    let response = client
        .post(url)
        .timeout(timeout)
        .json(&RefreshRequest { refresh_token })
        .send()
        .await
        .map_err(|e| {
            if e.is_timeout() {
                TokenError::Http(format!("token refresh timed out: {e}"))
            } else {
                TokenError::Http(format!("token refresh request failed: {e}"))
            }
        })?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<no body>"));
        return Err(TokenError::Rejected {
            status: status.as_u16(),
            body: common::truncate_body(&body),
        });
    }

    let token = response
        .json::<TokenResponse>()
        .await
        .map_err(|e| TokenError::InvalidResponse(e.to_string()))?;

    if token.access_token.is_empty() {
        return Err(TokenError::InvalidResponse(
            "refresh response has an empty accessToken".into(),
        ));
    }

    debug!(status = status.as_u16(), "refresh endpoint issued new credential");
    Ok(token.into())
}
