//! Error types for refresh cycles

use session_auth::{StoreError, TokenError};

/// Outcome shared by every waiter of a failed refresh cycle.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RefreshFailure {
    #[error("no session to refresh")]
    NoSession,

    #[error("stored credential has no refresh token")]
    MissingRefreshToken,

    #[error("refresh rejected by backend ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("refresh request failed: {0}")]
    Network(String),

    #[error("invalid refresh response: {0}")]
    InvalidResponse(String),

    #[error("credential store error: {0}")]
    Store(#[from] StoreError),

    #[error("session ended while the refresh was in flight")]
    SessionEnded,

    #[error("refresh task ended without an outcome")]
    Abandoned,
}

impl RefreshFailure {
    /// Whether this failure means the session must be invalidated.
    ///
    /// `NoSession` and `SessionEnded` find the session already over.
    pub fn ends_session(&self) -> bool {
        !matches!(self, RefreshFailure::NoSession | RefreshFailure::SessionEnded)
    }
}

impl From<TokenError> for RefreshFailure {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Http(msg) => RefreshFailure::Network(msg),
            TokenError::Rejected { status, body } => RefreshFailure::Rejected { status, body },
            TokenError::InvalidResponse(msg) => RefreshFailure::InvalidResponse(msg),
        }
    }
}

/// Result alias for refresh operations.
pub type Result<T> = std::result::Result<T, RefreshFailure>;
