//! Error types for credential storage and token exchange

/// Failure of the underlying persistence mechanism.
///
/// Carries only string context so it can be cloned into every waiter that
/// observes the same failed refresh cycle.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("credential parse error: {0}")]
    CredentialParse(String),

    #[error("credential store unavailable: {0}")]
    Unavailable(String),
}

/// Failure of a single call to the backend refresh endpoint.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("refresh token rejected ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("invalid refresh response: {0}")]
    InvalidResponse(String),
}

/// Result alias for credential store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejected_display_includes_status_and_body() {
        let err = TokenError::Rejected {
            status: 401,
            body: "refresh token expired".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("401"), "got: {msg}");
        assert!(msg.contains("refresh token expired"), "got: {msg}");
    }

    #[test]
    fn store_error_is_cloneable_for_fan_out() {
        let err = StoreError::Io("disk full".into());
        assert_eq!(err.clone(), err);
    }
}
