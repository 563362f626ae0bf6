//! Error types returned to calling UI code

use std::collections::BTreeMap;

use session_auth::StoreError;

/// Per-field validation messages, e.g. `{"email": ["required"]}`.
pub type FieldErrors = BTreeMap<String, Vec<String>>;

/// Errors from a single `execute` call.
///
/// Only `Unauthenticated` is ever the result of the layer acting on its own
/// (a failed refresh or a second 401). Everything else is surfaced as-is and
/// never retried automatically.
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("not authenticated")]
    Unauthenticated,

    #[error("validation failed for {} field(s)", .0.len())]
    Validation(FieldErrors),

    #[error("backend returned {status}: {message}")]
    Remote { status: u16, message: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("credential store error: {0}")]
    Store(#[from] StoreError),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("failed to decode response body: {0}")]
    Decode(String),
}

impl RequestError {
    /// Short label for metrics and logs.
    pub fn label(&self) -> &'static str {
        match self {
            RequestError::Unauthenticated => "unauthenticated",
            RequestError::Validation(_) => "validation",
            RequestError::Remote { .. } => "remote",
            RequestError::Network(_) => "network",
            RequestError::Store(_) => "store",
            RequestError::InvalidRequest(_) => "invalid_request",
            RequestError::Decode(_) => "decode",
        }
    }
}

/// Errors while wiring up an `AuthSession`.
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error(transparent)]
    Config(#[from] common::Error),

    #[error("failed to build HTTP client: {0}")]
    Client(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result alias for request operations.
pub type Result<T> = std::result::Result<T, RequestError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_display_includes_status_and_message() {
        let err = RequestError::Remote {
            status: 503,
            message: "maintenance".into(),
        };
        assert_eq!(err.to_string(), "backend returned 503: maintenance");
    }

    #[test]
    fn validation_display_counts_fields() {
        let mut fields = FieldErrors::new();
        fields.insert("email".into(), vec!["required".into()]);
        fields.insert("name".into(), vec!["too short".into()]);
        assert_eq!(
            RequestError::Validation(fields).to_string(),
            "validation failed for 2 field(s)"
        );
    }

    #[test]
    fn labels_are_stable() {
        assert_eq!(RequestError::Unauthenticated.label(), "unauthenticated");
        assert_eq!(RequestError::Network("reset".into()).label(), "network");
        assert_eq!(
            RequestError::Store(StoreError::Io("x".into())).label(),
            "store"
        );
    }
}
