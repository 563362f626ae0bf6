//! Response classification
//!
//! Maps a backend status and body to the error the caller sees. 401 is not
//! handled here: whether it means "refresh and retry" or "unauthenticated"
//! depends on the attempt, which the executor tracks.

use common::truncate_body;
use serde_json::Value;

use crate::error::{FieldErrors, RequestError};

/// Classify a non-2xx, non-401 response.
///
/// - 400 with an `errors` object → `Validation`
/// - anything else → `Remote` with the best message the body offers
pub fn error_for_status(status: u16, body: &str) -> RequestError {
    if status == 400 {
        if let Some(fields) = parse_field_errors(body) {
            return RequestError::Validation(fields);
        }
    }
    RequestError::Remote {
        status,
        message: extract_message(body),
    }
}

/// Parse `{"errors": {"field": ["message", ...]}}`.
///
/// A single string per field is accepted as a one-element list. Returns
/// `None` if the body is not this shape or names no fields.
pub fn parse_field_errors(body: &str) -> Option<FieldErrors> {
    let json: Value = serde_json::from_str(body).ok()?;
    let errors = json.get("errors")?.as_object()?;

    let mut fields = FieldErrors::new();
    for (field, messages) in errors {
        let messages: Vec<String> = match messages {
            Value::String(s) => vec![s.clone()],
            Value::Array(items) => items
                .iter()
                .filter_map(|m| m.as_str().map(str::to_owned))
                .collect(),
            _ => continue,
        };
        if !messages.is_empty() {
            fields.insert(field.clone(), messages);
        }
    }

    if fields.is_empty() { None } else { Some(fields) }
}

/// Pull a human-readable message out of an error body.
///
/// Looks for `message`, a string `error`, or `error.message`; falls back to
/// the raw body, truncated.
pub fn extract_message(body: &str) -> String {
    if let Ok(json) = serde_json::from_str::<Value>(body) {
        let candidate = json
            .get("message")
            .and_then(Value::as_str)
            .or_else(|| json.get("error").and_then(Value::as_str))
            .or_else(|| {
                json.get("error")
                    .and_then(|e| e.get("message"))
                    .and_then(Value::as_str)
            });
        if let Some(message) = candidate {
            return truncate_body(message);
        }
    }
    truncate_body(body.trim())
}
