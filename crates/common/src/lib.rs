//! Shared types for the authenticated request layer
//!
//! `Secret` keeps bearer and refresh tokens out of logs; `Error` covers
//! configuration loading for the binaries; `truncate_body` bounds the
//! backend text carried in error values.

mod body;
mod error;
mod secret;

pub use body::{MAX_ERROR_BODY_LENGTH, truncate_body};
pub use error::{Error, Result};
pub use secret::Secret;
