//! Authenticated request layer
//!
//! `RequestExecutor` performs one logical backend call: attach the stored
//! bearer token, send, classify the response, and on a first 401 delegate to
//! the shared `RefreshCoordinator` before retrying exactly once. `AuthSession`
//! wires the store, coordinator, invalidator and executors together for one
//! application session.
//!
//! Control flow:
//! 1. caller → `RequestExecutor::execute(&RequestSpec)`
//! 2. 2xx → `ApiResponse`
//! 3. first 401 → `RefreshCoordinator::refresh_rejected()` → one retry
//! 4. refresh failure or second 401 → `RequestError::Unauthenticated`
//! 5. 400 with field errors → `RequestError::Validation`, other errors as-is

pub mod classify;
pub mod config;
pub mod error;
pub mod executor;
pub mod metrics;
pub mod request;
pub mod session;

pub use config::ClientConfig;
pub use error::{FieldErrors, RequestError, Result, SetupError};
pub use executor::RequestExecutor;
pub use request::{ApiResponse, RequestSpec};
pub use session::AuthSession;
pub use session_auth::{Credential, CredentialStore, FileCredentialStore, MemoryCredentialStore};
pub use session_refresh::{EndReason, SessionEvent, SessionState};
