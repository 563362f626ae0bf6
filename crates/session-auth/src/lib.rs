//! Credential storage and token refresh for the authenticated request layer
//!
//! Holds the session's access/refresh token pair behind the `CredentialStore`
//! contract and performs the single network exchange against the backend's
//! refresh endpoint. Coordination of concurrent refreshes lives one level up,
//! in `session-refresh`; nothing here knows about waiters or retries.
//!
//! Credential flow:
//! 1. External login writes the first `Credential` via `CredentialStore::set()`
//! 2. Requests read it with `CredentialStore::get()` and attach the access token
//! 3. On a 401 the coordinator calls `token::refresh_credential()`
//! 4. The rotated pair is persisted with `CredentialStore::set()`
//! 5. On refresh failure the invalidator calls `CredentialStore::clear()`

pub mod credentials;
pub mod error;
pub mod token;

pub use credentials::{Credential, CredentialStore, FileCredentialStore, MemoryCredentialStore};
pub use error::{Result, StoreError, TokenError};
pub use token::{TokenResponse, refresh_credential};
