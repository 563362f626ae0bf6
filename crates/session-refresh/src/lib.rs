//! Coordinated access-token refresh and session invalidation
//!
//! One `RefreshCoordinator` is shared by every request executor in the
//! process. It guarantees at most one refresh call is in flight, queues every
//! other caller that hits a 401 meanwhile, and hands all of them the same
//! outcome. When a refresh cycle fails, the `SessionInvalidator` clears the
//! credential store and announces the end of the session exactly once.
//!
//! Session lifecycle:
//! 1. External login stores a credential → `Authenticated`
//! 2. Any number of successful refresh cycles → still `Authenticated`
//! 3. A failed refresh cycle → store cleared, `SessionEvent::Ended`, `Unauthenticated`
//! 4. Stays `Unauthenticated` until the next external login

pub mod coordinator;
pub mod error;
pub mod invalidator;
pub mod metrics;

pub use coordinator::RefreshCoordinator;
pub use error::{RefreshFailure, Result};
pub use invalidator::{EndReason, SessionEvent, SessionInvalidator, SessionState};
