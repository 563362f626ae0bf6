//! Refresh and invalidation metrics
//!
//! - `session_refresh_total` (counter): label `outcome`
//! - `session_refresh_waiters` (histogram): callers served by one cycle
//! - `session_invalidations_total` (counter): label `reason`

/// Record a settled refresh cycle and how many callers it served.
pub fn record_refresh(success: bool, waiters: usize) {
    let outcome = if success { "success" } else { "failure" };
    metrics::counter!("session_refresh_total", "outcome" => outcome).increment(1);
    metrics::histogram!("session_refresh_waiters").record(waiters as f64);
}

/// Record a session invalidation.
pub fn record_invalidation(reason: &'static str) {
    metrics::counter!("session_invalidations_total", "reason" => reason).increment(1);
}
