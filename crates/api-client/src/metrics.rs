//! Request metrics
//!
//! - `api_requests_total` (counter): label `outcome`
//! - `api_request_duration_seconds` (histogram): label `outcome`

/// Record a completed `execute` call.
pub fn record_request(outcome: &'static str, duration_secs: f64) {
    metrics::counter!("api_requests_total", "outcome" => outcome).increment(1);
    metrics::histogram!("api_request_duration_seconds", "outcome" => outcome)
        .record(duration_secs);
}
