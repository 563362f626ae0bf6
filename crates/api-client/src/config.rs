//! Client configuration
//!
//! Deserialized from the `[client]` table of a host application's config
//! file. The same timeout applies to ordinary requests and to the refresh
//! call, so a slow refresh fails the same way a slow request does.

use std::time::Duration;

use serde::Deserialize;

/// Backend connection settings for the request layer
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    /// Backend root, e.g. `https://api.example.com/v1`
    pub base_url: String,
    /// Path of the refresh endpoint, relative to `base_url`
    #[serde(default = "default_refresh_path")]
    pub refresh_path: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_refresh_path() -> String {
    "/auth/refresh".into()
}

fn default_timeout() -> u64 {
    30
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            refresh_path: default_refresh_path(),
            timeout_secs: default_timeout(),
        }
    }

    /// Reject settings the layer cannot work with.
    pub fn validate(&self) -> common::Result<()> {
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(common::Error::invalid(
                "client.base_url",
                format!("must start with http:// or https://, got: {}", self.base_url),
            ));
        }

        if !self.refresh_path.starts_with('/') {
            return Err(common::Error::invalid(
                "client.refresh_path",
                format!("must start with '/', got: {}", self.refresh_path),
            ));
        }

        if self.timeout_secs == 0 {
            return Err(common::Error::invalid(
                "client.timeout_secs",
                "must be greater than 0",
            ));
        }

        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Absolute URL of the refresh endpoint.
    pub fn refresh_url(&self) -> String {
        join_url(&self.base_url, &self.refresh_path)
    }
}

/// Join a base URL and an absolute path without doubling the slash.
pub(crate) fn join_url(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    if path.starts_with('/') {
        format!("{base}{path}")
    } else {
        format!("{base}/{path}")
    }
}
