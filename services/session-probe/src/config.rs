//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults. The file
//! itself is located by `--config` / `CONFIG_PATH` in the CLI definition.
//! Tokens never live in this file; they are kept in the credential file
//! named by `[store] path`.

use api_client::ClientConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub client: ClientConfig,
    pub store: StoreConfig,
}

/// Credential file settings
#[derive(Debug, Deserialize)]
pub struct StoreConfig {
    pub path: PathBuf,
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    ///
    /// `SESSION_PROBE_BASE_URL` replaces `client.base_url` when set.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|source| common::Error::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: Config = toml::from_str(&contents)?;

        if let Ok(url) = std::env::var("SESSION_PROBE_BASE_URL") {
            config.client.base_url = url;
        }

        config.client.validate()?;

        if config.store.path.as_os_str().is_empty() {
            return Err(common::Error::invalid("store.path", "must not be empty"));
        }

        Ok(config)
    }
}
