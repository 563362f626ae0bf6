//! Session Probe
//!
//! Command-line driver for the authenticated request layer:
//! - `login <access-token> <refresh-token>` stores a session
//! - `logout` ends it
//! - `status` reports whether a session is stored
//! - `request <METHOD> <PATH> [JSON]` performs one authenticated call,
//!   refreshing and retrying once on 401
//!
//! The credential file named in the config persists the session between runs.

mod config;
mod metrics;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use api_client::{AuthSession, Credential, FileCredentialStore, RequestSpec, SessionState};
use clap::{Parser, Subcommand};
use reqwest::Method;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;

#[derive(Debug, Parser)]
#[command(name = "session-probe")]
#[command(about = "Drive the authenticated request layer against a backend")]
#[command(version)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long = "config", env = "CONFIG_PATH", default_value = "session-probe.toml")]
    config_path: PathBuf,

    /// Print Prometheus metrics to stderr after the command
    #[arg(long = "metrics", global = true)]
    print_metrics: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, PartialEq, Subcommand)]
enum Command {
    /// Store a credential obtained by an external login flow
    Login {
        access_token: String,
        refresh_token: String,
    },

    /// End the session and clear the stored credential
    Logout,

    /// Report whether a session is stored
    Status,

    /// Perform one authenticated request and print the response body
    Request {
        /// HTTP method, e.g. GET or POST
        #[arg(value_parser = parse_method)]
        method: Method,

        /// Path relative to the configured base URL
        path: String,

        /// JSON request body
        #[arg(value_parser = parse_json)]
        body: Option<serde_json::Value>,
    },
}

fn parse_method(raw: &str) -> std::result::Result<Method, String> {
    Method::from_bytes(raw.to_ascii_uppercase().as_bytes())
        .map_err(|e| format!("invalid HTTP method {raw}: {e}"))
}

fn parse_json(raw: &str) -> std::result::Result<serde_json::Value, String> {
    serde_json::from_str(raw).map_err(|e| format!("request body must be valid JSON: {e}"))
}

/// Run one command against `session`, returning what to print on stdout.
async fn run(session: &AuthSession, command: Command) -> Result<String> {
    match command {
        Command::Login {
            access_token,
            refresh_token,
        } => {
            session
                .login(Credential::new(access_token, refresh_token))
                .await
                .context("failed to store credential")?;
            Ok("logged in".to_string())
        }
        Command::Logout => {
            session
                .logout()
                .await
                .context("failed to clear credential")?;
            Ok("logged out".to_string())
        }
        Command::Status => Ok(match session.state() {
            SessionState::Authenticated => "authenticated".to_string(),
            SessionState::Unauthenticated => "unauthenticated".to_string(),
        }),
        Command::Request { method, path, body } => {
            let mut spec = RequestSpec::new(method, path);
            if let Some(body) = body {
                spec = spec.with_body(body);
            }

            let mut events = session.subscribe();
            let result = session.executor().execute(&spec).await;
            if let Ok(event) = events.try_recv() {
                warn!(?event, "session ended during request");
            }

            let response = result.context("request failed")?;
            info!(status = response.status, "request succeeded");
            Ok(response.body)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support.
    // stdout carries response bodies, so logs go to stderr.
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr),
        )
        .init();

    let cli = Cli::parse();

    // Install before any metrics are emitted
    let prometheus_handle = cli.print_metrics.then(metrics::install_recorder);

    let config_path = cli.config_path;
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        base_url = %config.client.base_url,
        store = %config.store.path.display(),
        "configuration loaded"
    );

    let store = FileCredentialStore::load(config.store.path.clone())
        .await
        .with_context(|| {
            format!(
                "failed to load credential file {}",
                config.store.path.display()
            )
        })?;
    let session = AuthSession::new(&config.client, Arc::new(store))
        .await
        .context("failed to initialize session")?;

    let result = run(&session, cli.command).await;

    if let Some(handle) = prometheus_handle {
        eprintln!("{}", handle.render());
    }

    println!("{}", result?);
    Ok(())
}
