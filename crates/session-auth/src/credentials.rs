//! Credential storage for the session token pair
//!
//! `CredentialStore` is the read/write/clear contract the rest of the layer
//! depends on. Two implementations ship here: `FileCredentialStore`, which
//! keeps the pair in a JSON file written with atomic temp-file + rename, and
//! `MemoryCredentialStore` for embedders that persist elsewhere (and tests).
//!
//! Every operation takes the store's lock for its whole duration, so a reader
//! never observes a credential that is only partly written.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use common::Secret;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{Result, StoreError};

/// The session's token pair.
///
/// Serialized as `{"accessToken": "...", "refreshToken": "..."}`, the same
/// shape the refresh endpoint returns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credential {
    access_token: Secret<String>,
    refresh_token: Secret<String>,
}

impl Credential {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: Secret::new(access_token.into()),
            refresh_token: Secret::new(refresh_token.into()),
        }
    }

    /// Bearer token attached to outgoing requests.
    pub fn access_token(&self) -> &str {
        self.access_token.expose()
    }

    pub fn refresh_token(&self) -> &str {
        self.refresh_token.expose()
    }

    /// Whether a refresh can be attempted with this credential.
    pub fn has_refresh_token(&self) -> bool {
        !self.refresh_token.expose().is_empty()
    }
}

/// Durable storage for the session credential.
///
/// Uses `Pin<Box<dyn Future>>` return types so the store can be shared as
/// `Arc<dyn CredentialStore>` between the coordinator, the invalidator and
/// every request executor.
pub trait CredentialStore: Send + Sync {
    /// Current credential, or `None` when no session exists.
    fn get(&self) -> Pin<Box<dyn Future<Output = Result<Option<Credential>>> + Send + '_>>;

    /// Replace the stored credential.
    fn set(&self, credential: Credential) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Remove any stored credential.
    fn clear(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// Credential file manager.
///
/// The Mutex serializes all operations. The in-memory copy is only replaced
/// after the file write succeeds, so a failed write leaves the previous
/// credential in place.
pub struct FileCredentialStore {
    path: PathBuf,
    state: Mutex<Option<Credential>>,
}

impl FileCredentialStore {
    /// Load the credential from the given file path.
    ///
    /// A missing file means there is no session yet; the file is created on
    /// the first `set()`.
    pub async fn load(path: PathBuf) -> Result<Self> {
        let state = if path.exists() {
            let contents = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| StoreError::Io(format!("reading credential file: {e}")))?;
            let credential: Credential = serde_json::from_str(&contents).map_err(|e| {
                StoreError::CredentialParse(format!("parsing credential file: {e}"))
            })?;
            info!(path = %path.display(), "loaded stored session");
            Some(credential)
        } else {
            info!(path = %path.display(), "credential file not found, starting signed out");
            None
        };

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CredentialStore for FileCredentialStore {
    fn get(&self) -> Pin<Box<dyn Future<Output = Result<Option<Credential>>> + Send + '_>> {
        Box::pin(async move {
            let state = self.state.lock().await;
            Ok(state.clone())
        })
    }

    fn set(&self, credential: Credential) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            write_atomic(&self.path, &credential).await?;
            *state = Some(credential);
            debug!("stored credential");
            Ok(())
        })
    }

    fn clear(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            // The in-memory session ends even if the file cannot be removed.
            *state = None;
            match tokio::fs::remove_file(&self.path).await {
                Ok(()) => {
                    debug!(path = %self.path.display(), "removed credential file");
                    Ok(())
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => {
                    warn!(path = %self.path.display(), error = %e, "failed to remove credential file");
                    Err(StoreError::Io(format!("removing credential file: {e}")))
                }
            }
        })
    }
}

/// Write the credential to a file atomically.
///
/// Writes to a temporary file in the same directory, then renames it over
/// the target. Sets file permissions to 0600 (owner read/write only) since
/// the file contains tokens.
async fn write_atomic(path: &Path, credential: &Credential) -> Result<()> {
    let json = serde_json::to_string_pretty(credential)
        .map_err(|e| StoreError::CredentialParse(format!("serializing credential: {e}")))?;

    let dir = path
        .parent()
        .ok_or_else(|| StoreError::Io("credential path has no parent directory".into()))?;

    let tmp_path = dir.join(format!(".credential.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| StoreError::Io(format!("writing temp credential file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        if let Err(e) = tokio::fs::set_permissions(&tmp_path, perms).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(StoreError::Io(format!(
                "setting credential file permissions: {e}"
            )));
        }
    }

    if let Err(e) = tokio::fs::rename(&tmp_path, path).await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(StoreError::Io(format!("renaming temp credential file: {e}")));
    }

    debug!(path = %path.display(), "persisted credential");
    Ok(())
}

/// In-process credential store with no persistence.
#[derive(Default)]
pub struct MemoryCredentialStore {
    state: Mutex<Option<Credential>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with a signed-in session.
    pub fn with_credential(credential: Credential) -> Self {
        Self {
            state: Mutex::new(Some(credential)),
        }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get(&self) -> Pin<Box<dyn Future<Output = Result<Option<Credential>>> + Send + '_>> {
        Box::pin(async move { Ok(self.state.lock().await.clone()) })
    }

    fn set(&self, credential: Credential) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            *self.state.lock().await = Some(credential);
            Ok(())
        })
    }

    fn clear(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            *self.state.lock().await = None;
            Ok(())
        })
    }
}
