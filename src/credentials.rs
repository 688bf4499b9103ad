//! Credential persistence for the WhatsApp session
//!
//! Credentials are opaque JSON owned by the protocol library. The store only
//! guarantees that a completed `save` survives a crash: the payload is
//! written to a temp file, synced, then renamed over the previous copy.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::session::Credentials;

const CREDS_FILE: &str = "creds.json";
const CREDS_TMP_FILE: &str = "creds.json.tmp";

/// Credential storage error type
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed credentials: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for credential operations
pub type CredentialResult<T> = Result<T, CredentialError>;

/// Load/save access to persisted session credentials
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// `None` when nothing has been saved yet (first pairing)
    async fn load(&self) -> CredentialResult<Option<Credentials>>;

    async fn save(&self, credentials: &Credentials) -> CredentialResult<()>;
}

/// Credentials kept as a JSON file inside a fixed directory
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    dir: PathBuf,
}

impl FileCredentialStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn creds_path(&self) -> PathBuf {
        self.dir.join(CREDS_FILE)
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn load(&self) -> CredentialResult<Option<Credentials>> {
        let path = self.creds_path();
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!("No stored credentials at {:?}, a new pairing is required", path);
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let credentials = serde_json::from_slice(&bytes)?;
        debug!("Loaded credentials from {:?}", path);
        Ok(Some(credentials))
    }

    async fn save(&self, credentials: &Credentials) -> CredentialResult<()> {
        fs::create_dir_all(&self.dir).await?;

        let tmp_path = self.dir.join(CREDS_TMP_FILE);
        let bytes = serde_json::to_vec(credentials)?;

        let mut file = fs::File::create(&tmp_path).await?;
        file.write_all(&bytes).await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&tmp_path, self.creds_path()).await?;
        debug!("Saved credentials ({} bytes) to {:?}", bytes.len(), self.dir);
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    /// In-memory store recording every save
    #[derive(Clone, Default)]
    pub struct MemoryCredentialStore {
        pub stored: Arc<Mutex<Option<Credentials>>>,
        pub saves: Arc<Mutex<usize>>,
    }

    #[async_trait]
    impl CredentialStore for MemoryCredentialStore {
        async fn load(&self) -> CredentialResult<Option<Credentials>> {
            Ok(self.stored.lock().clone())
        }

        async fn save(&self, credentials: &Credentials) -> CredentialResult<()> {
            *self.stored.lock() = Some(credentials.clone());
            *self.saves.lock() += 1;
            Ok(())
        }
    }
}
