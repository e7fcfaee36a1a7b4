//! Persistence for the installation's identity key pair.
//!
//! The core holds no global state: whoever builds an [`crate::IdentityManager`]
//! hands it a [`KeyStore`]. Two are provided:
//!
//! - [`FileKeyStore`]: JSON file, by default `~/.vanish/identity.json`, mode 0600 on unix.
//! - [`MemoryKeyStore`]: process-local, for tests and throwaway identities.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

use vanish_common::config::IdentityConfig;
use vanish_common::models::IdentityKeyPair;
use vanish_common::{VanishError, VanishResult};

const DEFAULT_DIR: &str = ".vanish";
const DEFAULT_FILE: &str = "identity.json";

#[async_trait]
pub trait KeyStore: Send + Sync {
    /// `None` when nothing has been persisted yet.
    async fn load(&self) -> VanishResult<Option<IdentityKeyPair>>;

    async fn save(&self, pair: &IdentityKeyPair) -> VanishResult<()>;

    /// Removing an absent pair is not an error.
    async fn delete(&self) -> VanishResult<()>;
}

// ─── File store ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct FileKeyStore {
    path: PathBuf,
}

impl FileKeyStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<home>/.vanish/identity.json`.
    pub fn default_location() -> VanishResult<Self> {
        let dirs = directories::BaseDirs::new()
            .ok_or_else(|| VanishError::KeyStore("could not resolve home directory".into()))?;
        Ok(Self::new(dirs.home_dir().join(DEFAULT_DIR).join(DEFAULT_FILE)))
    }

    /// Honour `identity.path` when configured, else the default location.
    pub fn from_config(config: &IdentityConfig) -> VanishResult<Self> {
        match &config.path {
            Some(path) => Ok(Self::new(path.clone())),
            None => Self::default_location(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl KeyStore for FileKeyStore {
    async fn load(&self) -> VanishResult<Option<IdentityKeyPair>> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_error("read", &self.path, e)),
        };
        let pair = serde_json::from_slice(&bytes).map_err(|e| {
            VanishError::KeyStore(format!("{} is not a valid identity file: {e}", self.path.display()))
        })?;
        debug!(path = %self.path.display(), "Loaded identity key pair");
        Ok(Some(pair))
    }

    async fn save(&self, pair: &IdentityKeyPair) -> VanishResult<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error("create directory for", &self.path, e))?;
        }
        let json = zeroize::Zeroizing::new(serde_json::to_vec_pretty(pair).map_err(|e| {
            VanishError::KeyStore(format!("could not serialise identity: {e}"))
        })?);

        // Write to a sibling file and rename so a crash never leaves half a key behind.
        let tmp = self.path.with_extension("json.tmp");
        let mut options = tokio::fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        options.mode(0o600);

        let mut file = options.open(&tmp).await.map_err(|e| io_error("create", &tmp, e))?;
        file.write_all(&json).await.map_err(|e| io_error("write", &tmp, e))?;
        file.sync_all().await.map_err(|e| io_error("sync", &tmp, e))?;
        drop(file);

        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| io_error("replace", &self.path, e))?;
        debug!(path = %self.path.display(), "Persisted identity key pair");
        Ok(())
    }

    async fn delete(&self) -> VanishResult<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error("delete", &self.path, e)),
        }
    }
}

fn io_error(action: &str, path: &Path, e: std::io::Error) -> VanishError {
    VanishError::KeyStore(format!("could not {action} {}: {e}", path.display()))
}

// ─── Memory store ────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct MemoryKeyStore {
    pair: Mutex<Option<IdentityKeyPair>>,
    saves: Mutex<usize>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pair(pair: IdentityKeyPair) -> Self {
        Self { pair: Mutex::new(Some(pair)), saves: Mutex::new(0) }
    }

    /// Number of successful `save` calls so far.
    pub async fn save_count(&self) -> usize {
        *self.saves.lock().await
    }
}

#[async_trait]
impl KeyStore for MemoryKeyStore {
    async fn load(&self) -> VanishResult<Option<IdentityKeyPair>> {
        Ok(self.pair.lock().await.clone())
    }

    async fn save(&self, pair: &IdentityKeyPair) -> VanishResult<()> {
        *self.pair.lock().await = Some(pair.clone());
        *self.saves.lock().await += 1;
        Ok(())
    }

    async fn delete(&self) -> VanishResult<()> {
        *self.pair.lock().await = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair() -> IdentityKeyPair {
        IdentityKeyPair { public_key: "cHVibGlj".into(), private_key: "cHJpdmF0ZQ==".into() }
    }

    #[tokio::test]
    async fn file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileKeyStore::new(dir.path().join("nested").join("identity.json"));

        assert!(store.load().await.unwrap().is_none());
        store.save(&pair()).await.unwrap();
        assert_eq!(store.load().await.unwrap(), Some(pair()));

        let on_disk: serde_json::Value =
            serde_json::from_slice(&std::fs::read(store.path()).unwrap()).unwrap();
        assert_eq!(on_disk["publicKey"], "cHVibGlj");
        assert_eq!(on_disk["privateKey"], "cHJpdmF0ZQ==");

        store.delete().await.unwrap();
        assert!(store.load().await.unwrap().is_none());
        store.delete().await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn file_store_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let store = FileKeyStore::new(dir.path().join("identity.json"));
        store.save(&pair()).await.unwrap();
        let mode = std::fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[tokio::test]
    async fn corrupt_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity.json");
        std::fs::write(&path, b"{ not json").unwrap();
        let res = FileKeyStore::new(path).load().await;
        assert!(matches!(res, Err(VanishError::KeyStore(_))));
    }

    #[test]
    fn configured_path_wins() {
        let cfg = IdentityConfig {
            path: Some(PathBuf::from("/tmp/custom.json")),
            display_name: "anonymous".into(),
        };
        let store = FileKeyStore::from_config(&cfg).unwrap();
        assert_eq!(store.path(), Path::new("/tmp/custom.json"));
    }

    #[tokio::test]
    async fn memory_store_counts_saves() {
        let store = MemoryKeyStore::new();
        assert!(store.load().await.unwrap().is_none());
        store.save(&pair()).await.unwrap();
        assert_eq!(store.save_count().await, 1);
        assert_eq!(store.load().await.unwrap(), Some(pair()));
    }
}
