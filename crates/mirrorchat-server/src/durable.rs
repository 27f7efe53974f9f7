//! Shared durable key/value store holding snapshot blobs.
//!
//! Values are opaque whole blobs: read in full, overwritten in full. The
//! designated snapshot writer is the only node that writes; every node
//! reads at startup.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use mirrorchat_store::SnapshotKey;
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::ServerError;

#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Fetch the blob under `key`, `None` when it was never written.
    async fn get(&self, key: SnapshotKey) -> Result<Option<Vec<u8>>, ServerError>;

    /// Replace the blob under `key`.
    async fn put(&self, key: SnapshotKey, data: Vec<u8>) -> Result<(), ServerError>;
}

// ---------------------------------------------------------------------------
// File backend
// ---------------------------------------------------------------------------

/// Blobs kept as `<dir>/<key>.snapshot`, replaced atomically via rename.
#[derive(Debug, Clone)]
pub struct FileDurableStore {
    base_path: PathBuf,
}

impl FileDurableStore {
    pub async fn new(base_path: PathBuf) -> Result<Self, ServerError> {
        fs::create_dir_all(&base_path).await.map_err(|e| {
            ServerError::Durable(format!(
                "Failed to create snapshot directory '{}': {}",
                base_path.display(),
                e
            ))
        })?;

        info!(path = %base_path.display(), "Durable snapshot store initialized");

        Ok(Self { base_path })
    }

    fn path_for(&self, key: SnapshotKey) -> Result<PathBuf, ServerError> {
        key_path(&self.base_path, key.as_str(), "snapshot")
    }
}

#[async_trait]
impl DurableStore for FileDurableStore {
    async fn get(&self, key: SnapshotKey) -> Result<Option<Vec<u8>>, ServerError> {
        let path = self.path_for(key)?;
        match fs::read(&path).await {
            Ok(data) => {
                debug!(%key, size = data.len(), "Read snapshot blob");
                Ok(Some(data))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ServerError::Durable(format!("Failed to read {key}: {e}"))),
        }
    }

    async fn put(&self, key: SnapshotKey, data: Vec<u8>) -> Result<(), ServerError> {
        let path = self.path_for(key)?;
        write_atomic(&path, &data)
            .await
            .map_err(|e| ServerError::Durable(format!("Failed to write {key}: {e}")))?;
        debug!(%key, size = data.len(), "Wrote snapshot blob");
        Ok(())
    }
}

/// Build `<base>/<key>.<ext>`, rejecting keys that could leave `base`.
pub(crate) fn key_path(base: &Path, key: &str, ext: &str) -> Result<PathBuf, ServerError> {
    let valid = !key.is_empty()
        && key
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
    if !valid {
        return Err(ServerError::BadRequest(format!("Invalid key: {key:?}")));
    }
    Ok(base.join(format!("{key}.{ext}")))
}

/// Write to a sibling temp file, then rename over `path`.
pub(crate) async fn write_atomic(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, data).await?;
    fs::rename(&tmp, path).await
}

// ---------------------------------------------------------------------------
// HTTP backend
// ---------------------------------------------------------------------------

/// Talks to the `/coord/blob/{key}` endpoints of the coordinator node.
#[derive(Debug, Clone)]
pub struct HttpDurableStore {
    client: reqwest::Client,
    base_url: String,
}

impl HttpDurableStore {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    fn url(&self, key: SnapshotKey) -> String {
        format!("{}/coord/blob/{}", self.base_url, key)
    }
}

#[async_trait]
impl DurableStore for HttpDurableStore {
    async fn get(&self, key: SnapshotKey) -> Result<Option<Vec<u8>>, ServerError> {
        let resp = self
            .client
            .get(self.url(key))
            .send()
            .await
            .map_err(|e| ServerError::Durable(format!("GET {key}: {e}")))?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let resp = resp
            .error_for_status()
            .map_err(|e| ServerError::Durable(format!("GET {key}: {e}")))?;
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| ServerError::Durable(format!("GET {key} body: {e}")))?;
        Ok(Some(bytes.to_vec()))
    }

    async fn put(&self, key: SnapshotKey, data: Vec<u8>) -> Result<(), ServerError> {
        self.client
            .put(self.url(key))
            .body(data)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| ServerError::Durable(format!("PUT {key}: {e}")))?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// In-memory backend
// ---------------------------------------------------------------------------

/// Process-local store for tests and single-process demos.
#[derive(Debug, Default)]
pub struct MemoryDurableStore {
    blobs: RwLock<HashMap<SnapshotKey, Vec<u8>>>,
}

impl MemoryDurableStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DurableStore for MemoryDurableStore {
    async fn get(&self, key: SnapshotKey) -> Result<Option<Vec<u8>>, ServerError> {
        Ok(self.blobs.read().await.get(&key).cloned())
    }

    async fn put(&self, key: SnapshotKey, data: Vec<u8>) -> Result<(), ServerError> {
        self.blobs.write().await.insert(key, data);
        Ok(())
    }
}
