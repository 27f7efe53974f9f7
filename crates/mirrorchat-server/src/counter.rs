//! Client side of the shared ID counter.
//!
//! Every new user, channel and message gets its ID from here before the
//! entity is built. IDs are unique and strictly increasing per kind across
//! all nodes, which is also what keeps message order consistent between
//! nodes. When the counter is unreachable the write fails; an ID is never
//! made up locally.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use mirrorchat_store::EntityKind;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::debug;

use crate::durable::{key_path, write_atomic};
use crate::error::ServerError;

#[async_trait]
pub trait CounterService: Send + Sync {
    /// Atomically increment the counter for `kind` and return the new value.
    async fn next_id(&self, kind: EntityKind) -> Result<i64, ServerError>;
}

// ---------------------------------------------------------------------------
// File backend
// ---------------------------------------------------------------------------

/// Durable counters kept as `<dir>/<kind>.counter`.
///
/// Increments are serialized through one async mutex, so a single process
/// hosting this counter never hands out the same value twice. Other nodes
/// reach it through [`HttpCounter`].
#[derive(Debug)]
pub struct FileCounter {
    base_path: PathBuf,
    lock: Mutex<()>,
}

impl FileCounter {
    pub async fn new(base_path: PathBuf) -> Result<Self, ServerError> {
        fs::create_dir_all(&base_path).await.map_err(|e| {
            ServerError::IdMint(format!(
                "Failed to create counter directory '{}': {}",
                base_path.display(),
                e
            ))
        })?;

        Ok(Self {
            base_path,
            lock: Mutex::new(()),
        })
    }
}

#[async_trait]
impl CounterService for FileCounter {
    async fn next_id(&self, kind: EntityKind) -> Result<i64, ServerError> {
        let path = key_path(&self.base_path, kind.counter_key(), "counter")?;
        let _guard = self.lock.lock().await;

        let current = match fs::read_to_string(&path).await {
            Ok(text) => text
                .trim()
                .parse::<i64>()
                .map_err(|e| ServerError::IdMint(format!("Corrupt {kind} counter: {e}")))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
            Err(e) => return Err(ServerError::IdMint(format!("Failed to read {kind} counter: {e}"))),
        };

        let next = current + 1;
        write_atomic(&path, next.to_string().as_bytes())
            .await
            .map_err(|e| ServerError::IdMint(format!("Failed to persist {kind} counter: {e}")))?;

        debug!(%kind, id = next, "Minted ID");
        Ok(next)
    }
}

// ---------------------------------------------------------------------------
// HTTP backend
// ---------------------------------------------------------------------------

/// Talks to the `/coord/counter/{key}` endpoint of the coordinator node.
#[derive(Debug, Clone)]
pub struct HttpCounter {
    client: reqwest::Client,
    base_url: String,
}

impl HttpCounter {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl CounterService for HttpCounter {
    async fn next_id(&self, kind: EntityKind) -> Result<i64, ServerError> {
        let url = format!("{}/coord/counter/{}", self.base_url, kind.counter_key());
        let id = self
            .client
            .post(&url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| ServerError::IdMint(format!("{kind} counter unreachable: {e}")))?
            .json::<i64>()
            .await
            .map_err(|e| ServerError::IdMint(format!("{kind} counter reply: {e}")))?;
        Ok(id)
    }
}

// ---------------------------------------------------------------------------
// In-memory backend
// ---------------------------------------------------------------------------

/// Process-local counter for tests and single-process demos.
#[derive(Debug, Default)]
pub struct MemoryCounter {
    values: Mutex<HashMap<EntityKind, i64>>,
}

impl MemoryCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start `kind` so that the next ID issued is `next`.
    pub fn starting_at(mut self, kind: EntityKind, next: i64) -> Self {
        self.values.get_mut().insert(kind, next - 1);
        self
    }
}

#[async_trait]
impl CounterService for MemoryCounter {
    async fn next_id(&self, kind: EntityKind) -> Result<i64, ServerError> {
        let mut values = self.values.lock().await;
        let value = values.entry(kind).or_insert(0);
        *value += 1;
        Ok(*value)
    }
}
