//! Snapshot persistence of the entity store.
//!
//! One designated node periodically writes the whole store to the durable
//! store, one blob per entity kind. Every node restores from those blobs
//! once at startup, before serving anything; a missing or undecodable blob
//! stops the node from starting at all rather than letting it serve partial
//! data.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use mirrorchat_store::{EntityStore, Snapshot, SnapshotKey, StoreError};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{info, warn};

use crate::durable::DurableStore;
use crate::error::ServerError;

/// Write the full store to the durable store.
pub async fn snapshot_all(store: &EntityStore, durable: &dyn DurableStore) -> Result<(), ServerError> {
    let snapshot = store.snapshot().await;
    write_snapshot(&snapshot, durable).await
}

async fn write_snapshot(snapshot: &Snapshot, durable: &dyn DurableStore) -> Result<(), ServerError> {
    for key in SnapshotKey::ALL {
        let blob = snapshot.encode(key)?;
        let size = blob.len();
        durable.put(key, blob).await?;
        info!(%key, size, "Saved snapshot");
    }
    Ok(())
}

/// Load every snapshot blob and build the node's store from them.
pub async fn restore_all(durable: &dyn DurableStore) -> Result<EntityStore, ServerError> {
    let mut blobs = HashMap::new();
    for key in SnapshotKey::ALL {
        let blob = durable
            .get(key)
            .await?
            .ok_or(StoreError::MissingSnapshot(key))?;
        info!(%key, size = blob.len(), "Loaded snapshot");
        blobs.insert(key, blob);
    }

    let snapshot = Snapshot::decode(&blobs)?;
    Ok(EntityStore::from_snapshot(snapshot))
}

/// Write an empty snapshot when the durable store holds none at all.
///
/// Returns whether anything was written. A partially present snapshot is
/// left alone so that the following restore reports it.
pub async fn seed_empty_if_absent(durable: &dyn DurableStore) -> Result<bool, ServerError> {
    for key in SnapshotKey::ALL {
        if durable.get(key).await?.is_some() {
            return Ok(false);
        }
    }
    write_snapshot(&Snapshot::default(), durable).await?;
    info!("Seeded empty snapshot");
    Ok(true)
}

/// Snapshot the store every `period`, first after one full period.
///
/// A failed round is logged and skipped; the next tick tries again.
pub fn spawn_snapshot_loop(
    store: Arc<EntityStore>,
    durable: Arc<dyn DurableStore>,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            if let Err(e) = snapshot_all(&store, durable.as_ref()).await {
                warn!(error = %e, "Periodic snapshot failed, will retry next interval");
            }
        }
    })
}
