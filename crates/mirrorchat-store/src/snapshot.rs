//! Full-state snapshots of an [`EntityStore`].
//!
//! A snapshot is split into one blob per entity kind so that each can live
//! under its own well-known key in the durable store. Blobs are bincode.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::channel::ChannelLog;
use crate::error::{Result, StoreError};
use crate::models::{Channel, Message, User};
use crate::store::{ChannelEntry, EntityStore};

/// Durable-store key for one part of a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SnapshotKey {
    Users,
    Channels,
    Messages,
}

impl SnapshotKey {
    pub const ALL: [SnapshotKey; 3] = [SnapshotKey::Users, SnapshotKey::Channels, SnapshotKey::Messages];

    pub fn as_str(self) -> &'static str {
        match self {
            SnapshotKey::Users => "users",
            SnapshotKey::Channels => "channels",
            SnapshotKey::Messages => "messages",
        }
    }
}

impl fmt::Display for SnapshotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A channel with its message list and read-position table embedded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelSnapshot {
    pub channel: Channel,
    pub messages: Vec<Message>,
    pub have_read: HashMap<i64, i64>,
}

/// Point-in-time copy of every entity held by a store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub users: HashMap<i64, User>,
    pub channels: HashMap<i64, ChannelSnapshot>,
    pub messages: HashMap<i64, Message>,
}

impl Snapshot {
    /// Serialize the part stored under `key`.
    pub fn encode(&self, key: SnapshotKey) -> Result<Vec<u8>> {
        let encoded = match key {
            SnapshotKey::Users => bincode::serialize(&self.users),
            SnapshotKey::Channels => bincode::serialize(&self.channels),
            SnapshotKey::Messages => bincode::serialize(&self.messages),
        };
        encoded.map_err(|source| StoreError::Codec { key, source })
    }

    /// Rebuild a snapshot from its blobs. Every key must be present and
    /// decodable.
    pub fn decode(blobs: &HashMap<SnapshotKey, Vec<u8>>) -> Result<Self> {
        let blob = |key: SnapshotKey| blobs.get(&key).ok_or(StoreError::MissingSnapshot(key));

        let users = bincode::deserialize(blob(SnapshotKey::Users)?)
            .map_err(codec(SnapshotKey::Users))?;
        let channels = bincode::deserialize(blob(SnapshotKey::Channels)?)
            .map_err(codec(SnapshotKey::Channels))?;
        let messages = bincode::deserialize(blob(SnapshotKey::Messages)?)
            .map_err(codec(SnapshotKey::Messages))?;

        Ok(Self {
            users,
            channels,
            messages,
        })
    }
}

fn codec(key: SnapshotKey) -> impl FnOnce(bincode::Error) -> StoreError {
    move |source| StoreError::Codec { key, source }
}

impl EntityStore {
    /// Copy the whole store. Each map and channel is read under its own
    /// shared lock, so the copy is consistent per channel but not across
    /// kinds.
    pub async fn snapshot(&self) -> Snapshot {
        let users = self.users.read().await.clone();

        let entries: Vec<(i64, std::sync::Arc<ChannelEntry>)> = self
            .channels
            .read()
            .await
            .iter()
            .map(|(id, entry)| (*id, entry.clone()))
            .collect();
        let mut channels = HashMap::with_capacity(entries.len());
        for (id, entry) in entries {
            let channel = entry.info.read().await.clone();
            let log = entry.log.read().await;
            channels.insert(
                id,
                ChannelSnapshot {
                    channel,
                    messages: log.messages().to_vec(),
                    have_read: log.read_positions().clone(),
                },
            );
        }

        let messages = self.messages.read().await.clone();

        Snapshot {
            users,
            channels,
            messages,
        }
    }

    /// Build a fresh store from a snapshot.
    pub fn from_snapshot(snapshot: Snapshot) -> Self {
        let channels = snapshot
            .channels
            .into_iter()
            .map(|(id, ch)| {
                let log = ChannelLog::from_parts(ch.messages, ch.have_read);
                (id, ChannelEntry::new(ch.channel, log))
            })
            .collect::<HashMap<_, _>>();

        info!(
            users = snapshot.users.len(),
            channels = channels.len(),
            messages = snapshot.messages.len(),
            "Entity store restored from snapshot"
        );

        let names = snapshot
            .users
            .values()
            .map(|u| (u.name.clone(), u.id))
            .collect::<HashMap<_, _>>();

        Self {
            users: snapshot.users.into(),
            names: names.into(),
            channels: channels.into(),
            messages: snapshot.messages.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Entity;

    async fn populated() -> EntityStore {
        let store = EntityStore::new();
        store.put(Entity::User(User::register(1, "alice", "pw"))).await;
        store.put(Entity::User(User::register(2, "bob", "pw"))).await;
        store.put_channel(Channel::new(1, "general", "all")).await;
        store.put_channel(Channel::new(2, "random", "misc")).await;
        for (id, ch, user) in [(3, 1, 1), (1, 1, 2), (2, 2, 1)] {
            store
                .append_message(Message::new(id, ch, user, "hello"))
                .await
                .unwrap();
        }
        store.set_read_position(1, 2, 3).await.unwrap();
        store
    }

    fn encode_all(snapshot: &Snapshot) -> HashMap<SnapshotKey, Vec<u8>> {
        SnapshotKey::ALL
            .into_iter()
            .map(|k| (k, snapshot.encode(k).unwrap()))
            .collect()
    }

    #[tokio::test]
    async fn round_trip_into_fresh_store() {
        let original = populated().await;
        let snapshot = original.snapshot().await;

        let decoded = Snapshot::decode(&encode_all(&snapshot)).unwrap();
        assert_eq!(decoded, snapshot);

        let restored = EntityStore::from_snapshot(decoded);
        assert_eq!(restored.snapshot().await, snapshot);
        assert_eq!(restored.user(2).await, original.user(2).await);
        assert_eq!(
            restored.messages_after(1, 0, None).await.unwrap(),
            original.messages_after(1, 0, None).await.unwrap()
        );
        assert_eq!(restored.read_position(1, 2).await.unwrap(), 3);
        assert_eq!(restored.user_by_name("bob").await.unwrap().id, 2);
    }

    #[tokio::test]
    async fn missing_key_is_an_error() {
        let snapshot = populated().await.snapshot().await;
        let mut blobs = encode_all(&snapshot);
        blobs.remove(&SnapshotKey::Messages);

        let err = Snapshot::decode(&blobs).unwrap_err();
        assert!(matches!(err, StoreError::MissingSnapshot(SnapshotKey::Messages)));
    }

    #[tokio::test]
    async fn corrupt_blob_is_an_error() {
        let snapshot = populated().await.snapshot().await;
        let mut blobs = encode_all(&snapshot);
        blobs.insert(SnapshotKey::Channels, vec![0xff; 3]);

        let err = Snapshot::decode(&blobs).unwrap_err();
        assert!(matches!(
            err,
            StoreError::Codec {
                key: SnapshotKey::Channels,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn unordered_channel_blob_is_normalized() {
        let channel = Channel::new(1, "c", "d");
        let mut snapshot = Snapshot::default();
        snapshot.channels.insert(
            1,
            ChannelSnapshot {
                channel,
                messages: vec![
                    Message::new(9, 1, 1, "b"),
                    Message::new(4, 1, 1, "a"),
                    Message::new(9, 1, 1, "b"),
                ],
                have_read: HashMap::new(),
            },
        );

        let store = EntityStore::from_snapshot(snapshot);
        let ids: Vec<i64> = store
            .messages_after(1, 0, None)
            .await
            .unwrap()
            .iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(ids, vec![4, 9]);
    }
}
