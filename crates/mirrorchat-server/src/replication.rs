//! Best-effort replication between nodes.
//!
//! After a local write succeeds, the writer hands the changed record to a
//! [`Broadcaster`], which notifies every peer without waiting for them.
//! There is no acknowledgement, no retry and no ordering between peers: a
//! lost notification leaves that peer stale until it next restores from a
//! snapshot, so the snapshot interval bounds the consistency window.
//!
//! On the receiving side, [`apply`] runs the same store mutation the local
//! write path runs and never forwards the change again.

use std::time::Duration;

use mirrorchat_store::{Channel, EntityStore, Message, StoreError, User};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// One replicated change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Replication {
    /// New registration or profile update.
    User(User),
    Channel(Channel),
    Message(Message),
    ReadPosition {
        channel_id: i64,
        user_id: i64,
        message_id: i64,
    },
}

impl Replication {
    /// Path of the receiving endpoint on a peer.
    pub fn path(&self) -> String {
        match self {
            Replication::User(_) => "/sync/user".to_string(),
            Replication::Channel(_) => "/sync/channel".to_string(),
            Replication::Message(_) => "/sync/message".to_string(),
            Replication::ReadPosition {
                channel_id,
                user_id,
                message_id,
            } => format!("/sync/haveread/{channel_id}/{user_id}/{message_id}"),
        }
    }
}

/// Sends a change to every peer. Must return without waiting for delivery.
///
/// Callers never learn whether a peer received the change, so a stricter
/// implementation (an outbox with retries, say) can replace the default
/// without touching them.
pub trait Broadcaster: Send + Sync {
    fn broadcast(&self, change: Replication);
}

// ---------------------------------------------------------------------------
// HTTP fire-and-forget
// ---------------------------------------------------------------------------

/// Posts each change to every peer from a detached task per peer.
#[derive(Debug, Clone)]
pub struct HttpBroadcaster {
    client: reqwest::Client,
    peers: Vec<String>,
}

impl HttpBroadcaster {
    pub fn new(peers: Vec<String>, timeout: Duration) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, peers })
    }

    pub fn peers(&self) -> &[String] {
        &self.peers
    }
}

impl Broadcaster for HttpBroadcaster {
    fn broadcast(&self, change: Replication) {
        let path = change.path();
        for peer in &self.peers {
            let url = format!("{peer}{path}");
            let request = match &change {
                Replication::User(user) => self.client.post(&url).json(user),
                Replication::Channel(channel) => self.client.post(&url).json(channel),
                Replication::Message(message) => self.client.post(&url).json(message),
                Replication::ReadPosition { .. } => self.client.post(&url),
            };

            // Outcome is deliberately unobserved.
            tokio::spawn(async move {
                if let Err(e) = request.send().await.and_then(|r| r.error_for_status()) {
                    debug!(url = %url, error = %e, "Broadcast dropped");
                }
            });
        }
    }
}

/// Broadcaster for a node without peers.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopBroadcaster;

impl Broadcaster for NoopBroadcaster {
    fn broadcast(&self, _change: Replication) {}
}

// ---------------------------------------------------------------------------
// Receiver
// ---------------------------------------------------------------------------

/// Apply a change received from a peer to the local store.
///
/// Idempotent: a message already present is not appended again and a read
/// position only ever moves forward.
pub async fn apply(store: &EntityStore, change: Replication) -> Result<(), StoreError> {
    match change {
        Replication::User(user) => {
            debug!(user_id = user.id, "Applying replicated user");
            store.put_user(user).await;
        }
        Replication::Channel(channel) => {
            debug!(channel_id = channel.id, "Applying replicated channel");
            store.put_channel(channel).await;
        }
        Replication::Message(message) => {
            let (id, channel_id) = (message.id, message.channel_id);
            let inserted = store.append_message(message).await?;
            debug!(message_id = id, channel_id, inserted, "Applied replicated message");
        }
        Replication::ReadPosition {
            channel_id,
            user_id,
            message_id,
        } => {
            store
                .set_read_position(channel_id, user_id, message_id)
                .await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store_with_channel() -> EntityStore {
        let store = EntityStore::new();
        store.put_channel(Channel::new(7, "general", "")).await;
        store
    }

    #[tokio::test]
    async fn test_apply_message_twice_is_idempotent() {
        let store = store_with_channel().await;
        let change = Replication::Message(Message::new(42, 7, 3, "hello"));

        apply(&store, change.clone()).await.unwrap();
        let once = store.messages_after(7, 0, None).await.unwrap();
        apply(&store, change).await.unwrap();
        let twice = store.messages_after(7, 0, None).await.unwrap();

        assert_eq!(once, twice);
        assert_eq!(twice.len(), 1);
    }

    #[tokio::test]
    async fn test_apply_read_position_never_regresses() {
        let store = store_with_channel().await;
        for message_id in [10, 4, 10, 12, 1] {
            apply(
                &store,
                Replication::ReadPosition {
                    channel_id: 7,
                    user_id: 3,
                    message_id,
                },
            )
            .await
            .unwrap();
        }
        assert_eq!(store.read_position(7, 3).await.unwrap(), 12);
    }

    #[tokio::test]
    async fn test_apply_message_for_unknown_channel() {
        let store = EntityStore::new();
        let err = apply(&store, Replication::Message(Message::new(1, 99, 1, "x"))).await;
        assert!(matches!(err, Err(StoreError::ChannelNotFound(99))));
    }

    #[test]
    fn test_paths() {
        let change = Replication::ReadPosition {
            channel_id: 7,
            user_id: 3,
            message_id: 42,
        };
        assert_eq!(change.path(), "/sync/haveread/7/3/42");
        assert_eq!(
            Replication::Message(Message::new(1, 1, 1, "")).path(),
            "/sync/message"
        );
    }

    #[tokio::test]
    async fn test_broadcast_to_dead_peer_returns_immediately() {
        let broadcaster =
            HttpBroadcaster::new(vec!["http://127.0.0.1:9".into()], Duration::from_millis(200))
                .unwrap();
        let started = std::time::Instant::now();
        broadcaster.broadcast(Replication::Channel(Channel::new(1, "c", "d")));
        assert!(started.elapsed() < Duration::from_millis(100));
    }
}
