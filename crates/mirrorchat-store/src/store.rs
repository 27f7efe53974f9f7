//! The per-node entity store.
//!
//! Locking is sharded: the user, channel and message maps each sit behind
//! their own reader/writer lock, and every channel carries a separate lock
//! for its message list and read positions. No operation holds a lock
//! across two entity kinds, and writers on one channel never block readers
//! of another.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::debug;

use crate::channel::ChannelLog;
use crate::error::{Result, StoreError};
use crate::models::{Channel, Entity, EntityKind, Message, User};

/// A channel's attributes and its log, each independently lockable.
#[derive(Debug)]
pub(crate) struct ChannelEntry {
    pub(crate) info: RwLock<Channel>,
    pub(crate) log: RwLock<ChannelLog>,
}

impl ChannelEntry {
    pub(crate) fn new(info: Channel, log: ChannelLog) -> Arc<Self> {
        Arc::new(Self {
            info: RwLock::new(info),
            log: RwLock::new(log),
        })
    }
}

/// In-memory copy of every user, channel and message known to this node.
///
/// The same operations serve local writes and writes replicated from peers.
/// Writes are last-writer-wins upserts except for the two monotonic
/// structures: channel message lists (insert-once by ID) and read positions
/// (only ever advance).
#[derive(Debug, Default)]
pub struct EntityStore {
    pub(crate) users: RwLock<HashMap<i64, User>>,
    /// Login name to user ID. Only written while `users` is write-locked.
    pub(crate) names: RwLock<HashMap<String, i64>>,
    pub(crate) channels: RwLock<HashMap<i64, Arc<ChannelEntry>>>,
    pub(crate) messages: RwLock<HashMap<i64, Message>>,
}

impl EntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    // ------------------------------------------------------------------
    // Generic access
    // ------------------------------------------------------------------

    /// Unconditional upsert, last writer wins.
    ///
    /// A message is only recorded in the message map here; use
    /// [`EntityStore::append_message`] to also place it in its channel.
    pub async fn put(&self, entity: Entity) {
        match entity {
            Entity::User(user) => self.put_user(user).await,
            Entity::Channel(channel) => self.put_channel(channel).await,
            Entity::Message(message) => {
                self.messages.write().await.insert(message.id, message);
            }
        }
    }

    /// Look up any entity by kind and ID. `None` may simply mean the record
    /// has not been replicated here yet.
    pub async fn get(&self, kind: EntityKind, id: i64) -> Option<Entity> {
        match kind {
            EntityKind::User => self.user(id).await.map(Entity::User),
            EntityKind::Channel => self.channel(id).await.map(Entity::Channel),
            EntityKind::Message => self.message(id).await.map(Entity::Message),
        }
    }

    // ------------------------------------------------------------------
    // Users
    // ------------------------------------------------------------------

    pub async fn put_user(&self, user: User) {
        let mut users = self.users.write().await;
        let mut names = self.names.write().await;
        if let Some(previous) = users.get(&user.id) {
            if previous.name != user.name && names.get(&previous.name) == Some(&user.id) {
                names.remove(&previous.name);
            }
        }
        names.insert(user.name.clone(), user.id);
        users.insert(user.id, user);
    }

    pub async fn user(&self, id: i64) -> Option<User> {
        self.users.read().await.get(&id).cloned()
    }

    pub async fn user_by_name(&self, name: &str) -> Option<User> {
        let id = *self.names.read().await.get(name)?;
        self.user(id).await
    }

    /// Resolve several users under a single read lock. Unknown IDs are left
    /// out of the result.
    pub async fn users_by_id(&self, ids: impl IntoIterator<Item = i64>) -> HashMap<i64, User> {
        let users = self.users.read().await;
        ids.into_iter()
            .filter_map(|id| users.get(&id).map(|u| (id, u.clone())))
            .collect()
    }

    // ------------------------------------------------------------------
    // Channels
    // ------------------------------------------------------------------

    /// Upsert channel attributes. An existing channel keeps its messages and
    /// read positions.
    pub async fn put_channel(&self, channel: Channel) {
        let existing = self.channels.read().await.get(&channel.id).cloned();
        if let Some(entry) = existing {
            *entry.info.write().await = channel;
            return;
        }

        let mut channels = self.channels.write().await;
        match channels.get(&channel.id) {
            // Lost the race against a concurrent insert of the same channel.
            Some(entry) => *entry.info.write().await = channel,
            None => {
                channels.insert(channel.id, ChannelEntry::new(channel, ChannelLog::new()));
            }
        }
    }

    pub async fn channel(&self, id: i64) -> Option<Channel> {
        let entry = self.channel_entry(id).await?;
        let info = entry.info.read().await;
        Some(info.clone())
    }

    /// All channels, ordered by ID.
    pub async fn list_channels(&self) -> Vec<Channel> {
        let entries: Vec<Arc<ChannelEntry>> = self.channels.read().await.values().cloned().collect();

        let mut channels = Vec::with_capacity(entries.len());
        for entry in entries {
            channels.push(entry.info.read().await.clone());
        }
        channels.sort_by_key(|c| c.id);
        channels
    }

    pub(crate) async fn channel_entry(&self, id: i64) -> Option<Arc<ChannelEntry>> {
        self.channels.read().await.get(&id).cloned()
    }

    async fn require_channel(&self, id: i64) -> Result<Arc<ChannelEntry>> {
        self.channel_entry(id)
            .await
            .ok_or(StoreError::ChannelNotFound(id))
    }

    // ------------------------------------------------------------------
    // Messages
    // ------------------------------------------------------------------

    pub async fn message(&self, id: i64) -> Option<Message> {
        self.messages.read().await.get(&id).cloned()
    }

    /// Record a message and place it in its channel's list at its ID
    /// position, holding the channel's exclusive lock for the insert.
    ///
    /// Idempotent: re-applying a message already in the list changes
    /// nothing and returns `Ok(false)`.
    pub async fn append_message(&self, message: Message) -> Result<bool> {
        let entry = self.require_channel(message.channel_id).await?;

        self.messages
            .write()
            .await
            .insert(message.id, message.clone());

        let (id, channel_id) = (message.id, message.channel_id);
        let inserted = entry.log.write().await.insert(message);
        if !inserted {
            debug!(message_id = id, channel_id, "Duplicate message ignored");
        }
        Ok(inserted)
    }

    /// Messages with ID greater than `last_seen`, oldest first, under the
    /// channel's shared lock. With a `limit`, only the newest `limit` of
    /// them are returned.
    pub async fn messages_after(
        &self,
        channel_id: i64,
        last_seen: i64,
        limit: Option<usize>,
    ) -> Result<Vec<Message>> {
        let entry = self.require_channel(channel_id).await?;
        let log = entry.log.read().await;
        let after = log.after(last_seen);
        let start = match limit {
            Some(limit) => after.len().saturating_sub(limit),
            None => 0,
        };
        Ok(after[start..].to_vec())
    }

    /// One page of channel history (page 1 = newest) together with the
    /// channel's total message count.
    pub async fn history(
        &self,
        channel_id: i64,
        page: usize,
        per_page: usize,
    ) -> Result<(Vec<Message>, usize)> {
        let entry = self.require_channel(channel_id).await?;
        let log = entry.log.read().await;
        Ok((log.page(page, per_page).to_vec(), log.len()))
    }

    // ------------------------------------------------------------------
    // Read positions
    // ------------------------------------------------------------------

    /// Advance a user's read position in a channel. Smaller or equal IDs
    /// are ignored; returns whether the stored value changed.
    pub async fn set_read_position(
        &self,
        channel_id: i64,
        user_id: i64,
        message_id: i64,
    ) -> Result<bool> {
        let entry = self.require_channel(channel_id).await?;
        let advanced = entry.log.write().await.advance_read(user_id, message_id);
        Ok(advanced)
    }

    pub async fn read_position(&self, channel_id: i64, user_id: i64) -> Result<i64> {
        let entry = self.require_channel(channel_id).await?;
        let position = entry.log.read().await.read_position(user_id);
        Ok(position)
    }

    /// Unread message count for `user_id` in every channel, ordered by
    /// channel ID.
    pub async fn unread_counts(&self, user_id: i64) -> Vec<(i64, usize)> {
        let mut entries: Vec<(i64, Arc<ChannelEntry>)> = self
            .channels
            .read()
            .await
            .iter()
            .map(|(id, entry)| (*id, entry.clone()))
            .collect();
        entries.sort_by_key(|(id, _)| *id);

        let mut counts = Vec::with_capacity(entries.len());
        for (id, entry) in entries {
            counts.push((id, entry.log.read().await.unread_count(user_id)));
        }
        counts
    }

    /// Number of users, channels and messages currently held.
    pub async fn counts(&self) -> (usize, usize, usize) {
        let users = self.users.read().await.len();
        let channels = self.channels.read().await.len();
        let messages = self.messages.read().await.len();
        (users, channels, messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store_with_channel(id: i64) -> EntityStore {
        let store = EntityStore::new();
        store.put_channel(Channel::new(id, "general", "chit-chat")).await;
        store
    }

    fn ids(messages: &[Message]) -> Vec<i64> {
        messages.iter().map(|m| m.id).collect()
    }

    #[tokio::test]
    async fn put_and_get_every_kind() {
        let store = store_with_channel(7).await;
        store.put(Entity::User(User::register(3, "carol", "pw"))).await;
        store.put(Entity::Message(Message::new(42, 7, 3, "hello"))).await;

        assert!(matches!(store.get(EntityKind::User, 3).await, Some(Entity::User(u)) if u.name == "carol"));
        assert!(matches!(store.get(EntityKind::Channel, 7).await, Some(Entity::Channel(_))));
        assert!(matches!(store.get(EntityKind::Message, 42).await, Some(Entity::Message(_))));
        assert!(store.get(EntityKind::User, 99).await.is_none());
    }

    #[tokio::test]
    async fn put_user_is_last_writer_wins() {
        let store = EntityStore::new();
        let mut user = User::register(1, "dave", "pw");
        store.put_user(user.clone()).await;
        user.display_name = "Dave!".into();
        store.put_user(user).await;

        assert_eq!(store.user(1).await.unwrap().display_name, "Dave!");
        assert_eq!(store.user_by_name("dave").await.unwrap().id, 1);
    }

    #[tokio::test]
    async fn user_by_name_follows_renames() {
        let store = EntityStore::new();
        store.put_user(User::register(1, "dave", "pw")).await;
        store.put_user(User::register(2, "erin", "pw")).await;

        let mut renamed = store.user(1).await.unwrap();
        renamed.name = "david".into();
        store.put_user(renamed).await;

        assert!(store.user_by_name("dave").await.is_none());
        assert_eq!(store.user_by_name("david").await.unwrap().id, 1);
        assert_eq!(store.user_by_name("erin").await.unwrap().id, 2);
        assert!(store.user_by_name("nobody").await.is_none());
    }

    #[tokio::test]
    async fn append_out_of_order_stays_sorted() {
        let store = store_with_channel(1).await;
        for id in [3, 1, 2] {
            assert!(store.append_message(Message::new(id, 1, 1, "x")).await.unwrap());
        }
        let all = store.messages_after(1, 0, None).await.unwrap();
        assert_eq!(ids(&all), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn append_same_message_twice_is_idempotent() {
        let store = store_with_channel(1).await;
        let m = Message::new(5, 1, 1, "once");

        assert!(store.append_message(m.clone()).await.unwrap());
        let once = store.messages_after(1, 0, None).await.unwrap();
        assert!(!store.append_message(m).await.unwrap());
        let twice = store.messages_after(1, 0, None).await.unwrap();

        assert_eq!(once, twice);
        assert_eq!(twice.len(), 1);
    }

    #[tokio::test]
    async fn append_to_unknown_channel_fails_without_side_effects() {
        let store = EntityStore::new();
        let err = store.append_message(Message::new(1, 9, 1, "x")).await;
        assert!(matches!(err, Err(StoreError::ChannelNotFound(9))));
        assert!(store.message(1).await.is_none());
    }

    #[tokio::test]
    async fn messages_after_limit_keeps_newest() {
        let store = store_with_channel(1).await;
        for id in 1..=10 {
            store.append_message(Message::new(id, 1, 1, "x")).await.unwrap();
        }
        let tail = store.messages_after(1, 2, Some(3)).await.unwrap();
        assert_eq!(ids(&tail), vec![8, 9, 10]);
    }

    #[tokio::test]
    async fn put_channel_keeps_log() {
        let store = store_with_channel(1).await;
        store.append_message(Message::new(1, 1, 1, "x")).await.unwrap();
        store.set_read_position(1, 4, 1).await.unwrap();

        store.put_channel(Channel::new(1, "renamed", "desc")).await;

        assert_eq!(store.channel(1).await.unwrap().name, "renamed");
        assert_eq!(store.messages_after(1, 0, None).await.unwrap().len(), 1);
        assert_eq!(store.read_position(1, 4).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn read_position_is_non_decreasing() {
        let store = store_with_channel(1).await;
        let mut seen = 0;
        for id in [5, 2, 9, 9, 1, 12, 3] {
            store.set_read_position(1, 2, id).await.unwrap();
            let now = store.read_position(1, 2).await.unwrap();
            assert!(now >= seen);
            seen = now;
        }
        assert_eq!(seen, 12);
        assert_eq!(store.read_position(1, 77).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn list_channels_sorted_and_unread_counts() {
        let store = EntityStore::new();
        for id in [3, 1, 2] {
            store.put_channel(Channel::new(id, "c", "d")).await;
        }
        for id in 1..=4 {
            store.append_message(Message::new(id, 2, 1, "x")).await.unwrap();
        }
        store.set_read_position(2, 8, 3).await.unwrap();

        let ids: Vec<i64> = store.list_channels().await.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(store.unread_counts(8).await, vec![(1, 0), (2, 1), (3, 0)]);
    }

    #[tokio::test]
    async fn concurrent_appends_on_one_channel() {
        let store = Arc::new(store_with_channel(1).await);

        let mut handles = Vec::new();
        for id in (1..=50).rev() {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.append_message(Message::new(id, 1, 1, "x")).await.unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let all = store.messages_after(1, 0, None).await.unwrap();
        assert_eq!(ids(&all), (1..=50).collect::<Vec<_>>());
    }
}
