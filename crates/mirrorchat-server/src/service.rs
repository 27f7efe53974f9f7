//! Application-level read and write operations.
//!
//! Every write follows the same sequence: validate, mint an ID from the
//! shared counter, apply to the local store, then broadcast. The broadcast
//! comes last and never blocks, so the writer's own node always serves its
//! write even if every peer misses it.

use std::collections::HashMap;
use std::sync::Arc;

use mirrorchat_store::{Channel, EntityKind, EntityStore, Message, User, DEFAULT_AVATAR};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::counter::CounterService;
use crate::error::ServerError;
use crate::replication::{Broadcaster, Replication};

/// Most messages returned by one poll; older unseen ones are skipped.
pub const MESSAGE_FETCH_LIMIT: usize = 100;

pub const HISTORY_PAGE_SIZE: usize = 20;

const DATE_FORMAT: &str = "%Y/%m/%d %H:%M:%S";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthorView {
    pub name: String,
    pub display_name: String,
    pub avatar_icon: String,
}

impl AuthorView {
    /// Stand-in for an author whose user record has not been replicated to
    /// this node yet.
    fn placeholder(user_id: i64) -> Self {
        Self {
            name: format!("user-{user_id}"),
            display_name: "(unknown)".to_string(),
            avatar_icon: DEFAULT_AVATAR.to_string(),
        }
    }
}

impl From<&User> for AuthorView {
    fn from(user: &User) -> Self {
        Self {
            name: user.name.clone(),
            display_name: user.display_name.clone(),
            avatar_icon: user.avatar_icon.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageView {
    pub id: i64,
    pub user: AuthorView,
    pub date: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnreadCount {
    pub channel_id: i64,
    pub unread: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct HistoryPage {
    pub channel_id: i64,
    pub page: usize,
    pub max_page: usize,
    pub messages: Vec<MessageView>,
}

/// A user as shown to other users: no credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Profile {
    pub id: i64,
    pub name: String,
    pub display_name: String,
    pub avatar_icon: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl From<User> for Profile {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            name: user.name,
            display_name: user.display_name,
            avatar_icon: user.avatar_icon,
            created_at: user.created_at,
        }
    }
}

/// The chat operations of one node.
pub struct ChatService {
    store: Arc<EntityStore>,
    counter: Arc<dyn CounterService>,
    broadcaster: Arc<dyn Broadcaster>,
}

impl ChatService {
    pub fn new(
        store: Arc<EntityStore>,
        counter: Arc<dyn CounterService>,
        broadcaster: Arc<dyn Broadcaster>,
    ) -> Self {
        Self {
            store,
            counter,
            broadcaster,
        }
    }

    pub fn store(&self) -> &Arc<EntityStore> {
        &self.store
    }

    // ------------------------------------------------------------------
    // Users
    // ------------------------------------------------------------------

    /// Register a user. Name uniqueness is checked against this node's
    /// copy only.
    pub async fn create_user(&self, name: &str, password: &str) -> Result<User, ServerError> {
        if name.is_empty() || password.is_empty() {
            return Err(ServerError::BadRequest("name and password are required".into()));
        }
        if self.store.user_by_name(name).await.is_some() {
            return Err(ServerError::Conflict(format!("name {name:?} is taken")));
        }

        let id = self.counter.next_id(EntityKind::User).await?;
        let user = User::register(id, name, password);
        self.store.put_user(user.clone()).await;
        self.broadcaster.broadcast(Replication::User(user.clone()));

        info!(user_id = id, name, "User registered");
        Ok(user)
    }

    /// Check credentials for the external login flow.
    pub async fn verify_password(&self, name: &str, password: &str) -> Result<User, ServerError> {
        match self.store.user_by_name(name).await {
            Some(user) if user.verify_password(password) => Ok(user),
            _ => Err(ServerError::Forbidden("invalid credentials".into())),
        }
    }

    pub async fn profile(&self, name: &str) -> Result<Profile, ServerError> {
        self.store
            .user_by_name(name)
            .await
            .map(Profile::from)
            .ok_or_else(|| ServerError::NotFound(format!("user {name:?}")))
    }

    /// Change the caller's display name and/or avatar reference. Empty
    /// values leave the field unchanged.
    pub async fn update_profile(
        &self,
        caller: i64,
        display_name: Option<&str>,
        avatar_icon: Option<&str>,
    ) -> Result<User, ServerError> {
        let mut user = self.require_user(caller).await?;
        if let Some(name) = display_name.filter(|s| !s.is_empty()) {
            user.display_name = name.to_string();
        }
        if let Some(icon) = avatar_icon.filter(|s| !s.is_empty()) {
            user.avatar_icon = icon.to_string();
        }

        self.store.put_user(user.clone()).await;
        self.broadcaster.broadcast(Replication::User(user.clone()));
        Ok(user)
    }

    async fn require_user(&self, id: i64) -> Result<User, ServerError> {
        self.store
            .user(id)
            .await
            .ok_or_else(|| ServerError::Forbidden(format!("unknown user {id}")))
    }

    // ------------------------------------------------------------------
    // Channels
    // ------------------------------------------------------------------

    pub async fn create_channel(&self, name: &str, description: &str) -> Result<Channel, ServerError> {
        if name.is_empty() || description.is_empty() {
            return Err(ServerError::BadRequest("name and description are required".into()));
        }

        let id = self.counter.next_id(EntityKind::Channel).await?;
        let channel = Channel::new(id, name, description);
        self.store.put_channel(channel.clone()).await;
        self.broadcaster.broadcast(Replication::Channel(channel.clone()));

        info!(channel_id = id, name, "Channel created");
        Ok(channel)
    }

    pub async fn list_channels(&self) -> Vec<Channel> {
        self.store.list_channels().await
    }

    // ------------------------------------------------------------------
    // Messages
    // ------------------------------------------------------------------

    pub async fn post_message(
        &self,
        caller: i64,
        channel_id: i64,
        content: &str,
    ) -> Result<Message, ServerError> {
        if content.is_empty() {
            return Err(ServerError::BadRequest("message is empty".into()));
        }
        self.require_user(caller).await?;
        if self.store.channel(channel_id).await.is_none() {
            return Err(ServerError::NotFound(format!("channel {channel_id}")));
        }

        let id = self.counter.next_id(EntityKind::Message).await?;
        let message = Message::new(id, channel_id, caller, content);
        if !self.store.append_message(message.clone()).await? {
            warn!(message_id = id, channel_id, "Minted message ID already in use");
            return Err(ServerError::Internal("message id already used".into()));
        }
        self.broadcaster.broadcast(Replication::Message(message.clone()));

        debug!(message_id = id, channel_id, user_id = caller, "Message posted");
        Ok(message)
    }

    /// Poll for messages newer than `last_id`. Marks the newest returned
    /// message as read by the caller.
    pub async fn fetch_messages_after(
        &self,
        caller: i64,
        channel_id: i64,
        last_id: i64,
    ) -> Result<Vec<MessageView>, ServerError> {
        self.require_user(caller).await?;
        let messages = self
            .store
            .messages_after(channel_id, last_id, Some(MESSAGE_FETCH_LIMIT))
            .await?;

        if let Some(newest) = messages.last() {
            self.record_read_position(caller, channel_id, newest.id).await?;
        }

        Ok(self.render(&messages).await)
    }

    /// Unread counts of the caller for every channel, by channel ID.
    pub async fn fetch_unread_counts(&self, caller: i64) -> Vec<UnreadCount> {
        self.store
            .unread_counts(caller)
            .await
            .into_iter()
            .map(|(channel_id, unread)| UnreadCount { channel_id, unread })
            .collect()
    }

    /// Advance the caller's read position and tell the peers. Returns
    /// whether the local position moved.
    pub async fn record_read_position(
        &self,
        caller: i64,
        channel_id: i64,
        message_id: i64,
    ) -> Result<bool, ServerError> {
        self.require_user(caller).await?;
        let advanced = self
            .store
            .set_read_position(channel_id, caller, message_id)
            .await?;
        self.broadcaster.broadcast(Replication::ReadPosition {
            channel_id,
            user_id: caller,
            message_id,
        });
        Ok(advanced)
    }

    pub async fn history(&self, channel_id: i64, page: i64) -> Result<HistoryPage, ServerError> {
        if page < 1 {
            return Err(ServerError::BadRequest(format!("invalid page {page}")));
        }
        let page = page as usize;

        let (messages, total) = self
            .store
            .history(channel_id, page, HISTORY_PAGE_SIZE)
            .await?;
        let max_page = total.div_ceil(HISTORY_PAGE_SIZE).max(1);
        if page > max_page {
            return Err(ServerError::BadRequest(format!("page {page} > {max_page}")));
        }

        Ok(HistoryPage {
            channel_id,
            page,
            max_page,
            messages: self.render(&messages).await,
        })
    }

    /// Attach author details. An author missing on this node (not yet
    /// replicated) gets a placeholder instead of failing the whole list.
    async fn render(&self, messages: &[Message]) -> Vec<MessageView> {
        let authors: HashMap<i64, User> = self
            .store
            .users_by_id(messages.iter().map(|m| m.user_id))
            .await;

        messages
            .iter()
            .map(|m| {
                let user = match authors.get(&m.user_id) {
                    Some(user) => AuthorView::from(user),
                    None => {
                        debug!(message_id = m.id, user_id = m.user_id, "Author not replicated yet");
                        AuthorView::placeholder(m.user_id)
                    }
                };
                MessageView {
                    id: m.id,
                    user,
                    date: m.created_at.format(DATE_FORMAT).to_string(),
                    content: m.content.clone(),
                }
            })
            .collect()
    }
}
