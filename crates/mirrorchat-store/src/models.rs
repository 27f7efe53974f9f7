//! Domain model structs replicated between nodes.
//!
//! Every struct derives `Serialize` and `Deserialize` so it can travel as a
//! JSON broadcast payload and inside a bincode snapshot unchanged.

use std::fmt;

use chrono::{DateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Avatar reference given to freshly registered users.
pub const DEFAULT_AVATAR: &str = "default.png";

const SALT_LEN: usize = 20;

// ---------------------------------------------------------------------------
// Entity kind
// ---------------------------------------------------------------------------

/// The category of a replicated record. Each kind has its own ID sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    User,
    Channel,
    Message,
}

impl EntityKind {
    pub const ALL: [EntityKind; 3] = [EntityKind::User, EntityKind::Channel, EntityKind::Message];

    /// Key under which the shared counter keeps this kind's sequence.
    pub fn counter_key(self) -> &'static str {
        match self {
            EntityKind::User => "user",
            EntityKind::Channel => "channel",
            EntityKind::Message => "message",
        }
    }

    pub fn from_counter_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.counter_key() == key)
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.counter_key())
    }
}

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

/// A registered user. Never deleted; only the display name and avatar change.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: i64,
    /// Login name, unique across all users.
    pub name: String,
    pub salt: String,
    /// Hex BLAKE3 digest of `salt || password`.
    pub password: String,
    pub display_name: String,
    pub avatar_icon: String,
    pub created_at: DateTime<Utc>,
}

impl User {
    /// Build a new user with a fresh random salt.
    pub fn register(id: i64, name: &str, password: &str) -> Self {
        let salt: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(SALT_LEN)
            .map(char::from)
            .collect();
        let password = password_digest(&salt, password);

        Self {
            id,
            name: name.to_string(),
            salt,
            password,
            display_name: name.to_string(),
            avatar_icon: DEFAULT_AVATAR.to_string(),
            created_at: Utc::now(),
        }
    }

    pub fn verify_password(&self, password: &str) -> bool {
        password_digest(&self.salt, password) == self.password
    }
}

fn password_digest(salt: &str, password: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize().as_bytes())
}

// ---------------------------------------------------------------------------
// Channel
// ---------------------------------------------------------------------------

/// Channel attributes. The message list and read positions live in
/// [`crate::ChannelLog`] next to it, under the channel's own lock.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Channel {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub updated_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Channel {
    pub fn new(id: i64, name: &str, description: &str) -> Self {
        let now = Utc::now();
        Self {
            id,
            name: name.to_string(),
            description: description.to_string(),
            updated_at: now,
            created_at: now,
        }
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A single chat message. Immutable once created.
///
/// IDs come from one shared counter, so ID order doubles as global creation
/// order. Switching to per-node ID ranges would need an explicit ordering
/// field here.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub id: i64,
    pub channel_id: i64,
    pub user_id: i64,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn new(id: i64, channel_id: i64, user_id: i64, content: &str) -> Self {
        Self {
            id,
            channel_id,
            user_id,
            content: content.to_string(),
            created_at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Entity
// ---------------------------------------------------------------------------

/// Any one replicated record, tagged with its kind.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Entity {
    User(User),
    Channel(Channel),
    Message(Message),
}

impl Entity {
    pub fn kind(&self) -> EntityKind {
        match self {
            Entity::User(_) => EntityKind::User,
            Entity::Channel(_) => EntityKind::Channel,
            Entity::Message(_) => EntityKind::Message,
        }
    }

    pub fn id(&self) -> i64 {
        match self {
            Entity::User(u) => u.id,
            Entity::Channel(c) => c.id,
            Entity::Message(m) => m.id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_salts_and_verifies() {
        let a = User::register(1, "alice", "hunter2");
        let b = User::register(2, "bob", "hunter2");

        assert_eq!(a.salt.len(), SALT_LEN);
        assert_ne!(a.password, b.password, "salts must differ");
        assert!(a.verify_password("hunter2"));
        assert!(!a.verify_password("hunter3"));
        assert_eq!(a.display_name, "alice");
        assert_eq!(a.avatar_icon, DEFAULT_AVATAR);
    }

    #[test]
    fn counter_keys() {
        assert_eq!(EntityKind::Message.counter_key(), "message");
        assert_eq!(EntityKind::from_counter_key("user"), Some(EntityKind::User));
        assert_eq!(EntityKind::from_counter_key("users"), None);
    }

    #[test]
    fn message_json_shape() {
        let m = Message::new(42, 7, 3, "hi");
        let json = serde_json::to_value(&m).unwrap();
        assert_eq!(json["id"], 42);
        assert_eq!(json["channel_id"], 7);
        assert_eq!(json["user_id"], 3);
    }
}
