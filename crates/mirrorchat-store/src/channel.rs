//! Per-channel message list and read-position table.
//!
//! A [`ChannelLog`] is plain data; the owning [`crate::EntityStore`] wraps
//! each one in its own reader/writer lock so channels never contend with
//! each other.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::models::Message;

/// Ordered messages of one channel plus the highest message ID each user has
/// seen in it.
///
/// Invariants: `messages` is sorted by ID ascending with no duplicate IDs,
/// and a read position never moves backwards.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelLog {
    messages: Vec<Message>,
    have_read: HashMap<i64, i64>,
}

impl ChannelLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a log from possibly unordered parts, restoring the ordering
    /// and dedupe invariants.
    pub fn from_parts(mut messages: Vec<Message>, have_read: HashMap<i64, i64>) -> Self {
        messages.sort_by_key(|m| m.id);
        messages.dedup_by_key(|m| m.id);
        Self {
            messages,
            have_read,
        }
    }

    /// Insert a message at its ID position. Returns `false` when a message
    /// with the same ID is already present, leaving the log untouched.
    ///
    /// Messages can arrive out of ID order under replication skew; the list
    /// stays sorted regardless.
    pub fn insert(&mut self, message: Message) -> bool {
        match self.messages.binary_search_by_key(&message.id, |m| m.id) {
            Ok(_) => false,
            Err(pos) => {
                self.messages.insert(pos, message);
                true
            }
        }
    }

    /// Messages with an ID strictly greater than `last_seen`, oldest first.
    pub fn after(&self, last_seen: i64) -> &[Message] {
        let start = self.messages.partition_point(|m| m.id <= last_seen);
        &self.messages[start..]
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Highest message ID `user_id` has seen here, `0` if never recorded.
    pub fn read_position(&self, user_id: i64) -> i64 {
        self.have_read.get(&user_id).copied().unwrap_or(0)
    }

    /// Advance the read position. Returns `false` (and changes nothing) when
    /// `message_id` is not greater than the stored position.
    pub fn advance_read(&mut self, user_id: i64, message_id: i64) -> bool {
        let current = self.have_read.entry(user_id).or_insert(0);
        if message_id > *current {
            *current = message_id;
            true
        } else {
            false
        }
    }

    pub fn read_positions(&self) -> &HashMap<i64, i64> {
        &self.have_read
    }

    /// Number of messages newer than the user's read position.
    pub fn unread_count(&self, user_id: i64) -> usize {
        self.after(self.read_position(user_id)).len()
    }

    /// One page of history, page 1 being the newest `per_page` messages.
    /// Returned oldest first. Out-of-range pages yield an empty slice.
    pub fn page(&self, page: usize, per_page: usize) -> &[Message] {
        let len = self.messages.len();
        let newest_skipped = page.saturating_sub(1).saturating_mul(per_page).min(len);
        let end = len - newest_skipped;
        let start = end.saturating_sub(per_page);
        &self.messages[start..end]
    }
}
