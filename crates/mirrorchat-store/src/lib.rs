//! # mirrorchat-store
//!
//! Process-local, in-memory copy of every chat entity (users, channels,
//! messages and per-user read positions).
//!
//! Each server node owns one [`EntityStore`]. Local writes and writes
//! replicated from peers go through the same operations, so the two paths
//! converge on identical state. The store can be flattened into a
//! [`Snapshot`] for durable persistence and rebuilt from one at startup.

pub mod channel;
pub mod models;
pub mod snapshot;
pub mod store;

mod error;

pub use channel::ChannelLog;
pub use error::StoreError;
pub use models::*;
pub use snapshot::{Snapshot, SnapshotKey};
pub use store::EntityStore;
