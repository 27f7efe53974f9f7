use thiserror::Error;

use crate::snapshot::SnapshotKey;

/// Errors produced by the store layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The channel is not (yet) known on this node.
    #[error("Channel not found: {0}")]
    ChannelNotFound(i64),

    /// The user is not (yet) known on this node.
    #[error("User not found: {0}")]
    UserNotFound(i64),

    /// A snapshot blob was absent from the durable store.
    #[error("Snapshot key missing: {0}")]
    MissingSnapshot(SnapshotKey),

    /// A snapshot blob could not be encoded or decoded.
    #[error("Snapshot codec error for {key}: {source}")]
    Codec {
        key: SnapshotKey,
        #[source]
        source: bincode::Error,
    },
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
