use thiserror::Error;

use crate::profile::{InventoryField, ItemId, PlayerId};
use crate::store::StoreError;

/// Errors that can arise inside the persistence and inventory layers.
#[derive(Debug, Error)]
pub enum VaultError {
    /// Wrapper around the key-value store's error type.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Wrapper around JSON encoding and decoding errors.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// Wrapper around IO errors.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The repository flipped to offline mode after a permanent store error.
    #[error("store offline: {0}")]
    Offline(String),

    /// Operation on a player with no active session.
    #[error("player {0} has no active session")]
    NoSession(PlayerId),

    /// Payload kind does not belong in the target field.
    #[error("item {id} does not belong in {field}")]
    KindMismatch { field: InventoryField, id: ItemId },
}

impl VaultError {
    /// True when retrying the same store call may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            VaultError::Store(inner) => !inner.is_permanent(),
            _ => false,
        }
    }
}
