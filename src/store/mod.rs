//! Key-value persistence boundary.
//!
//! Player profiles are written as opaque blobs under `"Player_<id>"` keys. The
//! platform datastore is modelled by the [`KeyValueStore`] trait so the profile
//! repository can run against the sled-backed [`SledStore`] in production and
//! the fault-injecting [`MemoryStore`] in tests.

pub mod memory;
pub mod sled_store;

use thiserror::Error;

pub use memory::{MemoryStore, MemoryStoreFaults};
pub use sled_store::SledStore;

/// Errors surfaced by a [`KeyValueStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    /// Timeouts, throttling and other failures worth retrying.
    #[error("transient store error: {0}")]
    Transient(String),

    /// The store is unreachable or disabled in this environment. Not retried.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Wrapper around sled's error type.
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    /// Wrapper around IO errors (directory creation, etc.).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Permanent errors flip the profile repository into offline mode.
    pub fn is_permanent(&self) -> bool {
        match self {
            StoreError::Unavailable(_) => true,
            StoreError::Sled(sled::Error::Unsupported(_)) => true,
            StoreError::Sled(sled::Error::ReportableBug(_)) => true,
            StoreError::Sled(_) | StoreError::Transient(_) | StoreError::Io(_) => false,
        }
    }
}

/// Read-modify-write callback for [`KeyValueStore::update`]. Receives the
/// current value and returns the value to store (`None` leaves it untouched).
pub type UpdateFn<'a> = dyn FnMut(Option<&[u8]>) -> Option<Vec<u8>> + 'a;

/// Minimal persistent key-value contract the profile layer relies on.
pub trait KeyValueStore: Send {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError>;

    /// Atomically apply `f` to the current value. Returns the previous value.
    fn update(&self, key: &str, f: &mut UpdateFn<'_>) -> Result<Option<Vec<u8>>, StoreError>;

    fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StoreError>;
}

impl<T: KeyValueStore + Sync> KeyValueStore for std::sync::Arc<T> {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        (**self).set(key, value)
    }

    fn update(&self, key: &str, f: &mut UpdateFn<'_>) -> Result<Option<Vec<u8>>, StoreError> {
        (**self).update(key, f)
    }

    fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        (**self).list_keys(prefix)
    }
}
