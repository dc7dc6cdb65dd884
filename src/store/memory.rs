use std::collections::BTreeMap;
use std::sync::Mutex;

use super::{KeyValueStore, StoreError, UpdateFn};

/// Failure knobs for [`MemoryStore`]. Counters are consumed one per call.
#[derive(Debug, Clone, Default)]
pub struct MemoryStoreFaults {
    /// Next N reads fail with a transient error.
    pub failing_reads: u32,
    /// Next N writes fail with a transient error.
    pub failing_writes: u32,
    /// Next N writes report success but are silently discarded.
    pub dropped_writes: u32,
    /// Every call fails with [`StoreError::Unavailable`].
    pub unavailable: bool,
}

#[derive(Default)]
struct Inner {
    data: BTreeMap<String, Vec<u8>>,
    faults: MemoryStoreFaults,
    reads: u64,
    writes: u64,
}

/// In-process store used by tests and `--memory` dry runs.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_faults(faults: MemoryStoreFaults) -> Self {
        let store = Self::default();
        store.set_faults(faults);
        store
    }

    pub fn set_faults(&self, faults: MemoryStoreFaults) {
        self.lock().faults = faults;
    }

    /// Number of `get` calls that reached the store (failed ones included).
    pub fn read_count(&self) -> u64 {
        self.lock().reads
    }

    /// Number of write calls (`set` and `update`) that reached the store.
    pub fn write_count(&self) -> u64 {
        self.lock().writes
    }

    /// Raw access for assertions, bypassing fault injection.
    pub fn raw(&self, key: &str) -> Option<Vec<u8>> {
        self.lock().data.get(key).cloned()
    }

    /// Seed a value, bypassing fault injection.
    pub fn insert_raw(&self, key: &str, value: Vec<u8>) {
        self.lock().data.insert(key.to_string(), value);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A poisoned lock only means a test panicked mid-call; the map is still usable.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Inner {
    fn check_available(&self) -> Result<(), StoreError> {
        if self.faults.unavailable {
            return Err(StoreError::Unavailable(
                "memory store marked unavailable".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns `Ok(false)` when the write should be swallowed.
    fn admit_write(&mut self) -> Result<bool, StoreError> {
        self.writes += 1;
        self.check_available()?;
        if self.faults.failing_writes > 0 {
            self.faults.failing_writes -= 1;
            return Err(StoreError::Transient("injected write failure".to_string()));
        }
        if self.faults.dropped_writes > 0 {
            self.faults.dropped_writes -= 1;
            return Ok(false);
        }
        Ok(true)
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let mut inner = self.lock();
        inner.reads += 1;
        inner.check_available()?;
        if inner.faults.failing_reads > 0 {
            inner.faults.failing_reads -= 1;
            return Err(StoreError::Transient("injected read failure".to_string()));
        }
        Ok(inner.data.get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        let mut inner = self.lock();
        if inner.admit_write()? {
            inner.data.insert(key.to_string(), value.to_vec());
        }
        Ok(())
    }

    fn update(&self, key: &str, f: &mut UpdateFn<'_>) -> Result<Option<Vec<u8>>, StoreError> {
        let mut inner = self.lock();
        let persist = inner.admit_write()?;
        let previous = inner.data.get(key).cloned();
        if let Some(next) = f(previous.as_deref()) {
            if persist {
                inner.data.insert(key.to_string(), next);
            }
        }
        Ok(previous)
    }

    fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let inner = self.lock();
        inner.check_available()?;
        Ok(inner
            .data
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect())
    }
}
