use std::path::{Path, PathBuf};

use sled::IVec;

use super::{KeyValueStore, StoreError, UpdateFn};

const TREE_PROFILES: &str = "slimevault_profiles";

/// Sled-backed profile store. Every write is flushed before returning so a
/// successful `set` survives a crash of the host process.
pub struct SledStore {
    _db: sled::Db,
    profiles: sled::Tree,
    path: PathBuf,
}

impl SledStore {
    /// Open (or create) the store rooted at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path_ref = path.as_ref();
        std::fs::create_dir_all(path_ref)?;
        let db = sled::open(path_ref)?;
        let profiles = db.open_tree(TREE_PROFILES)?;
        Ok(Self {
            _db: db,
            profiles,
            path: path_ref.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn to_vec(value: Option<IVec>) -> Option<Vec<u8>> {
        value.map(|bytes| bytes.to_vec())
    }
}

impl KeyValueStore for SledStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(Self::to_vec(self.profiles.get(key.as_bytes())?))
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.profiles.insert(key.as_bytes(), value)?;
        self.profiles.flush()?;
        Ok(())
    }

    fn update(&self, key: &str, f: &mut UpdateFn<'_>) -> Result<Option<Vec<u8>>, StoreError> {
        // sled may call the closure more than once under contention; the last
        // call's `old` is the value that was actually replaced.
        let mut previous: Option<Vec<u8>> = None;
        self.profiles.fetch_and_update(key.as_bytes(), |old| {
            previous = old.map(|bytes| bytes.to_vec());
            match f(old) {
                Some(next) => Some(next),
                None => old.map(|bytes| bytes.to_vec()),
            }
        })?;
        self.profiles.flush()?;
        Ok(previous)
    }

    fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let mut keys = Vec::new();
        for entry in self.profiles.scan_prefix(prefix.as_bytes()) {
            let (key, _) = entry?;
            keys.push(String::from_utf8_lossy(&key).into_owned());
        }
        Ok(keys)
    }
}
