//! In-memory cache of one [`Profile`] per active player, backed by a
//! [`KeyValueStore`].
//!
//! The repository owns the only mutable copy of each profile. Callers borrow
//! it through the repository, so mutations from different flows are applied
//! in the order the caller runs them.
//!
//! Store failures never reach the caller of a load: they degrade to a default
//! profile plus a warning. Only the forced and verified save paths report
//! success or failure, and a permanent store error flips the whole repository
//! into [`StoreMode::Offline`].

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::time::Instant;

use crate::errors::VaultError;
use crate::metrics;
use crate::profile::migration::{decode_profile, meta_timestamp};
use crate::profile::types::{PlayerId, Profile};
use crate::store::KeyValueStore;

/// Whether store calls are still being attempted.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreMode {
    Online,
    Offline { reason: String, since: DateTime<Utc> },
}

/// Result of one accepted write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaveReceipt {
    pub written_version: u64,
    /// `data_version` of the blob that was overwritten, if any.
    pub previous_version: Option<u64>,
}

struct CachedProfile {
    profile: Profile,
    dirty: bool,
    last_saved_at: Option<DateTime<Utc>>,
}

impl CachedProfile {
    fn fresh(profile: Profile) -> Self {
        Self {
            profile,
            dirty: false,
            last_saved_at: None,
        }
    }
}

pub struct ProfileRepository<S: KeyValueStore> {
    store: S,
    key_prefix: String,
    cache: HashMap<PlayerId, CachedProfile>,
    mode: StoreMode,
}

impl<S: KeyValueStore> ProfileRepository<S> {
    pub fn new(store: S, key_prefix: impl Into<String>) -> Self {
        Self {
            store,
            key_prefix: key_prefix.into(),
            cache: HashMap::new(),
            mode: StoreMode::Online,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn mode(&self) -> &StoreMode {
        &self.mode
    }

    pub fn is_offline(&self) -> bool {
        matches!(self.mode, StoreMode::Offline { .. })
    }

    /// Store key for a player, e.g. `Player_42`.
    pub fn key(&self, id: PlayerId) -> String {
        format!("{}{}", self.key_prefix, id)
    }

    pub fn is_cached(&self, id: PlayerId) -> bool {
        self.cache.contains_key(&id)
    }

    pub fn cached_ids(&self) -> Vec<PlayerId> {
        let mut ids: Vec<_> = self.cache.keys().copied().collect();
        ids.sort();
        ids
    }

    /// Cached profile, or one loaded from the store. Never fails: store and
    /// decode errors fall back to defaults.
    pub fn get_or_load(&mut self, id: PlayerId) -> &mut Profile {
        &mut self.entry(id).profile
    }

    fn entry(&mut self, id: PlayerId) -> &mut CachedProfile {
        if !self.cache.contains_key(&id) {
            let loaded = self.load(id);
            self.cache.insert(id, CachedProfile::fresh(loaded));
        }
        self.cache
            .entry(id)
            .or_insert_with(|| CachedProfile::fresh(Profile::new(id)))
    }

    fn load(&mut self, id: PlayerId) -> Profile {
        if let StoreMode::Offline { reason, .. } = &self.mode {
            debug!("Store offline ({}); serving default profile for {}", reason, id);
            return Profile::new(id);
        }
        let key = self.key(id);
        match self.store.get(&key) {
            Ok(Some(bytes)) => {
                let report = decode_profile(id, &bytes);
                for note in &report.notes {
                    warn!("Profile {} load: {}", id, note);
                }
                report.profile
            }
            Ok(None) => {
                info!("No stored profile for player {}; creating defaults", id);
                Profile::new(id)
            }
            Err(e) => {
                metrics::inc_degraded_loads();
                let mut profile = Profile::new(id);
                profile
                    .meta
                    .insert("load_degraded".to_string(), meta_timestamp(Utc::now()));
                if e.is_permanent() {
                    self.go_offline(e.to_string());
                } else {
                    warn!(
                        "Failed to load profile {} ({}); serving defaults for this session",
                        id, e
                    );
                }
                profile
            }
        }
    }

    pub fn profile(&self, id: PlayerId) -> Option<&Profile> {
        self.cache.get(&id).map(|entry| &entry.profile)
    }

    /// Mutable access that marks the profile dirty.
    pub fn edit(&mut self, id: PlayerId) -> &mut Profile {
        let entry = self.entry(id);
        entry.dirty = true;
        &mut entry.profile
    }

    pub fn is_dirty(&self, id: PlayerId) -> bool {
        self.cache.get(&id).map(|entry| entry.dirty).unwrap_or(false)
    }

    pub fn mark_dirty(&mut self, id: PlayerId) {
        if let Some(entry) = self.cache.get_mut(&id) {
            entry.dirty = true;
        }
    }

    pub fn last_saved_at(&self, id: PlayerId) -> Option<DateTime<Utc>> {
        self.cache.get(&id).and_then(|entry| entry.last_saved_at)
    }

    pub fn set_coins(&mut self, id: PlayerId, amount: i64) {
        let profile = self.edit(id);
        profile.core.coins = amount.max(0);
        profile.touch();
    }

    /// Add `delta` to the balance, flooring at zero. Returns the new balance.
    pub fn adjust_coins(&mut self, id: PlayerId, delta: i64) -> i64 {
        let profile = self.edit(id);
        let next = profile.core.coins.saturating_add(delta);
        if next < 0 {
            warn!(
                "Coin adjustment {} for player {} would go negative; clamping to 0",
                delta, id
            );
        }
        profile.core.coins = next.max(0);
        profile.touch();
        profile.core.coins
    }

    pub fn set_standing(&mut self, id: PlayerId, faction: &str, value: f64) {
        let clamped = if value.is_finite() { value.clamp(0.0, 1.0) } else { 0.0 };
        let profile = self.edit(id);
        profile.core.standings.insert(faction.to_string(), clamped);
        profile.touch();
    }

    pub fn get_standing(&mut self, id: PlayerId, faction: &str) -> f64 {
        self.get_or_load(id).standing(faction)
    }

    /// Write `data_version + 1`. The cached profile adopts the new version
    /// only once the store accepted the write.
    pub fn write(&mut self, id: PlayerId, reason: &str) -> Result<SaveReceipt, VaultError> {
        if let StoreMode::Offline { reason: why, .. } = &self.mode {
            metrics::inc_saves_skipped_offline();
            return Err(VaultError::Offline(why.clone()));
        }
        let key = self.key(id);
        let Some(entry) = self.cache.get(&id) else {
            return Err(VaultError::NoSession(id));
        };

        let mut candidate = entry.profile.clone();
        candidate.data_version = entry.profile.data_version.saturating_add(1);
        candidate.updated_at = Utc::now();
        candidate
            .meta
            .insert("saved_reason".to_string(), serde_json::Value::from(reason));
        let bytes = serde_json::to_vec(&candidate)?;

        metrics::inc_saves_attempted();
        let started = Instant::now();
        let result = self.store.update(&key, &mut |_| Some(bytes.clone()));
        metrics::observe_save_latency(started);

        let previous = match result {
            Ok(previous) => previous,
            Err(e) => {
                metrics::inc_saves_failed();
                if e.is_permanent() {
                    self.go_offline(e.to_string());
                }
                return Err(e.into());
            }
        };
        metrics::inc_saves_succeeded();

        let previous_version = previous.as_deref().and_then(stored_version);
        if let Some(prev) = previous_version {
            if prev >= candidate.data_version {
                warn!(
                    "Profile {} overwrote stored version {} with {} (another writer?)",
                    id, prev, candidate.data_version
                );
            }
        }

        if let Some(entry) = self.cache.get_mut(&id) {
            entry.profile.data_version = candidate.data_version;
            entry.profile.updated_at = candidate.updated_at;
            entry.profile.meta = candidate.meta;
            entry.dirty = false;
            entry.last_saved_at = Some(candidate.updated_at);
        }
        debug!(
            "Saved profile {} v{} ({})",
            id, candidate.data_version, reason
        );
        Ok(SaveReceipt {
            written_version: candidate.data_version,
            previous_version,
        })
    }

    /// Synchronous save. Returns whether the store accepted the write.
    pub fn force_full_save_now(&mut self, id: PlayerId, reason: &str) -> bool {
        match self.write(id, reason) {
            Ok(_) => true,
            Err(VaultError::Offline(_)) => {
                debug!("Skipping save of {} ({}): store offline", id, reason);
                false
            }
            Err(e) => {
                warn!("Save of profile {} failed ({}): {}", id, reason, e);
                false
            }
        }
    }

    /// Read back the stored blob and check it is at least `written_version`.
    pub fn verify(&mut self, id: PlayerId, written_version: u64) -> Result<bool, VaultError> {
        if let StoreMode::Offline { reason, .. } = &self.mode {
            return Err(VaultError::Offline(reason.clone()));
        }
        let key = self.key(id);
        let stored = match self.store.get(&key) {
            Ok(stored) => stored,
            Err(e) => {
                if e.is_permanent() {
                    self.go_offline(e.to_string());
                }
                return Err(e.into());
            }
        };
        let read_back = stored.as_deref().and_then(stored_version);
        Ok(matches!(read_back, Some(v) if v >= written_version))
    }

    /// Drop the cached profile at session end.
    pub fn evict(&mut self, id: PlayerId) -> Option<Profile> {
        self.cache.remove(&id).map(|entry| {
            if entry.dirty {
                warn!("Evicting profile {} with unsaved changes", id);
            }
            entry.profile
        })
    }

    /// Player ids with a stored record.
    pub fn list_stored_players(&self) -> Result<Vec<PlayerId>, VaultError> {
        let keys = self.store.list_keys(&self.key_prefix)?;
        Ok(keys
            .iter()
            .filter_map(|key| key.strip_prefix(&self.key_prefix))
            .filter_map(|raw| raw.parse::<u64>().ok())
            .map(PlayerId)
            .collect())
    }

    /// Decode the stored record without caching it.
    pub fn peek_stored(&self, id: PlayerId) -> Result<Option<Profile>, VaultError> {
        Ok(self
            .store
            .get(&self.key(id))?
            .map(|bytes| decode_profile(id, &bytes).profile))
    }

    fn go_offline(&mut self, reason: String) {
        if self.is_offline() {
            return;
        }
        error!(
            "Profile store permanently unavailable ({}); serving cached/default data without saving",
            reason
        );
        self.mode = StoreMode::Offline {
            reason,
            since: Utc::now(),
        };
    }
}

/// `data_version` of a stored blob without decoding the whole profile.
fn stored_version(bytes: &[u8]) -> Option<u64> {
    let value: serde_json::Value = serde_json::from_slice(bytes).ok()?;
    ["data_version", "dataVersion", "DataVersion"]
        .iter()
        .find_map(|key| value.get(*key).and_then(serde_json::Value::as_u64))
}
