//! Session orchestration.
//!
//! [`VaultService`] owns the profile repository, the inventory sync layer,
//! each active player's world and the work queue. All mutation goes through
//! it on a single task, so no locking is needed: the host bridge (or a test)
//! calls a hook, then drives [`VaultService::run_due`] as time advances.

mod exit;
mod requests;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use crate::config::Config;
use crate::errors::VaultError;
use crate::inventory::{
    default_serializers, FieldSerializer, InventorySync, PlayerWorld, RemoveOptions,
    RemoveOutcome, SerializeReport, UpsertOutcome,
};
use crate::logutil::escape_log;
use crate::profile::{InventoryField, Item, ItemId, ItemPayload, PlayerId, ProfileRepository};
use crate::schedule::{Clock, Work, WorkQueue};
use crate::store::KeyValueStore;

/// What one executed unit of work did.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkOutcome {
    Saved { player: PlayerId, version: u64 },
    SaveSkipped { player: PlayerId, why: String },
    SaveFailed { player: PlayerId, error: String },
    Swept { serialized: usize, saved: usize },
    ExitWritten { player: PlayerId, attempt: u32, version: u64 },
    ExitWriteFailed { player: PlayerId, attempt: u32, error: String },
    ExitVerified { player: PlayerId, attempt: u32, version: u64 },
    ExitVerifyMismatch { player: PlayerId, attempt: u32 },
    ExitExhausted { player: PlayerId, attempts: u32 },
    RemovalRetried { player: PlayerId, item: ItemId, removed: bool },
}

impl fmt::Display for WorkOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkOutcome::Saved { player, version } => write!(f, "saved {} v{}", player, version),
            WorkOutcome::SaveSkipped { player, why } => write!(f, "save of {} skipped: {}", player, why),
            WorkOutcome::SaveFailed { player, error } => write!(f, "save of {} failed: {}", player, error),
            WorkOutcome::Swept { serialized, saved } => {
                write!(f, "sweep: {} serialized, {} saved", serialized, saved)
            }
            WorkOutcome::ExitWritten { player, attempt, version } => {
                write!(f, "exit save {} attempt {} wrote v{}", player, attempt, version)
            }
            WorkOutcome::ExitWriteFailed { player, attempt, error } => {
                write!(f, "exit save {} attempt {} failed: {}", player, attempt, error)
            }
            WorkOutcome::ExitVerified { player, attempt, version } => {
                write!(f, "exit save {} verified v{} on attempt {}", player, version, attempt)
            }
            WorkOutcome::ExitVerifyMismatch { player, attempt } => {
                write!(f, "exit save {} attempt {} read back stale data", player, attempt)
            }
            WorkOutcome::ExitExhausted { player, attempts } => {
                write!(f, "exit save {} gave up after {} attempts", player, attempts)
            }
            WorkOutcome::RemovalRetried { player, item, removed } => {
                write!(f, "removal retry {} for {}: removed={}", item, player, removed)
            }
        }
    }
}

/// Summary of [`VaultService::on_process_shutdown`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ShutdownReport {
    pub saved: Vec<PlayerId>,
    pub failed: Vec<PlayerId>,
}

pub struct VaultService<S: KeyValueStore> {
    config: Config,
    repo: ProfileRepository<S>,
    sync: InventorySync,
    worlds: HashMap<PlayerId, PlayerWorld>,
    queue: WorkQueue,
    clock: Arc<dyn Clock>,
    /// Players whose exit save is still running.
    leaving: HashSet<PlayerId>,
}

impl<S: KeyValueStore> VaultService<S> {
    pub fn new(store: S, config: Config, clock: Arc<dyn Clock>) -> Self {
        let mut sync = InventorySync::new(config.sync_config());
        for serializer in default_serializers(config.inventory.protect_grace()) {
            sync.register(serializer);
        }
        let mut queue = WorkQueue::new();
        queue.schedule(
            clock.now() + config.saves.autosave_interval(),
            Work::PeriodicSweep,
        );
        let repo = ProfileRepository::new(store, config.storage.key_prefix.clone());
        Self {
            config,
            repo,
            sync,
            worlds: HashMap::new(),
            queue,
            clock,
            leaving: HashSet::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn repository(&self) -> &ProfileRepository<S> {
        &self.repo
    }

    pub fn repository_mut(&mut self) -> &mut ProfileRepository<S> {
        &mut self.repo
    }

    pub fn sync(&self) -> &InventorySync {
        &self.sync
    }

    pub fn queue(&self) -> &WorkQueue {
        &self.queue
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn world(&self, player: PlayerId) -> Option<&PlayerWorld> {
        self.worlds.get(&player)
    }

    /// Replace the adapter for one field.
    pub fn register_serializer(&mut self, serializer: Box<dyn FieldSerializer>) {
        self.sync.register(serializer);
    }

    /// In session and not on the way out.
    pub fn is_active(&self, player: PlayerId) -> bool {
        self.worlds.contains_key(&player) && !self.leaving.contains(&player)
    }

    pub fn active_players(&self) -> Vec<PlayerId> {
        let mut players: Vec<PlayerId> = self
            .worlds
            .keys()
            .copied()
            .filter(|p| !self.leaving.contains(p))
            .collect();
        players.sort();
        players
    }

    /// Preload the profile, open the guard's session window and restore the
    /// saved inventory into a fresh world.
    pub fn on_player_join(&mut self, player: PlayerId) {
        let now = self.clock.now();
        if self.leaving.remove(&player) {
            info!("Player {} rejoined before the exit save finished", player);
            self.sync.begin_session(player, now);
            return;
        }
        if self.worlds.contains_key(&player) {
            warn!("Join for player {} who is already in session", player);
            return;
        }

        let snapshot = self.repo.get_or_load(player).inventory.clone();
        self.sync.begin_session(player, now);
        let world = self.worlds.entry(player).or_default();
        let merged = self.sync.restore_player(player, world, &snapshot, now);

        let profile = self.repo.get_or_load(player);
        let restored: usize = merged.values().map(Vec::len).sum();
        profile.inventory = merged;
        profile.meta.insert(
            "session_started_at".to_string(),
            crate::profile::migration::meta_timestamp(now),
        );
        info!(
            "Player {} joined: v{}, {} coins, {} items restored",
            player, profile.data_version, profile.core.coins, restored
        );
    }

    /// Run the final serialize and start the exit save. Due work (the first
    /// write) runs immediately; verification and retries follow on the queue.
    pub fn on_player_leave(&mut self, player: PlayerId) -> Vec<WorkOutcome> {
        if !self.is_active(player) {
            debug!("Leave for player {} without an active session", player);
            return Vec::new();
        }
        let now = self.clock.now();
        self.serialize_player(player, "player leaving", true, now);
        self.triple_exit_save(player);
        self.run_due()
    }

    /// Execute all work due at the clock's current time.
    pub fn run_due(&mut self) -> Vec<WorkOutcome> {
        let now = self.clock.now();
        let mut outcomes = Vec::new();
        while let Some(work) = self.queue.pop_due(now) {
            if let Some(outcome) = self.execute(work, now) {
                outcomes.push(outcome);
            }
        }
        outcomes
    }

    fn execute(&mut self, work: Work, now: DateTime<Utc>) -> Option<WorkOutcome> {
        match work {
            Work::Save { player, reason } => Some(self.run_save(player, &reason, now)),
            Work::PeriodicSweep => Some(self.run_sweep(now)),
            Work::ExitSaveAttempt { player, attempt } => {
                Some(self.run_exit_attempt(player, attempt, now))
            }
            Work::ExitSaveVerify {
                player,
                attempt,
                written_version,
            } => Some(self.run_exit_verify(player, attempt, written_version, now)),
            Work::RetryRemoval {
                player,
                field,
                item,
                reason,
            } => self.run_removal_retry(player, field, item, &reason, now),
        }
    }

    /// Serialize the player's world into the cached profile.
    ///
    /// Suspicious guard verdicts are recorded under `meta["guard.<field>"]`.
    /// When a count changed the profile is marked dirty and, if
    /// `schedule_save`, a debounced save is queued.
    fn serialize_into_profile(
        &mut self,
        player: PlayerId,
        reason: &str,
        final_save: bool,
        now: DateTime<Utc>,
        schedule_save: bool,
    ) -> Option<SerializeReport> {
        let world = self.worlds.get(&player)?;
        let report = self.sync.serialize(player, world, reason, final_save, now);

        let profile = self.repo.get_or_load(player);
        for (field, items) in &report.snapshot {
            profile.inventory.insert(*field, items.clone());
        }
        for change in report.suspicious() {
            profile.meta.insert(
                format!("guard.{}", change.field),
                serde_json::json!({
                    "verdict": change.verdict,
                    "at": now.to_rfc3339(),
                    "reason": reason,
                }),
            );
        }
        if report.any_changed() {
            self.repo.mark_dirty(player);
            if schedule_save && !final_save {
                self.queue
                    .schedule_save(player, now + self.config.saves.dirty_save_delay(), reason);
            }
        }
        Some(report)
    }

    /// Serialize a player and queue a debounced save if anything changed.
    pub fn serialize_player(
        &mut self,
        player: PlayerId,
        reason: &str,
        final_save: bool,
        now: DateTime<Utc>,
    ) -> Option<SerializeReport> {
        self.serialize_into_profile(player, reason, final_save, now, true)
    }

    /// Request a save without blocking; it runs on the next `run_due`.
    pub fn save_now(&mut self, player: PlayerId, reason: &str) {
        let now = self.clock.now();
        self.queue.schedule_save(player, now, reason);
    }

    /// Mark the profile dirty and queue a debounced save.
    pub fn mark_changed(&mut self, player: PlayerId, reason: &str) {
        let now = self.clock.now();
        self.repo.mark_dirty(player);
        self.queue
            .schedule_save(player, now + self.config.saves.dirty_save_delay(), reason);
    }

    /// Serialize and write synchronously. Returns whether the store accepted it.
    pub fn force_full_save_now(&mut self, player: PlayerId, reason: &str) -> bool {
        let now = self.clock.now();
        self.serialize_into_profile(player, reason, false, now, false);
        self.repo.force_full_save_now(player, reason)
    }

    fn run_save(&mut self, player: PlayerId, reason: &str, now: DateTime<Utc>) -> WorkOutcome {
        if self.leaving.contains(&player) {
            return WorkOutcome::SaveSkipped {
                player,
                why: "exit save in progress".to_string(),
            };
        }
        if !self.repo.is_cached(player) {
            return WorkOutcome::SaveSkipped {
                player,
                why: "not cached".to_string(),
            };
        }
        self.serialize_into_profile(player, reason, false, now, false);
        self.write_if_dirty(player, reason)
    }

    fn write_if_dirty(&mut self, player: PlayerId, reason: &str) -> WorkOutcome {
        if !self.repo.is_dirty(player) {
            return WorkOutcome::SaveSkipped {
                player,
                why: "no changes".to_string(),
            };
        }
        match self.repo.write(player, reason) {
            Ok(receipt) => WorkOutcome::Saved {
                player,
                version: receipt.written_version,
            },
            Err(VaultError::Offline(why)) => WorkOutcome::SaveSkipped {
                player,
                why: format!("offline: {}", why),
            },
            Err(e) => {
                warn!(
                    "Save of {} ({}) failed, keeping changes for the next sweep: {}",
                    player,
                    escape_log(reason),
                    e
                );
                WorkOutcome::SaveFailed {
                    player,
                    error: e.to_string(),
                }
            }
        }
    }

    fn run_sweep(&mut self, now: DateTime<Utc>) -> WorkOutcome {
        let players = self.active_players();
        let mut saved = 0;
        for player in &players {
            self.serialize_into_profile(*player, "periodic", false, now, false);
            if let WorkOutcome::Saved { .. } = self.write_if_dirty(*player, "periodic") {
                saved += 1;
            }
        }
        self.queue.schedule(
            now + self.config.saves.autosave_interval(),
            Work::PeriodicSweep,
        );
        debug!("Periodic sweep: {} players, {} saved", players.len(), saved);
        WorkOutcome::Swept {
            serialized: players.len(),
            saved,
        }
    }

    fn run_removal_retry(
        &mut self,
        player: PlayerId,
        field: InventoryField,
        item: ItemId,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Option<WorkOutcome> {
        let world = self.worlds.get_mut(&player)?;
        let opts = RemoveOptions {
            force: false,
            retry_after_grace: true,
        };
        let outcome = world.safe_remove_or_defer(field, &item, reason, opts, now);
        let removed = matches!(outcome, RemoveOutcome::Removed(_));
        self.after_removal(player, field, &item, reason, opts, &outcome);
        Some(WorkOutcome::RemovalRetried {
            player,
            item,
            removed,
        })
    }

    /// Remove a world object unless it is still inside its preservation window.
    pub fn safe_remove_or_defer(
        &mut self,
        player: PlayerId,
        field: InventoryField,
        item: &ItemId,
        reason: &str,
        opts: RemoveOptions,
    ) -> Result<RemoveOutcome, VaultError> {
        let now = self.clock.now();
        let world = self
            .worlds
            .get_mut(&player)
            .ok_or(VaultError::NoSession(player))?;
        let outcome = world.safe_remove_or_defer(field, item, reason, opts, now);
        self.after_removal(player, field, item, reason, opts, &outcome);
        Ok(outcome)
    }

    fn after_removal(
        &mut self,
        player: PlayerId,
        field: InventoryField,
        item: &ItemId,
        reason: &str,
        opts: RemoveOptions,
        outcome: &RemoveOutcome,
    ) {
        match outcome {
            RemoveOutcome::Removed(_) => self.mark_changed(player, reason),
            // Saved items with no world object can only be dropped here.
            RemoveOutcome::Missing if self.sync.forget_carried(player, field, item) => {
                self.mark_changed(player, reason)
            }
            RemoveOutcome::Deferred { until } if opts.retry_after_grace => {
                self.queue.schedule(
                    *until,
                    Work::RetryRemoval {
                        player,
                        field,
                        item: item.clone(),
                        reason: reason.to_string(),
                    },
                );
            }
            _ => {}
        }
    }

    /// Put a new object into a player's world.
    pub fn spawn_item(
        &mut self,
        player: PlayerId,
        field: InventoryField,
        item: Item,
    ) -> Result<bool, VaultError> {
        if item.payload.kind() != field.kind() {
            return Err(VaultError::KindMismatch { field, id: item.id });
        }
        let world = self
            .worlds
            .get_mut(&player)
            .ok_or(VaultError::NoSession(player))?;
        let item = Item {
            payload: item.payload.sanitized(),
            ..item
        };
        let spawned = world.spawn(field, item);
        if spawned {
            self.mark_changed(player, "item spawned");
        }
        Ok(spawned)
    }

    pub fn record_correlated_event(&mut self, player: PlayerId, field: InventoryField, count: usize) {
        let now = self.clock.now();
        self.sync.record_correlated_event(player, field, count, now);
    }

    /// Idempotent upsert of one item through the authoritative path: the live
    /// world, the sync layer's array and mirror, and the cached profile. A
    /// save is requested afterwards.
    pub fn ensure_entry_has_id(
        &mut self,
        player: PlayerId,
        field: InventoryField,
        item_id: ItemId,
        payload: ItemPayload,
    ) -> Result<UpsertOutcome, VaultError> {
        if payload.kind() != field.kind() {
            return Err(VaultError::KindMismatch { field, id: item_id });
        }
        let payload = payload.sanitized();
        let world = self
            .worlds
            .get_mut(&player)
            .ok_or(VaultError::NoSession(player))?;
        let item = Item::new(item_id.clone(), payload.clone());
        world.upsert(field, item.clone());
        let outcome = self.sync.ensure_entry_has_id(player, field, item_id, payload);
        self.repo.get_or_load(player).upsert_item(field, item);
        self.repo.mark_dirty(player);
        self.save_now(player, "ensure entry");
        Ok(outcome)
    }

    /// Final save for every remaining session, then drop all cached state.
    pub fn on_process_shutdown(&mut self) -> ShutdownReport {
        let now = self.clock.now();
        let mut report = ShutdownReport::default();

        for player in self.active_players() {
            self.serialize_into_profile(player, "shutdown", true, now, false);
            if self.repo.force_full_save_now(player, "shutdown") {
                report.saved.push(player);
            } else {
                report.failed.push(player);
            }
        }

        self.queue.drain_all();
        let mut leaving: Vec<PlayerId> = self.leaving.iter().copied().collect();
        leaving.sort();
        for player in leaving {
            if self.exit_save_once(player) {
                report.saved.push(player);
            } else {
                report.failed.push(player);
            }
        }

        let players: Vec<PlayerId> = self.worlds.keys().copied().collect();
        for player in players {
            self.repo.evict(player);
            self.sync.end_session(player);
        }
        self.worlds.clear();
        self.leaving.clear();
        info!(
            "Shutdown: {} profiles saved, {} failed",
            report.saved.len(),
            report.failed.len()
        );
        report
    }
}
