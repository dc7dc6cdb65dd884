use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use std::collections::{BTreeMap, HashMap, HashSet};

use super::guard::{FieldGuard, GuardConfig, GuardVerdict};
use super::mirror::{MirrorTree, UpsertOutcome};
use super::serializer::FieldSerializer;
use super::world::PlayerWorld;
use crate::metrics;
use crate::profile::{InventoryField, Item, ItemId, ItemPayload, PlayerId};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyncConfig {
    pub max_entries_per_field: usize,
    pub guard: GuardConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_entries_per_field: 500,
            guard: GuardConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldChange {
    pub field: InventoryField,
    pub old: Option<usize>,
    pub new: usize,
    pub verdict: GuardVerdict,
    pub change_version: u64,
}

/// Result of serializing one player.
#[derive(Debug, Clone)]
pub struct SerializeReport {
    pub player: PlayerId,
    pub reason: String,
    pub final_save: bool,
    pub snapshot: BTreeMap<InventoryField, Vec<Item>>,
    pub changes: Vec<FieldChange>,
    /// Fields whose adapter output exceeded the cap, with the number of items cut.
    pub clamped: Vec<(InventoryField, usize)>,
}

impl SerializeReport {
    pub fn any_changed(&self) -> bool {
        !self.changes.is_empty()
    }

    pub fn suspicious(&self) -> impl Iterator<Item = &FieldChange> {
        self.changes.iter().filter(|c| c.verdict.is_suspicious())
    }
}

/// Append saved items whose id is not already in `live`. Order of `live` is kept.
pub fn merge_by_id(mut live: Vec<Item>, saved: &[Item]) -> Vec<Item> {
    let mut seen: HashSet<ItemId> = HashSet::with_capacity(live.len() + saved.len());
    live.retain(|item| seen.insert(item.id.clone()));
    for item in saved {
        if seen.insert(item.id.clone()) {
            live.push(item.clone());
        }
    }
    live
}

/// Coordinates field adapters, guard state and the mirror tree.
pub struct InventorySync {
    config: SyncConfig,
    serializers: BTreeMap<InventoryField, Box<dyn FieldSerializer>>,
    authoritative: HashMap<PlayerId, BTreeMap<InventoryField, Vec<Item>>>,
    guards: HashMap<(PlayerId, InventoryField), FieldGuard>,
    sessions: HashMap<PlayerId, DateTime<Utc>>,
    /// Saved items the adapter did not recreate at restore. They stay part of
    /// every serialized snapshot until the world owns them again or they are
    /// forgotten explicitly.
    carried: HashMap<(PlayerId, InventoryField), Vec<Item>>,
    mirror: MirrorTree,
}

impl InventorySync {
    pub fn new(config: SyncConfig) -> Self {
        Self {
            config,
            serializers: BTreeMap::new(),
            authoritative: HashMap::new(),
            guards: HashMap::new(),
            sessions: HashMap::new(),
            carried: HashMap::new(),
            mirror: MirrorTree::new(),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Register an adapter. A second adapter for the same field replaces the first.
    pub fn register(&mut self, serializer: Box<dyn FieldSerializer>) {
        let field = serializer.field();
        if self.serializers.insert(field, serializer).is_some() {
            warn!("Replacing serializer for {}", field);
        }
    }

    pub fn registered_fields(&self) -> Vec<InventoryField> {
        self.serializers.keys().copied().collect()
    }

    pub fn begin_session(&mut self, player: PlayerId, now: DateTime<Utc>) {
        self.sessions.insert(player, now);
    }

    pub fn session_start(&self, player: PlayerId) -> Option<DateTime<Utc>> {
        self.sessions.get(&player).copied()
    }

    pub fn end_session(&mut self, player: PlayerId) {
        self.sessions.remove(&player);
        self.authoritative.remove(&player);
        self.guards.retain(|(p, _), _| *p != player);
        self.carried.retain(|(p, _), _| *p != player);
        self.mirror.remove_player(player);
    }

    pub fn guard(&self, player: PlayerId, field: InventoryField) -> Option<&FieldGuard> {
        self.guards.get(&(player, field))
    }

    pub fn authoritative(&self, player: PlayerId, field: InventoryField) -> &[Item] {
        self.authoritative
            .get(&player)
            .and_then(|fields| fields.get(&field))
            .map(|items| items.as_slice())
            .unwrap_or(&[])
    }

    /// Items kept from the saved snapshot that no world object backs.
    pub fn carried(&self, player: PlayerId, field: InventoryField) -> &[Item] {
        self.carried
            .get(&(player, field))
            .map(|items| items.as_slice())
            .unwrap_or(&[])
    }

    /// Drop a carried item for good. Returns whether it was carried.
    pub fn forget_carried(&mut self, player: PlayerId, field: InventoryField, id: &ItemId) -> bool {
        let Some(items) = self.carried.get_mut(&(player, field)) else {
            return false;
        };
        let before = items.len();
        items.retain(|item| &item.id != id);
        let removed = items.len() != before;
        if items.is_empty() {
            self.carried.remove(&(player, field));
        }
        removed
    }

    pub fn mirror(&self) -> &MirrorTree {
        &self.mirror
    }

    pub fn mirror_mut(&mut self) -> &mut MirrorTree {
        &mut self.mirror
    }

    /// Note an expected shrink (capture, pick-up) so the guard can explain it.
    pub fn record_correlated_event(
        &mut self,
        player: PlayerId,
        field: InventoryField,
        count: usize,
        now: DateTime<Utc>,
    ) {
        debug!("Correlated event for {} on {}: {}", player, field, count);
        self.guards
            .entry((player, field))
            .or_default()
            .record_event(now, count, self.config.guard.correlated_window);
    }

    pub fn serialize(
        &mut self,
        player: PlayerId,
        world: &PlayerWorld,
        reason: &str,
        final_save: bool,
        now: DateTime<Utc>,
    ) -> SerializeReport {
        let session_start = *self.sessions.entry(player).or_insert(now);
        let mut report = SerializeReport {
            player,
            reason: reason.to_string(),
            final_save,
            snapshot: BTreeMap::new(),
            changes: Vec::new(),
            clamped: Vec::new(),
        };

        for (field, serializer) in &self.serializers {
            let field = *field;
            let mut items = serializer.serialize(world);
            if let Some(carried) = self.carried.get_mut(&(player, field)) {
                let live: HashSet<&ItemId> = items.iter().map(|item| &item.id).collect();
                carried.retain(|item| !live.contains(&item.id));
                if carried.is_empty() {
                    self.carried.remove(&(player, field));
                } else {
                    items = merge_by_id(items, carried);
                }
            }
            if items.len() > self.config.max_entries_per_field {
                let cut = items.len() - self.config.max_entries_per_field;
                warn!(
                    "Serialize {} for {}: {} items over cap of {}, truncating",
                    field, player, cut, self.config.max_entries_per_field
                );
                items.truncate(self.config.max_entries_per_field);
                report.clamped.push((field, cut));
            }

            let guard = self.guards.entry((player, field)).or_default();
            let old = guard.last_count();
            if let Some(verdict) = guard.observe(items.len(), session_start, now, &self.config.guard) {
                metrics::record_guard_verdict(
                    field.as_str(),
                    verdict.is_correlated(),
                    verdict.is_suspicious(),
                );
                if verdict.is_suspicious() {
                    warn!(
                        "Guard: suspicious drop in {} for {} ({}): {:?} -> {} within {}s of join",
                        field,
                        player,
                        reason,
                        old,
                        items.len(),
                        (now - session_start).num_seconds()
                    );
                } else {
                    debug!(
                        "Guard: {} for {} on {}: {:?} -> {}",
                        verdict.label(),
                        player,
                        field,
                        old,
                        items.len()
                    );
                }
                report.changes.push(FieldChange {
                    field,
                    old,
                    new: items.len(),
                    verdict: verdict.clone(),
                    change_version: guard.change_version(),
                });
                self.mirror.set_verdict(player, field, verdict);
            }

            self.mirror.project(player, field, &items);
            self.authoritative
                .entry(player)
                .or_default()
                .insert(field, items.clone());
            report.snapshot.insert(field, items);
        }
        report
    }

    /// Restore a saved snapshot into the world and merge the result by id.
    ///
    /// Returns the merged per-field arrays, which also become the
    /// authoritative arrays and the guard baselines.
    pub fn restore_player(
        &mut self,
        player: PlayerId,
        world: &mut PlayerWorld,
        snapshot: &BTreeMap<InventoryField, Vec<Item>>,
        now: DateTime<Utc>,
    ) -> BTreeMap<InventoryField, Vec<Item>> {
        self.sessions.entry(player).or_insert(now);
        let mut merged_fields = BTreeMap::new();
        for (field, serializer) in &self.serializers {
            let field = *field;
            let saved = snapshot.get(&field).map(|v| v.as_slice()).unwrap_or(&[]);
            let live = serializer.restore(world, saved, now);
            let live_ids: HashSet<ItemId> = live.iter().map(|item| item.id.clone()).collect();
            let merged = merge_by_id(live, saved);
            let carried: Vec<Item> = merged
                .iter()
                .filter(|item| !live_ids.contains(&item.id))
                .cloned()
                .collect();
            if carried.is_empty() {
                self.carried.remove(&(player, field));
            } else {
                info!(
                    "Restore {} for {}: {} saved items kept without a world object",
                    field,
                    player,
                    carried.len()
                );
                self.carried.insert((player, field), carried);
            }
            self.guards
                .entry((player, field))
                .or_default()
                .seed(merged.len(), now);
            self.mirror.project(player, field, &merged);
            self.authoritative
                .entry(player)
                .or_default()
                .insert(field, merged.clone());
            merged_fields.insert(field, merged);
        }
        for field in snapshot.keys() {
            if !self.serializers.contains_key(field) {
                warn!("Restore for {}: no serializer registered for {}", player, field);
            }
        }
        merged_fields
    }

    /// Idempotent upsert into the authoritative array and the mirror.
    pub fn ensure_entry_has_id(
        &mut self,
        player: PlayerId,
        field: InventoryField,
        item_id: ItemId,
        payload: ItemPayload,
    ) -> UpsertOutcome {
        let item = Item::new(item_id, payload);
        let items = self
            .authoritative
            .entry(player)
            .or_default()
            .entry(field)
            .or_default();
        match items.iter_mut().find(|existing| existing.id == item.id) {
            Some(existing) => *existing = item.clone(),
            None => items.push(item.clone()),
        }
        self.mirror.upsert_entry(player, field, &item)
    }
}
