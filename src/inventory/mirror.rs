//! Human-inspectable projection of each player's inventory.
//!
//! Every field gets a folder with a `count` and one `Entry_<n>` per item.
//! Folders are rebuilt from the authoritative arrays after each serialize;
//! [`MirrorTree::upsert_entry`] is the single in-place write path.

use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};

use super::guard::GuardVerdict;
use crate::profile::{InventoryField, Item, ItemId, PlayerId};

pub const ENTRY_PREFIX: &str = "Entry_";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MirrorEntry {
    pub item_id: Option<ItemId>,
    /// JSON copy of the item payload.
    pub payload: String,
}

impl MirrorEntry {
    pub fn from_item(item: &Item) -> Self {
        Self {
            item_id: Some(item.id.clone()),
            payload: serde_json::to_string(&item.payload).unwrap_or_default(),
        }
    }

    pub fn placeholder() -> Self {
        Self {
            item_id: None,
            payload: String::new(),
        }
    }

    /// Entries without an id or with an unreadable payload may be reused.
    pub fn is_reusable(&self) -> bool {
        self.item_id.is_none()
            || self.payload.is_empty()
            || serde_json::from_str::<serde_json::Value>(&self.payload).is_err()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FieldFolder {
    pub count: usize,
    pub entries: BTreeMap<String, MirrorEntry>,
    pub last_verdict: Option<GuardVerdict>,
}

impl FieldFolder {
    fn next_entry_name(&self) -> String {
        let mut n = self.entries.len() + 1;
        loop {
            let name = entry_name(n);
            if !self.entries.contains_key(&name) {
                return name;
            }
            n += 1;
        }
    }

    fn recount(&mut self) {
        let ids: HashSet<&ItemId> = self
            .entries
            .values()
            .filter(|entry| !entry.is_reusable())
            .filter_map(|entry| entry.item_id.as_ref())
            .collect();
        self.count = ids.len();
    }

    pub fn entry_for(&self, id: &ItemId) -> Option<(&str, &MirrorEntry)> {
        self.entries
            .iter()
            .find(|(_, entry)| entry.item_id.as_ref() == Some(id))
            .map(|(name, entry)| (name.as_str(), entry))
    }
}

fn entry_name(n: usize) -> String {
    format!("{}{:03}", ENTRY_PREFIX, n)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PlayerMirror {
    pub fields: BTreeMap<InventoryField, FieldFolder>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpsertOutcome {
    Updated(String),
    ReusedPlaceholder(String),
    Created(String),
}

impl UpsertOutcome {
    pub fn entry_name(&self) -> &str {
        match self {
            UpsertOutcome::Updated(name)
            | UpsertOutcome::ReusedPlaceholder(name)
            | UpsertOutcome::Created(name) => name,
        }
    }
}

#[derive(Debug, Default)]
pub struct MirrorTree {
    players: HashMap<PlayerId, PlayerMirror>,
}

impl MirrorTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn player(&self, player: PlayerId) -> Option<&PlayerMirror> {
        self.players.get(&player)
    }

    pub fn folder(&self, player: PlayerId, field: InventoryField) -> Option<&FieldFolder> {
        self.players.get(&player)?.fields.get(&field)
    }

    fn folder_mut(&mut self, player: PlayerId, field: InventoryField) -> &mut FieldFolder {
        self.players
            .entry(player)
            .or_default()
            .fields
            .entry(field)
            .or_default()
    }

    /// Rebuild a field folder from the authoritative array. The last verdict survives.
    pub fn project(&mut self, player: PlayerId, field: InventoryField, items: &[Item]) {
        let folder = self.folder_mut(player, field);
        folder.entries = items
            .iter()
            .enumerate()
            .map(|(i, item)| (entry_name(i + 1), MirrorEntry::from_item(item)))
            .collect();
        folder.recount();
    }

    pub fn set_verdict(&mut self, player: PlayerId, field: InventoryField, verdict: GuardVerdict) {
        self.folder_mut(player, field).last_verdict = Some(verdict);
    }

    /// Find the entry holding `id`, else reuse a placeholder or malformed
    /// entry, else create a new one.
    pub fn upsert_entry(&mut self, player: PlayerId, field: InventoryField, item: &Item) -> UpsertOutcome {
        let folder = self.folder_mut(player, field);
        let fresh = MirrorEntry::from_item(item);

        let existing = folder
            .entries
            .iter()
            .find(|(_, entry)| entry.item_id.as_ref() == Some(&item.id))
            .map(|(name, _)| name.clone());
        let outcome = match existing {
            Some(name) => UpsertOutcome::Updated(name),
            None => match folder
                .entries
                .iter()
                .find(|(_, entry)| entry.is_reusable())
                .map(|(name, _)| name.clone())
            {
                Some(name) => UpsertOutcome::ReusedPlaceholder(name),
                None => UpsertOutcome::Created(folder.next_entry_name()),
            },
        };
        folder.entries.insert(outcome.entry_name().to_string(), fresh);
        folder.recount();
        outcome
    }

    /// Insert an entry verbatim. Only used to stage malformed entries left by older builds.
    pub fn insert_raw_entry(
        &mut self,
        player: PlayerId,
        field: InventoryField,
        name: &str,
        entry: MirrorEntry,
    ) {
        let folder = self.folder_mut(player, field);
        folder.entries.insert(name.to_string(), entry);
        folder.recount();
    }

    pub fn remove_player(&mut self, player: PlayerId) -> Option<PlayerMirror> {
        self.players.remove(&player)
    }
}
