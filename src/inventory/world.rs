use chrono::{DateTime, Utc};
use log::{debug, info};
use std::collections::BTreeMap;

use crate::profile::{InventoryField, Item, ItemId};

/// A live object owned by a player: a tool in the backpack, an egg on a plot,
/// a slime roaming the ranch.
#[derive(Debug, Clone, PartialEq)]
pub struct WorldObject {
    pub item: Item,
    /// Set on objects recreated from a snapshot; removal is refused until it passes.
    pub preserved_until: Option<DateTime<Utc>>,
}

impl WorldObject {
    pub fn is_protected(&self, now: DateTime<Utc>) -> bool {
        self.preserved_until.is_some_and(|until| until > now)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemoveOptions {
    /// Remove even while the preservation marker is active.
    pub force: bool,
    /// Ask the scheduler to retry once the grace window has passed.
    pub retry_after_grace: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RemoveOutcome {
    Removed(Item),
    Deferred { until: DateTime<Utc> },
    Missing,
}

/// World objects of one player, grouped by the inventory field they persist into.
#[derive(Debug, Clone, Default)]
pub struct PlayerWorld {
    objects: BTreeMap<InventoryField, Vec<WorldObject>>,
}

impl PlayerWorld {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn objects(&self, field: InventoryField) -> &[WorldObject] {
        self.objects
            .get(&field)
            .map(|objects| objects.as_slice())
            .unwrap_or(&[])
    }

    pub fn count(&self, field: InventoryField) -> usize {
        self.objects(field).len()
    }

    pub fn contains(&self, field: InventoryField, id: &ItemId) -> bool {
        self.objects(field).iter().any(|o| &o.item.id == id)
    }

    pub fn get(&self, field: InventoryField, id: &ItemId) -> Option<&Item> {
        self.objects(field)
            .iter()
            .find(|o| &o.item.id == id)
            .map(|o| &o.item)
    }

    pub fn get_mut(&mut self, field: InventoryField, id: &ItemId) -> Option<&mut Item> {
        self.objects
            .get_mut(&field)?
            .iter_mut()
            .find(|o| &o.item.id == id)
            .map(|o| &mut o.item)
    }

    /// Add an object. Returns false (and changes nothing) if the id is taken.
    pub fn spawn(&mut self, field: InventoryField, item: Item) -> bool {
        self.spawn_object(
            field,
            WorldObject {
                item,
                preserved_until: None,
            },
        )
    }

    pub fn spawn_preserved(
        &mut self,
        field: InventoryField,
        item: Item,
        until: DateTime<Utc>,
    ) -> bool {
        self.spawn_object(
            field,
            WorldObject {
                item,
                preserved_until: Some(until),
            },
        )
    }

    fn spawn_object(&mut self, field: InventoryField, object: WorldObject) -> bool {
        if self.contains(field, &object.item.id) {
            return false;
        }
        self.objects.entry(field).or_default().push(object);
        true
    }

    /// Replace the payload of an existing object or spawn a new one.
    pub fn upsert(&mut self, field: InventoryField, item: Item) {
        match self.get_mut(field, &item.id) {
            Some(existing) => *existing = item,
            None => {
                self.spawn(field, item);
            }
        }
    }

    /// Unconditional removal used by flows that consume an item.
    pub fn take(&mut self, field: InventoryField, id: &ItemId) -> Option<Item> {
        let objects = self.objects.get_mut(&field)?;
        let index = objects.iter().position(|o| &o.item.id == id)?;
        Some(objects.remove(index).item)
    }

    /// Remove unless the object is still inside its preservation window.
    pub fn safe_remove_or_defer(
        &mut self,
        field: InventoryField,
        id: &ItemId,
        reason: &str,
        opts: RemoveOptions,
        now: DateTime<Utc>,
    ) -> RemoveOutcome {
        let Some(object) = self.objects(field).iter().find(|o| &o.item.id == id) else {
            debug!("Remove of {} from {} ({}): not present", id, field, reason);
            return RemoveOutcome::Missing;
        };
        if !opts.force && object.is_protected(now) {
            let until = object.preserved_until.unwrap_or(now);
            info!(
                "Deferring removal of {} from {} ({}): protected until {}",
                id,
                field,
                reason,
                until.to_rfc3339()
            );
            return RemoveOutcome::Deferred { until };
        }
        match self.take(field, id) {
            Some(item) => {
                debug!("Removed {} from {} ({})", id, field, reason);
                RemoveOutcome::Removed(item)
            }
            None => RemoveOutcome::Missing,
        }
    }
}
