use chrono::{DateTime, Duration, Utc};
use log::warn;

use super::world::PlayerWorld;
use crate::profile::{InventoryField, Item};

/// Adapter between live world objects and one persisted inventory field.
pub trait FieldSerializer: Send {
    fn field(&self) -> InventoryField;

    /// Capture the field's current items from the world.
    fn serialize(&self, world: &PlayerWorld) -> Vec<Item>;

    /// Recreate saved items in the world and return the field's live list
    /// afterwards. Items the adapter cannot or will not recreate are simply
    /// absent from the returned list; the sync layer merges them back by id.
    fn restore(&self, world: &mut PlayerWorld, saved: &[Item], now: DateTime<Utc>) -> Vec<Item>;
}

/// Default adapter: one world object per item, recreated with a preservation
/// marker so cleanup logic leaves fresh objects alone for a grace period.
#[derive(Debug, Clone)]
pub struct WorldFieldSerializer {
    field: InventoryField,
    preserve_for: Duration,
}

impl WorldFieldSerializer {
    pub fn new(field: InventoryField, preserve_for: Duration) -> Self {
        Self {
            field,
            preserve_for,
        }
    }
}

impl FieldSerializer for WorldFieldSerializer {
    fn field(&self) -> InventoryField {
        self.field
    }

    fn serialize(&self, world: &PlayerWorld) -> Vec<Item> {
        world
            .objects(self.field)
            .iter()
            .map(|object| object.item.clone())
            .collect()
    }

    fn restore(&self, world: &mut PlayerWorld, saved: &[Item], now: DateTime<Utc>) -> Vec<Item> {
        let until = now + self.preserve_for;
        for item in saved {
            if item.payload.kind() != self.field.kind() {
                warn!(
                    "Not restoring {} into {}: payload kind does not match field",
                    item.id, self.field
                );
                continue;
            }
            world.spawn_preserved(self.field, item.clone(), until);
        }
        self.serialize(world)
    }
}

pub fn default_serializers(preserve_for: Duration) -> Vec<Box<dyn FieldSerializer>> {
    InventoryField::ALL
        .iter()
        .map(|field| {
            Box::new(WorldFieldSerializer::new(*field, preserve_for)) as Box<dyn FieldSerializer>
        })
        .collect()
}
