//! Moves between fields: capturing slimes and placing or picking up eggs.
//!
//! Each move shrinks its source field by one, so callers record a correlated
//! event on the source field before the next serialize.

use chrono::{DateTime, Utc};

use super::FlowError;
use crate::inventory::PlayerWorld;
use crate::profile::{InventoryField, Item, ItemId, ItemPayload};

fn move_item(
    world: &mut PlayerWorld,
    from: InventoryField,
    to: InventoryField,
    id: &ItemId,
    what: &'static str,
    mutate: impl FnOnce(&mut Item),
) -> Result<Item, FlowError> {
    let item = world.get(from, id).ok_or_else(|| FlowError::NotFound {
        what,
        id: id.clone(),
    })?;
    if item.payload.kind() != to.kind() {
        return Err(FlowError::WrongKind {
            field: from,
            id: id.clone(),
        });
    }
    let mut item = world.take(from, id).ok_or_else(|| FlowError::NotFound {
        what,
        id: id.clone(),
    })?;
    mutate(&mut item);
    world.upsert(to, item.clone());
    Ok(item)
}

pub fn capture_slime(world: &mut PlayerWorld, slime_id: &ItemId) -> Result<Item, FlowError> {
    move_item(
        world,
        InventoryField::WorldSlimes,
        InventoryField::CapturedSlimes,
        slime_id,
        "slime",
        |_| {},
    )
}

pub fn place_egg(
    world: &mut PlayerWorld,
    egg_id: &ItemId,
    now: DateTime<Utc>,
) -> Result<Item, FlowError> {
    move_item(
        world,
        InventoryField::EggTools,
        InventoryField::WorldEggs,
        egg_id,
        "egg",
        |item| {
            if let ItemPayload::Egg(egg) = &mut item.payload {
                egg.placed_at = Some(now);
            }
        },
    )
}

pub fn pick_up_egg(world: &mut PlayerWorld, egg_id: &ItemId) -> Result<Item, FlowError> {
    move_item(
        world,
        InventoryField::WorldEggs,
        InventoryField::EggTools,
        egg_id,
        "egg",
        |item| {
            if let ItemPayload::Egg(egg) = &mut item.payload {
                egg.placed_at = None;
            }
        },
    )
}
