use chrono::{DateTime, Utc};

use super::FlowError;
use crate::inventory::PlayerWorld;
use crate::profile::{InventoryField, Item, ItemId, ItemPayload, Rgb, SlimeData};

#[derive(Debug, Clone, PartialEq)]
pub struct HatchOutcome {
    pub egg: Item,
    pub slime: Item,
}

/// Base sale value of a freshly hatched slime by egg rarity.
pub fn rarity_value(rarity: &str) -> i64 {
    match rarity.to_ascii_lowercase().as_str() {
        "uncommon" => 25,
        "rare" => 60,
        "epic" => 150,
        "legendary" => 400,
        _ => 10,
    }
}

fn species_color(species: &str) -> Rgb {
    match species.to_ascii_lowercase().as_str() {
        "pink" => Rgb::new(255, 120, 200),
        "blue" | "crystal" => Rgb::new(120, 200, 255),
        "green" | "moss" => Rgb::new(90, 200, 110),
        "gold" => Rgb::new(240, 200, 60),
        _ => Rgb::new(180, 180, 180),
    }
}

/// Hatch a placed egg whose timer has run out.
pub fn hatch_egg(
    world: &mut PlayerWorld,
    egg_id: &ItemId,
    now: DateTime<Utc>,
) -> Result<HatchOutcome, FlowError> {
    let item = world
        .get(InventoryField::WorldEggs, egg_id)
        .ok_or_else(|| FlowError::NotFound {
            what: "egg",
            id: egg_id.clone(),
        })?;
    let egg = item.egg().ok_or_else(|| FlowError::WrongKind {
        field: InventoryField::WorldEggs,
        id: egg_id.clone(),
    })?;
    let ready_at = egg
        .ready_at()
        .ok_or_else(|| FlowError::NotPlaced(egg_id.clone()))?;
    if ready_at > now {
        return Err(FlowError::NotReady {
            id: egg_id.clone(),
            ready_at,
        });
    }
    let slime = Item::new(
        ItemId::generate(),
        ItemPayload::Slime(SlimeData {
            species: egg.species.clone(),
            color: species_color(&egg.species),
            size: 1.0,
            growth: 0.0,
            fed_count: 0,
            value_base: rarity_value(&egg.rarity),
            mutation: None,
        }),
    );

    let egg = world
        .take(InventoryField::WorldEggs, egg_id)
        .ok_or_else(|| FlowError::NotFound {
            what: "egg",
            id: egg_id.clone(),
        })?;
    world.spawn(InventoryField::WorldSlimes, slime.clone());
    Ok(HatchOutcome { egg, slime })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::EggData;
    use chrono::Duration;

    fn placed_egg(id: &str, placed_at: Option<DateTime<Utc>>) -> Item {
        Item::new(
            id,
            ItemPayload::Egg(EggData {
                rarity: "rare".into(),
                hatch_secs: 60,
                placed_at,
                species: "pink".into(),
            }),
        )
    }

    #[test]
    fn hatch_requires_elapsed_timer() {
        let now = Utc::now();
        let mut world = PlayerWorld::new();
        world.spawn(InventoryField::WorldEggs, placed_egg("e1", Some(now)));
        let err = hatch_egg(&mut world, &ItemId::from("e1"), now + Duration::seconds(30)).unwrap_err();
        assert!(matches!(err, FlowError::NotReady { .. }));
        assert_eq!(world.count(InventoryField::WorldEggs), 1);

        let outcome = hatch_egg(&mut world, &ItemId::from("e1"), now + Duration::seconds(61)).unwrap();
        assert_eq!(outcome.egg.id.as_str(), "e1");
        assert_eq!(outcome.slime.slime().unwrap().value_base, 60);
        assert_eq!(world.count(InventoryField::WorldEggs), 0);
        assert_eq!(world.count(InventoryField::WorldSlimes), 1);
    }

    #[test]
    fn hatch_unplaced_or_missing_egg_fails() {
        let mut world = PlayerWorld::new();
        world.spawn(InventoryField::WorldEggs, placed_egg("e1", None));
        let now = Utc::now();
        assert_eq!(
            hatch_egg(&mut world, &ItemId::from("e1"), now),
            Err(FlowError::NotPlaced(ItemId::from("e1")))
        );
        assert!(matches!(
            hatch_egg(&mut world, &ItemId::from("nope"), now),
            Err(FlowError::NotFound { what: "egg", .. })
        ));
    }
}
