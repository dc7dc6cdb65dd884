use super::FlowError;
use crate::inventory::PlayerWorld;
use crate::profile::{InventoryField, ItemId, ItemPayload};

/// Size gained each time accumulated growth reaches a full point.
pub const SIZE_PER_GROWTH: f64 = 0.25;
pub const MAX_SIZE: f64 = 5.0;

#[derive(Debug, Clone, PartialEq)]
pub struct FeedOutcome {
    pub slime_field: InventoryField,
    pub new_size: f64,
    /// Uses left on the food tool; `0` means it was consumed and removed.
    pub food_uses_left: u32,
}

pub fn feed_slime(
    world: &mut PlayerWorld,
    slime_id: &ItemId,
    food_id: &ItemId,
) -> Result<FeedOutcome, FlowError> {
    let food = world
        .get(InventoryField::FoodTools, food_id)
        .ok_or_else(|| FlowError::NotFound {
            what: "food",
            id: food_id.clone(),
        })?;
    let potency = match &food.payload {
        ItemPayload::Food(data) => data.effective_potency(),
        _ => {
            return Err(FlowError::WrongKind {
                field: InventoryField::FoodTools,
                id: food_id.clone(),
            })
        }
    };
    let slime_field = [InventoryField::WorldSlimes, InventoryField::CapturedSlimes]
        .into_iter()
        .find(|field| world.contains(*field, slime_id))
        .ok_or_else(|| FlowError::NotFound {
            what: "slime",
            id: slime_id.clone(),
        })?;

    let slime = world
        .get_mut(slime_field, slime_id)
        .and_then(|item| item.slime_mut())
        .ok_or_else(|| FlowError::WrongKind {
            field: slime_field,
            id: slime_id.clone(),
        })?;
    let growth = slime.growth + potency;
    let growth = if growth.is_finite() { growth.max(0.0) } else { 0.0 };
    let steps = growth.floor();
    slime.growth = growth - steps;
    if steps > 0.0 {
        slime.size = (slime.size + steps * SIZE_PER_GROWTH).min(MAX_SIZE);
    }
    slime.fed_count = slime.fed_count.saturating_add(1);
    let new_size = slime.size;

    let food_uses_left = match world
        .get_mut(InventoryField::FoodTools, food_id)
        .and_then(|item| item.food_mut())
    {
        Some(food) => {
            food.uses_left = food.uses_left.saturating_sub(1);
            food.uses_left
        }
        None => 0,
    };
    if food_uses_left == 0 {
        world.take(InventoryField::FoodTools, food_id);
    }

    Ok(FeedOutcome {
        slime_field,
        new_size,
        food_uses_left,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::{FoodData, Item, Rgb, SlimeData};

    fn setup(uses: u32, potency: f64) -> PlayerWorld {
        let mut world = PlayerWorld::new();
        world.spawn(
            InventoryField::FoodTools,
            Item::new(
                "f1",
                ItemPayload::Food(FoodData {
                    food_type: "berry".into(),
                    potency,
                    uses_left: uses,
                }),
            ),
        );
        world.spawn(
            InventoryField::CapturedSlimes,
            Item::new(
                "s1",
                ItemPayload::Slime(SlimeData {
                    species: "pink".into(),
                    color: Rgb::new(255, 120, 200),
                    size: 1.0,
                    growth: 0.5,
                    fed_count: 0,
                    value_base: 10,
                    mutation: None,
                }),
            ),
        );
        world
    }

    #[test]
    fn feeding_grows_slime_and_uses_food() {
        let mut world = setup(2, 0.75);
        let outcome = feed_slime(&mut world, &ItemId::from("s1"), &ItemId::from("f1")).unwrap();
        assert_eq!(outcome.slime_field, InventoryField::CapturedSlimes);
        assert_eq!(outcome.new_size, 1.25);
        assert_eq!(outcome.food_uses_left, 1);
        assert!(world.contains(InventoryField::FoodTools, &ItemId::from("f1")));
    }

    #[test]
    fn last_use_removes_food_tool() {
        let mut world = setup(1, 0.1);
        let outcome = feed_slime(&mut world, &ItemId::from("s1"), &ItemId::from("f1")).unwrap();
        assert_eq!(outcome.food_uses_left, 0);
        assert_eq!(world.count(InventoryField::FoodTools), 0);
    }

    #[test]
    fn huge_potency_is_capped_and_returns_promptly() {
        let mut world = setup(3, 1e20);
        let outcome = feed_slime(&mut world, &ItemId::from("s1"), &ItemId::from("f1")).unwrap();
        // 0.5 + 10.0 growth: ten steps of 0.25 from size 1.0.
        assert_eq!(outcome.new_size, 3.5);
        let slime = world
            .get(InventoryField::CapturedSlimes, &ItemId::from("s1"))
            .and_then(|item| item.slime())
            .unwrap();
        assert!((slime.growth - 0.5).abs() < 1e-9);
        assert_eq!(slime.fed_count, 1);
    }

    #[test]
    fn non_finite_growth_is_reset() {
        let mut world = setup(1, f64::NAN);
        if let Some(slime) = world
            .get_mut(InventoryField::CapturedSlimes, &ItemId::from("s1"))
            .and_then(|item| item.slime_mut())
        {
            slime.growth = f64::INFINITY;
        }
        let outcome = feed_slime(&mut world, &ItemId::from("s1"), &ItemId::from("f1")).unwrap();
        assert_eq!(outcome.new_size, 1.0);
    }

    #[test]
    fn missing_slime_leaves_food_untouched() {
        let mut world = setup(1, 0.1);
        let err = feed_slime(&mut world, &ItemId::from("ghost"), &ItemId::from("f1")).unwrap_err();
        assert!(matches!(err, FlowError::NotFound { what: "slime", .. }));
        assert_eq!(world.count(InventoryField::FoodTools), 1);
    }
}
