//! Faction sales.
//!
//! ```text
//! unit payout     = value_base * size * base_multiplier * standing_mult * color_mult
//! standing_mult   = min + (max - min) * standing
//! color_mult      = 1 + color_bonus * similarity(slime, preferred)
//! standing after  = 1 - (1 - before) * (1 - gain_per_base) ^ gross_base
//! ```

use std::collections::HashSet;

use super::FlowError;
use crate::config::FactionConfig;
use crate::inventory::PlayerWorld;
use crate::profile::{InventoryField, ItemId, Profile, SlimeData};

#[derive(Debug, Clone, PartialEq)]
pub struct SaleOutcome {
    pub faction: String,
    pub sold: Vec<ItemId>,
    pub unit_payouts: Vec<i64>,
    pub total_payout: i64,
    pub gross_base: f64,
    pub standing_before: f64,
    pub standing_after: f64,
    pub coins_after: i64,
}

pub fn standing_multiplier(cfg: &FactionConfig, standing: f64) -> f64 {
    let s = if standing.is_finite() { standing.clamp(0.0, 1.0) } else { 0.0 };
    cfg.standing_min_mult + (cfg.standing_max_mult - cfg.standing_min_mult) * s
}

pub fn color_multiplier(cfg: &FactionConfig, slime: &SlimeData) -> f64 {
    match &cfg.preferred_color {
        Some(preferred) => 1.0 + cfg.color_bonus * preferred.similarity(&slime.color),
        None => 1.0,
    }
}

/// Value before standing and color multipliers.
pub fn base_value(cfg: &FactionConfig, slime: &SlimeData) -> f64 {
    slime.value_base.max(0) as f64 * slime.size.max(0.0) * cfg.base_multiplier
}

pub fn unit_payout(cfg: &FactionConfig, slime: &SlimeData, standing: f64) -> i64 {
    let value = base_value(cfg, slime) * standing_multiplier(cfg, standing) * color_multiplier(cfg, slime);
    value.floor().max(0.0) as i64
}

pub fn next_standing(cfg: &FactionConfig, before: f64, gross_base: f64) -> f64 {
    let before = if before.is_finite() { before.clamp(0.0, 1.0) } else { 0.0 };
    if gross_base <= 0.0 {
        return before;
    }
    let keep = (1.0 - cfg.standing_gain_per_base).clamp(0.0, 1.0).powf(gross_base);
    (1.0 - (1.0 - before) * keep).clamp(before, 1.0)
}

/// Sell captured slimes to a faction. All listed slimes must be present;
/// otherwise nothing changes.
pub fn sell_slimes(
    world: &mut PlayerWorld,
    profile: &mut Profile,
    faction: &str,
    cfg: &FactionConfig,
    slime_ids: &[ItemId],
) -> Result<SaleOutcome, FlowError> {
    if slime_ids.is_empty() {
        return Err(FlowError::EmptySale);
    }
    let mut seen = HashSet::new();
    let mut slimes = Vec::with_capacity(slime_ids.len());
    for id in slime_ids {
        if !seen.insert(id) {
            return Err(FlowError::DuplicateItem(id.clone()));
        }
        let item = world
            .get(InventoryField::CapturedSlimes, id)
            .ok_or_else(|| FlowError::NotFound {
                what: "captured slime",
                id: id.clone(),
            })?;
        let slime = item.slime().ok_or_else(|| FlowError::WrongKind {
            field: InventoryField::CapturedSlimes,
            id: id.clone(),
        })?;
        slimes.push(slime.clone());
    }

    let standing_before = profile.standing(faction);
    let unit_payouts: Vec<i64> = slimes
        .iter()
        .map(|slime| unit_payout(cfg, slime, standing_before))
        .collect();
    let total_payout: i64 = unit_payouts.iter().sum();
    let gross_base: f64 = slimes.iter().map(|slime| base_value(cfg, slime)).sum();
    let standing_after = next_standing(cfg, standing_before, gross_base);

    for id in slime_ids {
        world.take(InventoryField::CapturedSlimes, id);
        profile.remove_item(InventoryField::CapturedSlimes, id);
    }
    profile.core.coins = profile.core.coins.saturating_add(total_payout).max(0);
    profile
        .core
        .standings
        .insert(faction.to_string(), standing_after);
    let lifetime = profile
        .core
        .lifetime_sales
        .entry(faction.to_string())
        .or_insert(0);
    *lifetime = lifetime.saturating_add(total_payout);

    Ok(SaleOutcome {
        faction: faction.to_string(),
        sold: slime_ids.to_vec(),
        unit_payouts,
        total_payout,
        gross_base,
        standing_before,
        standing_after,
        coins_after: profile.core.coins,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::Rgb;

    fn slime(value_base: i64, size: f64, color: Rgb) -> SlimeData {
        SlimeData {
            species: "pink".into(),
            color,
            size,
            growth: 0.0,
            fed_count: 0,
            value_base,
            mutation: None,
        }
    }

    #[test]
    fn standing_multiplier_spans_configured_range() {
        let cfg = FactionConfig::default();
        assert!((standing_multiplier(&cfg, 0.0) - 0.8).abs() < 1e-9);
        assert!((standing_multiplier(&cfg, 1.0) - 1.5).abs() < 1e-9);
        assert!((standing_multiplier(&cfg, 7.0) - 1.5).abs() < 1e-9);
    }

    #[test]
    fn preferred_color_adds_bonus() {
        let cfg = FactionConfig {
            preferred_color: Some(Rgb::new(255, 0, 0)),
            color_bonus: 0.5,
            ..FactionConfig::default()
        };
        let red = slime(100, 1.0, Rgb::new(255, 0, 0));
        // 100 * 1.0 * 1.0 * 0.8 * 1.5
        assert_eq!(unit_payout(&cfg, &red, 0.0), 120);
    }

    #[test]
    fn standing_rises_with_diminishing_returns() {
        let cfg = FactionConfig::default();
        let low = next_standing(&cfg, 0.3, 100.0);
        let high = next_standing(&cfg, 0.9, 100.0);
        assert!(low > 0.3);
        assert!(high > 0.9);
        assert!(low - 0.3 > high - 0.9);
        assert!(next_standing(&cfg, 0.999, 1.0e9) <= 1.0);
        assert_eq!(next_standing(&cfg, 0.4, 0.0), 0.4);
    }

    #[test]
    fn lifetime_sales_saturate() {
        use crate::profile::{Item, ItemPayload, PlayerId};

        let cfg = FactionConfig::default();
        let mut world = PlayerWorld::new();
        world.spawn(
            InventoryField::CapturedSlimes,
            Item::new("s1", ItemPayload::Slime(slime(100, 1.0, Rgb::new(0, 0, 0)))),
        );
        let mut profile = Profile::new(PlayerId(1));
        profile
            .core
            .lifetime_sales
            .insert("gloopers".to_string(), i64::MAX - 1);

        let outcome =
            sell_slimes(&mut world, &mut profile, "gloopers", &cfg, &[ItemId::from("s1")]).unwrap();
        assert!(outcome.total_payout > 1);
        assert_eq!(profile.core.lifetime_sales["gloopers"], i64::MAX);
    }
}
