//! Shared fixtures for the integration tests.

use chrono::{DateTime, TimeZone, Utc};
use std::sync::Arc;

use slimevault::config::Config;
use slimevault::profile::{
    EggData, FoodData, InventoryField, Item, ItemPayload, PlayerId, Profile, Rgb, SlimeData,
};
use slimevault::schedule::ManualClock;
use slimevault::service::VaultService;
use slimevault::store::MemoryStore;

pub type TestVault = VaultService<Arc<MemoryStore>>;

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
}

#[allow(dead_code)]
pub fn vault_with(store: Arc<MemoryStore>, config: Config) -> (TestVault, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(start_time()));
    let vault = VaultService::new(store, config, clock.clone());
    (vault, clock)
}

#[allow(dead_code)]
pub fn vault() -> (TestVault, Arc<MemoryStore>, Arc<ManualClock>) {
    let store = Arc::new(MemoryStore::new());
    let (vault, clock) = vault_with(store.clone(), Config::default());
    (vault, store, clock)
}

#[allow(dead_code)]
pub fn key(player: PlayerId) -> String {
    format!("Player_{}", player)
}

/// Seed a stored profile directly, bypassing the repository.
#[allow(dead_code)]
pub fn seed_profile(store: &MemoryStore, profile: &Profile) {
    let bytes = serde_json::to_vec(profile).unwrap();
    store.insert_raw(&key(profile.player_id), bytes);
}

#[allow(dead_code)]
pub fn stored_profile(store: &MemoryStore, player: PlayerId) -> Option<Profile> {
    store
        .raw(&key(player))
        .map(|bytes| serde_json::from_slice(&bytes).unwrap())
}

#[allow(dead_code)]
pub fn egg(id: &str, placed_at: Option<DateTime<Utc>>) -> Item {
    Item::new(
        id,
        ItemPayload::Egg(EggData {
            rarity: "common".into(),
            hatch_secs: 60,
            placed_at,
            species: "pink".into(),
        }),
    )
}

#[allow(dead_code)]
pub fn food(id: &str, uses_left: u32) -> Item {
    Item::new(
        id,
        ItemPayload::Food(FoodData {
            food_type: "berry".into(),
            potency: 0.5,
            uses_left,
        }),
    )
}

#[allow(dead_code)]
pub fn slime(id: &str, value_base: i64, size: f64, color: Rgb) -> Item {
    Item::new(
        id,
        ItemPayload::Slime(SlimeData {
            species: "pink".into(),
            color,
            size,
            growth: 0.0,
            fed_count: 0,
            value_base,
            mutation: None,
        }),
    )
}

/// Stored profile with `count` placed, ready-to-hatch eggs in `worldEggs`.
#[allow(dead_code)]
pub fn profile_with_world_eggs(player: PlayerId, count: usize) -> Profile {
    let mut profile = Profile::new(player);
    let placed = start_time() - chrono::Duration::hours(1);
    for i in 0..count {
        profile
            .items_mut(InventoryField::WorldEggs)
            .push(egg(&format!("egg-{}", i), Some(placed)));
    }
    profile
}
