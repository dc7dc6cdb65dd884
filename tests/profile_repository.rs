//! Profile repository behaviour against the in-memory store.
use std::sync::Arc;

use slimevault::errors::VaultError;
use slimevault::profile::{InventoryField, PlayerId, ProfileRepository, StoreMode};
use slimevault::store::{MemoryStore, MemoryStoreFaults};

mod common;

fn repo() -> (ProfileRepository<Arc<MemoryStore>>, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    (ProfileRepository::new(store.clone(), "Player_"), store)
}

#[test]
fn new_player_gets_defaults() {
    let (mut repo, _store) = repo();
    let profile = repo.get_or_load(PlayerId(501));
    assert_eq!(profile.core.coins, 0);
    assert_eq!(profile.data_version, 1);
    for field in InventoryField::ALL {
        assert!(profile.items(field).is_empty(), "{} not empty", field);
    }
    assert!(!repo.is_dirty(PlayerId(501)));
}

#[test]
fn stored_version_never_goes_backwards() {
    let (mut repo, store) = repo();
    let id = PlayerId(7);
    let mut last = 0;
    for round in 0..5 {
        repo.adjust_coins(id, 10);
        if round % 2 == 0 {
            assert!(repo.force_full_save_now(id, "round"));
        } else {
            repo.write(id, "round").unwrap();
        }
        let stored = common::stored_profile(&store, id).unwrap();
        assert!(stored.data_version > last);
        last = stored.data_version;
    }
    assert_eq!(last, 6);
    assert_eq!(common::stored_profile(&store, id).unwrap().core.coins, 50);
}

#[test]
fn coins_floor_at_zero_and_standing_clamps() {
    let (mut repo, _store) = repo();
    let id = PlayerId(3);
    assert_eq!(repo.adjust_coins(id, 25), 25);
    assert_eq!(repo.adjust_coins(id, -100), 0);
    repo.set_standing(id, "gloopers", 1.7);
    assert_eq!(repo.get_standing(id, "gloopers"), 1.0);
    assert_eq!(repo.get_standing(id, "nobody"), 0.0);
    assert!(repo.is_dirty(id));
}

#[test]
fn transient_save_failure_keeps_dirty_flag() {
    let store = Arc::new(MemoryStore::with_faults(MemoryStoreFaults {
        failing_writes: 1,
        ..Default::default()
    }));
    let mut repo = ProfileRepository::new(store.clone(), "Player_");
    let id = PlayerId(11);
    repo.adjust_coins(id, 5);
    let err = repo.write(id, "first").unwrap_err();
    assert!(err.is_transient());
    assert!(repo.is_dirty(id));
    assert!(!repo.is_offline());

    let receipt = repo.write(id, "second").unwrap();
    assert_eq!(receipt.written_version, 2);
    assert!(!repo.is_dirty(id));
}

#[test]
fn permanent_failure_switches_to_offline_mode() {
    let store = Arc::new(MemoryStore::with_faults(MemoryStoreFaults {
        unavailable: true,
        ..Default::default()
    }));
    let mut repo = ProfileRepository::new(store.clone(), "Player_");
    let id = PlayerId(12);
    let profile = repo.get_or_load(id);
    assert!(profile.meta.contains_key("load_degraded"));
    assert!(matches!(repo.mode(), StoreMode::Offline { .. }));

    let writes_before = store.write_count();
    repo.adjust_coins(id, 5);
    assert!(matches!(repo.write(id, "offline"), Err(VaultError::Offline(_))));
    assert!(!repo.force_full_save_now(id, "offline"));
    assert_eq!(store.write_count(), writes_before);
}

#[test]
fn legacy_record_is_migrated_once_on_load() {
    let (mut repo, store) = repo();
    let legacy = serde_json::json!({
        "DataVersion": 9,
        "Coins": 120,
        "Standings": { "gloopers": 0.4 },
        "Inventory": {
            "worldEggs": [
                { "EggId": "A", "Rarity": "rare" },
                { "id": "A", "Rarity": "rare" },
                { "Rarity": "common" }
            ],
            "hats": []
        }
    });
    store.insert_raw("Player_44", serde_json::to_vec(&legacy).unwrap());

    let profile = repo.get_or_load(PlayerId(44));
    assert_eq!(profile.data_version, 9);
    assert_eq!(profile.core.coins, 120);
    let eggs = profile.items(InventoryField::WorldEggs);
    assert_eq!(eggs.len(), 2);
    assert_eq!(eggs[0].id.as_str(), "A");
    assert_ne!(eggs[1].id.as_str(), "A");
    assert!(profile.meta.contains_key("migrated_from"));

    repo.write(PlayerId(44), "after migration").unwrap();
    let stored = common::stored_profile(&store, PlayerId(44)).unwrap();
    assert_eq!(stored.data_version, 10);
    assert_eq!(stored.items(InventoryField::WorldEggs).len(), 2);
}

#[test]
fn lists_and_peeks_stored_players() {
    let (mut repo, _store) = repo();
    for id in [3, 1, 2] {
        repo.adjust_coins(PlayerId(id), id as i64);
        repo.write(PlayerId(id), "seed").unwrap();
    }
    repo.evict(PlayerId(2));
    assert_eq!(
        repo.list_stored_players().unwrap(),
        vec![PlayerId(1), PlayerId(2), PlayerId(3)]
    );
    let peeked = repo.peek_stored(PlayerId(2)).unwrap().unwrap();
    assert_eq!(peeked.core.coins, 2);
    assert!(!repo.is_cached(PlayerId(2)));
    assert!(repo.peek_stored(PlayerId(99)).unwrap().is_none());
}
