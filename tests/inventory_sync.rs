//! Restore, serialize, guard and mirror behaviour through the service.
use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use slimevault::config::Config;
use slimevault::flows::{FlowAction, FlowRequest};
use slimevault::inventory::{
    default_serializers, FieldSerializer, GuardVerdict, InventorySync, MirrorEntry, PlayerWorld,
    RemoveOptions, RemoveOutcome, SyncConfig, UpsertOutcome,
};
use slimevault::profile::{InventoryField, Item, ItemId, PlayerId, Profile};
use slimevault::service::WorkOutcome;
use slimevault::store::MemoryStore;

mod common;
use common::*;

fn bare_sync() -> InventorySync {
    let mut sync = InventorySync::new(SyncConfig::default());
    for serializer in default_serializers(Duration::seconds(10)) {
        sync.register(serializer);
    }
    sync
}

/// World-egg adapter that reports live objects but never recreates saved ones.
struct LiveOnly;

impl FieldSerializer for LiveOnly {
    fn field(&self) -> InventoryField {
        InventoryField::WorldEggs
    }

    fn serialize(&self, world: &PlayerWorld) -> Vec<Item> {
        world
            .objects(InventoryField::WorldEggs)
            .iter()
            .map(|o| o.item.clone())
            .collect()
    }

    fn restore(&self, world: &mut PlayerWorld, _saved: &[Item], _now: DateTime<Utc>) -> Vec<Item> {
        self.serialize(world)
    }
}

fn stored_ids(store: &MemoryStore, player: PlayerId, field: InventoryField) -> Vec<String> {
    stored_profile(store, player)
        .unwrap()
        .items(field)
        .iter()
        .map(|item| item.id.as_str().to_string())
        .collect()
}

#[test]
fn restore_appends_saved_items_missing_from_world() {
    let mut sync = bare_sync();
    let now = start_time();
    let player = PlayerId(1);
    let mut world = PlayerWorld::new();
    // The host already recreated B before the snapshot was applied.
    world.spawn(InventoryField::WorldEggs, egg("B", None));

    let mut snapshot = BTreeMap::new();
    snapshot.insert(
        InventoryField::WorldEggs,
        vec![egg("A", None), egg("B", None)],
    );
    // A fresh adapter would recreate A as well, so register one that restores nothing.
    sync.register(Box::new(LiveOnly));

    let merged = sync.restore_player(player, &mut world, &snapshot, now);
    let ids: Vec<&str> = merged[&InventoryField::WorldEggs]
        .iter()
        .map(|i| i.id.as_str())
        .collect();
    assert_eq!(ids, vec!["B", "A"]);
    assert_eq!(
        sync.mirror()
            .folder(player, InventoryField::WorldEggs)
            .map(|f| f.count),
        Some(2)
    );
}

#[test]
fn restored_items_without_world_objects_survive_later_saves() {
    let store = Arc::new(MemoryStore::new());
    let player = PlayerId(40);
    let mut profile = Profile::new(player);
    profile
        .items_mut(InventoryField::WorldEggs)
        .extend([egg("A", None), egg("B", None)]);
    seed_profile(&store, &profile);

    let (mut vault, clock) = vault_with(store.clone(), Config::default());
    vault.register_serializer(Box::new(LiveOnly));
    vault.on_player_join(player);
    assert_eq!(vault.world(player).unwrap().count(InventoryField::WorldEggs), 0);

    assert!(vault.force_full_save_now(player, "after join"));
    assert_eq!(stored_ids(&store, player, InventoryField::WorldEggs), vec!["A", "B"]);
    assert_eq!(vault.sync().carried(player, InventoryField::WorldEggs).len(), 2);

    // The host recreates B later; it must not be stored twice.
    clock.advance_secs(30);
    assert!(vault
        .spawn_item(player, InventoryField::WorldEggs, egg("B", Some(start_time())))
        .unwrap());
    clock.advance_secs(5);
    assert!(matches!(
        vault.run_due().as_slice(),
        [WorkOutcome::Saved { .. }]
    ));
    assert_eq!(stored_ids(&store, player, InventoryField::WorldEggs), vec!["B", "A"]);
    assert_eq!(vault.sync().carried(player, InventoryField::WorldEggs).len(), 1);

    // An explicit removal is the only way a carried item goes away.
    let outcome = vault
        .safe_remove_or_defer(
            player,
            InventoryField::WorldEggs,
            &ItemId::from("A"),
            "cleanup",
            RemoveOptions::default(),
        )
        .unwrap();
    assert_eq!(outcome, RemoveOutcome::Missing);
    clock.advance_secs(5);
    assert!(matches!(
        vault.run_due().as_slice(),
        [WorkOutcome::Saved { .. }]
    ));
    assert_eq!(stored_ids(&store, player, InventoryField::WorldEggs), vec!["B"]);
    assert!(vault.sync().carried(player, InventoryField::WorldEggs).is_empty());
}

#[test]
fn repeated_restores_never_duplicate_ids() {
    let mut sync = bare_sync();
    let now = start_time();
    let player = PlayerId(2);
    let mut world = PlayerWorld::new();
    let mut snapshot = BTreeMap::new();
    snapshot.insert(
        InventoryField::EggTools,
        vec![egg("x", None), egg("y", None), egg("x", None)],
    );
    for _ in 0..3 {
        let merged = sync.restore_player(player, &mut world, &snapshot, now);
        let eggs = &merged[&InventoryField::EggTools];
        assert_eq!(eggs.len(), 2);
    }
    assert_eq!(world.count(InventoryField::EggTools), 2);
}

#[test]
fn ensure_entry_twice_leaves_one_entry() {
    let (mut vault, store, _clock) = vault();
    let player = PlayerId(3);
    vault.on_player_join(player);

    let payload = egg("e-1", None).payload;
    let first = vault
        .ensure_entry_has_id(player, InventoryField::EggTools, ItemId::from("e-1"), payload.clone())
        .unwrap();
    assert!(matches!(first, UpsertOutcome::Created(_)));
    let second = vault
        .ensure_entry_has_id(player, InventoryField::EggTools, ItemId::from("e-1"), payload)
        .unwrap();
    assert!(matches!(second, UpsertOutcome::Updated(_)));

    let folder = vault
        .sync()
        .mirror()
        .folder(player, InventoryField::EggTools)
        .unwrap();
    assert_eq!(folder.count, 1);
    assert_eq!(folder.entries.len(), 1);

    // The save requested by the upsert lands on the next run.
    let outcomes = vault.run_due();
    assert!(outcomes
        .iter()
        .any(|o| matches!(o, WorkOutcome::Saved { player: p, .. } if *p == player)));
    let stored = stored_profile(&store, player).unwrap();
    assert_eq!(stored.items(InventoryField::EggTools).len(), 1);
}

#[test]
fn ensure_entry_reuses_malformed_mirror_entry() {
    let mut sync = bare_sync();
    let player = PlayerId(4);
    sync.mirror_mut().insert_raw_entry(
        player,
        InventoryField::FoodTools,
        "Entry_001",
        MirrorEntry::placeholder(),
    );
    let outcome = sync.ensure_entry_has_id(
        player,
        InventoryField::FoodTools,
        ItemId::from("f-1"),
        food("f-1", 3).payload,
    );
    assert_eq!(outcome, UpsertOutcome::ReusedPlaceholder("Entry_001".to_string()));
    let folder = sync.mirror().folder(player, InventoryField::FoodTools).unwrap();
    assert_eq!(folder.count, 1);
}

#[test]
fn hatching_one_of_five_eggs_is_an_ordinary_shrink() {
    let store = Arc::new(MemoryStore::new());
    let player = PlayerId(5);
    seed_profile(&store, &profile_with_world_eggs(player, 5));
    let (mut vault, _clock) = vault_with(store.clone(), Config::default());
    vault.on_player_join(player);

    let response = vault.handle_request(
        player,
        FlowRequest {
            action: FlowAction::Hatch {
                egg_id: ItemId::from("egg-0"),
            },
            request_token: Some("hatch-1".into()),
        },
    );
    assert!(response.success, "{}", response.message);
    assert_eq!(response.request_token.as_deref(), Some("hatch-1"));

    let outcomes = vault.run_due();
    assert!(outcomes
        .iter()
        .any(|o| matches!(o, WorkOutcome::Saved { .. })));

    let folder = vault
        .sync()
        .mirror()
        .folder(player, InventoryField::WorldEggs)
        .unwrap();
    assert_eq!(folder.count, 4);
    assert_eq!(folder.entries.len(), 4);
    assert_eq!(
        folder.last_verdict,
        Some(GuardVerdict::Shrink { old: 5, new: 4 })
    );

    let stored = stored_profile(&store, player).unwrap();
    assert_eq!(stored.items(InventoryField::WorldEggs).len(), 4);
    assert_eq!(stored.items(InventoryField::WorldSlimes).len(), 1);
    assert!(!stored.meta.contains_key("guard.worldEggs"));
}

#[test]
fn suspicious_drop_is_flagged_but_still_saved() {
    let store = Arc::new(MemoryStore::new());
    let player = PlayerId(6);
    seed_profile(&store, &profile_with_world_eggs(player, 10));
    let (mut vault, clock) = vault_with(store.clone(), Config::default());
    vault.on_player_join(player);

    clock.advance_secs(2);
    let force = RemoveOptions {
        force: true,
        retry_after_grace: false,
    };
    for i in 0..9 {
        let outcome = vault
            .safe_remove_or_defer(
                player,
                InventoryField::WorldEggs,
                &ItemId::from(format!("egg-{}", i).as_str()),
                "despawn",
                force,
            )
            .unwrap();
        assert!(matches!(outcome, RemoveOutcome::Removed(_)));
    }

    clock.advance_secs(5);
    let outcomes = vault.run_due();
    assert!(outcomes
        .iter()
        .any(|o| matches!(o, WorkOutcome::Saved { .. })));

    let stored = stored_profile(&store, player).unwrap();
    assert_eq!(stored.items(InventoryField::WorldEggs).len(), 1);
    let flag = &stored.meta["guard.worldEggs"];
    assert_eq!(flag["verdict"]["verdict"], "suspicious");
    assert_eq!(flag["verdict"]["old"], 10);
    assert_eq!(flag["verdict"]["new"], 1);
}

#[test]
fn capture_is_explained_by_correlated_event() {
    let store = Arc::new(MemoryStore::new());
    let player = PlayerId(7);
    let mut profile = Profile::new(player);
    profile.items_mut(InventoryField::WorldSlimes).push(slime(
        "s-1",
        20,
        1.0,
        slimevault::profile::Rgb::new(255, 120, 200),
    ));
    seed_profile(&store, &profile);
    let (mut vault, _clock) = vault_with(store, Config::default());
    vault.on_player_join(player);

    let response = vault.handle_request(
        player,
        FlowRequest::new(FlowAction::Capture {
            slime_id: ItemId::from("s-1"),
        }),
    );
    assert!(response.success);
    assert!(response.request_token.is_some());
    vault.run_due();

    let folder = vault
        .sync()
        .mirror()
        .folder(player, InventoryField::WorldSlimes)
        .unwrap();
    assert!(matches!(
        folder.last_verdict,
        Some(GuardVerdict::Correlated { old: 1, new: 0, .. })
    ));
}

#[test]
fn protected_objects_are_removed_after_grace() {
    let store = Arc::new(MemoryStore::new());
    let player = PlayerId(8);
    seed_profile(&store, &profile_with_world_eggs(player, 1));
    let (mut vault, clock) = vault_with(store, Config::default());
    vault.on_player_join(player);

    let retry = RemoveOptions {
        force: false,
        retry_after_grace: true,
    };
    let outcome = vault
        .safe_remove_or_defer(player, InventoryField::WorldEggs, &ItemId::from("egg-0"), "cleanup", retry)
        .unwrap();
    assert!(matches!(outcome, RemoveOutcome::Deferred { .. }));
    assert_eq!(vault.world(player).unwrap().count(InventoryField::WorldEggs), 1);

    clock.advance_secs(11);
    let outcomes = vault.run_due();
    assert!(outcomes.iter().any(|o| matches!(
        o,
        WorkOutcome::RemovalRetried { removed: true, .. }
    )));
    assert_eq!(vault.world(player).unwrap().count(InventoryField::WorldEggs), 0);
}
