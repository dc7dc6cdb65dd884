use slimevault::profile::{InventoryField, PlayerId};
use slimevault::service::WorkOutcome;

mod common;
use common::*;

#[test]
fn bursts_of_changes_coalesce_into_one_save() {
    let (mut vault, store, clock) = vault();
    let player = PlayerId(600);
    vault.on_player_join(player);
    for i in 0..3 {
        let id = format!("e{}", i);
        assert!(vault
            .spawn_item(player, InventoryField::EggTools, egg(&id, None))
            .unwrap());
    }
    assert!(vault.repository().is_dirty(player));

    clock.advance_secs(4);
    assert!(vault.run_due().is_empty());
    assert!(stored_profile(&store, player).is_none());

    clock.advance_secs(1);
    assert_eq!(
        vault.run_due(),
        vec![WorkOutcome::Saved { player, version: 2 }]
    );
    assert_eq!(store.write_count(), 1);
    let stored = stored_profile(&store, player).unwrap();
    assert_eq!(stored.items(InventoryField::EggTools).len(), 3);
}

#[test]
fn periodic_sweep_skips_clean_profiles() {
    let (mut vault, store, clock) = vault();
    let quiet = PlayerId(601);
    let busy = PlayerId(602);
    vault.on_player_join(quiet);
    vault.on_player_join(busy);

    clock.advance_secs(30);
    vault.run_due();
    vault.ensure_entry_has_id(
        busy,
        InventoryField::FoodTools,
        "f1".into(),
        food("f1", 2).payload,
    )
    .unwrap();
    assert_eq!(
        vault.run_due(),
        vec![WorkOutcome::Saved { player: busy, version: 2 }]
    );

    clock.advance_secs(30);
    assert_eq!(
        vault.run_due(),
        vec![WorkOutcome::Swept { serialized: 2, saved: 0 }]
    );
    assert!(stored_profile(&store, quiet).is_none());
    assert_eq!(store.write_count(), 1);

    // The next sweep is scheduled one interval later.
    clock.advance_secs(59);
    assert!(vault.run_due().is_empty());
    clock.advance_secs(1);
    assert_eq!(vault.run_due().len(), 1);
}
