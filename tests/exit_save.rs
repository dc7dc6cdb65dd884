//! Verified exit save driven through the work queue with a manual clock.
use std::sync::Arc;

use slimevault::config::Config;
use slimevault::metrics;
use slimevault::profile::{InventoryField, PlayerId};
use slimevault::service::WorkOutcome;
use slimevault::store::{MemoryStore, MemoryStoreFaults};

mod common;
use common::*;

#[test]
fn leave_writes_then_verifies_and_evicts() {
    let (mut vault, store, clock) = vault();
    let player = PlayerId(100);
    vault.on_player_join(player);
    vault.spawn_item(player, InventoryField::EggTools, egg("e1", None)).unwrap();

    let outcomes = vault.on_player_leave(player);
    assert_eq!(
        outcomes,
        vec![WorkOutcome::ExitWritten {
            player,
            attempt: 1,
            version: 2
        }]
    );
    assert!(vault.is_leaving(player));
    assert!(!vault.is_active(player));

    clock.advance(chrono::Duration::milliseconds(500));
    let outcomes = vault.run_due();
    assert!(outcomes.contains(&WorkOutcome::ExitVerified {
        player,
        attempt: 1,
        version: 2
    }));
    assert!(!vault.repository().is_cached(player));
    assert!(vault.world(player).is_none());

    let stored = stored_profile(&store, player).unwrap();
    assert_eq!(stored.data_version, 2);
    assert_eq!(stored.items(InventoryField::EggTools).len(), 1);
}

#[test]
fn stale_read_back_triggers_retry() {
    let store = Arc::new(MemoryStore::new());
    let (mut vault, clock) = vault_with(store.clone(), Config::default());
    let player = PlayerId(101);
    vault.on_player_join(player);
    store.set_faults(MemoryStoreFaults {
        dropped_writes: 1,
        ..Default::default()
    });

    vault.on_player_leave(player);
    clock.advance(chrono::Duration::milliseconds(500));
    let outcomes = vault.run_due();
    assert_eq!(
        outcomes,
        vec![WorkOutcome::ExitVerifyMismatch { player, attempt: 1 }]
    );

    clock.advance(chrono::Duration::milliseconds(1000));
    let outcomes = vault.run_due();
    assert_eq!(
        outcomes,
        vec![WorkOutcome::ExitWritten {
            player,
            attempt: 2,
            version: 3
        }]
    );

    clock.advance(chrono::Duration::milliseconds(500));
    let outcomes = vault.run_due();
    assert_eq!(
        outcomes,
        vec![WorkOutcome::ExitVerified {
            player,
            attempt: 2,
            version: 3
        }]
    );
    assert_eq!(stored_profile(&store, player).unwrap().data_version, 3);
}

#[test]
fn exhausted_exit_save_logs_and_does_not_panic() {
    let store = Arc::new(MemoryStore::new());
    let (mut vault, clock) = vault_with(store.clone(), Config::default());
    let player = PlayerId(102);
    vault.on_player_join(player);
    store.set_faults(MemoryStoreFaults {
        failing_writes: 10,
        ..Default::default()
    });
    let exhausted_before = metrics::snapshot().exit_saves_exhausted;

    let mut outcomes = vault.on_player_leave(player);
    for _ in 0..5 {
        clock.advance(chrono::Duration::milliseconds(1000));
        outcomes.extend(vault.run_due());
    }

    let attempts: Vec<u32> = outcomes
        .iter()
        .filter_map(|o| match o {
            WorkOutcome::ExitWriteFailed { attempt, .. } => Some(*attempt),
            _ => None,
        })
        .collect();
    assert_eq!(attempts, vec![1, 2]);
    assert!(outcomes.contains(&WorkOutcome::ExitExhausted {
        player,
        attempts: 3
    }));
    assert!(metrics::snapshot().exit_saves_exhausted > exhausted_before);
    assert!(!vault.repository().is_cached(player));
    assert!(!vault.is_leaving(player));
    assert!(store.raw(&key(player)).is_none());
}

#[test]
fn offline_store_gives_up_without_store_calls() {
    let store = Arc::new(MemoryStore::with_faults(MemoryStoreFaults {
        unavailable: true,
        ..Default::default()
    }));
    let (mut vault, _clock) = vault_with(store.clone(), Config::default());
    let player = PlayerId(103);
    vault.on_player_join(player);
    assert!(vault.repository().is_offline());

    let outcomes = vault.on_player_leave(player);
    assert_eq!(
        outcomes,
        vec![WorkOutcome::ExitExhausted {
            player,
            attempts: 1
        }]
    );
    assert_eq!(store.write_count(), 0);
}

#[test]
fn rejoin_during_exit_save_keeps_session() {
    let (mut vault, _store, clock) = vault();
    let player = PlayerId(104);
    vault.on_player_join(player);
    vault.on_player_leave(player);
    vault.on_player_join(player);
    assert!(vault.is_active(player));

    clock.advance(chrono::Duration::milliseconds(500));
    let outcomes = vault.run_due();
    assert!(outcomes
        .iter()
        .any(|o| matches!(o, WorkOutcome::ExitVerified { .. })));
    assert!(vault.repository().is_cached(player));
    assert!(vault.world(player).is_some());
}

#[test]
fn shutdown_saves_every_session() {
    let (mut vault, store, _clock) = vault();
    let active = PlayerId(105);
    let leaving = PlayerId(106);
    vault.on_player_join(active);
    vault.on_player_join(leaving);
    vault.repository_mut().adjust_coins(active, 40);
    vault.on_player_leave(leaving);

    let report = vault.on_process_shutdown();
    assert_eq!(report.saved, vec![active, leaving]);
    assert!(report.failed.is_empty());
    assert_eq!(stored_profile(&store, active).unwrap().core.coins, 40);
    assert_eq!(stored_profile(&store, leaving).unwrap().data_version, 3);
    assert!(vault.active_players().is_empty());
    assert!(vault.queue().is_empty());
}
