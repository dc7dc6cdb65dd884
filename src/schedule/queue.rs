use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

use crate::profile::{InventoryField, ItemId, PlayerId};

/// A unit of deferred work.
#[derive(Debug, Clone, PartialEq)]
pub enum Work {
    /// Debounced or explicit best-effort save.
    Save { player: PlayerId, reason: String },
    /// Serialize every active player and save the dirty ones; reschedules itself.
    PeriodicSweep,
    /// Write step of the exit save (1-based attempt number).
    ExitSaveAttempt { player: PlayerId, attempt: u32 },
    /// Read-back step of the exit save.
    ExitSaveVerify {
        player: PlayerId,
        attempt: u32,
        written_version: u64,
    },
    /// Removal that was skipped because the object was still protected.
    RetryRemoval {
        player: PlayerId,
        field: InventoryField,
        item: ItemId,
        reason: String,
    },
}

impl Work {
    pub fn player(&self) -> Option<PlayerId> {
        match self {
            Work::Save { player, .. }
            | Work::ExitSaveAttempt { player, .. }
            | Work::ExitSaveVerify { player, .. }
            | Work::RetryRemoval { player, .. } => Some(*player),
            Work::PeriodicSweep => None,
        }
    }

    fn is_exit_save(&self) -> bool {
        matches!(
            self,
            Work::ExitSaveAttempt { .. } | Work::ExitSaveVerify { .. }
        )
    }
}

#[derive(Debug)]
struct Scheduled {
    due: DateTime<Utc>,
    seq: u64,
    work: Work,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for Scheduled {}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scheduled {
    // Reversed so the BinaryHeap pops the earliest due item (FIFO on ties).
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Min-heap of work ordered by due time. Saves are deduplicated per player.
#[derive(Debug, Default)]
pub struct WorkQueue {
    heap: BinaryHeap<Scheduled>,
    next_seq: u64,
    /// Earliest due time of the live `Save` entry per player.
    pending_saves: HashMap<PlayerId, DateTime<Utc>>,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, due: DateTime<Utc>, work: Work) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Scheduled { due, seq, work });
    }

    /// Queue a save unless one is already due no later than `due`.
    /// Returns whether a new entry was queued.
    pub fn schedule_save(&mut self, player: PlayerId, due: DateTime<Utc>, reason: &str) -> bool {
        if let Some(existing) = self.pending_saves.get(&player) {
            if *existing <= due {
                return false;
            }
        }
        self.pending_saves.insert(player, due);
        self.schedule(
            due,
            Work::Save {
                player,
                reason: reason.to_string(),
            },
        );
        true
    }

    pub fn has_pending_save(&self, player: PlayerId) -> bool {
        self.pending_saves.contains_key(&player)
    }

    pub fn has_pending_exit_save(&self, player: PlayerId) -> bool {
        self.heap
            .iter()
            .any(|s| s.work.is_exit_save() && s.work.player() == Some(player))
    }

    pub fn next_due(&self) -> Option<DateTime<Utc>> {
        self.heap.peek().map(|s| s.due)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Pop the next item due at or before `now`, skipping superseded saves.
    pub fn pop_due(&mut self, now: DateTime<Utc>) -> Option<Work> {
        loop {
            let due = self.heap.peek()?.due;
            if due > now {
                return None;
            }
            let scheduled = self.heap.pop()?;
            if let Work::Save { player, .. } = &scheduled.work {
                match self.pending_saves.get(player) {
                    Some(live_due) if *live_due == scheduled.due => {
                        self.pending_saves.remove(player);
                    }
                    // An earlier save for this player replaced (or already ran) this one.
                    _ => continue,
                }
            }
            return Some(scheduled.work);
        }
    }

    /// Drop all queued work for a player except exit-save steps.
    pub fn cancel_player(&mut self, player: PlayerId) {
        self.pending_saves.remove(&player);
        let kept: Vec<Scheduled> = self
            .heap
            .drain()
            .filter(|s| s.work.player() != Some(player) || s.work.is_exit_save())
            .collect();
        self.heap = kept.into_iter().collect();
    }

    /// Everything still queued, in due order. Used by the shutdown sweep.
    pub fn drain_all(&mut self) -> Vec<Work> {
        self.pending_saves.clear();
        let mut items: Vec<Scheduled> = self.heap.drain().collect();
        items.sort_by(|a, b| b.cmp(a));
        items.into_iter().map(|s| s.work).collect()
    }
}
