//! Shrink guard: classifies inventory count drops for audit.
//!
//! The guard never rejects anything. A verdict only ends up in logs, metrics
//! and the profile's `meta`; the serialize that produced it always proceeds.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Cap on correlated events buffered per field.
pub const MAX_RECENT_EVENTS: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GuardConfig {
    /// Trailing window in which correlated events can explain a drop.
    pub correlated_window: Duration,
    /// Minimum `drop / old` for a drop to be considered large.
    pub large_drop_fraction: f64,
    /// Large drops are only suspicious this soon after the session started.
    pub initial_window: Duration,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            correlated_window: Duration::seconds(3),
            large_drop_fraction: 0.85,
            initial_window: Duration::seconds(15),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum GuardVerdict {
    FirstObservation { count: usize },
    Growth { old: usize, new: usize },
    Correlated { old: usize, new: usize, explained: usize },
    Suspicious { old: usize, new: usize, drop_fraction: f64 },
    Shrink { old: usize, new: usize },
}

impl GuardVerdict {
    pub fn is_suspicious(&self) -> bool {
        matches!(self, GuardVerdict::Suspicious { .. })
    }

    pub fn is_correlated(&self) -> bool {
        matches!(self, GuardVerdict::Correlated { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            GuardVerdict::FirstObservation { .. } => "first_observation",
            GuardVerdict::Growth { .. } => "growth",
            GuardVerdict::Correlated { .. } => "correlated",
            GuardVerdict::Suspicious { .. } => "suspicious",
            GuardVerdict::Shrink { .. } => "shrink",
        }
    }
}

/// Pure classification of one count change.
///
/// `correlated_sum` is the total of correlated event counts inside the
/// trailing window; `since_session_start` is how long the session has run.
pub fn classify(
    old: Option<usize>,
    new: usize,
    correlated_sum: usize,
    since_session_start: Duration,
    cfg: &GuardConfig,
) -> GuardVerdict {
    let Some(old) = old else {
        return GuardVerdict::FirstObservation { count: new };
    };
    if new >= old {
        return GuardVerdict::Growth { old, new };
    }
    let drop = old - new;
    if correlated_sum >= drop {
        return GuardVerdict::Correlated {
            old,
            new,
            explained: correlated_sum,
        };
    }
    let drop_fraction = drop as f64 / old as f64;
    if drop_fraction >= cfg.large_drop_fraction && since_session_start <= cfg.initial_window {
        return GuardVerdict::Suspicious {
            old,
            new,
            drop_fraction,
        };
    }
    GuardVerdict::Shrink { old, new }
}

/// Per player, per field guard state.
#[derive(Debug, Clone, Default)]
pub struct FieldGuard {
    last_count: Option<usize>,
    last_serialize_at: Option<DateTime<Utc>>,
    change_version: u64,
    recent_events: VecDeque<(DateTime<Utc>, usize)>,
}

impl FieldGuard {
    pub fn last_count(&self) -> Option<usize> {
        self.last_count
    }

    pub fn last_serialize_at(&self) -> Option<DateTime<Utc>> {
        self.last_serialize_at
    }

    pub fn change_version(&self) -> u64 {
        self.change_version
    }

    /// Establish a baseline without producing a verdict (used after restore).
    pub fn seed(&mut self, count: usize, now: DateTime<Utc>) {
        self.last_count = Some(count);
        self.last_serialize_at = Some(now);
    }

    /// Note an expected drop. Events older than `window` are pruned and at
    /// most [`MAX_RECENT_EVENTS`] are kept.
    pub fn record_event(&mut self, at: DateTime<Utc>, count: usize, window: Duration) {
        self.prune(at, window);
        if count == 0 {
            return;
        }
        if self.recent_events.len() >= MAX_RECENT_EVENTS {
            self.recent_events.pop_front();
        }
        self.recent_events.push_back((at, count));
    }

    pub fn pending_events(&self) -> usize {
        self.recent_events.len()
    }

    fn prune(&mut self, now: DateTime<Utc>, window: Duration) {
        let cutoff = now - window;
        while self
            .recent_events
            .front()
            .is_some_and(|(at, _)| *at < cutoff)
        {
            self.recent_events.pop_front();
        }
    }

    fn correlated_sum(&mut self, now: DateTime<Utc>, window: Duration) -> usize {
        self.prune(now, window);
        self.recent_events.iter().map(|(_, count)| count).sum()
    }

    /// Returns `None` when the count did not change. Otherwise classifies the
    /// change, adopts the new count and bumps the change version.
    pub fn observe(
        &mut self,
        new_count: usize,
        session_start: DateTime<Utc>,
        now: DateTime<Utc>,
        cfg: &GuardConfig,
    ) -> Option<GuardVerdict> {
        self.last_serialize_at = Some(now);
        if self.last_count == Some(new_count) {
            return None;
        }
        let correlated = self.correlated_sum(now, cfg.correlated_window);
        let verdict = classify(
            self.last_count,
            new_count,
            correlated,
            now - session_start,
            cfg,
        );
        if verdict.is_correlated() {
            // Events explain one drop only.
            self.recent_events.clear();
        }
        self.last_count = Some(new_count);
        self.change_version = self.change_version.saturating_add(1);
        Some(verdict)
    }
}
