//! Process-wide persistence counters.
//! Read by the `status` command and by tests; cheap enough to bump on every save.
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};
use std::time::Instant;

static SAVES_ATTEMPTED: AtomicU64 = AtomicU64::new(0);
static SAVES_SUCCEEDED: AtomicU64 = AtomicU64::new(0);
static SAVES_FAILED: AtomicU64 = AtomicU64::new(0);
static SAVES_SKIPPED_OFFLINE: AtomicU64 = AtomicU64::new(0);
static SAVE_LATENCY_SUM_MS: AtomicU64 = AtomicU64::new(0);
static SAVE_LATENCY_COUNT: AtomicU64 = AtomicU64::new(0);
static EXIT_SAVES_VERIFIED: AtomicU64 = AtomicU64::new(0);
static EXIT_SAVE_RETRIES: AtomicU64 = AtomicU64::new(0);
static EXIT_SAVES_EXHAUSTED: AtomicU64 = AtomicU64::new(0);
static DEGRADED_LOADS: AtomicU64 = AtomicU64::new(0);

static GUARD_COUNTERS: OnceLock<Mutex<HashMap<String, GuardCounter>>> = OnceLock::new();

pub fn inc_saves_attempted() {
    SAVES_ATTEMPTED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_saves_succeeded() {
    SAVES_SUCCEEDED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_saves_failed() {
    SAVES_FAILED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_saves_skipped_offline() {
    SAVES_SKIPPED_OFFLINE.fetch_add(1, Ordering::Relaxed);
}
pub fn observe_save_latency(started: Instant) {
    let ms = started.elapsed().as_millis() as u64;
    SAVE_LATENCY_SUM_MS.fetch_add(ms, Ordering::Relaxed);
    SAVE_LATENCY_COUNT.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_exit_saves_verified() {
    EXIT_SAVES_VERIFIED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_exit_save_retries() {
    EXIT_SAVE_RETRIES.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_exit_saves_exhausted() {
    EXIT_SAVES_EXHAUSTED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_degraded_loads() {
    DEGRADED_LOADS.fetch_add(1, Ordering::Relaxed);
}

/// Guard verdict tallies for one inventory field.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct GuardCounter {
    pub evaluations: u64,
    pub correlated: u64,
    pub suspicious: u64,
}

fn guard_counter_lock() -> &'static Mutex<HashMap<String, GuardCounter>> {
    GUARD_COUNTERS.get_or_init(|| Mutex::new(HashMap::new()))
}

pub fn record_guard_verdict(field: &str, correlated: bool, suspicious: bool) -> GuardCounter {
    let mut guard = guard_counter_lock()
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    let counter = guard.entry(field.to_string()).or_default();
    counter.evaluations = counter.evaluations.saturating_add(1);
    if correlated {
        counter.correlated = counter.correlated.saturating_add(1);
    }
    if suspicious {
        counter.suspicious = counter.suspicious.saturating_add(1);
    }
    *counter
}

pub fn guard_counters_snapshot() -> HashMap<String, GuardCounter> {
    guard_counter_lock()
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .clone()
}

#[derive(Debug, Default, Clone)]
pub struct Snapshot {
    pub saves_attempted: u64,
    pub saves_succeeded: u64,
    pub saves_failed: u64,
    pub saves_skipped_offline: u64,
    pub save_latency_avg_ms: Option<u64>,
    pub exit_saves_verified: u64,
    pub exit_save_retries: u64,
    pub exit_saves_exhausted: u64,
    pub degraded_loads: u64,
}

pub fn snapshot() -> Snapshot {
    let sum = SAVE_LATENCY_SUM_MS.load(Ordering::Relaxed);
    let count = SAVE_LATENCY_COUNT.load(Ordering::Relaxed);
    Snapshot {
        saves_attempted: SAVES_ATTEMPTED.load(Ordering::Relaxed),
        saves_succeeded: SAVES_SUCCEEDED.load(Ordering::Relaxed),
        saves_failed: SAVES_FAILED.load(Ordering::Relaxed),
        saves_skipped_offline: SAVES_SKIPPED_OFFLINE.load(Ordering::Relaxed),
        save_latency_avg_ms: if count > 0 { Some(sum / count) } else { None },
        exit_saves_verified: EXIT_SAVES_VERIFIED.load(Ordering::Relaxed),
        exit_save_retries: EXIT_SAVE_RETRIES.load(Ordering::Relaxed),
        exit_saves_exhausted: EXIT_SAVES_EXHAUSTED.load(Ordering::Relaxed),
        degraded_loads: DEGRADED_LOADS.load(Ordering::Relaxed),
    }
}
