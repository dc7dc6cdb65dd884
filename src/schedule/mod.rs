//! Time source and the scheduled-work queue that drives debounced saves,
//! periodic sweeps, exit-save retries and deferred removals.
//!
//! Nothing in here sleeps. The host loop calls
//! [`crate::service::VaultService::run_due`] with the current time and every
//! item whose due time has passed is executed, which keeps grace windows and
//! backoff testable with a [`ManualClock`].

pub mod clock;
pub mod queue;

pub use clock::{Clock, ManualClock, SystemClock};
pub use queue::{Work, WorkQueue};
