//! Exit save: write, wait, read back, compare `data_version`, retry.
//!
//! Each step is a [`Work`] item, so the verify delay and the retry backoff
//! are just due times on the queue.

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};

use super::{VaultService, WorkOutcome};
use crate::metrics;
use crate::profile::PlayerId;
use crate::schedule::Work;
use crate::store::KeyValueStore;

impl<S: KeyValueStore> VaultService<S> {
    /// Start the verified exit save. Pending routine saves for the player are
    /// dropped; the first write is due immediately.
    pub fn triple_exit_save(&mut self, player: PlayerId) {
        let now = self.clock.now();
        self.leaving.insert(player);
        self.queue.cancel_player(player);
        self.queue
            .schedule(now, Work::ExitSaveAttempt { player, attempt: 1 });
    }

    pub fn is_leaving(&self, player: PlayerId) -> bool {
        self.leaving.contains(&player)
    }

    pub(super) fn run_exit_attempt(
        &mut self,
        player: PlayerId,
        attempt: u32,
        now: DateTime<Utc>,
    ) -> WorkOutcome {
        let reason = format!("exit attempt {}", attempt);
        match self.repo.write(player, &reason) {
            Ok(receipt) => {
                self.queue.schedule(
                    now + self.config.saves.exit_verify_delay(),
                    Work::ExitSaveVerify {
                        player,
                        attempt,
                        written_version: receipt.written_version,
                    },
                );
                WorkOutcome::ExitWritten {
                    player,
                    attempt,
                    version: receipt.written_version,
                }
            }
            Err(e) => {
                warn!(
                    "Exit save for {} attempt {}: write failed: {}",
                    player, attempt, e
                );
                if self.retry_or_give_up(player, attempt, now) {
                    WorkOutcome::ExitWriteFailed {
                        player,
                        attempt,
                        error: e.to_string(),
                    }
                } else {
                    WorkOutcome::ExitExhausted {
                        player,
                        attempts: attempt,
                    }
                }
            }
        }
    }

    pub(super) fn run_exit_verify(
        &mut self,
        player: PlayerId,
        attempt: u32,
        written_version: u64,
        now: DateTime<Utc>,
    ) -> WorkOutcome {
        match self.repo.verify(player, written_version) {
            Ok(true) => {
                metrics::inc_exit_saves_verified();
                info!(
                    "Exit save for {} verified at v{} (attempt {})",
                    player, written_version, attempt
                );
                self.finish_exit(player);
                return WorkOutcome::ExitVerified {
                    player,
                    attempt,
                    version: written_version,
                };
            }
            Ok(false) => warn!(
                "Exit save for {} attempt {}: read-back older than v{}",
                player, attempt, written_version
            ),
            Err(e) => warn!(
                "Exit save for {} attempt {}: read-back failed: {}",
                player, attempt, e
            ),
        }
        if self.retry_or_give_up(player, attempt, now) {
            WorkOutcome::ExitVerifyMismatch { player, attempt }
        } else {
            WorkOutcome::ExitExhausted {
                player,
                attempts: attempt,
            }
        }
    }

    /// Queue the next attempt after the backoff. Returns false once attempts
    /// are used up (or the store went offline), after logging the final failure.
    fn retry_or_give_up(&mut self, player: PlayerId, attempt: u32, now: DateTime<Utc>) -> bool {
        let max = self.config.saves.exit_save_attempts;
        if attempt < max && !self.repo.is_offline() {
            metrics::inc_exit_save_retries();
            self.queue.schedule(
                now + self.config.saves.exit_retry_backoff(),
                Work::ExitSaveAttempt {
                    player,
                    attempt: attempt + 1,
                },
            );
            return true;
        }
        metrics::inc_exit_saves_exhausted();
        let version = self
            .repo
            .profile(player)
            .map(|profile| profile.data_version)
            .unwrap_or(0);
        error!(
            "Exit save for player {} failed after {} of {} attempts (cached v{}, store offline: {}); changes from this session may be lost",
            player,
            attempt,
            max,
            version,
            self.repo.is_offline()
        );
        self.finish_exit(player);
        false
    }

    /// Drop session state once the exit save is over. A player who rejoined
    /// in the meantime keeps everything.
    fn finish_exit(&mut self, player: PlayerId) {
        if !self.leaving.remove(&player) {
            debug!("Player {} rejoined during exit save; keeping session", player);
            return;
        }
        self.repo.evict(player);
        self.sync.end_session(player);
        self.worlds.remove(&player);
    }

    /// Single write plus immediate read-back, used at shutdown.
    pub(super) fn exit_save_once(&mut self, player: PlayerId) -> bool {
        let verified = self
            .repo
            .write(player, "shutdown exit save")
            .and_then(|receipt| self.repo.verify(player, receipt.written_version));
        match verified {
            Ok(true) => {
                metrics::inc_exit_saves_verified();
                true
            }
            Ok(false) => {
                error!("Shutdown exit save for {} read back stale data", player);
                metrics::inc_exit_saves_exhausted();
                false
            }
            Err(e) => {
                error!("Shutdown exit save for {} failed: {}", player, e);
                metrics::inc_exit_saves_exhausted();
                false
            }
        }
    }
}
