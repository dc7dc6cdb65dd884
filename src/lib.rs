//! # Slimevault - profile persistence and inventory sync for a slime ranch game
//!
//! Slimevault keeps one authoritative profile per player (coins, faction
//! standings, inventory), restores it into the live world when the player
//! joins, serializes the world back as it changes and makes a verified
//! exit save when the player leaves.
//!
//! ## Features
//!
//! - **Profile repository**: cached profiles over a pluggable key-value store
//!   (sled on disk, or in memory with fault injection), legacy record
//!   migration at load, monotonic `data_version` on every accepted write.
//! - **Inventory sync**: per-field serializer adapters, merge-by-id restore,
//!   a non-blocking shrink guard and a read-only mirror tree for inspection.
//! - **Scheduled work**: debounced saves, periodic sweeps, exit-save
//!   verification and deferred removals on an explicit queue.
//! - **Flows**: hatch, feed, capture, egg placement and faction sales.
//! - **Host bridge**: JSON-lines events on stdin, replies on stdout.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use slimevault::config::Config;
//! use slimevault::profile::PlayerId;
//! use slimevault::schedule::SystemClock;
//! use slimevault::service::VaultService;
//! use slimevault::store::SledStore;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("slimevault.toml").await?;
//!     let store = SledStore::open(config.storage.db_path())?;
//!     let mut vault = VaultService::new(store, config, Arc::new(SystemClock));
//!
//!     vault.on_player_join(PlayerId(42));
//!     vault.save_now(PlayerId(42), "example");
//!     vault.run_due();
//!     vault.on_player_leave(PlayerId(42));
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`store`] - key-value store trait and backends
//! - [`profile`] - profile model, migration and the repository
//! - [`inventory`] - world model, serializers, guard, mirror and sync
//! - [`schedule`] - clock and work queue
//! - [`flows`] - transactional game flows
//! - [`service`] - session lifecycle and work execution
//! - [`host`] - JSON-lines host bridge
//! - [`config`] - TOML configuration
//!
//! ```text
//! host events ──▶ VaultService ──▶ InventorySync ──▶ MirrorTree
//!                     │                 │
//!                     ▼                 ▼
//!                 WorkQueue ──▶ ProfileRepository ──▶ KeyValueStore
//! ```

pub mod config;
pub mod errors;
pub mod flows;
pub mod host;
pub mod inventory;
pub mod logutil;
pub mod metrics;
pub mod profile;
pub mod schedule;
pub mod service;
pub mod store;
