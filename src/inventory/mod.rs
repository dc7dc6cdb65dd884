//! Inventory synchronization layer.
//!
//! Live world objects ([`PlayerWorld`]) are turned into per-field item arrays
//! by registered [`FieldSerializer`] adapters. [`InventorySync`] keeps the
//! authoritative arrays, evaluates the shrink [`guard`] on every count change,
//! and projects each array into the read-only [`MirrorTree`].

pub mod guard;
pub mod mirror;
pub mod serializer;
pub mod sync;
pub mod world;

pub use guard::{FieldGuard, GuardConfig, GuardVerdict};
pub use mirror::{FieldFolder, MirrorEntry, MirrorTree, PlayerMirror, UpsertOutcome};
pub use serializer::{default_serializers, FieldSerializer, WorldFieldSerializer};
pub use sync::{merge_by_id, FieldChange, InventorySync, SerializeReport, SyncConfig};
pub use world::{PlayerWorld, RemoveOptions, RemoveOutcome, WorldObject};
