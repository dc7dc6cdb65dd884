//! Player profile model, load-time migration and the in-memory repository.

pub mod migration;
pub mod repository;
pub mod types;

pub use migration::{decode_profile, upgrade_profile, MigrationReport, LEGACY_ID_KEYS};
pub use repository::{ProfileRepository, SaveReceipt, StoreMode};
pub use types::*;
