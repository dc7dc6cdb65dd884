//! # Configuration
//!
//! TOML configuration for the slimevault daemon. Every section and field has
//! a default, so a partial file (or an empty one) is valid.
//!
//! - [`StorageConfig`] - where profiles live and how keys are named
//! - [`SaveConfig`] - autosave cadence, debounce and the exit-save retry policy
//! - [`InventoryConfig`] - per-field entry cap and restore grace window
//! - [`GuardSettings`] - shrink guard thresholds
//! - [`EconomyConfig`] - faction sale tuning
//! - [`LoggingConfig`] - level and optional log file
//!
//! ```rust,no_run
//! use slimevault::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     Config::create_default("slimevault.toml").await?;
//!     let config = Config::load("slimevault.toml").await?;
//!     println!("Autosave every {}s", config.saves.autosave_interval_secs);
//!     Ok(())
//! }
//! ```
//!
//! ```toml
//! [storage]
//! data_dir = "./data"
//! key_prefix = "Player_"
//!
//! [saves]
//! autosave_interval_secs = 60
//! exit_save_attempts = 3
//!
//! [economy.factions.gloopers]
//! base_multiplier = 1.0
//! standing_gain_per_base = 0.00012
//! ```

use anyhow::{anyhow, Result};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::fs;

use crate::inventory::{GuardConfig, SyncConfig};
use crate::profile::Rgb;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub saves: SaveConfig,
    #[serde(default)]
    pub inventory: InventoryConfig,
    #[serde(default)]
    pub guard: GuardSettings,
    #[serde(default)]
    pub economy: EconomyConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: String,
    /// Store key is `key_prefix + player id`.
    pub key_prefix: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: "./data".to_string(),
            key_prefix: "Player_".to_string(),
        }
    }
}

impl StorageConfig {
    pub fn db_path(&self) -> std::path::PathBuf {
        std::path::Path::new(&self.data_dir).join("profiles.sled")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SaveConfig {
    pub autosave_interval_secs: u64,
    /// Delay between a change and the save it triggers; later changes fold in.
    pub dirty_save_delay_secs: u64,
    pub exit_save_attempts: u32,
    /// Wait between the exit write and its read-back.
    pub exit_verify_delay_ms: u64,
    pub exit_retry_backoff_ms: u64,
}

impl Default for SaveConfig {
    fn default() -> Self {
        Self {
            autosave_interval_secs: 60,
            dirty_save_delay_secs: 5,
            exit_save_attempts: 3,
            exit_verify_delay_ms: 500,
            exit_retry_backoff_ms: 1000,
        }
    }
}

impl SaveConfig {
    pub fn autosave_interval(&self) -> Duration {
        Duration::seconds(self.autosave_interval_secs as i64)
    }

    pub fn dirty_save_delay(&self) -> Duration {
        Duration::seconds(self.dirty_save_delay_secs as i64)
    }

    pub fn exit_verify_delay(&self) -> Duration {
        Duration::milliseconds(self.exit_verify_delay_ms as i64)
    }

    pub fn exit_retry_backoff(&self) -> Duration {
        Duration::milliseconds(self.exit_retry_backoff_ms as i64)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InventoryConfig {
    pub max_entries_per_field: usize,
    /// Restored world objects cannot be removed (without force) for this long.
    pub protect_grace_secs: u64,
}

impl Default for InventoryConfig {
    fn default() -> Self {
        Self {
            max_entries_per_field: 500,
            protect_grace_secs: 10,
        }
    }
}

impl InventoryConfig {
    pub fn protect_grace(&self) -> Duration {
        Duration::seconds(self.protect_grace_secs as i64)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardSettings {
    pub correlated_window_secs: f64,
    pub large_drop_fraction: f64,
    pub initial_window_secs: f64,
}

impl Default for GuardSettings {
    fn default() -> Self {
        Self {
            correlated_window_secs: 3.0,
            large_drop_fraction: 0.85,
            initial_window_secs: 15.0,
        }
    }
}

fn secs_f64(secs: f64) -> Duration {
    Duration::milliseconds((secs.max(0.0) * 1000.0).round() as i64)
}

impl From<&GuardSettings> for GuardConfig {
    fn from(settings: &GuardSettings) -> Self {
        GuardConfig {
            correlated_window: secs_f64(settings.correlated_window_secs),
            large_drop_fraction: settings.large_drop_fraction,
            initial_window: secs_f64(settings.initial_window_secs),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FactionConfig {
    pub display_name: String,
    pub base_multiplier: f64,
    pub standing_min_mult: f64,
    pub standing_max_mult: f64,
    /// Fraction of the remaining standing gap closed per unit of base value sold.
    pub standing_gain_per_base: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preferred_color: Option<Rgb>,
    pub color_bonus: f64,
}

impl Default for FactionConfig {
    fn default() -> Self {
        Self {
            display_name: "Faction".to_string(),
            base_multiplier: 1.0,
            standing_min_mult: 0.8,
            standing_max_mult: 1.5,
            standing_gain_per_base: 0.00012,
            preferred_color: None,
            color_bonus: 0.25,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EconomyConfig {
    pub factions: BTreeMap<String, FactionConfig>,
}

impl Default for EconomyConfig {
    fn default() -> Self {
        let mut factions = BTreeMap::new();
        factions.insert(
            "gloopers".to_string(),
            FactionConfig {
                display_name: "Gloopers Co-op".to_string(),
                ..FactionConfig::default()
            },
        );
        factions.insert(
            "crystal_guild".to_string(),
            FactionConfig {
                display_name: "Crystal Guild".to_string(),
                base_multiplier: 1.2,
                standing_min_mult: 0.7,
                standing_max_mult: 1.8,
                standing_gain_per_base: 0.00008,
                preferred_color: Some(Rgb::new(120, 200, 255)),
                color_bonus: 0.4,
            },
        );
        Self { factions }
    }
}

impl EconomyConfig {
    /// Case-insensitive faction lookup.
    pub fn faction(&self, name: &str) -> Option<(&str, &FactionConfig)> {
        let wanted = name.trim().to_ascii_lowercase();
        self.factions
            .iter()
            .find(|(key, _)| key.to_ascii_lowercase() == wanted)
            .map(|(key, cfg)| (key.as_str(), cfg))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: Some("slimevault.log".to_string()),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path, e))?;

        let config = Self::from_toml_str(&content)
            .map_err(|e| anyhow!("Failed to load config file {}: {}", path, e))?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(content).map_err(|e| anyhow!("Failed to parse config: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    /// Create a default configuration file
    pub async fn create_default(path: &str) -> Result<()> {
        let config = Config::default();
        let content = toml::to_string_pretty(&config)
            .map_err(|e| anyhow!("Failed to serialize default config: {}", e))?;

        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {}: {}", path, e))?;

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.storage.key_prefix.is_empty() {
            return Err(anyhow!("storage.key_prefix must not be empty"));
        }
        if self.saves.autosave_interval_secs == 0 {
            return Err(anyhow!("saves.autosave_interval_secs must be at least 1"));
        }
        if !(1..=10).contains(&self.saves.exit_save_attempts) {
            return Err(anyhow!("saves.exit_save_attempts must be between 1 and 10"));
        }
        if self.inventory.max_entries_per_field == 0 {
            return Err(anyhow!("inventory.max_entries_per_field must be at least 1"));
        }
        let fraction = self.guard.large_drop_fraction;
        if !(fraction > 0.0 && fraction <= 1.0) {
            return Err(anyhow!("guard.large_drop_fraction must be in (0, 1]"));
        }
        if self.guard.correlated_window_secs < 0.0 || self.guard.initial_window_secs < 0.0 {
            return Err(anyhow!("guard windows must not be negative"));
        }
        for (name, faction) in &self.economy.factions {
            if faction.base_multiplier < 0.0 {
                return Err(anyhow!("economy.factions.{}: base_multiplier < 0", name));
            }
            if faction.standing_min_mult > faction.standing_max_mult {
                return Err(anyhow!(
                    "economy.factions.{}: standing_min_mult exceeds standing_max_mult",
                    name
                ));
            }
            if !(0.0..1.0).contains(&faction.standing_gain_per_base) {
                return Err(anyhow!(
                    "economy.factions.{}: standing_gain_per_base must be in [0, 1)",
                    name
                ));
            }
        }
        Ok(())
    }

    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            max_entries_per_field: self.inventory.max_entries_per_field,
            guard: GuardConfig::from(&self.guard),
        }
    }
}
