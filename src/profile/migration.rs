//! Load-time upgrade of stored profile blobs.
//!
//! Stored records come in two shapes:
//!
//! - **v2** (current): the typed [`Profile`] layout written by this crate.
//! - **v1** (legacy): loosely-typed tables where item records carry their id
//!   under any of `Id`, `id`, `UID`, `uid`, `EggId`, `SlimeId` or `ToolId`,
//!   and scalar fields use whatever casing the writer picked.
//!
//! Migration runs once, when a profile is loaded. Everything downstream works
//! on typed [`Item`]s with a mandatory id. Malformed pieces are replaced by
//! defaults and noted in [`MigrationReport::notes`]; a blob is never rejected
//! outright.

use chrono::{DateTime, TimeZone, Utc};
use log::{info, warn};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};

use crate::profile::types::*;

/// Key priority used to find the identifier of a legacy item record.
pub const LEGACY_ID_KEYS: [&str; 7] = ["Id", "id", "UID", "uid", "EggId", "SlimeId", "ToolId"];

#[derive(Debug, Clone)]
pub struct MigrationReport {
    pub profile: Profile,
    pub from_version: u8,
    pub notes: Vec<String>,
}

impl MigrationReport {
    pub fn migrated(&self) -> bool {
        self.from_version != PROFILE_SCHEMA_VERSION || !self.notes.is_empty()
    }
}

/// Decode a stored blob into a current-schema profile.
pub fn decode_profile(player_id: PlayerId, bytes: &[u8]) -> MigrationReport {
    match serde_json::from_slice::<Value>(bytes) {
        Ok(value) => upgrade_profile(player_id, value),
        Err(e) => {
            warn!(
                "Profile blob for player {} is not valid JSON ({}); using defaults",
                player_id, e
            );
            MigrationReport {
                profile: Profile::new(player_id),
                from_version: 0,
                notes: vec![format!("unparseable blob: {}", e)],
            }
        }
    }
}

/// Upgrade a parsed blob to [`PROFILE_SCHEMA_VERSION`].
pub fn upgrade_profile(player_id: PlayerId, value: Value) -> MigrationReport {
    let from_version = value
        .get("schema_version")
        .and_then(Value::as_u64)
        .map(|v| v.min(u8::MAX as u64) as u8)
        .unwrap_or(1);

    if from_version == PROFILE_SCHEMA_VERSION {
        match serde_json::from_value::<Profile>(value.clone()) {
            Ok(mut profile) => {
                let mut notes = Vec::new();
                if profile.player_id != player_id {
                    notes.push(format!(
                        "stored player id {} did not match key {}",
                        profile.player_id, player_id
                    ));
                    profile.player_id = player_id;
                }
                profile.fill_missing_fields();
                for field in InventoryField::ALL {
                    let dropped = dedupe_by_id(profile.items_mut(field));
                    if dropped > 0 {
                        notes.push(format!("{} duplicate ids dropped from {}", dropped, field));
                    }
                }
                return MigrationReport {
                    profile,
                    from_version,
                    notes,
                };
            }
            Err(e) => {
                warn!(
                    "Typed decode of profile {} failed ({}); falling back to tolerant decode",
                    player_id, e
                );
            }
        }
    }

    let report = migrate_loose(player_id, from_version, &value);
    info!(
        "Migrated profile {} from schema v{} to v{} ({} note(s))",
        player_id,
        from_version,
        PROFILE_SCHEMA_VERSION,
        report.notes.len()
    );
    report
}

fn migrate_loose(player_id: PlayerId, from_version: u8, value: &Value) -> MigrationReport {
    let mut notes = Vec::new();
    let mut profile = Profile::new(player_id);

    let Some(root) = value.as_object() else {
        notes.push("root is not an object".to_string());
        return MigrationReport {
            profile,
            from_version,
            notes,
        };
    };

    profile.data_version = lookup(root, &["data_version", "dataVersion", "DataVersion"])
        .and_then(Value::as_u64)
        .unwrap_or(1)
        .max(1);

    let core = lookup(root, &["core", "Core"]).and_then(Value::as_object);
    let core_or_root = core.unwrap_or(root);

    profile.core.coins = lookup(core_or_root, &["coins", "Coins"])
        .and_then(as_i64_lossy)
        .unwrap_or(0)
        .max(0);

    if let Some(standings) = lookup(core_or_root, &["standings", "Standings"]).and_then(Value::as_object) {
        for (faction, raw) in standings {
            match raw.as_f64() {
                Some(v) => {
                    profile.core.standings.insert(faction.clone(), v.clamp(0.0, 1.0));
                }
                None => notes.push(format!("standing for {} is not a number", faction)),
            }
        }
    }

    if let Some(sales) = lookup(core_or_root, &["lifetime_sales", "LifetimeSales"]).and_then(Value::as_object) {
        for (faction, raw) in sales {
            if let Some(v) = as_i64_lossy(raw) {
                profile.core.lifetime_sales.insert(faction.clone(), v.max(0));
            }
        }
    }

    if let Some(inventory) = lookup(root, &["inventory", "Inventory"]).and_then(Value::as_object) {
        for (name, raw_items) in inventory {
            let Some(field) = InventoryField::parse(name) else {
                notes.push(format!("unknown inventory field '{}' dropped", name));
                continue;
            };
            let Some(array) = raw_items.as_array() else {
                notes.push(format!("inventory field {} is not an array", field));
                continue;
            };
            let items = profile.items_mut(field);
            for raw in array {
                match legacy_item(field, raw) {
                    Some(item) => items.push(item),
                    None => notes.push(format!("malformed record in {} skipped", field)),
                }
            }
            let dropped = dedupe_by_id(items);
            if dropped > 0 {
                notes.push(format!("{} duplicate ids dropped from {}", dropped, field));
            }
        }
    }

    if let Some(meta) = lookup(root, &["meta", "Meta"]).and_then(Value::as_object) {
        profile.meta = meta
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect::<BTreeMap<_, _>>();
    }
    profile
        .meta
        .insert("migrated_from".to_string(), Value::from(from_version));

    MigrationReport {
        profile,
        from_version,
        notes,
    }
}

/// First identifier found in [`LEGACY_ID_KEYS`] order. Numbers are stringified.
pub fn legacy_item_id(record: &Map<String, Value>) -> Option<ItemId> {
    LEGACY_ID_KEYS.iter().find_map(|key| match record.get(*key) {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(ItemId::new(s.trim())),
        Some(Value::Number(n)) => Some(ItemId::new(n.to_string())),
        _ => None,
    })
}

/// Convert one loosely-typed record. Records without an id get a fresh one so
/// they can never collide with an existing item.
pub fn legacy_item(field: InventoryField, raw: &Value) -> Option<Item> {
    let record = raw.as_object()?;

    // Already in the typed layout (e.g. a v2 item inside an otherwise broken blob).
    if record.contains_key("payload") {
        if let Ok(item) = serde_json::from_value::<Item>(raw.clone()) {
            return Some(item);
        }
    }

    let id = legacy_item_id(record).unwrap_or_else(ItemId::generate);
    let payload = match field.kind() {
        ItemKind::Egg => ItemPayload::Egg(EggData {
            rarity: text(record, &["rarity", "Rarity"]).unwrap_or_else(|| "common".to_string()),
            hatch_secs: number(record, &["hatch_secs", "HatchTime", "hatchTime"])
                .map(|v| v.max(0.0) as u32)
                .unwrap_or(60),
            placed_at: number(record, &["placed_at", "PlacedAt", "placedAt"])
                .and_then(|secs| Utc.timestamp_opt(secs as i64, 0).single()),
            species: text(record, &["species", "Species", "Breed"]).unwrap_or_default(),
        }),
        ItemKind::Food => ItemPayload::Food(FoodData {
            food_type: text(record, &["food_type", "FoodType", "Type"])
                .unwrap_or_else(|| "basic".to_string()),
            potency: number(record, &["potency", "Potency", "Restore"])
                .map(clamp_potency)
                .unwrap_or(0.1),
            uses_left: number(record, &["uses_left", "UsesLeft", "Uses"])
                .map(|v| v.max(0.0) as u32)
                .unwrap_or(1),
        }),
        ItemKind::Slime => ItemPayload::Slime(SlimeData {
            species: text(record, &["species", "Species", "Breed"])
                .unwrap_or_else(|| "basic".to_string()),
            color: lookup(record, &["color", "Color"])
                .and_then(legacy_color)
                .unwrap_or_default(),
            size: number(record, &["size", "Size", "Scale"]).unwrap_or(1.0).max(0.0),
            growth: number(record, &["growth", "Growth", "GrowthProgress"]).unwrap_or(0.0),
            fed_count: number(record, &["fed_count", "FedCount"])
                .map(|v| v.max(0.0) as u32)
                .unwrap_or(0),
            value_base: number(record, &["value_base", "ValueBase", "BaseValue", "Value"])
                .map(|v| v.round() as i64)
                .unwrap_or(10),
            mutation: text(record, &["mutation", "Mutation", "MutationType"]),
        }),
    };
    Some(Item { id, payload })
}

/// Accepts `{r,g,b}`, `[r,g,b]` or `"#RRGGBB"`.
fn legacy_color(raw: &Value) -> Option<Rgb> {
    let channel = |v: Option<&Value>| -> Option<u8> {
        v.and_then(Value::as_f64).map(|c| {
            // Legacy writers stored either 0..1 floats or 0..255 bytes.
            let scaled = if c <= 1.0 { c * 255.0 } else { c };
            scaled.round().clamp(0.0, 255.0) as u8
        })
    };
    match raw {
        Value::Object(map) => Some(Rgb::new(
            channel(lookup(map, &["r", "R"]))?,
            channel(lookup(map, &["g", "G"]))?,
            channel(lookup(map, &["b", "B"]))?,
        )),
        Value::Array(parts) if parts.len() == 3 => Some(Rgb::new(
            channel(parts.first())?,
            channel(parts.get(1))?,
            channel(parts.get(2))?,
        )),
        Value::String(hex) => {
            let hex = hex.trim_start_matches('#');
            if hex.len() != 6 {
                return None;
            }
            let byte = |i: usize| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok();
            Some(Rgb::new(byte(0)?, byte(2)?, byte(4)?))
        }
        _ => None,
    }
}

/// Keep the first occurrence of every id. Returns how many were dropped.
pub fn dedupe_by_id(items: &mut Vec<Item>) -> usize {
    let before = items.len();
    let mut seen = HashSet::new();
    items.retain(|item| seen.insert(item.id.clone()));
    before - items.len()
}

fn lookup<'a>(map: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|key| map.get(*key))
}

fn text(map: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    lookup(map, keys).and_then(|v| match v {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn number(map: &Map<String, Value>, keys: &[&str]) -> Option<f64> {
    lookup(map, keys).and_then(|v| match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}

fn as_i64_lossy(v: &Value) -> Option<i64> {
    v.as_i64()
        .or_else(|| v.as_f64().map(|f| f.round() as i64))
        .or_else(|| v.as_str().and_then(|s| s.trim().parse().ok()))
}

/// Timestamp helper used by callers writing `meta` markers.
pub fn meta_timestamp(at: DateTime<Utc>) -> Value {
    Value::from(at.to_rfc3339())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn legacy_id_priority_prefers_id_over_uid() {
        let raw = json!({"UID": "u-1", "Id": "primary", "SlimeId": "s-9"});
        let id = legacy_item_id(raw.as_object().expect("object")).expect("id");
        assert_eq!(id.as_str(), "primary");

        let raw = json!({"EggId": 17});
        let id = legacy_item_id(raw.as_object().expect("object")).expect("id");
        assert_eq!(id.as_str(), "17");
    }

    #[test]
    fn legacy_record_without_id_gets_fresh_id() {
        let a = legacy_item(InventoryField::WorldEggs, &json!({"Rarity": "rare"})).expect("item");
        let b = legacy_item(InventoryField::WorldEggs, &json!({"Rarity": "rare"})).expect("item");
        assert_ne!(a.id, b.id);
        assert_eq!(a.egg().expect("egg").rarity, "rare");
    }

    #[test]
    fn legacy_profile_upgrades_and_dedupes() {
        let blob = json!({
            "Coins": 250,
            "DataVersion": 12,
            "Standings": {"Gloopers": 0.4, "Bad": "x"},
            "Inventory": {
                "worldEggs": [{"Id": "A", "HatchTime": 30}, {"id": "A"}, {"UID": "B"}],
                "capturedSlimes": [{"SlimeId": "S1", "Color": "#FF0000", "Value": 25, "Size": 1.5}],
                "hats": [{"Id": "H"}]
            }
        });
        let report = upgrade_profile(PlayerId(9), blob);
        let profile = report.profile;
        assert_eq!(report.from_version, 1);
        assert_eq!(profile.schema_version, PROFILE_SCHEMA_VERSION);
        assert_eq!(profile.data_version, 12);
        assert_eq!(profile.core.coins, 250);
        assert_eq!(profile.standing("Gloopers"), 0.4);
        let eggs: Vec<_> = profile
            .items(InventoryField::WorldEggs)
            .iter()
            .map(|i| i.id.as_str().to_string())
            .collect();
        assert_eq!(eggs, vec!["A", "B"]);
        let slime = profile.items(InventoryField::CapturedSlimes)[0]
            .slime()
            .expect("slime")
            .clone();
        assert_eq!(slime.color, Rgb::new(255, 0, 0));
        assert_eq!(slime.value_base, 25);
        assert!(report.notes.iter().any(|n| n.contains("hats")));
        assert!(report.notes.iter().any(|n| n.contains("duplicate")));
    }

    #[test]
    fn current_profile_round_trips_without_notes() {
        let mut profile = Profile::new(PlayerId(3));
        profile.core.coins = 5;
        profile.data_version = 4;
        let bytes = serde_json::to_vec(&profile).expect("json");
        let report = decode_profile(PlayerId(3), &bytes);
        assert!(!report.migrated());
        assert_eq!(report.profile.core.coins, 5);
        assert_eq!(report.profile.data_version, 4);
    }

    #[test]
    fn garbage_blob_degrades_to_defaults() {
        let report = decode_profile(PlayerId(3), b"{not json");
        assert_eq!(report.profile.core.coins, 0);
        assert_eq!(report.from_version, 0);
        assert!(report.migrated());
    }
}
