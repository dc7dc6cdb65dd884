use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub const PROFILE_SCHEMA_VERSION: u8 = 2;

/// Stable numeric identifier of a player across sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(pub u64);

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for PlayerId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// Identifier of an egg, tool or slime. Unique within one inventory field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(String);

impl ItemId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Fresh random id for newly created world objects.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ItemId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Named inventory arrays persisted per player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum InventoryField {
    EggTools,
    FoodTools,
    CapturedSlimes,
    WorldSlimes,
    WorldEggs,
}

impl InventoryField {
    pub const ALL: [InventoryField; 5] = [
        InventoryField::EggTools,
        InventoryField::FoodTools,
        InventoryField::CapturedSlimes,
        InventoryField::WorldSlimes,
        InventoryField::WorldEggs,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            InventoryField::EggTools => "eggTools",
            InventoryField::FoodTools => "foodTools",
            InventoryField::CapturedSlimes => "capturedSlimes",
            InventoryField::WorldSlimes => "worldSlimes",
            InventoryField::WorldEggs => "worldEggs",
        }
    }

    /// Parse the persisted field name (case-insensitive).
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|field| field.as_str().eq_ignore_ascii_case(name))
    }

    /// Payload kind stored in this field.
    pub fn kind(&self) -> ItemKind {
        match self {
            InventoryField::EggTools | InventoryField::WorldEggs => ItemKind::Egg,
            InventoryField::FoodTools => ItemKind::Food,
            InventoryField::CapturedSlimes | InventoryField::WorldSlimes => ItemKind::Slime,
        }
    }
}

impl fmt::Display for InventoryField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    Egg,
    Food,
    Slime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// 1.0 for identical colors, 0.0 for opposite corners of the RGB cube.
    pub fn similarity(&self, other: &Rgb) -> f64 {
        let dr = self.r as f64 - other.r as f64;
        let dg = self.g as f64 - other.g as f64;
        let db = self.b as f64 - other.b as f64;
        let distance = (dr * dr + dg * dg + db * db).sqrt();
        let max = (3.0f64 * 255.0 * 255.0).sqrt();
        (1.0 - distance / max).clamp(0.0, 1.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EggData {
    pub rarity: String,
    /// Seconds an egg must sit placed in the world before it can hatch.
    pub hatch_secs: u32,
    #[serde(default)]
    pub placed_at: Option<DateTime<Utc>>,
    /// Species of the slime that hatches from this egg.
    #[serde(default)]
    pub species: String,
}

impl EggData {
    pub fn ready_at(&self) -> Option<DateTime<Utc>> {
        self.placed_at
            .map(|placed| placed + chrono::Duration::seconds(self.hatch_secs as i64))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoodData {
    pub food_type: String,
    /// Growth added to a slime per feeding.
    pub potency: f64,
    pub uses_left: u32,
}

/// Upper bound on growth a single feeding can add.
pub const MAX_FOOD_POTENCY: f64 = 10.0;

impl FoodData {
    /// Potency clamped to `0..=MAX_FOOD_POTENCY`; non-finite values count as zero.
    pub fn effective_potency(&self) -> f64 {
        clamp_potency(self.potency)
    }
}

pub fn clamp_potency(potency: f64) -> f64 {
    if potency.is_finite() {
        potency.clamp(0.0, MAX_FOOD_POTENCY)
    } else {
        0.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlimeData {
    pub species: String,
    #[serde(default)]
    pub color: Rgb,
    pub size: f64,
    #[serde(default)]
    pub growth: f64,
    #[serde(default)]
    pub fed_count: u32,
    pub value_base: i64,
    #[serde(default)]
    pub mutation: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ItemPayload {
    Egg(EggData),
    Food(FoodData),
    Slime(SlimeData),
}

impl ItemPayload {
    pub fn kind(&self) -> ItemKind {
        match self {
            ItemPayload::Egg(_) => ItemKind::Egg,
            ItemPayload::Food(_) => ItemKind::Food,
            ItemPayload::Slime(_) => ItemKind::Slime,
        }
    }

    /// Clamp host-supplied numbers that later flows depend on.
    pub fn sanitized(mut self) -> Self {
        if let ItemPayload::Food(food) = &mut self {
            food.potency = clamp_potency(food.potency);
        }
        self
    }
}

/// One egg, tool or slime record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub payload: ItemPayload,
}

impl Item {
    pub fn new(id: impl Into<ItemId>, payload: ItemPayload) -> Self {
        Self {
            id: id.into(),
            payload,
        }
    }

    pub fn egg(&self) -> Option<&EggData> {
        match &self.payload {
            ItemPayload::Egg(egg) => Some(egg),
            _ => None,
        }
    }

    pub fn slime(&self) -> Option<&SlimeData> {
        match &self.payload {
            ItemPayload::Slime(slime) => Some(slime),
            _ => None,
        }
    }

    pub fn slime_mut(&mut self) -> Option<&mut SlimeData> {
        match &mut self.payload {
            ItemPayload::Slime(slime) => Some(slime),
            _ => None,
        }
    }

    pub fn food_mut(&mut self) -> Option<&mut FoodData> {
        match &mut self.payload {
            ItemPayload::Food(food) => Some(food),
            _ => None,
        }
    }
}

impl From<String> for ItemId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CoreData {
    #[serde(default)]
    pub coins: i64,
    /// Faction standing in `0.0..=1.0`.
    #[serde(default)]
    pub standings: BTreeMap<String, f64>,
    /// Cumulative gross value sold per faction.
    #[serde(default)]
    pub lifetime_sales: BTreeMap<String, i64>,
}

/// Authoritative persisted record for one player.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub player_id: PlayerId,
    pub schema_version: u8,
    /// Incremented on every successful save; never decreases.
    pub data_version: u64,
    #[serde(default)]
    pub core: CoreData,
    #[serde(default)]
    pub inventory: BTreeMap<InventoryField, Vec<Item>>,
    #[serde(default)]
    pub meta: BTreeMap<String, serde_json::Value>,
    pub updated_at: DateTime<Utc>,
}

impl Profile {
    pub fn new(player_id: PlayerId) -> Self {
        let mut profile = Self {
            player_id,
            schema_version: PROFILE_SCHEMA_VERSION,
            data_version: 1,
            core: CoreData::default(),
            inventory: BTreeMap::new(),
            meta: BTreeMap::new(),
            updated_at: Utc::now(),
        };
        profile.fill_missing_fields();
        profile
    }

    /// Make sure every known field has an array, even if empty.
    pub fn fill_missing_fields(&mut self) {
        for field in InventoryField::ALL {
            self.inventory.entry(field).or_default();
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn items(&self, field: InventoryField) -> &[Item] {
        self.inventory
            .get(&field)
            .map(|items| items.as_slice())
            .unwrap_or(&[])
    }

    pub fn items_mut(&mut self, field: InventoryField) -> &mut Vec<Item> {
        self.inventory.entry(field).or_default()
    }

    pub fn find_item(&self, field: InventoryField, id: &ItemId) -> Option<&Item> {
        self.items(field).iter().find(|item| &item.id == id)
    }

    /// Remove by id. Removing an unknown id is a no-op that returns `None`.
    pub fn remove_item(&mut self, field: InventoryField, id: &ItemId) -> Option<Item> {
        let items = self.items_mut(field);
        let index = items.iter().position(|item| &item.id == id)?;
        Some(items.remove(index))
    }

    /// Replace the item with the same id, or append it.
    pub fn upsert_item(&mut self, field: InventoryField, item: Item) {
        let items = self.items_mut(field);
        match items.iter_mut().find(|existing| existing.id == item.id) {
            Some(existing) => *existing = item,
            None => items.push(item),
        }
    }

    pub fn standing(&self, faction: &str) -> f64 {
        self.core.standings.get(faction).copied().unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slime(id: &str) -> Item {
        Item::new(
            id,
            ItemPayload::Slime(SlimeData {
                species: "pink".into(),
                color: Rgb::new(255, 120, 200),
                size: 1.0,
                growth: 0.0,
                fed_count: 0,
                value_base: 10,
                mutation: None,
            }),
        )
    }

    #[test]
    fn new_profile_has_defaults() {
        let profile = Profile::new(PlayerId(42));
        assert_eq!(profile.core.coins, 0);
        assert_eq!(profile.data_version, 1);
        assert_eq!(profile.schema_version, PROFILE_SCHEMA_VERSION);
        for field in InventoryField::ALL {
            assert!(profile.items(field).is_empty());
        }
    }

    #[test]
    fn remove_missing_item_is_noop() {
        let mut profile = Profile::new(PlayerId(1));
        profile.upsert_item(InventoryField::WorldSlimes, slime("a"));
        assert!(profile
            .remove_item(InventoryField::WorldSlimes, &ItemId::from("zzz"))
            .is_none());
        assert_eq!(profile.items(InventoryField::WorldSlimes).len(), 1);
        assert!(profile
            .remove_item(InventoryField::WorldSlimes, &ItemId::from("a"))
            .is_some());
        assert!(profile
            .remove_item(InventoryField::WorldSlimes, &ItemId::from("a"))
            .is_none());
    }

    #[test]
    fn upsert_replaces_same_id() {
        let mut profile = Profile::new(PlayerId(1));
        profile.upsert_item(InventoryField::CapturedSlimes, slime("a"));
        let mut bigger = slime("a");
        bigger.slime_mut().expect("slime").size = 2.0;
        profile.upsert_item(InventoryField::CapturedSlimes, bigger);
        let items = profile.items(InventoryField::CapturedSlimes);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].slime().expect("slime").size, 2.0);
    }

    #[test]
    fn field_names_match_persisted_layout() {
        let json = serde_json::to_string(&InventoryField::CapturedSlimes).expect("json");
        assert_eq!(json, "\"capturedSlimes\"");
        assert_eq!(InventoryField::parse("worldeggs"), Some(InventoryField::WorldEggs));
        assert_eq!(InventoryField::parse("hats"), None);
    }

    #[test]
    fn color_similarity_bounds() {
        let red = Rgb::new(255, 0, 0);
        assert!((red.similarity(&red) - 1.0).abs() < 1e-9);
        let black = Rgb::new(0, 0, 0);
        let white = Rgb::new(255, 255, 255);
        assert!(black.similarity(&white).abs() < 1e-9);
    }
}
