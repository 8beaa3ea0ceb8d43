use std::fmt;

use indexmap::IndexMap;
use serde::{de, ser, Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use thiserror::Error;

/// Config keys starting with this prefix hold global settings, never items.
pub const RESERVED_PREFIX: &str = "_";

/// Built-in shutdown item. A cloud `off` payload never triggers anything else.
pub const SHUTDOWN_ITEM: &str = "关机";

/// Built-in brightness item seeded on first start.
pub const BRIGHTNESS_ITEM: &str = "设置亮度";

pub const DEFAULT_SERIAL_PORT: &str = "COM3";
pub const DEFAULT_MUSIC_PLATFORM: &str = "酷狗音乐";

pub fn is_reserved_key(key: &str) -> bool {
    key.starts_with(RESERVED_PREFIX)
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ItemNameError {
    #[error("item name cannot be empty")]
    Empty,
    #[error("item name '{0}' must not start with the reserved prefix '_'")]
    Reserved(String),
}

pub fn validate_item_name(name: &str) -> Result<(), ItemNameError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(ItemNameError::Empty);
    }
    if is_reserved_key(trimmed) {
        return Err(ItemNameError::Reserved(trimmed.to_string()));
    }
    Ok(())
}

/// Declared type of an item. Unrecognized values are kept verbatim so the
/// file round-trips, and fail only when dispatched.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ItemKind {
    Exe,
    Adb,
    Music,
    Brightness,
    Unknown(String),
}

impl ItemKind {
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        match trimmed.to_ascii_lowercase().as_str() {
            "exe" => Self::Exe,
            "adb" => Self::Adb,
            "music" => Self::Music,
            "brightness" | "value" | "number" => Self::Brightness,
            _ => Self::Unknown(trimmed.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Exe => "exe",
            Self::Adb => "adb",
            Self::Music => "music",
            Self::Brightness => "brightness",
            Self::Unknown(raw) => raw,
        }
    }

    pub fn known() -> [ItemKind; 4] {
        [Self::Exe, Self::Adb, Self::Music, Self::Brightness]
    }
}

impl From<String> for ItemKind {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl From<ItemKind> for String {
    fn from(value: ItemKind) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    #[serde(rename = "type")]
    pub kind: ItemKind,
    #[serde(rename = "cmd", default)]
    pub command: String,
    #[serde(default)]
    pub uri_scheme: String,
    /// Comma-separated card identifiers.
    #[serde(default)]
    pub card_id: String,
    #[serde(rename = "bafy_topic", default)]
    pub topic: String,
}

impl Item {
    pub fn new(kind: ItemKind, command: impl Into<String>) -> Self {
        Self {
            kind,
            command: command.into(),
            uri_scheme: String::new(),
            card_id: String::new(),
            topic: String::new(),
        }
    }

    pub fn with_uri_scheme(mut self, uri_scheme: impl Into<String>) -> Self {
        self.uri_scheme = uri_scheme.into();
        self
    }

    pub fn with_card_ids(mut self, card_id: impl Into<String>) -> Self {
        self.card_id = card_id.into();
        self
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }

    pub fn card_ids(&self) -> impl Iterator<Item = &str> {
        self.card_id
            .split(',')
            .map(str::trim)
            .filter(|id| !id.is_empty())
    }

    pub fn has_card(&self, card: &str) -> bool {
        self.card_ids().any(|id| id == card)
    }

    pub fn topic(&self) -> Option<&str> {
        let topic = self.topic.trim();
        (!topic.is_empty()).then_some(topic)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    #[serde(rename = "_adb_ip")]
    pub adb_ip: String,
    #[serde(rename = "_serial_port")]
    pub serial_port: String,
    #[serde(rename = "_bafy_uid")]
    pub cloud_uid: String,
    /// Legacy single global topic, subscribed next to the per-item topics.
    #[serde(rename = "_bafy_topic")]
    pub cloud_topic: String,
    #[serde(rename = "_enable_card_reader")]
    pub enable_card_reader: bool,
    #[serde(rename = "_enable_adb_connect")]
    pub enable_adb_connect: bool,
    #[serde(rename = "_music_screen_on")]
    pub music_screen_on: bool,
    #[serde(rename = "_adb_screen_on")]
    pub adb_screen_on: bool,
    #[serde(rename = "_unlock_after_screen_on")]
    pub unlock_after_screen_on: bool,
    #[serde(rename = "_device_password")]
    pub device_password: String,
    #[serde(rename = "_music_platform")]
    pub music_platform: String,
}

impl Settings {
    pub const KEYS: [&'static str; 11] = [
        "_adb_ip",
        "_serial_port",
        "_bafy_uid",
        "_bafy_topic",
        "_enable_card_reader",
        "_enable_adb_connect",
        "_music_screen_on",
        "_adb_screen_on",
        "_unlock_after_screen_on",
        "_device_password",
        "_music_platform",
    ];

    pub fn cloud_topic(&self) -> Option<&str> {
        let topic = self.cloud_topic.trim();
        (!topic.is_empty()).then_some(topic)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            adb_ip: String::new(),
            serial_port: DEFAULT_SERIAL_PORT.into(),
            cloud_uid: String::new(),
            cloud_topic: String::new(),
            enable_card_reader: true,
            enable_adb_connect: true,
            music_screen_on: true,
            adb_screen_on: true,
            unlock_after_screen_on: false,
            device_password: String::new(),
            music_platform: DEFAULT_MUSIC_PLATFORM.into(),
        }
    }
}

/// The whole persisted config: items keyed by name in insertion order, plus
/// the reserved settings namespace.
///
/// Entries that are neither valid items nor known settings are carried along
/// untouched so that saving never drops data the launcher does not understand.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigDocument {
    pub settings: Settings,
    items: IndexMap<String, Item>,
    malformed: IndexMap<String, Value>,
    extra_settings: Map<String, Value>,
    /// Known settings keys whose stored value had the wrong shape. The
    /// default is used in memory and the raw value is written back until the
    /// settings are replaced.
    rejected_settings: Map<String, Value>,
}

impl ConfigDocument {
    pub fn from_map(map: Map<String, Value>) -> Result<Self, serde_json::Error> {
        let mut settings = serde_json::to_value(Settings::default())?;
        let mut items = IndexMap::new();
        let mut malformed = IndexMap::new();
        let mut extra_settings = Map::new();
        let mut rejected_settings = Map::new();

        for (key, value) in map {
            if !is_reserved_key(&key) {
                match serde_json::from_value::<Item>(value.clone()) {
                    Ok(item) => {
                        items.insert(key, item);
                    }
                    Err(_) => {
                        malformed.insert(key, value);
                    }
                }
                continue;
            }
            if !Settings::KEYS.contains(&key.as_str()) {
                extra_settings.insert(key, value);
                continue;
            }

            let mut candidate = settings.clone();
            if let Value::Object(fields) = &mut candidate {
                fields.insert(key.clone(), value.clone());
            }
            if serde_json::from_value::<Settings>(candidate.clone()).is_ok() {
                settings = candidate;
            } else {
                rejected_settings.insert(key, value);
            }
        }

        Ok(Self {
            settings: serde_json::from_value(settings)?,
            items,
            malformed,
            extra_settings,
            rejected_settings,
        })
    }

    pub fn to_map(&self) -> Result<Map<String, Value>, serde_json::Error> {
        let mut map = Map::new();
        for (name, item) in &self.items {
            map.insert(name.clone(), serde_json::to_value(item)?);
        }
        for (name, raw) in &self.malformed {
            map.insert(name.clone(), raw.clone());
        }
        if let Value::Object(settings) = serde_json::to_value(&self.settings)? {
            map.extend(settings);
        }
        map.extend(self.rejected_settings.clone());
        map.extend(self.extra_settings.clone());
        Ok(map)
    }

    /// Replaces the settings and drops any raw values kept for keys that
    /// failed to parse.
    pub fn replace_settings(&mut self, settings: Settings) {
        self.settings = settings;
        self.rejected_settings.clear();
    }

    pub fn rejected_settings(&self) -> impl Iterator<Item = &str> {
        self.rejected_settings.keys().map(String::as_str)
    }

    pub fn items(&self) -> impl Iterator<Item = (&str, &Item)> {
        self.items.iter().map(|(name, item)| (name.as_str(), item))
    }

    pub fn item(&self, name: &str) -> Option<&Item> {
        self.items.get(name)
    }

    pub fn item_count(&self) -> usize {
        self.items.len()
    }

    pub fn malformed_names(&self) -> impl Iterator<Item = &str> {
        self.malformed.keys().map(String::as_str)
    }

    pub fn has_entry(&self, name: &str) -> bool {
        self.items.contains_key(name) || self.malformed.contains_key(name)
    }

    /// Inserts or replaces `name`. When `old_name` names a different existing
    /// entry it is removed first, which is how a rename is expressed.
    pub fn upsert_item(
        &mut self,
        old_name: Option<&str>,
        name: &str,
        item: Item,
    ) -> Result<(), ItemNameError> {
        validate_item_name(name)?;
        let name = name.trim();

        if let Some(old_name) = old_name.map(str::trim).filter(|old| !old.is_empty()) {
            if old_name != name {
                self.remove_item(old_name);
            }
        }

        self.malformed.shift_remove(name);
        self.items.insert(name.to_string(), item);
        Ok(())
    }

    /// Adds `item` only when no entry of that name exists. Returns whether it
    /// was added.
    pub fn seed_item(&mut self, name: &str, item: Item) -> bool {
        if self.has_entry(name) || validate_item_name(name).is_err() {
            return false;
        }
        self.items.insert(name.to_string(), item);
        true
    }

    pub fn remove_item(&mut self, name: &str) -> bool {
        self.items.shift_remove(name).is_some() || self.malformed.shift_remove(name).is_some()
    }
}

impl Serialize for ConfigDocument {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_map()
            .map_err(ser::Error::custom)?
            .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ConfigDocument {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let map = Map::<String, Value>::deserialize(deserializer)?;
        Self::from_map(map).map_err(de::Error::custom)
    }
}

#[cfg(test)]
#[path = "tests/domain_tests.rs"]
mod tests;
