//! Remote session boundary and the data exchanged across it.
use super::SyncError;
use crate::campaign::EncounterTemplate;
use crate::constants::{
    CLIENT_VERSION, DEFAULT_BASE_ID_OFFSET, DEFAULT_DEATH_LINK_AMOUNT, GAME_NAME,
    ITEMS_HANDLING_ALL,
};
use crate::policy::{Difficulty, NetworkedOptions};
use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;
use tokio::sync::mpsc::UnboundedReceiver;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginRequest {
    pub game: String,
    pub slot: String,
    pub password: String,
    pub items_handling: u8,
    pub version: (u32, u32, u32),
}

impl LoginRequest {
    #[must_use]
    pub fn new(slot: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            game: GAME_NAME.to_string(),
            slot: slot.into(),
            password: password.into(),
            items_handling: ITEMS_HANDLING_ALL,
            version: CLIENT_VERSION,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoginSuccess {
    pub player_name: String,
    pub slot_data: Map<String, Value>,
}

/// Rejected handshake. The first error is the one shown to the player.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}", .errors.first().map_or("unknown login failure", String::as_str))]
pub struct LoginFailure {
    pub errors: Vec<String>,
}

impl LoginFailure {
    #[must_use]
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            errors: vec![error.into()],
        }
    }
}

/// An item delivered to this slot. `index` is the position in the slot's
/// replayable item history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkItem {
    pub index: usize,
    pub item_id: i64,
    pub location: i64,
    pub sender: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LogMessageKind {
    ItemSend,
    Chat,
    Join,
    Part,
    Other,
}

/// A server log line, already rendered to text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogMessage {
    pub kind: LogMessageKind,
    pub text: String,
}

impl LogMessage {
    #[must_use]
    pub fn new(kind: LogMessageKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
        }
    }

    #[must_use]
    pub const fn is_item_send(&self) -> bool {
        matches!(self.kind, LogMessageKind::ItemSend)
    }
}

impl fmt::Display for LogMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeathLink {
    pub source: String,
    #[serde(default)]
    pub cause: Option<String>,
    #[serde(default)]
    pub time: f64,
}

impl DeathLink {
    #[must_use]
    pub fn new(source: impl Into<String>, cause: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            cause: Some(cause.into()),
            time: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    ItemReceived(NetworkItem),
    Message(LogMessage),
    DeathLink(DeathLink),
}

/// One logged-in connection to the multiworld server.
///
/// Implementations own their transport; the sync client only sees this
/// surface. Location checks must be idempotent on the server side.
#[async_trait]
pub trait RemoteSession: Send + Sync {
    async fn login(&self, request: &LoginRequest) -> Result<LoginSuccess, LoginFailure>;

    /// Name of the player this session is logged in as.
    fn active_player(&self) -> Option<String>;

    /// Hand over the inbound event stream. Only the first call returns it.
    fn take_events(&self) -> Option<UnboundedReceiver<ServerEvent>>;

    /// Every item delivered so far, in server order.
    fn received_items(&self) -> Vec<NetworkItem>;

    async fn complete_location_checks(&self, locations: &[i64]) -> Result<(), SyncError>;

    async fn missing_location_count(&self) -> Result<usize, SyncError>;

    /// Store `default` under `key` unless a value is already present.
    async fn storage_initialize(&self, key: &str, default: Value) -> Result<(), SyncError>;

    async fn storage_get(&self, key: &str) -> Result<Value, SyncError>;

    async fn storage_set(&self, key: &str, value: Value) -> Result<(), SyncError>;

    async fn enable_death_link(&self) -> Result<(), SyncError>;

    async fn send_death_link(&self, link: DeathLink) -> Result<(), SyncError>;

    async fn send_goal_complete(&self) -> Result<(), SyncError>;
}

/// Slot configuration sent with a successful login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotData {
    #[serde(default = "SlotData::default_base_offset")]
    pub base_offset: i64,
    #[serde(default)]
    pub rng_seed: Option<String>,
    #[serde(default = "SlotData::enabled", deserialize_with = "flag")]
    pub encounter_shuffle: bool,
    #[serde(default)]
    pub shuffle_difficulty: Difficulty,
    #[serde(default, deserialize_with = "flag")]
    pub include_free_encounters: bool,
    #[serde(default = "SlotData::enabled", deserialize_with = "flag")]
    pub loot_shuffle: bool,
    #[serde(default, deserialize_with = "flag")]
    pub deathlink: bool,
    #[serde(default)]
    pub dl_amount: Option<u32>,
    #[serde(default = "SlotData::default_start_level")]
    pub start_level: i32,
    #[serde(default)]
    pub end_level: Option<i32>,
    #[serde(default)]
    pub start_atk_bonus: i32,
    #[serde(default)]
    pub num_encounters: Option<usize>,
    #[serde(default)]
    pub version: Option<u32>,
}

impl SlotData {
    const fn default_base_offset() -> i64 {
        DEFAULT_BASE_ID_OFFSET
    }

    const fn default_start_level() -> i32 {
        1
    }

    const fn enabled() -> bool {
        true
    }

    /// # Errors
    ///
    /// Returns an error when a present key has the wrong shape.
    pub fn from_map(map: &Map<String, Value>) -> Result<Self, serde_json::Error> {
        Self::deserialize(Value::Object(map.clone()))
    }

    #[must_use]
    pub fn seed(&self) -> &str {
        self.rng_seed.as_deref().unwrap_or_default()
    }

    /// Transmit every Nth local failure; never below one.
    #[must_use]
    pub fn death_link_amount(&self) -> u32 {
        self.dl_amount.unwrap_or(DEFAULT_DEATH_LINK_AMOUNT).max(1)
    }

    #[must_use]
    pub fn networked_options(&self, free_encounters: &[EncounterTemplate]) -> NetworkedOptions {
        NetworkedOptions {
            shuffle_order: self.encounter_shuffle,
            shuffle_loot: self.loot_shuffle,
            difficulty: self.shuffle_difficulty,
            include_free_encounters: self.include_free_encounters,
            free_encounters: free_encounters.to_vec(),
        }
    }
}

/// Server toggles arrive as bools, 0/1 integers, or strings.
fn flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Bool(bool),
        Int(i64),
        Text(String),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Bool(value) => value,
        Raw::Int(value) => value != 0,
        Raw::Text(value) => matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    #[test]
    fn slot_data_accepts_integer_toggles() {
        let slot = SlotData::from_map(&map(json!({
            "base_offset": 9216,
            "rng_seed": "abc",
            "encounter_shuffle": 1,
            "shuffle_difficulty": 0,
            "include_free_encounters": 0,
            "loot_shuffle": false,
            "deathlink": "true",
            "start_level": 1,
            "end_level": 4,
            "start_atk_bonus": 1,
            "num_encounters": 20,
            "version": 10100
        })))
        .unwrap();
        assert!(slot.encounter_shuffle);
        assert!(!slot.loot_shuffle);
        assert!(slot.deathlink);
        assert_eq!(slot.shuffle_difficulty, Difficulty::Simple);
        assert_eq!(slot.seed(), "abc");
        assert_eq!(slot.death_link_amount(), 1);
        assert_eq!(slot.num_encounters, Some(20));
    }

    #[test]
    fn slot_data_defaults_missing_keys() {
        let slot = SlotData::from_map(&Map::new()).unwrap();
        assert_eq!(slot.base_offset, 0x2400);
        assert!(slot.encounter_shuffle);
        assert!(slot.loot_shuffle);
        assert!(!slot.deathlink);
        assert_eq!(slot.shuffle_difficulty, Difficulty::Balanced);
        assert_eq!(slot.seed(), "");
        assert_eq!(slot.start_level, 1);
    }

    #[test]
    fn slot_data_rejects_malformed_values() {
        assert!(SlotData::from_map(&map(json!({ "start_level": "three" }))).is_err());
    }

    #[test]
    fn login_failure_shows_first_error() {
        let failure = LoginFailure {
            errors: vec!["InvalidSlot".into(), "InvalidPassword".into()],
        };
        assert_eq!(failure.to_string(), "InvalidSlot");
        assert_eq!(LoginFailure { errors: Vec::new() }.to_string(), "unknown login failure");
    }
}
