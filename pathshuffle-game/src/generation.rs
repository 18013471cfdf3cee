//! Slot generation for the multiworld server.
//!
//! Builds what the server hands one player: the progression item pool, the
//! goal item locked on the last battle, and the slot configuration the sync
//! client decodes at login.
use crate::campaign::AdventurePath;
use crate::catalog::{GAME_COMPLETE_LOCAL_ID, location_name};
use crate::constants::{DEFAULT_BASE_ID_OFFSET, SLOT_DATA_VERSION};
use crate::policy::Difficulty;
use crate::progression::{HeroId, ItemKind, ProgressionItem};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::iter::repeat_n;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GenerationError {
    #[error("campaign {0:?} has no battle to lock the goal on")]
    NoEncounters(String),
    #[error("campaign {name:?} ends at level {end}, below its start {start}")]
    LevelsReversed { name: String, start: i32, end: i32 },
    #[error("campaign {name:?} ends with attack bonus {end}, below its start {start}")]
    AttackBonusReversed { name: String, start: i32, end: i32 },
}

/// Progression span of one campaign.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignProfile {
    pub name: String,
    pub num_encounters: usize,
    pub start_level: i32,
    pub end_level: i32,
    /// Progressive weapon bonuses held at the start (none, +1, striking, +2 ...).
    pub start_atk_bonus: i32,
    pub end_atk_bonus: i32,
}

impl CampaignProfile {
    #[must_use]
    pub fn golden_candelabra() -> Self {
        Self {
            name: "The Quest for the Golden Candelabra".to_string(),
            num_encounters: 21,
            start_level: 1,
            end_level: 4,
            start_atk_bonus: 0,
            end_atk_bonus: 2,
        }
    }

    /// Encounter count and level span read off `path`; weapon bonuses are
    /// not visible in the stops and must be given.
    #[must_use]
    pub fn from_path(path: &AdventurePath, start_atk_bonus: i32, end_atk_bonus: i32) -> Self {
        Self {
            name: path.name.clone(),
            num_encounters: path.encounter_count(),
            start_level: path.starting_level,
            end_level: path.end_level(),
            start_atk_bonus,
            end_atk_bonus,
        }
    }

    fn validate(&self) -> Result<(), GenerationError> {
        if self.num_encounters == 0 {
            return Err(GenerationError::NoEncounters(self.name.clone()));
        }
        if self.end_level < self.start_level {
            return Err(GenerationError::LevelsReversed {
                name: self.name.clone(),
                start: self.start_level,
                end: self.end_level,
            });
        }
        if self.end_atk_bonus < self.start_atk_bonus {
            return Err(GenerationError::AttackBonusReversed {
                name: self.name.clone(),
                start: self.start_atk_bonus,
                end: self.end_atk_bonus,
            });
        }
        Ok(())
    }

    /// Drops each hero receives, level-ups first.
    #[must_use]
    pub fn per_hero_drops(&self) -> Vec<ItemKind> {
        let level_ups = usize::try_from(self.end_level - self.start_level).unwrap_or_default();
        let upgrades =
            usize::try_from(self.end_atk_bonus - self.start_atk_bonus).unwrap_or_default();
        repeat_n(ItemKind::LevelUp, level_ups)
            .chain(repeat_n(ItemKind::WeaponImprovement, upgrades))
            .collect()
    }

    /// Every per-hero drop expanded over the party.
    #[must_use]
    pub fn item_pool(&self) -> Vec<ProgressionItem> {
        self.per_hero_drops()
            .into_iter()
            .flat_map(|kind| HeroId::ALL.map(|hero| ProgressionItem { hero, kind }))
            .collect()
    }

    #[must_use]
    pub fn metadata(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("start_level".into(), json!(self.start_level));
        map.insert("end_level".into(), json!(self.end_level));
        map.insert("start_atk_bonus".into(), json!(self.start_atk_bonus));
        map.insert("num_encounters".into(), json!(self.num_encounters));
        map
    }
}

/// Player-chosen settings for one slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationOptions {
    pub encounter_shuffle: bool,
    pub shuffle_difficulty: Difficulty,
    pub include_free_encounters: bool,
    pub loot_shuffle: bool,
    pub deathlink: bool,
    /// Send every Nth local failure. Left out of the slot data when unset.
    pub dl_amount: Option<u32>,
    /// Empty leaves the client to pick its own seed.
    pub rng_seed: String,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            encounter_shuffle: true,
            shuffle_difficulty: Difficulty::Balanced,
            include_free_encounters: false,
            loot_shuffle: true,
            deathlink: false,
            dl_amount: None,
            rng_seed: String::new(),
        }
    }
}

impl GenerationOptions {
    /// Toggles go out as 0/1, the way the server encodes them.
    #[must_use]
    pub fn slot_data(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("encounter_shuffle".into(), json!(u8::from(self.encounter_shuffle)));
        map.insert("shuffle_difficulty".into(), json!(self.shuffle_difficulty.index()));
        map.insert(
            "include_free_encounters".into(),
            json!(u8::from(self.include_free_encounters)),
        );
        map.insert("loot_shuffle".into(), json!(u8::from(self.loot_shuffle)));
        map.insert("deathlink".into(), json!(u8::from(self.deathlink)));
        map.insert("rng_seed".into(), json!(self.rng_seed));
        if let Some(amount) = self.dl_amount {
            map.insert("dl_amount".into(), json!(amount));
        }
        map
    }
}

/// Everything the server needs to host one player.
#[derive(Debug, Clone, PartialEq)]
pub struct SlotPlan {
    pub slot_data: Map<String, Value>,
    /// Items shuffled into the multiworld.
    pub item_pool: Vec<ProgressionItem>,
    pub location_count: usize,
    /// Local id of the last battle; it always holds the goal item.
    pub goal_location: i64,
    pub goal_item: i64,
}

impl SlotPlan {
    /// # Errors
    ///
    /// Returns an error when the campaign has no battles or a span runs
    /// backwards.
    pub fn generate(
        profile: &CampaignProfile,
        options: &GenerationOptions,
    ) -> Result<Self, GenerationError> {
        profile.validate()?;
        let mut slot_data = options.slot_data();
        slot_data.extend(profile.metadata());
        slot_data.insert("base_offset".into(), json!(DEFAULT_BASE_ID_OFFSET));
        slot_data.insert("version".into(), json!(SLOT_DATA_VERSION));

        let item_pool = profile.item_pool();
        let goal_location = i64::try_from(profile.num_encounters).unwrap_or(i64::MAX) - 1;
        log::info!(
            "generated slot for {}: {} items over {} battles, goal on {}",
            profile.name,
            item_pool.len(),
            profile.num_encounters,
            location_name(goal_location)
        );
        Ok(Self {
            slot_data,
            item_pool,
            location_count: profile.num_encounters,
            goal_location,
            goal_item: GAME_COMPLETE_LOCAL_ID,
        })
    }

    #[must_use]
    pub fn item_ids(&self) -> Vec<i64> {
        self.item_pool.iter().map(|item| item.local_id()).collect()
    }

    #[must_use]
    pub fn location_names(&self) -> Vec<String> {
        (0..i64::try_from(self.location_count).unwrap_or_default())
            .map(location_name)
            .collect()
    }
}
