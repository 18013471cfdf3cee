//! Shuffle policies.
//!
//! Offline and networked play differ only in the values plugged into
//! [`ShufflePolicy`]; the engine itself never branches on the mode.
use crate::campaign::{
    AdventurePath, CampaignStop, EncounterOverrides, EncounterTemplate, Item, Trait,
};
use crate::constants::{
    BALANCED_LEVEL_SLACK, NETWORKED_EXPLAINER, NETWORKED_ID_PREFIX, NETWORKED_NAME_PREFIX,
    NETWORKED_SHOP_LEVEL, OFFLINE_EXPLAINER, OFFLINE_ID_PREFIX, OFFLINE_NAME_PREFIX,
    PROLOGUE_TITLE, UNCAPPED_REPLACEMENT_LEVEL,
};
use crate::loot::LootSlice;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::sync::Arc;

pub type StopPredicate = Arc<dyn Fn(&CampaignStop) -> bool + Send + Sync>;
pub type ReplacementPool = Arc<dyn Fn(&[CampaignStop]) -> Vec<EncounterTemplate> + Send + Sync>;
pub type LevelCap = Arc<dyn Fn(i32) -> i32 + Send + Sync>;
pub type LootFilter = Arc<dyn Fn(Vec<Item>) -> Vec<Item> + Send + Sync>;
/// Computes the overrides for a copied encounter from its template, the walk
/// level it was copied at, and its loot slice.
pub type RewardWrapper =
    Arc<dyn Fn(&EncounterTemplate, i32, LootSlice<'_>) -> EncounterOverrides + Send + Sync>;

/// How far above the slot's level a replacement encounter may be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum Difficulty {
    /// Only encounters of the slot's own level.
    Simple,
    /// At most one level above the slot.
    #[default]
    Balanced,
    /// No restriction.
    Difficult,
}

impl Difficulty {
    #[must_use]
    pub const fn from_index(index: i64) -> Option<Self> {
        match index {
            0 => Some(Self::Simple),
            1 => Some(Self::Balanced),
            2 => Some(Self::Difficult),
            _ => None,
        }
    }

    #[must_use]
    pub const fn index(self) -> i64 {
        match self {
            Self::Simple => 0,
            Self::Balanced => 1,
            Self::Difficult => 2,
        }
    }

    #[must_use]
    pub const fn max_level(self, level: i32) -> i32 {
        match self {
            Self::Simple => level,
            Self::Balanced => level + BALANCED_LEVEL_SLACK,
            Self::Difficult => UNCAPPED_REPLACEMENT_LEVEL,
        }
    }
}

impl<'de> Deserialize<'de> for Difficulty {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Index(i64),
            Name(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Index(index) => Ok(Self::from_index(index).unwrap_or_default()),
            Raw::Name(name) => Ok(match name.to_ascii_lowercase().as_str() {
                "simple" => Self::Simple,
                "difficult" => Self::Difficult,
                _ => Self::Balanced,
            }),
        }
    }
}

/// Metadata of the randomized path registered with the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPresentation {
    pub id: String,
    pub name: String,
    pub description: String,
    pub prologue_title: Option<String>,
    pub explainer: String,
    /// Level the party starts the randomized path at.
    pub start_level: i32,
    pub starting_shop_level: i32,
}

/// Switches decoded from the remote slot configuration.
#[derive(Debug, Clone, Default)]
pub struct NetworkedOptions {
    pub shuffle_order: bool,
    pub shuffle_loot: bool,
    pub difficulty: Difficulty,
    pub include_free_encounters: bool,
    /// Encounters outside the campaign that may fill shuffled slots.
    pub free_encounters: Vec<EncounterTemplate>,
}

#[derive(Clone)]
pub struct ShufflePolicy {
    pub eligible_for_replacement: StopPredicate,
    pub replacement_pool: ReplacementPool,
    pub max_replacement_level: LevelCap,
    pub keep_stop: StopPredicate,
    pub filter_loot: LootFilter,
    pub reward_wrapper: RewardWrapper,
    /// Walk level before the first level-up stop.
    pub starting_level: i32,
    pub presentation: PathPresentation,
}

impl fmt::Debug for ShufflePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShufflePolicy")
            .field("starting_level", &self.starting_level)
            .field("presentation", &self.presentation)
            .finish_non_exhaustive()
    }
}

fn campaign_encounters(stops: &[CampaignStop]) -> Vec<EncounterTemplate> {
    stops
        .iter()
        .filter_map(CampaignStop::as_encounter)
        .map(|encounter| encounter.template.clone())
        .collect()
}

fn without_weapons(items: Vec<Item>) -> Vec<Item> {
    items
        .into_iter()
        .filter(|item| !item.has_trait(Trait::Weapon))
        .collect()
}

fn slice_overrides(level: i32, slice: LootSlice<'_>) -> EncounterOverrides {
    EncounterOverrides {
        level,
        gold: slice.gold,
        items: slice.items.to_vec(),
    }
}

impl ShufflePolicy {
    /// Shuffle every encounter, keep every stop, bake the walk level and the
    /// shuffled loot slice into each encounter.
    #[must_use]
    pub fn offline(path: &AdventurePath) -> Self {
        Self {
            eligible_for_replacement: Arc::new(CampaignStop::is_encounter),
            replacement_pool: Arc::new(campaign_encounters),
            max_replacement_level: Arc::new(|level: i32| Difficulty::Balanced.max_level(level)),
            keep_stop: Arc::new(|_: &CampaignStop| true),
            filter_loot: Arc::new(|items: Vec<Item>| items),
            reward_wrapper: Arc::new(|_: &EncounterTemplate, level: i32, slice: LootSlice<'_>| {
                slice_overrides(level, slice)
            }),
            starting_level: path.starting_level,
            presentation: PathPresentation {
                id: format!("{OFFLINE_ID_PREFIX}{}", path.id),
                name: format!("{OFFLINE_NAME_PREFIX}{}", path.name),
                description: format!(
                    "{}, but the encounter order, enemies, and loot are all randomly determined.",
                    path.name
                ),
                prologue_title: Some(PROLOGUE_TITLE.to_string()),
                explainer: OFFLINE_EXPLAINER.to_string(),
                start_level: path.starting_level,
                starting_shop_level: path.starting_shop_level,
            },
        }
    }

    /// Same policy with the walk and the presented path starting at `level`.
    /// Offline runs with mock progression start at the final level so the
    /// staggered placeholder heroes are scaled down by the spawn hook.
    #[must_use]
    pub fn starting_at(mut self, level: i32) -> Self {
        self.starting_level = level;
        self.presentation.start_level = level;
        self
    }

    /// Policy for a run driven by the multiworld server.
    ///
    /// Heroes start at the final level and are levelled down by the spawn
    /// hook, so level-up stops are dropped, encounters are baked at the final
    /// level, and weapons never drop (weapon bonuses arrive as items).
    #[must_use]
    pub fn networked(path: &AdventurePath, options: &NetworkedOptions) -> Self {
        let end_level = path.end_level();
        let shuffle_order = options.shuffle_order;
        let shuffle_loot = options.shuffle_loot;
        let difficulty = options.difficulty;
        let free_encounters = if options.include_free_encounters {
            options.free_encounters.clone()
        } else {
            Vec::new()
        };

        Self {
            eligible_for_replacement: Arc::new(move |stop: &CampaignStop| {
                shuffle_order && stop.is_encounter()
            }),
            replacement_pool: Arc::new(move |stops: &[CampaignStop]| {
                let mut pool = if shuffle_order {
                    campaign_encounters(stops)
                } else {
                    Vec::new()
                };
                pool.extend(free_encounters.iter().cloned());
                pool
            }),
            max_replacement_level: Arc::new(move |level: i32| difficulty.max_level(level)),
            keep_stop: Arc::new(|stop: &CampaignStop| !stop.is_level_up()),
            filter_loot: Arc::new(without_weapons),
            reward_wrapper: Arc::new(
                move |template: &EncounterTemplate, _: i32, slice: LootSlice<'_>| {
                    if shuffle_loot {
                        slice_overrides(end_level, slice)
                    } else {
                        EncounterOverrides {
                            level: end_level,
                            gold: template.reward_gold,
                            items: without_weapons(template.rewards.clone()),
                        }
                    }
                },
            ),
            starting_level: path.starting_level,
            presentation: PathPresentation {
                id: format!("{NETWORKED_ID_PREFIX}{}", path.id),
                name: format!("{NETWORKED_NAME_PREFIX}{}", path.name),
                description: format!(
                    "{}, but the encounter order, enemies, and loot are all randomly determined.",
                    path.name
                ),
                prologue_title: Some(PROLOGUE_TITLE.to_string()),
                explainer: NETWORKED_EXPLAINER.to_string(),
                start_level: end_level,
                starting_shop_level: NETWORKED_SHOP_LEVEL,
            },
        }
    }
}
