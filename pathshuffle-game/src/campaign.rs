//! Campaign stop model shared by the shuffle engine and the host game loop.
use serde::{Deserialize, Serialize};

/// Tags the host attaches to combat actions and items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trait {
    Attack,
    Weapon,
    Unarmed,
    Impulse,
    Consumable,
    Potion,
    Scroll,
    Magical,
}

/// Weapon-only item data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeaponProperties {
    pub damage_die_count: i32,
}

/// A reward item dropped by an encounter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub name: String,
    #[serde(default)]
    pub level: i32,
    #[serde(default)]
    pub traits: Vec<Trait>,
    #[serde(default)]
    pub weapon: Option<WeaponProperties>,
}

impl Item {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            level: 0,
            traits: Vec::new(),
            weapon: None,
        }
    }

    #[must_use]
    pub fn with_traits(mut self, traits: &[Trait]) -> Self {
        self.traits.extend_from_slice(traits);
        self
    }

    #[must_use]
    pub fn with_weapon(mut self, damage_die_count: i32) -> Self {
        if !self.has_trait(Trait::Weapon) {
            self.traits.push(Trait::Weapon);
        }
        self.weapon = Some(WeaponProperties { damage_die_count });
        self
    }

    #[must_use]
    pub fn has_trait(&self, tag: Trait) -> bool {
        self.traits.contains(&tag)
    }
}

/// Immutable description of an encounter as authored in the source campaign.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncounterTemplate {
    pub id: String,
    pub name: String,
    /// Level the source campaign expects the party to be at for this fight.
    pub level: i32,
    #[serde(default)]
    pub reward_gold: i32,
    #[serde(default)]
    pub rewards: Vec<Item>,
}

impl EncounterTemplate {
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>, level: i32) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            level,
            reward_gold: 0,
            rewards: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_rewards(mut self, gold: i32, items: Vec<Item>) -> Self {
        self.reward_gold = gold;
        self.rewards = items;
        self
    }
}

/// Values baked into an encounter when the shuffle engine emits it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncounterOverrides {
    pub level: i32,
    pub gold: i32,
    pub items: Vec<Item>,
}

/// A fully materialized encounter, ready for the host to spawn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Encounter {
    pub id: String,
    pub name: String,
    pub level: i32,
    pub reward_gold: i32,
    pub rewards: Vec<Item>,
}

/// Encounter stop payload: the template plus whatever the engine baked in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncounterStop {
    pub template: EncounterTemplate,
    #[serde(default)]
    pub overrides: Option<EncounterOverrides>,
}

impl EncounterStop {
    #[must_use]
    pub const fn new(template: EncounterTemplate) -> Self {
        Self {
            template,
            overrides: None,
        }
    }

    /// Level the encounter will be spawned at.
    #[must_use]
    pub fn level(&self) -> i32 {
        self.overrides
            .as_ref()
            .map_or(self.template.level, |overrides| overrides.level)
    }

    /// Build the encounter the host spawns when the stop is reached.
    #[must_use]
    pub fn produce(&self) -> Encounter {
        let template = &self.template;
        match &self.overrides {
            Some(overrides) => Encounter {
                id: template.id.clone(),
                name: template.name.clone(),
                level: overrides.level,
                reward_gold: overrides.gold,
                rewards: overrides.items.clone(),
            },
            None => Encounter {
                id: template.id.clone(),
                name: template.name.clone(),
                level: template.level,
                reward_gold: template.reward_gold,
                rewards: template.rewards.clone(),
            },
        }
    }
}

/// Variant payload of a campaign stop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StopKind {
    Narration {
        name: String,
        description: String,
        #[serde(default)]
        voice_line: Option<String>,
    },
    Shop {
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        initial: bool,
        #[serde(default)]
        shop_level: i32,
        #[serde(default)]
        under_the_sea: bool,
    },
    Encounter(EncounterStop),
    LevelUp {
        #[serde(default)]
        text: String,
    },
    RestShort {
        #[serde(default)]
        text: Option<String>,
    },
    RestLong {
        #[serde(default)]
        text: String,
        #[serde(default)]
        wave_of_good: bool,
    },
}

/// One node of the linear campaign.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignStop {
    #[serde(default)]
    pub index: usize,
    #[serde(default)]
    pub opens_chapter: bool,
    #[serde(default)]
    pub spoiler: bool,
    #[serde(flatten)]
    pub kind: StopKind,
}

impl CampaignStop {
    #[must_use]
    pub const fn new(kind: StopKind) -> Self {
        Self {
            index: 0,
            opens_chapter: false,
            spoiler: false,
            kind,
        }
    }

    #[must_use]
    pub fn narration(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(StopKind::Narration {
            name: name.into(),
            description: description.into(),
            voice_line: None,
        })
    }

    #[must_use]
    pub const fn shop(shop_level: i32) -> Self {
        Self::new(StopKind::Shop {
            name: None,
            initial: false,
            shop_level,
            under_the_sea: false,
        })
    }

    #[must_use]
    pub const fn encounter(template: EncounterTemplate) -> Self {
        Self::new(StopKind::Encounter(EncounterStop::new(template)))
    }

    #[must_use]
    pub fn level_up(text: impl Into<String>) -> Self {
        Self::new(StopKind::LevelUp { text: text.into() })
    }

    #[must_use]
    pub const fn rest_short() -> Self {
        Self::new(StopKind::RestShort { text: None })
    }

    #[must_use]
    pub fn rest_long(text: impl Into<String>, wave_of_good: bool) -> Self {
        Self::new(StopKind::RestLong {
            text: text.into(),
            wave_of_good,
        })
    }

    #[must_use]
    pub const fn opening_chapter(mut self) -> Self {
        self.opens_chapter = true;
        self
    }

    #[must_use]
    pub const fn as_encounter(&self) -> Option<&EncounterStop> {
        match &self.kind {
            StopKind::Encounter(encounter) => Some(encounter),
            _ => None,
        }
    }

    #[must_use]
    pub const fn is_encounter(&self) -> bool {
        matches!(self.kind, StopKind::Encounter(_))
    }

    #[must_use]
    pub const fn is_level_up(&self) -> bool {
        matches!(self.kind, StopKind::LevelUp { .. })
    }
}

/// A complete campaign as registered with the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdventurePath {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub starting_level: i32,
    #[serde(default = "AdventurePath::default_shop_level")]
    pub starting_shop_level: i32,
    #[serde(default)]
    pub credits: Option<String>,
    #[serde(default)]
    pub background_music: Option<String>,
    pub stops: Vec<CampaignStop>,
}

impl AdventurePath {
    const fn default_shop_level() -> i32 {
        1
    }

    /// Load a campaign from its JSON description.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON cannot be parsed into a campaign.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Level the party reaches after every level-up stop.
    #[must_use]
    pub fn end_level(&self) -> i32 {
        let level_ups = self.stops.iter().filter(|stop| stop.is_level_up()).count();
        self.starting_level + i32::try_from(level_ups).unwrap_or(i32::MAX)
    }

    #[must_use]
    pub fn encounter_count(&self) -> usize {
        self.stops.iter().filter(|stop| stop.is_encounter()).count()
    }

    /// Encounter stops in campaign order.
    pub fn encounters(&self) -> impl Iterator<Item = &EncounterStop> {
        self.stops.iter().filter_map(CampaignStop::as_encounter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_path() -> AdventurePath {
        AdventurePath {
            id: "golden".into(),
            name: "Golden Quest".into(),
            description: String::new(),
            starting_level: 1,
            starting_shop_level: 1,
            credits: None,
            background_music: None,
            stops: vec![
                CampaignStop::narration("Intro", "It begins."),
                CampaignStop::shop(1),
                CampaignStop::encounter(EncounterTemplate::new("goblins", "Goblins", 1)),
                CampaignStop::level_up("Level 2"),
                CampaignStop::encounter(EncounterTemplate::new("wolves", "Wolves", 2))
                    .opening_chapter(),
                CampaignStop::level_up("Level 3"),
            ],
        }
    }

    #[test]
    fn end_level_counts_level_up_stops() {
        let path = sample_path();
        assert_eq!(path.end_level(), 3);
        assert_eq!(path.encounter_count(), 2);
    }

    #[test]
    fn produce_prefers_overrides() {
        let template = EncounterTemplate::new("ogre", "Ogre", 2)
            .with_rewards(30, vec![Item::new("Healing Potion")]);
        let mut stop = EncounterStop::new(template);
        assert_eq!(stop.produce().reward_gold, 30);
        assert_eq!(stop.level(), 2);

        stop.overrides = Some(EncounterOverrides {
            level: 4,
            gold: 7,
            items: Vec::new(),
        });
        let encounter = stop.produce();
        assert_eq!(encounter.level, 4);
        assert_eq!(encounter.reward_gold, 7);
        assert!(encounter.rewards.is_empty());
        assert_eq!(stop.level(), 4);
    }

    #[test]
    fn path_roundtrips_through_json_with_tagged_stops() {
        let json = r#"{
            "id": "golden",
            "name": "Golden Quest",
            "starting_level": 1,
            "stops": [
                { "kind": "narration", "name": "Intro", "description": "It begins." },
                { "kind": "shop", "initial": true },
                {
                    "kind": "encounter",
                    "opens_chapter": true,
                    "template": {
                        "id": "goblins",
                        "name": "Goblins",
                        "level": 1,
                        "reward_gold": 12,
                        "rewards": [{ "name": "+1 Rapier", "traits": ["weapon"] }]
                    }
                },
                { "kind": "rest_long", "text": "Rest", "wave_of_good": true }
            ]
        }"#;

        let path = AdventurePath::from_json(json).unwrap();
        assert_eq!(path.stops.len(), 4);
        assert_eq!(path.starting_shop_level, 1);
        let encounter = path.stops[2].as_encounter().unwrap();
        assert!(path.stops[2].opens_chapter);
        assert_eq!(encounter.template.reward_gold, 12);
        assert!(encounter.template.rewards[0].has_trait(Trait::Weapon));

        let encoded = serde_json::to_string(&path).unwrap();
        assert_eq!(AdventurePath::from_json(&encoded).unwrap(), path);
    }
}
