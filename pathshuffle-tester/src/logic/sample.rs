//! Campaign sources for the tester: generated campaigns and JSON files.
use pathshuffle_game::{
    AdventurePath, CampaignLoader, CampaignStop, ConfigError, EncounterTemplate, Item,
    RandomizerConfig, Trait,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use std::path::{Path, PathBuf};
use thiserror::Error;

const ENCOUNTERS_PER_CHAPTER: usize = 3;
const FREE_ENCOUNTERS: usize = 4;

const LOOT_TABLE: &[(&str, &[Trait])] = &[
    ("Minor Healing Potion", &[Trait::Consumable, Trait::Potion]),
    ("Scroll of Fear", &[Trait::Consumable, Trait::Scroll, Trait::Magical]),
    ("Lesser Elixir of Life", &[Trait::Consumable, Trait::Potion]),
    ("Rope", &[]),
    ("Holy Water", &[Trait::Consumable, Trait::Magical]),
];

const WEAPONS: &[&str] = &["Longsword", "Rapier", "Warhammer", "Shortbow"];

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid campaign: {0}")]
    Campaign(#[from] serde_json::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Campaign generated from a seed: chapters of three encounters separated by
/// rests and level-ups, with random gold and loot.
#[derive(Debug, Clone)]
pub struct SampleCampaign {
    pub encounters: usize,
    pub seed: String,
}

impl SampleCampaign {
    #[must_use]
    pub fn new(encounters: usize, seed: impl Into<String>) -> Self {
        Self {
            encounters,
            seed: seed.into(),
        }
    }

    fn rng(&self, stream: u64) -> ChaCha20Rng {
        let mut rng = pathshuffle_game::seeded_rng(&self.seed);
        rng.set_stream(stream);
        rng
    }

    #[must_use]
    pub fn generate(&self) -> AdventurePath {
        let mut rng = self.rng(0);
        let mut stops = vec![
            CampaignStop::narration("Prologue", "Four heroes answer the call."),
            CampaignStop::shop(1),
        ];
        let mut level = 1;
        for index in 0..self.encounters {
            if index > 0 && index % ENCOUNTERS_PER_CHAPTER == 0 {
                stops.push(CampaignStop::rest_long("Camp", rng.gen_bool(0.3)));
                stops.push(CampaignStop::level_up(format!("Level {}", level + 1)).opening_chapter());
                level += 1;
            } else if index > 0 && rng.gen_bool(0.25) {
                stops.push(CampaignStop::rest_short());
            }
            stops.push(CampaignStop::encounter(random_encounter(
                &mut rng,
                format!("battle-{index}"),
                level,
            )));
        }
        stops.push(CampaignStop::narration("Epilogue", "The candelabra is found."));

        AdventurePath {
            id: "sample".into(),
            name: "Sample Campaign".into(),
            description: "A generated campaign.".into(),
            starting_level: 1,
            starting_shop_level: 1,
            credits: Some("Generated by pathshuffle-tester".into()),
            background_music: None,
            stops,
        }
    }

    /// Wandering encounters from outside the campaign.
    #[must_use]
    pub fn free_encounters(&self) -> Vec<EncounterTemplate> {
        let mut rng = self.rng(1);
        let top_level = 1 + i32::try_from(self.encounters / ENCOUNTERS_PER_CHAPTER).unwrap_or(1);
        (0..FREE_ENCOUNTERS)
            .map(|index| {
                let level = rng.gen_range(1..=top_level);
                random_encounter(&mut rng, format!("wanderer-{index}"), level)
            })
            .collect()
    }
}

fn random_encounter(rng: &mut ChaCha20Rng, id: String, level: i32) -> EncounterTemplate {
    let gold = rng.gen_range(5..=20) * level;
    let mut items = Vec::new();
    for _ in 0..rng.gen_range(0..=2) {
        let (name, traits) = LOOT_TABLE[rng.gen_range(0..LOOT_TABLE.len())];
        items.push(Item::new(name).with_traits(traits));
    }
    if rng.gen_bool(0.2) {
        let name = WEAPONS[rng.gen_range(0..WEAPONS.len())];
        items.push(Item::new(format!("+1 {name}")).with_weapon(rng.gen_range(1..=2)));
    }
    let name = format!("Battle {}", id.trim_start_matches("battle-"));
    EncounterTemplate::new(id, name, level).with_rewards(gold, items)
}

impl CampaignLoader for SampleCampaign {
    type Error = LoadError;

    fn load_campaign(&self) -> Result<AdventurePath, Self::Error> {
        Ok(self.generate())
    }

    fn load_free_encounters(&self) -> Result<Vec<EncounterTemplate>, Self::Error> {
        Ok(self.free_encounters())
    }

    fn load_config(&self) -> Result<RandomizerConfig, Self::Error> {
        Ok(RandomizerConfig {
            offline_seed: self.seed.clone(),
            ..RandomizerConfig::default()
        })
    }
}

/// Campaign and optional settings read from JSON files.
#[derive(Debug, Clone)]
pub struct FileLoader {
    pub campaign: PathBuf,
    pub config: Option<PathBuf>,
    pub seed: String,
}

fn read(path: &Path) -> Result<String, LoadError> {
    std::fs::read_to_string(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })
}

impl CampaignLoader for FileLoader {
    type Error = LoadError;

    fn load_campaign(&self) -> Result<AdventurePath, Self::Error> {
        Ok(AdventurePath::from_json(&read(&self.campaign)?)?)
    }

    fn load_config(&self) -> Result<RandomizerConfig, Self::Error> {
        let mut config = match &self.config {
            Some(path) => RandomizerConfig::from_json(&read(path)?)?,
            None => RandomizerConfig::default(),
        };
        if config.offline_seed.is_empty() {
            config.offline_seed.clone_from(&self.seed);
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_campaign_is_seed_stable() {
        let first = SampleCampaign::new(12, "abc").generate();
        let second = SampleCampaign::new(12, "abc").generate();
        assert_eq!(first, second);
        assert_eq!(first.encounter_count(), 12);
        assert_eq!(first.end_level(), 4);
        assert!(matches!(
            first.stops[0].kind,
            pathshuffle_game::StopKind::Narration { .. }
        ));
    }

    #[test]
    fn encounter_levels_follow_chapters() {
        let path = SampleCampaign::new(9, "levels").generate();
        let levels: Vec<i32> = path.encounters().map(|encounter| encounter.level()).collect();
        assert_eq!(levels, vec![1, 1, 1, 2, 2, 2, 3, 3, 3]);
    }

    #[test]
    fn free_encounters_stay_in_range() {
        let sample = SampleCampaign::new(6, "free");
        let free = sample.free_encounters();
        assert_eq!(free.len(), FREE_ENCOUNTERS);
        assert!(free.iter().all(|template| (1..=3).contains(&template.level)));
    }

    #[test]
    fn file_loader_reports_missing_files() {
        let loader = FileLoader {
            campaign: PathBuf::from("/nonexistent/campaign.json"),
            config: None,
            seed: "abc".into(),
        };
        assert!(matches!(loader.load_campaign(), Err(LoadError::Io { .. })));
        assert_eq!(loader.load_config().unwrap().offline_seed, "abc");
    }

    #[test]
    fn file_loader_reads_campaign_json() {
        let path = std::env::temp_dir().join(format!(
            "pathshuffle-campaign-{}.json",
            std::process::id()
        ));
        let campaign = SampleCampaign::new(3, "file").generate();
        std::fs::write(&path, serde_json::to_string(&campaign).unwrap()).unwrap();
        let loader = FileLoader {
            campaign: path,
            config: None,
            seed: "file".into(),
        };
        assert_eq!(loader.load_campaign().unwrap(), campaign);
    }
}
