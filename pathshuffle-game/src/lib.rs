//! Pathshuffle Game Engine
//!
//! Campaign shuffle engine and remote progression sync client for a
//! cooperative tactical-campaign randomizer. The host game supplies the source
//! campaign and spawns heroes; this crate decides what the campaign looks like
//! and what the heroes' stats are.

pub mod campaign;
pub mod catalog;
pub mod config;
pub mod constants;
pub mod generation;
pub mod loot;
pub mod orchestrator;
pub mod policy;
pub mod progression;
pub mod shuffle;
pub mod sync;

// Re-export commonly used types
pub use campaign::{
    AdventurePath, CampaignStop, Encounter, EncounterOverrides, EncounterStop, EncounterTemplate,
    Item, StopKind, Trait, WeaponProperties,
};
pub use catalog::{IdSpace, item_name, location_id, location_name};
pub use config::{ConfigError, ConnectionInfo, RandomizerConfig};
pub use generation::{CampaignProfile, GenerationError, GenerationOptions, SlotPlan};
pub use loot::{LootError, LootPool, LootSlice};
pub use orchestrator::{HeroHooks, PlayMode, Randomizer, RandomizerError};
pub use policy::{Difficulty, NetworkedOptions, PathPresentation, ShufflePolicy};
pub use progression::{
    Bonus, CombatAction, HERO_COUNT, HeroId, HeroProgression, HeroRoster, ItemKind,
    ProgressionError, ProgressionItem,
};
pub use shuffle::{ShuffleError, ShuffledCampaign, Substitution, seeded_rng, shuffle, shuffle_path};
pub use sync::memory::MemorySession;
#[cfg(feature = "websocket")]
pub use sync::websocket::ArchipelagoSession;
pub use sync::{
    ConnectionStatus, DeathLink, LogMessage, LogMessageKind, NetworkItem, RemoteSession, SlotData,
    SyncClient, SyncError, SyncOptions,
};

/// Trait for abstracting campaign data loading.
/// Hosts and tools provide the source campaign and settings through this.
pub trait CampaignLoader {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Load the campaign to randomize.
    ///
    /// # Errors
    ///
    /// Returns an error if the campaign cannot be loaded.
    fn load_campaign(&self) -> Result<AdventurePath, Self::Error>;

    /// Encounters outside the campaign that networked shuffles may use.
    ///
    /// # Errors
    ///
    /// Returns an error if the encounter catalog cannot be loaded.
    fn load_free_encounters(&self) -> Result<Vec<EncounterTemplate>, Self::Error> {
        Ok(Vec::new())
    }

    /// Load the randomizer settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the settings cannot be loaded or parsed.
    fn load_config(&self) -> Result<RandomizerConfig, Self::Error>;
}

/// Build a [`Randomizer`] from everything a loader provides.
///
/// # Errors
///
/// Returns an error if loading fails, the settings are invalid, or the sync
/// runtime cannot start.
pub fn build_randomizer<L>(loader: &L) -> Result<Randomizer, anyhow::Error>
where
    L: CampaignLoader,
{
    let campaign = loader.load_campaign()?;
    let config = loader.load_config()?;
    let free_encounters = loader.load_free_encounters()?;
    Ok(Randomizer::new(campaign, config)?.with_free_encounters(free_encounters))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;

    #[derive(Clone, Copy, Default)]
    struct FixtureLoader;

    impl CampaignLoader for FixtureLoader {
        type Error = Infallible;

        fn load_campaign(&self) -> Result<AdventurePath, Self::Error> {
            Ok(AdventurePath {
                id: "fixture".into(),
                name: "Fixture".into(),
                description: String::new(),
                starting_level: 1,
                starting_shop_level: 1,
                credits: None,
                background_music: None,
                stops: vec![
                    CampaignStop::narration("Intro", "Once upon a time."),
                    CampaignStop::shop(1),
                    CampaignStop::encounter(EncounterTemplate::new("a", "A", 1)),
                    CampaignStop::encounter(EncounterTemplate::new("b", "B", 1)),
                ],
            })
        }

        fn load_config(&self) -> Result<RandomizerConfig, Self::Error> {
            Ok(RandomizerConfig {
                offline_seed: "fixture".into(),
                ..RandomizerConfig::default()
            })
        }
    }

    #[test]
    fn loader_builds_an_offline_randomizer() {
        let mut randomizer = build_randomizer(&FixtureLoader).unwrap();
        assert_eq!(randomizer.load(None).unwrap(), PlayMode::Offline);
        let path = randomizer.offline_path().unwrap();
        assert_eq!(path.id, "Random_fixture");
        assert_eq!(path.encounter_count(), 2);
        assert!(randomizer.networked_path().is_none());
    }
}
