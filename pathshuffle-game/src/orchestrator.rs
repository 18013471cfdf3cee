//! Composition root: picks offline or networked play, owns the randomized
//! path, the hero roster, and the sync client, and hands the host the hooks
//! it attaches to each hero.
use crate::campaign::{AdventurePath, EncounterTemplate, Item};
use crate::config::{ConfigError, RandomizerConfig};
use crate::policy::ShufflePolicy;
use crate::progression::{Bonus, CombatAction, HeroId, HeroRoster, ProgressionError};
use crate::shuffle::{ShuffleError, shuffle_path};
use crate::sync::{RemoteSession, SyncClient, SyncError, SyncOptions};
use std::sync::Arc;
use thiserror::Error;
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::task::JoinHandle;

#[derive(Debug, Error)]
pub enum RandomizerError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Shuffle(#[from] ShuffleError),
    #[error(transparent)]
    Sync(#[from] SyncError),
    #[error(transparent)]
    Progression(#[from] ProgressionError),
    #[error("failed to start the sync runtime: {0}")]
    Runtime(#[from] std::io::Error),
    #[error("no connection configured")]
    NoConnection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlayMode {
    Offline,
    Networked,
}

/// Owns everything one randomizer run needs.
///
/// Holds its own multi-threaded runtime for network work, so it must be
/// created and dropped outside any async context.
pub struct Randomizer {
    runtime: Runtime,
    config: RandomizerConfig,
    source: AdventurePath,
    free_encounters: Vec<EncounterTemplate>,
    roster: Arc<HeroRoster>,
    client: Option<Arc<SyncClient>>,
    offline_path: Option<AdventurePath>,
    networked_path: Option<AdventurePath>,
    active_path: Option<String>,
}

impl std::fmt::Debug for Randomizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Randomizer")
            .field("source", &self.source.id)
            .field("offline_path", &self.offline_path.as_ref().map(|path| &path.id))
            .field("networked_path", &self.networked_path.as_ref().map(|path| &path.id))
            .field("active_path", &self.active_path)
            .field("client", &self.client)
            .finish_non_exhaustive()
    }
}

impl Randomizer {
    /// # Errors
    ///
    /// Returns an error when the config is invalid or the runtime cannot
    /// start.
    pub fn new(source: AdventurePath, config: RandomizerConfig) -> Result<Self, RandomizerError> {
        config.validate()?;
        let runtime = Builder::new_multi_thread()
            .thread_name("pathshuffle-sync")
            .enable_all()
            .build()?;
        let roster = if config.mock_progression {
            HeroRoster::mock()
        } else {
            HeroRoster::default()
        };
        Ok(Self {
            runtime,
            config,
            source,
            free_encounters: Vec::new(),
            roster: Arc::new(roster),
            client: None,
            offline_path: None,
            networked_path: None,
            active_path: None,
        })
    }

    /// Encounters outside the campaign that networked shuffles may draw.
    #[must_use]
    pub fn with_free_encounters(mut self, free_encounters: Vec<EncounterTemplate>) -> Self {
        self.free_encounters = free_encounters;
        self
    }

    #[must_use]
    pub fn runtime(&self) -> Handle {
        self.runtime.handle().clone()
    }

    #[must_use]
    pub const fn roster(&self) -> &Arc<HeroRoster> {
        &self.roster
    }

    #[must_use]
    pub fn client(&self) -> Option<&Arc<SyncClient>> {
        self.client.as_ref()
    }

    /// Startup decision: try the configured server once (with its single
    /// retry) when a session is supplied, otherwise or on failure register
    /// the offline path.
    ///
    /// # Errors
    ///
    /// Only shuffle failures are returned; a failed connect falls back to
    /// offline play.
    pub fn load(
        &mut self,
        session: Option<Arc<dyn RemoteSession>>,
    ) -> Result<PlayMode, RandomizerError> {
        if let Some(session) = session {
            match self.connect(session) {
                Ok(_) => {
                    log::info!("starting in networked mode");
                    return Ok(PlayMode::Networked);
                }
                Err(RandomizerError::Shuffle(err)) => return Err(err.into()),
                Err(err) => log::warn!("falling back to offline mode: {err}"),
            }
        }
        self.start_offline()?;
        log::info!("starting in offline mode");
        Ok(PlayMode::Offline)
    }

    /// Register an offline randomized path built from the configured seed.
    ///
    /// # Errors
    ///
    /// Returns an error when the offline policy starves the draw.
    pub fn start_offline(&mut self) -> Result<&AdventurePath, RandomizerError> {
        let mut policy = ShufflePolicy::offline(&self.source);
        if self.config.mock_progression {
            policy = policy.starting_at(self.source.end_level());
        }
        let path = shuffle_path(&self.source, &policy, &self.config.offline_seed)?;
        if self.config.mock_progression {
            self.roster.reset_mock();
        }
        Ok(self.offline_path.insert(path))
    }

    /// Connect to the configured server through `session` and replace any
    /// registered randomized path with a networked one.
    ///
    /// # Errors
    ///
    /// Returns an error when no connection is configured, the connect fails,
    /// or the networked policy starves the draw.
    pub fn connect(
        &mut self,
        session: Arc<dyn RemoteSession>,
    ) -> Result<&AdventurePath, RandomizerError> {
        let connection = self
            .config
            .connection
            .clone()
            .ok_or(RandomizerError::NoConnection)?;
        let options = SyncOptions {
            max_inflight_item_applies: self.config.max_inflight_item_applies,
            free_encounters: self.free_encounters.clone(),
        };
        let client = SyncClient::new(
            session,
            connection,
            Arc::clone(&self.roster),
            self.runtime(),
            options,
        );
        self.runtime.block_on(client.connect())?;
        self.client = Some(client);
        self.swap_to_networked_path()
    }

    /// Drop every registered randomized path and register a fresh networked
    /// one from the connected client's slot configuration.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotConnected`] without a connected client, or the
    /// shuffle error when the networked policy starves the draw.
    pub fn swap_to_networked_path(&mut self) -> Result<&AdventurePath, RandomizerError> {
        let client = self.client.as_ref().ok_or(SyncError::NotConnected)?;
        let options = client.networked_options().ok_or(SyncError::NotConnected)?;
        let seed = client.seed().unwrap_or_default().to_string();

        for stale in [self.offline_path.take(), self.networked_path.take()]
            .into_iter()
            .flatten()
        {
            log::info!("unregistering randomized path {}", stale.id);
            if self.active_path.as_deref() == Some(stale.id.as_str()) {
                self.active_path = None;
            }
        }

        let policy = ShufflePolicy::networked(&self.source, &options);
        let path = shuffle_path(&self.source, &policy, &seed)?;
        log::info!("registered networked path {} with seed {seed:?}", path.id);
        Ok(self.networked_path.insert(path))
    }

    /// Randomized paths currently offered to the host.
    #[must_use]
    pub fn registered_paths(&self) -> Vec<&AdventurePath> {
        self.offline_path
            .iter()
            .chain(self.networked_path.iter())
            .collect()
    }

    #[must_use]
    pub const fn offline_path(&self) -> Option<&AdventurePath> {
        self.offline_path.as_ref()
    }

    #[must_use]
    pub const fn networked_path(&self) -> Option<&AdventurePath> {
        self.networked_path.as_ref()
    }

    /// The host reports which path the player is in, `None` outside a
    /// campaign.
    pub fn set_active_path(&mut self, path_id: Option<&str>) {
        self.active_path = path_id.map(str::to_string);
    }

    #[must_use]
    pub fn is_networked_campaign_active(&self) -> bool {
        matches!(
            (&self.networked_path, &self.active_path),
            (Some(path), Some(active)) if &path.id == active
        )
    }

    fn is_offline_campaign_active(&self) -> bool {
        matches!(
            (&self.offline_path, &self.active_path),
            (Some(path), Some(active)) if &path.id == active
        )
    }

    /// Whether roster stats drive the heroes: a networked campaign, or an
    /// offline one with placeholder progression.
    #[must_use]
    pub fn progression_active(&self) -> bool {
        self.is_networked_campaign_active()
            || (self.config.mock_progression && self.is_offline_campaign_active())
    }

    /// Level the host spawns hero `hero_index` at.
    ///
    /// # Errors
    ///
    /// Returns an error when `hero_index` is outside the roster.
    pub fn compute_spawn_level(
        &self,
        original_level: i32,
        hero_index: usize,
    ) -> Result<i32, ProgressionError> {
        let level = self.roster.level(hero_index)?;
        Ok(if self.progression_active() {
            level
        } else {
            original_level
        })
    }

    /// Hooks for a creature entering combat, when it is a tracked hero in a
    /// campaign driven by the roster. Attaching discards any shared failure
    /// that arrived outside combat.
    #[must_use]
    pub fn on_creature_load(&self, hero: Option<HeroId>) -> Option<HeroHooks> {
        let hero = hero?;
        if !self.progression_active() {
            return None;
        }
        let client = self
            .client
            .as_ref()
            .filter(|_| self.is_networked_campaign_active())
            .map(Arc::clone);
        if let Some(client) = &client {
            client.clear_shared_failure();
        }
        Some(HeroHooks {
            hero,
            roster: Arc::clone(&self.roster),
            client,
        })
    }
}

/// Per-hero combat hooks.
#[derive(Debug, Clone)]
pub struct HeroHooks {
    hero: HeroId,
    roster: Arc<HeroRoster>,
    client: Option<Arc<SyncClient>>,
}

impl HeroHooks {
    #[must_use]
    pub const fn hero(&self) -> HeroId {
        self.hero
    }

    #[must_use]
    pub fn attack_bonus(&self, action: &CombatAction) -> Option<Bonus> {
        self.roster.attack_bonus(self.hero, action)
    }

    #[must_use]
    pub fn increases_damage_die(&self, item: &Item) -> bool {
        self.roster.increases_damage_die(self.hero, item)
    }

    /// Report the combat result. Only the party's first hero reports, so a
    /// battle counts once.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotConnected`] when the client never connected.
    pub fn end_of_combat(
        &self,
        victory: bool,
        reason: Option<&str>,
    ) -> Result<Option<JoinHandle<()>>, SyncError> {
        let Some(client) = self.client.as_ref().filter(|_| self.hero == HeroId::ALL[0]) else {
            return Ok(None);
        };
        if victory {
            client.report_cleared_location().map(Some)
        } else {
            client.report_shared_failure(reason)
        }
    }

    /// Cause of a pending shared failure, consumed by this call.
    #[must_use]
    pub fn poll_shared_failure(&self) -> Option<String> {
        self.client.as_ref()?.take_shared_failure()
    }

    /// Notices to print to the combat log this turn.
    #[must_use]
    pub fn drain_messages(&self) -> Vec<String> {
        self.client
            .as_ref()
            .map(|client| client.drain_messages())
            .unwrap_or_default()
    }
}
