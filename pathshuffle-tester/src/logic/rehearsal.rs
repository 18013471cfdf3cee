//! Networked playthrough against the in-process server.
//!
//! Generates a slot for the campaign, grants its whole item pool from a
//! partner, clears every encounter of the networked path with the first
//! hero, loses two battles to exercise the death-link cooldown, and
//! receives one death link from the partner.
use anyhow::{Context, Result, bail};
use pathshuffle_game::{
    CampaignLoader, CampaignProfile, CombatAction, ConnectionInfo, GenerationOptions, HERO_COUNT,
    HeroId, HeroProgression, Item, MemorySession, PlayMode, Randomizer, RemoteSession, SlotPlan,
    Trait,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

const PLAYER: &str = "Rehearsal";
const PARTNER: &str = "Partner";
/// Weapon bonuses granted over the run: +1 potency then a striking rune.
const END_ATTACK_BONUS: i32 = 2;
const DEATH_LINK_AMOUNT: u32 = 2;
const POLL_INTERVAL: Duration = Duration::from_millis(10);
const POLL_ATTEMPTS: usize = 300;

#[derive(Debug, Clone, Default, Serialize)]
pub struct RehearsalOutcome {
    pub encounters: usize,
    pub locations_checked: usize,
    pub items_granted: usize,
    pub notices: usize,
    pub goal_reported: bool,
    pub goal_item_received: bool,
    pub death_links_sent: usize,
    pub shared_failure_received: Option<String>,
    pub failures: Vec<String>,
    pub checks_run: usize,
}

impl RehearsalOutcome {
    fn check(&mut self, ok: bool, failure: impl FnOnce() -> String) {
        self.checks_run += 1;
        if !ok {
            self.failures.push(failure());
        }
    }
}

/// Play the loader's campaign through a networked run with `seed` as the
/// server's shuffle seed.
///
/// # Errors
///
/// Returns an error when the campaign cannot be loaded or the run cannot
/// reach networked mode at all. Broken expectations along the way are
/// collected in the outcome instead.
pub fn run_rehearsal<L>(loader: &L, seed: &str) -> Result<RehearsalOutcome>
where
    L: CampaignLoader,
{
    let campaign = loader.load_campaign().context("loading campaign")?;
    let free_encounters = loader
        .load_free_encounters()
        .context("loading free encounters")?;
    let mut config = loader.load_config().context("loading config")?;
    config.connection = Some(ConnectionInfo::new("memory", PLAYER));

    let profile = CampaignProfile::from_path(&campaign, 0, END_ATTACK_BONUS);
    let options = GenerationOptions {
        include_free_encounters: true,
        deathlink: true,
        dl_amount: Some(DEATH_LINK_AMOUNT),
        rng_seed: seed.to_string(),
        ..GenerationOptions::default()
    };
    let plan = SlotPlan::generate(&profile, &options).context("generating slot")?;
    let encounters = plan.location_count;
    let start_level = profile.start_level;
    let end_level = profile.end_level;
    let session = Arc::new(MemorySession::from_plan(PLAYER, &plan));

    let granted = plan.item_ids();
    for local_id in &granted {
        session.grant_item(*local_id, PARTNER);
    }

    let mut randomizer = Randomizer::new(campaign, config)?.with_free_encounters(free_encounters);
    let remote: Arc<dyn RemoteSession> = session.clone();
    if randomizer.load(Some(remote))? != PlayMode::Networked {
        bail!("rehearsal session did not reach networked mode");
    }
    let path = randomizer
        .networked_path()
        .context("no networked path registered")?
        .clone();
    randomizer.set_active_path(Some(&path.id));
    let client = Arc::clone(randomizer.client().context("no sync client")?);
    let runtime = randomizer.runtime();
    runtime.block_on(client.wait_for_items());

    let mut outcome = RehearsalOutcome {
        encounters,
        items_granted: granted.len(),
        ..RehearsalOutcome::default()
    };

    let expected = HeroProgression::new(end_level, 1, 1);
    for (index, hero) in HeroId::ALL.into_iter().enumerate() {
        let progression = randomizer.roster().snapshot(hero);
        outcome.check(progression == expected, || {
            format!("{} ended at {progression:?}, expected {expected:?}", hero.display_name())
        });
        let spawn = randomizer.compute_spawn_level(start_level, index)?;
        outcome.check(spawn == end_level, || {
            format!("{} spawns at {spawn}, expected {end_level}", hero.display_name())
        });
    }

    let leader = randomizer
        .on_creature_load(Some(HeroId::ALL[0]))
        .context("no hooks for the lead hero")?;
    let follower = randomizer
        .on_creature_load(Some(HeroId::ALL[HERO_COUNT - 1]))
        .context("no hooks for the last hero")?;
    let attack = CombatAction {
        traits: vec![Trait::Attack],
        item: Some(Item::new("Longsword").with_weapon(1)),
    };
    outcome.check(
        leader.attack_bonus(&attack).is_some_and(|bonus| bonus.amount == 1),
        || "lead hero has no +1 attack bonus".to_string(),
    );
    outcome.check(
        leader.increases_damage_die(&Item::new("Longsword").with_weapon(1)),
        || "striking rune does not add a damage die".to_string(),
    );
    let notices = leader.drain_messages().len();
    outcome.notices = notices;
    outcome.check(notices == granted.len(), || {
        format!("{notices} item notices for {} grants", granted.len())
    });

    for _ in 0..2 {
        if let Some(sent) = leader.end_of_combat(false, None)? {
            runtime.block_on(sent)?;
        }
    }
    for _ in path.encounters() {
        outcome.check(follower.end_of_combat(true, None)?.is_none(), || {
            "a follower reported a cleared battle".to_string()
        });
        if let Some(report) = leader.end_of_combat(true, None)? {
            runtime.block_on(report)?;
        }
    }

    session.push_death_link(PARTNER, Some("Partner was eaten by a grue"));
    outcome.shared_failure_received = runtime.block_on(async {
        for _ in 0..POLL_ATTEMPTS {
            if let Some(cause) = leader.poll_shared_failure() {
                return Some(cause);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
        None
    });
    let goal_notice = format!("Got All Encounters Clear! from {PLAYER}!");
    outcome.goal_item_received = runtime.block_on(async {
        for _ in 0..POLL_ATTEMPTS {
            if leader.drain_messages().contains(&goal_notice) {
                return true;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
        false
    });

    let checked = session.checked_locations().len();
    let goal_reported = session.goal_reports() == 1 && client.is_goal_reached();
    let death_links = session.death_links_sent().len();
    let received = outcome.shared_failure_received.as_deref() == Some("Partner was eaten by a grue");
    outcome.locations_checked = checked;
    outcome.goal_reported = goal_reported;
    outcome.death_links_sent = death_links;
    outcome.check(checked == encounters, || {
        format!("{checked} of {encounters} locations checked")
    });
    outcome.check(client.pending_locations().is_empty(), || {
        format!("{} locations still pending", client.pending_locations().len())
    });
    outcome.check(goal_reported, || "goal was not reported exactly once".to_string());
    let goal_item = outcome.goal_item_received;
    outcome.check(goal_item, || {
        "goal item never arrived from the last battle".to_string()
    });
    outcome.check(death_links == 1, || {
        format!("{death_links} death links sent for two defeats")
    });
    outcome.check(received, || {
        "partner death link never reached the mailbox".to_string()
    });
    log::info!(
        "rehearsal finished: {} checks, {} failures",
        outcome.checks_run,
        outcome.failures.len()
    );
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::sample::SampleCampaign;

    #[test]
    fn sample_campaign_rehearses_cleanly() {
        let sample = SampleCampaign::new(9, "rehearsal");
        let outcome = run_rehearsal(&sample, "rehearsal").unwrap();
        assert_eq!(outcome.failures, Vec::<String>::new());
        assert_eq!(outcome.locations_checked, 9);
        assert!(outcome.goal_reported);
        assert!(outcome.goal_item_received);
        assert_eq!(outcome.death_links_sent, 1);
    }

    #[test]
    fn granted_pool_matches_the_campaign_span() {
        let sample = SampleCampaign::new(6, "pool");
        let campaign = sample.load_campaign().unwrap();
        let levels = usize::try_from(campaign.end_level() - campaign.starting_level).unwrap();
        let outcome = run_rehearsal(&sample, "pool").unwrap();
        assert_eq!(outcome.items_granted, HERO_COUNT * (levels + 2));
        assert_eq!(outcome.notices, outcome.items_granted);
    }
}
