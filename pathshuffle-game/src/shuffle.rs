//! Campaign shuffle engine.
//!
//! The prologue and the anchor shop keep their places. Every later stop is
//! walked in source order; stops the policy marks eligible are swapped for a
//! draw (without replacement) from the shuffled replacement pool, capped by
//! the level the source campaign would have the party at in that slot.
use crate::campaign::{
    AdventurePath, CampaignStop, EncounterStop, EncounterTemplate, StopKind,
};
use crate::constants::{CREDITS_LINE, LEVEL_UP_TEXT, LONG_REST_TEXT, PROLOGUE_SEPARATOR};
use crate::loot::{LootError, LootPool};
use crate::policy::ShufflePolicy;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Raised when a campaign or policy cannot be shuffled. Each variant is a
/// configuration bug; callers should not retry.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ShuffleError {
    #[error("campaign must open with a narration stop")]
    PrologueNotNarration,
    #[error("campaign has no anchor stop after the prologue")]
    MissingAnchor,
    #[error("replacement pool holds {pool} encounters but {eligible} stops are eligible")]
    PoolTooSmall { eligible: usize, pool: usize },
    #[error(
        "no replacement at or below level {cap} for slot {slot} ({remaining} encounters left in the draw)"
    )]
    StarvedDraw {
        slot: usize,
        cap: i32,
        remaining: usize,
    },
    #[error(transparent)]
    Loot(#[from] LootError),
}

/// One eligible slot and the encounter drawn for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Substitution {
    /// Index of the slot in the source campaign.
    pub source_index: usize,
    pub original_id: String,
    pub replacement_id: String,
    pub replacement_level: i32,
    /// Walk level at the slot.
    pub walk_level: i32,
    pub cap: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShuffledCampaign {
    pub stops: Vec<CampaignStop>,
    pub substitutions: Vec<Substitution>,
}

/// Hash a seed string down to the 32-bit value that seeds the generator.
#[must_use]
pub fn seed_hash(seed: &str) -> u32 {
    let digest = Sha256::digest(seed.as_bytes());
    u32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]])
}

/// Deterministic generator for non-empty seeds, entropy otherwise.
#[must_use]
pub fn seeded_rng(seed: &str) -> ChaCha20Rng {
    if seed.is_empty() {
        ChaCha20Rng::from_entropy()
    } else {
        ChaCha20Rng::seed_from_u64(u64::from(seed_hash(seed)))
    }
}

struct PendingEncounter {
    position: usize,
    template: EncounterTemplate,
    level: i32,
    loot_index: usize,
}

struct Walk<'p> {
    policy: &'p ShufflePolicy,
    current_level: i32,
    stops: Vec<CampaignStop>,
    loot: LootPool,
    pending: Vec<PendingEncounter>,
}

impl<'p> Walk<'p> {
    fn new(policy: &'p ShufflePolicy) -> Self {
        Self {
            policy,
            current_level: policy.starting_level,
            stops: Vec::new(),
            loot: LootPool::new(),
            pending: Vec::new(),
        }
    }

    fn emit_prologue(&mut self, source: &CampaignStop) -> Result<(), ShuffleError> {
        let StopKind::Narration {
            name,
            description,
            voice_line,
        } = &source.kind
        else {
            return Err(ShuffleError::PrologueNotNarration);
        };
        let presentation = &self.policy.presentation;
        self.stops.push(CampaignStop {
            index: 0,
            opens_chapter: source.opens_chapter,
            spoiler: true,
            kind: StopKind::Narration {
                name: presentation
                    .prologue_title
                    .clone()
                    .unwrap_or_else(|| name.clone()),
                description: format!("{}{PROLOGUE_SEPARATOR}{description}", presentation.explainer),
                voice_line: voice_line.clone(),
            },
        });
        Ok(())
    }

    /// Copy `source` into the output, re-indexed and spoilered. `opens_chapter`
    /// comes from the slot, which differs from `source` for substituted stops.
    fn copy(&mut self, source: &CampaignStop, opens_chapter: bool, anchor: bool) {
        let position = self.stops.len();
        let kind = match &source.kind {
            StopKind::Encounter(encounter) => {
                let template = encounter.template.clone();
                let items = (self.policy.filter_loot)(template.rewards.clone());
                self.loot.collect(template.reward_gold, items);
                self.pending.push(PendingEncounter {
                    position,
                    template: template.clone(),
                    level: self.current_level,
                    loot_index: self.pending.len(),
                });
                StopKind::Encounter(EncounterStop::new(template))
            }
            StopKind::LevelUp { .. } => StopKind::LevelUp {
                text: LEVEL_UP_TEXT.to_string(),
            },
            StopKind::RestShort { .. } => StopKind::RestShort { text: None },
            StopKind::RestLong { wave_of_good, .. } => StopKind::RestLong {
                text: LONG_REST_TEXT.to_string(),
                wave_of_good: *wave_of_good,
            },
            StopKind::Shop {
                name,
                under_the_sea,
                ..
            } => StopKind::Shop {
                name: name.clone(),
                initial: anchor,
                shop_level: self.current_level,
                under_the_sea: *under_the_sea,
            },
            narration @ StopKind::Narration { .. } => narration.clone(),
        };

        self.stops.push(CampaignStop {
            index: position,
            opens_chapter,
            spoiler: true,
            kind,
        });
    }

    /// Partition the loot now that the encounter count is known and bake the
    /// overrides into every copied encounter.
    fn finish<R: Rng + ?Sized>(mut self, rng: &mut R) -> Result<Vec<CampaignStop>, ShuffleError> {
        self.loot.finalize(self.pending.len(), rng)?;
        for pending in &self.pending {
            let slice = self.loot.slice(pending.loot_index)?;
            let overrides = (self.policy.reward_wrapper)(&pending.template, pending.level, slice);
            if let StopKind::Encounter(encounter) = &mut self.stops[pending.position].kind {
                encounter.overrides = Some(overrides);
            }
        }
        log::info!(
            "shuffled campaign: {} stops, {} encounters, {} gold, {} items",
            self.stops.len(),
            self.pending.len(),
            self.loot.total_gold(),
            self.loot.item_count()
        );
        Ok(self.stops)
    }
}

fn draw_replacement<R: Rng>(
    draw: &mut Vec<EncounterTemplate>,
    cap: i32,
    slot: usize,
    rng: &mut R,
) -> Result<EncounterTemplate, ShuffleError> {
    let candidates: Vec<usize> = draw
        .iter()
        .enumerate()
        .filter(|(_, template)| template.level <= cap)
        .map(|(position, _)| position)
        .collect();
    if candidates.is_empty() {
        return Err(ShuffleError::StarvedDraw {
            slot,
            cap,
            remaining: draw.len(),
        });
    }
    let pick = candidates[rng.gen_range(0..candidates.len())];
    Ok(draw.remove(pick))
}

/// Shuffle a stop sequence under `policy`.
///
/// # Errors
///
/// Returns an error if the campaign lacks its prologue or anchor, if the
/// replacement pool is smaller than the eligible set, or if a draw finds no
/// encounter under its level cap.
pub fn shuffle(
    source: &[CampaignStop],
    policy: &ShufflePolicy,
    seed: &str,
) -> Result<ShuffledCampaign, ShuffleError> {
    let mut rng = seeded_rng(seed);
    let mut walk = Walk::new(policy);

    let prologue = source.first().ok_or(ShuffleError::PrologueNotNarration)?;
    walk.emit_prologue(prologue)?;
    let anchor = source.get(1).ok_or(ShuffleError::MissingAnchor)?;
    walk.copy(anchor, anchor.opens_chapter, true);

    let remaining = &source[2..];
    let eligible: Vec<bool> = remaining
        .iter()
        .map(|stop| (policy.eligible_for_replacement)(stop))
        .collect();
    let eligible_count = eligible.iter().filter(|flag| **flag).count();
    let mut draw = (policy.replacement_pool)(remaining);
    if draw.len() < eligible_count {
        return Err(ShuffleError::PoolTooSmall {
            eligible: eligible_count,
            pool: draw.len(),
        });
    }
    draw.shuffle(&mut rng);

    let mut substitutions = Vec::with_capacity(eligible_count);
    for (offset, (stop, is_eligible)) in remaining.iter().zip(eligible).enumerate() {
        let source_index = offset + 2;
        if stop.is_level_up() {
            walk.current_level += 1;
        }

        let replaced;
        let chosen = if is_eligible {
            let cap = (policy.max_replacement_level)(walk.current_level);
            let template = draw_replacement(&mut draw, cap, source_index, &mut rng)?;
            let original_id = stop
                .as_encounter()
                .map_or_else(String::new, |encounter| encounter.template.id.clone());
            log::debug!(
                "slot {source_index}: {original_id} -> {} (level {} <= cap {cap})",
                template.id,
                template.level
            );
            substitutions.push(Substitution {
                source_index,
                original_id,
                replacement_id: template.id.clone(),
                replacement_level: template.level,
                walk_level: walk.current_level,
                cap,
            });
            replaced = CampaignStop::encounter(template);
            &replaced
        } else {
            stop
        };

        if (policy.keep_stop)(chosen) {
            walk.copy(chosen, stop.opens_chapter, false);
        }
    }

    let stops = walk.finish(&mut rng)?;
    Ok(ShuffledCampaign {
        stops,
        substitutions,
    })
}

/// Shuffle a whole adventure path and dress the result with the policy's
/// presentation.
///
/// # Errors
///
/// Propagates every [`ShuffleError`] raised by [`shuffle`].
pub fn shuffle_path(
    path: &AdventurePath,
    policy: &ShufflePolicy,
    seed: &str,
) -> Result<AdventurePath, ShuffleError> {
    let shuffled = shuffle(&path.stops, policy, seed)?;
    let presentation = &policy.presentation;
    Ok(AdventurePath {
        id: presentation.id.clone(),
        name: presentation.name.clone(),
        description: presentation.description.clone(),
        starting_level: presentation.start_level,
        starting_shop_level: presentation.starting_shop_level,
        credits: Some(format!(
            "{}{CREDITS_LINE}",
            path.credits.as_deref().unwrap_or_default()
        )),
        background_music: path.background_music.clone(),
        stops: shuffled.stops,
    })
}
