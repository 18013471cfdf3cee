//! Invariants every shuffled campaign must satisfy.
use pathshuffle_game::{
    AdventurePath, NetworkedOptions, ShuffleError, ShufflePolicy, StopKind, Trait, shuffle,
    shuffle_path,
};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PropertyViolation {
    #[error("seed {seed:?} produced two different campaigns")]
    NonDeterministic { seed: String },
    #[error("encounter set changed: {missing:?} missing, {unexpected:?} unexpected")]
    NotAPermutation {
        missing: Vec<String>,
        unexpected: Vec<String>,
    },
    #[error("slot {slot} holds a level {level} encounter over its cap of {cap}")]
    CapExceeded { slot: usize, level: i32, cap: i32 },
    #[error("gold changed from {before} to {after}")]
    GoldNotConserved { before: i64, after: i64 },
    #[error("item count changed from {before} to {after}")]
    ItemsNotConserved { before: usize, after: usize },
    #[error("stop {position} carries index {index}")]
    Misindexed { position: usize, index: usize },
    #[error("prologue or anchor stop moved")]
    FrameMoved,
    #[error("networked campaign still has a {0}")]
    Leftover(&'static str),
    #[error(transparent)]
    Shuffle(#[from] ShuffleError),
}

/// Number of distinct properties a check covers, for reporting.
pub const OFFLINE_CHECKS: usize = 6;
pub const NETWORKED_CHECKS: usize = 7;

fn encounter_counts(path: &AdventurePath) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for encounter in path.encounters() {
        *counts.entry(encounter.template.id.clone()).or_default() += 1;
    }
    counts
}

fn difference(left: &BTreeMap<String, usize>, right: &BTreeMap<String, usize>) -> Vec<String> {
    left.iter()
        .filter(|(id, count)| right.get(*id).copied().unwrap_or_default() < **count)
        .map(|(id, _)| id.clone())
        .collect()
}

fn check_permutation(
    source: &AdventurePath,
    shuffled: &AdventurePath,
    violations: &mut Vec<PropertyViolation>,
) {
    let before = encounter_counts(source);
    let after = encounter_counts(shuffled);
    if before != after {
        violations.push(PropertyViolation::NotAPermutation {
            missing: difference(&before, &after),
            unexpected: difference(&after, &before),
        });
    }
}

fn produced_gold(path: &AdventurePath) -> i64 {
    path.encounters()
        .map(|encounter| i64::from(encounter.produce().reward_gold))
        .sum()
}

fn produced_items(path: &AdventurePath, keep: impl Fn(&pathshuffle_game::Item) -> bool) -> usize {
    path.encounters()
        .map(|encounter| encounter.produce().rewards.into_iter().filter(|item| keep(item)).count())
        .sum()
}

fn check_frame(shuffled: &AdventurePath, violations: &mut Vec<PropertyViolation>) {
    let prologue_ok = matches!(
        shuffled.stops.first().map(|stop| &stop.kind),
        Some(StopKind::Narration { name, .. }) if name == "Randomizer!"
    );
    let anchor_ok = matches!(
        shuffled.stops.get(1).map(|stop| &stop.kind),
        Some(StopKind::Shop { initial: true, .. })
    );
    if !prologue_ok || !anchor_ok {
        violations.push(PropertyViolation::FrameMoved);
    }
    for (position, stop) in shuffled.stops.iter().enumerate() {
        if stop.index != position {
            violations.push(PropertyViolation::Misindexed {
                position,
                index: stop.index,
            });
        }
    }
}

fn check_caps(
    source: &AdventurePath,
    policy: &ShufflePolicy,
    seed: &str,
    violations: &mut Vec<PropertyViolation>,
) -> Result<(), ShuffleError> {
    let shuffled = shuffle(&source.stops, policy, seed)?;
    for substitution in &shuffled.substitutions {
        if substitution.replacement_level > substitution.cap {
            violations.push(PropertyViolation::CapExceeded {
                slot: substitution.source_index,
                level: substitution.replacement_level,
                cap: substitution.cap,
            });
        }
    }
    Ok(())
}

fn run_checks(
    source: &AdventurePath,
    policy: &ShufflePolicy,
    seed: &str,
    checks: impl FnOnce(&AdventurePath, &mut Vec<PropertyViolation>),
) -> Vec<PropertyViolation> {
    let mut violations = Vec::new();
    let result = shuffle_path(source, policy, seed).and_then(|first| {
        let second = shuffle_path(source, policy, seed)?;
        if first != second {
            violations.push(PropertyViolation::NonDeterministic {
                seed: seed.to_string(),
            });
        }
        check_frame(&first, &mut violations);
        check_caps(source, policy, seed, &mut violations)?;
        checks(&first, &mut violations);
        Ok(())
    });
    if let Err(err) = result {
        violations.push(err.into());
    }
    violations
}

/// Shuffle `source` offline with `seed` and report every broken invariant.
#[must_use]
pub fn check_offline(source: &AdventurePath, seed: &str) -> Vec<PropertyViolation> {
    let policy = ShufflePolicy::offline(source);
    run_checks(source, &policy, seed, |shuffled, violations| {
        check_permutation(source, shuffled, violations);

        let (before, after) = (produced_gold(source), produced_gold(shuffled));
        if before != after {
            violations.push(PropertyViolation::GoldNotConserved { before, after });
        }
        let (before, after) = (produced_items(source, |_| true), produced_items(shuffled, |_| true));
        if before != after {
            violations.push(PropertyViolation::ItemsNotConserved { before, after });
        }
    })
}

/// Same as [`check_offline`] for a networked policy. Weapons are expected to
/// vanish and level-ups to be dropped.
#[must_use]
pub fn check_networked(
    source: &AdventurePath,
    options: &NetworkedOptions,
    seed: &str,
) -> Vec<PropertyViolation> {
    let policy = ShufflePolicy::networked(source, options);
    run_checks(source, &policy, seed, |shuffled, violations| {
        if options.shuffle_order && !options.include_free_encounters {
            check_permutation(source, shuffled, violations);
        }
        if shuffled.stops.iter().any(|stop| stop.is_level_up()) {
            violations.push(PropertyViolation::Leftover("level-up stop"));
        }
        if produced_items(shuffled, |item| item.has_trait(Trait::Weapon)) > 0 {
            violations.push(PropertyViolation::Leftover("weapon drop"));
        }
        if !options.include_free_encounters {
            let (before, after) = (produced_gold(source), produced_gold(shuffled));
            if before != after {
                violations.push(PropertyViolation::GoldNotConserved { before, after });
            }
            let not_weapon = |item: &pathshuffle_game::Item| !item.has_trait(Trait::Weapon);
            let (before, after) = (produced_items(source, not_weapon), produced_items(shuffled, not_weapon));
            if before != after {
                violations.push(PropertyViolation::ItemsNotConserved { before, after });
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::sample::SampleCampaign;
    use pathshuffle_game::Difficulty;

    #[test]
    fn generated_campaigns_pass_offline() {
        for seed in ["abc", "1337", "pathshuffle"] {
            let path = SampleCampaign::new(15, seed).generate();
            assert_eq!(check_offline(&path, seed), Vec::new(), "seed {seed}");
        }
    }

    #[test]
    fn generated_campaigns_pass_networked() {
        let sample = SampleCampaign::new(12, "net");
        let path = sample.generate();
        for include_free_encounters in [false, true] {
            let options = NetworkedOptions {
                shuffle_order: true,
                shuffle_loot: true,
                difficulty: Difficulty::Simple,
                include_free_encounters,
                free_encounters: sample.free_encounters(),
            };
            assert_eq!(check_networked(&path, &options, "net"), Vec::new());
        }
    }

    #[test]
    fn shuffle_failures_are_reported() {
        let mut path = SampleCampaign::new(3, "bad").generate();
        path.stops.remove(0);
        assert_eq!(
            check_offline(&path, "bad"),
            vec![PropertyViolation::Shuffle(
                ShuffleError::PrologueNotNarration
            )]
        );
    }

    #[test]
    fn permutation_difference_names_ids() {
        let mut left = BTreeMap::new();
        left.insert("a".to_string(), 2);
        left.insert("b".to_string(), 1);
        let mut right = BTreeMap::new();
        right.insert("a".to_string(), 1);
        assert_eq!(difference(&left, &right), vec!["a", "b"]);
        assert!(difference(&right, &left).is_empty());
    }
}
