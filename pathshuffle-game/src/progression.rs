//! Hero progression store.
//!
//! In networked play the remote item stream is the only source of hero stat
//! changes: level ups, alternating weapon potency / striking runes, and armor
//! grants (which the host campaign has no use for yet).
use crate::campaign::{Item, Trait};
use crate::constants::PROGRESSION_BONUS_SOURCE;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI32, Ordering};
use thiserror::Error;

pub const HERO_COUNT: usize = 4;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProgressionError {
    #[error("hero index {0} is outside the roster of {HERO_COUNT}")]
    HeroIndexOutOfRange(usize),
}

/// The four campaign heroes, in roster order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HeroId {
    Annacoesta,
    Scarlet,
    Tokdar,
    Saffi,
}

impl HeroId {
    pub const ALL: [Self; HERO_COUNT] = [Self::Annacoesta, Self::Scarlet, Self::Tokdar, Self::Saffi];

    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::Annacoesta => 0,
            Self::Scarlet => 1,
            Self::Tokdar => 2,
            Self::Saffi => 3,
        }
    }

    #[must_use]
    pub const fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(Self::Annacoesta),
            1 => Some(Self::Scarlet),
            2 => Some(Self::Tokdar),
            3 => Some(Self::Saffi),
            _ => None,
        }
    }

    #[must_use]
    pub const fn display_name(self) -> &'static str {
        match self {
            Self::Annacoesta => "Annacoesta",
            Self::Scarlet => "Scarlet",
            Self::Tokdar => "Tok'dar",
            Self::Saffi => "Saffi",
        }
    }

    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|hero| hero.display_name().eq_ignore_ascii_case(name))
    }
}

/// Kind of a per-hero progression item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ItemKind {
    LevelUp,
    WeaponImprovement,
    ArmorImprovement,
}

impl ItemKind {
    pub const ALL: [Self; 3] = [Self::LevelUp, Self::WeaponImprovement, Self::ArmorImprovement];

    #[must_use]
    pub const fn from_index(index: i64) -> Option<Self> {
        match index {
            0 => Some(Self::LevelUp),
            1 => Some(Self::WeaponImprovement),
            2 => Some(Self::ArmorImprovement),
            _ => None,
        }
    }

    #[must_use]
    pub const fn display_name(self) -> &'static str {
        match self {
            Self::LevelUp => "Level Up",
            Self::WeaponImprovement => "Weapon Upgrade",
            Self::ArmorImprovement => "Armor Upgrade",
        }
    }
}

/// A decoded progression item.
///
/// Local ids are laid out kind-major: `hero = id % 4`, `kind = id / 4`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressionItem {
    pub hero: HeroId,
    pub kind: ItemKind,
}

impl ProgressionItem {
    /// Decode a local (offset-stripped) item id. Negative ids and ids past the
    /// last per-hero kind decode to `None`.
    #[must_use]
    pub fn decode(local_id: i64) -> Option<Self> {
        if local_id < 0 {
            return None;
        }
        let hero_count = HERO_COUNT as i64;
        let hero = usize::try_from(local_id % hero_count)
            .ok()
            .and_then(HeroId::from_index)?;
        let kind = ItemKind::from_index(local_id / hero_count)?;
        Some(Self { hero, kind })
    }

    #[must_use]
    pub const fn local_id(self) -> i64 {
        let kind = match self.kind {
            ItemKind::LevelUp => 0,
            ItemKind::WeaponImprovement => 1,
            ItemKind::ArmorImprovement => 2,
        };
        kind * HERO_COUNT as i64 + self.hero.index() as i64
    }
}

/// An attack roll bonus granted to a hero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bonus {
    pub amount: i32,
    pub source: String,
}

/// The slice of a host combat action the bonus rules look at.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CombatAction {
    pub traits: Vec<Trait>,
    pub item: Option<Item>,
}

impl CombatAction {
    #[must_use]
    pub fn has_trait(&self, tag: Trait) -> bool {
        self.traits.contains(&tag)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeroProgression {
    pub level: i32,
    pub weapon_potency: i32,
    pub striking_runes: i32,
}

impl HeroProgression {
    #[must_use]
    pub const fn new(level: i32, weapon_potency: i32, striking_runes: i32) -> Self {
        Self {
            level,
            weapon_potency,
            striking_runes,
        }
    }

    /// Starting stats from a combined attack bonus; potency leads striking.
    #[must_use]
    pub const fn from_attack_bonus(level: i32, attack_bonus: i32) -> Self {
        Self::new(level, (attack_bonus + 1) / 2, attack_bonus / 2)
    }

    /// Potency and striking alternate, potency first.
    pub const fn increment_progressive_weapon_bonuses(&mut self) {
        if self.weapon_potency == self.striking_runes {
            self.weapon_potency += 1;
        } else {
            self.striking_runes += 1;
        }
    }

    pub const fn apply(&mut self, kind: ItemKind) {
        match kind {
            ItemKind::LevelUp => self.level += 1,
            ItemKind::WeaponImprovement => self.increment_progressive_weapon_bonuses(),
            ItemKind::ArmorImprovement => {}
        }
    }

    /// Item bonus to an attack roll, if the action is a weapon, unarmed, or
    /// impulse attack made with an item.
    #[must_use]
    pub fn attack_bonus(&self, action: &CombatAction) -> Option<Bonus> {
        if self.weapon_potency <= 0 || !action.has_trait(Trait::Attack) {
            return None;
        }
        let item = action.item.as_ref()?;
        let weapon_like = item.has_trait(Trait::Weapon)
            || item.has_trait(Trait::Unarmed)
            || action.has_trait(Trait::Impulse);
        weapon_like.then(|| Bonus {
            amount: self.weapon_potency,
            source: PROGRESSION_BONUS_SOURCE.to_string(),
        })
    }

    /// Whether striking runes add a damage die the weapon does not already have.
    #[must_use]
    pub fn increases_damage_die(&self, item: &Item) -> bool {
        item.weapon
            .as_ref()
            .is_some_and(|weapon| weapon.damage_die_count - 1 < self.striking_runes)
    }
}

#[derive(Debug)]
struct HeroSlot {
    progression: Mutex<HeroProgression>,
    // Mirror of `progression.level` so the spawn path never waits on the lock.
    level: AtomicI32,
}

impl HeroSlot {
    fn new(progression: HeroProgression) -> Self {
        Self {
            level: AtomicI32::new(progression.level),
            progression: Mutex::new(progression),
        }
    }

    fn replace(&self, progression: HeroProgression) {
        let mut guard = self.progression.lock();
        *guard = progression;
        self.level.store(progression.level, Ordering::Release);
    }
}

/// Per-hero progression, one lock per hero.
#[derive(Debug)]
pub struct HeroRoster {
    heroes: [HeroSlot; HERO_COUNT],
}

impl Default for HeroRoster {
    fn default() -> Self {
        Self::uniform(HeroProgression::new(1, 0, 0))
    }
}

impl HeroRoster {
    #[must_use]
    pub fn uniform(progression: HeroProgression) -> Self {
        Self {
            heroes: std::array::from_fn(|_| HeroSlot::new(progression)),
        }
    }

    /// Staggered placeholder heroes for offline testing.
    #[must_use]
    pub fn mock() -> Self {
        Self {
            heroes: std::array::from_fn(|index| HeroSlot::new(mock_progression(index))),
        }
    }

    pub fn reset(&self, progression: HeroProgression) {
        for slot in &self.heroes {
            slot.replace(progression);
        }
    }

    pub fn reset_mock(&self) {
        for (index, slot) in self.heroes.iter().enumerate() {
            slot.replace(mock_progression(index));
        }
    }

    /// Apply one local item id. Unknown ids are ignored; returns what was
    /// applied.
    pub fn apply_item(&self, local_id: i64) -> Option<ProgressionItem> {
        let Some(item) = ProgressionItem::decode(local_id) else {
            log::debug!("ignoring non-progression item {local_id}");
            return None;
        };
        let slot = &self.heroes[item.hero.index()];
        let mut progression = slot.progression.lock();
        progression.apply(item.kind);
        slot.level.store(progression.level, Ordering::Release);
        log::debug!(
            "{} received {}: {:?}",
            item.hero.display_name(),
            item.kind.display_name(),
            *progression
        );
        Some(item)
    }

    #[must_use]
    pub fn snapshot(&self, hero: HeroId) -> HeroProgression {
        *self.heroes[hero.index()].progression.lock()
    }

    #[must_use]
    pub fn snapshot_all(&self) -> [HeroProgression; HERO_COUNT] {
        HeroId::ALL.map(|hero| self.snapshot(hero))
    }

    /// Lock-free level read for the host's spawn routine.
    ///
    /// # Errors
    ///
    /// Returns an error when `hero_index` is not a roster slot.
    pub fn level(&self, hero_index: usize) -> Result<i32, ProgressionError> {
        self.heroes
            .get(hero_index)
            .map(|slot| slot.level.load(Ordering::Acquire))
            .ok_or(ProgressionError::HeroIndexOutOfRange(hero_index))
    }

    #[must_use]
    pub fn attack_bonus(&self, hero: HeroId, action: &CombatAction) -> Option<Bonus> {
        self.snapshot(hero).attack_bonus(action)
    }

    #[must_use]
    pub fn increases_damage_die(&self, hero: HeroId, item: &Item) -> bool {
        self.snapshot(hero).increases_damage_die(item)
    }
}

fn mock_progression(index: usize) -> HeroProgression {
    let index = i32::try_from(index).unwrap_or_default();
    HeroProgression::new(1 + index, index / 2, index % 2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn weapon_attack() -> CombatAction {
        CombatAction {
            traits: vec![Trait::Attack],
            item: Some(Item::new("Longsword").with_weapon(1)),
        }
    }

    #[test]
    fn weapon_bonuses_alternate_and_stay_within_one() {
        let mut hero = HeroProgression::new(1, 0, 0);
        let mut seen = Vec::new();
        for _ in 0..6 {
            hero.increment_progressive_weapon_bonuses();
            assert!((hero.weapon_potency - hero.striking_runes).abs() <= 1);
            seen.push((hero.weapon_potency, hero.striking_runes));
        }
        assert_eq!(seen, vec![(1, 0), (1, 1), (2, 1), (2, 2), (3, 2), (3, 3)]);
    }

    #[test]
    fn attack_bonus_from_starting_bonus() {
        assert_eq!(HeroProgression::from_attack_bonus(3, 3), HeroProgression::new(3, 2, 1));
        assert_eq!(HeroProgression::from_attack_bonus(3, 0), HeroProgression::new(3, 0, 0));
    }

    #[test]
    fn decode_is_hero_minor() {
        let item = ProgressionItem::decode(5).unwrap();
        assert_eq!(item.hero, HeroId::Scarlet);
        assert_eq!(item.kind, ItemKind::WeaponImprovement);
        assert_eq!(item.local_id(), 5);
        assert_eq!(ProgressionItem::decode(12), None);
        assert_eq!(ProgressionItem::decode(-3), None);
    }

    #[test]
    fn weapon_item_only_touches_its_hero() {
        let roster = HeroRoster::default();
        let before = roster.snapshot_all();
        assert!(roster.apply_item(5).is_some());
        let after = roster.snapshot_all();
        for hero in HeroId::ALL {
            if hero == HeroId::Scarlet {
                assert_eq!(after[hero.index()].weapon_potency, 1);
                assert_eq!(after[hero.index()].striking_runes, 0);
                assert_eq!(after[hero.index()].level, before[hero.index()].level);
            } else {
                assert_eq!(after[hero.index()], before[hero.index()]);
            }
        }
    }

    #[test]
    fn armor_and_unknown_items_change_nothing() {
        let roster = HeroRoster::mock();
        let before = roster.snapshot_all();
        roster.apply_item(9);
        roster.apply_item(12);
        roster.apply_item(-1);
        assert_eq!(roster.snapshot_all(), before);
    }

    #[test]
    fn mock_roster_is_staggered() {
        let roster = HeroRoster::mock();
        assert_eq!(roster.snapshot(HeroId::Saffi), HeroProgression::new(4, 1, 1));
        assert_eq!(roster.snapshot(HeroId::Tokdar), HeroProgression::new(3, 1, 0));
        roster.reset(HeroProgression::new(5, 0, 0));
        assert_eq!(roster.level(3), Ok(5));
        roster.reset_mock();
        assert_eq!(roster.level(1), Ok(2));
        assert_eq!(roster.level(4), Err(ProgressionError::HeroIndexOutOfRange(4)));
    }

    #[test]
    fn concurrent_level_ups_are_not_lost() {
        let roster = Arc::new(HeroRoster::default());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let roster = Arc::clone(&roster);
                thread::spawn(move || {
                    for _ in 0..50 {
                        roster.apply_item(2);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(roster.level(2), Ok(401));
        assert_eq!(roster.level(0), Ok(1));
    }

    #[test]
    fn concurrent_weapon_upgrades_keep_alternating() {
        let roster = Arc::new(HeroRoster::default());
        let writers: Vec<_> = (0..8)
            .map(|_| {
                let roster = Arc::clone(&roster);
                thread::spawn(move || {
                    for _ in 0..25 {
                        roster.apply_item(6);
                    }
                })
            })
            .collect();
        let reader = {
            let roster = Arc::clone(&roster);
            thread::spawn(move || {
                for _ in 0..500 {
                    let hero = roster.snapshot(HeroId::Tokdar);
                    let lead = hero.weapon_potency - hero.striking_runes;
                    assert!((0..=1).contains(&lead), "{hero:?}");
                }
            })
        };
        for handle in writers {
            handle.join().unwrap();
        }
        reader.join().unwrap();
        assert_eq!(roster.snapshot(HeroId::Tokdar), HeroProgression::new(1, 100, 100));
        assert_eq!(roster.snapshot(HeroId::Scarlet), HeroProgression::new(1, 0, 0));
    }

    #[test]
    fn attack_bonus_requires_weapon_like_attack() {
        let hero = HeroProgression::new(2, 1, 0);
        assert_eq!(hero.attack_bonus(&weapon_attack()).unwrap().amount, 1);

        let spell = CombatAction {
            traits: vec![Trait::Attack],
            item: Some(Item::new("Wand").with_traits(&[Trait::Magical])),
        };
        assert_eq!(hero.attack_bonus(&spell), None);

        let impulse = CombatAction {
            traits: vec![Trait::Attack, Trait::Impulse],
            item: Some(Item::new("Kinetic Gate")),
        };
        assert!(hero.attack_bonus(&impulse).is_some());

        let no_item = CombatAction {
            traits: vec![Trait::Attack, Trait::Impulse],
            item: None,
        };
        assert_eq!(hero.attack_bonus(&no_item), None);
        assert_eq!(HeroProgression::new(2, 0, 0).attack_bonus(&weapon_attack()), None);
    }

    #[test]
    fn striking_adds_one_die_at_a_time() {
        let hero = HeroProgression::new(2, 1, 1);
        assert!(hero.increases_damage_die(&Item::new("Dagger").with_weapon(1)));
        assert!(!hero.increases_damage_die(&Item::new("Striking Dagger").with_weapon(2)));
        assert!(!hero.increases_damage_die(&Item::new("Potion")));
    }

    #[test]
    fn hero_names_round_trip() {
        for hero in HeroId::ALL {
            assert_eq!(HeroId::from_name(hero.display_name()), Some(hero));
            assert_eq!(HeroId::from_index(hero.index()), Some(hero));
        }
    }
}
