//! Loot pool allocator.
//!
//! Rewards harvested from every copied encounter are piled up in source order,
//! shuffled once, and handed back out as contiguous slices so every item and
//! every gold reward lands on exactly one encounter.
use crate::campaign::Item;
use rand::Rng;
use rand::seq::SliceRandom;
use thiserror::Error;

/// Errors raised when the loot pool is used out of order.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LootError {
    #[error("loot pool sliced before it was finalized")]
    NotFinalized,
    #[error("loot pool already finalized")]
    AlreadyFinalized,
    #[error("finalized for {expected} encounters but {collected} rewards were collected")]
    EncounterCountMismatch { expected: usize, collected: usize },
    #[error("loot slice {index} requested from a pool of {count} encounters")]
    SliceOutOfRange { index: usize, count: usize },
}

/// The share of the pool owned by one encounter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LootSlice<'a> {
    pub gold: i32,
    pub items: &'a [Item],
}

#[derive(Debug, Clone, Default)]
pub struct LootPool {
    gold_pile: Vec<i32>,
    item_pile: Vec<Item>,
    encounter_count: Option<usize>,
}

impl LootPool {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one encounter's rewards to the piles.
    pub fn collect(&mut self, gold: i32, items: impl IntoIterator<Item = Item>) {
        self.gold_pile.push(gold);
        self.item_pile.extend(items);
    }

    /// Number of encounters that have contributed gold so far.
    #[must_use]
    pub fn contributions(&self) -> usize {
        self.gold_pile.len()
    }

    #[must_use]
    pub fn total_gold(&self) -> i64 {
        self.gold_pile.iter().map(|gold| i64::from(*gold)).sum()
    }

    #[must_use]
    pub fn item_count(&self) -> usize {
        self.item_pile.len()
    }

    #[must_use]
    pub const fn is_finalized(&self) -> bool {
        self.encounter_count.is_some()
    }

    /// Shuffle both piles once and fix the partition count.
    ///
    /// Gold is shuffled before items so a given generator state always yields
    /// the same assignment.
    ///
    /// # Errors
    ///
    /// Returns an error if the pool was already finalized or if
    /// `encounter_count` does not match the number of gold contributions.
    pub fn finalize<R: Rng + ?Sized>(
        &mut self,
        encounter_count: usize,
        rng: &mut R,
    ) -> Result<(), LootError> {
        if self.is_finalized() {
            return Err(LootError::AlreadyFinalized);
        }
        if encounter_count != self.gold_pile.len() {
            return Err(LootError::EncounterCountMismatch {
                expected: encounter_count,
                collected: self.gold_pile.len(),
            });
        }
        self.gold_pile.shuffle(rng);
        self.item_pile.shuffle(rng);
        self.encounter_count = Some(encounter_count);
        Ok(())
    }

    /// Rewards for the encounter at `index` (its position among copied encounters).
    ///
    /// # Errors
    ///
    /// Returns an error if the pool has not been finalized or the index is past
    /// the encounter count.
    pub fn slice(&self, index: usize) -> Result<LootSlice<'_>, LootError> {
        let count = self.encounter_count.ok_or(LootError::NotFinalized)?;
        if index >= count {
            return Err(LootError::SliceOutOfRange { index, count });
        }
        let (start, end) = slice_bounds(self.item_pile.len(), index, count);
        Ok(LootSlice {
            gold: self.gold_pile[index],
            items: &self.item_pile[start..end],
        })
    }
}

/// `[len*i/n, len*(i+1)/n)` partition bounds.
#[must_use]
pub fn slice_bounds(len: usize, index: usize, count: usize) -> (usize, usize) {
    (len * index / count, len * (index + 1) / count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    fn filled_pool(encounters: usize, items_each: usize) -> LootPool {
        let mut pool = LootPool::new();
        for encounter in 0..encounters {
            let items =
                (0..items_each).map(|n| Item::new(format!("item-{encounter}-{n}")));
            pool.collect(i32::try_from(encounter * 10).unwrap(), items);
        }
        pool
    }

    #[test]
    fn slice_requires_finalize() {
        let pool = filled_pool(3, 1);
        assert_eq!(pool.slice(0), Err(LootError::NotFinalized));
    }

    #[test]
    fn finalize_rejects_mismatched_count() {
        let mut pool = filled_pool(3, 1);
        let mut rng = ChaCha20Rng::seed_from_u64(5);
        assert_eq!(
            pool.finalize(4, &mut rng),
            Err(LootError::EncounterCountMismatch {
                expected: 4,
                collected: 3
            })
        );
        assert!(pool.finalize(3, &mut rng).is_ok());
        assert_eq!(pool.finalize(3, &mut rng), Err(LootError::AlreadyFinalized));
    }

    #[test]
    fn slices_cover_every_item_exactly_once() {
        let mut pool = filled_pool(7, 3);
        let total_gold = pool.total_gold();
        let mut rng = ChaCha20Rng::seed_from_u64(17);
        pool.finalize(7, &mut rng).unwrap();

        let mut seen = Vec::new();
        let mut gold = 0_i64;
        for index in 0..7 {
            let slice = pool.slice(index).unwrap();
            gold += i64::from(slice.gold);
            seen.extend(slice.items.iter().map(|item| item.name.clone()));
        }
        assert_eq!(gold, total_gold);
        assert_eq!(seen.len(), 21);
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), 21);
        assert_eq!(
            pool.slice(7),
            Err(LootError::SliceOutOfRange { index: 7, count: 7 })
        );
    }

    #[test]
    fn uneven_partitions_never_overlap() {
        for (len, count) in [(5, 3), (2, 6), (11, 4), (0, 3)] {
            let mut previous_end = 0;
            for index in 0..count {
                let (start, end) = slice_bounds(len, index, count);
                assert_eq!(start, previous_end, "gap or overlap at {index} of {count}");
                assert!(end >= start);
                previous_end = end;
            }
            assert_eq!(previous_end, len);
        }
    }
}
