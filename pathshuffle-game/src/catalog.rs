//! Names for the item and location ids shared with the multiworld server.
use crate::progression::{HERO_COUNT, HeroId, ItemKind, ProgressionItem};

/// Singleton item granted when every encounter location is checked.
pub const GAME_COMPLETE_ITEM: &str = "All Encounters Clear!";
pub const GAME_COMPLETE_LOCAL_ID: i64 = (ItemKind::ALL.len() * HERO_COUNT) as i64;

/// `"<kind> (<hero>)"`, the per-hero item naming the server uses.
#[must_use]
pub fn character_item_name(kind: ItemKind, hero: HeroId) -> String {
    format!("{} ({})", kind.display_name(), hero.display_name())
}

/// Name of the item at `local_id` (offset already stripped).
#[must_use]
pub fn item_name(local_id: i64) -> Option<String> {
    if local_id == GAME_COMPLETE_LOCAL_ID {
        return Some(GAME_COMPLETE_ITEM.to_string());
    }
    ProgressionItem::decode(local_id).map(|item| character_item_name(item.kind, item.hero))
}

/// Every item name in id order.
#[must_use]
pub fn all_item_names() -> Vec<String> {
    ItemKind::ALL
        .into_iter()
        .flat_map(|kind| {
            HeroId::ALL
                .into_iter()
                .map(move |hero| character_item_name(kind, hero))
        })
        .chain(std::iter::once(GAME_COMPLETE_ITEM.to_string()))
        .collect()
}

#[must_use]
pub fn location_name(local_id: i64) -> String {
    format!("Battle #{}", local_id + 1)
}

/// Inverse of [`location_name`].
#[must_use]
pub fn location_id(name: &str) -> Option<i64> {
    let number: i64 = name.strip_prefix("Battle #")?.parse().ok()?;
    (number >= 1).then_some(number - 1)
}

/// Maps between local ids and the server's offset ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdSpace {
    pub base_offset: i64,
}

impl IdSpace {
    #[must_use]
    pub const fn new(base_offset: i64) -> Self {
        Self { base_offset }
    }

    #[must_use]
    pub const fn to_remote(self, local_id: i64) -> i64 {
        local_id + self.base_offset
    }

    #[must_use]
    pub const fn to_local(self, remote_id: i64) -> i64 {
        remote_id - self.base_offset
    }

    /// Display name for a remote item id, falling back to the raw id.
    #[must_use]
    pub fn item_display(self, remote_id: i64) -> String {
        item_name(self.to_local(remote_id)).unwrap_or_else(|| format!("Item #{remote_id}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn item_ids_are_kind_major() {
        let names = all_item_names();
        assert_eq!(names.len(), 13);
        assert_eq!(names[0], "Level Up (Annacoesta)");
        assert_eq!(names[2], "Level Up (Tok'dar)");
        assert_eq!(names[5], "Weapon Upgrade (Scarlet)");
        assert_eq!(names[12], GAME_COMPLETE_ITEM);
        for (id, name) in names.iter().enumerate() {
            assert_eq!(item_name(id as i64).as_deref(), Some(name.as_str()));
        }
        assert_eq!(item_name(13), None);
    }

    #[test]
    fn locations_are_one_based_battles() {
        assert_eq!(location_name(0), "Battle #1");
        assert_eq!(location_id("Battle #17"), Some(16));
        assert_eq!(location_id("Battle #0"), None);
        assert_eq!(location_id("Shop"), None);
    }

    #[test]
    fn id_space_applies_offset() {
        let ids = IdSpace::new(0x2400);
        assert_eq!(ids.to_remote(3), 0x2403);
        assert_eq!(ids.to_local(0x2405), 5);
        assert_eq!(ids.item_display(0x2405), "Weapon Upgrade (Scarlet)");
        assert_eq!(ids.item_display(7), "Item #7");
    }
}
