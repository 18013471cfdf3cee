//! Centralized tuning constants and player-facing text for the randomizer.
//!
//! Ids and storage keys here are shared with the multiworld server side, so
//! changing any of them breaks existing seeds.

// Shuffle presentation ------------------------------------------------------
pub(crate) const PROLOGUE_TITLE: &str = "Randomizer!";
pub(crate) const PROLOGUE_SEPARATOR: &str = "\n\n\n\n";
pub(crate) const LEVEL_UP_TEXT: &str = "Chapter Complete!";
pub(crate) const LONG_REST_TEXT: &str = "You take a long rest and recover.";
pub(crate) const CREDITS_LINE: &str = "\nRandomization by Ordinary Magician";

pub(crate) const OFFLINE_ID_PREFIX: &str = "Random_";
pub(crate) const OFFLINE_NAME_PREFIX: &str = " Randomized ";
pub(crate) const NETWORKED_ID_PREFIX: &str = "Archipelago_";
pub(crate) const NETWORKED_NAME_PREFIX: &str = " Archipelago ";
pub(crate) const NETWORKED_SHOP_LEVEL: i32 = 1;

pub(crate) const OFFLINE_EXPLAINER: &str = "This is the non-archipelago version of the randomizer. \
If you are trying to play archipelago, you should return to the menu and perform the setup.
In this modded adventure path, we will randomize the order of the game's combat encounters, \
and shuffle the loot drops and gold rewards around.
As a result, the game will usually be significantly harder than normal early on and a bit easier later.
Good Luck!";

pub(crate) const NETWORKED_EXPLAINER: &str = "This is the archipelago version of the randomizer. \
If you can see this message, it means you are successfully connected to Archipelago!
In this modded adventure path, you will play through a version of this campaign with the help of your archipelago.
Your character level ups and item bonuses will come from them, and every encounter you clear will send someone an item.
Good Luck!";

// Difficulty caps -----------------------------------------------------------
pub(crate) const BALANCED_LEVEL_SLACK: i32 = 1;
pub(crate) const UNCAPPED_REPLACEMENT_LEVEL: i32 = 99;

// Remote protocol -----------------------------------------------------------
pub const GAME_NAME: &str = "Dawnsbury Days";
pub const DEFAULT_BASE_ID_OFFSET: i64 = 0x02400;
pub const DEFAULT_SERVER_PORT: u16 = 38281;
/// Slot data layout generated for this client.
pub const SLOT_DATA_VERSION: u32 = 10100;
pub(crate) const ENCOUNTERS_CLEARED_KEY: &str = "encounters_cleared";
pub(crate) const DEATH_LINK_TAG: &str = "DeathLink";
pub(crate) const CLIENT_VERSION: (u32, u32, u32) = (0, 5, 1);
/// `items_handling` flag set requesting remote, own-world and starting items.
pub(crate) const ITEMS_HANDLING_ALL: u8 = 0b111;
pub(crate) const CLIENT_GOAL_STATUS: u8 = 30;

// Sync client ---------------------------------------------------------------
pub(crate) const LOGIN_ATTEMPTS: usize = 2;
pub const DEFAULT_DEATH_LINK_AMOUNT: u32 = 1;
pub const DEFAULT_MAX_INFLIGHT_ITEM_APPLIES: usize = 16;
pub(crate) const PROGRESSION_BONUS_SOURCE: &str = "Archipelago";
