//! In-process stand-in for the multiworld server.
//!
//! Used by the test suites and the tester's rehearsal mode. Everything the
//! server would do for one slot is kept in memory, and a handful of controls
//! let callers stall check submissions, refuse logins, or push events.
use super::SyncError;
use super::protocol::{
    DeathLink, LogMessage, LogMessageKind, LoginFailure, LoginRequest, LoginSuccess, NetworkItem,
    RemoteSession, ServerEvent,
};
use crate::catalog::IdSpace;
use crate::generation::SlotPlan;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::watch;

#[derive(Debug, Default)]
struct ServerSlot {
    logged_in: bool,
    login_attempts: usize,
    refuse_logins: usize,
    items: Vec<NetworkItem>,
    locations: BTreeSet<i64>,
    checked: BTreeSet<i64>,
    check_batches: Vec<Vec<i64>>,
    fail_checks: usize,
    storage: HashMap<String, Value>,
    death_link_enabled: bool,
    death_links_sent: Vec<DeathLink>,
    goal_reports: usize,
    fail_goals: usize,
    /// Remote location id to the local item placed there for this player.
    locked: HashMap<i64, i64>,
}

#[derive(Debug)]
pub struct MemorySession {
    player_name: String,
    slot_data: Map<String, Value>,
    ids: IdSpace,
    slot: Mutex<ServerSlot>,
    events_tx: Mutex<Option<UnboundedSender<ServerEvent>>>,
    events_rx: Mutex<Option<UnboundedReceiver<ServerEvent>>>,
    checks_open: watch::Sender<bool>,
}

impl MemorySession {
    /// A slot for `player_name` with `location_count` encounter locations.
    /// The id offset is read from `slot_data["base_offset"]` when present.
    #[must_use]
    pub fn new(
        player_name: impl Into<String>,
        slot_data: Map<String, Value>,
        location_count: usize,
    ) -> Self {
        let base_offset = slot_data
            .get("base_offset")
            .and_then(Value::as_i64)
            .unwrap_or(crate::constants::DEFAULT_BASE_ID_OFFSET);
        let ids = IdSpace::new(base_offset);
        let locations = (0..location_count as i64)
            .map(|local| ids.to_remote(local))
            .collect();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (checks_open, _) = watch::channel(true);
        Self {
            player_name: player_name.into(),
            slot_data,
            ids,
            slot: Mutex::new(ServerSlot {
                locations,
                ..ServerSlot::default()
            }),
            events_tx: Mutex::new(Some(events_tx)),
            events_rx: Mutex::new(Some(events_rx)),
            checks_open,
        }
    }

    /// A slot hosting a generated plan, with its goal item placed on the
    /// last battle.
    #[must_use]
    pub fn from_plan(player_name: impl Into<String>, plan: &SlotPlan) -> Self {
        let session = Self::new(player_name, plan.slot_data.clone(), plan.location_count);
        session.lock_item(plan.goal_location, plan.goal_item);
        session
    }

    /// Place `local_item` on `location` in this player's own world. It is
    /// delivered from the player when the location is checked.
    pub fn lock_item(&self, location: i64, local_item: i64) {
        let remote = self.ids.to_remote(location);
        self.slot.lock().locked.insert(remote, local_item);
    }

    /// Refuse the next `count` login attempts.
    pub fn refuse_logins(&self, count: usize) {
        self.slot.lock().refuse_logins = count;
    }

    /// Fail the next `count` check submissions with a transport error.
    pub fn fail_checks(&self, count: usize) {
        self.slot.lock().fail_checks = count;
    }

    /// Fail the next `count` goal reports with a transport error.
    pub fn fail_goal_reports(&self, count: usize) {
        self.slot.lock().fail_goals = count;
    }

    /// Hold every check submission until [`Self::resume_checks`].
    pub fn pause_checks(&self) {
        self.checks_open.send_replace(false);
    }

    pub fn resume_checks(&self) {
        self.checks_open.send_replace(true);
    }

    /// Deliver a local item id from `sender`, as the server would after
    /// another world found it. Returns its history index.
    pub fn grant_item(&self, local_id: i64, sender: &str) -> usize {
        self.deliver(local_id, sender, -1)
    }

    fn deliver(&self, local_id: i64, sender: &str, location: i64) -> usize {
        let mut slot = self.slot.lock();
        let item = NetworkItem {
            index: slot.items.len(),
            item_id: self.ids.to_remote(local_id),
            location,
            sender: sender.to_string(),
        };
        slot.items.push(item.clone());
        let index = item.index;
        if slot.logged_in {
            drop(slot);
            self.emit(ServerEvent::ItemReceived(item));
        }
        index
    }

    pub fn push_message(&self, kind: LogMessageKind, text: &str) {
        self.emit(ServerEvent::Message(LogMessage::new(kind, text)));
    }

    pub fn push_death_link(&self, source: &str, cause: Option<&str>) {
        self.emit(ServerEvent::DeathLink(DeathLink {
            source: source.to_string(),
            cause: cause.map(str::to_string),
            time: 0.0,
        }));
    }

    /// Drop the server side of the event stream, as a closed socket would.
    pub fn close_events(&self) {
        self.events_tx.lock().take();
    }

    fn emit(&self, event: ServerEvent) {
        let sent = self
            .events_tx
            .lock()
            .as_ref()
            .is_some_and(|events| events.send(event).is_ok());
        if !sent {
            log::debug!("memory session event dropped; stream closed");
        }
    }

    pub fn store(&self, key: &str, value: Value) {
        self.slot.lock().storage.insert(key.to_string(), value);
    }

    #[must_use]
    pub fn stored(&self, key: &str) -> Option<Value> {
        self.slot.lock().storage.get(key).cloned()
    }

    #[must_use]
    pub fn checked_locations(&self) -> Vec<i64> {
        self.slot.lock().checked.iter().copied().collect()
    }

    #[must_use]
    pub fn check_batches(&self) -> Vec<Vec<i64>> {
        self.slot.lock().check_batches.clone()
    }

    #[must_use]
    pub fn login_attempts(&self) -> usize {
        self.slot.lock().login_attempts
    }

    #[must_use]
    pub fn death_links_sent(&self) -> Vec<DeathLink> {
        self.slot.lock().death_links_sent.clone()
    }

    #[must_use]
    pub fn goal_reports(&self) -> usize {
        self.slot.lock().goal_reports
    }

    #[must_use]
    pub fn death_link_enabled(&self) -> bool {
        self.slot.lock().death_link_enabled
    }
}

#[async_trait]
impl RemoteSession for MemorySession {
    async fn login(&self, request: &LoginRequest) -> Result<LoginSuccess, LoginFailure> {
        let mut slot = self.slot.lock();
        slot.login_attempts += 1;
        if slot.refuse_logins > 0 {
            slot.refuse_logins -= 1;
            return Err(LoginFailure::new("Connection refused"));
        }
        if request.slot != self.player_name {
            return Err(LoginFailure::new("InvalidSlot"));
        }
        slot.logged_in = true;
        Ok(LoginSuccess {
            player_name: self.player_name.clone(),
            slot_data: self.slot_data.clone(),
        })
    }

    fn active_player(&self) -> Option<String> {
        self.slot
            .lock()
            .logged_in
            .then(|| self.player_name.clone())
    }

    fn take_events(&self) -> Option<UnboundedReceiver<ServerEvent>> {
        self.events_rx.lock().take()
    }

    fn received_items(&self) -> Vec<NetworkItem> {
        self.slot.lock().items.clone()
    }

    async fn complete_location_checks(&self, locations: &[i64]) -> Result<(), SyncError> {
        let mut open = self.checks_open.subscribe();
        open.wait_for(|open| *open)
            .await
            .map_err(|_| SyncError::Closed)?;
        let mut slot = self.slot.lock();
        if slot.fail_checks > 0 {
            slot.fail_checks -= 1;
            return Err(SyncError::Transport("check submission dropped".into()));
        }
        slot.check_batches.push(locations.to_vec());
        let unlocked: BTreeMap<i64, i64> = locations
            .iter()
            .filter(|location| !slot.checked.contains(location))
            .filter_map(|location| slot.locked.get(location).map(|item| (*location, *item)))
            .collect();
        slot.checked.extend(locations.iter().copied());
        drop(slot);
        for (location, item) in unlocked {
            self.deliver(item, &self.player_name, location);
        }
        Ok(())
    }

    async fn missing_location_count(&self) -> Result<usize, SyncError> {
        let slot = self.slot.lock();
        Ok(slot.locations.difference(&slot.checked).count())
    }

    async fn storage_initialize(&self, key: &str, default: Value) -> Result<(), SyncError> {
        self.slot
            .lock()
            .storage
            .entry(key.to_string())
            .or_insert(default);
        Ok(())
    }

    async fn storage_get(&self, key: &str) -> Result<Value, SyncError> {
        Ok(self.stored(key).unwrap_or(Value::Null))
    }

    async fn storage_set(&self, key: &str, value: Value) -> Result<(), SyncError> {
        self.store(key, value);
        Ok(())
    }

    async fn enable_death_link(&self) -> Result<(), SyncError> {
        self.slot.lock().death_link_enabled = true;
        Ok(())
    }

    async fn send_death_link(&self, link: DeathLink) -> Result<(), SyncError> {
        self.slot.lock().death_links_sent.push(link);
        Ok(())
    }

    async fn send_goal_complete(&self) -> Result<(), SyncError> {
        let mut slot = self.slot.lock();
        if slot.fail_goals > 0 {
            slot.fail_goals -= 1;
            return Err(SyncError::Transport("goal report dropped".into()));
        }
        slot.goal_reports += 1;
        Ok(())
    }
}
