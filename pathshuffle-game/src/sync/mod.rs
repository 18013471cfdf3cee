//! Remote progression sync client.
//!
//! Owns one session with the multiworld server. Inbound items feed the hero
//! roster, cleared encounters go out as location checks, and shared failures
//! (death links) travel both ways through a single-slot mailbox.
pub mod memory;
pub mod protocol;
#[cfg(feature = "websocket")]
pub mod websocket;

use crate::campaign::EncounterTemplate;
use crate::catalog::IdSpace;
use crate::config::ConnectionInfo;
use crate::constants::{ENCOUNTERS_CLEARED_KEY, LOGIN_ATTEMPTS};
use crate::policy::NetworkedOptions;
use crate::progression::{HeroProgression, HeroRoster};
use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::{JoinHandle, JoinSet};

pub use protocol::{
    DeathLink, LogMessage, LogMessageKind, LoginFailure, LoginRequest, LoginSuccess,
    NetworkItem, RemoteSession, ServerEvent, SlotData,
};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("login failed: {0}")]
    Login(String),
    #[error("not connected to the multiworld server")]
    NotConnected,
    #[error("malformed slot data: {0}")]
    SlotData(#[from] serde_json::Error),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("connection closed")]
    Closed,
    #[error("session already used; start a new client to reconnect")]
    SessionUsed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Ready,
}

/// Client-side knobs that do not come from the server.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub max_inflight_item_applies: usize,
    /// Encounters outside the campaign offered to the networked shuffle.
    pub free_encounters: Vec<EncounterTemplate>,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            max_inflight_item_applies: crate::constants::DEFAULT_MAX_INFLIGHT_ITEM_APPLIES,
            free_encounters: Vec::new(),
        }
    }
}

/// Per-session state fixed at login.
#[derive(Debug)]
struct SyncState {
    ids: IdSpace,
    slot: SlotData,
    player_name: String,
    death_link_amount: u32,
}

/// Bounded set of owned background tasks applying items to the roster.
#[derive(Debug)]
pub struct ItemDispatcher {
    roster: Arc<HeroRoster>,
    runtime: Handle,
    permits: Arc<Semaphore>,
    tasks: Mutex<JoinSet<()>>,
}

impl ItemDispatcher {
    #[must_use]
    pub fn new(roster: Arc<HeroRoster>, runtime: Handle, max_inflight: usize) -> Self {
        Self {
            roster,
            runtime,
            permits: Arc::new(Semaphore::new(max_inflight.max(1))),
            tasks: Mutex::new(JoinSet::new()),
        }
    }

    /// Queue one local item id. Waits only while the in-flight bound is hit.
    pub async fn dispatch(&self, local_id: i64) {
        let Ok(permit) = Arc::clone(&self.permits).acquire_owned().await else {
            return;
        };
        let roster = Arc::clone(&self.roster);
        let mut tasks = self.tasks.lock();
        while tasks.try_join_next().is_some() {}
        tasks.spawn_on(
            async move {
                roster.apply_item(local_id);
                drop(permit);
            },
            &self.runtime,
        );
    }

    /// Wait for every item queued so far to be applied.
    pub async fn wait_for_items(&self) {
        let mut tasks = std::mem::take(&mut *self.tasks.lock());
        while let Some(result) = tasks.join_next().await {
            if let Err(err) = result {
                log::warn!("item apply task failed: {err}");
            }
        }
    }
}

pub struct SyncClient {
    session: Arc<dyn RemoteSession>,
    connection: ConnectionInfo,
    roster: Arc<HeroRoster>,
    runtime: Handle,
    options: SyncOptions,
    dispatcher: ItemDispatcher,
    status: Mutex<ConnectionStatus>,
    state: OnceLock<SyncState>,
    encounters_cleared: AtomicI64,
    counter_writes: tokio::sync::Mutex<()>,
    pending_locations: Mutex<BTreeSet<i64>>,
    death_link_cooldown: Mutex<u32>,
    shared_failure: Mutex<String>,
    messages_tx: Sender<String>,
    messages_rx: Receiver<String>,
    goal_reached: AtomicBool,
    goal_sent: AtomicBool,
    event_pump: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for SyncClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncClient")
            .field("connection", &self.connection)
            .field("status", &self.status())
            .field("encounters_cleared", &self.encounters_cleared())
            .finish_non_exhaustive()
    }
}

impl SyncClient {
    #[must_use]
    pub fn new(
        session: Arc<dyn RemoteSession>,
        connection: ConnectionInfo,
        roster: Arc<HeroRoster>,
        runtime: Handle,
        options: SyncOptions,
    ) -> Arc<Self> {
        let (messages_tx, messages_rx) = crossbeam_channel::unbounded();
        let dispatcher = ItemDispatcher::new(
            Arc::clone(&roster),
            runtime.clone(),
            options.max_inflight_item_applies,
        );
        Arc::new(Self {
            session,
            connection,
            roster,
            runtime,
            options,
            dispatcher,
            status: Mutex::new(ConnectionStatus::Disconnected),
            state: OnceLock::new(),
            encounters_cleared: AtomicI64::new(0),
            counter_writes: tokio::sync::Mutex::new(()),
            pending_locations: Mutex::new(BTreeSet::new()),
            death_link_cooldown: Mutex::new(0),
            shared_failure: Mutex::new(String::new()),
            messages_tx,
            messages_rx,
            goal_reached: AtomicBool::new(false),
            goal_sent: AtomicBool::new(false),
            event_pump: Mutex::new(None),
        })
    }

    fn set_status(&self, status: ConnectionStatus) {
        let mut current = self.status.lock();
        if *current != status {
            log::info!("sync client {:?} -> {status:?}", *current);
            *current = status;
        }
    }

    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        *self.status.lock()
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.status() == ConnectionStatus::Ready
    }

    #[must_use]
    pub const fn connection(&self) -> &ConnectionInfo {
        &self.connection
    }

    #[must_use]
    pub fn slot_data(&self) -> Option<&SlotData> {
        self.state.get().map(|state| &state.slot)
    }

    #[must_use]
    pub fn seed(&self) -> Option<&str> {
        self.slot_data().map(SlotData::seed)
    }

    #[must_use]
    pub fn player_name(&self) -> Option<&str> {
        self.state.get().map(|state| state.player_name.as_str())
    }

    /// Networked shuffle switches, once the slot configuration is known.
    #[must_use]
    pub fn networked_options(&self) -> Option<NetworkedOptions> {
        self.slot_data()
            .map(|slot| slot.networked_options(&self.options.free_encounters))
    }

    fn connected_state(&self) -> Result<&SyncState, SyncError> {
        self.state.get().ok_or(SyncError::NotConnected)
    }

    async fn login(&self) -> Result<LoginSuccess, SyncError> {
        let request = LoginRequest::new(&self.connection.slot, &self.connection.password);
        let mut last_failure = LoginFailure::new("no login attempted");
        for attempt in 1..=LOGIN_ATTEMPTS {
            match self.session.login(&request).await {
                Ok(success) => return Ok(success),
                Err(failure) => {
                    log::warn!(
                        "login to {} as {} failed (attempt {attempt}/{LOGIN_ATTEMPTS}): {failure}",
                        self.connection.address(),
                        self.connection.slot
                    );
                    last_failure = failure;
                }
            }
        }
        Err(SyncError::Login(last_failure.to_string()))
    }

    /// Log in, load the slot configuration, restore the cleared counter, and
    /// replay the item history before hooking the live event stream.
    ///
    /// A client that is already connected returns `Ok` without contacting
    /// the server again. A client whose session was established once and
    /// then closed is refused; reconnecting takes a fresh client.
    ///
    /// # Errors
    ///
    /// Returns an error when both login attempts fail, the slot data is
    /// malformed, the counter cannot be read, or the event stream is gone.
    /// The client is left disconnected and the roster untouched.
    pub async fn connect(self: &Arc<Self>) -> Result<(), SyncError> {
        if self.is_ready() {
            return Ok(());
        }
        if self.state.get().is_some() {
            return Err(SyncError::SessionUsed);
        }
        self.set_status(ConnectionStatus::Connecting);
        match self.establish().await {
            Ok(()) => {
                self.set_status(ConnectionStatus::Ready);
                Ok(())
            }
            Err(err) => {
                log::warn!("connection to {} failed: {err}", self.connection.address());
                self.set_status(ConnectionStatus::Disconnected);
                Err(err)
            }
        }
    }

    async fn establish(self: &Arc<Self>) -> Result<(), SyncError> {
        let success = self.login().await?;
        let slot = SlotData::from_map(&success.slot_data)?;
        log::info!(
            "logged in as {} (seed {:?}, shuffle order {}, shuffle loot {}, {:?})",
            success.player_name,
            slot.seed(),
            slot.encounter_shuffle,
            slot.loot_shuffle,
            slot.shuffle_difficulty
        );

        if slot.deathlink {
            self.session.enable_death_link().await?;
        }
        self.session
            .storage_initialize(ENCOUNTERS_CLEARED_KEY, serde_json::json!(0))
            .await?;
        let cleared = self
            .session
            .storage_get(ENCOUNTERS_CLEARED_KEY)
            .await?
            .as_i64()
            .unwrap_or_default();
        let events = self.session.take_events().ok_or(SyncError::Closed)?;

        // Nothing below fails: the roster is only reset once the history
        // that rebuilds it is in hand.
        self.roster.reset(HeroProgression::from_attack_bonus(
            slot.start_level,
            slot.start_atk_bonus,
        ));
        *self.death_link_cooldown.lock() = 0;
        self.encounters_cleared.store(cleared, Ordering::SeqCst);
        let state = SyncState {
            ids: IdSpace::new(slot.base_offset),
            death_link_amount: slot.death_link_amount(),
            slot,
            player_name: success.player_name,
        };
        if self.state.set(state).is_err() {
            log::warn!("slot configuration already loaded; keeping the first one");
        }

        let history = self.session.received_items();
        let replayed = history.len();
        for item in history {
            self.deliver_item(&item).await;
        }
        log::info!("replayed {replayed} previously received items, {cleared} encounters cleared");

        let pump = self
            .runtime
            .spawn(pump_events(Arc::downgrade(self), events, replayed));
        if let Some(previous) = self.event_pump.lock().replace(pump) {
            previous.abort();
        }
        Ok(())
    }

    async fn deliver_item(&self, item: &NetworkItem) {
        let Some(state) = self.state.get() else {
            return;
        };
        let local_id = state.ids.to_local(item.item_id);
        self.push_message(format!(
            "Got {} from {}!",
            state.ids.item_display(item.item_id),
            item.sender
        ));
        self.dispatcher.dispatch(local_id).await;
    }

    /// Keep only item send notices; everything else is chatter.
    fn receive_message(&self, message: &LogMessage) {
        if message.is_item_send() {
            self.push_message(message.to_string());
        }
    }

    fn receive_shared_failure(&self, link: &DeathLink) {
        let Some(state) = self.state.get() else {
            return;
        };
        if link.source == state.player_name {
            return;
        }
        let cause = link
            .cause
            .clone()
            .filter(|cause| !cause.is_empty())
            .unwrap_or_else(|| format!("{} was defeated", link.source));
        log::info!("shared failure received from {}: {cause}", link.source);
        *self.shared_failure.lock() = cause;
    }

    fn push_message(&self, text: String) {
        if self.messages_tx.send(text).is_err() {
            log::warn!("message queue closed");
        }
    }

    /// Every queued player notice, oldest first.
    #[must_use]
    pub fn drain_messages(&self) -> Vec<String> {
        self.messages_rx.try_iter().collect()
    }

    /// Wait until every item delivered so far has been applied to the roster.
    pub async fn wait_for_items(&self) {
        self.dispatcher.wait_for_items().await;
    }

    #[must_use]
    pub fn encounters_cleared(&self) -> i64 {
        self.encounters_cleared.load(Ordering::SeqCst)
    }

    /// Remote location ids not yet acknowledged by the server.
    #[must_use]
    pub fn pending_locations(&self) -> Vec<i64> {
        self.pending_locations.lock().iter().copied().collect()
    }

    #[must_use]
    pub fn is_goal_reached(&self) -> bool {
        self.goal_reached.load(Ordering::SeqCst)
    }

    /// Record the next encounter as cleared and submit every pending check
    /// in the background. Failed submissions stay pending for the next call.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotConnected`] before a successful connect.
    pub fn report_cleared_location(self: &Arc<Self>) -> Result<JoinHandle<()>, SyncError> {
        let state = self.connected_state()?;
        let location = self.encounters_cleared.fetch_add(1, Ordering::SeqCst);
        let remote_id = state.ids.to_remote(location);
        self.pending_locations.lock().insert(remote_id);
        log::debug!("encounter {location} cleared (location {remote_id})");

        let client = Arc::clone(self);
        Ok(self.runtime.spawn(async move {
            client.persist_cleared_count().await;
            client.submit_pending().await;
        }))
    }

    async fn persist_cleared_count(&self) {
        let _guard = self.counter_writes.lock().await;
        let cleared = self.encounters_cleared();
        if let Err(err) = self
            .session
            .storage_set(ENCOUNTERS_CLEARED_KEY, serde_json::json!(cleared))
            .await
        {
            log::warn!("failed to persist cleared count {cleared}: {err}");
        }
    }

    async fn submit_pending(&self) {
        let snapshot = self.pending_locations();
        if snapshot.is_empty() {
            self.retry_goal().await;
            return;
        }
        log::debug!("submitting location checks {snapshot:?}");
        if let Err(err) = self.session.complete_location_checks(&snapshot).await {
            log::warn!("location check submit failed, {} stay pending: {err}", snapshot.len());
            return;
        }
        {
            let mut pending = self.pending_locations.lock();
            for location in &snapshot {
                pending.remove(location);
            }
        }
        self.check_goal().await;
    }

    async fn check_goal(&self) {
        match self.session.missing_location_count().await {
            Ok(0) => {
                self.goal_reached.store(true, Ordering::SeqCst);
                self.send_goal().await;
            }
            Ok(_) => {}
            Err(err) => log::warn!("could not read missing locations: {err}"),
        }
    }

    async fn send_goal(&self) {
        if self.goal_sent.swap(true, Ordering::SeqCst) {
            return;
        }
        log::info!("every location checked, reporting goal");
        if let Err(err) = self.session.send_goal_complete().await {
            log::warn!("goal report failed: {err}");
            self.goal_sent.store(false, Ordering::SeqCst);
        }
    }

    /// Whether the goal was reached but its report has not gone through.
    #[must_use]
    pub fn is_goal_pending(&self) -> bool {
        self.is_goal_reached() && !self.goal_sent.load(Ordering::SeqCst)
    }

    /// Resend a goal report that failed earlier. Runs after every live
    /// server event and on every report, so the last cleared encounter
    /// does not strand it.
    pub async fn retry_goal(&self) {
        if self.is_goal_pending() {
            self.send_goal().await;
        }
    }

    /// Count a local party wipe; every Nth one is sent to the other players.
    ///
    /// Returns the send task when this call transmitted, `None` when the
    /// wipe was absorbed by the cooldown or death links are off.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotConnected`] before a successful connect.
    pub fn report_shared_failure(
        &self,
        reason: Option<&str>,
    ) -> Result<Option<JoinHandle<()>>, SyncError> {
        let state = self.connected_state()?;
        if !state.slot.deathlink {
            return Ok(None);
        }
        {
            let mut cooldown = self.death_link_cooldown.lock();
            if *cooldown > 0 {
                *cooldown -= 1;
                return Ok(None);
            }
            *cooldown = state.death_link_amount - 1;
        }

        let cause = reason.map_or_else(
            || format!("{} lost a battle", state.player_name),
            str::to_string,
        );
        let link = DeathLink::new(state.player_name.clone(), cause);
        let session = Arc::clone(&self.session);
        Ok(Some(self.runtime.spawn(async move {
            if let Err(err) = session.send_death_link(link).await {
                log::warn!("death link send failed: {err}");
            }
        })))
    }

    /// Read and clear the shared-failure mailbox.
    #[must_use]
    pub fn take_shared_failure(&self) -> Option<String> {
        let cause = std::mem::take(&mut *self.shared_failure.lock());
        (!cause.is_empty()).then_some(cause)
    }

    pub fn clear_shared_failure(&self) {
        self.shared_failure.lock().clear();
    }
}

impl Drop for SyncClient {
    fn drop(&mut self) {
        if let Some(pump) = self.event_pump.get_mut().take() {
            pump.abort();
        }
    }
}

/// Forward live server events until the stream closes or the client is gone.
/// Items below `replayed` were already applied from the history snapshot.
async fn pump_events(
    client: Weak<SyncClient>,
    mut events: UnboundedReceiver<ServerEvent>,
    replayed: usize,
) {
    while let Some(event) = events.recv().await {
        let Some(client) = client.upgrade() else {
            return;
        };
        match event {
            ServerEvent::ItemReceived(item) if item.index < replayed => {}
            ServerEvent::ItemReceived(item) => client.deliver_item(&item).await,
            ServerEvent::Message(message) => client.receive_message(&message),
            ServerEvent::DeathLink(link) => client.receive_shared_failure(&link),
        }
        client.retry_goal().await;
    }
    log::warn!("server event stream closed");
    if let Some(client) = client.upgrade() {
        client.set_status(ConnectionStatus::Disconnected);
    }
}
