//! Live multiworld session over the room server's JSON websocket protocol.
//!
//! Every frame carries a JSON array of packets tagged by `cmd`. The login
//! handshake runs inline; afterwards one task drains outbound packets into the
//! socket and another turns inbound packets into [`ServerEvent`]s.
use super::SyncError;
use super::protocol::{
    DeathLink, LogMessage, LogMessageKind, LoginFailure, LoginRequest, LoginSuccess, NetworkItem,
    RemoteSession, ServerEvent,
};
use crate::constants::{CLIENT_GOAL_STATUS, DEATH_LINK_TAG};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::Message;

const STORAGE_REPLY_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Serialize)]
struct NetworkVersion {
    major: u32,
    minor: u32,
    build: u32,
    class: &'static str,
}

#[derive(Debug, Serialize)]
struct DataOperation {
    operation: &'static str,
    value: Value,
}

#[derive(Debug, Serialize)]
#[serde(tag = "cmd")]
enum ClientPacket<'a> {
    Connect {
        password: &'a str,
        game: &'a str,
        name: &'a str,
        uuid: String,
        version: NetworkVersion,
        items_handling: u8,
        tags: Vec<&'a str>,
        slot_data: bool,
    },
    ConnectUpdate {
        tags: Vec<&'a str>,
    },
    LocationChecks {
        locations: &'a [i64],
    },
    Set {
        key: &'a str,
        default: Value,
        want_reply: bool,
        operations: Vec<DataOperation>,
    },
    Get {
        keys: Vec<&'a str>,
    },
    Bounce {
        tags: Vec<&'a str>,
        data: Value,
    },
    StatusUpdate {
        status: u8,
    },
}

#[derive(Debug, Clone, Deserialize)]
struct PlayerInfo {
    #[serde(default)]
    team: i64,
    slot: i64,
    #[serde(default)]
    alias: String,
    #[serde(default)]
    name: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ReceivedItem {
    item: i64,
    location: i64,
    player: i64,
}

#[derive(Debug, Clone, Deserialize)]
struct JsonMessagePart {
    #[serde(default)]
    text: String,
    #[serde(rename = "type", default)]
    kind: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "cmd")]
enum ServerPacket {
    Connected {
        #[serde(default)]
        team: i64,
        slot: i64,
        #[serde(default)]
        players: Vec<PlayerInfo>,
        #[serde(default)]
        missing_locations: Vec<i64>,
        #[serde(default)]
        checked_locations: Vec<i64>,
        #[serde(default)]
        slot_data: Map<String, Value>,
    },
    ConnectionRefused {
        #[serde(default)]
        errors: Vec<String>,
    },
    ReceivedItems {
        index: usize,
        items: Vec<ReceivedItem>,
    },
    RoomUpdate {
        #[serde(default)]
        checked_locations: Vec<i64>,
        #[serde(default)]
        players: Option<Vec<PlayerInfo>>,
    },
    #[serde(rename = "PrintJSON")]
    PrintJson {
        #[serde(rename = "type", default)]
        kind: Option<String>,
        #[serde(default)]
        data: Vec<JsonMessagePart>,
    },
    Bounced {
        #[serde(default)]
        tags: Vec<String>,
        #[serde(default)]
        data: Value,
    },
    Retrieved {
        keys: Map<String, Value>,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Default)]
struct RoomState {
    team: i64,
    slot: i64,
    player_name: Option<String>,
    players: HashMap<i64, String>,
    items: Vec<NetworkItem>,
    missing: BTreeSet<i64>,
}

impl RoomState {
    fn player_alias(&self, slot: i64) -> String {
        self.players
            .get(&slot)
            .cloned()
            .unwrap_or_else(|| format!("Player {slot}"))
    }

    fn set_players(&mut self, players: &[PlayerInfo]) {
        for player in players.iter().filter(|player| player.team == self.team) {
            let alias = if player.alias.is_empty() {
                player.name.clone()
            } else {
                player.alias.clone()
            };
            self.players.insert(player.slot, alias);
        }
    }

    fn storage_key(&self, key: &str) -> String {
        format!("pathshuffle_{}_{}_{key}", self.team, self.slot)
    }
}

#[derive(Debug)]
struct Shared {
    room: Mutex<RoomState>,
    outbound: Mutex<Option<UnboundedSender<String>>>,
    events_tx: Mutex<Option<UnboundedSender<ServerEvent>>>,
    storage_waiters: Mutex<HashMap<String, Vec<oneshot::Sender<Value>>>>,
}

impl Shared {
    fn emit(&self, event: ServerEvent) {
        if let Some(events) = self.events_tx.lock().as_ref()
            && events.send(event).is_err()
        {
            log::debug!("server event dropped; nobody is listening");
        }
    }

    /// Apply one inbound packet. Returns the handshake outcome for
    /// `Connected` and `ConnectionRefused`.
    fn handle(&self, packet: ServerPacket) -> Option<Result<LoginSuccess, LoginFailure>> {
        match packet {
            ServerPacket::Connected {
                team,
                slot,
                players,
                missing_locations,
                checked_locations,
                slot_data,
            } => {
                let mut room = self.room.lock();
                room.team = team;
                room.slot = slot;
                room.set_players(&players);
                room.missing = missing_locations.into_iter().collect();
                for location in &checked_locations {
                    room.missing.remove(location);
                }
                let player_name = room.player_alias(slot);
                room.player_name = Some(player_name.clone());
                Some(Ok(LoginSuccess {
                    player_name,
                    slot_data,
                }))
            }
            ServerPacket::ConnectionRefused { errors } => Some(Err(LoginFailure { errors })),
            ServerPacket::ReceivedItems { index, items } => {
                self.receive_items(index, &items);
                None
            }
            ServerPacket::RoomUpdate {
                checked_locations,
                players,
            } => {
                let mut room = self.room.lock();
                for location in &checked_locations {
                    room.missing.remove(location);
                }
                if let Some(players) = players {
                    room.set_players(&players);
                }
                None
            }
            ServerPacket::PrintJson { kind, data } => {
                let kind = match kind.as_deref() {
                    Some("ItemSend") => LogMessageKind::ItemSend,
                    Some("Chat" | "ServerChat") => LogMessageKind::Chat,
                    Some("Join") => LogMessageKind::Join,
                    Some("Part") => LogMessageKind::Part,
                    _ => LogMessageKind::Other,
                };
                let text = self.render(&data);
                self.emit(ServerEvent::Message(LogMessage::new(kind, text)));
                None
            }
            ServerPacket::Bounced { tags, data } => {
                if tags.iter().any(|tag| tag == DEATH_LINK_TAG) {
                    match serde_json::from_value::<DeathLink>(data) {
                        Ok(link) => self.emit(ServerEvent::DeathLink(link)),
                        Err(err) => log::warn!("malformed death link: {err}"),
                    }
                }
                None
            }
            ServerPacket::Retrieved { keys } => {
                let mut waiters = self.storage_waiters.lock();
                for (key, value) in keys {
                    for waiter in waiters.remove(&key).unwrap_or_default() {
                        let _ = waiter.send(value.clone());
                    }
                }
                None
            }
            ServerPacket::Other => None,
        }
    }

    /// Append the unseen tail of a `ReceivedItems` batch to the history.
    fn receive_items(&self, index: usize, items: &[ReceivedItem]) {
        let fresh: Vec<NetworkItem> = {
            let mut room = self.room.lock();
            let mut fresh = Vec::new();
            for (offset, received) in items.iter().enumerate() {
                let position = index + offset;
                if position < room.items.len() {
                    continue;
                }
                if position > room.items.len() {
                    log::warn!(
                        "item history gap: got index {position}, have {}",
                        room.items.len()
                    );
                    break;
                }
                let item = NetworkItem {
                    index: position,
                    item_id: received.item,
                    location: received.location,
                    sender: room.player_alias(received.player),
                };
                room.items.push(item.clone());
                fresh.push(item);
            }
            fresh
        };
        for item in fresh {
            self.emit(ServerEvent::ItemReceived(item));
        }
    }

    fn render(&self, parts: &[JsonMessagePart]) -> String {
        let room = self.room.lock();
        parts
            .iter()
            .map(|part| match part.kind.as_deref() {
                Some("player_id") => part
                    .text
                    .parse()
                    .map_or_else(|_| part.text.clone(), |slot| room.player_alias(slot)),
                _ => part.text.clone(),
            })
            .collect()
    }

    fn send(&self, packets: &[ClientPacket<'_>]) -> Result<(), SyncError> {
        let text = serde_json::to_string(packets)
            .map_err(|err| SyncError::Transport(err.to_string()))?;
        let outbound = self.outbound.lock();
        let sender = outbound.as_ref().ok_or(SyncError::NotConnected)?;
        sender.send(text).map_err(|_| SyncError::Closed)
    }

    fn close(&self) {
        self.outbound.lock().take();
        self.events_tx.lock().take();
        self.storage_waiters.lock().clear();
    }
}

/// Session against a live room server.
#[derive(Debug)]
pub struct ArchipelagoSession {
    url: String,
    shared: Arc<Shared>,
    events_rx: Mutex<Option<UnboundedReceiver<ServerEvent>>>,
}

impl ArchipelagoSession {
    /// `address` is `host:port`, optionally prefixed with `ws://` or `wss://`.
    #[must_use]
    pub fn new(address: &str) -> Self {
        let url = if address.starts_with("ws://") || address.starts_with("wss://") {
            address.to_string()
        } else {
            format!("ws://{address}")
        };
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            url,
            shared: Arc::new(Shared {
                room: Mutex::new(RoomState::default()),
                outbound: Mutex::new(None),
                events_tx: Mutex::new(Some(events_tx)),
                storage_waiters: Mutex::new(HashMap::new()),
            }),
            events_rx: Mutex::new(Some(events_rx)),
        }
    }

    fn storage_key(&self, key: &str) -> String {
        self.shared.room.lock().storage_key(key)
    }
}

fn decode(text: &str) -> Vec<ServerPacket> {
    let values: Vec<Value> = match serde_json::from_str(text) {
        Ok(values) => values,
        Err(err) => {
            log::warn!("unreadable frame from server: {err}");
            return Vec::new();
        }
    };
    values
        .into_iter()
        .filter_map(|value| match serde_json::from_value(value) {
            Ok(packet) => Some(packet),
            Err(err) => {
                log::debug!("skipping packet: {err}");
                None
            }
        })
        .collect()
}

fn unix_time() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0.0, |elapsed| elapsed.as_secs_f64())
}

#[async_trait]
impl RemoteSession for ArchipelagoSession {
    async fn login(&self, request: &LoginRequest) -> Result<LoginSuccess, LoginFailure> {
        let failure = |err: &dyn std::fmt::Display| LoginFailure::new(err.to_string());
        let (stream, _) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(|err| failure(&err))?;
        let (mut sink, mut source) = stream.split();

        let (major, minor, build) = request.version;
        let connect = [ClientPacket::Connect {
            password: &request.password,
            game: &request.game,
            name: &request.slot,
            uuid: format!("pathshuffle-{}", request.slot),
            version: NetworkVersion {
                major,
                minor,
                build,
                class: "Version",
            },
            items_handling: request.items_handling,
            tags: Vec::new(),
            slot_data: true,
        }];
        let text = serde_json::to_string(&connect).map_err(|err| failure(&err))?;
        sink.send(Message::Text(text))
            .await
            .map_err(|err| failure(&err))?;

        let success = loop {
            let frame = match source.next().await {
                Some(frame) => frame.map_err(|err| failure(&err))?,
                None => return Err(LoginFailure::new("connection closed during handshake")),
            };
            let Message::Text(text) = frame else {
                continue;
            };
            let mut outcome = None;
            for packet in decode(&text) {
                if let Some(result) = self.shared.handle(packet) {
                    outcome = Some(result);
                }
            }
            if let Some(result) = outcome {
                break result?;
            }
        };

        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();
        *self.shared.outbound.lock() = Some(outbound_tx);

        tokio::spawn(async move {
            while let Some(text) = outbound_rx.recv().await {
                if let Err(err) = sink.send(Message::Text(text)).await {
                    log::warn!("websocket send failed: {err}");
                    break;
                }
            }
        });

        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            while let Some(frame) = source.next().await {
                match frame {
                    Ok(Message::Text(text)) => {
                        for packet in decode(&text) {
                            shared.handle(packet);
                        }
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(err) => {
                        log::warn!("websocket receive failed: {err}");
                        break;
                    }
                }
            }
            shared.close();
        });

        Ok(success)
    }

    fn active_player(&self) -> Option<String> {
        self.shared.room.lock().player_name.clone()
    }

    fn take_events(&self) -> Option<UnboundedReceiver<ServerEvent>> {
        self.events_rx.lock().take()
    }

    fn received_items(&self) -> Vec<NetworkItem> {
        self.shared.room.lock().items.clone()
    }

    async fn complete_location_checks(&self, locations: &[i64]) -> Result<(), SyncError> {
        self.shared
            .send(&[ClientPacket::LocationChecks { locations }])?;
        let mut room = self.shared.room.lock();
        for location in locations {
            room.missing.remove(location);
        }
        Ok(())
    }

    async fn missing_location_count(&self) -> Result<usize, SyncError> {
        Ok(self.shared.room.lock().missing.len())
    }

    async fn storage_initialize(&self, key: &str, default: Value) -> Result<(), SyncError> {
        let key = self.storage_key(key);
        self.shared.send(&[ClientPacket::Set {
            key: &key,
            default,
            want_reply: false,
            operations: vec![DataOperation {
                operation: "default",
                value: Value::Null,
            }],
        }])
    }

    async fn storage_get(&self, key: &str) -> Result<Value, SyncError> {
        let key = self.storage_key(key);
        let (reply_tx, reply_rx) = oneshot::channel();
        self.shared
            .storage_waiters
            .lock()
            .entry(key.clone())
            .or_default()
            .push(reply_tx);
        self.shared.send(&[ClientPacket::Get {
            keys: vec![key.as_str()],
        }])?;
        match tokio::time::timeout(STORAGE_REPLY_TIMEOUT, reply_rx).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => Err(SyncError::Closed),
            Err(_) => Err(SyncError::Transport(format!("no reply for storage key {key}"))),
        }
    }

    async fn storage_set(&self, key: &str, value: Value) -> Result<(), SyncError> {
        let key = self.storage_key(key);
        self.shared.send(&[ClientPacket::Set {
            key: &key,
            default: Value::Null,
            want_reply: false,
            operations: vec![DataOperation {
                operation: "replace",
                value,
            }],
        }])
    }

    async fn enable_death_link(&self) -> Result<(), SyncError> {
        self.shared.send(&[ClientPacket::ConnectUpdate {
            tags: vec![DEATH_LINK_TAG],
        }])
    }

    async fn send_death_link(&self, link: DeathLink) -> Result<(), SyncError> {
        let link = DeathLink {
            time: unix_time(),
            ..link
        };
        self.shared.send(&[ClientPacket::Bounce {
            tags: vec![DEATH_LINK_TAG],
            data: serde_json::to_value(link)
                .map_err(|err| SyncError::Transport(err.to_string()))?,
        }])
    }

    async fn send_goal_complete(&self) -> Result<(), SyncError> {
        self.shared.send(&[ClientPacket::StatusUpdate {
            status: CLIENT_GOAL_STATUS,
        }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn shared() -> (Shared, UnboundedReceiver<ServerEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let shared = Shared {
            room: Mutex::new(RoomState::default()),
            outbound: Mutex::new(None),
            events_tx: Mutex::new(Some(events_tx)),
            storage_waiters: Mutex::new(HashMap::new()),
        };
        (shared, events_rx)
    }

    #[test]
    fn client_packets_are_tagged_by_cmd() {
        let packet = ClientPacket::LocationChecks { locations: &[9216] };
        let encoded = serde_json::to_value([packet]).unwrap();
        assert_eq!(encoded, json!([{ "cmd": "LocationChecks", "locations": [9216] }]));
    }

    #[test]
    fn connected_then_items_in_one_frame() {
        let (shared, mut events) = shared();
        let frame = json!([
            {
                "cmd": "Connected",
                "team": 0,
                "slot": 2,
                "players": [
                    { "team": 0, "slot": 1, "alias": "Ally", "name": "ally" },
                    { "team": 0, "slot": 2, "alias": "Hero", "name": "hero" }
                ],
                "missing_locations": [9216, 9217],
                "checked_locations": [9217],
                "slot_data": { "rng_seed": "abc" },
                "hint_points": 0
            },
            {
                "cmd": "ReceivedItems",
                "index": 0,
                "items": [{ "item": 9221, "location": 4, "player": 1, "flags": 1 }]
            }
        ])
        .to_string();

        let outcomes: Vec<_> = decode(&frame)
            .into_iter()
            .filter_map(|packet| shared.handle(packet))
            .collect();
        assert_eq!(outcomes.len(), 1);
        let success = outcomes.into_iter().next().unwrap().unwrap();
        assert_eq!(success.player_name, "Hero");
        assert_eq!(success.slot_data["rng_seed"], "abc");
        assert_eq!(shared.room.lock().missing.len(), 1);

        let Ok(ServerEvent::ItemReceived(item)) = events.try_recv() else {
            panic!("expected an item event");
        };
        assert_eq!(item.index, 0);
        assert_eq!(item.sender, "Ally");
    }

    #[test]
    fn resent_items_are_not_emitted_twice() {
        let (shared, mut events) = shared();
        let items = [
            ReceivedItem { item: 1, location: 0, player: 0 },
            ReceivedItem { item: 2, location: 0, player: 0 },
        ];
        shared.receive_items(0, &items[..1]);
        shared.receive_items(0, &items);
        assert_eq!(shared.room.lock().items.len(), 2);
        let mut indices = Vec::new();
        while let Ok(ServerEvent::ItemReceived(item)) = events.try_recv() {
            indices.push(item.index);
        }
        assert_eq!(indices, vec![0, 1]);
    }

    #[test]
    fn refused_login_carries_errors() {
        let (shared, _events) = shared();
        let packets = decode(r#"[{"cmd":"ConnectionRefused","errors":["InvalidPassword"]}]"#);
        let outcome = packets.into_iter().find_map(|packet| shared.handle(packet));
        assert_eq!(
            outcome,
            Some(Err(LoginFailure::new("InvalidPassword")))
        );
    }

    #[test]
    fn bounced_death_link_becomes_event() {
        let (shared, mut events) = shared();
        for packet in decode(
            r#"[{"cmd":"Bounced","tags":["DeathLink"],"data":{"time":1.5,"source":"Ally","cause":"Ally fell"}},
                {"cmd":"Bounced","tags":["Other"],"data":{}}]"#,
        ) {
            shared.handle(packet);
        }
        let Ok(ServerEvent::DeathLink(link)) = events.try_recv() else {
            panic!("expected a death link");
        };
        assert_eq!(link.source, "Ally");
        assert_eq!(link.cause.as_deref(), Some("Ally fell"));
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn item_send_messages_render_player_names() {
        let (shared, mut events) = shared();
        shared.room.lock().players.insert(3, "Ally".into());
        for packet in decode(
            r#"[{"cmd":"PrintJSON","type":"ItemSend","data":[{"type":"player_id","text":"3"},{"text":" sent a thing"}]}]"#,
        ) {
            shared.handle(packet);
        }
        let Ok(ServerEvent::Message(message)) = events.try_recv() else {
            panic!("expected a message");
        };
        assert!(message.is_item_send());
        assert_eq!(message.to_string(), "Ally sent a thing");
    }

    #[test]
    fn unknown_packets_are_ignored() {
        let packets = decode(r#"[{"cmd":"RoomInfo","version":{}},{"cmd":"DataPackage"}]"#);
        assert!(packets.iter().all(|packet| matches!(packet, ServerPacket::Other)));
    }
}
