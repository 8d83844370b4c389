//! Fan-out of bridge events to every connected WebSocket client

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::Message;

use crate::error::RemoteError;
use crate::model::{DeviceTable, NowPlaying, PlaylistTable, RepeatMode, SettingsUpdate};

/// Outbound messages buffered per client before it counts as dead.
const CLIENT_QUEUE: usize = 32;

pub type ClientId = u64;

/// Full state sent on connect
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ConnectInfo {
    pub name: Option<String>,
    pub user_image_url: String,
    pub devices: DeviceTable,
    pub current_device: Option<String>,
    pub is_playing: bool,
    pub shuffle_state: Option<bool>,
    pub repeat_state: Option<RepeatMode>,
    pub volume: Option<u8>,
    pub playlists: PlaylistTable,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    SpotifyConnect(Box<ConnectInfo>),
    StartedPlaying(NowPlaying),
    SongChanged(NowPlaying),
    PlayingStopped,
    Devices(Vec<String>),
    Playlists(PlaylistTable),
    Update(SettingsUpdate),
    Error(RemoteError),
}

impl Event {
    pub fn action(&self) -> &'static str {
        match self {
            Event::SpotifyConnect(_) => "spotify_connect",
            Event::StartedPlaying(_) => "started_playing",
            Event::SongChanged(_) => "song_changed",
            Event::PlayingStopped => "playing_stopped",
            Event::Devices(_) => "devices",
            Event::Playlists(_) => "playlists",
            Event::Update(_) => "update",
            Event::Error(_) => "error",
        }
    }

    fn data(&self) -> serde_json::Result<Value> {
        match self {
            Event::SpotifyConnect(info) => serde_json::to_value(info),
            Event::StartedPlaying(now) | Event::SongChanged(now) => serde_json::to_value(now),
            Event::PlayingStopped => Ok(Value::Null),
            Event::Devices(names) => Ok(serde_json::json!({ "devices": names })),
            Event::Playlists(table) => serde_json::to_value(table),
            Event::Update(update) => serde_json::to_value(update),
            Event::Error(error) => serde_json::to_value(error),
        }
    }

    /// `{"action": ..., "data": ...}`, without `data` when there is nothing to send.
    pub fn to_json(&self) -> serde_json::Result<String> {
        let data = self.data()?;
        serde_json::to_string(&envelope(self.action(), data))
    }
}

fn envelope(action: &str, data: Value) -> Value {
    let empty = match &data {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    };

    if empty {
        serde_json::json!({ "action": action })
    } else {
        serde_json::json!({ "action": action, "data": data })
    }
}

/// Registered clients and their outbound queues.
#[derive(Clone, Default)]
pub struct Relay {
    clients: Arc<Mutex<HashMap<ClientId, mpsc::Sender<Message>>>>,
    next_id: Arc<AtomicU64>,
}

impl Relay {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self) -> (ClientId, mpsc::Receiver<Message>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(CLIENT_QUEUE);
        self.clients.lock().await.insert(id, tx);
        tracing::debug!(client = id, "Client registered");
        (id, rx)
    }

    pub async fn unregister(&self, id: ClientId) {
        if self.clients.lock().await.remove(&id).is_some() {
            tracing::debug!(client = id, "Client unregistered");
        }
    }

    pub async fn client_count(&self) -> usize {
        self.clients.lock().await.len()
    }

    /// Send to one client only. Used to greet a newly connected client.
    pub async fn send_to(&self, id: ClientId, event: &Event) {
        let Some(message) = Self::encode(event) else {
            return;
        };
        let mut clients = self.clients.lock().await;
        if let Some(tx) = clients.get(&id) {
            if tx.try_send(message).is_err() {
                tracing::warn!(client = id, action = event.action(), "Client unreachable, dropping");
                clients.remove(&id);
            }
        }
    }

    /// Deliver to every client without waiting on any of them. A client whose
    /// queue is full or closed is dropped from the set.
    pub async fn broadcast(&self, event: Event) {
        let Some(message) = Self::encode(&event) else {
            return;
        };

        let mut clients = self.clients.lock().await;
        tracing::debug!(action = event.action(), clients = clients.len(), "Broadcasting");

        clients.retain(|id, tx| match tx.try_send(message.clone()) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(client = id, error = %e, "Dropping client");
                false
            }
        });
    }

    /// Send Close to every client and forget them all.
    pub async fn close_all(&self) {
        let mut clients = self.clients.lock().await;
        tracing::info!(clients = clients.len(), "Closing all clients");
        for tx in clients.values() {
            let _ = tx.try_send(Message::Close(None));
        }
        clients.clear();
    }

    fn encode(event: &Event) -> Option<Message> {
        match event.to_json() {
            Ok(text) => Some(Message::text(text)),
            Err(e) => {
                tracing::error!(action = event.action(), error = %e, "Failed to serialize event");
                None
            }
        }
    }
}
