//! Inbound client messages

use std::ops::ControlFlow;
use std::path::PathBuf;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use crate::model::{RepeatMode, SettingsUpdate};

use super::Bridge;

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct LoginRequest {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub code: Option<String>,
    pub local_folder: Option<PathBuf>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct PlayRequest {
    pub device_name: Option<String>,
    pub playlist_uri: Option<String>,
    pub track_uri: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
struct LocalFolderRequest {
    location: PathBuf,
}

/// `{"state": ...}` payload of the single-setting actions
#[derive(Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
struct StateRequest<T> {
    #[serde(default)]
    state: Option<T>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Login(LoginRequest),
    Logout,
    Play(PlayRequest),
    Pause,
    Next,
    Previous,
    RefreshDevices,
    RefreshPlaylists,
    Update(SettingsUpdate),
    LocalFolder(PathBuf),
    Quit,
    Unknown(String),
}

#[derive(Deserialize)]
struct Envelope {
    action: String,
    #[serde(default)]
    data: Value,
}

fn data_as<T: DeserializeOwned>(data: Value) -> serde_json::Result<T> {
    match data {
        Value::Null => serde_json::from_value(Value::Object(Default::default())),
        data => serde_json::from_value(data),
    }
}

impl Command {
    /// Parse a `{"action": ..., "data": ...}` text frame.
    pub fn parse(text: &str) -> serde_json::Result<Self> {
        let Envelope { action, data } = serde_json::from_str(text)?;

        let command = match action.as_str() {
            "login" => Command::Login(data_as(data)?),
            "logout" => Command::Logout,
            "play" => Command::Play(data_as(data)?),
            "pause" => Command::Pause,
            "next" => Command::Next,
            "previous" => Command::Previous,
            "refresh_devices" => Command::RefreshDevices,
            "refresh_playlists" => Command::RefreshPlaylists,
            "update" => Command::Update(data_as(data)?),
            "shuffle_state" => Command::Update(SettingsUpdate {
                shuffle_state: Some(data_as::<StateRequest<bool>>(data)?.state.unwrap_or(false)),
                ..Default::default()
            }),
            "repeat_state" => Command::Update(SettingsUpdate {
                repeat_state: Some(
                    data_as::<StateRequest<RepeatMode>>(data)?
                        .state
                        .unwrap_or(RepeatMode::Off),
                ),
                ..Default::default()
            }),
            "volume" => {
                let update: SettingsUpdate = data_as(data)?;
                if update.volume.is_none() {
                    return Err(serde::de::Error::missing_field("volume"));
                }
                Command::Update(SettingsUpdate { volume: update.volume, ..Default::default() })
            }
            "local_folder" => Command::LocalFolder(data_as::<LocalFolderRequest>(data)?.location),
            "quit" => Command::Quit,
            _ => Command::Unknown(action),
        };
        Ok(command)
    }
}

impl Bridge {
    /// Handle one text frame from a client. `Break` means the process should exit.
    pub async fn handle_message(&self, text: &str) -> ControlFlow<()> {
        let command = match Command::parse(text) {
            Ok(command) => command,
            Err(e) => {
                tracing::warn!(error = %e, "Ignoring malformed message");
                return ControlFlow::Continue(());
            }
        };
        tracing::debug!(command = ?command, "Received command");

        match command {
            Command::Login(request) => self.login(request).await,
            Command::Logout => self.logout().await,
            Command::LocalFolder(location) => self.artwork.set_media_folder(location).await,
            Command::Quit => return self.quit().await,
            Command::Unknown(action) => {
                tracing::warn!(action, "Ignoring unknown action");
            }
            command => {
                let Some(context) = self.context().await else {
                    tracing::warn!(command = ?command, "No active session, ignoring");
                    return ControlFlow::Continue(());
                };

                match command {
                    Command::Play(request) => {
                        let _ = self.play(&context, request).await;
                    }
                    Command::Pause => self.pause(&context).await,
                    Command::Next => self.next_track(&context).await,
                    Command::Previous => self.previous_track(&context).await,
                    Command::RefreshDevices => self.refresh_devices(&context).await,
                    Command::RefreshPlaylists => self.refresh_playlists(&context).await,
                    Command::Update(update) => self.update_settings(&context, update).await,
                    _ => {}
                }
            }
        }

        ControlFlow::Continue(())
    }
}
