//! Core type definitions shared by the session, poller and relay

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};

/// Repeat mode, named the way the Web API names it.
///
/// Clients may also send their own labels (`Song`, `Enabled`, `Disabled`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepeatMode {
    #[serde(alias = "Song")]
    Track,
    #[serde(alias = "Enabled")]
    Context,
    #[serde(alias = "Disabled")]
    Off,
}

impl From<rspotify::model::RepeatState> for RepeatMode {
    fn from(state: rspotify::model::RepeatState) -> Self {
        match state {
            rspotify::model::RepeatState::Off => RepeatMode::Off,
            rspotify::model::RepeatState::Track => RepeatMode::Track,
            rspotify::model::RepeatState::Context => RepeatMode::Context,
        }
    }
}

impl From<RepeatMode> for rspotify::model::RepeatState {
    fn from(mode: RepeatMode) -> Self {
        match mode {
            RepeatMode::Off => rspotify::model::RepeatState::Off,
            RepeatMode::Track => rspotify::model::RepeatState::Track,
            RepeatMode::Context => rspotify::model::RepeatState::Context,
        }
    }
}

/// A playback device known to the remote API
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceInfo {
    pub id: Option<String>,
    pub name: String,
}

/// Device display name to device id. Duplicate names: last write wins.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct DeviceTable(BTreeMap<String, String>);

impl DeviceTable {
    pub fn from_devices(devices: impl IntoIterator<Item = DeviceInfo>) -> Self {
        let mut table = BTreeMap::new();
        for device in devices {
            if let Some(id) = device.id {
                table.insert(device.name, id);
            }
        }
        Self(table)
    }

    pub fn id_for(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn names(&self) -> Vec<String> {
        self.0.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

const NO_PLAYLISTS_KEY: &str = "0";
const NO_PLAYLISTS_VALUE: &str = "No Playlists";

/// Playlist name to playlist URI.
///
/// An account without playlists is represented by the single entry
/// `{"0": "No Playlists"}`, which callers treat as empty.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct PlaylistTable(BTreeMap<String, String>);

impl PlaylistTable {
    pub fn from_entries(entries: impl IntoIterator<Item = (String, String)>) -> Self {
        let table: BTreeMap<String, String> = entries.into_iter().collect();
        if table.is_empty() {
            Self::no_playlists()
        } else {
            Self(table)
        }
    }

    pub fn no_playlists() -> Self {
        Self(BTreeMap::from([(
            NO_PLAYLISTS_KEY.to_string(),
            NO_PLAYLISTS_VALUE.to_string(),
        )]))
    }

    pub fn is_empty(&self) -> bool {
        self.0.len() == 1
            && self.0.get(NO_PLAYLISTS_KEY).map(String::as_str) == Some(NO_PLAYLISTS_VALUE)
    }

    /// Number of real playlists, zero for the sentinel table
    pub fn len(&self) -> usize {
        if self.is_empty() { 0 } else { self.0.len() }
    }
}

impl Default for PlaylistTable {
    fn default() -> Self {
        Self::no_playlists()
    }
}

/// One page of the user's playlists as `(name, uri)` pairs
#[derive(Clone, Debug, Default)]
pub struct PlaylistPage {
    pub items: Vec<(String, String)>,
    pub has_next: bool,
}

/// The logged in user, as shown on connect
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UserProfile {
    pub name: Option<String>,
    pub image_url: Option<String>,
}

/// What to start playing
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PlayTarget {
    Resume,
    Context(String),
    Track(String),
}

impl PlayTarget {
    /// Playlist wins over track, matching what clients expect from the picker.
    pub fn from_uris(playlist_uri: Option<&str>, track_uri: Option<&str>) -> Self {
        match (playlist_uri, track_uri) {
            (Some(playlist), _) => PlayTarget::Context(playlist.to_string()),
            (None, Some(track)) => PlayTarget::Track(track.to_string()),
            (None, None) => PlayTarget::Resume,
        }
    }
}

/// Partial shuffle/repeat/volume state. Used both for the `update` command and
/// for the `update` broadcast, where only changed fields are present.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingsUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shuffle_state: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repeat_state: Option<RepeatMode>,
    #[serde(
        default,
        deserialize_with = "clamped_volume",
        skip_serializing_if = "Option::is_none"
    )]
    pub volume: Option<u8>,
}

/// Accepts any JSON number and clamps it to 0..=100.
fn clamped_volume<'de, D>(deserializer: D) -> Result<Option<u8>, D::Error>
where
    D: Deserializer<'de>,
{
    let volume = Option::<f64>::deserialize(deserializer)?;
    Ok(volume.map(|v| v.round().clamp(0.0, 100.0) as u8))
}

impl SettingsUpdate {
    pub fn is_empty(&self) -> bool {
        self.shuffle_state.is_none() && self.repeat_state.is_none() && self.volume.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeat_mode_accepts_client_labels() {
        let mode: RepeatMode = serde_json::from_str(r#""Song""#).unwrap();
        assert_eq!(mode, RepeatMode::Track);
        let mode: RepeatMode = serde_json::from_str(r#""Enabled""#).unwrap();
        assert_eq!(mode, RepeatMode::Context);
        let mode: RepeatMode = serde_json::from_str(r#""off""#).unwrap();
        assert_eq!(mode, RepeatMode::Off);
        assert_eq!(serde_json::to_string(&RepeatMode::Context).unwrap(), r#""context""#);
    }

    #[test]
    fn device_table_last_write_wins() {
        let table = DeviceTable::from_devices([
            DeviceInfo { id: Some("a".into()), name: "Desk".into() },
            DeviceInfo { id: Some("b".into()), name: "Desk".into() },
            DeviceInfo { id: None, name: "Ghost".into() },
        ]);
        assert_eq!(table.id_for("Desk"), Some("b"));
        assert_eq!(table.id_for("Ghost"), None);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn empty_playlist_table_is_sentinel() {
        let table = PlaylistTable::from_entries(Vec::new());
        assert!(table.is_empty());
        assert_eq!(table.len(), 0);
        assert_eq!(
            serde_json::to_value(&table).unwrap(),
            serde_json::json!({"0": "No Playlists"})
        );
    }

    #[test]
    fn play_target_prefers_playlist() {
        assert_eq!(
            PlayTarget::from_uris(Some("spotify:playlist:1"), Some("spotify:track:2")),
            PlayTarget::Context("spotify:playlist:1".into())
        );
        assert_eq!(
            PlayTarget::from_uris(None, Some("spotify:track:2")),
            PlayTarget::Track("spotify:track:2".into())
        );
        assert_eq!(PlayTarget::from_uris(None, None), PlayTarget::Resume);
    }

    #[test]
    fn settings_update_skips_unset_fields() {
        let update = SettingsUpdate { shuffle_state: Some(true), ..Default::default() };
        assert_eq!(
            serde_json::to_value(&update).unwrap(),
            serde_json::json!({"shuffle_state": true})
        );
        assert!(SettingsUpdate::default().is_empty());
    }

    #[test]
    fn settings_update_clamps_out_of_range_volume() {
        let update: SettingsUpdate =
            serde_json::from_str(r#"{"volume":300,"shuffle_state":true}"#).unwrap();
        assert_eq!(update.volume, Some(100));
        assert_eq!(update.shuffle_state, Some(true));

        let update: SettingsUpdate = serde_json::from_str(r#"{"volume":-5}"#).unwrap();
        assert_eq!(update.volume, Some(0));

        let update: SettingsUpdate = serde_json::from_str(r#"{"volume":42.6}"#).unwrap();
        assert_eq!(update.volume, Some(43));

        let update: SettingsUpdate = serde_json::from_str(r#"{"volume":null}"#).unwrap();
        assert_eq!(update.volume, None);
    }
}
