//! Playback payloads and the snapshot the poller diffs against

use rspotify::model::{CurrentPlaybackContext, CurrentlyPlayingContext, Image, PlayableItem};
use rspotify::prelude::Id;
use serde::Serialize;

use super::types::{RepeatMode, SettingsUpdate};

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ImageInfo {
    pub url: String,
}

impl From<&Image> for ImageInfo {
    fn from(image: &Image) -> Self {
        Self { url: image.url.clone() }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct AlbumInfo {
    pub name: String,
    pub images: Vec<ImageInfo>,
}

/// Track payload sent with `started_playing` and `song_changed`
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct TrackInfo {
    pub id: Option<String>,
    pub uri: String,
    pub name: String,
    pub artists: Vec<String>,
    pub album: AlbumInfo,
    pub duration_ms: u32,
    pub is_local: bool,
}

impl TrackInfo {
    pub fn from_item(item: &PlayableItem) -> Option<Self> {
        match item {
            PlayableItem::Track(track) => {
                let artists: Vec<String> = track.artists.iter().map(|a| a.name.clone()).collect();
                let duration_ms = track.duration.num_milliseconds() as u32;

                // Local files carry no id; the API addresses them as
                // spotify:local:artist:album:title:seconds
                let uri = match track.id.as_ref() {
                    Some(id) => id.uri(),
                    None => format!(
                        "spotify:local:{}:{}:{}:{}",
                        artists.first().map(String::as_str).unwrap_or_default(),
                        track.album.name,
                        track.name,
                        duration_ms / 1000
                    ),
                };

                Some(Self {
                    id: track.id.as_ref().map(|id| id.id().to_string()),
                    uri,
                    name: track.name.clone(),
                    artists,
                    album: AlbumInfo {
                        name: track.album.name.clone(),
                        images: track.album.images.iter().map(ImageInfo::from).collect(),
                    },
                    duration_ms,
                    is_local: track.is_local,
                })
            }
            PlayableItem::Episode(episode) => Some(Self {
                id: Some(episode.id.id().to_string()),
                uri: episode.id.uri(),
                name: episode.name.clone(),
                artists: vec![episode.show.name.clone()],
                album: AlbumInfo {
                    name: episode.show.name.clone(),
                    images: episode.images.iter().map(ImageInfo::from).collect(),
                },
                duration_ms: episode.duration.num_milliseconds() as u32,
                is_local: false,
            }),
            PlayableItem::Unknown(_) => None,
        }
    }

    /// Identity used to detect track changes; local files have no id.
    pub fn key(&self) -> &str {
        self.id.as_deref().unwrap_or(&self.uri)
    }

    pub fn replace_artwork(&mut self, url: String) {
        self.album.images = vec![ImageInfo { url }];
    }
}

/// Result of a "currently playing" query
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct NowPlaying {
    pub is_playing: bool,
    pub progress_ms: Option<u32>,
    pub item: Option<TrackInfo>,
}

impl NowPlaying {
    pub fn from_context(context: &CurrentlyPlayingContext) -> Self {
        Self {
            is_playing: context.is_playing,
            progress_ms: context.progress.map(|d| d.num_milliseconds() as u32),
            item: context.item.as_ref().and_then(TrackInfo::from_item),
        }
    }

    pub fn track_key(&self) -> Option<String> {
        self.item.as_ref().map(|track| track.key().to_string())
    }
}

/// Result of a full "current playback" query
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PlaybackState {
    pub device_name: String,
    pub device_id: Option<String>,
    pub is_playing: bool,
    pub shuffle_state: bool,
    pub repeat_state: Option<RepeatMode>,
    pub volume: Option<u8>,
    pub track: Option<TrackInfo>,
}

impl PlaybackState {
    pub fn from_context(context: &CurrentPlaybackContext) -> Self {
        Self {
            device_name: context.device.name.clone(),
            device_id: context.device.id.clone(),
            is_playing: context.is_playing,
            shuffle_state: context.shuffle_state,
            repeat_state: Some(context.repeat_state.into()),
            volume: context.device.volume_percent.map(|v| v.min(100) as u8),
            track: context.item.as_ref().and_then(TrackInfo::from_item),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlayStateChange {
    Started,
    Stopped,
}

/// What a currently-playing tick observed, relative to the snapshot
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NowPlayingChanges {
    pub play_state: Option<PlayStateChange>,
    pub track_changed: bool,
}

impl NowPlayingChanges {
    pub fn is_empty(&self) -> bool {
        self.play_state.is_none() && !self.track_changed
    }
}

/// Last observed playback state.
///
/// Every `observe_*` method computes the full set of new values before
/// committing any of them, so a snapshot never mixes two poll cycles.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PlaybackSnapshot {
    pub current_device_name: Option<String>,
    pub current_device_id: Option<String>,
    pub current_track: Option<String>,
    pub is_playing: Option<bool>,
    pub shuffle_state: Option<bool>,
    pub repeat_state: Option<RepeatMode>,
    pub volume: Option<u8>,
    primed: bool,
}

impl PlaybackSnapshot {
    /// Fresh snapshot for a new connection. Not primed: the first
    /// currently-playing tick only records a baseline.
    pub fn from_playback(state: Option<&PlaybackState>) -> Self {
        match state {
            Some(state) => Self {
                current_device_name: Some(state.device_name.clone()),
                current_device_id: state.device_id.clone(),
                current_track: state.track.as_ref().map(|t| t.key().to_string()),
                is_playing: Some(state.is_playing),
                shuffle_state: Some(state.shuffle_state),
                repeat_state: state.repeat_state,
                volume: state.volume,
                primed: false,
            },
            None => Self::default(),
        }
    }

    pub fn is_playing(&self) -> bool {
        self.is_playing == Some(true)
    }

    pub fn observe_now_playing(&mut self, now: &NowPlaying) -> NowPlayingChanges {
        let track_key = now.track_key();

        if !self.primed {
            self.primed = true;
            self.is_playing = Some(now.is_playing);
            if track_key.is_some() {
                self.current_track = track_key;
            }
            return NowPlayingChanges::default();
        }

        let mut next = self.clone();
        let mut changes = NowPlayingChanges::default();

        if self.is_playing != Some(now.is_playing) {
            next.is_playing = Some(now.is_playing);
            changes.play_state = Some(if now.is_playing {
                PlayStateChange::Started
            } else {
                PlayStateChange::Stopped
            });
        }

        if track_key.is_some() && track_key != self.current_track {
            next.current_track = track_key;
            changes.track_changed = true;
        }

        *self = next;
        changes
    }

    /// Diff shuffle, repeat and volume. Device changes are recorded silently.
    pub fn observe_settings(&mut self, state: &PlaybackState) -> SettingsUpdate {
        let mut next = self.clone();
        let mut update = SettingsUpdate::default();

        if self.shuffle_state != Some(state.shuffle_state) {
            next.shuffle_state = Some(state.shuffle_state);
            update.shuffle_state = Some(state.shuffle_state);
        }

        if state.repeat_state.is_some() && self.repeat_state != state.repeat_state {
            next.repeat_state = state.repeat_state;
            update.repeat_state = state.repeat_state;
        }

        if state.volume.is_some() && self.volume != state.volume {
            next.volume = state.volume;
            update.volume = state.volume;
        }

        if !state.device_name.is_empty() {
            next.current_device_name = Some(state.device_name.clone());
            next.current_device_id = state.device_id.clone();
        }

        *self = next;
        update
    }
}
