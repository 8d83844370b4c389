//! Spotify API session: the trait the poller and router talk to, and its
//! rspotify-backed implementation

use std::sync::Arc;

use async_trait::async_trait;
use rspotify::{
    model::{
        AlbumId, ArtistId, EpisodeId, PlayContextId, PlayableId, PlaylistId, ShowId, TrackId,
    },
    prelude::*,
    AuthCodeSpotify, ClientError,
};

use crate::auth::Credentials;
use crate::error::{Error, RemoteError};

use super::playback::{NowPlaying, PlaybackState};
use super::types::{
    DeviceInfo, DeviceTable, PlayTarget, PlaylistPage, PlaylistTable, RepeatMode, UserProfile,
};

pub const PLAYLIST_PAGE_SIZE: u32 = 50;

/// One authenticated handle to the remote API.
///
/// Query methods that feed the poller return `None` instead of failing; the
/// failure is logged and the next tick tries again.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MusicSession: Send + Sync {
    async fn profile(&self) -> Result<UserProfile, RemoteError>;
    async fn current_playback(&self) -> Option<PlaybackState>;
    async fn currently_playing(&self) -> Option<NowPlaying>;
    async fn devices(&self) -> Result<Vec<DeviceInfo>, RemoteError>;
    async fn playlist_page(&self, offset: u32, limit: u32) -> Result<PlaylistPage, RemoteError>;
    async fn start_playback(
        &self,
        device_id: Option<String>,
        target: PlayTarget,
    ) -> Result<(), RemoteError>;
    async fn pause(&self) -> Result<(), RemoteError>;
    async fn next_track(&self) -> Result<(), RemoteError>;
    async fn previous_track(&self) -> Result<(), RemoteError>;
    async fn set_shuffle(&self, state: bool) -> Result<(), RemoteError>;
    async fn set_repeat(&self, state: RepeatMode) -> Result<(), RemoteError>;
    async fn set_volume(&self, volume: u8) -> Result<(), RemoteError>;
    async fn refresh_auth(&self) -> Result<(), RemoteError>;
}

/// A freshly authenticated session together with the credentials (and
/// tokens) that should be persisted for next time.
pub type Connected = (Arc<dyn MusicSession>, Credentials);

/// Exchanges credentials for a session.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn connect(
        &self,
        credentials: Credentials,
        code: Option<String>,
    ) -> Result<Connected, Error>;
}

/// Device table for the session; last write wins on duplicate names.
pub async fn fetch_devices(session: &dyn MusicSession) -> Result<DeviceTable, RemoteError> {
    Ok(DeviceTable::from_devices(session.devices().await?))
}

/// Every playlist of the user, fetched in pages until the API reports no next page.
pub async fn fetch_all_playlists(session: &dyn MusicSession) -> Result<PlaylistTable, RemoteError> {
    let mut entries = Vec::new();
    let mut offset = 0;

    loop {
        let page = session.playlist_page(offset, PLAYLIST_PAGE_SIZE).await?;
        let fetched = page.items.len() as u32;
        entries.extend(page.items);

        if !page.has_next || fetched == 0 {
            break;
        }
        offset += PLAYLIST_PAGE_SIZE;
    }

    tracing::debug!(count = entries.len(), "Fetched playlists");
    Ok(PlaylistTable::from_entries(entries))
}

/// rspotify-backed session
#[derive(Clone)]
pub struct SpotifyClient {
    client: Arc<AuthCodeSpotify>,
}

impl SpotifyClient {
    pub fn new(client: AuthCodeSpotify) -> Self {
        Self {
            client: Arc::new(client),
        }
    }

    fn remote_error(command: &str, error: ClientError) -> RemoteError {
        RemoteError::classify(command, &error)
    }
}

fn invalid_uri(command: &str, uri: &str, error: impl std::fmt::Display) -> RemoteError {
    RemoteError::new(command, format!("{uri}: {error}"), "invalid_uri")
}

fn context_id(uri: &str) -> Result<PlayContextId<'_>, RemoteError> {
    let parsed = if uri.contains(":playlist:") {
        PlaylistId::from_uri(uri).map(PlayContextId::Playlist)
    } else if uri.contains(":album:") {
        AlbumId::from_uri(uri).map(PlayContextId::Album)
    } else if uri.contains(":artist:") {
        ArtistId::from_uri(uri).map(PlayContextId::Artist)
    } else if uri.contains(":show:") {
        ShowId::from_uri(uri).map(PlayContextId::Show)
    } else {
        return Err(invalid_uri("play", uri, "unknown context type"));
    };
    parsed.map_err(|e| invalid_uri("play", uri, e))
}

fn playable_id(uri: &str) -> Result<PlayableId<'_>, RemoteError> {
    let parsed = if uri.contains(":episode:") {
        EpisodeId::from_uri(uri).map(PlayableId::Episode)
    } else {
        TrackId::from_uri(uri).map(PlayableId::Track)
    };
    parsed.map_err(|e| invalid_uri("play", uri, e))
}

#[async_trait]
impl MusicSession for SpotifyClient {
    async fn profile(&self) -> Result<UserProfile, RemoteError> {
        let user = self
            .client
            .me()
            .await
            .map_err(|e| Self::remote_error("profile", e))?;

        Ok(UserProfile {
            name: user.display_name,
            image_url: user
                .images
                .and_then(|images| images.into_iter().next())
                .map(|image| image.url),
        })
    }

    async fn current_playback(&self) -> Option<PlaybackState> {
        tracing::trace!("Fetching current playback state");
        match self.client.current_playback(None, None::<Vec<_>>).await {
            Ok(Some(playback)) => {
                tracing::trace!(
                    is_playing = playback.is_playing,
                    device = %playback.device.name,
                    "Got playback state"
                );
                Some(PlaybackState::from_context(&playback))
            }
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(error = %e, "Current playback query failed");
                None
            }
        }
    }

    async fn currently_playing(&self) -> Option<NowPlaying> {
        match self.client.current_playing(None, None::<Vec<_>>).await {
            Ok(Some(context)) => Some(NowPlaying::from_context(&context)),
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(error = %e, "Currently playing query failed");
                None
            }
        }
    }

    async fn devices(&self) -> Result<Vec<DeviceInfo>, RemoteError> {
        tracing::debug!("API: devices");
        let devices = self
            .client
            .device()
            .await
            .map_err(|e| Self::remote_error("devices", e))?;

        let device_infos: Vec<DeviceInfo> = devices
            .into_iter()
            .map(|d| DeviceInfo { id: d.id, name: d.name })
            .collect();
        tracing::debug!(count = device_infos.len(), "Found devices");
        Ok(device_infos)
    }

    async fn playlist_page(&self, offset: u32, limit: u32) -> Result<PlaylistPage, RemoteError> {
        tracing::debug!(offset, limit, "API: current_user_playlists");
        let page = self
            .client
            .current_user_playlists_manual(Some(limit), Some(offset))
            .await
            .map_err(|e| Self::remote_error("playlists", e))?;

        Ok(PlaylistPage {
            items: page
                .items
                .into_iter()
                .map(|playlist| (playlist.name, playlist.id.uri()))
                .collect(),
            has_next: page.next.is_some(),
        })
    }

    async fn start_playback(
        &self,
        device_id: Option<String>,
        target: PlayTarget,
    ) -> Result<(), RemoteError> {
        tracing::debug!(device_id = ?device_id, target = ?target, "API: start_playback");
        let device_id = device_id.as_deref();

        let result = match &target {
            PlayTarget::Context(uri) => {
                let context = context_id(uri)?;
                self.client
                    .start_context_playback(context, device_id, None, None)
                    .await
            }
            PlayTarget::Track(uri) => {
                let playable = playable_id(uri)?;
                self.client
                    .start_uris_playback([playable], device_id, None, None)
                    .await
            }
            PlayTarget::Resume => self.client.resume_playback(device_id, None).await,
        };

        result.map_err(|e| Self::remote_error("play", e))
    }

    async fn pause(&self) -> Result<(), RemoteError> {
        tracing::debug!("API: pause_playback");
        self.client
            .pause_playback(None)
            .await
            .map_err(|e| Self::remote_error("pause", e))
    }

    async fn next_track(&self) -> Result<(), RemoteError> {
        tracing::debug!("API: next_track");
        self.client
            .next_track(None)
            .await
            .map_err(|e| Self::remote_error("next", e))
    }

    async fn previous_track(&self) -> Result<(), RemoteError> {
        tracing::debug!("API: previous_track");
        self.client
            .previous_track(None)
            .await
            .map_err(|e| Self::remote_error("previous", e))
    }

    async fn set_shuffle(&self, state: bool) -> Result<(), RemoteError> {
        tracing::debug!(state, "API: set_shuffle");
        self.client
            .shuffle(state, None)
            .await
            .map_err(|e| Self::remote_error("shuffle_state", e))
    }

    async fn set_repeat(&self, state: RepeatMode) -> Result<(), RemoteError> {
        tracing::debug!(state = ?state, "API: set_repeat");
        self.client
            .repeat(state.into(), None)
            .await
            .map_err(|e| Self::remote_error("repeat_state", e))
    }

    async fn set_volume(&self, volume: u8) -> Result<(), RemoteError> {
        let volume = volume.min(100);
        tracing::debug!(volume, "API: set_volume");
        self.client
            .volume(volume, None)
            .await
            .map_err(|e| Self::remote_error("volume", e))
    }

    async fn refresh_auth(&self) -> Result<(), RemoteError> {
        tracing::debug!("API: refresh_token");
        self.client
            .refresh_token()
            .await
            .map_err(|e| Self::remote_error("refresh_token", e))
    }
}
