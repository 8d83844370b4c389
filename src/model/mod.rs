//! Model module - remote session, playback state and data types
//!
//! - `types`: device and playlist tables, settings, play targets
//! - `playback`: track payloads and the snapshot the poller diffs against
//! - `artwork`: cover art extraction for local tracks
//! - `spotify_client`: the session trait and its rspotify implementation

mod artwork;
mod playback;
mod spotify_client;
mod types;

pub use types::{
    DeviceTable, PlayTarget, PlaylistTable, RepeatMode, SettingsUpdate, UserProfile,
};

pub use playback::{NowPlaying, PlayStateChange, PlaybackSnapshot};

pub use artwork::ArtworkResolver;

pub use spotify_client::{
    fetch_all_playlists, fetch_devices, Connected, MusicSession, SessionFactory, SpotifyClient,
};

#[cfg(test)]
pub(crate) use artwork::write_tagged_mp3;
#[cfg(test)]
pub(crate) use playback::fixtures;
#[cfg(test)]
pub(crate) use types::{DeviceInfo, PlaylistPage};
#[cfg(test)]
pub(crate) use spotify_client::{MockMusicSession, MockSessionFactory};
