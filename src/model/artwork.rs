//! Cover art for local tracks, pulled out of the audio file's tags

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use audiotags::Tag;
use tokio::sync::RwLock;
use walkdir::WalkDir;

/// Finds a local audio file for a track and writes its embedded cover to a
/// single cached image, overwritten on every lookup.
#[derive(Clone)]
pub struct ArtworkResolver {
    media_folder: Arc<RwLock<Option<PathBuf>>>,
    cache_path: PathBuf,
}

impl ArtworkResolver {
    pub fn new(media_folder: Option<PathBuf>, cache_path: PathBuf) -> Self {
        Self {
            media_folder: Arc::new(RwLock::new(media_folder)),
            cache_path,
        }
    }

    pub async fn set_media_folder(&self, folder: PathBuf) {
        tracing::info!(folder = %folder.display(), "Local media folder set");
        *self.media_folder.write().await = Some(folder);
    }

    pub async fn media_folder(&self) -> Option<PathBuf> {
        self.media_folder.read().await.clone()
    }

    /// Path of the extracted cover for `track_name`, or `None` when there is
    /// no media folder, no matching file, or no embedded picture.
    pub async fn resolve(&self, track_name: &str) -> Option<PathBuf> {
        let folder = self.media_folder().await?;
        let cache_path = self.cache_path.clone();
        let name = track_name.to_string();

        let result = tokio::task::spawn_blocking(move || {
            extract_cover(&folder, &name, &cache_path)
        })
        .await;

        match result {
            Ok(Ok(path)) => path,
            Ok(Err(e)) => {
                tracing::warn!(track = track_name, error = %e, "Local artwork lookup failed");
                None
            }
            Err(e) => {
                tracing::error!(error = %e, "Artwork task panicked");
                None
            }
        }
    }
}

/// Extensions the tag reader understands
const AUDIO_EXTENSIONS: &[&str] = &["mp3", "m4a", "m4b", "mp4", "flac"];

fn is_audio_file(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .is_some_and(|ext| AUDIO_EXTENSIONS.contains(&ext.as_str()))
}

fn find_audio_file(folder: &Path, name: &str) -> Option<PathBuf> {
    WalkDir::new(folder)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file() && is_audio_file(entry.path()))
        .find(|entry| {
            entry
                .path()
                .file_stem()
                .map(|stem| stem.to_string_lossy().ends_with(name))
                .unwrap_or(false)
        })
        .map(|entry| entry.into_path())
}

fn extract_cover(folder: &Path, name: &str, cache_path: &Path) -> Result<Option<PathBuf>> {
    let Some(file) = find_audio_file(folder, name) else {
        tracing::debug!(name, folder = %folder.display(), "No local file for track");
        return Ok(None);
    };
    tracing::debug!(file = %file.display(), "Found local file for track");

    let tag = Tag::new()
        .read_from_path(&file)
        .with_context(|| format!("Failed to read audio tags from {}", file.display()))?;

    let Some(cover) = tag.album_cover() else {
        return Ok(None);
    };

    std::fs::write(cache_path, cover.data)
        .with_context(|| format!("Failed to write artwork to {}", cache_path.display()))?;

    Ok(Some(cache_path.to_path_buf()))
}

/// Write an ID3-tagged `.mp3` (tag only, no audio frames) with a front cover.
#[cfg(test)]
pub(crate) fn write_tagged_mp3(path: &Path, cover: &[u8]) {
    use audiotags::{AudioTagEdit, AudioTagWrite, Id3v2Tag, MimeType, Picture};

    std::fs::write(path, b"").unwrap();
    let mut tag = Id3v2Tag::new();
    tag.set_title("Local");
    tag.set_album_cover(Picture::new(cover, MimeType::Jpeg));
    tag.write_to_path(path.to_str().unwrap()).unwrap();
}
