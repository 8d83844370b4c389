//! Playback control methods

use crate::error::RemoteError;
use crate::model::{fetch_all_playlists, fetch_devices, PlayTarget, SettingsUpdate};
use crate::relay::Event;

use super::{Bridge, PlayRequest, SessionContext};

impl Bridge {
    /// Start playback, retrying on the configured fallback devices.
    ///
    /// The first attempt uses the requested device; each fallback provider
    /// then gets exactly one attempt. Names that are not in the device table
    /// resolve to the last-known device.
    pub async fn play(&self, context: &SessionContext, request: PlayRequest) -> Result<(), RemoteError> {
        if context.snapshot.lock().await.is_playing() && request.playlist_uri.is_none() {
            tracing::debug!("Already playing and no playlist requested, ignoring play");
            return Ok(());
        }

        match fetch_devices(context.session.as_ref()).await {
            Ok(table) => *context.devices.lock().await = table,
            Err(e) => tracing::warn!(error = %e, "Could not refresh devices before play"),
        }
        let devices = context.devices.lock().await.clone();
        if devices.is_empty() {
            tracing::warn!("No devices available, relying on last-known device");
        }
        let last_known = context.snapshot.lock().await.current_device_id.clone();
        let target = PlayTarget::from_uris(request.playlist_uri.as_deref(), request.track_uri.as_deref());

        let candidates = std::iter::once(request.device_name.clone())
            .chain(self.config.fallback_devices.iter().map(|provider| provider.resolve()));

        let mut last_error = None;
        for (attempt, name) in candidates.enumerate() {
            let device_id = name
                .as_deref()
                .and_then(|name| devices.id_for(name))
                .map(str::to_string)
                .or_else(|| last_known.clone());

            tracing::debug!(attempt, device = ?name, device_id = ?device_id, "Play attempt");
            match context.session.start_playback(device_id, target.clone()).await {
                Ok(()) => {
                    tracing::info!(attempt, device = ?name, "Playback started");
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(attempt, device = ?name, error = %e, "Play attempt failed");
                    last_error = Some(e);
                }
            }
        }

        let error = last_error
            .unwrap_or_else(|| RemoteError::new("play", "no device to play on", "no_active_device"))
            .with_command("play");
        self.relay.broadcast(Event::Error(error.clone())).await;
        Err(error)
    }

    async fn report(&self, result: Result<(), RemoteError>, command: &str) {
        match result {
            Ok(()) => tracing::info!(command, "Command sent"),
            Err(e) => {
                tracing::error!(command, error = %e, "Command failed");
                self.relay.broadcast(Event::Error(e.with_command(command))).await;
            }
        }
    }

    pub async fn pause(&self, context: &SessionContext) {
        self.report(context.session.pause().await, "pause").await;
    }

    pub async fn next_track(&self, context: &SessionContext) {
        self.report(context.session.next_track().await, "next").await;
    }

    pub async fn previous_track(&self, context: &SessionContext) {
        self.report(context.session.previous_track().await, "previous").await;
    }

    /// Apply each requested setting on its own; one failure does not stop the others.
    pub async fn update_settings(&self, context: &SessionContext, update: SettingsUpdate) {
        let session = &context.session;

        if let Some(shuffle) = update.shuffle_state {
            self.report(session.set_shuffle(shuffle).await, "update").await;
        }
        if let Some(repeat) = update.repeat_state {
            self.report(session.set_repeat(repeat).await, "update").await;
        }
        if let Some(volume) = update.volume {
            self.report(session.set_volume(volume.min(100)).await, "update").await;
        }
    }

    pub async fn refresh_devices(&self, context: &SessionContext) {
        match fetch_devices(context.session.as_ref()).await {
            Ok(table) => {
                let names = table.names();
                *context.devices.lock().await = table;
                self.relay.broadcast(Event::Devices(names)).await;
            }
            Err(e) => {
                self.relay
                    .broadcast(Event::Error(e.with_command("refresh_devices")))
                    .await;
            }
        }
    }

    pub async fn refresh_playlists(&self, context: &SessionContext) {
        match fetch_all_playlists(context.session.as_ref()).await {
            Ok(table) => {
                tracing::info!(count = table.len(), "Playlists refreshed");
                *context.playlists.lock().await = table.clone();
                self.relay.broadcast(Event::Playlists(table)).await;
            }
            Err(e) => {
                self.relay
                    .broadcast(Event::Error(e.with_command("refresh_playlists")))
                    .await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex as StdMutex};

    use mockall::predicate::eq;
    use serde_json::Value;

    use super::*;
    use crate::config::{Config, FallbackDevice};
    use crate::model::{
        fixtures, DeviceInfo, MockMusicSession, MockSessionFactory, PlaybackSnapshot, RepeatMode,
    };
    use crate::relay::Relay;

    const ALT_VAR: &str = "SPOTIFY_BRIDGE_TEST_ALT_DEVICE";

    fn bridge(dir: &tempfile::TempDir) -> Bridge {
        let mut config = Config::with_data_dir(dir.path());
        config.fallback_devices = vec![FallbackDevice::Hostname, FallbackDevice::Env(ALT_VAR.into())];
        Bridge::new(config, Relay::new(), Arc::new(MockSessionFactory::new()))
    }

    fn hostname() -> String {
        FallbackDevice::Hostname.resolve().unwrap()
    }

    fn device(name: &str, id: &str) -> DeviceInfo {
        DeviceInfo { id: Some(id.into()), name: name.into() }
    }

    fn idle_snapshot() -> PlaybackSnapshot {
        let mut state = fixtures::playback(false, RepeatMode::Off, 50);
        state.is_playing = false;
        PlaybackSnapshot::from_playback(Some(&state))
    }

    fn error_reason(message: Value) -> (String, String) {
        assert_eq!(message["action"], "error");
        (
            message["data"]["command"].as_str().unwrap().to_string(),
            message["data"]["reason"].as_str().unwrap().to_string(),
        )
    }

    #[tokio::test]
    async fn failing_play_retries_hostname_then_env_then_reports() {
        // SAFETY: the variable name is unique to this test
        unsafe { std::env::set_var(ALT_VAR, "Alt PC") };
        let dir = tempfile::tempdir().unwrap();
        let bridge = bridge(&dir);
        let (_id, mut rx) = bridge.relay.register().await;

        let host = hostname();
        let mut session = MockMusicSession::new();
        session.expect_devices().returning(move || {
            Ok(vec![
                device("Phone", "phone-id"),
                device(&host, "host-id"),
                device("Alt PC", "alt-id"),
            ])
        });
        let attempts = Arc::new(StdMutex::new(Vec::new()));
        let seen = attempts.clone();
        session
            .expect_start_playback()
            .times(3)
            .returning(move |device_id, _| {
                seen.lock().unwrap().push(device_id);
                Err(RemoteError::new("play", "http status: 404", "no_active_device"))
            });

        let context = SessionContext::new(Arc::new(session), idle_snapshot());
        let result = bridge
            .play(&context, PlayRequest { device_name: Some("Phone".into()), ..Default::default() })
            .await;

        assert!(result.is_err());
        assert_eq!(
            *attempts.lock().unwrap(),
            vec![Some("phone-id".into()), Some("host-id".into()), Some("alt-id".into())]
        );

        let message = serde_json::from_str(rx.recv().await.unwrap().to_text().unwrap()).unwrap();
        assert_eq!(error_reason(message), ("play".to_string(), "no_active_device".to_string()));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn play_while_playing_without_playlist_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let bridge = bridge(&dir);

        let mut session = MockMusicSession::new();
        session.expect_start_playback().never();
        session.expect_devices().never();

        let snapshot = PlaybackSnapshot::from_playback(Some(&fixtures::playback(false, RepeatMode::Off, 50)));
        let context = SessionContext::new(Arc::new(session), snapshot);

        let request = PlayRequest {
            track_uri: Some("spotify:track:4iV5W9uYEdYUVa79Axb7Rh".into()),
            ..Default::default()
        };
        assert!(bridge.play(&context, request).await.is_ok());
    }

    #[tokio::test]
    async fn playlist_overrides_while_playing_and_unknown_name_uses_last_device() {
        let dir = tempfile::tempdir().unwrap();
        let bridge = bridge(&dir);

        let mut session = MockMusicSession::new();
        session.expect_devices().returning(|| Ok(vec![device("Desk", "desk-id")]));
        session
            .expect_start_playback()
            .with(
                eq(Some("desk-id".to_string())),
                eq(PlayTarget::Context("spotify:playlist:1".to_string())),
            )
            .times(1)
            .returning(|_, _| Ok(()));

        let snapshot = PlaybackSnapshot::from_playback(Some(&fixtures::playback(false, RepeatMode::Off, 50)));
        let context = SessionContext::new(Arc::new(session), snapshot);

        let request = PlayRequest {
            device_name: Some("Nowhere".into()),
            playlist_uri: Some("spotify:playlist:1".into()),
            track_uri: Some("spotify:track:2".into()),
        };
        assert!(bridge.play(&context, request).await.is_ok());
    }

    #[tokio::test]
    async fn update_failures_are_independent() {
        let dir = tempfile::tempdir().unwrap();
        let bridge = bridge(&dir);
        let (_id, mut rx) = bridge.relay.register().await;

        let mut session = MockMusicSession::new();
        session
            .expect_set_shuffle()
            .with(eq(true))
            .times(1)
            .returning(|_| Err(RemoteError::new("shuffle_state", "403", "forbidden")));
        session
            .expect_set_repeat()
            .with(eq(RepeatMode::Track))
            .times(1)
            .returning(|_| Ok(()));
        session
            .expect_set_volume()
            .with(eq(100))
            .times(1)
            .returning(|_| Ok(()));

        let context = SessionContext::new(Arc::new(session), idle_snapshot());
        bridge
            .update_settings(
                &context,
                SettingsUpdate {
                    shuffle_state: Some(true),
                    repeat_state: Some(RepeatMode::Track),
                    volume: Some(150),
                },
            )
            .await;

        let message = serde_json::from_str(rx.recv().await.unwrap().to_text().unwrap()).unwrap();
        assert_eq!(error_reason(message), ("update".to_string(), "forbidden".to_string()));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn refresh_devices_broadcasts_names() {
        let dir = tempfile::tempdir().unwrap();
        let bridge = bridge(&dir);
        let (_id, mut rx) = bridge.relay.register().await;

        let mut session = MockMusicSession::new();
        session
            .expect_devices()
            .returning(|| Ok(vec![device("Desk", "desk-id"), device("Phone", "phone-id")]));
        let context = SessionContext::new(Arc::new(session), idle_snapshot());

        bridge.refresh_devices(&context).await;

        let message: Value =
            serde_json::from_str(rx.recv().await.unwrap().to_text().unwrap()).unwrap();
        assert_eq!(message["action"], "devices");
        assert_eq!(message["data"]["devices"], serde_json::json!(["Desk", "Phone"]));
        assert_eq!(context.devices.lock().await.id_for("Phone"), Some("phone-id"));
    }
}
