//! Controller module - session lifecycle and command handling
//!
//! - `input`: inbound message parsing and dispatch
//! - `playback`: play with device fallback, transport and settings commands
//! - `poller`: the timers that diff remote state and broadcast changes

mod input;
mod playback;
mod poller;

use std::ops::ControlFlow;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::auth::{CredentialStore, Credentials};
use crate::config::Config;
use crate::error::{Error, RemoteError};
use crate::model::{
    fetch_all_playlists, fetch_devices, ArtworkResolver, DeviceTable, MusicSession,
    PlaybackSnapshot, PlaylistTable, SessionFactory, UserProfile,
};
use crate::relay::{ClientId, ConnectInfo, Event, Relay};

pub use input::{LoginRequest, PlayRequest};
pub use poller::{Poller, PollerHandle};

/// Everything tied to one authenticated session. Rebuilt on every login.
pub struct SessionContext {
    pub session: Arc<dyn MusicSession>,
    pub snapshot: Mutex<PlaybackSnapshot>,
    pub devices: Mutex<DeviceTable>,
    pub playlists: Mutex<PlaylistTable>,
    pub profile: UserProfile,
}

impl SessionContext {
    pub fn new(session: Arc<dyn MusicSession>, snapshot: PlaybackSnapshot) -> Self {
        Self {
            session,
            snapshot: Mutex::new(snapshot),
            devices: Mutex::new(DeviceTable::default()),
            playlists: Mutex::new(PlaylistTable::default()),
            profile: UserProfile::default(),
        }
    }

    /// Query everything the connect message needs.
    pub async fn gather(session: Arc<dyn MusicSession>) -> Self {
        let playback = session.current_playback().await;

        let devices = fetch_devices(session.as_ref()).await.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Could not fetch devices");
            DeviceTable::default()
        });
        let playlists = fetch_all_playlists(session.as_ref()).await.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Could not fetch playlists");
            PlaylistTable::default()
        });
        let profile = session.profile().await.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Could not fetch user profile");
            UserProfile::default()
        });

        Self {
            snapshot: Mutex::new(PlaybackSnapshot::from_playback(playback.as_ref())),
            devices: Mutex::new(devices),
            playlists: Mutex::new(playlists),
            profile,
            session,
        }
    }

    pub async fn connect_info(&self) -> ConnectInfo {
        let snapshot = self.snapshot.lock().await.clone();
        ConnectInfo {
            name: self.profile.name.clone(),
            user_image_url: self.profile.image_url.clone().unwrap_or_default(),
            devices: self.devices.lock().await.clone(),
            current_device: snapshot.current_device_name,
            is_playing: snapshot.is_playing == Some(true),
            shuffle_state: snapshot.shuffle_state,
            repeat_state: snapshot.repeat_state,
            volume: snapshot.volume,
            playlists: self.playlists.lock().await.clone(),
        }
    }
}

struct ActiveSession {
    context: Arc<SessionContext>,
    // dropping the handle stops every timer
    _poller: PollerHandle,
}

#[derive(Clone)]
pub struct Bridge {
    config: Arc<Config>,
    pub(crate) relay: Relay,
    store: CredentialStore,
    factory: Arc<dyn SessionFactory>,
    pub(crate) artwork: ArtworkResolver,
    active: Arc<Mutex<Option<ActiveSession>>>,
    shutdown: CancellationToken,
}

impl Bridge {
    pub fn new(config: Config, relay: Relay, factory: Arc<dyn SessionFactory>) -> Self {
        let store = CredentialStore::new(config.credentials_path(), config.token_cache_path());
        let artwork = ArtworkResolver::new(config.media_folder.clone(), config.artwork_path());

        Self {
            config: Arc::new(config),
            relay,
            store,
            factory,
            artwork,
            active: Arc::new(Mutex::new(None)),
            shutdown: CancellationToken::new(),
        }
    }

    /// Fires once `quit` has been handled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub async fn context(&self) -> Option<Arc<SessionContext>> {
        self.active
            .lock()
            .await
            .as_ref()
            .map(|active| active.context.clone())
    }

    /// Greet a new client with the current state, logging in from stored
    /// credentials first if there is no session yet.
    pub async fn on_client_connected(&self, client: ClientId) {
        if let Some(context) = self.context().await {
            let info = context.connect_info().await;
            self.relay
                .send_to(client, &Event::SpotifyConnect(Box::new(info)))
                .await;
            return;
        }

        if self.store.exists() {
            tracing::info!(path = %self.store.path().display(), "Logging in from stored credentials");
            self.login(LoginRequest::default()).await;
        } else {
            tracing::info!("No stored credentials, waiting for login");
        }
    }

    pub async fn login(&self, request: LoginRequest) {
        if let Some(folder) = request.local_folder.clone() {
            self.artwork.set_media_folder(folder).await;
        }

        let explicit = matches!(
            (&request.client_id, &request.client_secret),
            (Some(id), Some(secret)) if !id.is_empty() && !secret.is_empty()
        );
        let credentials = match (request.client_id, request.client_secret) {
            (Some(id), Some(secret)) if explicit => Credentials::new(id, secret),
            _ => match self.store.load() {
                Ok(credentials) => credentials,
                Err(e) => {
                    self.report_login_error(&e).await;
                    return;
                }
            },
        };

        match self.factory.connect(credentials.clone(), request.code).await {
            Ok((session, refreshed)) => {
                if let Err(e) = self.store.save(&refreshed) {
                    tracing::error!(error = %e, "Failed to save credentials");
                }
                self.activate(session).await;
            }
            Err(e) => {
                // keep the id and secret so the follow-up login can carry only the code
                if explicit && matches!(e, Error::AuthorizationRequired(_)) {
                    if let Err(save_err) = self.store.save(&credentials) {
                        tracing::error!(error = %save_err, "Failed to save credentials");
                    }
                }
                self.report_login_error(&e).await;
            }
        }
    }

    async fn report_login_error(&self, error: &Error) {
        if error.requires_login() {
            tracing::warn!(error = %error, "Login needed");
        } else {
            tracing::error!(error = %error, "Login failed");
        }
        let remote = RemoteError::new("login", error.to_string(), error.reason());
        self.relay.broadcast(Event::Error(remote)).await;
    }

    /// Replace any running session with `session`, start polling and announce it.
    pub async fn activate(&self, session: Arc<dyn MusicSession>) {
        self.teardown().await;

        let context = Arc::new(SessionContext::gather(session).await);
        let info = context.connect_info().await;
        tracing::info!(user = ?info.name, devices = info.devices.len(), "Session active");

        // clients must see spotify_connect before the first poll result
        self.relay
            .broadcast(Event::SpotifyConnect(Box::new(info)))
            .await;

        let poller = Poller::new(context.clone(), self.relay.clone(), self.artwork.clone());
        *self.active.lock().await = Some(ActiveSession {
            context,
            _poller: poller.spawn(&self.config),
        });
    }

    async fn teardown(&self) {
        if self.active.lock().await.take().is_some() {
            tracing::info!("Session torn down");
        }
    }

    pub async fn logout(&self) {
        self.teardown().await;
        if let Err(e) = self.store.delete() {
            tracing::error!(error = %e, "Failed to delete credentials");
        }
        tracing::info!("Logged out");
    }

    pub async fn quit(&self) -> ControlFlow<()> {
        tracing::info!("Quit requested");
        self.relay.close_all().await;
        self.teardown().await;
        self.shutdown.cancel();
        ControlFlow::Break(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{fixtures, MockMusicSession, MockSessionFactory, PlaylistPage, RepeatMode};
    use serde_json::Value;
    use tokio_tungstenite::tungstenite::Message;

    pub(crate) fn bridge_with(dir: &tempfile::TempDir, factory: MockSessionFactory) -> Bridge {
        Bridge::new(
            Config::with_data_dir(dir.path()),
            Relay::new(),
            Arc::new(factory),
        )
    }

    fn json(message: Message) -> Value {
        serde_json::from_str(message.to_text().unwrap()).unwrap()
    }

    fn connected_session() -> MockMusicSession {
        connected_session_with(|| true)
    }

    /// `shuffle` is asked for the shuffle state on every playback query.
    fn connected_session_with(mut shuffle: impl FnMut() -> bool + Send + 'static) -> MockMusicSession {
        let mut session = MockMusicSession::new();
        session
            .expect_current_playback()
            .returning(move || Some(fixtures::playback(shuffle(), RepeatMode::Context, 70)));
        session
            .expect_currently_playing()
            .returning(|| Some(fixtures::now_playing("t1", true)));
        session.expect_devices().returning(|| {
            Ok(vec![crate::model::DeviceInfo {
                id: Some("desk-id".into()),
                name: "Desk".into(),
            }])
        });
        session.expect_playlist_page().returning(|_, _| {
            Ok(PlaylistPage {
                items: vec![("Mix".into(), "spotify:playlist:mix".into())],
                has_next: false,
            })
        });
        session.expect_profile().returning(|| {
            Ok(UserProfile {
                name: Some("Sam".into()),
                image_url: Some("https://img/me.jpg".into()),
            })
        });
        session
    }

    #[tokio::test]
    async fn login_with_explicit_credentials_connects_and_announces() {
        let dir = tempfile::tempdir().unwrap();
        let mut factory = MockSessionFactory::new();
        factory
            .expect_connect()
            .withf(|credentials, code| credentials.client_id == "id" && code.is_none())
            .times(1)
            .returning(|mut credentials, _| {
                credentials.refresh_token = Some("refresh".into());
                Ok((Arc::new(connected_session()) as Arc<dyn MusicSession>, credentials))
            });
        let bridge = bridge_with(&dir, factory);
        let (_id, mut rx) = bridge.relay.register().await;

        bridge
            .login(LoginRequest {
                client_id: Some("id".into()),
                client_secret: Some("secret".into()),
                ..Default::default()
            })
            .await;

        let message = json(rx.recv().await.unwrap());
        assert_eq!(message["action"], "spotify_connect");
        assert_eq!(message["data"]["name"], "Sam");
        assert_eq!(message["data"]["user_image_url"], "https://img/me.jpg");
        assert_eq!(message["data"]["devices"], serde_json::json!({"Desk": "desk-id"}));
        assert_eq!(message["data"]["current_device"], "Desk");
        assert_eq!(message["data"]["repeat_state"], "context");
        assert_eq!(message["data"]["playlists"]["Mix"], "spotify:playlist:mix");

        assert!(bridge.context().await.is_some());
        let stored = bridge.store.load().unwrap();
        assert_eq!(stored.refresh_token.as_deref(), Some("refresh"));

        bridge.logout().await;
        assert!(bridge.context().await.is_none());
        assert!(!bridge.store.exists());
    }

    #[tokio::test]
    async fn login_without_stored_credentials_reports_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut factory = MockSessionFactory::new();
        factory.expect_connect().never();
        let bridge = bridge_with(&dir, factory);
        let (_id, mut rx) = bridge.relay.register().await;

        bridge.login(LoginRequest::default()).await;

        let message = json(rx.recv().await.unwrap());
        assert_eq!(message["action"], "error");
        assert_eq!(message["data"]["command"], "login");
        assert_eq!(message["data"]["reason"], "must_relogin");
        assert!(bridge.context().await.is_none());
    }

    #[tokio::test]
    async fn authorization_required_keeps_credentials_for_code_login() {
        let dir = tempfile::tempdir().unwrap();
        let mut factory = MockSessionFactory::new();
        factory
            .expect_connect()
            .withf(|_, code| code.is_none())
            .times(1)
            .returning(|_, _| {
                Err(Error::AuthorizationRequired(
                    "https://accounts.spotify.com/authorize?client_id=id".into(),
                ))
            });
        factory
            .expect_connect()
            .withf(|credentials, code| {
                credentials.client_id == "id" && code.as_deref() == Some("the-code")
            })
            .times(1)
            .returning(|credentials, _| {
                Ok((Arc::new(connected_session()) as Arc<dyn MusicSession>, credentials))
            });
        let bridge = bridge_with(&dir, factory);
        let (_id, mut rx) = bridge.relay.register().await;

        bridge
            .login(LoginRequest {
                client_id: Some("id".into()),
                client_secret: Some("secret".into()),
                ..Default::default()
            })
            .await;
        let message = json(rx.recv().await.unwrap());
        assert_eq!(message["data"]["command"], "login");
        assert!(
            message["data"]["reason"]
                .as_str()
                .unwrap()
                .starts_with("https://accounts.spotify.com/authorize")
        );

        bridge
            .login(LoginRequest {
                code: Some("the-code".into()),
                ..Default::default()
            })
            .await;
        assert_eq!(json(rx.recv().await.unwrap())["action"], "spotify_connect");
    }

    #[tokio::test]
    async fn quit_closes_clients_and_fires_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let bridge = bridge_with(&dir, MockSessionFactory::new());
        let (_id, mut rx) = bridge.relay.register().await;
        let shutdown = bridge.shutdown_token();

        assert_eq!(bridge.handle_message(r#"{"action":"quit"}"#).await, ControlFlow::Break(()));

        assert!(shutdown.is_cancelled());
        assert!(matches!(rx.recv().await, Some(Message::Close(None))));
        assert_eq!(bridge.relay.client_count().await, 0);
    }

    #[tokio::test]
    async fn new_client_gets_current_state() {
        let dir = tempfile::tempdir().unwrap();
        let bridge = bridge_with(&dir, MockSessionFactory::new());
        bridge.activate(Arc::new(connected_session())).await;

        let (id, mut rx) = bridge.relay.register().await;
        bridge.on_client_connected(id).await;

        let message = json(rx.recv().await.unwrap());
        assert_eq!(message["action"], "spotify_connect");
        assert_eq!(message["data"]["is_playing"], true);
    }

    #[tokio::test]
    async fn connect_announcement_precedes_first_poll() {
        let dir = tempfile::tempdir().unwrap();
        let bridge = bridge_with(&dir, MockSessionFactory::new());
        let (_id, mut rx) = bridge.relay.register().await;

        // shuffle flips right after the connect-time query
        let mut queries = 0;
        bridge
            .activate(Arc::new(connected_session_with(move || {
                queries += 1;
                queries == 1
            })))
            .await;

        let first = json(rx.recv().await.unwrap());
        assert_eq!(first["action"], "spotify_connect");
        assert_eq!(first["data"]["shuffle_state"], true);

        let second = tokio::time::timeout(std::time::Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            json(second),
            serde_json::json!({"action": "update", "data": {"shuffle_state": false}})
        );

        bridge.logout().await;
    }

    #[tokio::test]
    async fn commands_without_session_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let bridge = bridge_with(&dir, MockSessionFactory::new());
        let (_id, mut rx) = bridge.relay.register().await;

        assert_eq!(bridge.handle_message(r#"{"action":"pause"}"#).await, ControlFlow::Continue(()));
        assert_eq!(bridge.handle_message("garbage").await, ControlFlow::Continue(()));
        assert!(rx.try_recv().is_err());
    }
}
