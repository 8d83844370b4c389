use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use rspotify::{prelude::*, AuthCodeSpotify, OAuth, Token};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::model::{Connected, MusicSession, SessionFactory, SpotifyClient};

pub const SCOPES: &str = "user-read-playback-state user-modify-playback-state user-read-currently-playing user-library-read playlist-read-private";

/// Application credentials plus whatever tokens the last session produced.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

impl Credentials {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            access_token: None,
            refresh_token: None,
        }
    }

    fn is_complete(&self) -> bool {
        !self.client_id.is_empty() && !self.client_secret.is_empty()
    }
}

// Secrets stay out of the logs.
impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Credentials file on disk, plus the token cache that goes with it.
#[derive(Clone, Debug)]
pub struct CredentialStore {
    path: PathBuf,
    token_cache: PathBuf,
}

impl CredentialStore {
    pub fn new(path: impl Into<PathBuf>, token_cache: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            token_cache: token_cache.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Load stored credentials. A corrupt file is deleted before the error is returned.
    pub fn load(&self) -> Result<Credentials> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(Error::LocalIo(format!(
                    "no credentials file at {}",
                    self.path.display()
                )));
            }
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_str::<Credentials>(&content) {
            Ok(credentials) if credentials.is_complete() => {
                tracing::debug!(path = %self.path.display(), "Loaded credentials");
                Ok(credentials)
            }
            Ok(_) => self.discard_corrupt("client id or secret missing"),
            Err(e) => self.discard_corrupt(&e.to_string()),
        }
    }

    fn discard_corrupt(&self, detail: &str) -> Result<Credentials> {
        tracing::warn!(path = %self.path.display(), detail, "Credentials file corrupt, deleting");
        if let Err(e) = fs::remove_file(&self.path) {
            tracing::error!(error = %e, "Failed to delete corrupt credentials file");
        }
        Err(Error::LocalIo(format!("credentials file corrupt: {detail}")))
    }

    pub fn save(&self, credentials: &Credentials) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, serde_json::to_string(credentials)?)?;
        tracing::debug!(path = %self.path.display(), "Saved credentials");
        Ok(())
    }

    /// Remove the credentials file and the token cache. Missing files are fine.
    pub fn delete(&self) -> Result<()> {
        for path in [&self.path, &self.token_cache] {
            match fs::remove_file(path) {
                Ok(()) => tracing::debug!(path = %path.display(), "Deleted"),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

/// Builds rspotify sessions from stored credentials.
///
/// Token sources, in order: an authorization code from the client, the
/// rspotify token cache, then the refresh token saved with the credentials.
pub struct SpotifyConnector {
    redirect_uri: String,
    token_cache: PathBuf,
}

impl SpotifyConnector {
    pub fn new(config: &Config) -> Self {
        Self {
            redirect_uri: config.redirect_uri.clone(),
            token_cache: config.token_cache_path(),
        }
    }

    fn build_client(&self, credentials: &Credentials) -> AuthCodeSpotify {
        let oauth = OAuth {
            redirect_uri: self.redirect_uri.clone(),
            scopes: SCOPES.split_whitespace().map(String::from).collect(),
            ..Default::default()
        };
        let config = rspotify::Config {
            token_cached: true,
            token_refreshing: true,
            cache_path: self.token_cache.clone(),
            ..Default::default()
        };

        AuthCodeSpotify::with_config(
            rspotify::Credentials::new(&credentials.client_id, &credentials.client_secret),
            oauth,
            config,
        )
    }

    async fn set_token(client: &AuthCodeSpotify, token: Token) -> Result<()> {
        let mut guard = client
            .token
            .lock()
            .await
            .map_err(|_| Error::Auth("token lock poisoned".to_string()))?;
        *guard = Some(token);
        Ok(())
    }

    async fn current_token(client: &AuthCodeSpotify) -> Option<Token> {
        client.token.lock().await.ok().and_then(|guard| guard.clone())
    }

    /// Leave the client holding a usable token, or say where to authorize.
    async fn authorize(
        &self,
        client: &AuthCodeSpotify,
        credentials: &Credentials,
        code: Option<String>,
    ) -> Result<()> {
        if let Some(code) = code {
            tracing::info!("Exchanging authorization code");
            return client
                .request_token(&code)
                .await
                .map_err(|e| Error::Auth(e.to_string()));
        }

        if let Ok(Some(token)) = client.read_token_cache(true).await {
            tracing::info!(cache = %self.token_cache.display(), "Using cached token");
            let expired = token.is_expired();
            Self::set_token(client, token).await?;
            if expired {
                tracing::debug!("Cached token expired, refreshing");
                client
                    .refresh_token()
                    .await
                    .map_err(|e| Error::Auth(e.to_string()))?;
            }
            return Ok(());
        }

        if let Some(refresh_token) = credentials.refresh_token.clone() {
            tracing::info!("Refreshing stored token");
            let token = Token {
                access_token: credentials.access_token.clone().unwrap_or_default(),
                refresh_token: Some(refresh_token),
                expires_at: Some(Utc::now()),
                ..Default::default()
            };
            Self::set_token(client, token).await?;
            return client
                .refresh_token()
                .await
                .map_err(|e| Error::Auth(e.to_string()));
        }

        let url = client
            .get_authorize_url(false)
            .map_err(|e| Error::Auth(e.to_string()))?;
        tracing::info!("No usable token, authorization required");
        Err(Error::AuthorizationRequired(url.to_string()))
    }
}

#[async_trait]
impl SessionFactory for SpotifyConnector {
    async fn connect(&self, credentials: Credentials, code: Option<String>) -> Result<Connected> {
        let client = self.build_client(&credentials);
        self.authorize(&client, &credentials, code).await?;

        let mut credentials = credentials;
        if let Some(token) = Self::current_token(&client).await {
            credentials.access_token = Some(token.access_token);
            if token.refresh_token.is_some() {
                credentials.refresh_token = token.refresh_token;
            }
        }

        let session = SpotifyClient::new(client);
        match session.profile().await {
            Ok(profile) => {
                tracing::info!(user = ?profile.name, "Spotify session authorized");
            }
            Err(e) if e.reason == "unauthorized" || e.reason == "forbidden" => {
                return Err(Error::Auth(e.message));
            }
            Err(e) => return Err(e.with_command("login").into()),
        }

        Ok((Arc::new(session) as Arc<dyn MusicSession>, credentials))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_in(dir: &tempfile::TempDir) -> CredentialStore {
        CredentialStore::new(dir.path().join(".creds"), dir.path().join(".cache"))
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        let mut credentials = Credentials::new("id", "secret");
        credentials.refresh_token = Some("refresh".to_string());
        store.save(&credentials).unwrap();

        assert_eq!(store.load().unwrap(), credentials);
    }

    #[test]
    fn missing_file_is_local_io() {
        let dir = tempfile::tempdir().unwrap();
        let err = store_in(&dir).load().unwrap_err();
        assert!(matches!(err, Error::LocalIo(_)));
    }

    #[test]
    fn corrupt_file_is_deleted() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        fs::write(store.path(), "{not json").unwrap();

        let err = store.load().unwrap_err();
        assert!(err.requires_login());
        assert!(!store.exists());
    }

    #[test]
    fn incomplete_file_is_deleted() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        fs::write(store.path(), r#"{"client_id": "id", "client_secret": ""}"#).unwrap();

        assert!(store.load().is_err());
        assert!(!store.exists());
    }

    #[test]
    fn delete_removes_token_cache_too() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store.save(&Credentials::new("id", "secret")).unwrap();
        fs::write(dir.path().join(".cache"), "{}").unwrap();

        store.delete().unwrap();
        assert!(!store.exists());
        assert!(!dir.path().join(".cache").exists());

        // second delete is a no-op
        store.delete().unwrap();
    }

    #[tokio::test]
    async fn connect_without_token_asks_for_authorization() {
        let dir = tempfile::tempdir().unwrap();
        let connector = SpotifyConnector::new(&Config::with_data_dir(dir.path()));

        let err = connector
            .connect(Credentials::new("my-client-id", "secret"), None)
            .await
            .err()
            .unwrap();

        match err {
            Error::AuthorizationRequired(url) => {
                assert!(url.contains("my-client-id"));
                assert!(url.contains("user-modify-playback-state"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
