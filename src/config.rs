//! Runtime configuration built from command-line arguments and environment

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 38045;
const DEFAULT_REDIRECT_URI: &str = "http://localhost:38042";
const DATA_DIR_NAME: &str = "spotify-bridge";

const CREDENTIALS_FILE: &str = ".creds";
const TOKEN_CACHE_FILE: &str = ".cache";
const ARTWORK_FILE: &str = "artwork.jpg";
const LOG_DIR: &str = "logs";

/// Local bridge between the Spotify Web API and a WebSocket UI client
#[derive(Debug, Parser)]
#[command(version, about)]
pub struct Args {
    /// Address to listen on for WebSocket clients
    #[arg(long, env = "BRIDGE_HOST", default_value = DEFAULT_HOST)]
    pub host: String,

    /// Port to listen on for WebSocket clients
    #[arg(long, env = "BRIDGE_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Directory holding credentials, token cache, artwork and logs
    #[arg(long, env = "BRIDGE_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Folder searched for local tracks when resolving cover art
    #[arg(long, env = "BRIDGE_MEDIA_FOLDER")]
    pub media_folder: Option<PathBuf>,

    /// OAuth redirect URI registered with the Spotify application
    #[arg(long, env = "SPOTIFY_REDIRECT_URI", default_value = DEFAULT_REDIRECT_URI)]
    pub redirect_uri: String,

    /// Seconds between "currently playing" polls
    #[arg(long, default_value_t = 1)]
    pub now_playing_interval: u64,

    /// Seconds between shuffle/repeat/volume polls
    #[arg(long, default_value_t = 5)]
    pub settings_interval: u64,

    /// Seconds between forced token refreshes, 0 disables
    #[arg(long, default_value_t = 3000)]
    pub token_refresh_interval: u64,

    /// Ordered device names tried when play fails: `hostname`, `env:VAR` or a literal name
    #[arg(
        long = "fallback-device",
        value_delimiter = ',',
        default_values_t = vec!["hostname".to_string(), "env:COMPUTERNAME".to_string()]
    )]
    pub fallback_devices: Vec<String>,
}

/// Where a retried play request looks for its device name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FallbackDevice {
    Hostname,
    Env(String),
    Named(String),
}

impl FallbackDevice {
    pub fn parse(value: &str) -> Self {
        match value {
            "hostname" => FallbackDevice::Hostname,
            s if s.starts_with("env:") => FallbackDevice::Env(s["env:".len()..].to_string()),
            s => FallbackDevice::Named(s.to_string()),
        }
    }

    /// Resolve to a concrete device name, if the source has one.
    pub fn resolve(&self) -> Option<String> {
        match self {
            FallbackDevice::Hostname => hostname::get()
                .ok()
                .map(|h| h.to_string_lossy().to_string()),
            FallbackDevice::Env(var) => std::env::var(var).ok(),
            FallbackDevice::Named(name) => Some(name.clone()),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub media_folder: Option<PathBuf>,
    pub redirect_uri: String,
    pub now_playing_interval: Duration,
    pub settings_interval: Duration,
    pub token_refresh_interval: Option<Duration>,
    pub fallback_devices: Vec<FallbackDevice>,
}

impl Config {
    pub fn from_args(args: Args) -> anyhow::Result<Self> {
        let data_dir = match args.data_dir {
            Some(dir) => dir,
            None => Self::default_data_dir()
                .ok_or_else(|| anyhow::anyhow!("Could not determine a per-user data directory"))?,
        };

        let mut config = Self::with_data_dir(data_dir);
        config.host = args.host;
        config.port = args.port;
        config.media_folder = args.media_folder;
        config.redirect_uri = args.redirect_uri;
        config.now_playing_interval = Duration::from_secs(args.now_playing_interval.max(1));
        config.settings_interval = Duration::from_secs(args.settings_interval.max(1));
        config.token_refresh_interval = (args.token_refresh_interval > 0)
            .then(|| Duration::from_secs(args.token_refresh_interval));
        config.fallback_devices = args
            .fallback_devices
            .iter()
            .map(|s| FallbackDevice::parse(s))
            .collect();
        Ok(config)
    }

    fn default_data_dir() -> Option<PathBuf> {
        dirs::data_dir().map(|path| path.join(DATA_DIR_NAME))
    }

    /// Config rooted at `data_dir` with every other setting at its default.
    pub fn with_data_dir(data_dir: impl AsRef<Path>) -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            data_dir: data_dir.as_ref().to_path_buf(),
            media_folder: None,
            redirect_uri: DEFAULT_REDIRECT_URI.to_string(),
            now_playing_interval: Duration::from_secs(1),
            settings_interval: Duration::from_secs(5),
            token_refresh_interval: None,
            fallback_devices: vec![
                FallbackDevice::Hostname,
                FallbackDevice::Env("COMPUTERNAME".to_string()),
            ],
        }
    }

    pub fn credentials_path(&self) -> PathBuf {
        self.data_dir.join(CREDENTIALS_FILE)
    }

    pub fn token_cache_path(&self) -> PathBuf {
        self.data_dir.join(TOKEN_CACHE_FILE)
    }

    pub fn artwork_path(&self) -> PathBuf {
        self.data_dir.join(ARTWORK_FILE)
    }

    pub fn log_dir(&self) -> PathBuf {
        self.data_dir.join(LOG_DIR)
    }
}
