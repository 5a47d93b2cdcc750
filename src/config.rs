use std::path::PathBuf;
use std::time::Duration;

use directories::ProjectDirs;
use serde::Deserialize;

use crate::catalog::MAX_FEATURE_BATCH;
use crate::catalog::spotify::{ClientSettings, Credentials};
use crate::enrich::EnrichOptions;

const CLIENT_ID_ENV: &str = "SPOTIFY_CLIENT_ID";
const CLIENT_SECRET_ENV: &str = "SPOTIFY_CLIENT_SECRET";

/// Application configuration loaded from TOML config file.
/// Every field has a default, so the config file is optional.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Directory holding the vendor exports (used when `merge` has no `--raw-dir`).
    pub raw_dir: Option<PathBuf>,
    /// Custom database path (overrides XDG default).
    pub db_path: Option<PathBuf>,
    /// Keep only listens from this calendar year.
    pub year: Option<i32>,
    /// Spotify Web API settings.
    pub catalog: CatalogConfig,
}

/// Spotify Web API configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    /// Ids per audio-features request (max 100).
    pub batch_size: usize,
    /// Pause between audio-feature batches in milliseconds.
    pub batch_delay_ms: u64,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    /// Retries for rate-limited or failed requests.
    pub max_retries: u32,
    /// Base backoff between retries in milliseconds (doubles each attempt).
    pub backoff_ms: u64,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            client_id: None,
            client_secret: None,
            batch_size: MAX_FEATURE_BATCH,
            batch_delay_ms: 500,
            timeout_secs: 10,
            max_retries: 2,
            backoff_ms: 500,
        }
    }
}

impl AppConfig {
    /// Load config from `~/.config/listenfold/config.toml`, then apply
    /// credential overrides from the environment.
    /// Returns default config if file doesn't exist.
    /// Logs a warning if the file exists but can't be parsed.
    pub fn load() -> Self {
        let mut config = Self::load_file();
        config.apply_env(|name| std::env::var(name).ok());
        config
    }

    fn load_file() -> Self {
        let config_path = Self::config_path();
        match config_path {
            Some(path) if path.exists() => match std::fs::read_to_string(&path) {
                Ok(contents) => match toml::from_str::<AppConfig>(&contents) {
                    Ok(config) => {
                        log::info!("Loaded config from {}", path.display());
                        config
                    }
                    Err(e) => {
                        log::warn!("Failed to parse {}: {}. Using defaults.", path.display(), e);
                        Self::default()
                    }
                },
                Err(e) => {
                    log::warn!("Failed to read {}: {}. Using defaults.", path.display(), e);
                    Self::default()
                }
            },
            _ => {
                log::debug!("No config file found, using defaults");
                Self::default()
            }
        }
    }

    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(id) = var(CLIENT_ID_ENV).filter(|v| !v.is_empty()) {
            self.catalog.client_id = Some(id);
        }
        if let Some(secret) = var(CLIENT_SECRET_ENV).filter(|v| !v.is_empty()) {
            self.catalog.client_secret = Some(secret);
        }
    }

    /// Client credentials, if both halves are configured.
    pub fn credentials(&self) -> Option<Credentials> {
        match (&self.catalog.client_id, &self.catalog.client_secret) {
            (Some(id), Some(secret)) => Some(Credentials {
                client_id: id.clone(),
                client_secret: secret.clone(),
            }),
            _ => None,
        }
    }

    pub fn client_settings(&self) -> ClientSettings {
        ClientSettings {
            timeout: Duration::from_secs(self.catalog.timeout_secs.max(1)),
            max_retries: self.catalog.max_retries,
            backoff: Duration::from_millis(self.catalog.backoff_ms),
            ..ClientSettings::default()
        }
    }

    pub fn enrich_options(&self) -> EnrichOptions {
        EnrichOptions {
            batch_size: self.catalog.batch_size.clamp(1, MAX_FEATURE_BATCH),
            batch_delay: Duration::from_millis(self.catalog.batch_delay_ms),
            ..EnrichOptions::default()
        }
    }

    /// Get the config file path.
    fn config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", crate::APP_NAME)
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }
}

/// Resolve the default database path using XDG data directory.
pub fn default_db_path() -> PathBuf {
    if let Some(dirs) = ProjectDirs::from("", "", crate::APP_NAME) {
        let data_dir = dirs.data_dir();
        std::fs::create_dir_all(data_dir).ok();
        data_dir.join("listenfold.db")
    } else {
        PathBuf::from("listenfold.db")
    }
}

/// Where exports are read from when neither the CLI nor config names a directory.
pub fn default_raw_dir() -> PathBuf {
    PathBuf::from("data/raw")
}
