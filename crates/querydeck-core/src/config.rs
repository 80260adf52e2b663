//! Application configuration management.
//!
//! Configuration is stored at `~/.config/querydeck/config.json` and covers
//! the API endpoint, where tokens are kept, and session timing. The endpoint
//! can always be overridden with `QUERYDECK_API_URL`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::auth::{FileTokenStore, KeyringTokenStore, MemoryTokenStore, TokenStore};

/// Application name used for config/cache directory paths
const APP_NAME: &str = "querydeck";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Environment variable naming the API endpoint
pub const API_URL_ENV: &str = "QUERYDECK_API_URL";

/// Endpoint used when neither the environment nor the config file names one
pub const DEFAULT_API_URL: &str = "http://localhost:4000/graphql";

/// Renewal fires this many seconds before the access token expires.
pub const DEFAULT_REFRESH_LEAD_SECS: u64 = 60;

/// HTTP request timeout in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Where the token pair is persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    #[default]
    File,
    Keyring,
    Memory,
}

impl std::str::FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "file" => Ok(StorageBackend::File),
            "keyring" | "keychain" => Ok(StorageBackend::Keyring),
            "memory" => Ok(StorageBackend::Memory),
            other => Err(anyhow::anyhow!("Unknown storage backend: {}", other)),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_refresh_lead_secs() -> u64 {
    DEFAULT_REFRESH_LEAD_SECS
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub api_url: Option<String>,
    #[serde(default)]
    pub storage: StorageBackend,
    /// Fall back to a local pseudo-session when the backend is unreachable.
    #[serde(default = "default_true")]
    pub allow_degraded: bool,
    #[serde(default = "default_refresh_lead_secs")]
    pub refresh_lead_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub last_email: Option<String>,
    #[serde(default)]
    pub last_company: Option<String>,
    /// Endpoint given on the command line; wins over everything else and is
    /// never written back.
    #[serde(skip)]
    pub api_url_override: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: None,
            storage: StorageBackend::default(),
            allow_degraded: true,
            refresh_lead_secs: DEFAULT_REFRESH_LEAD_SECS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            last_email: None,
            last_company: None,
            api_url_override: None,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            Ok(serde_json::from_str(&contents)?)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    /// Endpoint URL: command-line override, then the environment, then the
    /// config file, then the default.
    pub fn api_url(&self) -> String {
        match &self.api_url_override {
            Some(url) => url.clone(),
            None => Self::resolve_api_url(std::env::var(API_URL_ENV).ok(), self.api_url.as_deref()),
        }
    }

    fn resolve_api_url(from_env: Option<String>, from_file: Option<&str>) -> String {
        from_env
            .filter(|url| !url.trim().is_empty())
            .or_else(|| from_file.map(str::to_string))
            .unwrap_or_else(|| DEFAULT_API_URL.to_string())
    }

    pub fn refresh_lead(&self) -> Duration {
        Duration::from_secs(self.refresh_lead_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Build the configured token store.
    pub fn token_store(&self) -> Result<Arc<dyn TokenStore>> {
        Ok(match self.storage {
            StorageBackend::File => Arc::new(FileTokenStore::new(&self.cache_dir()?)),
            StorageBackend::Keyring => Arc::new(KeyringTokenStore::new()),
            StorageBackend::Memory => Arc::new(MemoryTokenStore::new()),
        })
    }
}
