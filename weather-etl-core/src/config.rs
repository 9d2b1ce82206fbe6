use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::error::ConfigError;

pub const DEFAULT_BASE_URL: &str = "http://api.weatherstack.com";
pub const DEFAULT_CITIES: &[&str] = &["London", "New York", "Tokyo", "Mumbai", "Sydney"];

/// Connection settings for the PostgreSQL store.
///
/// Nothing here is validated up front; bad or missing values show up as a
/// connection failure when the loader opens its session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub name: String,
    pub user: String,
    pub password: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            name: "weather_db".to_string(),
            user: String::new(),
            password: String::new(),
        }
    }
}

/// Top-level configuration.
///
/// Example TOML:
/// ```toml
/// cities = ["London", "Tokyo"]
/// request_timeout_secs = 10
///
/// [database]
/// host = "postgres"
/// name = "weather_db"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// WeatherStack access key. Usually supplied through the environment.
    pub api_key: Option<String>,
    pub base_url: String,
    /// Cities polled on every run, in order.
    pub cities: Vec<String>,
    pub request_timeout_secs: u64,
    /// Maximum age of the newest stored observation before `verify` reports stale data.
    pub freshness_threshold_secs: u64,
    /// Connection attempts made by `verify` before giving up.
    pub connect_retries: u32,
    pub connect_retry_delay_secs: u64,
    pub database: DatabaseConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            cities: DEFAULT_CITIES.iter().map(|c| c.to_string()).collect(),
            request_timeout_secs: 10,
            freshness_threshold_secs: 2 * 60 * 60,
            connect_retries: 5,
            connect_retry_delay_secs: 2,
            database: DatabaseConfig::default(),
        }
    }
}

impl Config {
    /// Load config from `path` (or the platform default location when it
    /// exists), then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut cfg = match path {
            Some(path) => Self::from_file(path)?,
            None => match Self::config_file_path() {
                Ok(path) if path.exists() => Self::from_file(&path)?,
                _ => Self::default(),
            },
        };

        cfg.apply_env(|key| std::env::var(key).ok())?;
        Ok(cfg)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;

        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Path to the default config file.
    pub fn config_file_path() -> Result<PathBuf, ConfigError> {
        let dirs = ProjectDirs::from("dev", "weather-etl", "weather-etl")
            .ok_or(ConfigError::NoConfigDir)?;

        Ok(dirs.config_dir().join("config.toml"))
    }

    /// Override fields from environment variables resolved through `lookup`.
    ///
    /// Empty values are treated as unset.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(key) = get("WEATHERSTACK_API_KEY") {
            self.api_key = Some(key);
        }
        if let Some(url) = get("WEATHERSTACK_BASE_URL") {
            self.base_url = url;
        }
        if let Some(cities) = get("WEATHER_ETL_CITIES") {
            self.cities = cities
                .split(',')
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(host) = get("POSTGRES_HOST") {
            self.database.host = host;
        }
        if let Some(port) = get("POSTGRES_PORT") {
            self.database.port = port.trim().parse().map_err(|_| ConfigError::InvalidValue {
                key: "POSTGRES_PORT".to_string(),
                value: port.clone(),
            })?;
        }
        if let Some(name) = get("POSTGRES_DB") {
            self.database.name = name;
        }
        if let Some(user) = get("POSTGRES_USER") {
            self.database.user = user;
        }
        if let Some(password) = get("POSTGRES_PASSWORD") {
            self.database.password = password;
        }

        Ok(())
    }

    /// The API key, or a fatal error when it is missing or blank.
    pub fn require_api_key(&self) -> Result<&str, ConfigError> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or(ConfigError::MissingApiKey)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn freshness_threshold(&self) -> Duration {
        Duration::from_secs(self.freshness_threshold_secs)
    }

    pub fn connect_retry_delay(&self) -> Duration {
        Duration::from_secs(self.connect_retry_delay_secs)
    }
}
