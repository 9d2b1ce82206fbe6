use async_trait::async_trait;
use std::fmt::Debug;

use crate::{Config, FetchedWeather, error::{ConfigError, FetchError}};

pub mod weatherstack;

pub use weatherstack::WeatherStackProvider;

/// Source of current-weather documents, one city at a time.
#[async_trait]
pub trait WeatherProvider: Send + Sync + Debug {
    async fn fetch_current(&self, city: &str) -> Result<FetchedWeather, FetchError>;
}

/// Construct the WeatherStack provider from config.
///
/// Fails when no API key is configured: extraction never runs without credentials.
pub fn provider_from_config(config: &Config) -> Result<Box<dyn WeatherProvider>, ConfigError> {
    let api_key = config.require_api_key()?;

    let provider = WeatherStackProvider::new(
        api_key.to_owned(),
        config.base_url.clone(),
        config.request_timeout(),
    );

    Ok(Box::new(provider))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_from_config_errors_when_missing_api_key() {
        let cfg = Config::default();
        let err = provider_from_config(&cfg).unwrap_err();
        assert!(err.to_string().contains("WEATHERSTACK_API_KEY not found"));
    }

    #[test]
    fn provider_from_config_works_when_key_set() {
        let cfg = Config {
            api_key: Some("KEY".to_string()),
            ..Config::default()
        };
        assert!(provider_from_config(&cfg).is_ok());
    }
}
