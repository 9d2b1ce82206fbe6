//! Polls the weather provider once per configured city.

use chrono::Utc;

use crate::{
    Config,
    error::ConfigError,
    model::{CityFailure, ExtractReport, WeatherObservation},
    provider::{WeatherProvider, provider_from_config},
};

#[derive(Debug)]
pub struct Extractor {
    provider: Box<dyn WeatherProvider>,
    cities: Vec<String>,
}

impl Extractor {
    pub fn new(provider: Box<dyn WeatherProvider>, cities: Vec<String>) -> Self {
        Self { provider, cities }
    }

    /// Build an extractor backed by WeatherStack.
    ///
    /// This is the only fatal failure of the extract task: without an API key
    /// no request is attempted.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let provider = provider_from_config(config).inspect_err(|e| log::error!("{e}"))?;
        Ok(Self::new(provider, config.cities.clone()))
    }

    pub fn cities(&self) -> &[String] {
        &self.cities
    }

    /// Fetch every city in order. Cities that fail are reported in
    /// `failures` and left out of `observations`.
    pub async fn extract(&self) -> ExtractReport {
        let mut report = ExtractReport::default();

        for city in &self.cities {
            log::info!("Fetching weather data for {city}...");

            match self.provider.fetch_current(city).await {
                Ok(fetched) => {
                    let observation =
                        WeatherObservation::new(city, fetched.status_code, fetched.body, Utc::now());
                    report.observations.push(observation);
                    log::info!("Successfully fetched data for {city}.");
                }
                Err(error) => {
                    log::error!("Error fetching data for {city}: {error}");
                    report.failures.push(CityFailure {
                        city: city.clone(),
                        error,
                    });
                }
            }
        }

        log::info!(
            "Extracted data for {} cities ({} failed).",
            report.observations.len(),
            report.failures.len()
        );

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::FetchError,
        model::{FetchedWeather, METADATA_KEY},
    };
    use async_trait::async_trait;
    use serde_json::json;

    /// Answers from a fixed script of failing cities.
    #[derive(Debug, Default)]
    struct ScriptedProvider {
        failing: Vec<&'static str>,
        api_errors: Vec<&'static str>,
    }

    #[async_trait]
    impl WeatherProvider for ScriptedProvider {
        async fn fetch_current(&self, city: &str) -> Result<FetchedWeather, FetchError> {
            if self.failing.iter().any(|c| *c == city) {
                return Err(FetchError::HttpStatus {
                    status: 503,
                    body: "unavailable".into(),
                });
            }
            if self.api_errors.iter().any(|c| *c == city) {
                return Err(FetchError::Api {
                    code: 615,
                    info: "request failed".into(),
                });
            }

            Ok(FetchedWeather {
                status_code: 200,
                body: json!({"location": {"name": city}}),
            })
        }
    }

    fn cities(names: &[&str]) -> Vec<String> {
        names.iter().map(|c| c.to_string()).collect()
    }

    #[tokio::test]
    async fn all_cities_succeed_in_order() {
        let extractor = Extractor::new(
            Box::new(ScriptedProvider::default()),
            cities(&["London", "Tokyo", "Sydney"]),
        );

        let report = extractor.extract().await;

        let names: Vec<_> = report.observations.iter().map(|o| o.city_name.as_str()).collect();
        assert_eq!(names, vec!["London", "Tokyo", "Sydney"]);
        assert!(report.failures.is_empty());
        for obs in &report.observations {
            assert_eq!(obs.payload[METADATA_KEY]["city_name"], obs.city_name.as_str());
            assert_eq!(obs.status_code, 200);
        }
    }

    #[tokio::test]
    async fn failing_city_is_skipped_and_others_kept() {
        let provider = ScriptedProvider {
            failing: vec!["B"],
            ..Default::default()
        };
        let extractor = Extractor::new(Box::new(provider), cities(&["A", "B", "C"]));

        let report = extractor.extract().await;

        let names: Vec<_> = report.observations.iter().map(|o| o.city_name.as_str()).collect();
        assert_eq!(names, vec!["A", "C"]);
        assert_eq!(report.failed_cities(), vec!["B"]);
        assert!(matches!(report.failures[0].error, FetchError::HttpStatus { status: 503, .. }));
    }

    #[tokio::test]
    async fn api_level_error_is_skipped() {
        let provider = ScriptedProvider {
            api_errors: vec!["Atlantis"],
            ..Default::default()
        };
        let extractor = Extractor::new(Box::new(provider), cities(&["Atlantis", "London"]));

        let report = extractor.extract().await;

        assert_eq!(report.observations.len(), 1);
        assert_eq!(report.observations[0].city_name, "London");
        assert!(matches!(report.failures[0].error, FetchError::Api { code: 615, .. }));
    }

    #[tokio::test]
    async fn every_city_is_attempted_even_when_all_fail() {
        let provider = ScriptedProvider {
            failing: vec!["A", "B"],
            ..Default::default()
        };
        let extractor = Extractor::new(Box::new(provider), cities(&["A", "B"]));

        let report = extractor.extract().await;

        assert!(report.observations.is_empty());
        assert_eq!(report.failures.len(), 2);
    }

    #[test]
    fn from_config_fails_without_api_key() {
        let err = Extractor::from_config(&Config::default()).unwrap_err();
        assert!(matches!(err, ConfigError::MissingApiKey));
    }

    #[test]
    fn from_config_uses_configured_cities() {
        let cfg = Config {
            api_key: Some("KEY".into()),
            cities: cities(&["Oslo", "Lima"]),
            ..Config::default()
        };
        let extractor = Extractor::from_config(&cfg).unwrap();
        assert_eq!(extractor.cities(), &["Oslo".to_string(), "Lima".to_string()]);
    }
}
