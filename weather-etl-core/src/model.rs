use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::FetchError;

/// Key under which extraction metadata is attached to the raw payload.
pub const METADATA_KEY: &str = "_metadata";

/// One city's API response plus timing metadata, in transit between extract and load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherObservation {
    pub city_name: String,
    pub api_call_timestamp: DateTime<Utc>,
    pub ingestion_timestamp: DateTime<Utc>,
    pub status_code: u16,
    /// Raw provider document with the `_metadata` object attached.
    pub payload: Value,
}

impl WeatherObservation {
    /// Build an observation for a response fetched at `called_at`.
    ///
    /// Timestamps are truncated to microseconds, the precision of the store.
    /// The ingestion timestamp starts out equal to the call timestamp.
    pub fn new(city_name: &str, status_code: u16, mut payload: Value, called_at: DateTime<Utc>) -> Self {
        let called_at = called_at.trunc_subsecs(6);

        if let Value::Object(map) = &mut payload {
            map.insert(
                METADATA_KEY.to_string(),
                json!({
                    "city_name": city_name,
                    "api_call_timestamp": called_at.to_rfc3339(),
                    "ingestion_timestamp": called_at.to_rfc3339(),
                    "status_code": status_code,
                }),
            );
        }

        Self {
            city_name: city_name.to_string(),
            api_call_timestamp: called_at,
            ingestion_timestamp: called_at,
            status_code,
            payload,
        }
    }

    pub fn natural_key(&self) -> NaturalKey {
        NaturalKey {
            city_name: self.city_name.clone(),
            api_call_timestamp: self.api_call_timestamp,
        }
    }
}

/// The deduplication key of a stored record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NaturalKey {
    pub city_name: String,
    pub api_call_timestamp: DateTime<Utc>,
}

/// A persisted row of `raw.weather_data`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredWeatherRecord {
    pub id: i64,
    pub city_name: String,
    pub api_response: Value,
    pub api_call_timestamp: DateTime<Utc>,
    pub ingestion_timestamp: DateTime<Utc>,
}

impl StoredWeatherRecord {
    pub fn natural_key(&self) -> NaturalKey {
        NaturalKey {
            city_name: self.city_name.clone(),
            api_call_timestamp: self.api_call_timestamp,
        }
    }
}

/// A successful provider response before metadata is attached.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedWeather {
    pub status_code: u16,
    pub body: Value,
}

/// A city that was skipped during extraction, and why.
#[derive(Debug)]
pub struct CityFailure {
    pub city: String,
    pub error: FetchError,
}

#[derive(Debug, Default)]
pub struct ExtractReport {
    pub observations: Vec<WeatherObservation>,
    pub failures: Vec<CityFailure>,
}

impl ExtractReport {
    pub fn failed_cities(&self) -> Vec<&str> {
        self.failures.iter().map(|f| f.city.as_str()).collect()
    }
}

/// Result of a single insert-if-absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    Duplicate,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    pub received: usize,
    pub inserted: usize,
    pub duplicates: usize,
}

impl LoadReport {
    pub(crate) fn record(&mut self, outcome: InsertOutcome) {
        match outcome {
            InsertOutcome::Inserted => self.inserted += 1,
            InsertOutcome::Duplicate => self.duplicates += 1,
        }
    }
}
