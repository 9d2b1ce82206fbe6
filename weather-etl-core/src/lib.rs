//! Core library for the weather ETL pipeline.
//!
//! This crate defines:
//! - Configuration sourced from a TOML file and the environment
//! - The weather provider abstraction and the WeatherStack client
//! - The extractor (one request per city, failures skipped)
//! - The loader (one transaction per batch, deduplicated by the store)
//! - Read-only health checks over the stored data
//!
//! It is used by `weather-etl-cli`, but the extract and load halves can be
//! driven separately by any scheduler.

pub mod config;
pub mod error;
pub mod extract;
pub mod load;
pub mod model;
pub mod pipeline;
pub mod provider;
pub mod store;
pub mod verify;

pub use config::{Config, DatabaseConfig};
pub use error::{ConfigError, FetchError, LoadError, VerifyError};
pub use extract::Extractor;
pub use load::Loader;
pub use model::{
    ExtractReport, FetchedWeather, InsertOutcome, LoadReport, StoredWeatherRecord,
    WeatherObservation,
};
pub use pipeline::{Pipeline, PipelineReport};
pub use provider::WeatherProvider;
pub use store::{MemoryStore, PostgresStore, WeatherStore};
