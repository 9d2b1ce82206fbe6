use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    error::{LoadError, VerifyError},
    model::{InsertOutcome, WeatherObservation},
};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::{PostgresInspector, PostgresStore};

pub const RAW_SCHEMA: &str = "raw";
pub const WEATHER_TABLE: &str = "weather_data";

/// Destination of loaded observations.
#[async_trait]
pub trait WeatherStore: Send + Sync {
    /// Open an exclusively owned session with a transaction already begun.
    async fn open(&self) -> Result<Box<dyn StoreSession>, LoadError>;
}

/// One connection and one transaction, used by a single load call.
#[async_trait]
pub trait StoreSession: Send {
    /// Create the `raw` schema and `raw.weather_data` table when absent.
    async fn ensure_schema(&mut self) -> Result<(), LoadError>;

    /// Insert unless a row with the same (city, call timestamp) exists.
    async fn insert_if_absent(
        &mut self,
        observation: &WeatherObservation,
    ) -> Result<InsertOutcome, LoadError>;

    async fn commit(&mut self) -> Result<(), LoadError>;

    async fn rollback(&mut self) -> Result<(), LoadError>;

    /// Release the connection. An unfinished transaction is discarded.
    async fn close(self: Box<Self>);
}

/// Read-only queries used by the health checks.
#[async_trait]
pub trait StoreInspector: Send {
    async fn ping(&mut self) -> Result<(), VerifyError>;

    async fn existing_schemas(&mut self) -> Result<Vec<String>, VerifyError>;

    async fn table_exists(&mut self, schema: &str, table: &str) -> Result<bool, VerifyError>;

    async fn count_records(&mut self) -> Result<i64, VerifyError>;

    /// Newest `api_call_timestamp` in the weather table, if any row exists.
    async fn latest_call_timestamp(&mut self) -> Result<Option<DateTime<Utc>>, VerifyError>;
}
