//! PostgreSQL backend.
//!
//! Each session gets its own single-connection pool which is closed when the
//! session ends, so a connection is never shared between load calls.
//! Deduplication is left entirely to the table's UNIQUE constraint.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::{
    Connection, PgConnection, PgPool, Postgres, Row, Transaction,
    postgres::{PgConnectOptions, PgPoolOptions},
    types::Json,
};

use crate::{
    config::DatabaseConfig,
    error::{LoadError, VerifyError},
    model::{InsertOutcome, StoredWeatherRecord, WeatherObservation},
};

use super::{StoreInspector, StoreSession, WeatherStore};

const CREATE_SCHEMA: &str = "CREATE SCHEMA IF NOT EXISTS raw";

const CREATE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS raw.weather_data (
    id SERIAL PRIMARY KEY,
    city_name TEXT NOT NULL,
    api_response JSONB NOT NULL,
    api_call_timestamp TIMESTAMP NOT NULL,
    ingestion_timestamp TIMESTAMP NOT NULL,
    UNIQUE (city_name, api_call_timestamp)
)
"#;

const INSERT_IF_ABSENT: &str = r#"
INSERT INTO raw.weather_data
    (city_name, api_response, api_call_timestamp, ingestion_timestamp)
VALUES ($1, $2, $3, $4)
ON CONFLICT (city_name, api_call_timestamp) DO NOTHING
"#;

pub fn connect_options(cfg: &DatabaseConfig) -> PgConnectOptions {
    PgConnectOptions::new()
        .host(&cfg.host)
        .port(cfg.port)
        .database(&cfg.name)
        .username(&cfg.user)
        .password(&cfg.password)
}

#[derive(Debug, Clone)]
pub struct PostgresStore {
    options: PgConnectOptions,
}

impl PostgresStore {
    pub fn new(options: PgConnectOptions) -> Self {
        Self { options }
    }

    pub fn from_config(cfg: &DatabaseConfig) -> Self {
        Self::new(connect_options(cfg))
    }
}

#[async_trait]
impl WeatherStore for PostgresStore {
    async fn open(&self) -> Result<Box<dyn StoreSession>, LoadError> {
        let pool = PgPoolOptions::new()
            .max_connections(1)
            .connect_with(self.options.clone())
            .await
            .map_err(LoadError::Connect)?;

        let tx = match pool.begin().await {
            Ok(tx) => tx,
            Err(e) => {
                pool.close().await;
                return Err(LoadError::Transaction(e));
            }
        };

        Ok(Box::new(PostgresSession { pool, tx: Some(tx) }))
    }
}

pub struct PostgresSession {
    pool: PgPool,
    tx: Option<Transaction<'static, Postgres>>,
}

impl PostgresSession {
    fn tx(&mut self) -> Result<&mut Transaction<'static, Postgres>, LoadError> {
        self.tx.as_mut().ok_or(LoadError::TransactionFinished)
    }
}

#[async_trait]
impl StoreSession for PostgresSession {
    async fn ensure_schema(&mut self) -> Result<(), LoadError> {
        let tx = self.tx()?;

        sqlx::query(CREATE_SCHEMA)
            .execute(&mut **tx)
            .await
            .map_err(LoadError::Schema)?;
        sqlx::query(CREATE_TABLE)
            .execute(&mut **tx)
            .await
            .map_err(LoadError::Schema)?;

        Ok(())
    }

    async fn insert_if_absent(
        &mut self,
        observation: &WeatherObservation,
    ) -> Result<InsertOutcome, LoadError> {
        let tx = self.tx()?;

        let res = sqlx::query(INSERT_IF_ABSENT)
            .bind(&observation.city_name)
            .bind(Json(&observation.payload))
            .bind(observation.api_call_timestamp.naive_utc())
            .bind(observation.ingestion_timestamp.naive_utc())
            .execute(&mut **tx)
            .await
            .map_err(|source| LoadError::Insert {
                city: observation.city_name.clone(),
                timestamp: observation.api_call_timestamp.to_rfc3339(),
                source,
            })?;

        if res.rows_affected() > 0 {
            Ok(InsertOutcome::Inserted)
        } else {
            Ok(InsertOutcome::Duplicate)
        }
    }

    async fn commit(&mut self) -> Result<(), LoadError> {
        let tx = self.tx.take().ok_or(LoadError::TransactionFinished)?;
        tx.commit().await.map_err(LoadError::Transaction)
    }

    async fn rollback(&mut self) -> Result<(), LoadError> {
        let tx = self.tx.take().ok_or(LoadError::TransactionFinished)?;
        tx.rollback().await.map_err(LoadError::Transaction)
    }

    async fn close(self: Box<Self>) {
        let PostgresSession { pool, tx } = *self;
        // Dropping an open transaction queues a rollback on the connection.
        drop(tx);
        pool.close().await;
    }
}

/// Read-only connection used by the health checks.
pub struct PostgresInspector {
    conn: PgConnection,
}

impl PostgresInspector {
    pub async fn connect(cfg: &DatabaseConfig) -> Result<Self, VerifyError> {
        Self::connect_with(&connect_options(cfg)).await
    }

    pub async fn connect_with(options: &PgConnectOptions) -> Result<Self, VerifyError> {
        let conn = PgConnection::connect_with(options)
            .await
            .map_err(VerifyError::Connect)?;
        Ok(Self { conn })
    }

    /// Most recent rows, newest first.
    pub async fn recent_records(&mut self, limit: i64) -> Result<Vec<StoredWeatherRecord>, VerifyError> {
        let rows = sqlx::query(
            r#"
SELECT id, city_name, api_response, api_call_timestamp, ingestion_timestamp
FROM raw.weather_data
ORDER BY api_call_timestamp DESC, id DESC
LIMIT $1
"#,
        )
        .bind(limit)
        .fetch_all(&mut self.conn)
        .await
        .map_err(|source| VerifyError::Query {
            what: "recent records",
            source,
        })?;

        rows.iter()
            .map(|row| record_from_row(row).map_err(|source| VerifyError::Query {
                what: "decode record",
                source,
            }))
            .collect()
    }

    pub async fn close(self) {
        if let Err(e) = self.conn.close().await {
            log::warn!("Error closing PostgreSQL connection: {e}");
        }
    }
}

fn record_from_row(row: &sqlx::postgres::PgRow) -> Result<StoredWeatherRecord, sqlx::Error> {
    let api_response: Json<serde_json::Value> = row.try_get("api_response")?;
    let called: NaiveDateTime = row.try_get("api_call_timestamp")?;
    let ingested: NaiveDateTime = row.try_get("ingestion_timestamp")?;
    let id: i32 = row.try_get("id")?;

    Ok(StoredWeatherRecord {
        id: i64::from(id),
        city_name: row.try_get("city_name")?,
        api_response: api_response.0,
        api_call_timestamp: called.and_utc(),
        ingestion_timestamp: ingested.and_utc(),
    })
}

#[async_trait]
impl StoreInspector for PostgresInspector {
    async fn ping(&mut self) -> Result<(), VerifyError> {
        self.conn.ping().await.map_err(|source| VerifyError::Query {
            what: "ping",
            source,
        })
    }

    async fn existing_schemas(&mut self) -> Result<Vec<String>, VerifyError> {
        sqlx::query_scalar("SELECT schema_name::text FROM information_schema.schemata")
            .fetch_all(&mut self.conn)
            .await
            .map_err(|source| VerifyError::Query {
                what: "list schemas",
                source,
            })
    }

    async fn table_exists(&mut self, schema: &str, table: &str) -> Result<bool, VerifyError> {
        sqlx::query_scalar(
            r#"
SELECT EXISTS (
    SELECT 1 FROM information_schema.tables
    WHERE table_schema = $1 AND table_name = $2
)
"#,
        )
        .bind(schema)
        .bind(table)
        .fetch_one(&mut self.conn)
        .await
        .map_err(|source| VerifyError::Query {
            what: "table exists",
            source,
        })
    }

    async fn count_records(&mut self) -> Result<i64, VerifyError> {
        sqlx::query_scalar("SELECT COUNT(*) FROM raw.weather_data")
            .fetch_one(&mut self.conn)
            .await
            .map_err(|source| VerifyError::Query {
                what: "count records",
                source,
            })
    }

    async fn latest_call_timestamp(&mut self) -> Result<Option<DateTime<Utc>>, VerifyError> {
        let latest: Option<NaiveDateTime> =
            sqlx::query_scalar("SELECT MAX(api_call_timestamp) FROM raw.weather_data")
                .fetch_one(&mut self.conn)
                .await
                .map_err(|source| VerifyError::Query {
                    what: "latest call timestamp",
                    source,
                })?;

        Ok(latest.map(|ts| ts.and_utc()))
    }
}
