//! In-process store with the same observable semantics as the PostgreSQL
//! backend: staged writes become visible on commit, the natural key is
//! unique, and ids come from a counter that is not rolled back.
//!
//! A key staged by one open session is reserved until that session ends.
//! Another session inserting the same key gets `Duplicate` immediately,
//! where PostgreSQL would wait for the first transaction to finish.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::{
    collections::HashSet,
    sync::{Arc, Mutex, MutexGuard},
};

use crate::{
    error::{LoadError, VerifyError},
    model::{InsertOutcome, NaturalKey, StoredWeatherRecord, WeatherObservation},
};

use super::{RAW_SCHEMA, StoreInspector, StoreSession, WEATHER_TABLE, WeatherStore};

#[derive(Debug, Default)]
struct State {
    schema_ready: bool,
    rows: Vec<StoredWeatherRecord>,
    /// Keys staged by sessions that have not finished yet.
    pending: HashSet<NaturalKey>,
    last_id: i64,
    insert_calls: usize,
    fail_on_insert: Option<usize>,
    open_sessions: usize,
}

impl State {
    fn contains(&self, key: &NaturalKey) -> bool {
        self.rows.iter().any(|r| &r.natural_key() == key)
    }

    fn release(&mut self, staged: &[StoredWeatherRecord]) {
        for row in staged {
            self.pending.remove(&row.natural_key());
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose `n`th insert call (1-based, counted across sessions)
    /// fails with a store error.
    pub fn failing_on_insert(n: usize) -> Self {
        let store = Self::default();
        store.lock().fail_on_insert = Some(n);
        store
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // A poisoned lock only means a test panicked mid-update.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Committed rows in insertion order.
    pub fn records(&self) -> Vec<StoredWeatherRecord> {
        self.lock().rows.clone()
    }

    pub fn len(&self) -> usize {
        self.lock().rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn schema_ready(&self) -> bool {
        self.lock().schema_ready
    }

    /// Number of insert statements issued, including no-ops and failures.
    pub fn insert_calls(&self) -> usize {
        self.lock().insert_calls
    }

    pub fn open_sessions(&self) -> usize {
        self.lock().open_sessions
    }
}

#[async_trait]
impl WeatherStore for MemoryStore {
    async fn open(&self) -> Result<Box<dyn StoreSession>, LoadError> {
        self.lock().open_sessions += 1;
        Ok(Box::new(MemorySession {
            store: self.clone(),
            staged: Vec::new(),
            schema_staged: false,
            finished: false,
        }))
    }
}

struct MemorySession {
    store: MemoryStore,
    staged: Vec<StoredWeatherRecord>,
    schema_staged: bool,
    finished: bool,
}

impl MemorySession {
    fn ensure_active(&self) -> Result<(), LoadError> {
        if self.finished {
            Err(LoadError::TransactionFinished)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl StoreSession for MemorySession {
    async fn ensure_schema(&mut self) -> Result<(), LoadError> {
        self.ensure_active()?;
        self.schema_staged = true;
        Ok(())
    }

    async fn insert_if_absent(
        &mut self,
        observation: &WeatherObservation,
    ) -> Result<InsertOutcome, LoadError> {
        self.ensure_active()?;

        let mut state = self.store.lock();
        if !state.schema_ready && !self.schema_staged {
            return Err(LoadError::Store(format!(
                "relation \"{RAW_SCHEMA}.{WEATHER_TABLE}\" does not exist"
            )));
        }

        state.insert_calls += 1;
        if state.fail_on_insert == Some(state.insert_calls) {
            return Err(LoadError::Store(format!(
                "injected failure on insert #{}",
                state.insert_calls
            )));
        }

        let key = observation.natural_key();
        if state.contains(&key) || state.pending.contains(&key) {
            return Ok(InsertOutcome::Duplicate);
        }
        state.pending.insert(key);

        state.last_id += 1;
        self.staged.push(StoredWeatherRecord {
            id: state.last_id,
            city_name: observation.city_name.clone(),
            api_response: observation.payload.clone(),
            api_call_timestamp: observation.api_call_timestamp,
            ingestion_timestamp: observation.ingestion_timestamp,
        });

        Ok(InsertOutcome::Inserted)
    }

    async fn commit(&mut self) -> Result<(), LoadError> {
        self.ensure_active()?;
        self.finished = true;

        let mut state = self.store.lock();
        if self.schema_staged {
            state.schema_ready = true;
        }
        state.release(&self.staged);
        state.rows.append(&mut self.staged);
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), LoadError> {
        self.ensure_active()?;
        self.finished = true;
        self.store.lock().release(&self.staged);
        self.staged.clear();
        self.schema_staged = false;
        Ok(())
    }

    async fn close(self: Box<Self>) {
        let mut state = self.store.lock();
        // Closing without commit discards the staged rows.
        state.release(&self.staged);
        state.open_sessions = state.open_sessions.saturating_sub(1);
    }
}

#[async_trait]
impl StoreInspector for MemoryStore {
    async fn ping(&mut self) -> Result<(), VerifyError> {
        Ok(())
    }

    async fn existing_schemas(&mut self) -> Result<Vec<String>, VerifyError> {
        let mut schemas = vec!["public".to_string()];
        if self.schema_ready() {
            schemas.push(RAW_SCHEMA.to_string());
        }
        Ok(schemas)
    }

    async fn table_exists(&mut self, schema: &str, table: &str) -> Result<bool, VerifyError> {
        Ok(schema == RAW_SCHEMA && table == WEATHER_TABLE && self.schema_ready())
    }

    async fn count_records(&mut self) -> Result<i64, VerifyError> {
        Ok(i64::try_from(self.len()).unwrap_or(i64::MAX))
    }

    async fn latest_call_timestamp(&mut self) -> Result<Option<DateTime<Utc>>, VerifyError> {
        Ok(self.lock().rows.iter().map(|r| r.api_call_timestamp).max())
    }
}
