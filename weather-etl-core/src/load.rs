//! All-or-nothing, idempotent persistence of extracted observations.

use crate::{
    error::LoadError,
    model::{LoadReport, WeatherObservation},
    store::{StoreSession, WeatherStore},
};

pub struct Loader<S> {
    store: S,
}

impl<S: WeatherStore> Loader<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Persist `observations` in one transaction.
    ///
    /// Rows whose (city, call timestamp) already exist are skipped and counted
    /// as duplicates. Any other failure rolls back the whole batch and is
    /// returned to the caller. The session is closed on every path.
    pub async fn load(&self, observations: &[WeatherObservation]) -> Result<LoadReport, LoadError> {
        log::info!("Connecting to store...");
        let mut session = self.store.open().await.inspect_err(|e| {
            log::error!("Error loading data: {e}");
        })?;

        let result = write_batch(session.as_mut(), observations).await;

        if let Err(e) = &result {
            log::error!("Error loading data: {e}");
            match session.rollback().await {
                Ok(()) | Err(LoadError::TransactionFinished) => {}
                Err(rollback_err) => log::warn!("Rollback failed: {rollback_err}"),
            }
        }

        session.close().await;
        log::info!("Store connection closed.");

        result
    }
}

async fn write_batch(
    session: &mut dyn StoreSession,
    observations: &[WeatherObservation],
) -> Result<LoadReport, LoadError> {
    log::info!("Ensuring schema and table exist...");
    session.ensure_schema().await?;

    log::info!("Inserting {} records...", observations.len());
    let mut report = LoadReport {
        received: observations.len(),
        ..LoadReport::default()
    };

    for observation in observations {
        let outcome = session.insert_if_absent(observation).await?;
        log::debug!(
            "{} at {}: {:?}",
            observation.city_name,
            observation.api_call_timestamp.to_rfc3339(),
            outcome
        );
        report.record(outcome);
    }

    session.commit().await?;
    log::info!(
        "Successfully inserted {} new records ({} duplicates skipped).",
        report.inserted,
        report.duplicates
    );

    Ok(report)
}
