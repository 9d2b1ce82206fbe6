//! Extract-then-load composition.
//!
//! Scheduling, retries and catch-up belong to whatever triggers the run; a
//! single call here is one run of both tasks.

use crate::{
    error::LoadError,
    extract::Extractor,
    load::Loader,
    model::{ExtractReport, LoadReport},
    store::WeatherStore,
};

pub const EXTRACT_TASK: &str = "extract_weather_data";
pub const LOAD_TASK: &str = "load_to_postgres";

#[derive(Debug)]
pub struct PipelineReport {
    pub extract: ExtractReport,
    pub load: LoadReport,
}

pub struct Pipeline<S> {
    extractor: Extractor,
    loader: Loader<S>,
}

impl<S: WeatherStore> Pipeline<S> {
    pub fn new(extractor: Extractor, loader: Loader<S>) -> Self {
        Self { extractor, loader }
    }

    /// Run extract, then hand its full output to load.
    pub async fn run_once(&self) -> Result<PipelineReport, LoadError> {
        log::info!("Starting task {EXTRACT_TASK}");
        let extract = self.extractor.extract().await;

        log::info!("Starting task {LOAD_TASK}");
        let load = self.loader.load(&extract.observations).await?;

        Ok(PipelineReport { extract, load })
    }
}
