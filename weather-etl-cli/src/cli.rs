use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use std::{
    fs::File,
    io::{self, BufReader, BufWriter, Read, Write},
    path::{Path, PathBuf},
};
use weather_etl_core::{
    Config, Extractor, Loader, Pipeline, PostgresStore, WeatherObservation,
    pipeline::{EXTRACT_TASK, LOAD_TASK},
    verify::verify_postgres,
};

/// Top-level CLI struct.
#[derive(Debug, Parser)]
#[command(name = "weather-etl", version, about = "Weather extract/load pipeline")]
pub struct Cli {
    /// Path to a TOML config file. Environment variables override it.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Extract every city and load the result in one go.
    Run,

    /// Fetch observations and write them as JSON.
    Extract {
        /// Output file; stdout when absent.
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Load observations previously written by `extract`.
    Load {
        /// Input file; stdin when absent.
        #[arg(long, short)]
        input: Option<PathBuf>,
    },

    /// Check connectivity, schema and data freshness.
    Verify,
}

impl Cli {
    pub async fn run(self) -> anyhow::Result<()> {
        let config = Config::load(self.config.as_deref()).context("Failed to load configuration")?;

        match self.command {
            Command::Run => {
                let pipeline = Pipeline::new(
                    Extractor::from_config(&config)?,
                    Loader::new(PostgresStore::from_config(&config.database)),
                );
                let report = pipeline.run_once().await?;
                log::info!(
                    "Run finished: {} fetched, {} failed, {} inserted, {} duplicates",
                    report.extract.observations.len(),
                    report.extract.failures.len(),
                    report.load.inserted,
                    report.load.duplicates
                );
            }
            Command::Extract { output } => {
                log::info!("Starting task {EXTRACT_TASK}");
                let report = Extractor::from_config(&config)?.extract().await;
                write_observations(output.as_deref(), &report.observations)?;
            }
            Command::Load { input } => {
                log::info!("Starting task {LOAD_TASK}");
                let observations = read_observations(input.as_deref())?;
                let loader = Loader::new(PostgresStore::from_config(&config.database));
                let report = loader.load(&observations).await?;
                println!("{}", serde_json::to_string(&report)?);
            }
            Command::Verify => {
                let report = verify_postgres(&config).await;
                for check in &report.checks {
                    println!("{}: {} - {}", check.status, check.name, check.detail);
                }
                if !report.passed() {
                    bail!("Verification failed");
                }
            }
        }

        Ok(())
    }
}

fn write_observations(path: Option<&Path>, observations: &[WeatherObservation]) -> anyhow::Result<()> {
    let writer: Box<dyn Write> = match path {
        Some(path) => Box::new(
            File::create(path)
                .with_context(|| format!("Failed to create output file: {}", path.display()))?,
        ),
        None => Box::new(io::stdout().lock()),
    };
    let mut writer = BufWriter::new(writer);

    serde_json::to_writer(&mut writer, observations).context("Failed to serialize observations")?;
    writeln!(writer)?;
    writer.flush().context("Failed to write observations")?;

    Ok(())
}

fn read_observations(path: Option<&Path>) -> anyhow::Result<Vec<WeatherObservation>> {
    let reader: Box<dyn Read> = match path {
        Some(path) => Box::new(
            File::open(path)
                .with_context(|| format!("Failed to open input file: {}", path.display()))?,
        ),
        None => Box::new(io::stdin().lock()),
    };

    serde_json::from_reader(BufReader::new(reader)).context("Failed to parse observations JSON")
}
