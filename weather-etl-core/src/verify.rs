//! Read-only operational health checks against the store.

use chrono::{DateTime, TimeDelta, Utc};
use std::{fmt, future::Future, time::Duration};

use crate::{
    Config,
    error::VerifyError,
    store::{PostgresInspector, RAW_SCHEMA, StoreInspector, WEATHER_TABLE},
};

pub const EXPECTED_SCHEMAS: &[&str] = &[RAW_SCHEMA, "public"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckStatus {
    Pass,
    Warn,
    Fail,
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CheckStatus::Pass => "PASS",
            CheckStatus::Warn => "WARN",
            CheckStatus::Fail => "FAIL",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckResult {
    pub name: String,
    pub status: CheckStatus,
    pub detail: String,
}

#[derive(Debug, Default)]
pub struct VerifyReport {
    pub checks: Vec<CheckResult>,
}

impl VerifyReport {
    fn push(&mut self, name: impl Into<String>, status: CheckStatus, detail: impl Into<String>) {
        let check = CheckResult {
            name: name.into(),
            status,
            detail: detail.into(),
        };
        match check.status {
            CheckStatus::Pass => log::info!("{}: {}", check.name, check.detail),
            CheckStatus::Warn => log::warn!("{}: {}", check.name, check.detail),
            CheckStatus::Fail => log::error!("{}: {}", check.name, check.detail),
        }
        self.checks.push(check);
    }

    /// True when no check failed. Warnings do not count.
    pub fn passed(&self) -> bool {
        self.checks.iter().all(|c| c.status != CheckStatus::Fail)
    }

    pub fn status_of(&self, name: &str) -> Option<CheckStatus> {
        self.checks.iter().find(|c| c.name == name).map(|c| c.status)
    }
}

/// Age of the newest observation relative to a threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    Fresh { age: TimeDelta },
    Stale { age: TimeDelta },
    Empty,
}

impl Freshness {
    pub fn evaluate(latest: Option<DateTime<Utc>>, now: DateTime<Utc>, threshold: Duration) -> Self {
        let Some(latest) = latest else {
            return Freshness::Empty;
        };

        let threshold = TimeDelta::from_std(threshold).unwrap_or(TimeDelta::MAX);
        let age = now - latest;

        if age < threshold {
            Freshness::Fresh { age }
        } else {
            Freshness::Stale { age }
        }
    }
}

/// Run every check through an already connected inspector.
pub async fn run_checks(
    inspector: &mut dyn StoreInspector,
    threshold: Duration,
    now: DateTime<Utc>,
) -> VerifyReport {
    let mut report = VerifyReport::default();

    match inspector.ping().await {
        Ok(()) => report.push("connection", CheckStatus::Pass, "store is reachable"),
        Err(e) => {
            report.push("connection", CheckStatus::Fail, e.to_string());
            return report;
        }
    }

    match inspector.existing_schemas().await {
        Ok(existing) => {
            for schema in EXPECTED_SCHEMAS {
                let name = format!("schema {schema}");
                if existing.iter().any(|s| s == schema) {
                    report.push(name, CheckStatus::Pass, "exists");
                } else {
                    report.push(name, CheckStatus::Warn, "not found (might be created later)");
                }
            }
        }
        Err(e) => report.push("schemas", CheckStatus::Fail, e.to_string()),
    }

    let table = format!("table {RAW_SCHEMA}.{WEATHER_TABLE}");
    match inspector.table_exists(RAW_SCHEMA, WEATHER_TABLE).await {
        Ok(true) => report.push(&table, CheckStatus::Pass, "exists"),
        Ok(false) => {
            report.push(&table, CheckStatus::Fail, "missing");
            return report;
        }
        Err(e) => {
            report.push(&table, CheckStatus::Fail, e.to_string());
            return report;
        }
    }

    match inspector.count_records().await {
        Ok(count) => report.push("records", CheckStatus::Pass, format!("{count} rows")),
        Err(e) => report.push("records", CheckStatus::Fail, e.to_string()),
    }

    match inspector.latest_call_timestamp().await {
        Ok(latest) => match Freshness::evaluate(latest, now, threshold) {
            Freshness::Fresh { age } => report.push(
                "freshness",
                CheckStatus::Pass,
                format!("data is fresh, last run {} (age {age})", fmt_ts(latest)),
            ),
            Freshness::Stale { age } => report.push(
                "freshness",
                CheckStatus::Fail,
                format!("data is stale, last run {} (age {age})", fmt_ts(latest)),
            ),
            Freshness::Empty => report.push(
                "freshness",
                CheckStatus::Fail,
                format!("no data found in {RAW_SCHEMA}.{WEATHER_TABLE}"),
            ),
        },
        Err(e) => report.push("freshness", CheckStatus::Fail, e.to_string()),
    }

    report
}

fn fmt_ts(ts: Option<DateTime<Utc>>) -> String {
    ts.map(|t| t.to_rfc3339()).unwrap_or_default()
}

/// Call `connect` up to `attempts` times, sleeping `delay` between failures.
///
/// Returns the last error once every attempt has failed.
pub async fn connect_with_retry<T, F, Fut>(
    attempts: u32,
    delay: Duration,
    mut connect: F,
) -> Result<T, VerifyError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, VerifyError>>,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;

    loop {
        match connect().await {
            Ok(conn) => return Ok(conn),
            Err(e) if attempt < attempts => {
                log::warn!("Connection failed (attempt {attempt}/{attempts}): {e}");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                log::error!("Could not connect after {attempts} attempts.");
                return Err(e);
            }
        }
    }
}

/// Connect to PostgreSQL with the configured settings and run all checks.
pub async fn verify_postgres(config: &Config) -> VerifyReport {
    log::info!(
        "Connecting to database {} at {}:{}...",
        config.database.name,
        config.database.host,
        config.database.port
    );
    let connected = connect_with_retry(config.connect_retries, config.connect_retry_delay(), || {
        PostgresInspector::connect(&config.database)
    })
    .await;

    let mut inspector = match connected {
        Ok(inspector) => inspector,
        Err(e) => {
            let mut report = VerifyReport::default();
            report.push("connection", CheckStatus::Fail, format!("{e}: {}", source_of(&e)));
            return report;
        }
    };

    let report = run_checks(&mut inspector, config.freshness_threshold(), Utc::now()).await;
    inspector.close().await;
    report
}

fn source_of(e: &dyn std::error::Error) -> String {
    e.source().map(|s| s.to_string()).unwrap_or_default()
}
