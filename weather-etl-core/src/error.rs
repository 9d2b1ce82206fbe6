use thiserror::Error;

/// Problems with configuration. A missing API key is fatal for extraction.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(
        "WEATHERSTACK_API_KEY not found.\n\
         Hint: export WEATHERSTACK_API_KEY or set `api_key` in the config file."
    )]
    MissingApiKey,

    #[error("Invalid value for {key}: '{value}'")]
    InvalidValue { key: String, value: String },

    #[error("Failed to read config file: {path}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file: {path}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("Could not determine platform config directory")]
    NoConfigDir,
}

/// Per-city fetch failure. Always recoverable: the city is skipped for this run.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("HTTP status {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("API error {code}: {info}")]
    Api { code: i64, info: String },

    #[error("invalid response body: {0}")]
    Decode(String),
}

/// Failure while persisting a batch. The whole batch is rolled back.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to connect to store")]
    Connect(#[source] sqlx::Error),

    #[error("failed to ensure schema")]
    Schema(#[source] sqlx::Error),

    #[error("failed to insert record for {city} at {timestamp}")]
    Insert {
        city: String,
        timestamp: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("transaction error")]
    Transaction(#[source] sqlx::Error),

    #[error("transaction already finished")]
    TransactionFinished,

    #[error("store error: {0}")]
    Store(String),
}

/// Failure of a read-only health check query.
#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("failed to connect to store")]
    Connect(#[source] sqlx::Error),

    #[error("query '{what}' failed")]
    Query {
        what: &'static str,
        #[source]
        source: sqlx::Error,
    },
}

pub(crate) fn truncate_body(body: &str) -> String {
    const MAX: usize = 200;
    match body.char_indices().nth(MAX) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}
