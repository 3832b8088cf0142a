//! Structured error types for the mocktrade data tier.
//!
//! Library code returns these `thiserror` types; the CLI wraps them in
//! `anyhow` with operation context.

use thiserror::Error;

/// Failures owned by the primary store pool (boot-time only).
#[derive(Error, Debug)]
pub enum StoreError {
    /// Pool construction or the liveness probe failed
    #[error("failed to connect to primary store at {host}:{port}/{database}: {source}")]
    Connect {
        host: String,
        port: u16,
        database: String,
        #[source]
        source: sqlx::Error,
    },

    /// The pool was shut down and will not be recreated
    #[error("primary store pool has been shut down")]
    Closed,
}

impl StoreError {
    pub fn connect(config: &crate::config::ConnectionConfig, source: sqlx::Error) -> Self {
        Self::Connect {
            host: config.host.clone(),
            port: config.port,
            database: config.database.clone(),
            source,
        }
    }
}

/// Cache connection failures. Never escape the cache client.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("cache connect timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("cache connection lost")]
    ConnectionLost,

    #[error("cache unavailable: {0}")]
    Unavailable(String),
}

/// A failure raised while executing one migration script.
///
/// `code` is the SQLSTATE reported by the store, when there is one.
#[derive(Error, Debug)]
#[error("{message}")]
pub struct ScriptError {
    pub code: Option<String>,
    pub message: String,
}

impl ScriptError {
    pub fn new(code: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            code: code.map(str::to_owned),
            message: message.into(),
        }
    }
}

impl From<sqlx::Error> for ScriptError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) => Self {
                code: db.code().map(|c| c.into_owned()),
                message: db.message().to_string(),
            },
            other => Self {
                code: None,
                message: other.to_string(),
            },
        }
    }
}

/// A migration failure that aborts the remaining run.
#[derive(Error, Debug)]
pub enum MigrationError {
    #[error("migration '{unit}' failed: {source}")]
    Fatal {
        unit: String,
        /// Outcomes up to and including the failed unit
        report: crate::migrate::MigrationReport,
        #[source]
        source: ScriptError,
    },
}
