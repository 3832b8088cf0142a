//! Connection configuration resolved from the process environment.
//!
//! Resolution is pure and total: malformed input falls through to defaults,
//! it never errors. The combined `DB_URL` accepts two shapes, tried in order:
//!
//! 1. `jdbc:postgresql://HOST:PORT/DATABASE` (credentials from `DB_USER` / `DB_PASSWORD`)
//! 2. `postgresql://[USER[:PASSWORD]@]HOST:PORT/DATABASE` (embedded credentials win)
//!
//! Anything else resolves from the discrete `DB_*` variables.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 5432;
pub const DEFAULT_DATABASE: &str = "mock_trading";
pub const DEFAULT_USER: &str = "postgres";
pub const DEFAULT_CACHE_PORT: u16 = 6379;

static JDBC_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^jdbc:postgresql://([^:/?#@]+):([0-9]+)/([^/?#]+)(?:\?.*)?$").unwrap()
});

static URI_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^postgresql://(?:([^:@/]+)(?::([^@]*))?@)?([^:/?#@]+):([0-9]+)/([^/?#]+)(?:\?.*)?$",
    )
    .unwrap()
});

/// Immutable view of the environment variables the data tier reads.
///
/// Empty values are treated as unset.
#[derive(Debug, Clone, Default)]
pub struct EnvSnapshot {
    vars: HashMap<String, String>,
}

impl EnvSnapshot {
    pub fn from_process() -> Self {
        Self {
            vars: std::env::vars().collect(),
        }
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    fn port(&self, key: &str, default: u16) -> u16 {
        self.get(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }
}

/// Which input tier produced a [`ConnectionConfig`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    Jdbc,
    Uri,
    Discrete,
}

impl ConfigSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Jdbc => "jdbc",
            Self::Uri => "uri",
            Self::Discrete => "discrete",
        }
    }
}

/// Parameters for the primary relational store
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    /// Always present; empty when nothing was configured
    pub password: String,
    source: ConfigSource,
}

impl ConnectionConfig {
    pub fn resolve(env: &EnvSnapshot) -> Self {
        if let Some(url) = env.get("DB_URL") {
            let url = url.trim();
            if let Some(config) = parse_jdbc(url, env).or_else(|| parse_uri(url, env)) {
                return config;
            }
        }

        Self {
            host: env.get("DB_HOST").unwrap_or(DEFAULT_HOST).to_string(),
            port: env.port("DB_PORT", DEFAULT_PORT),
            database: env.get("DB_NAME").unwrap_or(DEFAULT_DATABASE).to_string(),
            user: env_user(env),
            password: env_password(env),
            source: ConfigSource::Discrete,
        }
    }

    pub fn source(&self) -> ConfigSource {
        self.source
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &if self.password.is_empty() { "" } else { "***" })
            .field("source", &self.source)
            .finish()
    }
}

fn env_user(env: &EnvSnapshot) -> String {
    env.get("DB_USER").unwrap_or(DEFAULT_USER).to_string()
}

fn env_password(env: &EnvSnapshot) -> String {
    env.get("DB_PASSWORD")
        .or_else(|| env.get("DB_PASS"))
        .unwrap_or_default()
        .to_string()
}

fn parse_jdbc(url: &str, env: &EnvSnapshot) -> Option<ConnectionConfig> {
    let caps = JDBC_RE.captures(url)?;
    let port = caps[2].parse().ok()?;

    Some(ConnectionConfig {
        host: caps[1].to_string(),
        port,
        database: caps[3].to_string(),
        user: env_user(env),
        password: env_password(env),
        source: ConfigSource::Jdbc,
    })
}

fn parse_uri(url: &str, env: &EnvSnapshot) -> Option<ConnectionConfig> {
    let caps = URI_RE.captures(url)?;
    let port = caps[4].parse().ok()?;

    let user = caps
        .get(1)
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| env_user(env));
    let password = caps
        .get(2)
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| env_password(env));

    Some(ConnectionConfig {
        host: caps[3].to_string(),
        port,
        database: caps[5].to_string(),
        user,
        password,
        source: ConfigSource::Uri,
    })
}

/// Fixed pool tuning for the primary store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolTuning {
    pub max_connections: u32,
    pub idle_timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for PoolTuning {
    fn default() -> Self {
        Self {
            max_connections: 20,
            idle_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

/// Location of the cache layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    pub host: String,
    pub port: u16,
}

impl CacheConfig {
    pub fn resolve(env: &EnvSnapshot) -> Self {
        Self {
            host: env.get("REDIS_HOST").unwrap_or(DEFAULT_HOST).to_string(),
            port: env.port("REDIS_PORT", DEFAULT_CACHE_PORT),
        }
    }

    pub fn url(&self) -> String {
        format!("redis://{}:{}", self.host, self.port)
    }
}

/// Log verbosity from `LOG_LEVEL`. Each level admits itself and everything
/// more severe, which is what the matching `EnvFilter` directive does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
}

impl LogLevel {
    pub fn resolve(env: &EnvSnapshot) -> Self {
        env.get("LOG_LEVEL")
            .and_then(Self::parse)
            .unwrap_or(Self::Info)
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "ERROR" => Some(Self::Error),
            "WARN" | "WARNING" => Some(Self::Warn),
            "INFO" => Some(Self::Info),
            "DEBUG" => Some(Self::Debug),
            _ => None,
        }
    }

    pub fn as_directive(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> EnvSnapshot {
        EnvSnapshot::from_pairs(pairs.iter().copied())
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let config = ConnectionConfig::resolve(&EnvSnapshot::default());
        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 5432);
        assert_eq!(config.database, "mock_trading");
        assert_eq!(config.user, "postgres");
        assert_eq!(config.password, "");
        assert_eq!(config.source(), ConfigSource::Discrete);
    }

    #[test]
    fn jdbc_shape_takes_credentials_from_env() {
        let config = ConnectionConfig::resolve(&env(&[
            ("DB_URL", "jdbc:postgresql://db.internal:6543/trading"),
            ("DB_USER", "trader"),
            ("DB_PASSWORD", "s3cret"),
            ("DB_HOST", "ignored"),
        ]));
        assert_eq!(config.host, "db.internal");
        assert_eq!(config.port, 6543);
        assert_eq!(config.database, "trading");
        assert_eq!(config.user, "trader");
        assert_eq!(config.password, "s3cret");
        assert_eq!(config.source(), ConfigSource::Jdbc);
    }

    #[test]
    fn jdbc_shape_without_credentials_uses_fallbacks() {
        let config = ConnectionConfig::resolve(&env(&[(
            "DB_URL",
            "jdbc:postgresql://db:5432/trading?sslmode=require",
        )]));
        assert_eq!(config.database, "trading");
        assert_eq!(config.user, "postgres");
        assert_eq!(config.password, "");
    }

    #[test]
    fn uri_embedded_credentials_beat_env() {
        let config = ConnectionConfig::resolve(&env(&[
            ("DB_URL", "postgresql://alice:pw@10.0.0.5:5433/orders"),
            ("DB_USER", "bob"),
            ("DB_PASSWORD", "other"),
        ]));
        assert_eq!(config.host, "10.0.0.5");
        assert_eq!(config.port, 5433);
        assert_eq!(config.database, "orders");
        assert_eq!(config.user, "alice");
        assert_eq!(config.password, "pw");
        assert_eq!(config.source(), ConfigSource::Uri);
    }

    #[test]
    fn uri_user_without_password_falls_back_for_password_only() {
        let config = ConnectionConfig::resolve(&env(&[
            ("DB_URL", "postgresql://alice@db:5432/orders"),
            ("DB_USER", "bob"),
            ("DB_PASS", "from-env"),
        ]));
        assert_eq!(config.user, "alice");
        assert_eq!(config.password, "from-env");
    }

    #[test]
    fn uri_without_credentials_uses_env() {
        let config = ConnectionConfig::resolve(&env(&[
            ("DB_URL", "postgresql://db:5432/orders"),
            ("DB_USER", "bob"),
        ]));
        assert_eq!(config.user, "bob");
        assert_eq!(config.password, "");
    }

    #[test]
    fn unrecognised_url_falls_back_to_discrete_vars() {
        let config = ConnectionConfig::resolve(&env(&[
            ("DB_URL", "mysql://db:3306/orders"),
            ("DB_HOST", "pg.local"),
            ("DB_PORT", "6000"),
            ("DB_NAME", "ledger"),
        ]));
        assert_eq!(config.host, "pg.local");
        assert_eq!(config.port, 6000);
        assert_eq!(config.database, "ledger");
        assert_eq!(config.source(), ConfigSource::Discrete);
    }

    #[test]
    fn url_without_port_is_not_a_match() {
        let config = ConnectionConfig::resolve(&env(&[("DB_URL", "postgresql://db/orders")]));
        assert_eq!(config.source(), ConfigSource::Discrete);
        assert_eq!(config.host, "localhost");
    }

    #[test]
    fn out_of_range_port_in_url_falls_back() {
        let config =
            ConnectionConfig::resolve(&env(&[("DB_URL", "jdbc:postgresql://db:99999/orders")]));
        assert_eq!(config.source(), ConfigSource::Discrete);
        assert_eq!(config.port, 5432);
    }

    #[test]
    fn invalid_port_falls_back_to_default() {
        let config = ConnectionConfig::resolve(&env(&[("DB_PORT", "not-a-port")]));
        assert_eq!(config.port, 5432);
    }

    #[test]
    fn db_password_wins_over_db_pass() {
        let config =
            ConnectionConfig::resolve(&env(&[("DB_PASSWORD", "primary"), ("DB_PASS", "legacy")]));
        assert_eq!(config.password, "primary");
    }

    #[test]
    fn empty_values_count_as_unset() {
        let config = ConnectionConfig::resolve(&env(&[("DB_HOST", ""), ("DB_URL", "")]));
        assert_eq!(config.host, "localhost");
    }

    #[test]
    fn debug_output_redacts_password() {
        let config = ConnectionConfig::resolve(&env(&[("DB_PASSWORD", "hunter2")]));
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("***"));
    }

    #[test]
    fn cache_config_defaults_and_overrides() {
        let defaults = CacheConfig::resolve(&EnvSnapshot::default());
        assert_eq!(defaults.url(), "redis://localhost:6379");

        let custom = CacheConfig::resolve(&env(&[("REDIS_HOST", "cache"), ("REDIS_PORT", "7000")]));
        assert_eq!(custom.url(), "redis://cache:7000");
    }

    #[test]
    fn log_level_resolution() {
        assert_eq!(LogLevel::resolve(&EnvSnapshot::default()), LogLevel::Info);
        assert_eq!(LogLevel::resolve(&env(&[("LOG_LEVEL", "debug")])), LogLevel::Debug);
        assert_eq!(LogLevel::resolve(&env(&[("LOG_LEVEL", "loud")])), LogLevel::Info);
        assert_eq!(LogLevel::resolve(&env(&[("LOG_LEVEL", "WARN")])).as_directive(), "warn");
        assert!(LogLevel::Error < LogLevel::Warn);
    }
}
