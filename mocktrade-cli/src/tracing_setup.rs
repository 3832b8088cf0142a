//! Tracing setup for the mocktrade CLI
//!
//! Usage:
//!   mocktrade --debug ...              # Debug logging to console
//!   LOG_LEVEL=WARN mocktrade ...       # ERROR | WARN | INFO | DEBUG
//!   RUST_LOG=mocktrade_core=debug ...  # Fine-grained control, wins over both

use anyhow::{anyhow, Result};
use mocktrade_core::{EnvSnapshot, LogLevel};
use tracing_subscriber::EnvFilter;

/// Tracing configuration options
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Force debug logging unless RUST_LOG is set
    pub debug: bool,
    /// Level from LOG_LEVEL
    pub level: LogLevel,
}

impl TracingConfig {
    pub fn from_env(env: &EnvSnapshot, debug: bool) -> Self {
        Self {
            debug,
            level: LogLevel::resolve(env),
        }
    }

    fn default_directive(&self) -> &'static str {
        if self.debug {
            LogLevel::Debug.as_directive()
        } else {
            self.level.as_directive()
        }
    }
}

/// Initialize console tracing. Log lines go to stderr with timestamps.
pub fn init(config: &TracingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.default_directive()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(config.debug)
        .with_writer(std::io::stderr)
        .compact()
        .try_init()
        .map_err(|err| anyhow!(err))
}
