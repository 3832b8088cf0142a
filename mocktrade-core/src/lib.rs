//! mocktrade-core: data-tier bootstrap
//!
//! - `config`: environment → connection parameters (pure, never fails)
//! - `store`: the process-wide primary store pool
//! - `cache`: the optional cache client with bounded reconnects
//! - `migrate`: ordered, forward-only migration runner
//! - `lifecycle`: the [`DataTier`] owner and the exit-code guard

pub mod cache;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod migrate;
pub mod store;

pub use cache::{CacheClient, CacheConnector, CacheStatus, ReconnectPolicy, RedisConnector};
pub use config::{CacheConfig, ConfigSource, ConnectionConfig, EnvSnapshot, LogLevel, PoolTuning};
pub use error::{CacheError, MigrationError, ScriptError, StoreError};
pub use lifecycle::{guard, DataTier, FailureKind, GuardOutcome};
pub use migrate::{
    classify, ErrorClass, MigrationOutcome, MigrationReport, MigrationRunner, MigrationSource,
    MigrationTarget, MigrationUnit,
};
pub use store::{PgBackend, StoreBackend, StorePool};
