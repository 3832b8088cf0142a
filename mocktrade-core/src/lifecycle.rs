//! Process lifecycle: the data-tier owner and the guard for script entry points

use std::future::Future;
use std::io::Write;
use std::process::ExitCode;

use sqlx::PgPool;
use tracing::{error, info};

use crate::cache::{CacheClient, CacheStatus, RedisConnector};
use crate::config::{CacheConfig, ConnectionConfig, EnvSnapshot, PoolTuning};
use crate::error::{MigrationError, StoreError};
use crate::migrate::MigrationRunner;
use crate::store::{PgBackend, StorePool};

/// Owns the one store pool and the one cache client for this process.
///
/// Build it once at start-up and pass it by reference to everything that
/// needs data access.
pub struct DataTier {
    store: StorePool<PgBackend>,
    cache: CacheClient<RedisConnector>,
}

impl DataTier {
    pub fn from_env(env: &EnvSnapshot) -> Self {
        let connection = ConnectionConfig::resolve(env);
        let cache = CacheConfig::resolve(env);
        Self {
            store: StorePool::new(PgBackend, connection, PoolTuning::default()),
            cache: CacheClient::redis(&cache),
        }
    }

    pub fn connection_config(&self) -> &ConnectionConfig {
        self.store.config()
    }

    /// Query-capable handle; the first call connects and probes.
    pub async fn pool(&self) -> Result<PgPool, StoreError> {
        self.store.get_pool().await
    }

    /// Cache handle, or `None` while the cache is unavailable.
    pub fn cache(&self) -> Option<redis::aio::MultiplexedConnection> {
        self.cache.get_cache()
    }

    pub fn cache_status(&self) -> CacheStatus {
        self.cache.status()
    }

    pub async fn connect_cache(&self) {
        self.cache.connect().await;
    }

    pub async fn migration_runner(&self) -> Result<MigrationRunner, StoreError> {
        Ok(MigrationRunner::new(self.pool().await?))
    }

    pub async fn shutdown(&self) {
        self.cache.shutdown();
        self.store.shutdown().await;
    }

    /// Run a top-level operation under [`guard`], then shut the tier down
    /// whatever the outcome.
    pub async fn run_guarded<T, Fut>(&self, operation: &str, fut: Fut) -> GuardOutcome
    where
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let outcome = guard(operation, fut).await;
        self.shutdown().await;
        flush_diagnostics();
        outcome
    }
}

/// Why a guarded operation failed; selects the exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    StoreConnect,
    Migration,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardOutcome {
    Succeeded,
    Failed(FailureKind),
}

impl GuardOutcome {
    pub fn exit_code(self) -> ExitCode {
        match self {
            Self::Succeeded => ExitCode::SUCCESS,
            Self::Failed(FailureKind::Other) => ExitCode::from(1),
            Self::Failed(FailureKind::StoreConnect) => ExitCode::from(2),
            Self::Failed(FailureKind::Migration) => ExitCode::from(3),
        }
    }
}

/// Await a top-level operation and map its result to a process outcome.
///
/// Failures are logged with their full context chain. There are no retries
/// here.
pub async fn guard<T, Fut>(operation: &str, fut: Fut) -> GuardOutcome
where
    Fut: Future<Output = anyhow::Result<T>>,
{
    let outcome = match fut.await {
        Ok(_) => {
            info!(operation, "completed");
            GuardOutcome::Succeeded
        }
        Err(err) => {
            let kind = failure_kind(&err);
            error!(operation, kind = ?kind, "failed: {err:#}");
            GuardOutcome::Failed(kind)
        }
    };
    flush_diagnostics();
    outcome
}

fn failure_kind(err: &anyhow::Error) -> FailureKind {
    for cause in err.chain() {
        if let Some(store) = cause.downcast_ref::<StoreError>() {
            return store_kind(store);
        }
        if cause.is::<MigrationError>() {
            return FailureKind::Migration;
        }
    }
    FailureKind::Other
}

fn store_kind(err: &StoreError) -> FailureKind {
    match err {
        StoreError::Connect { .. } => FailureKind::StoreConnect,
        StoreError::Closed => FailureKind::Other,
    }
}

fn flush_diagnostics() {
    let _ = std::io::stdout().flush();
    let _ = std::io::stderr().flush();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ScriptError;
    use crate::migrate::MigrationReport;
    use anyhow::Context;

    #[tokio::test]
    async fn success_maps_to_succeeded() {
        let outcome = guard("noop", async { Ok::<_, anyhow::Error>(42) }).await;
        assert_eq!(outcome, GuardOutcome::Succeeded);
    }

    #[tokio::test]
    async fn store_connect_failure_is_classified_through_context() {
        let outcome = guard("migrate", async {
            Err::<(), _>(StoreError::Connect {
                host: "db".into(),
                port: 5432,
                database: "mock_trading".into(),
                source: sqlx::Error::PoolTimedOut,
            })
            .context("opening primary store")
        })
        .await;
        assert_eq!(outcome, GuardOutcome::Failed(FailureKind::StoreConnect));
    }

    #[tokio::test]
    async fn migration_failure_is_classified() {
        let outcome = guard("migrate", async {
            Err::<(), _>(anyhow::Error::new(MigrationError::Fatal {
                unit: "003_create_orders".into(),
                report: MigrationReport::default(),
                source: ScriptError::new(Some("42601"), "syntax error"),
            }))
        })
        .await;
        assert_eq!(outcome, GuardOutcome::Failed(FailureKind::Migration));
    }

    #[tokio::test]
    async fn other_failures_exit_non_zero() {
        let outcome = guard("seed", async { Err::<(), _>(anyhow::anyhow!("boom")) }).await;
        assert_eq!(outcome, GuardOutcome::Failed(FailureKind::Other));
    }

    #[tokio::test]
    async fn tier_shutdown_without_use_is_safe() {
        let tier = DataTier::from_env(&EnvSnapshot::default());
        tier.shutdown().await;
        tier.shutdown().await;
        assert_eq!(tier.cache_status(), CacheStatus::Closed);
        assert!(tier.cache().is_none());
    }
}
