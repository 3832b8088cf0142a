//! Primary store connection pool
//!
//! One pool per process, built lazily on first use and probed once. A failed
//! probe is fatal to the caller; there is no retry for the primary store.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::PgPool;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::config::{ConnectionConfig, PoolTuning};
use crate::error::StoreError;

/// Builds, probes and closes the underlying pool.
#[async_trait]
pub trait StoreBackend: Send + Sync + 'static {
    type Handle: Clone + Send + Sync + 'static;

    async fn open(
        &self,
        config: &ConnectionConfig,
        tuning: &PoolTuning,
    ) -> Result<Self::Handle, sqlx::Error>;

    async fn probe(&self, handle: &Self::Handle) -> Result<(), sqlx::Error>;

    async fn close(&self, handle: Self::Handle);
}

/// Postgres backend over `sqlx`
#[derive(Debug, Clone, Copy, Default)]
pub struct PgBackend;

#[async_trait]
impl StoreBackend for PgBackend {
    type Handle = PgPool;

    async fn open(
        &self,
        config: &ConnectionConfig,
        tuning: &PoolTuning,
    ) -> Result<PgPool, sqlx::Error> {
        let options = PgConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .database(&config.database)
            .username(&config.user)
            .password(&config.password);

        // Lazy so the probe below is the first connection attempt,
        // bounded by acquire_timeout.
        Ok(PgPoolOptions::new()
            .max_connections(tuning.max_connections)
            .idle_timeout(tuning.idle_timeout)
            .acquire_timeout(tuning.connect_timeout)
            .connect_lazy_with(options))
    }

    async fn probe(&self, handle: &PgPool) -> Result<(), sqlx::Error> {
        let (one,): (i32,) = sqlx::query_as("SELECT 1").fetch_one(handle).await?;
        debug!(result = one, "primary store probe ok");
        Ok(())
    }

    async fn close(&self, handle: PgPool) {
        handle.close().await;
    }
}

/// Process-wide pool owner. Share it by reference; do not construct twice.
pub struct StorePool<B: StoreBackend = PgBackend> {
    backend: B,
    config: ConnectionConfig,
    tuning: PoolTuning,
    pool: OnceCell<B::Handle>,
    closed: AtomicBool,
}

impl<B: StoreBackend> StorePool<B> {
    pub fn new(backend: B, config: ConnectionConfig, tuning: PoolTuning) -> Self {
        Self {
            backend,
            config,
            tuning,
            pool: OnceCell::new(),
            closed: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Return the shared pool, building and probing it on first call.
    ///
    /// Concurrent first callers wait on the same construction and all
    /// receive the same handle. Once built, this is a clone with no locking.
    /// Query errors after boot are not handled here.
    pub async fn get_pool(&self) -> Result<B::Handle, StoreError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }
        let handle = self.pool.get_or_try_init(|| self.build()).await?;
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }
        Ok(handle.clone())
    }

    async fn build(&self) -> Result<B::Handle, StoreError> {
        info!(
            host = %self.config.host,
            port = self.config.port,
            database = %self.config.database,
            source = self.config.source().as_str(),
            "connecting to primary store"
        );

        let handle = self
            .backend
            .open(&self.config, &self.tuning)
            .await
            .map_err(|err| StoreError::connect(&self.config, err))?;

        if let Err(err) = self.backend.probe(&handle).await {
            self.backend.close(handle).await;
            return Err(StoreError::connect(&self.config, err));
        }

        // Shut down while the probe was in flight
        if self.closed.load(Ordering::Acquire) {
            self.backend.close(handle).await;
            return Err(StoreError::Closed);
        }

        info!(
            max_connections = self.tuning.max_connections,
            "primary store pool ready"
        );
        Ok(handle)
    }

    /// Close the pool. Safe to call any number of times.
    pub async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            debug!("primary store pool already shut down");
            return;
        }
        match self.pool.get() {
            Some(handle) => {
                self.backend.close(handle.clone()).await;
                info!("primary store pool closed");
            }
            None => debug!("primary store shutdown before first use"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EnvSnapshot;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[derive(Debug)]
    struct FakePool;

    #[derive(Default)]
    struct FakeBackend {
        opened: AtomicUsize,
        probes: AtomicUsize,
        closed: AtomicUsize,
        fail_probe: bool,
    }

    #[async_trait]
    impl StoreBackend for Arc<FakeBackend> {
        type Handle = Arc<FakePool>;

        async fn open(
            &self,
            _config: &ConnectionConfig,
            _tuning: &PoolTuning,
        ) -> Result<Arc<FakePool>, sqlx::Error> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            // Widen the race window for concurrent callers
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(Arc::new(FakePool))
        }

        async fn probe(&self, _handle: &Arc<FakePool>) -> Result<(), sqlx::Error> {
            self.probes.fetch_add(1, Ordering::SeqCst);
            if self.fail_probe {
                Err(sqlx::Error::PoolTimedOut)
            } else {
                Ok(())
            }
        }

        async fn close(&self, _handle: Arc<FakePool>) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn pool_with(backend: Arc<FakeBackend>) -> Arc<StorePool<Arc<FakeBackend>>> {
        let config = ConnectionConfig::resolve(&EnvSnapshot::default());
        Arc::new(StorePool::new(backend, config, PoolTuning::default()))
    }

    #[tokio::test]
    async fn concurrent_first_callers_share_one_pool() {
        let backend = Arc::new(FakeBackend::default());
        let pool = pool_with(backend.clone());

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let pool = pool.clone();
                tokio::spawn(async move { pool.get_pool().await.expect("pool") })
            })
            .collect();

        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.expect("task panicked"));
        }

        let first = &results[0];
        assert!(results.iter().all(|h| Arc::ptr_eq(h, first)));
        assert_eq!(backend.opened.load(Ordering::SeqCst), 1);
        assert_eq!(backend.probes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn existing_pool_is_not_reprobed() {
        let backend = Arc::new(FakeBackend::default());
        let pool = pool_with(backend.clone());

        pool.get_pool().await.unwrap();
        pool.get_pool().await.unwrap();
        assert_eq!(backend.opened.load(Ordering::SeqCst), 1);
        assert_eq!(backend.probes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_probe_is_fatal_and_not_retained() {
        let backend = Arc::new(FakeBackend {
            fail_probe: true,
            ..Default::default()
        });
        let pool = pool_with(backend.clone());

        let err = pool.get_pool().await.unwrap_err();
        assert!(matches!(err, StoreError::Connect { port: 5432, .. }));
        assert!(!pool.pool.initialized());
        assert_eq!(backend.closed.load(Ordering::SeqCst), 1);

        // Not retained: the next caller builds from scratch
        assert!(pool.get_pool().await.is_err());
        assert_eq!(backend.opened.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn shutdown_twice_is_a_no_op() {
        let backend = Arc::new(FakeBackend::default());
        let pool = pool_with(backend.clone());

        pool.get_pool().await.unwrap();
        pool.shutdown().await;
        pool.shutdown().await;
        assert_eq!(backend.closed.load(Ordering::SeqCst), 1);
        assert!(matches!(pool.get_pool().await, Err(StoreError::Closed)));
    }

    #[tokio::test]
    async fn shutdown_before_first_use_is_a_no_op() {
        let backend = Arc::new(FakeBackend::default());
        let pool = pool_with(backend.clone());

        pool.shutdown().await;
        assert_eq!(backend.opened.load(Ordering::SeqCst), 0);
        assert_eq!(backend.closed.load(Ordering::SeqCst), 0);
        assert!(matches!(pool.get_pool().await, Err(StoreError::Closed)));
        assert_eq!(backend.opened.load(Ordering::SeqCst), 0);
    }
}
