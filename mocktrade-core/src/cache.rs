//! Optional cache-layer client with bounded reconnects
//!
//! State machine:
//!
//! ```text
//! Uninitialized -> Connecting -> Connected
//! Connected -> Reconnecting(n) -> Connected | Disabled
//! Connected -> Closed (shutdown)
//! ```
//!
//! Failures never leave this module. Callers ask [`CacheClient::get_cache`]
//! for a handle and carry on without one when it returns `None`.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::CacheConfig;
use crate::error::CacheError;

/// Connection errors logged per degraded episode before suppression
pub const ERROR_LOG_LIMIT: u32 = 3;

const REDIS_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const REDIS_HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(5);

/// Opens and checks one logical cache connection.
#[async_trait]
pub trait CacheConnector: Send + Sync + 'static {
    type Handle: Clone + Send + Sync + 'static;

    async fn connect(&self) -> Result<Self::Handle, CacheError>;

    async fn ping(&self, handle: &Self::Handle) -> Result<(), CacheError>;
}

/// Redis over a multiplexed connection. Clones share the same socket.
#[derive(Debug, Clone)]
pub struct RedisConnector {
    url: String,
}

impl RedisConnector {
    pub fn new(config: &CacheConfig) -> Self {
        Self { url: config.url() }
    }
}

#[async_trait]
impl CacheConnector for RedisConnector {
    type Handle = redis::aio::MultiplexedConnection;

    async fn connect(&self) -> Result<Self::Handle, CacheError> {
        let client = redis::Client::open(self.url.as_str())?;
        let conn = tokio::time::timeout(
            REDIS_CONNECT_TIMEOUT,
            client.get_multiplexed_async_connection(),
        )
        .await
        .map_err(|_| CacheError::Timeout(REDIS_CONNECT_TIMEOUT))??;
        Ok(conn)
    }

    async fn ping(&self, handle: &Self::Handle) -> Result<(), CacheError> {
        let mut conn = handle.clone();
        let reply: String = redis::cmd("PING").query_async(&mut conn).await?;
        if reply == "PONG" {
            Ok(())
        } else {
            Err(CacheError::Unavailable(format!("unexpected PING reply: {reply}")))
        }
    }
}

/// Sleeps between reconnect attempts. Swappable for deterministic tests.
pub trait Timer: Send + Sync + 'static {
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokioTimer;

impl Timer for TokioTimer {
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Linear backoff with a cap and a bounded number of attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub step: Duration,
    pub cap: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            step: Duration::from_millis(100),
            cap: Duration::from_millis(3000),
            max_attempts: 10,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before retrying after failure number `attempt` (1-based), or
    /// `None` once the attempt budget is spent.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if attempt > self.max_attempts {
            return None;
        }
        Some(self.step.saturating_mul(attempt).min(self.cap))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Uninitialized,
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
    Disabled,
    Closed,
}

impl CacheStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting { .. } => "reconnecting",
            Self::Disabled => "disabled",
            Self::Closed => "closed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LogDecision {
    Emit,
    Notice,
    Suppress,
}

/// Caps error lines per degraded episode
#[derive(Debug)]
struct ErrorLogBudget {
    limit: u32,
    seen: u32,
}

impl ErrorLogBudget {
    fn new(limit: u32) -> Self {
        Self { limit, seen: 0 }
    }

    fn admit(&mut self) -> LogDecision {
        self.seen = self.seen.saturating_add(1);
        if self.seen <= self.limit {
            LogDecision::Emit
        } else if self.seen == self.limit + 1 {
            LogDecision::Notice
        } else {
            LogDecision::Suppress
        }
    }

    fn reset(&mut self) {
        self.seen = 0;
    }
}

enum Phase<H> {
    Uninitialized,
    Connecting,
    Connected(H),
    Reconnecting { attempt: u32 },
    Disabled,
    Closed,
}

impl<H> Phase<H> {
    fn status(&self) -> CacheStatus {
        match self {
            Self::Uninitialized => CacheStatus::Uninitialized,
            Self::Connecting => CacheStatus::Connecting,
            Self::Connected(_) => CacheStatus::Connected,
            Self::Reconnecting { attempt } => CacheStatus::Reconnecting { attempt: *attempt },
            Self::Disabled => CacheStatus::Disabled,
            Self::Closed => CacheStatus::Closed,
        }
    }
}

struct Machine<H> {
    phase: Phase<H>,
    budget: ErrorLogBudget,
    /// Bumped on every successful connect; stale loss reports are ignored
    generation: u64,
    task: Option<JoinHandle<()>>,
}

/// Tuning for [`CacheClient`]
#[derive(Clone)]
pub struct CacheOptions {
    pub policy: ReconnectPolicy,
    pub health_check_interval: Option<Duration>,
    pub timer: Arc<dyn Timer>,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            policy: ReconnectPolicy::default(),
            health_check_interval: Some(REDIS_HEALTH_CHECK_INTERVAL),
            timer: Arc::new(TokioTimer),
        }
    }
}

struct Inner<C: CacheConnector> {
    connector: C,
    options: CacheOptions,
    machine: Mutex<Machine<C::Handle>>,
    status_tx: watch::Sender<CacheStatus>,
}

/// Process-wide cache client. Cheap to clone; clones share state.
pub struct CacheClient<C: CacheConnector = RedisConnector> {
    inner: Arc<Inner<C>>,
}

impl<C: CacheConnector> Clone for CacheClient<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: CacheConnector> CacheClient<C> {
    pub fn new(connector: C, options: CacheOptions) -> Self {
        let (status_tx, _) = watch::channel(CacheStatus::Uninitialized);
        Self {
            inner: Arc::new(Inner {
                connector,
                options,
                machine: Mutex::new(Machine {
                    phase: Phase::Uninitialized,
                    budget: ErrorLogBudget::new(ERROR_LOG_LIMIT),
                    generation: 0,
                    task: None,
                }),
                status_tx,
            }),
        }
    }

    /// Establish the connection. Only the first call does anything; failure
    /// is logged and leaves the client in degraded mode.
    pub async fn connect(&self) {
        {
            let mut machine = self.inner.lock();
            if !matches!(machine.phase, Phase::Uninitialized) {
                debug!(status = machine.phase.status().as_str(), "cache connect skipped");
                return;
            }
            self.inner.set_phase(&mut machine, Phase::Connecting);
        }
        info!("connecting to cache");

        match self.inner.connector.connect().await {
            Ok(handle) => Inner::on_connected(&self.inner, handle, 0),
            Err(err) => Inner::on_failure(&self.inner, 1, &err),
        }
    }

    /// The live handle, or `None` whenever the client is not connected.
    pub fn get_cache(&self) -> Option<C::Handle> {
        match &self.inner.lock().phase {
            Phase::Connected(handle) => Some(handle.clone()),
            _ => None,
        }
    }

    pub fn status(&self) -> CacheStatus {
        *self.inner.status_tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<CacheStatus> {
        self.inner.status_tx.subscribe()
    }

    /// Feature code calls this after an I/O failure on a handle it got from
    /// [`get_cache`](Self::get_cache).
    pub fn report_connection_lost(&self) {
        let generation = self.inner.lock().generation;
        Inner::on_lost(&self.inner, generation);
    }

    /// Stop reconnecting and drop the connection. No-op once disabled or closed.
    pub fn shutdown(&self) {
        let mut machine = self.inner.lock();
        match machine.phase {
            Phase::Disabled | Phase::Closed => {
                debug!(status = machine.phase.status().as_str(), "cache shutdown is a no-op");
                return;
            }
            _ => {}
        }
        if let Some(task) = machine.task.take() {
            task.abort();
        }
        let was_connected = matches!(machine.phase, Phase::Connected(_));
        self.inner.set_phase(&mut machine, Phase::Closed);
        if was_connected {
            info!("cache connection closed");
        }
    }
}

impl<C: CacheConnector> Inner<C> {
    fn lock(&self) -> MutexGuard<'_, Machine<C::Handle>> {
        self.machine.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_phase(&self, machine: &mut Machine<C::Handle>, phase: Phase<C::Handle>) {
        let status = phase.status();
        machine.phase = phase;
        self.status_tx.send_replace(status);
    }

    fn on_connected(this: &Arc<Self>, handle: C::Handle, failed_attempts: u32) {
        let mut machine = this.lock();
        if matches!(machine.phase, Phase::Closed) {
            debug!("cache connected after shutdown; dropping connection");
            return;
        }
        machine.budget.reset();
        machine.generation += 1;
        let generation = machine.generation;
        this.set_phase(&mut machine, Phase::Connected(handle.clone()));

        if failed_attempts == 0 {
            info!("cache connected");
        } else {
            info!(failed_attempts, "cache reconnected");
        }

        let task = this.options.health_check_interval.map(|interval| {
            let inner = Arc::clone(this);
            tokio::spawn(async move {
                Self::health_check(inner, handle, generation, interval).await;
            })
        });
        Self::replace_task(&mut machine, task);
    }

    /// At most one background task per client; the previous one is aborted.
    /// This may abort the calling task, so callers must not await afterwards.
    fn replace_task(machine: &mut Machine<C::Handle>, task: Option<JoinHandle<()>>) {
        if let Some(previous) = std::mem::replace(&mut machine.task, task) {
            previous.abort();
        }
    }

    /// Record failure number `attempt` and return the delay before the next
    /// try, or `None` when the client is now disabled or closed.
    fn record_failure(&self, attempt: u32, err: &CacheError) -> Option<Duration> {
        let mut machine = self.lock();
        self.record_failure_locked(&mut machine, attempt, err)
    }

    fn record_failure_locked(
        &self,
        machine: &mut Machine<C::Handle>,
        attempt: u32,
        err: &CacheError,
    ) -> Option<Duration> {
        if matches!(machine.phase, Phase::Closed) {
            return None;
        }

        let delay = self.options.policy.delay_for(attempt);
        match machine.budget.admit() {
            LogDecision::Emit => match delay {
                Some(delay) => warn!(
                    attempt,
                    retry_in_ms = delay.as_millis() as u64,
                    error = %err,
                    "cache connection error"
                ),
                None => warn!(attempt, error = %err, "cache connection error"),
            },
            LogDecision::Notice => warn!(
                "cache still unavailable; suppressing further connection errors until reconnect"
            ),
            LogDecision::Suppress => {}
        }

        match delay {
            Some(delay) => {
                self.set_phase(machine, Phase::Reconnecting { attempt });
                Some(delay)
            }
            None => {
                error!(
                    attempts = attempt,
                    "cache disabled after repeated connection failures; continuing without cache"
                );
                Self::replace_task(machine, None);
                self.set_phase(machine, Phase::Disabled);
                None
            }
        }
    }

    fn on_failure(this: &Arc<Self>, attempt: u32, err: &CacheError) {
        let mut machine = this.lock();
        Self::start_reconnect(this, &mut machine, attempt, err);
    }

    /// Check and transition happen under one guard, so concurrent reports of
    /// the same loss start a single reconnect cycle.
    fn on_lost(this: &Arc<Self>, generation: u64) {
        let mut machine = this.lock();
        let current =
            matches!(machine.phase, Phase::Connected(_)) && machine.generation == generation;
        if !current {
            debug!("ignoring stale cache connection loss report");
            return;
        }
        Self::start_reconnect(this, &mut machine, 1, &CacheError::ConnectionLost);
    }

    fn start_reconnect(
        this: &Arc<Self>,
        machine: &mut Machine<C::Handle>,
        attempt: u32,
        err: &CacheError,
    ) {
        if let Some(delay) = this.record_failure_locked(machine, attempt, err) {
            let inner = Arc::clone(this);
            let task = tokio::spawn(async move {
                Self::reconnect_loop(inner, attempt, delay).await;
            });
            Self::replace_task(machine, Some(task));
        }
    }

    async fn reconnect_loop(this: Arc<Self>, mut attempt: u32, mut delay: Duration) {
        loop {
            this.options.timer.sleep(delay).await;
            let closed = matches!(this.lock().phase, Phase::Closed);
            if closed {
                return;
            }
            debug!(attempt = attempt + 1, "cache reconnect attempt");

            match this.connector.connect().await {
                Ok(handle) => {
                    Self::on_connected(&this, handle, attempt);
                    return;
                }
                Err(err) => {
                    attempt += 1;
                    match this.record_failure(attempt, &err) {
                        Some(next) => delay = next,
                        None => return,
                    }
                }
            }
        }
    }

    async fn health_check(this: Arc<Self>, handle: C::Handle, generation: u64, interval: Duration) {
        loop {
            this.options.timer.sleep(interval).await;
            let stale = this.lock().generation != generation;
            if stale {
                return;
            }
            if let Err(err) = this.connector.ping(&handle).await {
                debug!(error = %err, "cache health check failed");
                Self::on_lost(&this, generation);
                return;
            }
        }
    }
}

impl CacheClient<RedisConnector> {
    pub fn redis(config: &CacheConfig) -> Self {
        Self::new(RedisConnector::new(config), CacheOptions::default())
    }
}
