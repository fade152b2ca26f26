//! Connection Pool Handle
//!
//! One pool per registered database. Physical connections are opened lazily on
//! first acquisition and reused afterwards, up to `max_connections` slots guarded
//! by a semaphore.
//!
//! # Lease lifecycle
//! 1. [`ConnectionPool::acquire`] waits for a slot (bounded by `acquire_timeout`),
//!    then reuses an idle connection or opens a new one
//! 2. The caller runs one engine call under [`ConnectionPool::bounded`]
//! 3. [`PooledConnection::settle`] turns the outcome into a [`Result`], returning,
//!    discarding or flagging the connection as appropriate
//!
//! A lease dropped without being settled (a cancelled caller) hands its connection
//! back flagged for re-verification; the next acquirer pings it first.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::error::Elapsed;

use crate::descriptor::ConnectionDescriptor;
use crate::engine::{self, ConnectOptions, Connection, EngineError, EngineResult};
use crate::error::{ExplorerError, Result};

/// Pool sizing and timeouts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolSettings {
    /// Maximum simultaneously open connections per database
    pub max_connections: u32,
    pub acquire_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub query_timeout_ms: u64,
    pub health_check_timeout_ms: u64,
    /// Pause before the single retry of a transient connect failure
    pub retry_backoff_ms: u64,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: 4,
            acquire_timeout_ms: 10_000,
            connect_timeout_ms: 10_000,
            query_timeout_ms: 30_000,
            health_check_timeout_ms: 5_000,
            retry_backoff_ms: 250,
        }
    }
}

impl PoolSettings {
    #[must_use]
    pub const fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    #[must_use]
    pub const fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }

    #[must_use]
    pub const fn health_check_timeout(&self) -> Duration {
        Duration::from_millis(self.health_check_timeout_ms)
    }

    #[must_use]
    pub const fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

/// Health of a pool as last observed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    /// Nothing has been attempted yet
    Unverified,
    Healthy,
    Unreachable,
}

impl ConnectionStatus {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Unverified => "unverified",
            Self::Healthy => "healthy",
            Self::Unreachable => "unreachable",
        }
    }

    const fn as_u8(self) -> u8 {
        match self {
            Self::Unverified => 0,
            Self::Healthy => 1,
            Self::Unreachable => 2,
        }
    }

    const fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Healthy,
            2 => Self::Unreachable,
            _ => Self::Unverified,
        }
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Pool metrics for monitoring
#[derive(Debug, Default)]
pub struct PoolMetrics {
    connections_created: AtomicU32,
    connections_closed: AtomicU32,
    connection_errors: AtomicU32,
    acquire_timeouts: AtomicU32,
    operations: AtomicU32,
    operation_errors: AtomicU32,
}

impl PoolMetrics {
    fn record(counter: &AtomicU32) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self) -> PoolMetricsSnapshot {
        PoolMetricsSnapshot {
            connections_created: self.connections_created.load(Ordering::Relaxed),
            connections_closed: self.connections_closed.load(Ordering::Relaxed),
            connection_errors: self.connection_errors.load(Ordering::Relaxed),
            acquire_timeouts: self.acquire_timeouts.load(Ordering::Relaxed),
            operations: self.operations.load(Ordering::Relaxed),
            operation_errors: self.operation_errors.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of pool metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolMetricsSnapshot {
    pub connections_created: u32,
    pub connections_closed: u32,
    pub connection_errors: u32,
    pub acquire_timeouts: u32,
    pub operations: u32,
    pub operation_errors: u32,
}

/// Outcome of [`ConnectionPool::health_check`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub status: ConnectionStatus,
    pub latency_ms: u64,
    /// Why the database is unreachable (credentials scrubbed)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

struct IdleConnection {
    conn: Connection,
    needs_verification: bool,
}

/// Lazily-populated set of connections to one database
pub struct ConnectionPool {
    database: String,
    descriptor: Arc<ConnectionDescriptor>,
    settings: PoolSettings,
    slots: Arc<Semaphore>,
    idle: Mutex<Vec<IdleConnection>>,
    status: AtomicU8,
    closed: AtomicBool,
    metrics: PoolMetrics,
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("database", &self.database)
            .field("descriptor", &self.descriptor.summary())
            .field("status", &self.status())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl ConnectionPool {
    /// Create a pool without connecting
    #[must_use]
    pub fn new(
        database: impl Into<String>,
        descriptor: Arc<ConnectionDescriptor>,
        settings: PoolSettings,
    ) -> Self {
        let capacity = usize::try_from(settings.max_connections.max(1)).unwrap_or(1);
        Self {
            database: database.into(),
            descriptor,
            settings,
            slots: Arc::new(Semaphore::new(capacity)),
            idle: Mutex::new(Vec::new()),
            status: AtomicU8::new(ConnectionStatus::Unverified.as_u8()),
            closed: AtomicBool::new(false),
            metrics: PoolMetrics::default(),
        }
    }

    #[must_use]
    pub fn database(&self) -> &str {
        &self.database
    }

    #[must_use]
    pub fn descriptor(&self) -> &ConnectionDescriptor {
        &self.descriptor
    }

    #[must_use]
    pub const fn settings(&self) -> &PoolSettings {
        &self.settings
    }

    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        ConnectionStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn metrics(&self) -> PoolMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Number of connections currently parked in the pool
    #[must_use]
    pub fn idle_count(&self) -> usize {
        self.idle_slots().len()
    }

    fn set_status(&self, status: ConnectionStatus) {
        self.status.store(status.as_u8(), Ordering::Release);
    }

    fn idle_slots(&self) -> MutexGuard<'_, Vec<IdleConnection>> {
        // Every critical section leaves the vector consistent
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn closed_error(&self) -> ExplorerError {
        ExplorerError::unreachable(&self.database, "connection pool is closed")
    }

    /// Wait for a free slot and hand out a connection
    pub async fn acquire(self: &Arc<Self>) -> Result<PooledConnection> {
        if self.is_closed() {
            return Err(self.closed_error());
        }

        let permit = match tokio::time::timeout(
            self.settings.acquire_timeout(),
            Arc::clone(&self.slots).acquire_owned(),
        )
        .await
        {
            Err(_) => {
                PoolMetrics::record(&self.metrics.acquire_timeouts);
                tracing::warn!(database = %self.database, "timed out waiting for a free connection slot");
                return Err(ExplorerError::timeout(
                    &self.database,
                    "acquire connection",
                    self.settings.acquire_timeout_ms,
                ));
            }
            Ok(Err(_)) => return Err(self.closed_error()),
            Ok(Ok(permit)) => permit,
        };

        loop {
            let Some(idle) = self.idle_slots().pop() else {
                break;
            };
            if !idle.needs_verification {
                tracing::debug!(database = %self.database, "reusing idle connection");
                return Ok(self.lease(idle.conn, permit));
            }

            let mut conn = idle.conn;
            match tokio::time::timeout(self.settings.health_check_timeout(), conn.ping()).await {
                Ok(Ok(())) => {
                    tracing::debug!(database = %self.database, "re-verified idle connection");
                    return Ok(self.lease(conn, permit));
                }
                _ => {
                    PoolMetrics::record(&self.metrics.connections_closed);
                    tracing::debug!(database = %self.database, "discarding stale idle connection");
                }
            }
        }

        let conn = self.open().await?;
        Ok(self.lease(conn, permit))
    }

    /// Return a lease's connection for reuse
    pub fn release(&self, lease: PooledConnection) {
        lease.release();
    }

    /// Bound one engine call by the query timeout
    pub async fn bounded<T>(
        &self,
        operation: impl Future<Output = EngineResult<T>>,
    ) -> std::result::Result<EngineResult<T>, Elapsed> {
        tokio::time::timeout(self.settings.query_timeout(), operation).await
    }

    /// Round-trip `SELECT 1` and record the outcome as the pool status
    ///
    /// Only a saturated pool (acquire timeout) is reported as an error; every
    /// other failure is an `Unreachable` report.
    pub async fn health_check(self: &Arc<Self>) -> Result<HealthReport> {
        let start = Instant::now();
        let mut lease = match self.acquire().await {
            Ok(lease) => lease,
            Err(e @ ExplorerError::Timeout { .. }) => return Err(e),
            Err(ExplorerError::Unreachable { detail, .. }) => {
                self.set_status(ConnectionStatus::Unreachable);
                return Ok(self.report(ConnectionStatus::Unreachable, start, Some(detail)));
            }
            Err(e) => {
                self.set_status(ConnectionStatus::Unreachable);
                return Ok(self.report(ConnectionStatus::Unreachable, start, Some(e.message())));
            }
        };

        let outcome = tokio::time::timeout(self.settings.health_check_timeout(), async {
            lease.connection_mut()?.ping().await
        })
        .await;

        match outcome {
            Ok(Ok(())) => {
                self.set_status(ConnectionStatus::Healthy);
                lease.release();
                Ok(self.report(ConnectionStatus::Healthy, start, None))
            }
            Ok(Err(e)) => {
                lease.discard();
                self.set_status(ConnectionStatus::Unreachable);
                let detail = self.descriptor.scrub(e.detail());
                tracing::warn!(database = %self.database, error = %detail, "health check failed");
                Ok(self.report(ConnectionStatus::Unreachable, start, Some(detail)))
            }
            Err(_) => {
                // Dropping the lease flags the connection for re-verification
                drop(lease);
                self.set_status(ConnectionStatus::Unreachable);
                let detail = format!(
                    "health check timed out after {}ms",
                    self.settings.health_check_timeout_ms
                );
                tracing::warn!(database = %self.database, "{detail}");
                Ok(self.report(ConnectionStatus::Unreachable, start, Some(detail)))
            }
        }
    }

    /// Drop idle connections and refuse further acquisition (idempotent)
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.slots.close();
        let drained = std::mem::take(&mut *self.idle_slots());
        for _ in &drained {
            PoolMetrics::record(&self.metrics.connections_closed);
        }
        tracing::info!(database = %self.database, closed = drained.len(), "closed connection pool");
    }

    fn report(&self, status: ConnectionStatus, start: Instant, detail: Option<String>) -> HealthReport {
        HealthReport {
            status,
            latency_ms: u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
            detail,
        }
    }

    fn lease(self: &Arc<Self>, conn: Connection, permit: OwnedSemaphorePermit) -> PooledConnection {
        PooledConnection { conn: Some(conn), pool: Arc::clone(self), _permit: permit }
    }

    fn connect_options(&self) -> ConnectOptions {
        ConnectOptions {
            connect_timeout: self
                .descriptor
                .connect_timeout()
                .unwrap_or_else(|| self.settings.connect_timeout()),
            statement_timeout: self.settings.query_timeout(),
        }
    }

    /// Open a physical connection, retrying once on a transient failure
    async fn open(&self) -> Result<Connection> {
        let options = self.connect_options();
        let mut retried = false;
        loop {
            match engine::connect(&self.descriptor, options).await {
                Ok(conn) => {
                    PoolMetrics::record(&self.metrics.connections_created);
                    tracing::debug!(database = %self.database, "opened connection");
                    return Ok(conn);
                }
                Err(failure) if failure.transient && !retried => {
                    retried = true;
                    tracing::warn!(
                        database = %self.database,
                        error = %self.descriptor.scrub(&failure.detail),
                        "connect failed, retrying once"
                    );
                    tokio::time::sleep(self.settings.retry_backoff()).await;
                }
                Err(failure) => {
                    PoolMetrics::record(&self.metrics.connection_errors);
                    self.set_status(ConnectionStatus::Unreachable);
                    let detail = self.descriptor.scrub(&failure.detail);
                    tracing::warn!(database = %self.database, error = %detail, "database unreachable");
                    return Err(ExplorerError::unreachable(&self.database, detail));
                }
            }
        }
    }

    fn put_back(&self, conn: Connection, needs_verification: bool) {
        if self.is_closed() {
            PoolMetrics::record(&self.metrics.connections_closed);
            return;
        }
        self.idle_slots().push(IdleConnection { conn, needs_verification });
    }
}

/// Exclusive use of one pooled connection
///
/// Holds a pool slot until it is settled, released or dropped.
pub struct PooledConnection {
    conn: Option<Connection>,
    pool: Arc<ConnectionPool>,
    _permit: OwnedSemaphorePermit,
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("database", &self.pool.database)
            .field("conn", &self.conn)
            .finish()
    }
}

impl PooledConnection {
    /// The leased connection
    ///
    /// Only fails after the connection has been handed back, which the
    /// consuming `release`/`settle` make impossible from outside this module.
    pub fn connection_mut(&mut self) -> EngineResult<&mut Connection> {
        self.conn
            .as_mut()
            .ok_or_else(|| EngineError::ConnectionLost("connection already returned to the pool".into()))
    }

    /// Return the connection for reuse
    pub fn release(mut self) {
        self.give_back(false);
    }

    /// Finish a bounded operation and map its outcome
    pub fn settle<T>(
        mut self,
        operation: &str,
        outcome: std::result::Result<EngineResult<T>, Elapsed>,
    ) -> Result<T> {
        let pool = Arc::clone(&self.pool);
        PoolMetrics::record(&pool.metrics.operations);

        match outcome {
            Ok(Ok(value)) => {
                pool.set_status(ConnectionStatus::Healthy);
                self.give_back(false);
                Ok(value)
            }
            Ok(Err(EngineError::Statement(detail))) => {
                // The server answered, so the database itself is reachable
                PoolMetrics::record(&pool.metrics.operation_errors);
                pool.set_status(ConnectionStatus::Healthy);
                self.give_back(false);
                let detail = pool.descriptor.scrub(&detail);
                tracing::debug!(database = %pool.database, operation, error = %detail, "statement failed");
                Err(ExplorerError::query_error(&pool.database, detail))
            }
            Ok(Err(EngineError::ConnectionLost(detail))) => {
                PoolMetrics::record(&pool.metrics.operation_errors);
                self.discard();
                pool.set_status(ConnectionStatus::Unreachable);
                let detail = pool.descriptor.scrub(&detail);
                tracing::warn!(database = %pool.database, operation, error = %detail, "connection lost");
                Err(ExplorerError::unreachable(&pool.database, detail))
            }
            Ok(Err(EngineError::TimedOut(_))) | Err(_) => {
                PoolMetrics::record(&pool.metrics.operation_errors);
                if let Some(conn) = &self.conn {
                    conn.cancel_in_flight();
                }
                self.give_back(true);
                tracing::warn!(database = %pool.database, operation, "operation timed out");
                Err(ExplorerError::timeout(&pool.database, operation, pool.settings.query_timeout_ms))
            }
        }
    }

    /// Close the connection instead of returning it
    fn discard(mut self) {
        if self.conn.take().is_some() {
            PoolMetrics::record(&self.pool.metrics.connections_closed);
        }
    }

    fn give_back(&mut self, needs_verification: bool) {
        if let Some(conn) = self.conn.take() {
            self.pool.put_back(conn, needs_verification);
        }
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        // Runs before the permit field is dropped, so the connection is parked
        // before the slot frees up
        self.give_back(true);
    }
}
