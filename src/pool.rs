//! Redis connection pool with health checking and retry logic
//!
//! Every public store operation borrows one pooled connection for its
//! duration and returns it when done. Borrowing blocks when the pool is
//! exhausted. The pool wraps a multiplexed connection (Redis handles
//! request interleaving internally); the semaphore bounds how many
//! operations are in flight at once.
//!
//! # Example
//!
//! ```rust,no_run
//! use edgestore::config::RedisConfig;
//! use edgestore::pool::RedisPool;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let pool = RedisPool::new(RedisConfig::default()).await?;
//! let mut conn = pool.get().await?;
//! # Ok(())
//! # }
//! ```

use crate::config::RedisConfig;
use crate::error::{Result, StoreError};
use crate::util::safe_redis_error;
use redis::aio::MultiplexedConnection;
use redis::{Client, RedisError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{RwLock, Semaphore};
use tracing::{debug, warn};

/// Connection pool counters
#[derive(Debug, Default)]
pub struct PoolMetrics {
    /// Total number of successful connections
    pub connections_created: AtomicU64,

    /// Total number of connection failures
    pub connection_failures: AtomicU64,

    /// Total number of commands executed
    pub commands_executed: AtomicU64,

    /// Total number of command failures
    pub command_failures: AtomicU64,

    /// Total number of retries
    pub retries: AtomicU64,
}

impl PoolMetrics {
    fn record_connection(&self) {
        self.connections_created.fetch_add(1, Ordering::Relaxed);
    }

    fn record_connection_failure(&self) {
        self.connection_failures.fetch_add(1, Ordering::Relaxed);
    }

    fn record_command(&self) {
        self.commands_executed.fetch_add(1, Ordering::Relaxed);
    }

    fn record_command_failure(&self) {
        self.command_failures.fetch_add(1, Ordering::Relaxed);
    }

    fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    /// Get a snapshot of the counters
    pub fn snapshot(&self) -> PoolMetricsSnapshot {
        PoolMetricsSnapshot {
            connections_created: self.connections_created.load(Ordering::Relaxed),
            connection_failures: self.connection_failures.load(Ordering::Relaxed),
            commands_executed: self.commands_executed.load(Ordering::Relaxed),
            command_failures: self.command_failures.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of pool counters at a point in time
#[derive(Debug, Clone)]
pub struct PoolMetricsSnapshot {
    /// Total number of connections created during pool lifetime
    pub connections_created: u64,
    /// Total number of connection failures during pool lifetime
    pub connection_failures: u64,
    /// Total number of commands executed through the pool
    pub commands_executed: u64,
    /// Total number of command failures encountered
    pub command_failures: u64,
    /// Total number of retry attempts made for failed operations
    pub retries: u64,
}

/// Health status of the Redis connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    /// Connection is healthy
    Healthy,
    /// Connection is degraded (slow but working)
    Degraded,
    /// Connection is unhealthy
    Unhealthy,
    /// Health status unknown (not yet checked)
    Unknown,
}

/// Redis connection pool
///
/// Manages borrowing of a multiplexed connection with health checking and
/// automatic reconnection. Constructed explicitly and passed by reference;
/// there is no process-wide singleton client state.
pub struct RedisPool {
    /// Redis client for creating connections
    client: Client,

    /// The multiplexed connection
    connection: RwLock<Option<MultiplexedConnection>>,

    /// Pool configuration
    config: RedisConfig,

    /// Connection counters
    metrics: Arc<PoolMetrics>,

    /// Semaphore to limit concurrent operations
    semaphore: Arc<Semaphore>,

    /// Current health status
    health_status: RwLock<HealthStatus>,
}

impl RedisPool {
    /// Create a new Redis connection pool and establish the initial
    /// connection.
    pub async fn new(config: RedisConfig) -> Result<Self> {
        config.validate().map_err(StoreError::Database)?;

        let client = Client::open(config.url.as_str())
            .map_err(|e| StoreError::Database(safe_redis_error(&config.url, &e)))?;

        let pool = Self {
            client,
            connection: RwLock::new(None),
            metrics: Arc::new(PoolMetrics::default()),
            semaphore: Arc::new(Semaphore::new(config.pool_size as usize)),
            health_status: RwLock::new(HealthStatus::Unknown),
            config,
        };

        pool.connect().await?;

        debug!("Redis connection pool initialized");
        Ok(pool)
    }

    /// Establish or re-establish the connection
    async fn connect(&self) -> Result<()> {
        let start = Instant::now();

        let conn_future = self.client.get_multiplexed_async_connection();
        let conn = tokio::time::timeout(self.config.connection_timeout, conn_future)
            .await
            .map_err(|_| {
                self.metrics.record_connection_failure();
                StoreError::Database("Connection timeout".to_string())
            })?
            .map_err(|e| {
                self.metrics.record_connection_failure();
                StoreError::Database(safe_redis_error(&self.config.url, &e))
            })?;

        {
            let mut guard = self.connection.write().await;
            *guard = Some(conn);
        }

        self.metrics.record_connection();
        *self.health_status.write().await = HealthStatus::Healthy;

        debug!("Redis connection established in {:?}", start.elapsed());
        Ok(())
    }

    /// Get a connection from the pool
    ///
    /// Acquires a semaphore permit and returns a connection guard. The
    /// permit is released when the guard is dropped.
    pub async fn get(&self) -> Result<PooledConnection> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| StoreError::Database("Connection pool closed".to_string()))?;

        let conn = {
            let guard = self.connection.read().await;
            guard.clone()
        };

        let conn = match conn {
            Some(c) => c,
            None => {
                self.connect().await?;
                let guard = self.connection.read().await;
                guard
                    .clone()
                    .ok_or_else(|| StoreError::Database("No connection available".to_string()))?
            }
        };

        Ok(PooledConnection {
            conn,
            _permit: permit,
        })
    }

    /// Execute a command closure with the pool's retry policy
    ///
    /// Only transient failures (dropped connections, timeouts, server
    /// loading) are retried; command-level errors surface immediately.
    pub async fn execute<F, Fut, T>(&self, f: F) -> Result<T>
    where
        F: Fn(MultiplexedConnection) -> Fut,
        Fut: std::future::Future<Output = std::result::Result<T, RedisError>>,
    {
        let mut attempt = 0;

        loop {
            let conn = self.get().await?;

            let result =
                tokio::time::timeout(self.config.command_timeout, f(conn.conn.clone())).await;

            match result {
                Ok(Ok(value)) => {
                    self.metrics.record_command();
                    return Ok(value);
                }
                Ok(Err(e)) => {
                    self.metrics.record_command_failure();

                    if self.config.retry_policy.should_retry(attempt) && is_retriable_error(&e) {
                        self.metrics.record_retry();
                        let delay = self.config.retry_policy.delay_for_attempt(attempt);
                        warn!(
                            "Redis command failed (attempt {}), retrying in {:?}: {}",
                            attempt + 1,
                            delay,
                            e
                        );
                        tokio::time::sleep(delay).await;

                        if is_connection_error(&e) {
                            let _ = self.connect().await;
                        }

                        attempt += 1;
                        continue;
                    }

                    return Err(StoreError::Database(safe_redis_error(&self.config.url, &e)));
                }
                Err(_) => {
                    self.metrics.record_command_failure();

                    if self.config.retry_policy.should_retry(attempt) {
                        self.metrics.record_retry();
                        let delay = self.config.retry_policy.delay_for_attempt(attempt);
                        warn!(
                            "Redis command timeout (attempt {}), retrying in {:?}",
                            attempt + 1,
                            delay
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                        continue;
                    }

                    return Err(StoreError::Database("Command timeout".to_string()));
                }
            }
        }
    }

    /// Perform a health check by sending PING
    pub async fn health_check(&self) -> HealthStatus {
        let start = Instant::now();

        let result = self
            .execute(|mut conn| async move {
                redis::cmd("PING").query_async::<String>(&mut conn).await
            })
            .await;

        let status = match result {
            Ok(_) => {
                if start.elapsed() > Duration::from_millis(100) {
                    HealthStatus::Degraded
                } else {
                    HealthStatus::Healthy
                }
            }
            Err(_) => HealthStatus::Unhealthy,
        };

        *self.health_status.write().await = status.clone();
        status
    }

    /// Get the last observed health status without issuing a command
    pub fn health_status(&self) -> HealthStatus {
        self.health_status
            .try_read()
            .map(|guard| guard.clone())
            .unwrap_or(HealthStatus::Unknown)
    }

    /// Get a snapshot of pool counters
    pub fn metrics(&self) -> PoolMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Get the pool configuration
    pub fn config(&self) -> &RedisConfig {
        &self.config
    }
}

/// A pooled connection; its permit returns to the pool when dropped
pub struct PooledConnection {
    conn: MultiplexedConnection,
    _permit: tokio::sync::OwnedSemaphorePermit,
}

impl std::ops::Deref for PooledConnection {
    type Target = MultiplexedConnection;

    fn deref(&self) -> &Self::Target {
        &self.conn
    }
}

impl std::ops::DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.conn
    }
}

fn is_retriable_error(e: &RedisError) -> bool {
    e.is_connection_dropped()
        || e.is_timeout()
        || e.is_io_error()
        || matches!(e.kind(), redis::ErrorKind::BusyLoadingError)
}

fn is_connection_error(e: &RedisError) -> bool {
    e.is_connection_dropped() || e.is_io_error()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_metrics_snapshot() {
        let metrics = PoolMetrics::default();

        metrics.record_connection();
        metrics.record_command();
        metrics.record_command();
        metrics.record_retry();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.connections_created, 1);
        assert_eq!(snapshot.commands_executed, 2);
        assert_eq!(snapshot.retries, 1);
        assert_eq!(snapshot.command_failures, 0);
    }

    #[test]
    fn test_retriable_error_classification() {
        let busy = redis::RedisError::from((redis::ErrorKind::BusyLoadingError, "loading"));
        assert!(is_retriable_error(&busy));

        let response = redis::RedisError::from((redis::ErrorKind::ResponseError, "bad command"));
        assert!(!is_retriable_error(&response));
        assert!(!is_connection_error(&response));
    }
}
