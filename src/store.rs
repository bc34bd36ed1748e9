//! Public store facade
//!
//! A [`Store`] is an explicitly constructed value with an explicit
//! lifecycle: `connect` opens the pool, `close_session` releases it.
//! Nothing is kept in process-wide state. Every public operation borrows
//! one pooled connection for its duration; the per-entity operation
//! surfaces live in the `entity` modules as `impl Store` blocks.
//!
//! # Example
//!
//! ```rust,no_run
//! use edgestore::config::StoreConfig;
//! use edgestore::store::Store;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Store::connect(StoreConfig::with_url("redis://localhost:6379")).await?;
//! let devices = store.all_devices(0, 20, &[]).await?;
//! store.close_session();
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use crate::config::StoreConfig;
use crate::error::{Result, StoreError};
use crate::pool::{HealthStatus, PoolMetricsSnapshot, PooledConnection, RedisPool};

/// Handle to the persistence core
pub struct Store {
    pub(crate) pool: Arc<RedisPool>,
    pub(crate) batch_size: usize,
}

impl Store {
    /// Open a store against the configured Redis backend
    pub async fn connect(config: StoreConfig) -> Result<Self> {
        config.validate().map_err(StoreError::Database)?;

        let pool = Arc::new(RedisPool::new(config.redis).await?);

        info!("store session opened");
        Ok(Self {
            pool,
            batch_size: config.batch_size,
        })
    }

    /// Borrow a pooled connection for one operation
    pub(crate) async fn conn(&self) -> Result<PooledConnection> {
        self.pool.get().await
    }

    /// Release the connection pool
    ///
    /// Outstanding background cleanup tasks keep their own pool reference
    /// and finish independently.
    pub fn close_session(self) {
        info!("store session closed");
        drop(self);
    }

    /// Last observed health status of the backing connection
    pub fn health_status(&self) -> HealthStatus {
        self.pool.health_status()
    }

    /// Issue a PING health check
    pub async fn health_check(&self) -> HealthStatus {
        self.pool.health_check().await
    }

    /// Snapshot of connection pool counters
    pub fn pool_metrics(&self) -> PoolMetricsSnapshot {
        self.pool.metrics()
    }
}

/// Validate a caller-supplied id, or mint a v4 UUID when none is given
pub(crate) fn ensure_id(id: &str) -> Result<String> {
    if id.is_empty() {
        return Ok(Uuid::new_v4().to_string());
    }
    Uuid::parse_str(id)
        .map_err(|e| StoreError::InvalidId(format!("uuid parsing failed for {}: {}", id, e)))?;
    Ok(id.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ensure_id_generates_when_empty() {
        let id = ensure_id("").unwrap();
        assert!(Uuid::parse_str(&id).is_ok());
    }

    #[test]
    fn test_ensure_id_accepts_valid_uuid() {
        let id = ensure_id("b5a9b0c1-51b9-46a9-a912-0e7c07b122a4").unwrap();
        assert_eq!(id, "b5a9b0c1-51b9-46a9-a912-0e7c07b122a4");
    }

    #[test]
    fn test_ensure_id_rejects_malformed_uuid() {
        let err = ensure_id("not-a-uuid").unwrap_err();
        assert!(matches!(err, StoreError::InvalidId(_)));
    }
}
