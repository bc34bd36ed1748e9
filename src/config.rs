//! Configuration for the store and its Redis connection pool
//!
//! # Example
//!
//! ```rust
//! use edgestore::config::{RedisConfig, StoreConfig};
//! use std::time::Duration;
//!
//! let config = StoreConfig {
//!     redis: RedisConfig::with_url("redis://localhost:6379")
//!         .pool_size(16)
//!         .command_timeout(Duration::from_secs(1)),
//!     batch_size: 1000,
//! };
//! assert!(config.validate().is_ok());
//! ```

use std::time::Duration;

/// Configuration for the Redis connection pool
///
/// Controls connection behavior, timeouts, and retry logic.
#[derive(Clone, Debug)]
pub struct RedisConfig {
    /// Redis server URL (e.g., "redis://localhost:6379")
    pub url: String,

    /// Maximum number of concurrently borrowed connections
    /// Default: 16
    pub pool_size: u32,

    /// Timeout for establishing new connections
    /// Default: 5 seconds
    pub connection_timeout: Duration,

    /// Timeout for individual Redis commands
    /// Default: 5 seconds
    pub command_timeout: Duration,

    /// Retry policy for failed operations
    pub retry_policy: RetryPolicy,

    /// Enable TLS for connections
    /// Default: false
    pub tls_enabled: bool,

    /// Health check interval
    /// Default: 30 seconds
    pub health_check_interval: Duration,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            pool_size: 16,
            connection_timeout: Duration::from_secs(5),
            command_timeout: Duration::from_secs(5),
            retry_policy: RetryPolicy::default(),
            tls_enabled: false,
            health_check_interval: Duration::from_secs(30),
        }
    }
}

impl RedisConfig {
    /// Create a new config with the specified URL
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Set the pool size
    pub fn pool_size(mut self, size: u32) -> Self {
        self.pool_size = size;
        self
    }

    /// Set the connection timeout
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Set the command timeout
    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Set the retry policy
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Enable or disable TLS for Redis connections
    ///
    /// When enabled, uses the `rediss://` URL scheme and TLS encryption.
    /// Requires the `redis-tls` feature to be enabled.
    pub fn tls(mut self, enabled: bool) -> Self {
        self.tls_enabled = enabled;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.url.is_empty() {
            return Err("Redis URL cannot be empty".to_string());
        }
        if self.pool_size == 0 {
            return Err("Pool size must be greater than 0".to_string());
        }
        if self.pool_size > 1000 {
            return Err("Pool size cannot exceed 1000".to_string());
        }

        #[cfg(not(feature = "redis-tls"))]
        if self.tls_enabled {
            return Err(
                "TLS is enabled but the 'redis-tls' feature is not compiled. \
                 Enable it with: cargo build --features redis-tls"
                    .to_string(),
            );
        }

        if self.tls_enabled && !self.url.starts_with("rediss://") {
            return Err("TLS is enabled but URL doesn't use 'rediss://' scheme. \
                 Use 'rediss://host:port' for TLS connections"
                .to_string());
        }

        if !self.tls_enabled && self.url.starts_with("rediss://") {
            return Err("URL uses 'rediss://' scheme but TLS is not enabled. \
                 Either use 'redis://' or enable TLS with .tls(true)"
                .to_string());
        }

        Ok(())
    }
}

/// Retry policy with exponential backoff
///
/// Applies only to transient connection-level failures; store operations are
/// never retried after a transaction commit error.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts
    /// Default: 3
    pub max_retries: u32,

    /// Initial delay between retries
    /// Default: 100ms
    pub initial_delay: Duration,

    /// Maximum delay between retries
    /// Default: 5 seconds
    pub max_delay: Duration,

    /// Multiplier for exponential backoff
    /// Default: 2.0
    pub multiplier: f64,

    /// Add random jitter to delays
    /// Default: true
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Calculate delay for a given attempt number (0-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_delay =
            self.initial_delay.as_millis() as f64 * self.multiplier.powi(attempt as i32);

        let delay_ms = base_delay.min(self.max_delay.as_millis() as f64);

        let final_delay = if self.jitter {
            // Add up to 25% jitter
            let jitter = rand::random::<f64>() * 0.25;
            delay_ms * (1.0 + jitter)
        } else {
            delay_ms
        };

        Duration::from_millis(final_delay as u64)
    }

    /// Check if we should retry after the given attempt
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }
}

/// Top-level store configuration
#[derive(Clone, Debug)]
pub struct StoreConfig {
    /// Redis connection pool settings
    pub redis: RedisConfig,

    /// Maximum number of entities deleted per transaction in background
    /// cleanup workers. Keeps a single cleanup from holding one oversized
    /// batch. Default: 1000
    pub batch_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            redis: RedisConfig::default(),
            batch_size: 1000,
        }
    }
}

impl StoreConfig {
    /// Create a config with the specified Redis URL and defaults elsewhere
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            redis: RedisConfig::with_url(url),
            ..Default::default()
        }
    }

    /// Set the background deletion batch size
    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        self.redis.validate()?;
        if self.batch_size == 0 {
            return Err("Batch size must be greater than 0".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RedisConfig::default();
        assert_eq!(config.pool_size, 16);
        assert_eq!(config.connection_timeout, Duration::from_secs(5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let config = RedisConfig {
            url: "".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = RedisConfig {
            url: "redis://localhost".to_string(),
            pool_size: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = RedisConfig {
            url: "redis://localhost".to_string(),
            pool_size: 1001,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = RedisConfig {
            url: "redis://localhost".to_string(),
            pool_size: 16,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_retry_policy_delay() {
        let policy = RetryPolicy {
            initial_delay: Duration::from_millis(100),
            multiplier: 2.0,
            max_delay: Duration::from_secs(5),
            jitter: false,
            ..Default::default()
        };

        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(400));

        // Should cap at max_delay
        assert_eq!(policy.delay_for_attempt(10), Duration::from_secs(5));
    }

    #[test]
    fn test_retry_policy_should_retry() {
        let policy = RetryPolicy {
            max_retries: 3,
            ..Default::default()
        };

        assert!(policy.should_retry(0));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
        assert!(!policy.should_retry(4));
    }

    #[test]
    fn test_store_config_batch_size() {
        let config = StoreConfig::with_url("redis://localhost").batch_size(0);
        assert!(config.validate().is_err());

        let config = StoreConfig::with_url("redis://localhost").batch_size(500);
        assert_eq!(config.batch_size, 500);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = RedisConfig::with_url("redis://localhost:6380")
            .pool_size(32)
            .connection_timeout(Duration::from_secs(10));

        assert_eq!(config.url, "redis://localhost:6380");
        assert_eq!(config.pool_size, 32);
        assert_eq!(config.connection_timeout, Duration::from_secs(10));
    }
}
