//! edgestore - Redis-backed persistence core for IoT platform services
//!
//! This library turns a bare sorted-set/hash key-value engine into a
//! document store with:
//! - Secondary indexes maintained atomically with every write
//! - Referential-integrity checks embedded in the data model
//! - Paginated range, time-window, and label/category queries
//! - Background batched deletion for cascading and age-based cleanups
//! - A hierarchical configuration namespace ("Keeper")
//!
//! It is consumed by independent platform services (telemetry ingestion,
//! device metadata, alerting, scheduling, config store) that each own a
//! disjoint set of entity types but share the same indexing and query
//! machinery.
//!
//! # Example
//!
//! ```rust,no_run
//! use edgestore::config::StoreConfig;
//! use edgestore::store::Store;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Store::connect(StoreConfig::with_url("redis://localhost:6379")).await?;
//!
//! let events = store.events_by_device_name(0, 20, "thermostat-01").await?;
//! println!("{} recent events", events.len());
//!
//! store.close_session();
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cleanup;
pub mod command;
pub mod config;
pub mod entity;
pub mod error;
pub mod keeper;
pub mod keys;
pub mod model;
pub mod pool;
pub mod query;
pub mod store;

/// Small shared helpers (URL sanitization)
pub mod util;

// Re-export main types
pub use cleanup::CleanupHandle;
pub use config::{RedisConfig, RetryPolicy, StoreConfig};
pub use error::{Result, StoreError};
pub use store::Store;
