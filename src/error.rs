//! Error types for the store

use thiserror::Error;

/// Main error type for store operations
///
/// Each variant corresponds to one user-visible error kind. Every public
/// operation returns either a populated result or exactly one of these;
/// there are no partial-success return values.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The requested id, name, or key is absent
    #[error("not found: {0}")]
    NotFound(String),

    /// An id or unique name collided on insert
    #[error("duplicate name: {0}")]
    DuplicateName(String),

    /// A malformed UUID was supplied where one is required
    #[error("invalid id: {0}")]
    InvalidId(String),

    /// Serialization failed, or a value is incompatible with the target
    /// index or schema (e.g. writing a scalar over an existing subtree)
    #[error("contract invalid: {0}")]
    ContractInvalid(String),

    /// A referenced foreign entity (profile, service, interval, notification)
    /// is missing
    #[error("entity does not exist: {0}")]
    EntityDoesNotExist(String),

    /// A delete was blocked by a live dependent row
    #[error("status conflict: {0}")]
    StatusConflict(String),

    /// The pagination offset lies beyond the result size
    #[error("range not satisfiable: offset {offset} exceeds result length {count}")]
    RangeNotSatisfiable {
        /// Requested offset
        offset: usize,
        /// Actual member count of the ranged collection
        count: usize,
    },

    /// Backing-engine command failure, connection failure, or transaction
    /// commit failure
    #[error("database error: {0}")]
    Database(String),
}

impl From<redis::RedisError> for StoreError {
    fn from(e: redis::RedisError) -> Self {
        StoreError::Database(e.to_string())
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_not_satisfiable_message() {
        let err = StoreError::RangeNotSatisfiable {
            offset: 20,
            count: 5,
        };
        let msg = err.to_string();
        assert!(msg.contains("20"));
        assert!(msg.contains("5"));
    }

    #[test]
    fn test_redis_error_maps_to_database() {
        let redis_err = redis::RedisError::from((redis::ErrorKind::IoError, "broken pipe"));
        let err = StoreError::from(redis_err);
        assert!(matches!(err, StoreError::Database(_)));
    }
}
