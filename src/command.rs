//! Primitive write commands and the transactional writer
//!
//! Index maintenance is expressed as lists of [`Command`] values: each entity
//! module builds the full command list for a write (primary blob plus every
//! index entry) or the symmetric removal list for a delete, and the whole
//! list commits as one atomic batch. The backing engine's transaction
//! guarantees that the group either all lands or the error is surfaced and
//! none of it is trusted; there is no partial-application recovery.
//!
//! Keeping commands as data (rather than writing straight into a pipeline)
//! lets the index protocol be unit tested without a live server.

use crate::error::{Result, StoreError};
use redis::aio::MultiplexedConnection;
use redis::Pipeline;

/// A primitive write operation against the backing engine
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Store a serialized blob at a key
    Set {
        /// Target key
        key: String,
        /// Serialized entity blob
        value: Vec<u8>,
    },
    /// Remove a key (non-blocking reclaim)
    Unlink {
        /// Target key
        key: String,
    },
    /// Add a member to a sorted set
    ZAdd {
        /// Sorted-set key
        key: String,
        /// Ordering score, commonly a timestamp
        score: i64,
        /// Member value, commonly a stored key
        member: String,
    },
    /// Remove a member from a sorted set
    ZRem {
        /// Sorted-set key
        key: String,
        /// Member to remove
        member: String,
    },
    /// Set a hash field
    HSet {
        /// Hash key
        key: String,
        /// Field name
        field: String,
        /// Field value
        value: String,
    },
    /// Set a hash field only if absent
    HSetNx {
        /// Hash key
        key: String,
        /// Field name
        field: String,
        /// Field value
        value: String,
    },
    /// Remove a hash field
    HDel {
        /// Hash key
        key: String,
        /// Field to remove
        field: String,
    },
}

impl Command {
    /// Append this command onto a pipeline
    pub fn apply(&self, pipe: &mut Pipeline) {
        match self {
            Command::Set { key, value } => {
                pipe.cmd("SET").arg(key).arg(value.as_slice()).ignore();
            }
            Command::Unlink { key } => {
                pipe.cmd("UNLINK").arg(key).ignore();
            }
            Command::ZAdd { key, score, member } => {
                pipe.cmd("ZADD").arg(key).arg(*score).arg(member).ignore();
            }
            Command::ZRem { key, member } => {
                pipe.cmd("ZREM").arg(key).arg(member).ignore();
            }
            Command::HSet { key, field, value } => {
                pipe.cmd("HSET").arg(key).arg(field).arg(value).ignore();
            }
            Command::HSetNx { key, field, value } => {
                pipe.cmd("HSETNX").arg(key).arg(field).arg(value).ignore();
            }
            Command::HDel { key, field } => {
                pipe.cmd("HDEL").arg(key).arg(field).ignore();
            }
        }
    }
}

/// Build an atomic pipeline from a command list
pub fn build_pipeline(commands: &[Command]) -> Pipeline {
    let mut pipe = redis::pipe();
    pipe.atomic();
    for command in commands {
        command.apply(&mut pipe);
    }
    pipe
}

/// Commit a command list as one atomic batch
///
/// Empty lists are a no-op. Commit failures surface as a database error
/// with the supplied operation context; they are never retried here.
pub async fn execute(
    conn: &mut MultiplexedConnection,
    commands: &[Command],
    context: &str,
) -> Result<()> {
    if commands.is_empty() {
        return Ok(());
    }

    build_pipeline(commands)
        .query_async::<()>(conn)
        .await
        .map_err(|e| StoreError::Database(format!("{} failed: {}", context, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_construction() {
        let commands = vec![
            Command::Set {
                key: "md|dv:abc".into(),
                value: b"{}".to_vec(),
            },
            Command::ZAdd {
                key: "md|dv".into(),
                score: 0,
                member: "md|dv:abc".into(),
            },
            Command::HSet {
                key: "md|dv:name".into(),
                field: "camera-01".into(),
                value: "md|dv:abc".into(),
            },
        ];

        // Atomic pipelines wrap the commands in MULTI/EXEC
        let pipe = build_pipeline(&commands);
        let packed = pipe.get_packed_pipeline();
        let rendered = String::from_utf8_lossy(&packed);
        assert!(rendered.contains("MULTI"));
        assert!(rendered.contains("EXEC"));
        assert!(rendered.contains("ZADD"));
        assert!(rendered.contains("HSET"));
    }

    #[test]
    fn test_command_equality() {
        let a = Command::ZRem {
            key: "k".into(),
            member: "m".into(),
        };
        let b = Command::ZRem {
            key: "k".into(),
            member: "m".into(),
        };
        assert_eq!(a, b);
    }
}
