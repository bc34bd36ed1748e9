//! Asynchronous bulk deletion worker
//!
//! Cascading and age-based cleanups can target millions of rows; deleting
//! them inline would block the caller and hold one oversized transaction.
//! Instead, the caller resolves the target id list up front, receives
//! success immediately, and the rows are deleted on a background task in
//! batches capped at the configured batch size.
//!
//! Deletion needs each target's blob, not just its id: the denormalized
//! attribute values (labels, foreign keys, category, status) name the index
//! entries that must be cleaned alongside the primary key.
//!
//! Failure policy is best-effort: a failed batch is logged and skipped, with
//! no retry and no rollback of batches already committed. The returned
//! [`CleanupHandle`] makes the task joinable for tests and shutdown paths,
//! but dropping it detaches the task and keeps the fire-and-forget contract.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::command::{self, Command};
use crate::pool::RedisPool;
use crate::query;

/// Handle to one background deletion task
///
/// Dropping the handle detaches the task; the deletion keeps running.
pub struct CleanupHandle {
    handle: JoinHandle<()>,
    targets: usize,
}

impl CleanupHandle {
    /// Number of rows this task was asked to delete
    pub fn targets(&self) -> usize {
        self.targets
    }

    /// Wait for the task to finish
    pub async fn join(self) {
        let _ = self.handle.await;
    }

    /// Whether the task has finished
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

/// Spawn a background task deleting the rows behind `stored_keys`
///
/// `build` turns one target's blob into its full delete-command list
/// (primary blob plus every index entry); returning `None` skips the target.
pub(crate) fn spawn_batched_delete<F>(
    pool: Arc<RedisPool>,
    batch_size: usize,
    stored_keys: Vec<String>,
    label: &'static str,
    build: F,
) -> CleanupHandle
where
    F: Fn(&[u8]) -> Option<Vec<Command>> + Send + 'static,
{
    let targets = stored_keys.len();
    debug!("preparing to delete {} {} rows", targets, label);

    let handle = tokio::spawn(async move {
        let mut conn = match pool.get().await {
            Ok(conn) => conn,
            Err(e) => {
                error!("{} deletion failed while borrowing a connection: {}", label, e);
                return;
            }
        };

        let objects = match query::objects_by_ids(&mut conn, &stored_keys).await {
            Ok(objects) => objects,
            Err(e) => {
                error!(
                    "{} deletion failed while retrieving objects by ids: {}",
                    label, e
                );
                return;
            }
        };

        let mut batch: Vec<Command> = Vec::new();
        let mut batched_rows = 0usize;

        for blob in &objects {
            let commands = match build(blob) {
                Some(commands) => commands,
                None => {
                    error!("unable to decode {} row for deletion, skipping", label);
                    continue;
                }
            };
            batch.extend(commands);
            batched_rows += 1;

            if batched_rows >= batch_size {
                if let Err(e) = command::execute(&mut conn, &batch, label).await {
                    error!("unable to execute batch {} deletion: {}", label, e);
                }
                batch.clear();
                batched_rows = 0;
            }
        }

        if !batch.is_empty() {
            if let Err(e) = command::execute(&mut conn, &batch, label).await {
                error!("unable to execute batch {} deletion: {}", label, e);
            }
        }

        debug!("{} deletion task finished ({} targets)", label, targets);
    });

    CleanupHandle { handle, targets }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_reports_target_count() {
        // Construct a handle around a finished task to exercise the accessors
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(async {
            let handle = CleanupHandle {
                handle: tokio::spawn(async {}),
                targets: 3,
            };
            assert_eq!(handle.targets(), 3);
            handle.join().await;
        });
    }
}
