//! Notification persistence
//!
//! Index layout:
//!
//! ```text
//! sn|notif                     → ZSET scored by modified
//! sn|notif:<id>                → JSON blob
//! sn|notif:created             → ZSET scored by created (age queries)
//! sn|notif:category:<c>        → ZSET scored by modified (when category set)
//! sn|notif:label:<l>           → ZSET scored by modified
//! sn|notif:sender:<s>          → ZSET scored by modified
//! sn|notif:severity:<s>        → ZSET scored by modified
//! sn|notif:status:<s>          → ZSET scored by modified
//! ```
//!
//! Deleting a notification cascades to its transmissions; age-based
//! cleanups resolve both target lists up front and delete on background
//! batched tasks.

use redis::aio::MultiplexedConnection;

use crate::cleanup::{spawn_batched_delete, CleanupHandle};
use crate::command::{self, Command};
use crate::entity::{decode_list, transmission};
use crate::error::{Result, StoreError};
use crate::keys::{id_from_stored_key, make_key};
use crate::model::{make_timestamp, Notification, NotificationSeverity, NotificationStatus};
use crate::query;
use crate::store::{ensure_id, Store};

/// Primary ordered collection of notifications
pub const NOTIFICATION_COLLECTION: &str = "sn|notif";
/// Created index
pub const NOTIFICATION_COLLECTION_CREATED: &str = "sn|notif:created";
/// Category index prefix
pub const NOTIFICATION_COLLECTION_CATEGORY: &str = "sn|notif:category";
/// Label index prefix
pub const NOTIFICATION_COLLECTION_LABEL: &str = "sn|notif:label";
/// Sender index prefix
pub const NOTIFICATION_COLLECTION_SENDER: &str = "sn|notif:sender";
/// Severity index prefix
pub const NOTIFICATION_COLLECTION_SEVERITY: &str = "sn|notif:severity";
/// Status index prefix
pub const NOTIFICATION_COLLECTION_STATUS: &str = "sn|notif:status";

fn severity_str(severity: NotificationSeverity) -> &'static str {
    match severity {
        NotificationSeverity::Normal => "NORMAL",
        NotificationSeverity::Minor => "MINOR",
        NotificationSeverity::Critical => "CRITICAL",
    }
}

fn status_str(status: NotificationStatus) -> &'static str {
    match status {
        NotificationStatus::New => "NEW",
        NotificationStatus::Processed => "PROCESSED",
        NotificationStatus::Escalated => "ESCALATED",
    }
}

/// Stored key of a notification
pub fn stored_key(id: &str) -> String {
    make_key(&[NOTIFICATION_COLLECTION, id])
}

/// Full command list for persisting a notification and every index entry
pub fn add_commands(notification: &Notification) -> Result<Vec<Command>> {
    let blob = serde_json::to_vec(notification).map_err(|e| {
        StoreError::ContractInvalid(format!(
            "unable to JSON marshal notification for persistence: {}",
            e
        ))
    })?;
    let key = stored_key(&notification.id);

    let mut commands = vec![
        Command::Set {
            key: key.clone(),
            value: blob,
        },
        Command::ZAdd {
            key: NOTIFICATION_COLLECTION.into(),
            score: notification.modified,
            member: key.clone(),
        },
        Command::ZAdd {
            key: NOTIFICATION_COLLECTION_CREATED.into(),
            score: notification.created,
            member: key.clone(),
        },
    ];
    if !notification.category.is_empty() {
        commands.push(Command::ZAdd {
            key: make_key(&[NOTIFICATION_COLLECTION_CATEGORY, &notification.category]),
            score: notification.modified,
            member: key.clone(),
        });
    }
    for label in &notification.labels {
        commands.push(Command::ZAdd {
            key: make_key(&[NOTIFICATION_COLLECTION_LABEL, label]),
            score: notification.modified,
            member: key.clone(),
        });
    }
    commands.push(Command::ZAdd {
        key: make_key(&[NOTIFICATION_COLLECTION_SENDER, &notification.sender]),
        score: notification.modified,
        member: key.clone(),
    });
    commands.push(Command::ZAdd {
        key: make_key(&[NOTIFICATION_COLLECTION_SEVERITY, severity_str(notification.severity)]),
        score: notification.modified,
        member: key.clone(),
    });
    commands.push(Command::ZAdd {
        key: make_key(&[NOTIFICATION_COLLECTION_STATUS, status_str(notification.status)]),
        score: notification.modified,
        member: key,
    });
    Ok(commands)
}

/// Symmetric removal list for a notification
pub fn delete_commands(notification: &Notification) -> Vec<Command> {
    let key = stored_key(&notification.id);
    let mut commands = vec![
        Command::Unlink { key: key.clone() },
        Command::ZRem {
            key: NOTIFICATION_COLLECTION.into(),
            member: key.clone(),
        },
        Command::ZRem {
            key: NOTIFICATION_COLLECTION_CREATED.into(),
            member: key.clone(),
        },
    ];
    if !notification.category.is_empty() {
        commands.push(Command::ZRem {
            key: make_key(&[NOTIFICATION_COLLECTION_CATEGORY, &notification.category]),
            member: key.clone(),
        });
    }
    for label in &notification.labels {
        commands.push(Command::ZRem {
            key: make_key(&[NOTIFICATION_COLLECTION_LABEL, label]),
            member: key.clone(),
        });
    }
    commands.push(Command::ZRem {
        key: make_key(&[NOTIFICATION_COLLECTION_SENDER, &notification.sender]),
        member: key.clone(),
    });
    commands.push(Command::ZRem {
        key: make_key(&[NOTIFICATION_COLLECTION_SEVERITY, severity_str(notification.severity)]),
        member: key.clone(),
    });
    commands.push(Command::ZRem {
        key: make_key(&[NOTIFICATION_COLLECTION_STATUS, status_str(notification.status)]),
        member: key,
    });
    commands
}

pub(crate) fn delete_commands_from_blob(blob: &[u8]) -> Option<Vec<Command>> {
    let notification: Notification = serde_json::from_slice(blob).ok()?;
    Some(delete_commands(&notification))
}

/// Add a new notification
pub async fn add_notification(
    conn: &mut MultiplexedConnection,
    mut notification: Notification,
) -> Result<Notification> {
    if query::object_id_exists(conn, &stored_key(&notification.id)).await? {
        return Err(StoreError::DuplicateName(format!(
            "notification id {} already exists",
            notification.id
        )));
    }

    let ts = make_timestamp();
    if notification.created == 0 {
        notification.created = ts;
    }
    notification.modified = ts;

    let commands = add_commands(&notification)?;
    command::execute(conn, &commands, "notification creation").await?;
    Ok(notification)
}

/// Fetch a notification by id
pub async fn notification_by_id(
    conn: &mut MultiplexedConnection,
    id: &str,
) -> Result<Notification> {
    query::object_by_id(conn, &stored_key(id)).await
}

/// Notifications with one category
pub async fn notifications_by_category(
    conn: &mut MultiplexedConnection,
    offset: usize,
    limit: i64,
    category: &str,
) -> Result<Vec<Notification>> {
    let objects = query::objects_by_rev_range(
        conn,
        &make_key(&[NOTIFICATION_COLLECTION_CATEGORY, category]),
        offset,
        limit,
    )
    .await?;
    decode_list(objects, "notification")
}

/// Notifications with one label
pub async fn notifications_by_label(
    conn: &mut MultiplexedConnection,
    offset: usize,
    limit: i64,
    label: &str,
) -> Result<Vec<Notification>> {
    let objects = query::objects_by_rev_range(
        conn,
        &make_key(&[NOTIFICATION_COLLECTION_LABEL, label]),
        offset,
        limit,
    )
    .await?;
    decode_list(objects, "notification")
}

/// Notifications with one status
pub async fn notifications_by_status(
    conn: &mut MultiplexedConnection,
    offset: usize,
    limit: i64,
    status: NotificationStatus,
) -> Result<Vec<Notification>> {
    let objects = query::objects_by_rev_range(
        conn,
        &make_key(&[NOTIFICATION_COLLECTION_STATUS, status_str(status)]),
        offset,
        limit,
    )
    .await?;
    decode_list(objects, "notification")
}

/// Notifications within a created window
pub async fn notifications_by_time_range(
    conn: &mut MultiplexedConnection,
    start: i64,
    end: i64,
    offset: usize,
    limit: i64,
) -> Result<Vec<Notification>> {
    let objects = query::objects_by_score_range(
        conn,
        NOTIFICATION_COLLECTION_CREATED,
        start,
        end,
        offset,
        limit,
    )
    .await?;
    decode_list(objects, "notification")
}

/// Notifications matching any of the categories or labels (OR-semantics)
pub async fn notifications_by_categories_and_labels(
    conn: &mut MultiplexedConnection,
    offset: usize,
    limit: i64,
    categories: &[String],
    labels: &[String],
) -> Result<Vec<Notification>> {
    let mut keys: Vec<String> = categories
        .iter()
        .map(|category| make_key(&[NOTIFICATION_COLLECTION_CATEGORY, category]))
        .collect();
    keys.extend(
        labels
            .iter()
            .map(|label| make_key(&[NOTIFICATION_COLLECTION_LABEL, label])),
    );

    let objects = query::union_objects_by_keys(conn, offset, limit, &keys).await?;
    decode_list(objects, "notification")
}

/// Update a notification: delete old index state, write new state
pub async fn update_notification(
    conn: &mut MultiplexedConnection,
    mut notification: Notification,
) -> Result<()> {
    let old_notification = notification_by_id(conn, &notification.id).await?;

    notification.created = old_notification.created;
    notification.modified = make_timestamp();

    let mut commands = delete_commands(&old_notification);
    commands.extend(add_commands(&notification)?);
    command::execute(conn, &commands, "notification update").await
}

/// Delete a notification by id, cascading to every transmission that
/// references it
pub async fn delete_notification_by_id(conn: &mut MultiplexedConnection, id: &str) -> Result<()> {
    let notification = notification_by_id(conn, id).await?;

    let commands = delete_commands(&notification);
    command::execute(conn, &commands, "notification deletion").await?;

    let trans_keys = query::ids_by_range_all(
        conn,
        &make_key(&[
            transmission::TRANSMISSION_COLLECTION_NOTIFICATION_ID,
            &notification.id,
        ]),
    )
    .await?;
    for trans_key in &trans_keys {
        transmission::delete_transmission_by_id(conn, id_from_stored_key(trans_key)).await?;
    }
    Ok(())
}

/// Resolve the stored keys of notifications older than `age` milliseconds
/// under `collection_key`, plus the stored keys of their transmissions
pub async fn notification_and_transmission_keys_older_than(
    conn: &mut MultiplexedConnection,
    collection_key: &str,
    age: i64,
) -> Result<(Vec<String>, Vec<String>)> {
    let expire_timestamp = make_timestamp() - age;

    let notification_keys =
        query::ids_by_score_range(conn, collection_key, 0, expire_timestamp).await?;

    let mut trans_keys = Vec::new();
    for notification_key in &notification_keys {
        let keys = query::ids_by_range_all(
            conn,
            &make_key(&[
                transmission::TRANSMISSION_COLLECTION_NOTIFICATION_ID,
                id_from_stored_key(notification_key),
            ]),
        )
        .await?;
        trans_keys.extend(keys);
    }

    Ok((notification_keys, trans_keys))
}

/// Handles to the pair of background tasks a notification cleanup spawns
pub struct NotificationCleanup {
    /// Task deleting the notification rows
    pub notifications: CleanupHandle,
    /// Task deleting the dependent transmission rows
    pub transmissions: CleanupHandle,
}

impl NotificationCleanup {
    /// Wait for both tasks to finish
    pub async fn join(self) {
        self.notifications.join().await;
        self.transmissions.join().await;
    }
}

impl Store {
    /// Add a new notification
    pub async fn add_notification(&self, mut notification: Notification) -> Result<Notification> {
        notification.id = ensure_id(&notification.id)?;
        let mut conn = self.conn().await?;
        add_notification(&mut conn, notification).await
    }

    /// Get a notification by id
    pub async fn notification_by_id(&self, id: &str) -> Result<Notification> {
        let mut conn = self.conn().await?;
        notification_by_id(&mut conn, id).await
    }

    /// Query notifications by category with offset and limit
    pub async fn notifications_by_category(
        &self,
        offset: usize,
        limit: i64,
        category: &str,
    ) -> Result<Vec<Notification>> {
        let mut conn = self.conn().await?;
        notifications_by_category(&mut conn, offset, limit, category).await
    }

    /// Query notifications by label with offset and limit
    pub async fn notifications_by_label(
        &self,
        offset: usize,
        limit: i64,
        label: &str,
    ) -> Result<Vec<Notification>> {
        let mut conn = self.conn().await?;
        notifications_by_label(&mut conn, offset, limit, label).await
    }

    /// Query notifications by status with offset and limit
    pub async fn notifications_by_status(
        &self,
        offset: usize,
        limit: i64,
        status: NotificationStatus,
    ) -> Result<Vec<Notification>> {
        let mut conn = self.conn().await?;
        notifications_by_status(&mut conn, offset, limit, status).await
    }

    /// Query notifications by created window with offset and limit
    pub async fn notifications_by_time_range(
        &self,
        start: i64,
        end: i64,
        offset: usize,
        limit: i64,
    ) -> Result<Vec<Notification>> {
        let mut conn = self.conn().await?;
        notifications_by_time_range(&mut conn, start, end, offset, limit).await
    }

    /// Query notifications matching any of the categories or labels
    pub async fn notifications_by_categories_and_labels(
        &self,
        offset: usize,
        limit: i64,
        categories: &[String],
        labels: &[String],
    ) -> Result<Vec<Notification>> {
        let mut conn = self.conn().await?;
        notifications_by_categories_and_labels(&mut conn, offset, limit, categories, labels).await
    }

    /// Update a notification
    pub async fn update_notification(&self, notification: Notification) -> Result<()> {
        let mut conn = self.conn().await?;
        update_notification(&mut conn, notification).await
    }

    /// Delete a notification by id, cascading to its transmissions
    pub async fn delete_notification_by_id(&self, id: &str) -> Result<()> {
        let mut conn = self.conn().await?;
        delete_notification_by_id(&mut conn, id).await
    }

    /// Total notification count
    pub async fn notification_total_count(&self) -> Result<u32> {
        let mut conn = self.conn().await?;
        query::member_count(&mut conn, NOTIFICATION_COLLECTION).await
    }

    /// Count notifications within a created window
    pub async fn notification_count_by_time_range(&self, start: i64, end: i64) -> Result<u32> {
        let mut conn = self.conn().await?;
        query::member_count_by_score_range(&mut conn, NOTIFICATION_COLLECTION_CREATED, start, end)
            .await
    }

    /// Delete notifications created more than `age` milliseconds ago,
    /// together with their transmissions
    ///
    /// Returns as soon as the target id lists are resolved; row deletion
    /// proceeds on background tasks reachable through the returned handles.
    pub async fn cleanup_notifications_by_age(&self, age: i64) -> Result<NotificationCleanup> {
        let mut conn = self.conn().await?;
        let (notification_keys, trans_keys) = notification_and_transmission_keys_older_than(
            &mut conn,
            NOTIFICATION_COLLECTION_CREATED,
            age,
        )
        .await?;
        drop(conn);

        Ok(NotificationCleanup {
            notifications: self.spawn_delete_notifications(notification_keys),
            transmissions: self.spawn_delete_transmissions(trans_keys),
        })
    }

    /// Delete processed notifications older than `age` milliseconds,
    /// together with their transmissions
    pub async fn delete_processed_notifications_by_age(
        &self,
        age: i64,
    ) -> Result<NotificationCleanup> {
        let status_key = make_key(&[
            NOTIFICATION_COLLECTION_STATUS,
            status_str(NotificationStatus::Processed),
        ]);

        let mut conn = self.conn().await?;
        let (notification_keys, trans_keys) =
            notification_and_transmission_keys_older_than(&mut conn, &status_key, age).await?;
        drop(conn);

        Ok(NotificationCleanup {
            notifications: self.spawn_delete_notifications(notification_keys),
            transmissions: self.spawn_delete_transmissions(trans_keys),
        })
    }

    pub(crate) fn spawn_delete_notifications(&self, stored_keys: Vec<String>) -> CleanupHandle {
        spawn_batched_delete(
            self.pool.clone(),
            self.batch_size,
            stored_keys,
            "notification",
            delete_commands_from_blob,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_notification() -> Notification {
        Notification {
            id: "cccccccc-0000-4000-8000-000000000001".into(),
            category: "health".into(),
            labels: vec!["disk".into()],
            content: "disk usage above 90%".into(),
            content_type: "text/plain".into(),
            description: String::new(),
            sender: "sys-agent".into(),
            severity: NotificationSeverity::Critical,
            status: NotificationStatus::New,
            created: 10,
            modified: 20,
        }
    }

    #[test]
    fn test_add_commands_cover_every_index() {
        let commands = add_commands(&sample_notification()).unwrap();
        // blob + primary + created + category + 1 label + sender + severity + status
        assert_eq!(commands.len(), 8);
        assert!(commands.iter().any(|c| matches!(c, Command::ZAdd { key, score, .. }
            if key == NOTIFICATION_COLLECTION_CREATED && *score == 10)));
        assert!(commands.iter().any(|c| matches!(c, Command::ZAdd { key, score, .. }
            if key == "sn|notif:category:health" && *score == 20)));
        assert!(commands.iter().any(|c| matches!(c, Command::ZAdd { key, .. }
            if key == "sn|notif:severity:CRITICAL")));
        assert!(commands.iter().any(|c| matches!(c, Command::ZAdd { key, .. }
            if key == "sn|notif:status:NEW")));
    }

    #[test]
    fn test_empty_category_is_not_indexed() {
        let mut notification = sample_notification();
        notification.category = String::new();

        let adds = add_commands(&notification).unwrap();
        assert!(!adds.iter().any(|c| matches!(c, Command::ZAdd { key, .. }
            if key.starts_with("sn|notif:category"))));
        assert_eq!(adds.len(), delete_commands(&notification).len());
    }

    #[test]
    fn test_command_symmetry() {
        let notification = sample_notification();
        assert_eq!(
            add_commands(&notification).unwrap().len(),
            delete_commands(&notification).len()
        );
    }
}
