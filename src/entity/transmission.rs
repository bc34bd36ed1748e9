//! Transmission persistence
//!
//! Transmissions are delivery trails: they reference a notification by id
//! and a subscription by name, and are cascade-deleted when their
//! notification goes away. All indexes are scored by `created`.

use redis::aio::MultiplexedConnection;

use crate::cleanup::{spawn_batched_delete, CleanupHandle};
use crate::command::{self, Command};
use crate::entity::decode_list;
use crate::error::{Result, StoreError};
use crate::keys::make_key;
use crate::model::{make_timestamp, Transmission, TransmissionStatus};
use crate::query;
use crate::store::{ensure_id, Store};

/// Primary ordered collection of transmissions
pub const TRANSMISSION_COLLECTION: &str = "sn|trans";
/// Created index
pub const TRANSMISSION_COLLECTION_CREATED: &str = "sn|trans:created";
/// Status index prefix
pub const TRANSMISSION_COLLECTION_STATUS: &str = "sn|trans:status";
/// Subscription-name index prefix
pub const TRANSMISSION_COLLECTION_SUBSCRIPTION_NAME: &str = "sn|trans:subscription:name";
/// Notification-id index prefix
pub const TRANSMISSION_COLLECTION_NOTIFICATION_ID: &str = "sn|trans:notification:id";

fn status_str(status: TransmissionStatus) -> &'static str {
    match status {
        TransmissionStatus::Acknowledged => "ACKNOWLEDGED",
        TransmissionStatus::Failed => "FAILED",
        TransmissionStatus::Sent => "SENT",
        TransmissionStatus::Resending => "RESENDING",
        TransmissionStatus::Escalated => "ESCALATED",
    }
}

/// Stored key of a transmission
pub fn stored_key(id: &str) -> String {
    make_key(&[TRANSMISSION_COLLECTION, id])
}

/// Full command list for persisting a transmission and every index entry
pub fn add_commands(trans: &Transmission) -> Result<Vec<Command>> {
    let blob = serde_json::to_vec(trans).map_err(|e| {
        StoreError::ContractInvalid(format!(
            "unable to JSON marshal transmission for persistence: {}",
            e
        ))
    })?;
    let key = stored_key(&trans.id);

    Ok(vec![
        Command::Set {
            key: key.clone(),
            value: blob,
        },
        Command::ZAdd {
            key: TRANSMISSION_COLLECTION.into(),
            score: trans.created,
            member: key.clone(),
        },
        Command::ZAdd {
            key: TRANSMISSION_COLLECTION_CREATED.into(),
            score: trans.created,
            member: key.clone(),
        },
        Command::ZAdd {
            key: make_key(&[TRANSMISSION_COLLECTION_STATUS, status_str(trans.status)]),
            score: trans.created,
            member: key.clone(),
        },
        Command::ZAdd {
            key: make_key(&[
                TRANSMISSION_COLLECTION_SUBSCRIPTION_NAME,
                &trans.subscription_name,
            ]),
            score: trans.created,
            member: key.clone(),
        },
        Command::ZAdd {
            key: make_key(&[TRANSMISSION_COLLECTION_NOTIFICATION_ID, &trans.notification_id]),
            score: trans.created,
            member: key,
        },
    ])
}

/// Symmetric removal list for a transmission
pub fn delete_commands(trans: &Transmission) -> Vec<Command> {
    let key = stored_key(&trans.id);
    vec![
        Command::Unlink { key: key.clone() },
        Command::ZRem {
            key: TRANSMISSION_COLLECTION.into(),
            member: key.clone(),
        },
        Command::ZRem {
            key: TRANSMISSION_COLLECTION_CREATED.into(),
            member: key.clone(),
        },
        Command::ZRem {
            key: make_key(&[TRANSMISSION_COLLECTION_STATUS, status_str(trans.status)]),
            member: key.clone(),
        },
        Command::ZRem {
            key: make_key(&[
                TRANSMISSION_COLLECTION_SUBSCRIPTION_NAME,
                &trans.subscription_name,
            ]),
            member: key.clone(),
        },
        Command::ZRem {
            key: make_key(&[TRANSMISSION_COLLECTION_NOTIFICATION_ID, &trans.notification_id]),
            member: key,
        },
    ]
}

pub(crate) fn delete_commands_from_blob(blob: &[u8]) -> Option<Vec<Command>> {
    let trans: Transmission = serde_json::from_slice(blob).ok()?;
    Some(delete_commands(&trans))
}

/// Add a new transmission
pub async fn add_transmission(
    conn: &mut MultiplexedConnection,
    mut trans: Transmission,
) -> Result<Transmission> {
    if query::object_id_exists(conn, &stored_key(&trans.id)).await? {
        return Err(StoreError::DuplicateName(format!(
            "transmission id {} already exists",
            trans.id
        )));
    }

    if trans.created == 0 {
        trans.created = make_timestamp();
    }

    let commands = add_commands(&trans)?;
    command::execute(conn, &commands, "transmission creation").await?;
    Ok(trans)
}

/// Fetch a transmission by id
pub async fn transmission_by_id(
    conn: &mut MultiplexedConnection,
    id: &str,
) -> Result<Transmission> {
    query::object_by_id(conn, &stored_key(id)).await
}

/// Update a transmission: delete old index state, write new state
pub async fn update_transmission(
    conn: &mut MultiplexedConnection,
    trans: Transmission,
) -> Result<()> {
    let old_trans = transmission_by_id(conn, &trans.id).await?;

    let mut commands = delete_commands(&old_trans);
    commands.extend(add_commands(&trans)?);
    command::execute(conn, &commands, "transmission update").await
}

/// Delete a transmission by id
pub async fn delete_transmission_by_id(conn: &mut MultiplexedConnection, id: &str) -> Result<()> {
    let trans = transmission_by_id(conn, id).await?;
    let commands = delete_commands(&trans);
    command::execute(conn, &commands, "transmission deletion").await
}

/// All transmissions, most recently created first
pub async fn all_transmissions(
    conn: &mut MultiplexedConnection,
    offset: usize,
    limit: i64,
) -> Result<Vec<Transmission>> {
    let objects = query::objects_by_rev_range(conn, TRANSMISSION_COLLECTION, offset, limit).await?;
    decode_list(objects, "transmission")
}

/// Transmissions within a created window
pub async fn transmissions_by_time_range(
    conn: &mut MultiplexedConnection,
    start: i64,
    end: i64,
    offset: usize,
    limit: i64,
) -> Result<Vec<Transmission>> {
    let objects = query::objects_by_score_range(
        conn,
        TRANSMISSION_COLLECTION_CREATED,
        start,
        end,
        offset,
        limit,
    )
    .await?;
    decode_list(objects, "transmission")
}

/// Transmissions with one status
pub async fn transmissions_by_status(
    conn: &mut MultiplexedConnection,
    offset: usize,
    limit: i64,
    status: TransmissionStatus,
) -> Result<Vec<Transmission>> {
    let objects = query::objects_by_rev_range(
        conn,
        &make_key(&[TRANSMISSION_COLLECTION_STATUS, status_str(status)]),
        offset,
        limit,
    )
    .await?;
    decode_list(objects, "transmission")
}

/// Transmissions targeting one subscription
pub async fn transmissions_by_subscription_name(
    conn: &mut MultiplexedConnection,
    offset: usize,
    limit: i64,
    subscription_name: &str,
) -> Result<Vec<Transmission>> {
    let objects = query::objects_by_rev_range(
        conn,
        &make_key(&[TRANSMISSION_COLLECTION_SUBSCRIPTION_NAME, subscription_name]),
        offset,
        limit,
    )
    .await?;
    decode_list(objects, "transmission")
}

/// Transmissions delivering one notification
pub async fn transmissions_by_notification_id(
    conn: &mut MultiplexedConnection,
    offset: usize,
    limit: i64,
    notification_id: &str,
) -> Result<Vec<Transmission>> {
    let objects = query::objects_by_rev_range(
        conn,
        &make_key(&[TRANSMISSION_COLLECTION_NOTIFICATION_ID, notification_id]),
        offset,
        limit,
    )
    .await?;
    decode_list(objects, "transmission")
}

/// Stored keys of transmissions in one status older than `age` milliseconds
pub async fn transmission_keys_older_than(
    conn: &mut MultiplexedConnection,
    status: TransmissionStatus,
    age: i64,
) -> Result<Vec<String>> {
    let expire_timestamp = make_timestamp() - age;
    query::ids_by_score_range(
        conn,
        &make_key(&[TRANSMISSION_COLLECTION_STATUS, status_str(status)]),
        0,
        expire_timestamp,
    )
    .await
}

impl Store {
    /// Add a new transmission
    pub async fn add_transmission(&self, mut trans: Transmission) -> Result<Transmission> {
        trans.id = ensure_id(&trans.id)?;
        let mut conn = self.conn().await?;
        add_transmission(&mut conn, trans).await
    }

    /// Get a transmission by id
    pub async fn transmission_by_id(&self, id: &str) -> Result<Transmission> {
        let mut conn = self.conn().await?;
        transmission_by_id(&mut conn, id).await
    }

    /// Update a transmission
    pub async fn update_transmission(&self, trans: Transmission) -> Result<()> {
        let mut conn = self.conn().await?;
        update_transmission(&mut conn, trans).await
    }

    /// Delete a transmission by id
    pub async fn delete_transmission_by_id(&self, id: &str) -> Result<()> {
        let mut conn = self.conn().await?;
        delete_transmission_by_id(&mut conn, id).await
    }

    /// Query transmissions with offset and limit
    pub async fn all_transmissions(&self, offset: usize, limit: i64) -> Result<Vec<Transmission>> {
        let mut conn = self.conn().await?;
        all_transmissions(&mut conn, offset, limit).await
    }

    /// Query transmissions by created window with offset and limit
    pub async fn transmissions_by_time_range(
        &self,
        start: i64,
        end: i64,
        offset: usize,
        limit: i64,
    ) -> Result<Vec<Transmission>> {
        let mut conn = self.conn().await?;
        transmissions_by_time_range(&mut conn, start, end, offset, limit).await
    }

    /// Query transmissions by status with offset and limit
    pub async fn transmissions_by_status(
        &self,
        offset: usize,
        limit: i64,
        status: TransmissionStatus,
    ) -> Result<Vec<Transmission>> {
        let mut conn = self.conn().await?;
        transmissions_by_status(&mut conn, offset, limit, status).await
    }

    /// Query transmissions by subscription name with offset and limit
    pub async fn transmissions_by_subscription_name(
        &self,
        offset: usize,
        limit: i64,
        subscription_name: &str,
    ) -> Result<Vec<Transmission>> {
        let mut conn = self.conn().await?;
        transmissions_by_subscription_name(&mut conn, offset, limit, subscription_name).await
    }

    /// Query transmissions by notification id with offset and limit
    pub async fn transmissions_by_notification_id(
        &self,
        offset: usize,
        limit: i64,
        notification_id: &str,
    ) -> Result<Vec<Transmission>> {
        let mut conn = self.conn().await?;
        transmissions_by_notification_id(&mut conn, offset, limit, notification_id).await
    }

    /// Total transmission count
    pub async fn transmission_total_count(&self) -> Result<u32> {
        let mut conn = self.conn().await?;
        query::member_count(&mut conn, TRANSMISSION_COLLECTION).await
    }

    /// Count transmissions delivering one notification
    pub async fn transmission_count_by_notification_id(
        &self,
        notification_id: &str,
    ) -> Result<u32> {
        let mut conn = self.conn().await?;
        query::member_count(
            &mut conn,
            &make_key(&[TRANSMISSION_COLLECTION_NOTIFICATION_ID, notification_id]),
        )
        .await
    }

    /// Count transmissions with one status
    pub async fn transmission_count_by_status(&self, status: TransmissionStatus) -> Result<u32> {
        let mut conn = self.conn().await?;
        query::member_count(
            &mut conn,
            &make_key(&[TRANSMISSION_COLLECTION_STATUS, status_str(status)]),
        )
        .await
    }

    /// Delete finished transmissions (acknowledged, sent, escalated) older
    /// than `age` milliseconds
    ///
    /// Returns once the target lists are resolved; deletion proceeds on one
    /// background task per status.
    pub async fn delete_processed_transmissions_by_age(
        &self,
        age: i64,
    ) -> Result<Vec<CleanupHandle>> {
        let mut conn = self.conn().await?;

        let mut handles = Vec::new();
        for status in [
            TransmissionStatus::Acknowledged,
            TransmissionStatus::Sent,
            TransmissionStatus::Escalated,
        ] {
            let keys = transmission_keys_older_than(&mut conn, status, age).await?;
            handles.push(self.spawn_delete_transmissions(keys));
        }
        Ok(handles)
    }

    pub(crate) fn spawn_delete_transmissions(&self, stored_keys: Vec<String>) -> CleanupHandle {
        spawn_batched_delete(
            self.pool.clone(),
            self.batch_size,
            stored_keys,
            "transmission",
            delete_commands_from_blob,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transmission_command_symmetry() {
        let trans = Transmission {
            id: "cccccccc-0000-4000-8000-000000000002".into(),
            created: 42,
            notification_id: "cccccccc-0000-4000-8000-000000000001".into(),
            subscription_name: "ops-email".into(),
            status: TransmissionStatus::Sent,
            resend_count: 0,
        };

        let adds = add_commands(&trans).unwrap();
        let deletes = delete_commands(&trans);
        assert_eq!(adds.len(), 6);
        assert_eq!(adds.len(), deletes.len());
        assert!(adds.iter().any(|c| matches!(c, Command::ZAdd { key, score, .. }
            if key == "sn|trans:status:SENT" && *score == 42)));
        assert!(adds.iter().any(|c| matches!(c, Command::ZAdd { key, .. }
            if key == "sn|trans:notification:id:cccccccc-0000-4000-8000-000000000001")));
    }

    #[test]
    fn test_status_strings_match_wire_format() {
        // The status index key segment must equal the serde wire form
        let json = serde_json::to_string(&TransmissionStatus::Acknowledged).unwrap();
        assert_eq!(json, format!("\"{}\"", status_str(TransmissionStatus::Acknowledged)));
    }
}
