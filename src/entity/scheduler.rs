//! Scheduling persistence: intervals and interval actions
//!
//! An interval action references its interval by name, and the interval
//! must exist at write time. An interval cannot be deleted or renamed while
//! any action still references it.

use redis::aio::MultiplexedConnection;

use crate::command::{self, Command};
use crate::entity::decode_list;
use crate::error::{Result, StoreError};
use crate::keys::make_key;
use crate::model::{make_timestamp, Interval, IntervalAction};
use crate::query;
use crate::store::{ensure_id, Store};

/// Primary ordered collection of intervals
pub const INTERVAL_COLLECTION: &str = "ss|iv";
/// Interval name → stored key hash
pub const INTERVAL_COLLECTION_NAME: &str = "ss|iv:name";
/// Primary ordered collection of interval actions
pub const INTERVAL_ACTION_COLLECTION: &str = "ss|ia";
/// Action name → stored key hash
pub const INTERVAL_ACTION_COLLECTION_NAME: &str = "ss|ia:name";
/// Interval-name index prefix for actions
pub const INTERVAL_ACTION_COLLECTION_INTERVAL_NAME: &str = "ss|ia:interval:name";

fn interval_stored_key(id: &str) -> String {
    make_key(&[INTERVAL_COLLECTION, id])
}

fn action_stored_key(id: &str) -> String {
    make_key(&[INTERVAL_ACTION_COLLECTION, id])
}

/// Full command list for persisting an interval
pub fn interval_add_commands(interval: &Interval) -> Result<Vec<Command>> {
    let blob = serde_json::to_vec(interval).map_err(|e| {
        StoreError::ContractInvalid(format!("unable to JSON marshal interval for persistence: {}", e))
    })?;
    let key = interval_stored_key(&interval.id);

    Ok(vec![
        Command::Set {
            key: key.clone(),
            value: blob,
        },
        Command::ZAdd {
            key: INTERVAL_COLLECTION.into(),
            score: interval.modified,
            member: key.clone(),
        },
        Command::HSet {
            key: INTERVAL_COLLECTION_NAME.into(),
            field: interval.name.clone(),
            value: key,
        },
    ])
}

/// Symmetric removal list for an interval
pub fn interval_delete_commands(interval: &Interval) -> Vec<Command> {
    let key = interval_stored_key(&interval.id);
    vec![
        Command::Unlink { key: key.clone() },
        Command::ZRem {
            key: INTERVAL_COLLECTION.into(),
            member: key,
        },
        Command::HDel {
            key: INTERVAL_COLLECTION_NAME.into(),
            field: interval.name.clone(),
        },
    ]
}

/// Full command list for persisting an interval action
pub fn action_add_commands(action: &IntervalAction) -> Result<Vec<Command>> {
    let blob = serde_json::to_vec(action).map_err(|e| {
        StoreError::ContractInvalid(format!(
            "unable to JSON marshal interval action for persistence: {}",
            e
        ))
    })?;
    let key = action_stored_key(&action.id);

    Ok(vec![
        Command::Set {
            key: key.clone(),
            value: blob,
        },
        Command::ZAdd {
            key: INTERVAL_ACTION_COLLECTION.into(),
            score: action.modified,
            member: key.clone(),
        },
        Command::HSet {
            key: INTERVAL_ACTION_COLLECTION_NAME.into(),
            field: action.name.clone(),
            value: key.clone(),
        },
        Command::ZAdd {
            key: make_key(&[INTERVAL_ACTION_COLLECTION_INTERVAL_NAME, &action.interval_name]),
            score: action.modified,
            member: key,
        },
    ])
}

/// Symmetric removal list for an interval action
pub fn action_delete_commands(action: &IntervalAction) -> Vec<Command> {
    let key = action_stored_key(&action.id);
    vec![
        Command::Unlink { key: key.clone() },
        Command::ZRem {
            key: INTERVAL_ACTION_COLLECTION.into(),
            member: key.clone(),
        },
        Command::HDel {
            key: INTERVAL_ACTION_COLLECTION_NAME.into(),
            field: action.name.clone(),
        },
        Command::ZRem {
            key: make_key(&[INTERVAL_ACTION_COLLECTION_INTERVAL_NAME, &action.interval_name]),
            member: key,
        },
    ]
}

/// Check whether an interval exists by name
pub async fn interval_name_exists(conn: &mut MultiplexedConnection, name: &str) -> Result<bool> {
    query::object_name_exists(conn, INTERVAL_COLLECTION_NAME, name).await
}

async fn ensure_interval_unreferenced(
    conn: &mut MultiplexedConnection,
    name: &str,
) -> Result<()> {
    let dependents = query::member_count(
        conn,
        &make_key(&[INTERVAL_ACTION_COLLECTION_INTERVAL_NAME, name]),
    )
    .await?;
    if dependents > 0 {
        return Err(StoreError::StatusConflict(format!(
            "fail to delete or rename the interval '{}' when associated interval action exists",
            name
        )));
    }
    Ok(())
}

/// Add a new interval
pub async fn add_interval(
    conn: &mut MultiplexedConnection,
    mut interval: Interval,
) -> Result<Interval> {
    if query::object_id_exists(conn, &interval_stored_key(&interval.id)).await? {
        return Err(StoreError::DuplicateName(format!(
            "interval id {} already exists",
            interval.id
        )));
    }
    if interval_name_exists(conn, &interval.name).await? {
        return Err(StoreError::DuplicateName(format!(
            "interval name {} already exists",
            interval.name
        )));
    }

    let ts = make_timestamp();
    if interval.created == 0 {
        interval.created = ts;
    }
    interval.modified = ts;

    let commands = interval_add_commands(&interval)?;
    command::execute(conn, &commands, "interval creation").await?;
    Ok(interval)
}

/// Fetch an interval by id
pub async fn interval_by_id(conn: &mut MultiplexedConnection, id: &str) -> Result<Interval> {
    query::object_by_id(conn, &interval_stored_key(id)).await
}

/// Fetch an interval by name
pub async fn interval_by_name(conn: &mut MultiplexedConnection, name: &str) -> Result<Interval> {
    query::object_by_name(conn, INTERVAL_COLLECTION_NAME, name).await
}

/// All intervals, most recently modified first
pub async fn all_intervals(
    conn: &mut MultiplexedConnection,
    offset: usize,
    limit: i64,
) -> Result<Vec<Interval>> {
    let objects = query::objects_by_rev_range(conn, INTERVAL_COLLECTION, offset, limit).await?;
    decode_list(objects, "interval")
}

/// Update an interval; a rename is blocked while actions reference the old
/// name
pub async fn update_interval(
    conn: &mut MultiplexedConnection,
    mut interval: Interval,
) -> Result<()> {
    let old_interval = interval_by_id(conn, &interval.id).await?;

    if interval.name != old_interval.name {
        ensure_interval_unreferenced(conn, &old_interval.name).await?;
        if interval_name_exists(conn, &interval.name).await? {
            return Err(StoreError::DuplicateName(format!(
                "interval name {} already exists",
                interval.name
            )));
        }
    }

    interval.created = old_interval.created;
    interval.modified = make_timestamp();

    let mut commands = interval_delete_commands(&old_interval);
    commands.extend(interval_add_commands(&interval)?);
    command::execute(conn, &commands, "interval update").await
}

/// Delete an interval by name, blocked while actions reference it
pub async fn delete_interval_by_name(conn: &mut MultiplexedConnection, name: &str) -> Result<()> {
    let interval = interval_by_name(conn, name).await?;
    ensure_interval_unreferenced(conn, name).await?;
    let commands = interval_delete_commands(&interval);
    command::execute(conn, &commands, "interval deletion").await
}

/// Add a new interval action; its interval must exist
pub async fn add_interval_action(
    conn: &mut MultiplexedConnection,
    mut action: IntervalAction,
) -> Result<IntervalAction> {
    if !interval_name_exists(conn, &action.interval_name).await? {
        return Err(StoreError::EntityDoesNotExist(format!(
            "interval '{}' does not exist",
            action.interval_name
        )));
    }

    if query::object_id_exists(conn, &action_stored_key(&action.id)).await? {
        return Err(StoreError::DuplicateName(format!(
            "interval action id {} already exists",
            action.id
        )));
    }
    if query::object_name_exists(conn, INTERVAL_ACTION_COLLECTION_NAME, &action.name).await? {
        return Err(StoreError::DuplicateName(format!(
            "interval action name {} already exists",
            action.name
        )));
    }

    let ts = make_timestamp();
    if action.created == 0 {
        action.created = ts;
    }
    action.modified = ts;

    let commands = action_add_commands(&action)?;
    command::execute(conn, &commands, "interval action creation").await?;
    Ok(action)
}

/// Fetch an action by id
pub async fn interval_action_by_id(
    conn: &mut MultiplexedConnection,
    id: &str,
) -> Result<IntervalAction> {
    query::object_by_id(conn, &action_stored_key(id)).await
}

/// Fetch an action by name
pub async fn interval_action_by_name(
    conn: &mut MultiplexedConnection,
    name: &str,
) -> Result<IntervalAction> {
    query::object_by_name(conn, INTERVAL_ACTION_COLLECTION_NAME, name).await
}

/// All actions, most recently modified first
pub async fn all_interval_actions(
    conn: &mut MultiplexedConnection,
    offset: usize,
    limit: i64,
) -> Result<Vec<IntervalAction>> {
    let objects =
        query::objects_by_rev_range(conn, INTERVAL_ACTION_COLLECTION, offset, limit).await?;
    decode_list(objects, "interval action")
}

/// Actions referencing one interval
pub async fn interval_actions_by_interval_name(
    conn: &mut MultiplexedConnection,
    offset: usize,
    limit: i64,
    interval_name: &str,
) -> Result<Vec<IntervalAction>> {
    let objects = query::objects_by_rev_range(
        conn,
        &make_key(&[INTERVAL_ACTION_COLLECTION_INTERVAL_NAME, interval_name]),
        offset,
        limit,
    )
    .await?;
    decode_list(objects, "interval action")
}

/// Update an interval action; the referenced interval must exist
pub async fn update_interval_action(
    conn: &mut MultiplexedConnection,
    mut action: IntervalAction,
) -> Result<()> {
    if !interval_name_exists(conn, &action.interval_name).await? {
        return Err(StoreError::EntityDoesNotExist(format!(
            "interval '{}' does not exist",
            action.interval_name
        )));
    }

    let old_action = interval_action_by_name(conn, &action.name).await?;

    action.id = old_action.id.clone();
    action.created = old_action.created;
    action.modified = make_timestamp();

    let mut commands = action_delete_commands(&old_action);
    commands.extend(action_add_commands(&action)?);
    command::execute(conn, &commands, "interval action update").await
}

/// Delete an action by name
pub async fn delete_interval_action_by_name(
    conn: &mut MultiplexedConnection,
    name: &str,
) -> Result<()> {
    let action = interval_action_by_name(conn, name).await?;
    let commands = action_delete_commands(&action);
    command::execute(conn, &commands, "interval action deletion").await
}

impl Store {
    /// Add a new interval
    pub async fn add_interval(&self, mut interval: Interval) -> Result<Interval> {
        interval.id = ensure_id(&interval.id)?;
        let mut conn = self.conn().await?;
        add_interval(&mut conn, interval).await
    }

    /// Get an interval by id
    pub async fn interval_by_id(&self, id: &str) -> Result<Interval> {
        let mut conn = self.conn().await?;
        interval_by_id(&mut conn, id).await
    }

    /// Get an interval by name
    pub async fn interval_by_name(&self, name: &str) -> Result<Interval> {
        let mut conn = self.conn().await?;
        interval_by_name(&mut conn, name).await
    }

    /// Query intervals with offset and limit
    pub async fn all_intervals(&self, offset: usize, limit: i64) -> Result<Vec<Interval>> {
        let mut conn = self.conn().await?;
        all_intervals(&mut conn, offset, limit).await
    }

    /// Update an interval
    pub async fn update_interval(&self, interval: Interval) -> Result<()> {
        let mut conn = self.conn().await?;
        update_interval(&mut conn, interval).await
    }

    /// Delete an interval by name
    pub async fn delete_interval_by_name(&self, name: &str) -> Result<()> {
        let mut conn = self.conn().await?;
        delete_interval_by_name(&mut conn, name).await
    }

    /// Total interval count
    pub async fn interval_total_count(&self) -> Result<u32> {
        let mut conn = self.conn().await?;
        query::member_count(&mut conn, INTERVAL_COLLECTION).await
    }

    /// Add a new interval action
    pub async fn add_interval_action(&self, mut action: IntervalAction) -> Result<IntervalAction> {
        action.id = ensure_id(&action.id)?;
        let mut conn = self.conn().await?;
        add_interval_action(&mut conn, action).await
    }

    /// Get an interval action by id
    pub async fn interval_action_by_id(&self, id: &str) -> Result<IntervalAction> {
        let mut conn = self.conn().await?;
        interval_action_by_id(&mut conn, id).await
    }

    /// Get an interval action by name
    pub async fn interval_action_by_name(&self, name: &str) -> Result<IntervalAction> {
        let mut conn = self.conn().await?;
        interval_action_by_name(&mut conn, name).await
    }

    /// Query interval actions with offset and limit
    pub async fn all_interval_actions(
        &self,
        offset: usize,
        limit: i64,
    ) -> Result<Vec<IntervalAction>> {
        let mut conn = self.conn().await?;
        all_interval_actions(&mut conn, offset, limit).await
    }

    /// Query interval actions by interval name with offset and limit
    pub async fn interval_actions_by_interval_name(
        &self,
        offset: usize,
        limit: i64,
        interval_name: &str,
    ) -> Result<Vec<IntervalAction>> {
        let mut conn = self.conn().await?;
        interval_actions_by_interval_name(&mut conn, offset, limit, interval_name).await
    }

    /// Update an interval action
    pub async fn update_interval_action(&self, action: IntervalAction) -> Result<()> {
        let mut conn = self.conn().await?;
        update_interval_action(&mut conn, action).await
    }

    /// Delete an interval action by name
    pub async fn delete_interval_action_by_name(&self, name: &str) -> Result<()> {
        let mut conn = self.conn().await?;
        delete_interval_action_by_name(&mut conn, name).await
    }

    /// Total interval action count
    pub async fn interval_action_total_count(&self) -> Result<u32> {
        let mut conn = self.conn().await?;
        query::member_count(&mut conn, INTERVAL_ACTION_COLLECTION).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interval_command_symmetry() {
        let interval = Interval {
            id: "bbbbbbbb-0000-4000-8000-000000000001".into(),
            name: "midnight".into(),
            start: None,
            end: None,
            interval: "24h".into(),
            created: 1,
            modified: 2,
        };
        let adds = interval_add_commands(&interval).unwrap();
        let deletes = interval_delete_commands(&interval);
        assert_eq!(adds.len(), 3);
        assert_eq!(adds.len(), deletes.len());
    }

    #[test]
    fn test_action_commands_index_interval_name() {
        let action = IntervalAction {
            id: "bbbbbbbb-0000-4000-8000-000000000002".into(),
            name: "purge-events".into(),
            interval_name: "midnight".into(),
            address: serde_json::Value::Null,
            content: None,
            content_type: None,
            created: 1,
            modified: 2,
        };
        let adds = action_add_commands(&action).unwrap();
        assert!(adds.iter().any(|c| matches!(c, Command::ZAdd { key, .. }
            if key == "ss|ia:interval:name:midnight")));
        assert_eq!(adds.len(), action_delete_commands(&action).len());
    }
}
