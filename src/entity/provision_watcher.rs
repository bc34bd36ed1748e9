//! Provision watcher persistence
//!
//! Watchers reference a profile and a service by name; both must exist at
//! write time.

use redis::aio::MultiplexedConnection;

use crate::command::{self, Command};
use crate::entity::{decode_list, device_profile, device_service};
use crate::error::{Result, StoreError};
use crate::keys::make_key;
use crate::model::{make_timestamp, ProvisionWatcher};
use crate::query;
use crate::store::{ensure_id, Store};

/// Primary ordered collection of provision watchers
pub const PROVISION_WATCHER_COLLECTION: &str = "md|pw";
/// Name → stored key hash
pub const PROVISION_WATCHER_COLLECTION_NAME: &str = "md|pw:name";
/// Label index prefix
pub const PROVISION_WATCHER_COLLECTION_LABEL: &str = "md|pw:label";
/// Service-name index prefix
pub const PROVISION_WATCHER_COLLECTION_SERVICE_NAME: &str = "md|pw:service:name";
/// Profile-name index prefix
pub const PROVISION_WATCHER_COLLECTION_PROFILE_NAME: &str = "md|pw:profile:name";

fn stored_key(id: &str) -> String {
    make_key(&[PROVISION_WATCHER_COLLECTION, id])
}

/// Full command list for persisting a watcher and every index entry
pub fn add_commands(watcher: &ProvisionWatcher) -> Result<Vec<Command>> {
    let blob = serde_json::to_vec(watcher).map_err(|e| {
        StoreError::ContractInvalid(format!(
            "unable to JSON marshal provision watcher for persistence: {}",
            e
        ))
    })?;
    let key = stored_key(&watcher.id);

    let mut commands = vec![
        Command::Set {
            key: key.clone(),
            value: blob,
        },
        Command::ZAdd {
            key: PROVISION_WATCHER_COLLECTION.into(),
            score: watcher.modified,
            member: key.clone(),
        },
        Command::HSet {
            key: PROVISION_WATCHER_COLLECTION_NAME.into(),
            field: watcher.name.clone(),
            value: key.clone(),
        },
        Command::ZAdd {
            key: make_key(&[PROVISION_WATCHER_COLLECTION_SERVICE_NAME, &watcher.service_name]),
            score: watcher.modified,
            member: key.clone(),
        },
        Command::ZAdd {
            key: make_key(&[PROVISION_WATCHER_COLLECTION_PROFILE_NAME, &watcher.profile_name]),
            score: watcher.modified,
            member: key.clone(),
        },
    ];
    for label in &watcher.labels {
        commands.push(Command::ZAdd {
            key: make_key(&[PROVISION_WATCHER_COLLECTION_LABEL, label]),
            score: watcher.modified,
            member: key.clone(),
        });
    }
    Ok(commands)
}

/// Symmetric removal list for a watcher
pub fn delete_commands(watcher: &ProvisionWatcher) -> Vec<Command> {
    let key = stored_key(&watcher.id);
    let mut commands = vec![
        Command::Unlink { key: key.clone() },
        Command::ZRem {
            key: PROVISION_WATCHER_COLLECTION.into(),
            member: key.clone(),
        },
        Command::HDel {
            key: PROVISION_WATCHER_COLLECTION_NAME.into(),
            field: watcher.name.clone(),
        },
        Command::ZRem {
            key: make_key(&[PROVISION_WATCHER_COLLECTION_SERVICE_NAME, &watcher.service_name]),
            member: key.clone(),
        },
        Command::ZRem {
            key: make_key(&[PROVISION_WATCHER_COLLECTION_PROFILE_NAME, &watcher.profile_name]),
            member: key.clone(),
        },
    ];
    for label in &watcher.labels {
        commands.push(Command::ZRem {
            key: make_key(&[PROVISION_WATCHER_COLLECTION_LABEL, label]),
            member: key.clone(),
        });
    }
    commands
}

async fn check_references(
    conn: &mut MultiplexedConnection,
    watcher: &ProvisionWatcher,
) -> Result<()> {
    if !device_profile::profile_name_exists(conn, &watcher.profile_name).await? {
        return Err(StoreError::EntityDoesNotExist(format!(
            "device profile '{}' does not exist",
            watcher.profile_name
        )));
    }
    if !device_service::service_name_exists(conn, &watcher.service_name).await? {
        return Err(StoreError::EntityDoesNotExist(format!(
            "device service '{}' does not exist",
            watcher.service_name
        )));
    }
    Ok(())
}

/// Add a new provision watcher
pub async fn add_provision_watcher(
    conn: &mut MultiplexedConnection,
    mut watcher: ProvisionWatcher,
) -> Result<ProvisionWatcher> {
    check_references(conn, &watcher).await?;

    if query::object_id_exists(conn, &stored_key(&watcher.id)).await? {
        return Err(StoreError::DuplicateName(format!(
            "provision watcher id {} already exists",
            watcher.id
        )));
    }
    if query::object_name_exists(conn, PROVISION_WATCHER_COLLECTION_NAME, &watcher.name).await? {
        return Err(StoreError::DuplicateName(format!(
            "provision watcher name {} already exists",
            watcher.name
        )));
    }

    let ts = make_timestamp();
    if watcher.created == 0 {
        watcher.created = ts;
    }
    watcher.modified = ts;

    let commands = add_commands(&watcher)?;
    command::execute(conn, &commands, "provision watcher creation").await?;
    Ok(watcher)
}

/// Fetch a watcher by id
pub async fn provision_watcher_by_id(
    conn: &mut MultiplexedConnection,
    id: &str,
) -> Result<ProvisionWatcher> {
    query::object_by_id(conn, &stored_key(id)).await
}

/// Fetch a watcher by name
pub async fn provision_watcher_by_name(
    conn: &mut MultiplexedConnection,
    name: &str,
) -> Result<ProvisionWatcher> {
    query::object_by_name(conn, PROVISION_WATCHER_COLLECTION_NAME, name).await
}

/// Update an existing watcher
pub async fn update_provision_watcher(
    conn: &mut MultiplexedConnection,
    mut watcher: ProvisionWatcher,
) -> Result<()> {
    check_references(conn, &watcher).await?;

    let old_watcher = provision_watcher_by_name(conn, &watcher.name).await?;

    watcher.id = old_watcher.id.clone();
    watcher.created = old_watcher.created;
    watcher.modified = make_timestamp();

    let mut commands = delete_commands(&old_watcher);
    commands.extend(add_commands(&watcher)?);
    command::execute(conn, &commands, "provision watcher update").await
}

/// Delete a watcher by name
pub async fn delete_provision_watcher_by_name(
    conn: &mut MultiplexedConnection,
    name: &str,
) -> Result<()> {
    let watcher = provision_watcher_by_name(conn, name).await?;
    let commands = delete_commands(&watcher);
    command::execute(conn, &commands, "provision watcher deletion").await
}

/// Query watchers by service name, most recently modified first
pub async fn provision_watchers_by_service_name(
    conn: &mut MultiplexedConnection,
    offset: usize,
    limit: i64,
    name: &str,
) -> Result<Vec<ProvisionWatcher>> {
    let objects = query::objects_by_rev_range(
        conn,
        &make_key(&[PROVISION_WATCHER_COLLECTION_SERVICE_NAME, name]),
        offset,
        limit,
    )
    .await?;
    decode_list(objects, "provision watcher")
}

/// Query watchers by profile name, most recently modified first
pub async fn provision_watchers_by_profile_name(
    conn: &mut MultiplexedConnection,
    offset: usize,
    limit: i64,
    name: &str,
) -> Result<Vec<ProvisionWatcher>> {
    let objects = query::objects_by_rev_range(
        conn,
        &make_key(&[PROVISION_WATCHER_COLLECTION_PROFILE_NAME, name]),
        offset,
        limit,
    )
    .await?;
    decode_list(objects, "provision watcher")
}

/// Query watchers filtered to those carrying every listed label
pub async fn provision_watchers_by_labels(
    conn: &mut MultiplexedConnection,
    offset: usize,
    limit: i64,
    labels: &[String],
) -> Result<Vec<ProvisionWatcher>> {
    let objects = query::objects_by_labels_rev_range(
        conn,
        PROVISION_WATCHER_COLLECTION,
        labels,
        offset,
        limit,
    )
    .await?;
    decode_list(objects, "provision watcher")
}

impl Store {
    /// Add a new provision watcher
    pub async fn add_provision_watcher(
        &self,
        mut watcher: ProvisionWatcher,
    ) -> Result<ProvisionWatcher> {
        watcher.id = ensure_id(&watcher.id)?;
        let mut conn = self.conn().await?;
        add_provision_watcher(&mut conn, watcher).await
    }

    /// Get a provision watcher by id
    pub async fn provision_watcher_by_id(&self, id: &str) -> Result<ProvisionWatcher> {
        let mut conn = self.conn().await?;
        provision_watcher_by_id(&mut conn, id).await
    }

    /// Get a provision watcher by name
    pub async fn provision_watcher_by_name(&self, name: &str) -> Result<ProvisionWatcher> {
        let mut conn = self.conn().await?;
        provision_watcher_by_name(&mut conn, name).await
    }

    /// Update a provision watcher
    pub async fn update_provision_watcher(&self, watcher: ProvisionWatcher) -> Result<()> {
        let mut conn = self.conn().await?;
        update_provision_watcher(&mut conn, watcher).await
    }

    /// Delete a provision watcher by name
    pub async fn delete_provision_watcher_by_name(&self, name: &str) -> Result<()> {
        let mut conn = self.conn().await?;
        delete_provision_watcher_by_name(&mut conn, name).await
    }

    /// Query provision watchers with offset, limit, and labels
    pub async fn all_provision_watchers(
        &self,
        offset: usize,
        limit: i64,
        labels: &[String],
    ) -> Result<Vec<ProvisionWatcher>> {
        let mut conn = self.conn().await?;
        provision_watchers_by_labels(&mut conn, offset, limit, labels).await
    }

    /// Query provision watchers by service name with offset and limit
    pub async fn provision_watchers_by_service_name(
        &self,
        offset: usize,
        limit: i64,
        name: &str,
    ) -> Result<Vec<ProvisionWatcher>> {
        let mut conn = self.conn().await?;
        provision_watchers_by_service_name(&mut conn, offset, limit, name).await
    }

    /// Query provision watchers by profile name with offset and limit
    pub async fn provision_watchers_by_profile_name(
        &self,
        offset: usize,
        limit: i64,
        name: &str,
    ) -> Result<Vec<ProvisionWatcher>> {
        let mut conn = self.conn().await?;
        provision_watchers_by_profile_name(&mut conn, offset, limit, name).await
    }

    /// Count provision watchers carrying every listed label
    pub async fn provision_watcher_count_by_labels(&self, labels: &[String]) -> Result<u32> {
        let mut conn = self.conn().await?;
        query::member_count_by_labels(&mut conn, PROVISION_WATCHER_COLLECTION, labels).await
    }

    /// Count provision watchers owned by the specified service
    pub async fn provision_watcher_count_by_service_name(&self, name: &str) -> Result<u32> {
        let mut conn = self.conn().await?;
        query::member_count(
            &mut conn,
            &make_key(&[PROVISION_WATCHER_COLLECTION_SERVICE_NAME, name]),
        )
        .await
    }

    /// Count provision watchers assigning the specified profile
    pub async fn provision_watcher_count_by_profile_name(&self, name: &str) -> Result<u32> {
        let mut conn = self.conn().await?;
        query::member_count(
            &mut conn,
            &make_key(&[PROVISION_WATCHER_COLLECTION_PROFILE_NAME, name]),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AdminState;
    use std::collections::HashMap;

    #[test]
    fn test_watcher_command_symmetry() {
        let watcher = ProvisionWatcher {
            id: "aaaaaaaa-0000-4000-8000-000000000030".into(),
            name: "onboard-cameras".into(),
            labels: vec!["camera".into(), "edge".into()],
            identifiers: HashMap::new(),
            profile_name: "camera".into(),
            service_name: "device-onvif".into(),
            admin_state: AdminState::Unlocked,
            created: 1,
            modified: 2,
        };

        let adds = add_commands(&watcher).unwrap();
        let deletes = delete_commands(&watcher);
        assert_eq!(adds.len(), 7);
        assert_eq!(adds.len(), deletes.len());
        assert!(adds.iter().any(|c| matches!(c, Command::ZAdd { key, .. }
            if key == "md|pw:profile:name:camera")));
        assert!(adds.iter().any(|c| matches!(c, Command::ZAdd { key, .. }
            if key == "md|pw:service:name:device-onvif")));
    }
}
