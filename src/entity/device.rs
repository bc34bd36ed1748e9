//! Device persistence
//!
//! Index layout:
//!
//! ```text
//! md|dv                      → ZSET of all device stored keys (score 0)
//! md|dv:<id>                 → JSON blob
//! md|dv:name                 → HASH name → stored key
//! md|dv:label:<label>        → ZSET scored by modified
//! md|dv:service:name:<name>  → ZSET scored by modified
//! md|dv:profile:name:<name>  → ZSET scored by modified
//! ```

use redis::aio::MultiplexedConnection;

use crate::command::{self, Command};
use crate::entity::{decode_list, device_profile, device_service};
use crate::error::{Result, StoreError};
use crate::keys::make_key;
use crate::model::{make_timestamp, Device};
use crate::query;
use crate::store::{ensure_id, Store};

/// Primary ordered collection of devices
pub const DEVICE_COLLECTION: &str = "md|dv";
/// Name → stored key hash
pub const DEVICE_COLLECTION_NAME: &str = "md|dv:name";
/// Service-name index prefix
pub const DEVICE_COLLECTION_SERVICE_NAME: &str = "md|dv:service:name";
/// Profile-name index prefix
pub const DEVICE_COLLECTION_PROFILE_NAME: &str = "md|dv:profile:name";
/// Label index prefix
pub const DEVICE_COLLECTION_LABEL: &str = "md|dv:label";

fn stored_key(id: &str) -> String {
    make_key(&[DEVICE_COLLECTION, id])
}

/// Full command list for persisting a device and every index entry
pub fn add_commands(device: &Device) -> Result<Vec<Command>> {
    let blob = serde_json::to_vec(device).map_err(|e| {
        StoreError::ContractInvalid(format!("unable to JSON marshal device for persistence: {}", e))
    })?;
    let key = stored_key(&device.id);

    let mut commands = vec![
        Command::Set {
            key: key.clone(),
            value: blob,
        },
        Command::ZAdd {
            key: DEVICE_COLLECTION.into(),
            score: 0,
            member: key.clone(),
        },
        Command::HSet {
            key: DEVICE_COLLECTION_NAME.into(),
            field: device.name.clone(),
            value: key.clone(),
        },
        Command::ZAdd {
            key: make_key(&[DEVICE_COLLECTION_SERVICE_NAME, &device.service_name]),
            score: device.modified,
            member: key.clone(),
        },
        Command::ZAdd {
            key: make_key(&[DEVICE_COLLECTION_PROFILE_NAME, &device.profile_name]),
            score: device.modified,
            member: key.clone(),
        },
    ];
    for label in &device.labels {
        commands.push(Command::ZAdd {
            key: make_key(&[DEVICE_COLLECTION_LABEL, label]),
            score: device.modified,
            member: key.clone(),
        });
    }
    Ok(commands)
}

/// Symmetric removal list for a device
pub fn delete_commands(device: &Device) -> Vec<Command> {
    let key = stored_key(&device.id);
    let mut commands = vec![
        Command::Unlink { key: key.clone() },
        Command::ZRem {
            key: DEVICE_COLLECTION.into(),
            member: key.clone(),
        },
        Command::HDel {
            key: DEVICE_COLLECTION_NAME.into(),
            field: device.name.clone(),
        },
        Command::ZRem {
            key: make_key(&[DEVICE_COLLECTION_SERVICE_NAME, &device.service_name]),
            member: key.clone(),
        },
        Command::ZRem {
            key: make_key(&[DEVICE_COLLECTION_PROFILE_NAME, &device.profile_name]),
            member: key.clone(),
        },
    ];
    for label in &device.labels {
        commands.push(Command::ZRem {
            key: make_key(&[DEVICE_COLLECTION_LABEL, label]),
            member: key.clone(),
        });
    }
    commands
}

/// Check whether a device exists by name
pub async fn device_name_exists(conn: &mut MultiplexedConnection, name: &str) -> Result<bool> {
    query::object_name_exists(conn, DEVICE_COLLECTION_NAME, name).await
}

/// Check whether a device exists by id
pub async fn device_id_exists(conn: &mut MultiplexedConnection, id: &str) -> Result<bool> {
    query::object_id_exists(conn, &stored_key(id)).await
}

async fn check_references(conn: &mut MultiplexedConnection, device: &Device) -> Result<()> {
    if !device_profile::profile_name_exists(conn, &device.profile_name).await? {
        return Err(StoreError::EntityDoesNotExist(format!(
            "device profile '{}' does not exist",
            device.profile_name
        )));
    }
    if !device_service::service_name_exists(conn, &device.service_name).await? {
        return Err(StoreError::EntityDoesNotExist(format!(
            "device service '{}' does not exist",
            device.service_name
        )));
    }
    Ok(())
}

/// Add a new device, enforcing referential and uniqueness checks first
pub async fn add_device(conn: &mut MultiplexedConnection, mut device: Device) -> Result<Device> {
    check_references(conn, &device).await?;

    if device_id_exists(conn, &device.id).await? {
        return Err(StoreError::DuplicateName(format!(
            "device id {} already exists",
            device.id
        )));
    }
    if device_name_exists(conn, &device.name).await? {
        return Err(StoreError::DuplicateName(format!(
            "device name {} already exists",
            device.name
        )));
    }

    let ts = make_timestamp();
    if device.created == 0 {
        device.created = ts;
    }
    device.modified = ts;

    let commands = add_commands(&device)?;
    command::execute(conn, &commands, "device creation").await?;

    Ok(device)
}

/// Fetch a device by id
pub async fn device_by_id(conn: &mut MultiplexedConnection, id: &str) -> Result<Device> {
    query::object_by_id(conn, &stored_key(id)).await
}

/// Fetch a device by name
pub async fn device_by_name(conn: &mut MultiplexedConnection, name: &str) -> Result<Device> {
    query::object_by_name(conn, DEVICE_COLLECTION_NAME, name).await
}

async fn delete_device(conn: &mut MultiplexedConnection, device: &Device) -> Result<()> {
    let commands = delete_commands(device);
    command::execute(conn, &commands, "device deletion").await
}

/// Delete a device by id
pub async fn delete_device_by_id(conn: &mut MultiplexedConnection, id: &str) -> Result<()> {
    let device = device_by_id(conn, id).await?;
    delete_device(conn, &device).await
}

/// Delete a device by name
pub async fn delete_device_by_name(conn: &mut MultiplexedConnection, name: &str) -> Result<()> {
    let device = device_by_name(conn, name).await?;
    delete_device(conn, &device).await
}

/// Update an existing device: delete old index state, write new state, one batch
pub async fn update_device(conn: &mut MultiplexedConnection, mut device: Device) -> Result<()> {
    check_references(conn, &device).await?;

    let old_device = device_by_name(conn, &device.name).await?;

    device.modified = make_timestamp();

    let mut commands = delete_commands(&old_device);
    commands.extend(add_commands(&device)?);
    command::execute(conn, &commands, "device update").await
}

/// Query devices by service name, most recently modified first
pub async fn devices_by_service_name(
    conn: &mut MultiplexedConnection,
    offset: usize,
    limit: i64,
    name: &str,
) -> Result<Vec<Device>> {
    let objects = query::objects_by_rev_range(
        conn,
        &make_key(&[DEVICE_COLLECTION_SERVICE_NAME, name]),
        offset,
        limit,
    )
    .await?;
    decode_list(objects, "device")
}

/// Query devices by profile name, most recently modified first
pub async fn devices_by_profile_name(
    conn: &mut MultiplexedConnection,
    offset: usize,
    limit: i64,
    profile_name: &str,
) -> Result<Vec<Device>> {
    let objects = query::objects_by_rev_range(
        conn,
        &make_key(&[DEVICE_COLLECTION_PROFILE_NAME, profile_name]),
        offset,
        limit,
    )
    .await?;
    decode_list(objects, "device")
}

/// Query devices filtered to those carrying every listed label
pub async fn devices_by_labels(
    conn: &mut MultiplexedConnection,
    offset: usize,
    limit: i64,
    labels: &[String],
) -> Result<Vec<Device>> {
    let objects =
        query::objects_by_labels_rev_range(conn, DEVICE_COLLECTION, labels, offset, limit).await?;
    decode_list(objects, "device")
}

impl Store {
    /// Add a new device
    pub async fn add_device(&self, mut device: Device) -> Result<Device> {
        device.id = ensure_id(&device.id)?;
        let mut conn = self.conn().await?;
        add_device(&mut conn, device).await
    }

    /// Get a device by id
    pub async fn device_by_id(&self, id: &str) -> Result<Device> {
        let mut conn = self.conn().await?;
        device_by_id(&mut conn, id).await
    }

    /// Get a device by name
    pub async fn device_by_name(&self, name: &str) -> Result<Device> {
        let mut conn = self.conn().await?;
        device_by_name(&mut conn, name).await
    }

    /// Check device existence by id
    pub async fn device_id_exists(&self, id: &str) -> Result<bool> {
        let mut conn = self.conn().await?;
        device_id_exists(&mut conn, id).await
    }

    /// Check device existence by name
    pub async fn device_name_exists(&self, name: &str) -> Result<bool> {
        let mut conn = self.conn().await?;
        device_name_exists(&mut conn, name).await
    }

    /// Update a device
    pub async fn update_device(&self, device: Device) -> Result<()> {
        let mut conn = self.conn().await?;
        update_device(&mut conn, device).await
    }

    /// Delete a device by id
    pub async fn delete_device_by_id(&self, id: &str) -> Result<()> {
        let mut conn = self.conn().await?;
        delete_device_by_id(&mut conn, id).await
    }

    /// Delete a device by name
    pub async fn delete_device_by_name(&self, name: &str) -> Result<()> {
        let mut conn = self.conn().await?;
        delete_device_by_name(&mut conn, name).await
    }

    /// Query devices with offset, limit, and labels
    pub async fn all_devices(
        &self,
        offset: usize,
        limit: i64,
        labels: &[String],
    ) -> Result<Vec<Device>> {
        let mut conn = self.conn().await?;
        devices_by_labels(&mut conn, offset, limit, labels).await
    }

    /// Query devices by service name with offset and limit
    pub async fn devices_by_service_name(
        &self,
        offset: usize,
        limit: i64,
        name: &str,
    ) -> Result<Vec<Device>> {
        let mut conn = self.conn().await?;
        devices_by_service_name(&mut conn, offset, limit, name).await
    }

    /// Query devices by profile name with offset and limit
    pub async fn devices_by_profile_name(
        &self,
        offset: usize,
        limit: i64,
        profile_name: &str,
    ) -> Result<Vec<Device>> {
        let mut conn = self.conn().await?;
        devices_by_profile_name(&mut conn, offset, limit, profile_name).await
    }

    /// Count devices carrying every listed label (all devices when empty)
    pub async fn device_count_by_labels(&self, labels: &[String]) -> Result<u32> {
        let mut conn = self.conn().await?;
        query::member_count_by_labels(&mut conn, DEVICE_COLLECTION, labels).await
    }

    /// Count devices associated with the specified profile
    pub async fn device_count_by_profile_name(&self, profile_name: &str) -> Result<u32> {
        let mut conn = self.conn().await?;
        query::member_count(
            &mut conn,
            &make_key(&[DEVICE_COLLECTION_PROFILE_NAME, profile_name]),
        )
        .await
    }

    /// Count devices associated with the specified service
    pub async fn device_count_by_service_name(&self, service_name: &str) -> Result<u32> {
        let mut conn = self.conn().await?;
        query::member_count(
            &mut conn,
            &make_key(&[DEVICE_COLLECTION_SERVICE_NAME, service_name]),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AdminState, OperatingState};
    use std::collections::HashMap;

    fn sample_device() -> Device {
        Device {
            id: "aaaaaaaa-0000-4000-8000-000000000001".into(),
            name: "thermostat-01".into(),
            description: String::new(),
            admin_state: AdminState::Unlocked,
            operating_state: OperatingState::Up,
            labels: vec!["outdoor".into(), "hvac".into()],
            service_name: "device-virtual".into(),
            profile_name: "thermostat".into(),
            protocols: HashMap::new(),
            created: 100,
            modified: 200,
        }
    }

    #[test]
    fn test_add_commands_cover_every_index() {
        let device = sample_device();
        let commands = add_commands(&device).unwrap();

        // blob + primary + name hash + service + profile + 2 labels
        assert_eq!(commands.len(), 7);
        assert!(matches!(&commands[0], Command::Set { key, .. }
            if key == "md|dv:aaaaaaaa-0000-4000-8000-000000000001"));
        assert!(commands.iter().any(|c| matches!(c, Command::HSet { key, field, .. }
            if key == DEVICE_COLLECTION_NAME && field == "thermostat-01")));
        assert!(commands.iter().any(|c| matches!(c, Command::ZAdd { key, score, .. }
            if key == "md|dv:label:outdoor" && *score == 200)));
        assert!(commands.iter().any(|c| matches!(c, Command::ZAdd { key, .. }
            if key == "md|dv:profile:name:thermostat")));
        assert!(commands.iter().any(|c| matches!(c, Command::ZAdd { key, .. }
            if key == "md|dv:service:name:device-virtual")));
    }

    #[test]
    fn test_delete_commands_mirror_add_commands() {
        let device = sample_device();
        let adds = add_commands(&device).unwrap();
        let deletes = delete_commands(&device);
        assert_eq!(adds.len(), deletes.len());

        // Every ZADD has a matching ZREM on the same key
        for add in &adds {
            if let Command::ZAdd { key, member, .. } = add {
                assert!(deletes.iter().any(|d| matches!(d, Command::ZRem { key: dk, member: dm }
                    if dk == key && dm == member)));
            }
        }
        assert!(deletes.iter().any(|d| matches!(d, Command::HDel { key, field }
            if key == DEVICE_COLLECTION_NAME && field == "thermostat-01")));
    }
}
