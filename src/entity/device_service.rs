//! Device service persistence
//!
//! A service cannot be deleted while any device or provision watcher
//! references it.

use redis::aio::MultiplexedConnection;

use crate::command::{self, Command};
use crate::entity::{decode_list, device, provision_watcher};
use crate::error::{Result, StoreError};
use crate::keys::make_key;
use crate::model::{make_timestamp, DeviceService};
use crate::query;
use crate::store::{ensure_id, Store};

/// Primary ordered collection of device services
pub const DEVICE_SERVICE_COLLECTION: &str = "md|ds";
/// Name → stored key hash
pub const DEVICE_SERVICE_COLLECTION_NAME: &str = "md|ds:name";
/// Label index prefix
pub const DEVICE_SERVICE_COLLECTION_LABEL: &str = "md|ds:label";

fn stored_key(id: &str) -> String {
    make_key(&[DEVICE_SERVICE_COLLECTION, id])
}

/// Full command list for persisting a service and every index entry
pub fn add_commands(service: &DeviceService) -> Result<Vec<Command>> {
    let blob = serde_json::to_vec(service).map_err(|e| {
        StoreError::ContractInvalid(format!(
            "unable to JSON marshal device service for persistence: {}",
            e
        ))
    })?;
    let key = stored_key(&service.id);

    let mut commands = vec![
        Command::Set {
            key: key.clone(),
            value: blob,
        },
        Command::ZAdd {
            key: DEVICE_SERVICE_COLLECTION.into(),
            score: 0,
            member: key.clone(),
        },
        Command::HSet {
            key: DEVICE_SERVICE_COLLECTION_NAME.into(),
            field: service.name.clone(),
            value: key.clone(),
        },
    ];
    for label in &service.labels {
        commands.push(Command::ZAdd {
            key: make_key(&[DEVICE_SERVICE_COLLECTION_LABEL, label]),
            score: service.modified,
            member: key.clone(),
        });
    }
    Ok(commands)
}

/// Symmetric removal list for a service
pub fn delete_commands(service: &DeviceService) -> Vec<Command> {
    let key = stored_key(&service.id);
    let mut commands = vec![
        Command::Unlink { key: key.clone() },
        Command::ZRem {
            key: DEVICE_SERVICE_COLLECTION.into(),
            member: key.clone(),
        },
        Command::HDel {
            key: DEVICE_SERVICE_COLLECTION_NAME.into(),
            field: service.name.clone(),
        },
    ];
    for label in &service.labels {
        commands.push(Command::ZRem {
            key: make_key(&[DEVICE_SERVICE_COLLECTION_LABEL, label]),
            member: key.clone(),
        });
    }
    commands
}

/// Check whether a service exists by name
pub async fn service_name_exists(conn: &mut MultiplexedConnection, name: &str) -> Result<bool> {
    query::object_name_exists(conn, DEVICE_SERVICE_COLLECTION_NAME, name).await
}

/// Check whether a service exists by id
pub async fn service_id_exists(conn: &mut MultiplexedConnection, id: &str) -> Result<bool> {
    query::object_id_exists(conn, &stored_key(id)).await
}

/// Add a new device service
pub async fn add_device_service(
    conn: &mut MultiplexedConnection,
    mut service: DeviceService,
) -> Result<DeviceService> {
    if service_id_exists(conn, &service.id).await? {
        return Err(StoreError::DuplicateName(format!(
            "device service id {} already exists",
            service.id
        )));
    }
    if service_name_exists(conn, &service.name).await? {
        return Err(StoreError::DuplicateName(format!(
            "device service name {} already exists",
            service.name
        )));
    }

    let ts = make_timestamp();
    if service.created == 0 {
        service.created = ts;
    }
    service.modified = ts;

    let commands = add_commands(&service)?;
    command::execute(conn, &commands, "device service creation").await?;
    Ok(service)
}

/// Fetch a service by id
pub async fn service_by_id(conn: &mut MultiplexedConnection, id: &str) -> Result<DeviceService> {
    query::object_by_id(conn, &stored_key(id)).await
}

/// Fetch a service by name
pub async fn service_by_name(
    conn: &mut MultiplexedConnection,
    name: &str,
) -> Result<DeviceService> {
    query::object_by_name(conn, DEVICE_SERVICE_COLLECTION_NAME, name).await
}

/// Update an existing service
pub async fn update_device_service(
    conn: &mut MultiplexedConnection,
    mut service: DeviceService,
) -> Result<()> {
    let old_service = service_by_name(conn, &service.name).await?;

    service.id = old_service.id.clone();
    service.created = old_service.created;
    service.modified = make_timestamp();

    let mut commands = delete_commands(&old_service);
    commands.extend(add_commands(&service)?);
    command::execute(conn, &commands, "device service update").await
}

async fn ensure_no_dependents(conn: &mut MultiplexedConnection, name: &str) -> Result<()> {
    let devices = device::devices_by_service_name(conn, 0, 1, name).await?;
    if !devices.is_empty() {
        return Err(StoreError::StatusConflict(
            "fail to delete the device service when associated device exists".into(),
        ));
    }
    let watchers = provision_watcher::provision_watchers_by_service_name(conn, 0, 1, name).await?;
    if !watchers.is_empty() {
        return Err(StoreError::StatusConflict(
            "fail to delete the device service when associated provision watcher exists".into(),
        ));
    }
    Ok(())
}

/// Delete a service by id, blocked while dependents exist
pub async fn delete_device_service_by_id(conn: &mut MultiplexedConnection, id: &str) -> Result<()> {
    let service = service_by_id(conn, id).await?;
    ensure_no_dependents(conn, &service.name).await?;
    let commands = delete_commands(&service);
    command::execute(conn, &commands, "device service deletion").await
}

/// Delete a service by name, blocked while dependents exist
pub async fn delete_device_service_by_name(
    conn: &mut MultiplexedConnection,
    name: &str,
) -> Result<()> {
    let service = service_by_name(conn, name).await?;
    ensure_no_dependents(conn, name).await?;
    let commands = delete_commands(&service);
    command::execute(conn, &commands, "device service deletion").await
}

/// Query services filtered to those carrying every listed label
pub async fn services_by_labels(
    conn: &mut MultiplexedConnection,
    offset: usize,
    limit: i64,
    labels: &[String],
) -> Result<Vec<DeviceService>> {
    let objects =
        query::objects_by_labels_rev_range(conn, DEVICE_SERVICE_COLLECTION, labels, offset, limit)
            .await?;
    decode_list(objects, "device service")
}

impl Store {
    /// Add a new device service
    pub async fn add_device_service(&self, mut service: DeviceService) -> Result<DeviceService> {
        service.id = ensure_id(&service.id)?;
        let mut conn = self.conn().await?;
        add_device_service(&mut conn, service).await
    }

    /// Get a device service by id
    pub async fn device_service_by_id(&self, id: &str) -> Result<DeviceService> {
        let mut conn = self.conn().await?;
        service_by_id(&mut conn, id).await
    }

    /// Get a device service by name
    pub async fn device_service_by_name(&self, name: &str) -> Result<DeviceService> {
        let mut conn = self.conn().await?;
        service_by_name(&mut conn, name).await
    }

    /// Check service existence by name
    pub async fn device_service_name_exists(&self, name: &str) -> Result<bool> {
        let mut conn = self.conn().await?;
        service_name_exists(&mut conn, name).await
    }

    /// Update a device service
    pub async fn update_device_service(&self, service: DeviceService) -> Result<()> {
        let mut conn = self.conn().await?;
        update_device_service(&mut conn, service).await
    }

    /// Delete a device service by id
    pub async fn delete_device_service_by_id(&self, id: &str) -> Result<()> {
        let mut conn = self.conn().await?;
        delete_device_service_by_id(&mut conn, id).await
    }

    /// Delete a device service by name
    pub async fn delete_device_service_by_name(&self, name: &str) -> Result<()> {
        let mut conn = self.conn().await?;
        delete_device_service_by_name(&mut conn, name).await
    }

    /// Query device services with offset, limit, and labels
    pub async fn all_device_services(
        &self,
        offset: usize,
        limit: i64,
        labels: &[String],
    ) -> Result<Vec<DeviceService>> {
        let mut conn = self.conn().await?;
        services_by_labels(&mut conn, offset, limit, labels).await
    }

    /// Count device services carrying every listed label
    pub async fn device_service_count_by_labels(&self, labels: &[String]) -> Result<u32> {
        let mut conn = self.conn().await?;
        query::member_count_by_labels(&mut conn, DEVICE_SERVICE_COLLECTION, labels).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AdminState;

    #[test]
    fn test_command_lists_are_symmetric() {
        let service = DeviceService {
            id: "aaaaaaaa-0000-4000-8000-000000000020".into(),
            name: "device-virtual".into(),
            description: String::new(),
            labels: vec!["simulator".into()],
            base_address: "http://device-virtual:59900".into(),
            admin_state: AdminState::Unlocked,
            created: 1,
            modified: 2,
        };

        let adds = add_commands(&service).unwrap();
        let deletes = delete_commands(&service);
        assert_eq!(adds.len(), 4);
        assert_eq!(adds.len(), deletes.len());
        assert!(deletes.iter().any(|c| matches!(c, Command::HDel { field, .. }
            if field == "device-virtual")));
    }
}
