//! Device profile persistence
//!
//! A profile cannot be deleted while any device or provision watcher
//! references it.

use redis::aio::MultiplexedConnection;

use crate::command::{self, Command};
use crate::entity::{decode_list, device, provision_watcher};
use crate::error::{Result, StoreError};
use crate::keys::make_key;
use crate::model::{make_timestamp, DeviceProfile};
use crate::query;
use crate::store::{ensure_id, Store};

/// Primary ordered collection of device profiles
pub const DEVICE_PROFILE_COLLECTION: &str = "md|dp";
/// Name → stored key hash
pub const DEVICE_PROFILE_COLLECTION_NAME: &str = "md|dp:name";
/// Label index prefix
pub const DEVICE_PROFILE_COLLECTION_LABEL: &str = "md|dp:label";
/// Model index prefix
pub const DEVICE_PROFILE_COLLECTION_MODEL: &str = "md|dp:model";
/// Manufacturer index prefix
pub const DEVICE_PROFILE_COLLECTION_MANUFACTURER: &str = "md|dp:manufacturer";

fn stored_key(id: &str) -> String {
    make_key(&[DEVICE_PROFILE_COLLECTION, id])
}

/// Full command list for persisting a profile and every index entry
pub fn add_commands(profile: &DeviceProfile) -> Result<Vec<Command>> {
    let blob = serde_json::to_vec(profile).map_err(|e| {
        StoreError::ContractInvalid(format!(
            "unable to JSON marshal device profile for persistence: {}",
            e
        ))
    })?;
    let key = stored_key(&profile.id);

    let mut commands = vec![
        Command::Set {
            key: key.clone(),
            value: blob,
        },
        Command::ZAdd {
            key: DEVICE_PROFILE_COLLECTION.into(),
            score: 0,
            member: key.clone(),
        },
        Command::HSet {
            key: DEVICE_PROFILE_COLLECTION_NAME.into(),
            field: profile.name.clone(),
            value: key.clone(),
        },
        Command::ZAdd {
            key: make_key(&[DEVICE_PROFILE_COLLECTION_MANUFACTURER, &profile.manufacturer]),
            score: profile.modified,
            member: key.clone(),
        },
        Command::ZAdd {
            key: make_key(&[DEVICE_PROFILE_COLLECTION_MODEL, &profile.model]),
            score: profile.modified,
            member: key.clone(),
        },
    ];
    for label in &profile.labels {
        commands.push(Command::ZAdd {
            key: make_key(&[DEVICE_PROFILE_COLLECTION_LABEL, label]),
            score: profile.modified,
            member: key.clone(),
        });
    }
    Ok(commands)
}

/// Symmetric removal list for a profile
pub fn delete_commands(profile: &DeviceProfile) -> Vec<Command> {
    let key = stored_key(&profile.id);
    let mut commands = vec![
        Command::Unlink { key: key.clone() },
        Command::ZRem {
            key: DEVICE_PROFILE_COLLECTION.into(),
            member: key.clone(),
        },
        Command::HDel {
            key: DEVICE_PROFILE_COLLECTION_NAME.into(),
            field: profile.name.clone(),
        },
        Command::ZRem {
            key: make_key(&[DEVICE_PROFILE_COLLECTION_MANUFACTURER, &profile.manufacturer]),
            member: key.clone(),
        },
        Command::ZRem {
            key: make_key(&[DEVICE_PROFILE_COLLECTION_MODEL, &profile.model]),
            member: key.clone(),
        },
    ];
    for label in &profile.labels {
        commands.push(Command::ZRem {
            key: make_key(&[DEVICE_PROFILE_COLLECTION_LABEL, label]),
            member: key.clone(),
        });
    }
    commands
}

/// Check whether a profile exists by name
pub async fn profile_name_exists(conn: &mut MultiplexedConnection, name: &str) -> Result<bool> {
    query::object_name_exists(conn, DEVICE_PROFILE_COLLECTION_NAME, name).await
}

/// Check whether a profile exists by id
pub async fn profile_id_exists(conn: &mut MultiplexedConnection, id: &str) -> Result<bool> {
    query::object_id_exists(conn, &stored_key(id)).await
}

/// Add a new device profile
pub async fn add_device_profile(
    conn: &mut MultiplexedConnection,
    mut profile: DeviceProfile,
) -> Result<DeviceProfile> {
    if profile_id_exists(conn, &profile.id).await? {
        return Err(StoreError::DuplicateName(format!(
            "device profile id {} already exists",
            profile.id
        )));
    }
    if profile_name_exists(conn, &profile.name).await? {
        return Err(StoreError::DuplicateName(format!(
            "device profile name {} already exists",
            profile.name
        )));
    }

    let ts = make_timestamp();
    if profile.created == 0 {
        profile.created = ts;
    }
    profile.modified = ts;

    let commands = add_commands(&profile)?;
    command::execute(conn, &commands, "device profile creation").await?;
    Ok(profile)
}

/// Fetch a profile by id
pub async fn profile_by_id(conn: &mut MultiplexedConnection, id: &str) -> Result<DeviceProfile> {
    query::object_by_id(conn, &stored_key(id)).await
}

/// Fetch a profile by name
pub async fn profile_by_name(
    conn: &mut MultiplexedConnection,
    name: &str,
) -> Result<DeviceProfile> {
    query::object_by_name(conn, DEVICE_PROFILE_COLLECTION_NAME, name).await
}

/// Update an existing profile; the profile name is the update key and
/// cannot change through this path
pub async fn update_device_profile(
    conn: &mut MultiplexedConnection,
    mut profile: DeviceProfile,
) -> Result<()> {
    let old_profile = match profile_by_id(conn, &profile.id).await {
        Ok(old) => {
            if profile.name != old.name {
                return Err(StoreError::ContractInvalid(format!(
                    "device profile name '{}' does not match the existing '{}'",
                    profile.name, old.name
                )));
            }
            old
        }
        Err(StoreError::NotFound(_)) => profile_by_name(conn, &profile.name).await?,
        Err(e) => return Err(e),
    };

    profile.id = old_profile.id.clone();
    profile.created = old_profile.created;
    profile.modified = make_timestamp();

    let mut commands = delete_commands(&old_profile);
    commands.extend(add_commands(&profile)?);
    command::execute(conn, &commands, "device profile update").await
}

async fn ensure_no_dependents(conn: &mut MultiplexedConnection, name: &str) -> Result<()> {
    let devices = device::devices_by_profile_name(conn, 0, 1, name).await?;
    if !devices.is_empty() {
        return Err(StoreError::StatusConflict(
            "fail to delete the device profile when associated device exists".into(),
        ));
    }
    let watchers = provision_watcher::provision_watchers_by_profile_name(conn, 0, 1, name).await?;
    if !watchers.is_empty() {
        return Err(StoreError::StatusConflict(
            "fail to delete the device profile when associated provision watcher exists".into(),
        ));
    }
    Ok(())
}

/// Delete a profile by id, blocked while dependents exist
pub async fn delete_device_profile_by_id(conn: &mut MultiplexedConnection, id: &str) -> Result<()> {
    let profile = profile_by_id(conn, id).await?;
    ensure_no_dependents(conn, &profile.name).await?;
    let commands = delete_commands(&profile);
    command::execute(conn, &commands, "device profile deletion").await
}

/// Delete a profile by name, blocked while dependents exist
pub async fn delete_device_profile_by_name(
    conn: &mut MultiplexedConnection,
    name: &str,
) -> Result<()> {
    let profile = profile_by_name(conn, name).await?;
    ensure_no_dependents(conn, name).await?;
    let commands = delete_commands(&profile);
    command::execute(conn, &commands, "device profile deletion").await
}

/// Query profiles filtered to those carrying every listed label
pub async fn profiles_by_labels(
    conn: &mut MultiplexedConnection,
    offset: usize,
    limit: i64,
    labels: &[String],
) -> Result<Vec<DeviceProfile>> {
    let objects =
        query::objects_by_labels_rev_range(conn, DEVICE_PROFILE_COLLECTION, labels, offset, limit)
            .await?;
    decode_list(objects, "device profile")
}

/// Query profiles by model, most recently modified first
pub async fn profiles_by_model(
    conn: &mut MultiplexedConnection,
    offset: usize,
    limit: i64,
    model: &str,
) -> Result<Vec<DeviceProfile>> {
    let objects = query::objects_by_rev_range(
        conn,
        &make_key(&[DEVICE_PROFILE_COLLECTION_MODEL, model]),
        offset,
        limit,
    )
    .await?;
    decode_list(objects, "device profile")
}

/// Query profiles by manufacturer, most recently modified first
pub async fn profiles_by_manufacturer(
    conn: &mut MultiplexedConnection,
    offset: usize,
    limit: i64,
    manufacturer: &str,
) -> Result<Vec<DeviceProfile>> {
    let objects = query::objects_by_rev_range(
        conn,
        &make_key(&[DEVICE_PROFILE_COLLECTION_MANUFACTURER, manufacturer]),
        offset,
        limit,
    )
    .await?;
    decode_list(objects, "device profile")
}

/// Query profiles matching both manufacturer and model, plus the total
/// match count before offset/limit apply
pub async fn profiles_by_manufacturer_and_model(
    conn: &mut MultiplexedConnection,
    offset: usize,
    limit: i64,
    manufacturer: &str,
    model: &str,
) -> Result<(Vec<DeviceProfile>, u32)> {
    if limit == 0 {
        return Ok((Vec::new(), 0));
    }

    let by_manufacturer: Vec<String> = query::ids_by_range_all(
        conn,
        &make_key(&[DEVICE_PROFILE_COLLECTION_MANUFACTURER, manufacturer]),
    )
    .await?;
    let by_model: Vec<String> =
        query::ids_by_range_all(conn, &make_key(&[DEVICE_PROFILE_COLLECTION_MODEL, model])).await?;

    let common = query::find_common_ids(vec![by_manufacturer, by_model]);
    let total = common.len() as u32;
    let windowed = query::slice_window(common, offset, limit)?;
    let objects = query::objects_by_ids(conn, &windowed).await?;
    Ok((decode_list(objects, "device profile")?, total))
}

impl Store {
    /// Add a new device profile
    pub async fn add_device_profile(&self, mut profile: DeviceProfile) -> Result<DeviceProfile> {
        profile.id = ensure_id(&profile.id)?;
        let mut conn = self.conn().await?;
        add_device_profile(&mut conn, profile).await
    }

    /// Get a device profile by id
    pub async fn device_profile_by_id(&self, id: &str) -> Result<DeviceProfile> {
        let mut conn = self.conn().await?;
        profile_by_id(&mut conn, id).await
    }

    /// Get a device profile by name
    pub async fn device_profile_by_name(&self, name: &str) -> Result<DeviceProfile> {
        let mut conn = self.conn().await?;
        profile_by_name(&mut conn, name).await
    }

    /// Check profile existence by name
    pub async fn device_profile_name_exists(&self, name: &str) -> Result<bool> {
        let mut conn = self.conn().await?;
        profile_name_exists(&mut conn, name).await
    }

    /// Update a device profile
    pub async fn update_device_profile(&self, profile: DeviceProfile) -> Result<()> {
        let mut conn = self.conn().await?;
        update_device_profile(&mut conn, profile).await
    }

    /// Delete a device profile by id
    pub async fn delete_device_profile_by_id(&self, id: &str) -> Result<()> {
        let mut conn = self.conn().await?;
        delete_device_profile_by_id(&mut conn, id).await
    }

    /// Delete a device profile by name
    pub async fn delete_device_profile_by_name(&self, name: &str) -> Result<()> {
        let mut conn = self.conn().await?;
        delete_device_profile_by_name(&mut conn, name).await
    }

    /// Query device profiles with offset, limit, and labels
    pub async fn all_device_profiles(
        &self,
        offset: usize,
        limit: i64,
        labels: &[String],
    ) -> Result<Vec<DeviceProfile>> {
        let mut conn = self.conn().await?;
        profiles_by_labels(&mut conn, offset, limit, labels).await
    }

    /// Query device profiles by model with offset and limit
    pub async fn device_profiles_by_model(
        &self,
        offset: usize,
        limit: i64,
        model: &str,
    ) -> Result<Vec<DeviceProfile>> {
        let mut conn = self.conn().await?;
        profiles_by_model(&mut conn, offset, limit, model).await
    }

    /// Query device profiles by manufacturer with offset and limit
    pub async fn device_profiles_by_manufacturer(
        &self,
        offset: usize,
        limit: i64,
        manufacturer: &str,
    ) -> Result<Vec<DeviceProfile>> {
        let mut conn = self.conn().await?;
        profiles_by_manufacturer(&mut conn, offset, limit, manufacturer).await
    }

    /// Query device profiles by manufacturer and model; also returns the
    /// total match count
    pub async fn device_profiles_by_manufacturer_and_model(
        &self,
        offset: usize,
        limit: i64,
        manufacturer: &str,
        model: &str,
    ) -> Result<(Vec<DeviceProfile>, u32)> {
        let mut conn = self.conn().await?;
        profiles_by_manufacturer_and_model(&mut conn, offset, limit, manufacturer, model).await
    }

    /// Count device profiles carrying every listed label
    pub async fn device_profile_count_by_labels(&self, labels: &[String]) -> Result<u32> {
        let mut conn = self.conn().await?;
        query::member_count_by_labels(&mut conn, DEVICE_PROFILE_COLLECTION, labels).await
    }

    /// Count device profiles with the specified manufacturer
    pub async fn device_profile_count_by_manufacturer(&self, manufacturer: &str) -> Result<u32> {
        let mut conn = self.conn().await?;
        query::member_count(
            &mut conn,
            &make_key(&[DEVICE_PROFILE_COLLECTION_MANUFACTURER, manufacturer]),
        )
        .await
    }

    /// Count device profiles with the specified model
    pub async fn device_profile_count_by_model(&self, model: &str) -> Result<u32> {
        let mut conn = self.conn().await?;
        query::member_count(&mut conn, &make_key(&[DEVICE_PROFILE_COLLECTION_MODEL, model])).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_profile() -> DeviceProfile {
        DeviceProfile {
            id: "aaaaaaaa-0000-4000-8000-000000000010".into(),
            name: "thermostat".into(),
            description: String::new(),
            manufacturer: "Acme".into(),
            model: "T-1000".into(),
            labels: vec!["hvac".into()],
            created: 1,
            modified: 2,
        }
    }

    #[test]
    fn test_add_commands_index_keys() {
        let commands = add_commands(&sample_profile()).unwrap();
        assert_eq!(commands.len(), 6);
        assert!(commands.iter().any(|c| matches!(c, Command::ZAdd { key, .. }
            if key == "md|dp:manufacturer:Acme")));
        assert!(commands.iter().any(|c| matches!(c, Command::ZAdd { key, .. }
            if key == "md|dp:model:T-1000")));
        assert!(commands.iter().any(|c| matches!(c, Command::ZAdd { key, .. }
            if key == "md|dp:label:hvac")));
    }

    #[test]
    fn test_delete_commands_are_symmetric() {
        let profile = sample_profile();
        assert_eq!(
            add_commands(&profile).unwrap().len(),
            delete_commands(&profile).len()
        );
    }
}
