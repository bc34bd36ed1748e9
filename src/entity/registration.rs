//! Service registry persistence
//!
//! Registry entries are keyed by the registering service's id rather than a
//! generated UUID, so lookups and upserts address `kp|reg:<service id>`
//! directly; there is no separate name hash.

use redis::aio::MultiplexedConnection;

use crate::command::{self, Command};
use crate::entity::decode_list;
use crate::error::{Result, StoreError};
use crate::keys::make_key;
use crate::model::{make_timestamp, Registration};
use crate::query;
use crate::store::Store;

/// Primary ordered collection of registrations, scored by modified
pub const REGISTRATION_COLLECTION: &str = "kp|reg";

fn stored_key(service_id: &str) -> String {
    make_key(&[REGISTRATION_COLLECTION, service_id])
}

/// Full command list for persisting a registration
pub fn add_commands(registration: &Registration) -> Result<Vec<Command>> {
    let blob = serde_json::to_vec(registration).map_err(|e| {
        StoreError::ContractInvalid(format!(
            "unable to JSON marshal registration for persistence: {}",
            e
        ))
    })?;
    let key = stored_key(&registration.service_id);

    Ok(vec![
        Command::Set {
            key: key.clone(),
            value: blob,
        },
        Command::ZAdd {
            key: REGISTRATION_COLLECTION.into(),
            score: registration.modified,
            member: key,
        },
    ])
}

/// Symmetric removal list for a registration
pub fn delete_commands(registration: &Registration) -> Vec<Command> {
    let key = stored_key(&registration.service_id);
    vec![
        Command::Unlink { key: key.clone() },
        Command::ZRem {
            key: REGISTRATION_COLLECTION.into(),
            member: key,
        },
    ]
}

/// Add a new registration; the service id must be free
pub async fn add_registration(
    conn: &mut MultiplexedConnection,
    mut registration: Registration,
) -> Result<Registration> {
    if registration.service_id.is_empty() {
        return Err(StoreError::ContractInvalid(
            "registration service id must not be empty".into(),
        ));
    }
    if query::object_id_exists(conn, &stored_key(&registration.service_id)).await? {
        return Err(StoreError::DuplicateName(format!(
            "registration for service {} already exists",
            registration.service_id
        )));
    }

    let ts = make_timestamp();
    if registration.created == 0 {
        registration.created = ts;
    }
    registration.modified = ts;

    let commands = add_commands(&registration)?;
    command::execute(conn, &commands, "registration creation").await?;
    Ok(registration)
}

/// Fetch a registration by service id
pub async fn registration_by_service_id(
    conn: &mut MultiplexedConnection,
    service_id: &str,
) -> Result<Registration> {
    query::object_by_id(conn, &stored_key(service_id)).await
}

/// All registrations, most recently modified first
pub async fn all_registrations(conn: &mut MultiplexedConnection) -> Result<Vec<Registration>> {
    let objects = query::objects_by_rev_range(conn, REGISTRATION_COLLECTION, 0, -1).await?;
    decode_list(objects, "registration")
}

/// Update an existing registration
pub async fn update_registration(
    conn: &mut MultiplexedConnection,
    mut registration: Registration,
) -> Result<()> {
    let old_registration = registration_by_service_id(conn, &registration.service_id).await?;

    registration.created = old_registration.created;
    registration.modified = make_timestamp();

    let mut commands = delete_commands(&old_registration);
    commands.extend(add_commands(&registration)?);
    command::execute(conn, &commands, "registration update").await
}

/// Delete a registration by service id
pub async fn delete_registration_by_service_id(
    conn: &mut MultiplexedConnection,
    service_id: &str,
) -> Result<()> {
    let registration = registration_by_service_id(conn, service_id).await?;
    let commands = delete_commands(&registration);
    command::execute(conn, &commands, "registration deletion").await
}

impl Store {
    /// Add a new registration
    pub async fn add_registration(&self, registration: Registration) -> Result<Registration> {
        let mut conn = self.conn().await?;
        add_registration(&mut conn, registration).await
    }

    /// Get a registration by service id
    pub async fn registration_by_service_id(&self, service_id: &str) -> Result<Registration> {
        let mut conn = self.conn().await?;
        registration_by_service_id(&mut conn, service_id).await
    }

    /// All registrations
    pub async fn all_registrations(&self) -> Result<Vec<Registration>> {
        let mut conn = self.conn().await?;
        all_registrations(&mut conn).await
    }

    /// Update a registration
    pub async fn update_registration(&self, registration: Registration) -> Result<()> {
        let mut conn = self.conn().await?;
        update_registration(&mut conn, registration).await
    }

    /// Delete a registration by service id
    pub async fn delete_registration_by_service_id(&self, service_id: &str) -> Result<()> {
        let mut conn = self.conn().await?;
        delete_registration_by_service_id(&mut conn, service_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::HealthCheck;

    #[test]
    fn test_registration_keyed_by_service_id() {
        let registration = Registration {
            service_id: "core-data".into(),
            status: "UP".into(),
            host: "core-data".into(),
            port: 59880,
            health_check: HealthCheck {
                interval: "10s".into(),
                path: "/api/ping".into(),
                check_type: "http".into(),
            },
            created: 1,
            modified: 2,
        };

        let adds = add_commands(&registration).unwrap();
        assert_eq!(adds.len(), 2);
        assert!(matches!(&adds[0], Command::Set { key, .. } if key == "kp|reg:core-data"));
        assert_eq!(adds.len(), delete_commands(&registration).len());
    }
}
