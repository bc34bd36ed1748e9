//! Reading persistence
//!
//! Readings are written inside their event's transaction and carry their
//! own secondary indexes, all scored by origin so time-window queries range
//! directly over capture time:
//!
//! ```text
//! cd|rd                                  → ZSET of all reading stored keys
//! cd|rd:<id>                             → JSON blob
//! cd|rd:origin                           → ZSET scored by origin
//! cd|rd:deviceName:<dn>                  → ZSET scored by origin
//! cd|rd:resourceName:<rn>                → ZSET scored by origin
//! cd|rd:deviceName:resourceName:<dn>:<rn>→ ZSET scored by origin
//! ```

use redis::aio::MultiplexedConnection;

use crate::cleanup::{spawn_batched_delete, CleanupHandle};
use crate::command::Command;
use crate::entity::event::EVENTS_COLLECTION_READINGS;
use crate::error::Result;
use crate::keys::make_key;
use crate::model::{BaseReading, Reading};
use crate::query;
use crate::store::{ensure_id, Store};

/// Primary ordered collection of readings
pub const READINGS_COLLECTION: &str = "cd|rd";
/// Origin index
pub const READINGS_COLLECTION_ORIGIN: &str = "cd|rd:origin";
/// Device-name index prefix
pub const READINGS_COLLECTION_DEVICE_NAME: &str = "cd|rd:deviceName";
/// Resource-name index prefix
pub const READINGS_COLLECTION_RESOURCE_NAME: &str = "cd|rd:resourceName";
/// Combined device/resource index prefix
pub const READINGS_COLLECTION_DEVICE_NAME_RESOURCE_NAME: &str = "cd|rd:deviceName:resourceName";

/// Stored key of a reading
pub fn stored_key(id: &str) -> String {
    make_key(&[READINGS_COLLECTION, id])
}

/// Validate or assign the reading id and clear binary payloads
///
/// Binary payload bytes are never persisted; only the media type survives.
pub fn prepare_reading(mut reading: Reading) -> Result<Reading> {
    let base = reading.base_mut();
    base.id = ensure_id(&base.id)?;
    if let Reading::Binary(r) = &mut reading {
        r.binary_value = Vec::new();
    }
    Ok(reading)
}

/// Full command list for persisting a reading and every index entry
pub fn add_commands(reading: &Reading) -> Result<Vec<Command>> {
    let blob = reading.encode()?;
    let base = reading.base();
    let key = stored_key(&base.id);

    Ok(vec![
        Command::Set {
            key: key.clone(),
            value: blob,
        },
        Command::ZAdd {
            key: READINGS_COLLECTION.into(),
            score: 0,
            member: key.clone(),
        },
        Command::ZAdd {
            key: READINGS_COLLECTION_ORIGIN.into(),
            score: base.origin,
            member: key.clone(),
        },
        Command::ZAdd {
            key: make_key(&[READINGS_COLLECTION_DEVICE_NAME, &base.device_name]),
            score: base.origin,
            member: key.clone(),
        },
        Command::ZAdd {
            key: make_key(&[READINGS_COLLECTION_RESOURCE_NAME, &base.resource_name]),
            score: base.origin,
            member: key.clone(),
        },
        Command::ZAdd {
            key: make_key(&[
                READINGS_COLLECTION_DEVICE_NAME_RESOURCE_NAME,
                &base.device_name,
                &base.resource_name,
            ]),
            score: base.origin,
            member: key.clone(),
        },
    ])
}

/// Symmetric removal list for a reading
pub fn delete_commands(base: &BaseReading) -> Vec<Command> {
    let key = stored_key(&base.id);
    vec![
        Command::Unlink { key: key.clone() },
        Command::ZRem {
            key: READINGS_COLLECTION.into(),
            member: key.clone(),
        },
        Command::ZRem {
            key: READINGS_COLLECTION_ORIGIN.into(),
            member: key.clone(),
        },
        Command::ZRem {
            key: make_key(&[READINGS_COLLECTION_DEVICE_NAME, &base.device_name]),
            member: key.clone(),
        },
        Command::ZRem {
            key: make_key(&[READINGS_COLLECTION_RESOURCE_NAME, &base.resource_name]),
            member: key.clone(),
        },
        Command::ZRem {
            key: make_key(&[
                READINGS_COLLECTION_DEVICE_NAME_RESOURCE_NAME,
                &base.device_name,
                &base.resource_name,
            ]),
            member: key,
        },
    ]
}

/// Delete-command list rebuilt from a stored blob, for background cleanup
pub(crate) fn delete_commands_from_blob(blob: &[u8]) -> Option<Vec<Command>> {
    let base: BaseReading = serde_json::from_slice(blob).ok()?;
    Some(delete_commands(&base))
}

pub(crate) fn decode_readings(objects: Vec<Vec<u8>>) -> Result<Vec<Reading>> {
    objects.iter().map(|blob| Reading::decode(blob)).collect()
}

/// Readings of one event, in ingestion order
pub async fn readings_by_event_id(
    conn: &mut MultiplexedConnection,
    event_id: &str,
) -> Result<Vec<Reading>> {
    let objects = query::objects_by_range(
        conn,
        &make_key(&[EVENTS_COLLECTION_READINGS, event_id]),
        0,
        -1,
    )
    .await?;
    decode_readings(objects)
}

/// All readings, most recent origin first
pub async fn all_readings(
    conn: &mut MultiplexedConnection,
    offset: usize,
    limit: i64,
) -> Result<Vec<Reading>> {
    let objects = query::objects_by_rev_range(conn, READINGS_COLLECTION_ORIGIN, offset, limit).await?;
    decode_readings(objects)
}

/// Readings of one device, most recent origin first
pub async fn readings_by_device_name(
    conn: &mut MultiplexedConnection,
    offset: usize,
    limit: i64,
    name: &str,
) -> Result<Vec<Reading>> {
    let objects = query::objects_by_rev_range(
        conn,
        &make_key(&[READINGS_COLLECTION_DEVICE_NAME, name]),
        offset,
        limit,
    )
    .await?;
    decode_readings(objects)
}

/// Readings of one resource, most recent origin first
pub async fn readings_by_resource_name(
    conn: &mut MultiplexedConnection,
    offset: usize,
    limit: i64,
    resource_name: &str,
) -> Result<Vec<Reading>> {
    let objects = query::objects_by_rev_range(
        conn,
        &make_key(&[READINGS_COLLECTION_RESOURCE_NAME, resource_name]),
        offset,
        limit,
    )
    .await?;
    decode_readings(objects)
}

/// Readings matching both a device and a resource
pub async fn readings_by_device_name_and_resource_name(
    conn: &mut MultiplexedConnection,
    device_name: &str,
    resource_name: &str,
    offset: usize,
    limit: i64,
) -> Result<Vec<Reading>> {
    let objects = query::objects_by_rev_range(
        conn,
        &make_key(&[
            READINGS_COLLECTION_DEVICE_NAME_RESOURCE_NAME,
            device_name,
            resource_name,
        ]),
        offset,
        limit,
    )
    .await?;
    decode_readings(objects)
}

/// Readings within an origin window
pub async fn readings_by_time_range(
    conn: &mut MultiplexedConnection,
    start: i64,
    end: i64,
    offset: usize,
    limit: i64,
) -> Result<Vec<Reading>> {
    let objects =
        query::objects_by_score_range(conn, READINGS_COLLECTION_ORIGIN, start, end, offset, limit)
            .await?;
    decode_readings(objects)
}

/// Readings of one device within an origin window
pub async fn readings_by_device_name_and_time_range(
    conn: &mut MultiplexedConnection,
    device_name: &str,
    start: i64,
    end: i64,
    offset: usize,
    limit: i64,
) -> Result<Vec<Reading>> {
    let objects = query::objects_by_score_range(
        conn,
        &make_key(&[READINGS_COLLECTION_DEVICE_NAME, device_name]),
        start,
        end,
        offset,
        limit,
    )
    .await?;
    decode_readings(objects)
}

/// Readings of one resource within an origin window
pub async fn readings_by_resource_name_and_time_range(
    conn: &mut MultiplexedConnection,
    resource_name: &str,
    start: i64,
    end: i64,
    offset: usize,
    limit: i64,
) -> Result<Vec<Reading>> {
    let objects = query::objects_by_score_range(
        conn,
        &make_key(&[READINGS_COLLECTION_RESOURCE_NAME, resource_name]),
        start,
        end,
        offset,
        limit,
    )
    .await?;
    decode_readings(objects)
}

/// Readings of one device and resource within an origin window
pub async fn readings_by_device_name_and_resource_name_and_time_range(
    conn: &mut MultiplexedConnection,
    device_name: &str,
    resource_name: &str,
    start: i64,
    end: i64,
    offset: usize,
    limit: i64,
) -> Result<Vec<Reading>> {
    let objects = query::objects_by_score_range(
        conn,
        &make_key(&[
            READINGS_COLLECTION_DEVICE_NAME_RESOURCE_NAME,
            device_name,
            resource_name,
        ]),
        start,
        end,
        offset,
        limit,
    )
    .await?;
    decode_readings(objects)
}

/// Readings of one device across several resources within an origin window
///
/// OR-semantics over the resource list via a union-store into a temporary
/// collection; also returns the total count of the window.
pub async fn readings_by_device_name_and_resource_names_and_time_range(
    conn: &mut MultiplexedConnection,
    device_name: &str,
    resource_names: &[String],
    start: i64,
    end: i64,
    offset: usize,
    limit: i64,
) -> Result<(Vec<Reading>, u32)> {
    let keys: Vec<String> = resource_names
        .iter()
        .map(|resource_name| {
            make_key(&[
                READINGS_COLLECTION_DEVICE_NAME_RESOURCE_NAME,
                device_name,
                resource_name,
            ])
        })
        .collect();

    let (objects, total) =
        query::union_objects_by_keys_and_score_range(conn, start, end, offset, limit, &keys).await?;
    Ok((decode_readings(objects)?, total))
}

impl Store {
    /// Total reading count
    pub async fn reading_total_count(&self) -> Result<u32> {
        let mut conn = self.conn().await?;
        query::member_count(&mut conn, READINGS_COLLECTION).await
    }

    /// Query readings with offset and limit, most recent origin first
    pub async fn all_readings(&self, offset: usize, limit: i64) -> Result<Vec<Reading>> {
        let mut conn = self.conn().await?;
        all_readings(&mut conn, offset, limit).await
    }

    /// Query readings by origin window with offset and limit
    pub async fn readings_by_time_range(
        &self,
        start: i64,
        end: i64,
        offset: usize,
        limit: i64,
    ) -> Result<Vec<Reading>> {
        let mut conn = self.conn().await?;
        readings_by_time_range(&mut conn, start, end, offset, limit).await
    }

    /// Query readings by resource name with offset and limit
    pub async fn readings_by_resource_name(
        &self,
        offset: usize,
        limit: i64,
        resource_name: &str,
    ) -> Result<Vec<Reading>> {
        let mut conn = self.conn().await?;
        readings_by_resource_name(&mut conn, offset, limit, resource_name).await
    }

    /// Query readings by device name with offset and limit
    pub async fn readings_by_device_name(
        &self,
        offset: usize,
        limit: i64,
        name: &str,
    ) -> Result<Vec<Reading>> {
        let mut conn = self.conn().await?;
        readings_by_device_name(&mut conn, offset, limit, name).await
    }

    /// Query readings by device and resource name with offset and limit
    pub async fn readings_by_device_name_and_resource_name(
        &self,
        device_name: &str,
        resource_name: &str,
        offset: usize,
        limit: i64,
    ) -> Result<Vec<Reading>> {
        let mut conn = self.conn().await?;
        readings_by_device_name_and_resource_name(&mut conn, device_name, resource_name, offset, limit)
            .await
    }

    /// Query readings by device and resource within an origin window
    pub async fn readings_by_device_name_and_resource_name_and_time_range(
        &self,
        device_name: &str,
        resource_name: &str,
        start: i64,
        end: i64,
        offset: usize,
        limit: i64,
    ) -> Result<Vec<Reading>> {
        let mut conn = self.conn().await?;
        readings_by_device_name_and_resource_name_and_time_range(
            &mut conn,
            device_name,
            resource_name,
            start,
            end,
            offset,
            limit,
        )
        .await
    }

    /// Query readings by device across several resources within an origin
    /// window; also returns the total window count
    pub async fn readings_by_device_name_and_resource_names_and_time_range(
        &self,
        device_name: &str,
        resource_names: &[String],
        start: i64,
        end: i64,
        offset: usize,
        limit: i64,
    ) -> Result<(Vec<Reading>, u32)> {
        let mut conn = self.conn().await?;
        readings_by_device_name_and_resource_names_and_time_range(
            &mut conn,
            device_name,
            resource_names,
            start,
            end,
            offset,
            limit,
        )
        .await
    }

    /// Query readings by device within an origin window
    pub async fn readings_by_device_name_and_time_range(
        &self,
        device_name: &str,
        start: i64,
        end: i64,
        offset: usize,
        limit: i64,
    ) -> Result<Vec<Reading>> {
        let mut conn = self.conn().await?;
        readings_by_device_name_and_time_range(&mut conn, device_name, start, end, offset, limit)
            .await
    }

    /// Query readings by resource within an origin window
    pub async fn readings_by_resource_name_and_time_range(
        &self,
        resource_name: &str,
        start: i64,
        end: i64,
        offset: usize,
        limit: i64,
    ) -> Result<Vec<Reading>> {
        let mut conn = self.conn().await?;
        readings_by_resource_name_and_time_range(&mut conn, resource_name, start, end, offset, limit)
            .await
    }

    /// Count readings of one device
    pub async fn reading_count_by_device_name(&self, device_name: &str) -> Result<u32> {
        let mut conn = self.conn().await?;
        query::member_count(
            &mut conn,
            &make_key(&[READINGS_COLLECTION_DEVICE_NAME, device_name]),
        )
        .await
    }

    /// Count readings of one resource
    pub async fn reading_count_by_resource_name(&self, resource_name: &str) -> Result<u32> {
        let mut conn = self.conn().await?;
        query::member_count(
            &mut conn,
            &make_key(&[READINGS_COLLECTION_RESOURCE_NAME, resource_name]),
        )
        .await
    }

    /// Count readings of one device and resource
    pub async fn reading_count_by_device_name_and_resource_name(
        &self,
        device_name: &str,
        resource_name: &str,
    ) -> Result<u32> {
        let mut conn = self.conn().await?;
        query::member_count(
            &mut conn,
            &make_key(&[
                READINGS_COLLECTION_DEVICE_NAME_RESOURCE_NAME,
                device_name,
                resource_name,
            ]),
        )
        .await
    }

    /// Count readings within an origin window
    pub async fn reading_count_by_time_range(&self, start: i64, end: i64) -> Result<u32> {
        let mut conn = self.conn().await?;
        query::member_count_by_score_range(&mut conn, READINGS_COLLECTION_ORIGIN, start, end).await
    }

    /// Count readings of one device within an origin window
    pub async fn reading_count_by_device_name_and_time_range(
        &self,
        device_name: &str,
        start: i64,
        end: i64,
    ) -> Result<u32> {
        let mut conn = self.conn().await?;
        query::member_count_by_score_range(
            &mut conn,
            &make_key(&[READINGS_COLLECTION_DEVICE_NAME, device_name]),
            start,
            end,
        )
        .await
    }

    /// Count readings of one resource within an origin window
    pub async fn reading_count_by_resource_name_and_time_range(
        &self,
        resource_name: &str,
        start: i64,
        end: i64,
    ) -> Result<u32> {
        let mut conn = self.conn().await?;
        query::member_count_by_score_range(
            &mut conn,
            &make_key(&[READINGS_COLLECTION_RESOURCE_NAME, resource_name]),
            start,
            end,
        )
        .await
    }

    /// Count readings of one device and resource within an origin window
    pub async fn reading_count_by_device_name_and_resource_name_and_time_range(
        &self,
        device_name: &str,
        resource_name: &str,
        start: i64,
        end: i64,
    ) -> Result<u32> {
        let mut conn = self.conn().await?;
        query::member_count_by_score_range(
            &mut conn,
            &make_key(&[
                READINGS_COLLECTION_DEVICE_NAME_RESOURCE_NAME,
                device_name,
                resource_name,
            ]),
            start,
            end,
        )
        .await
    }

    /// Spawn a background batched deletion of the given reading stored keys
    pub(crate) fn spawn_delete_readings(&self, stored_keys: Vec<String>) -> CleanupHandle {
        spawn_batched_delete(
            self.pool.clone(),
            self.batch_size,
            stored_keys,
            "reading",
            delete_commands_from_blob,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::model::{BinaryReading, SimpleReading};

    fn base(id: &str) -> BaseReading {
        BaseReading {
            id: id.into(),
            origin: 1_700_000_000_000_000_000,
            device_name: "thermo".into(),
            resource_name: "temp".into(),
            profile_name: "thermostat".into(),
            value_type: "Float64".into(),
            units: None,
        }
    }

    #[test]
    fn test_add_commands_score_by_origin() {
        let reading = Reading::Simple(SimpleReading {
            base: base("b5a9b0c1-51b9-46a9-a912-0e7c07b122a4"),
            value: "21.5".into(),
        });

        let commands = add_commands(&reading).unwrap();
        assert_eq!(commands.len(), 6);

        // Primary collection scored 0, all attribute indexes scored by origin
        assert!(commands.iter().any(|c| matches!(c, Command::ZAdd { key, score, .. }
            if key == READINGS_COLLECTION && *score == 0)));
        assert!(commands.iter().any(|c| matches!(c, Command::ZAdd { key, score, .. }
            if key == "cd|rd:deviceName:thermo" && *score == 1_700_000_000_000_000_000)));
        assert!(commands.iter().any(|c| matches!(c, Command::ZAdd { key, .. }
            if key == "cd|rd:deviceName:resourceName:thermo:temp")));
    }

    #[test]
    fn test_prepare_reading_clears_binary_payload() {
        let reading = Reading::Binary(BinaryReading {
            base: base(""),
            binary_value: vec![1, 2, 3],
            media_type: "image/png".into(),
        });

        let prepared = prepare_reading(reading).unwrap();
        match &prepared {
            Reading::Binary(r) => {
                assert!(r.binary_value.is_empty());
                assert!(!r.base.id.is_empty());
            }
            other => panic!("expected binary reading, got {:?}", other),
        }
    }

    #[test]
    fn test_prepare_reading_rejects_malformed_id() {
        let reading = Reading::Simple(SimpleReading {
            base: base("not-a-uuid"),
            value: "1".into(),
        });
        assert!(matches!(
            prepare_reading(reading),
            Err(StoreError::InvalidId(_))
        ));
    }

    #[test]
    fn test_delete_commands_from_blob() {
        let reading = Reading::Simple(SimpleReading {
            base: base("b5a9b0c1-51b9-46a9-a912-0e7c07b122a4"),
            value: "21.5".into(),
        });
        let blob = reading.encode().unwrap();

        let deletes = delete_commands_from_blob(&blob).unwrap();
        assert_eq!(deletes.len(), 6);
        assert!(matches!(&deletes[0], Command::Unlink { key }
            if key == "cd|rd:b5a9b0c1-51b9-46a9-a912-0e7c07b122a4"));

        assert!(delete_commands_from_blob(b"garbage").is_none());
    }
}
