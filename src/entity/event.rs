//! Event persistence
//!
//! The event blob never embeds its readings. Readings are stored as their
//! own objects inside the same transaction, and an ordered reference set
//! (`cd|evt:readings:<event id>`, scored by ingestion index) reconstructs
//! reading order exactly as ingested.
//!
//! Cascading deletes (by device, by age) resolve the target id lists
//! synchronously, then hand the row deletion to background batched workers.

use redis::aio::MultiplexedConnection;

use crate::cleanup::{spawn_batched_delete, CleanupHandle};
use crate::command::{self, Command};
use crate::entity::reading;
use crate::error::{Result, StoreError};
use crate::keys::{id_from_stored_key, make_key};
use crate::model::{make_origin_timestamp, Event};
use crate::query;
use crate::store::{ensure_id, Store};

/// Primary ordered collection of events, scored by origin
pub const EVENTS_COLLECTION: &str = "cd|evt";
/// Origin index
pub const EVENTS_COLLECTION_ORIGIN: &str = "cd|evt:origin";
/// Device-name index prefix
pub const EVENTS_COLLECTION_DEVICE_NAME: &str = "cd|evt:device:name";
/// Ordered reading-reference set prefix
pub const EVENTS_COLLECTION_READINGS: &str = "cd|evt:readings";

/// Stored key of an event
pub fn stored_key(id: &str) -> String {
    make_key(&[EVENTS_COLLECTION, id])
}

/// Command list for the event row and its indexes (excluding readings)
pub fn add_commands(event: &Event) -> Result<Vec<Command>> {
    let blob = serde_json::to_vec(event)
        .map_err(|e| StoreError::ContractInvalid(format!("event parsing failed: {}", e)))?;
    let key = stored_key(&event.id);

    Ok(vec![
        Command::Set {
            key: key.clone(),
            value: blob,
        },
        Command::ZAdd {
            key: EVENTS_COLLECTION.into(),
            score: event.origin,
            member: key.clone(),
        },
        Command::ZAdd {
            key: EVENTS_COLLECTION_ORIGIN.into(),
            score: event.origin,
            member: key.clone(),
        },
        Command::ZAdd {
            key: make_key(&[EVENTS_COLLECTION_DEVICE_NAME, &event.device_name]),
            score: event.origin,
            member: key,
        },
    ])
}

/// Removal list for the event row, its indexes, and its reading-reference set
pub fn delete_commands(event: &Event) -> Vec<Command> {
    let key = stored_key(&event.id);
    vec![
        Command::Unlink { key: key.clone() },
        Command::Unlink {
            key: make_key(&[EVENTS_COLLECTION_READINGS, &event.id]),
        },
        Command::ZRem {
            key: EVENTS_COLLECTION.into(),
            member: key.clone(),
        },
        Command::ZRem {
            key: EVENTS_COLLECTION_ORIGIN.into(),
            member: key.clone(),
        },
        Command::ZRem {
            key: make_key(&[EVENTS_COLLECTION_DEVICE_NAME, &event.device_name]),
            member: key,
        },
    ]
}

pub(crate) fn delete_commands_from_blob(blob: &[u8]) -> Option<Vec<Command>> {
    let event: Event = serde_json::from_slice(blob).ok()?;
    Some(delete_commands(&event))
}

/// Add a new event together with its readings, one atomic batch
pub async fn add_event(conn: &mut MultiplexedConnection, mut event: Event) -> Result<Event> {
    if query::object_id_exists(conn, &stored_key(&event.id)).await? {
        return Err(StoreError::DuplicateName(format!(
            "event id {} already exists",
            event.id
        )));
    }

    if event.origin == 0 {
        event.origin = make_origin_timestamp();
    }

    let readings = std::mem::take(&mut event.readings);
    let mut commands = add_commands(&event)?;

    // Reading reference set scores are the ingestion indexes, so read-back
    // preserves the order the device service supplied.
    let readings_key = make_key(&[EVENTS_COLLECTION_READINGS, &event.id]);
    let mut stored_readings = Vec::with_capacity(readings.len());
    for (index, raw_reading) in readings.into_iter().enumerate() {
        let prepared = reading::prepare_reading(raw_reading)?;
        commands.extend(reading::add_commands(&prepared)?);
        commands.push(Command::ZAdd {
            key: readings_key.clone(),
            score: index as i64,
            member: reading::stored_key(&prepared.base().id),
        });
        stored_readings.push(prepared);
    }
    event.readings = stored_readings;

    command::execute(conn, &commands, "event creation").await?;
    Ok(event)
}

/// Fetch an event by id, hydrating its readings in order
pub async fn event_by_id(conn: &mut MultiplexedConnection, id: &str) -> Result<Event> {
    let mut event: Event = query::object_by_id(conn, &stored_key(id)).await?;
    event.readings = reading::readings_by_event_id(conn, id).await?;
    Ok(event)
}

/// Delete an event and all of its readings, one atomic batch
pub async fn delete_event_by_id(conn: &mut MultiplexedConnection, id: &str) -> Result<()> {
    let event = event_by_id(conn, id).await?;

    let mut commands = Vec::new();
    for r in &event.readings {
        commands.extend(reading::delete_commands(r.base()));
    }
    commands.extend(delete_commands(&event));

    command::execute(conn, &commands, "event deletion").await
}

async fn hydrate_events(
    conn: &mut MultiplexedConnection,
    objects: Vec<Vec<u8>>,
) -> Result<Vec<Event>> {
    let mut events = Vec::with_capacity(objects.len());
    for blob in &objects {
        let mut event: Event = serde_json::from_slice(blob).map_err(|e| {
            StoreError::Database(format!("event format parsing failed from the database: {}", e))
        })?;
        event.readings = reading::readings_by_event_id(conn, &event.id).await?;
        events.push(event);
    }
    Ok(events)
}

/// All events, most recent origin first
pub async fn all_events(
    conn: &mut MultiplexedConnection,
    offset: usize,
    limit: i64,
) -> Result<Vec<Event>> {
    let objects = query::objects_by_rev_range(conn, EVENTS_COLLECTION, offset, limit).await?;
    hydrate_events(conn, objects).await
}

/// Events of one device, most recent origin first
pub async fn events_by_device_name(
    conn: &mut MultiplexedConnection,
    offset: usize,
    limit: i64,
    name: &str,
) -> Result<Vec<Event>> {
    let objects = query::objects_by_rev_range(
        conn,
        &make_key(&[EVENTS_COLLECTION_DEVICE_NAME, name]),
        offset,
        limit,
    )
    .await?;
    hydrate_events(conn, objects).await
}

/// Events within an origin window
pub async fn events_by_time_range(
    conn: &mut MultiplexedConnection,
    start: i64,
    end: i64,
    offset: usize,
    limit: i64,
) -> Result<Vec<Event>> {
    let objects =
        query::objects_by_score_range(conn, EVENTS_COLLECTION_ORIGIN, start, end, offset, limit)
            .await?;
    hydrate_events(conn, objects).await
}

/// Resolve event stored keys in a score window, plus every reading stored
/// key referenced by those events
pub async fn event_reading_keys_by_score_range(
    conn: &mut MultiplexedConnection,
    key: &str,
    min: i64,
    max: i64,
) -> Result<(Vec<String>, Vec<String>)> {
    let event_keys = query::ids_by_score_range(conn, key, min, max).await?;

    let mut reading_keys = Vec::new();
    for event_key in &event_keys {
        let event_id = id_from_stored_key(event_key);
        let keys = query::ids_by_range_all(
            conn,
            &make_key(&[EVENTS_COLLECTION_READINGS, event_id]),
        )
        .await?;
        reading_keys.extend(keys);
    }

    Ok((event_keys, reading_keys))
}

/// Handles to the pair of background tasks a cascading event delete spawns
pub struct EventCleanup {
    /// Task deleting the event rows
    pub events: CleanupHandle,
    /// Task deleting the referenced reading rows
    pub readings: CleanupHandle,
}

impl EventCleanup {
    /// Wait for both tasks to finish
    pub async fn join(self) {
        self.events.join().await;
        self.readings.join().await;
    }
}

impl Store {
    /// Add a new event
    pub async fn add_event(&self, mut event: Event) -> Result<Event> {
        event.id = ensure_id(&event.id)?;
        let mut conn = self.conn().await?;
        add_event(&mut conn, event).await
    }

    /// Get an event by id
    pub async fn event_by_id(&self, id: &str) -> Result<Event> {
        let mut conn = self.conn().await?;
        event_by_id(&mut conn, id).await
    }

    /// Delete an event by id, together with its readings
    pub async fn delete_event_by_id(&self, id: &str) -> Result<()> {
        let mut conn = self.conn().await?;
        delete_event_by_id(&mut conn, id).await
    }

    /// Query events with offset and limit, most recent origin first
    pub async fn all_events(&self, offset: usize, limit: i64) -> Result<Vec<Event>> {
        let mut conn = self.conn().await?;
        all_events(&mut conn, offset, limit).await
    }

    /// Query events by device name with offset and limit
    pub async fn events_by_device_name(
        &self,
        offset: usize,
        limit: i64,
        name: &str,
    ) -> Result<Vec<Event>> {
        let mut conn = self.conn().await?;
        events_by_device_name(&mut conn, offset, limit, name).await
    }

    /// Query events by origin window with offset and limit
    pub async fn events_by_time_range(
        &self,
        start: i64,
        end: i64,
        offset: usize,
        limit: i64,
    ) -> Result<Vec<Event>> {
        let mut conn = self.conn().await?;
        events_by_time_range(&mut conn, start, end, offset, limit).await
    }

    /// Total event count
    pub async fn event_total_count(&self) -> Result<u32> {
        let mut conn = self.conn().await?;
        query::member_count(&mut conn, EVENTS_COLLECTION).await
    }

    /// Count events of one device
    pub async fn event_count_by_device_name(&self, device_name: &str) -> Result<u32> {
        let mut conn = self.conn().await?;
        query::member_count(
            &mut conn,
            &make_key(&[EVENTS_COLLECTION_DEVICE_NAME, device_name]),
        )
        .await
    }

    /// Count events within an origin window
    pub async fn event_count_by_time_range(&self, start: i64, end: i64) -> Result<u32> {
        let mut conn = self.conn().await?;
        query::member_count_by_score_range(&mut conn, EVENTS_COLLECTION_ORIGIN, start, end).await
    }

    /// Delete all events (and their readings) of one device
    ///
    /// Returns as soon as the target id lists are resolved; row deletion
    /// proceeds on background tasks reachable through the returned handles.
    pub async fn delete_events_by_device_name(&self, device_name: &str) -> Result<EventCleanup> {
        let mut conn = self.conn().await?;
        let (event_keys, reading_keys) = event_reading_keys_by_score_range(
            &mut conn,
            &make_key(&[EVENTS_COLLECTION_DEVICE_NAME, device_name]),
            0,
            i64::MAX,
        )
        .await?;
        drop(conn);

        Ok(EventCleanup {
            readings: self.spawn_delete_readings(reading_keys),
            events: self.spawn_delete_events(event_keys),
        })
    }

    /// Delete all events (and their readings) older than `age` nanoseconds
    pub async fn delete_events_by_age(&self, age: i64) -> Result<EventCleanup> {
        let expire_timestamp = make_origin_timestamp() - age;

        let mut conn = self.conn().await?;
        let (event_keys, reading_keys) =
            event_reading_keys_by_score_range(&mut conn, EVENTS_COLLECTION_ORIGIN, 0, expire_timestamp)
                .await?;
        drop(conn);

        Ok(EventCleanup {
            readings: self.spawn_delete_readings(reading_keys),
            events: self.spawn_delete_events(event_keys),
        })
    }

    pub(crate) fn spawn_delete_events(&self, stored_keys: Vec<String>) -> CleanupHandle {
        spawn_batched_delete(
            self.pool.clone(),
            self.batch_size,
            stored_keys,
            "event",
            delete_commands_from_blob,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn sample_event() -> Event {
        Event {
            id: "0a1b2c3d-0000-4000-8000-000000000001".into(),
            device_name: "camera-07".into(),
            profile_name: "camera".into(),
            source_name: "snapshot".into(),
            origin: 1_700_000_000_000_000_000,
            tags: HashMap::new(),
            readings: Vec::new(),
        }
    }

    #[test]
    fn test_add_commands_score_by_origin() {
        let event = sample_event();
        let commands = add_commands(&event).unwrap();
        assert_eq!(commands.len(), 4);
        for command in &commands[1..] {
            assert!(matches!(command, Command::ZAdd { score, .. }
                if *score == 1_700_000_000_000_000_000));
        }
        assert!(commands.iter().any(|c| matches!(c, Command::ZAdd { key, .. }
            if key == "cd|evt:device:name:camera-07")));
    }

    #[test]
    fn test_delete_commands_unlink_reading_reference_set() {
        let event = sample_event();
        let deletes = delete_commands(&event);
        assert!(deletes.iter().any(|c| matches!(c, Command::Unlink { key }
            if key == "cd|evt:readings:0a1b2c3d-0000-4000-8000-000000000001")));
    }

    #[test]
    fn test_delete_commands_from_blob_rejects_garbage() {
        assert!(delete_commands_from_blob(b"not json").is_none());

        let event = sample_event();
        let blob = serde_json::to_vec(&event).unwrap();
        let deletes = delete_commands_from_blob(&blob).unwrap();
        assert_eq!(deletes.len(), 5);
    }
}
