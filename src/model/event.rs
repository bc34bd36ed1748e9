//! Event model

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::reading::Reading;

/// A device event: one capture from a device, carrying an ordered list of
/// readings
///
/// Readings are persisted as separate objects; the stored event blob holds
/// only the event fields, and an ordered reference set (index -> reading
/// stored key) reconstructs reading order on read-back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Opaque UUID
    pub id: String,
    /// Name of the originating device
    pub device_name: String,
    /// Name of the device's profile
    pub profile_name: String,
    /// Name of the source command or resource that produced the event
    pub source_name: String,
    /// Device-reported capture time, Unix nanoseconds
    pub origin: i64,
    /// Free-form tags attached at ingestion
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub tags: HashMap<String, serde_json::Value>,
    /// Readings in ingestion order; persisted separately, never in the blob
    #[serde(skip)]
    pub readings: Vec<Reading>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::reading::{BaseReading, SimpleReading};

    #[test]
    fn test_event_blob_excludes_readings() {
        let event = Event {
            id: "0a1b2c3d-0000-4000-8000-000000000001".into(),
            device_name: "camera-07".into(),
            profile_name: "camera".into(),
            source_name: "snapshot".into(),
            origin: 1_700_000_000_000_000_000,
            tags: HashMap::new(),
            readings: vec![Reading::Simple(SimpleReading {
                base: BaseReading {
                    id: "0a1b2c3d-0000-4000-8000-000000000002".into(),
                    origin: 1_700_000_000_000_000_000,
                    device_name: "camera-07".into(),
                    resource_name: "luminance".into(),
                    profile_name: "camera".into(),
                    value_type: "Int64".into(),
                    units: None,
                },
                value: "320".into(),
            })],
        };

        let json = serde_json::to_string(&event).unwrap();
        assert!(!json.contains("readings"));
        assert!(!json.contains("luminance"));

        let parsed: Event = serde_json::from_str(&json).unwrap();
        assert!(parsed.readings.is_empty());
        assert_eq!(parsed.device_name, "camera-07");
    }

    #[test]
    fn test_event_tags_round_trip() {
        let mut tags = HashMap::new();
        tags.insert("gateway".to_string(), serde_json::json!("gw-3"));

        let event = Event {
            id: "0a1b2c3d-0000-4000-8000-000000000001".into(),
            device_name: "d".into(),
            profile_name: "p".into(),
            source_name: "s".into(),
            origin: 42,
            tags,
            readings: Vec::new(),
        };

        let json = serde_json::to_string(&event).unwrap();
        let parsed: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.tags["gateway"], serde_json::json!("gw-3"));
    }
}
