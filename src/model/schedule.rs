//! Scheduling metadata: intervals and interval actions

use serde::{Deserialize, Serialize};

/// A recurring schedule window
///
/// Cannot be deleted or renamed while any [`IntervalAction`] references it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Interval {
    /// Opaque UUID
    pub id: String,
    /// Unique name
    pub name: String,
    /// Optional start boundary, `YYYYMMDDTHHmmss`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<String>,
    /// Optional end boundary, `YYYYMMDDTHHmmss`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<String>,
    /// Recurrence period, e.g. "10s", "1h"
    pub interval: String,
    /// Creation time, Unix milliseconds, set once
    #[serde(default)]
    pub created: i64,
    /// Last write time, Unix milliseconds
    #[serde(default)]
    pub modified: i64,
}

/// An action fired on an interval's schedule
///
/// References its [`Interval`] by name; the interval must exist at write time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntervalAction {
    /// Opaque UUID
    pub id: String,
    /// Unique name
    pub name: String,
    /// Name of the owning interval
    pub interval_name: String,
    /// Target address descriptor
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub address: serde_json::Value,
    /// Optional payload sent when fired
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// MIME type of `content`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    /// Creation time, Unix milliseconds, set once
    #[serde(default)]
    pub created: i64,
    /// Last write time, Unix milliseconds
    #[serde(default)]
    pub modified: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interval_round_trip() {
        let interval = Interval {
            id: "bbbbbbbb-0000-4000-8000-000000000001".into(),
            name: "midnight".into(),
            start: Some("20260101T000000".into()),
            end: None,
            interval: "24h".into(),
            created: 1,
            modified: 2,
        };

        let json = serde_json::to_string(&interval).unwrap();
        assert!(!json.contains("\"end\""));
        let parsed: Interval = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, interval);
    }

    #[test]
    fn test_interval_action_address_omitted_when_null() {
        let action = IntervalAction {
            id: "bbbbbbbb-0000-4000-8000-000000000002".into(),
            name: "purge".into(),
            interval_name: "midnight".into(),
            address: serde_json::Value::Null,
            content: None,
            content_type: None,
            created: 0,
            modified: 0,
        };
        let json = serde_json::to_string(&action).unwrap();
        assert!(!json.contains("address"));
    }
}
