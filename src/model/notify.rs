//! Alerting entities: notifications, subscriptions, transmissions

use serde::{Deserialize, Serialize};

/// Notification severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NotificationSeverity {
    /// Informational
    Normal,
    /// Low urgency
    Minor,
    /// Requires immediate distribution
    Critical,
}

/// Notification processing status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NotificationStatus {
    /// Accepted, not yet distributed
    New,
    /// Distribution complete
    Processed,
    /// Escalated after repeated delivery failure
    Escalated,
}

/// Transmission delivery status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransmissionStatus {
    /// Receiver confirmed delivery
    Acknowledged,
    /// Delivery failed
    Failed,
    /// Sent, awaiting confirmation
    Sent,
    /// Retrying delivery
    Resending,
    /// Escalated after retry exhaustion
    Escalated,
}

/// An alert raised by a service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    /// Opaque UUID
    pub id: String,
    /// Routing category; optional, indexed when present
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub category: String,
    /// Routing labels
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
    /// Message body
    pub content: String,
    /// MIME type of `content`
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub content_type: String,
    /// Free-form description
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// Originating service or subsystem
    pub sender: String,
    /// Severity level
    pub severity: NotificationSeverity,
    /// Processing status
    pub status: NotificationStatus,
    /// Creation time, Unix milliseconds, set once
    #[serde(default)]
    pub created: i64,
    /// Last write time, Unix milliseconds
    #[serde(default)]
    pub modified: i64,
}

/// A receiver's interest in notification categories/labels
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    /// Opaque UUID
    pub id: String,
    /// Unique name
    pub name: String,
    /// Matched notification categories
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub categories: Vec<String>,
    /// Matched notification labels
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
    /// Receiver identity
    pub receiver: String,
    /// Free-form description
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// Creation time, Unix milliseconds, set once
    #[serde(default)]
    pub created: i64,
    /// Last write time, Unix milliseconds
    #[serde(default)]
    pub modified: i64,
}

/// One delivery attempt trail of a notification to a subscription
///
/// Cascade-deleted when its notification is deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transmission {
    /// Opaque UUID
    pub id: String,
    /// Creation time, Unix milliseconds, set once; doubles as the index score
    #[serde(default)]
    pub created: i64,
    /// Id of the notification being delivered
    pub notification_id: String,
    /// Name of the target subscription
    pub subscription_name: String,
    /// Delivery status
    pub status: TransmissionStatus,
    /// Number of resend attempts so far
    #[serde(default)]
    pub resend_count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notification_round_trip() {
        let n = Notification {
            id: "cccccccc-0000-4000-8000-000000000001".into(),
            category: "health".into(),
            labels: vec!["disk".into()],
            content: "disk usage above 90%".into(),
            content_type: "text/plain".into(),
            description: String::new(),
            sender: "sys-agent".into(),
            severity: NotificationSeverity::Critical,
            status: NotificationStatus::New,
            created: 10,
            modified: 10,
        };

        let json = serde_json::to_string(&n).unwrap();
        assert!(json.contains("\"severity\":\"CRITICAL\""));
        assert!(json.contains("\"status\":\"NEW\""));
        let parsed: Notification = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, n);
    }

    #[test]
    fn test_transmission_status_wire_names() {
        let t = Transmission {
            id: "cccccccc-0000-4000-8000-000000000002".into(),
            created: 5,
            notification_id: "cccccccc-0000-4000-8000-000000000001".into(),
            subscription_name: "ops-email".into(),
            status: TransmissionStatus::Resending,
            resend_count: 2,
        };
        let json = serde_json::to_string(&t).unwrap();
        assert!(json.contains("\"status\":\"RESENDING\""));
        assert!(json.contains("\"resendCount\":2"));
    }
}
