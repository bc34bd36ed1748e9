//! Service registry entries

use serde::{Deserialize, Serialize};

/// Health probe settings for a registered service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheck {
    /// Probe interval, e.g. "10s"
    pub interval: String,
    /// Probe path, e.g. "/api/ping"
    pub path: String,
    /// Probe type, e.g. "http"
    #[serde(rename = "type")]
    pub check_type: String,
}

/// A service registry entry
///
/// Keyed by `service_id` (a service name, not a generated UUID).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    /// Registering service's identity; the storage key
    pub service_id: String,
    /// Last known health status
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub status: String,
    /// Service host
    pub host: String,
    /// Service port
    pub port: u16,
    /// Health probe settings
    pub health_check: HealthCheck,
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
    fn test_registration_round_trip() {
        let reg = Registration {
            service_id: "core-data".into(),
            status: "UP".into(),
            host: "core-data".into(),
            port: 59880,
            health_check: HealthCheck {
                interval: "10s".into(),
                path: "/api/ping".into(),
                check_type: "http".into(),
            },
            created: 100,
            modified: 200,
        };

        let json = serde_json::to_string(&reg).unwrap();
        assert!(json.contains("\"serviceId\":\"core-data\""));
        assert!(json.contains("\"type\":\"http\""));
        let parsed: Registration = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, reg);
    }
}
