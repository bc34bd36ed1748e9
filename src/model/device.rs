//! Device metadata entities: devices, profiles, services, provision watchers

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Administrative lock state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AdminState {
    /// Accepting commands
    Unlocked,
    /// Administratively disabled
    Locked,
}

impl Default for AdminState {
    fn default() -> Self {
        AdminState::Unlocked
    }
}

/// Operational reachability state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OperatingState {
    /// Responding
    Up,
    /// Known unreachable
    Down,
    /// Not yet determined
    Unknown,
}

impl Default for OperatingState {
    fn default() -> Self {
        OperatingState::Unknown
    }
}

/// A managed device
///
/// `profile_name` and `service_name` are foreign keys; both referenced rows
/// must exist at write time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    /// Opaque UUID
    pub id: String,
    /// Unique name
    pub name: String,
    /// Free-form description
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// Administrative state
    #[serde(default)]
    pub admin_state: AdminState,
    /// Operational state
    #[serde(default)]
    pub operating_state: OperatingState,
    /// User-defined labels
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
    /// Name of the owning device service
    pub service_name: String,
    /// Name of the device profile
    pub profile_name: String,
    /// Protocol properties keyed by protocol name
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub protocols: HashMap<String, serde_json::Value>,
    /// Creation time, Unix milliseconds, set once
    #[serde(default)]
    pub created: i64,
    /// Last write time, Unix milliseconds
    #[serde(default)]
    pub modified: i64,
}

/// A device profile: the type description a set of devices shares
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceProfile {
    /// Opaque UUID
    pub id: String,
    /// Unique name
    pub name: String,
    /// Free-form description
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// Device manufacturer
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub manufacturer: String,
    /// Device model
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub model: String,
    /// User-defined labels
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
    /// Creation time, Unix milliseconds, set once
    #[serde(default)]
    pub created: i64,
    /// Last write time, Unix milliseconds
    #[serde(default)]
    pub modified: i64,
}

/// A device service: the process that owns a set of devices
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceService {
    /// Opaque UUID
    pub id: String,
    /// Unique name
    pub name: String,
    /// Free-form description
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// User-defined labels
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
    /// Callback address of the service
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub base_address: String,
    /// Administrative state
    #[serde(default)]
    pub admin_state: AdminState,
    /// Creation time, Unix milliseconds, set once
    #[serde(default)]
    pub created: i64,
    /// Last write time, Unix milliseconds
    #[serde(default)]
    pub modified: i64,
}

/// A provision watcher: a rule for auto-registering discovered devices
///
/// Like a device, it references a profile and a service by name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionWatcher {
    /// Opaque UUID
    pub id: String,
    /// Unique name
    pub name: String,
    /// User-defined labels
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
    /// Identifier patterns a discovered device must match
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub identifiers: HashMap<String, String>,
    /// Name of the profile assigned to matched devices
    pub profile_name: String,
    /// Name of the service that owns matched devices
    pub service_name: String,
    /// Administrative state
    #[serde(default)]
    pub admin_state: AdminState,
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
    fn test_device_round_trip() {
        let device = Device {
            id: "aaaaaaaa-0000-4000-8000-000000000001".into(),
            name: "thermostat-01".into(),
            description: String::new(),
            admin_state: AdminState::Unlocked,
            operating_state: OperatingState::Up,
            labels: vec!["outdoor".into(), "hvac".into()],
            service_name: "device-virtual".into(),
            profile_name: "thermostat".into(),
            protocols: HashMap::new(),
            created: 1_700_000_000_000,
            modified: 1_700_000_000_000,
        };

        let json = serde_json::to_string(&device).unwrap();
        assert!(json.contains("\"adminState\":\"UNLOCKED\""));
        assert!(json.contains("\"operatingState\":\"UP\""));

        let parsed: Device = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, device);
    }

    #[test]
    fn test_profile_defaults() {
        let json = r#"{"id":"aaaaaaaa-0000-4000-8000-000000000002","name":"camera"}"#;
        let profile: DeviceProfile = serde_json::from_str(json).unwrap();
        assert!(profile.labels.is_empty());
        assert_eq!(profile.created, 0);
    }
}
