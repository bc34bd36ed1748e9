//! Reading model: a tagged union of simple, binary, and object value kinds
//!
//! The persisted JSON carries a `valueType` discriminator; decoding reads it
//! once and constructs the matching variant without speculative parsing.

use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

/// Discriminator value for binary readings
pub const VALUE_TYPE_BINARY: &str = "Binary";
/// Discriminator value for object readings
pub const VALUE_TYPE_OBJECT: &str = "Object";

/// Fields common to every reading kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BaseReading {
    /// Opaque UUID
    pub id: String,
    /// Device-reported capture time, Unix nanoseconds
    pub origin: i64,
    /// Name of the originating device
    pub device_name: String,
    /// Name of the sampled resource
    pub resource_name: String,
    /// Name of the device's profile
    pub profile_name: String,
    /// Value kind discriminator ("Int64", "Float64", "Binary", "Object", ...)
    pub value_type: String,
    /// Optional engineering units
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub units: Option<String>,
}

/// A reading whose value renders as a string
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimpleReading {
    /// Common reading fields
    #[serde(flatten)]
    pub base: BaseReading,
    /// String rendering of the sampled value
    pub value: String,
}

/// A reading carrying an opaque binary payload
///
/// The payload is cleared before persistence to bound memory; only the
/// media type survives storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BinaryReading {
    /// Common reading fields
    #[serde(flatten)]
    pub base: BaseReading,
    /// Raw payload bytes, base64 on the wire, emptied before storage
    #[serde(with = "base64_bytes", default, skip_serializing_if = "Vec::is_empty")]
    pub binary_value: Vec<u8>,
    /// MIME type of the payload
    pub media_type: String,
}

/// A reading carrying a structured value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectReading {
    /// Common reading fields
    #[serde(flatten)]
    pub base: BaseReading,
    /// Structured value
    pub object_value: serde_json::Value,
}

/// A device reading of any value kind
#[derive(Debug, Clone, PartialEq)]
pub enum Reading {
    /// String-rendered value
    Simple(SimpleReading),
    /// Binary payload
    Binary(BinaryReading),
    /// Structured value
    Object(ObjectReading),
}

impl Reading {
    /// Common fields of this reading
    pub fn base(&self) -> &BaseReading {
        match self {
            Reading::Simple(r) => &r.base,
            Reading::Binary(r) => &r.base,
            Reading::Object(r) => &r.base,
        }
    }

    /// Mutable common fields of this reading
    pub fn base_mut(&mut self) -> &mut BaseReading {
        match self {
            Reading::Simple(r) => &mut r.base,
            Reading::Binary(r) => &mut r.base,
            Reading::Object(r) => &mut r.base,
        }
    }

    /// Decode a persisted blob, dispatching once on the `valueType` field
    pub fn decode(blob: &[u8]) -> Result<Reading> {
        let value: serde_json::Value = serde_json::from_slice(blob).map_err(|e| {
            StoreError::Database(format!("reading format parsing failed from the database: {}", e))
        })?;
        Self::from_value(value)
    }

    /// Construct the matching variant from an already-parsed JSON document
    pub fn from_value(value: serde_json::Value) -> Result<Reading> {
        let value_type = value
            .get("valueType")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();

        let reading = match value_type.as_str() {
            VALUE_TYPE_BINARY => Reading::Binary(serde_json::from_value(value).map_err(|e| {
                StoreError::Database(format!("binary reading format parsing failed: {}", e))
            })?),
            VALUE_TYPE_OBJECT => Reading::Object(serde_json::from_value(value).map_err(|e| {
                StoreError::Database(format!("object reading format parsing failed: {}", e))
            })?),
            _ => Reading::Simple(serde_json::from_value(value).map_err(|e| {
                StoreError::Database(format!("simple reading format parsing failed: {}", e))
            })?),
        };

        Ok(reading)
    }

    /// Encode this reading for persistence
    pub fn encode(&self) -> Result<Vec<u8>> {
        let result = match self {
            Reading::Simple(r) => serde_json::to_vec(r),
            Reading::Binary(r) => serde_json::to_vec(r),
            Reading::Object(r) => serde_json::to_vec(r),
        };
        result.map_err(|e| StoreError::ContractInvalid(format!("reading parsing failed: {}", e)))
    }
}

impl Serialize for Reading {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Reading::Simple(r) => r.serialize(serializer),
            Reading::Binary(r) => r.serialize(serializer),
            Reading::Object(r) => r.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for Reading {
    fn deserialize<D: serde::Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        Reading::from_value(value).map_err(serde::de::Error::custom)
    }
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base(value_type: &str) -> BaseReading {
        BaseReading {
            id: "b5a9b0c1-51b9-46a9-a912-0e7c07b122a4".into(),
            origin: 1_700_000_000_000_000_000,
            device_name: "thermostat-01".into(),
            resource_name: "temperature".into(),
            profile_name: "thermostat".into(),
            value_type: value_type.into(),
            units: None,
        }
    }

    #[test]
    fn test_simple_reading_round_trip() {
        let reading = Reading::Simple(SimpleReading {
            base: base("Float64"),
            value: "21.5".into(),
        });

        let blob = reading.encode().unwrap();
        let decoded = Reading::decode(&blob).unwrap();
        assert_eq!(decoded, reading);
    }

    #[test]
    fn test_binary_reading_dispatch() {
        let reading = Reading::Binary(BinaryReading {
            base: base(VALUE_TYPE_BINARY),
            binary_value: Vec::new(),
            media_type: "image/jpeg".into(),
        });

        let blob = reading.encode().unwrap();
        let decoded = Reading::decode(&blob).unwrap();
        assert!(matches!(decoded, Reading::Binary(_)));
    }

    #[test]
    fn test_object_reading_dispatch() {
        let reading = Reading::Object(ObjectReading {
            base: base(VALUE_TYPE_OBJECT),
            object_value: serde_json::json!({"lat": 52.1, "lon": 4.3}),
        });

        let blob = reading.encode().unwrap();
        let decoded = Reading::decode(&blob).unwrap();
        match decoded {
            Reading::Object(r) => assert_eq!(r.object_value["lat"], serde_json::json!(52.1)),
            other => panic!("expected object reading, got {:?}", other),
        }
    }

    #[test]
    fn test_binary_payload_is_base64_on_the_wire() {
        let reading = BinaryReading {
            base: base(VALUE_TYPE_BINARY),
            binary_value: vec![0xde, 0xad, 0xbe, 0xef],
            media_type: "application/octet-stream".into(),
        };

        let json = serde_json::to_string(&reading).unwrap();
        assert!(json.contains("3q2+7w=="));

        let parsed: BinaryReading = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.binary_value, vec![0xde, 0xad, 0xbe, 0xef]);
    }

    #[test]
    fn test_unknown_value_type_falls_back_to_simple() {
        let json = serde_json::json!({
            "id": "b5a9b0c1-51b9-46a9-a912-0e7c07b122a4",
            "origin": 1,
            "deviceName": "d",
            "resourceName": "r",
            "profileName": "p",
            "valueType": "Int32",
            "value": "7"
        });
        let decoded = Reading::from_value(json).unwrap();
        assert!(matches!(decoded, Reading::Simple(_)));
    }
}
