//! Hierarchical KV node wrappers

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

/// Persisted leaf wrapper: the raw value plus its timestamps
///
/// The payload is stored base64-encoded inside the JSON blob so that any
/// byte sequence survives the trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredData {
    /// Creation time, Unix milliseconds, set once
    pub created: i64,
    /// Last write time, Unix milliseconds
    pub modified: i64,
    /// Base64-encoded raw value
    pub value: String,
}

impl StoredData {
    /// Wrap a raw value, stamping both timestamps with `now`
    pub fn wrap(raw: &[u8], now: i64) -> Self {
        Self {
            created: now,
            modified: now,
            value: STANDARD.encode(raw),
        }
    }

    /// Decode the base64 payload back to raw bytes
    pub fn decode_value(&self) -> Option<Vec<u8>> {
        STANDARD.decode(self.value.as_bytes()).ok()
    }
}

/// A resolved key/value pair returned from a hierarchy read
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Kv {
    /// Full external key path, "/"-delimited
    pub key: String,
    /// Leaf value: the base64 text by default, or the decoded raw string in
    /// raw mode
    pub value: String,
    /// Creation time, Unix milliseconds
    pub created: i64,
    /// Last write time, Unix milliseconds
    pub modified: i64,
}

/// One element of a hierarchy read result
#[derive(Debug, Clone, PartialEq)]
pub enum KvItem {
    /// A resolved leaf (non-key-only mode)
    Pair(Kv),
    /// A bare key name (key-only mode)
    Key(String),
}

impl KvItem {
    /// The key of this item regardless of mode
    pub fn key(&self) -> &str {
        match self {
            KvItem::Pair(kv) => &kv.key,
            KvItem::Key(k) => k,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stored_data_wrap_and_decode() {
        let data = StoredData::wrap(b"debug", 1_700_000_000_000);
        assert_eq!(data.value, "ZGVidWc=");
        assert_eq!(data.decode_value().unwrap(), b"debug");
        assert_eq!(data.created, data.modified);
    }

    #[test]
    fn test_stored_data_round_trip() {
        let data = StoredData::wrap(b"[1,2,3]", 7);
        let json = serde_json::to_string(&data).unwrap();
        let parsed: StoredData = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, data);
    }

    #[test]
    fn test_kv_item_key_accessor() {
        let pair = KvItem::Pair(Kv {
            key: "svc/group/key".into(),
            value: "dg==".into(),
            created: 1,
            modified: 1,
        });
        assert_eq!(pair.key(), "svc/group/key");

        let key = KvItem::Key("svc/group".into());
        assert_eq!(key.key(), "svc/group");
    }
}
