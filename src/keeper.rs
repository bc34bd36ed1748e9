//! Hierarchical configuration namespace ("Keeper")
//!
//! A path like `a/b/c` is stored under the colon-joined key `kp|kv:a:b:c`.
//! Interior path segments are hash nodes whose fields point at their
//! children's full storage keys; leaf segments are string nodes holding a
//! [`StoredData`] wrapper. The root collection hash `kp|kv` anchors the
//! top-level segments.
//!
//! ```text
//! kp|kv                  → HASH  { "core-data" → "kp|kv:core-data" }
//! kp|kv:core-data        → HASH  { "Writable" → "kp|kv:core-data:Writable" }
//! kp|kv:core-data:Writable → HASH { "LogLevel" → "...:LogLevel" }
//! kp|kv:core-data:Writable:LogLevel → STRING (StoredData JSON)
//! ```
//!
//! All traversals are explicit loops over pre-split segment lists or work
//! stacks; path depth never grows the call stack.

use redis::aio::MultiplexedConnection;

use crate::command::{self, Command};
use crate::error::{Result, StoreError};
use crate::keys::{db_key_to_path, make_key, path_to_db_key, DB_KEY_SEPARATOR};
use crate::model::{make_timestamp, Kv, KvItem, StoredData};
use crate::query::{self, KeyType};
use crate::store::Store;

/// Root collection of the hierarchical namespace
pub const KV_COLLECTION: &str = "kp|kv";

fn kv_stored_key(db_key: &str) -> String {
    make_key(&[KV_COLLECTION, db_key])
}

/// The externally addressable part of a storage key (everything after the
/// collection prefix)
fn query_key_of(stored_key: &str) -> Result<&str> {
    stored_key
        .strip_prefix(KV_COLLECTION)
        .and_then(|rest| rest.strip_prefix(DB_KEY_SEPARATOR))
        .ok_or_else(|| StoreError::Database(format!("retrieve query key from {} failed", stored_key)))
}

/// Commands creating every missing ancestor of `db_key`, leaf to root
///
/// For `a:b:c:d` this adds hash fields on `a:b:c`, `a:b`, `a`, and finally
/// the root collection, each with only-if-absent semantics so existing
/// siblings are untouched.
pub fn upper_level_key_commands(db_key: &str) -> Vec<Command> {
    let segments: Vec<&str> = db_key.split(DB_KEY_SEPARATOR).collect();
    let mut commands = Vec::with_capacity(segments.len());

    for depth in (1..=segments.len()).rev() {
        let child = segments[..depth].join(DB_KEY_SEPARATOR);
        if depth > 1 {
            let parent = segments[..depth - 1].join(DB_KEY_SEPARATOR);
            commands.push(Command::HSetNx {
                key: kv_stored_key(&parent),
                field: segments[depth - 1].to_string(),
                value: kv_stored_key(&child),
            });
        } else {
            commands.push(Command::HSetNx {
                key: KV_COLLECTION.to_string(),
                field: segments[0].to_string(),
                value: kv_stored_key(&child),
            });
        }
    }
    commands
}

/// Commands storing `value` under `stored_key`, flattening nested objects
///
/// Objects become hash nodes with one field per property; scalars and
/// arrays become [`StoredData`] leaves. Empty objects are skipped entirely
/// (no field is added for them). Returns the commands plus the storage keys
/// of every leaf written.
pub fn create_value_commands(
    stored_key: &str,
    value: &serde_json::Value,
    now: i64,
) -> Result<(Vec<Command>, Vec<String>)> {
    let mut commands = Vec::new();
    let mut written = Vec::new();
    let mut stack: Vec<(String, &serde_json::Value)> = vec![(stored_key.to_string(), value)];

    while let Some((key, val)) = stack.pop() {
        match val {
            serde_json::Value::Object(map) => {
                // Reverse so the LIFO stack visits properties in key order
                for (inner_key, element) in map.iter().rev() {
                    if matches!(element, serde_json::Value::Object(inner) if inner.is_empty()) {
                        continue;
                    }
                    let child_key = make_key(&[&key, inner_key]);
                    commands.push(Command::HSet {
                        key: key.clone(),
                        field: inner_key.clone(),
                        value: child_key.clone(),
                    });
                    stack.push((child_key, element));
                }
            }
            serde_json::Value::String(s) => {
                written.push(push_leaf(&mut commands, &key, s.as_bytes(), now)?);
            }
            serde_json::Value::Bool(_) | serde_json::Value::Number(_) => {
                written.push(push_leaf(&mut commands, &key, val.to_string().as_bytes(), now)?);
            }
            serde_json::Value::Array(_) => {
                let rendered = serde_json::to_string(val).map_err(|e| {
                    StoreError::ContractInvalid(format!("unable to encode key {}: {}", key, e))
                })?;
                written.push(push_leaf(&mut commands, &key, rendered.as_bytes(), now)?);
            }
            serde_json::Value::Null => {
                return Err(StoreError::ContractInvalid(format!(
                    "unsupported data type of key {}",
                    key
                )));
            }
        }
    }

    Ok((commands, written))
}

fn push_leaf(commands: &mut Vec<Command>, key: &str, raw: &[u8], now: i64) -> Result<String> {
    let wrapped = StoredData::wrap(raw, now);
    let blob = serde_json::to_vec(&wrapped).map_err(|e| {
        StoreError::ContractInvalid(format!("unable to JSON marshal value of key {}: {}", key, e))
    })?;
    commands.push(Command::Set {
        key: key.to_string(),
        value: blob,
    });
    query_key_of(key).map(str::to_string)
}

/// Store a value at `path`, creating missing ancestors
///
/// With `flatten` set, a nested object becomes one addressable node per
/// field; otherwise the whole object is serialized into a single leaf.
/// Writing a non-object over an existing interior node is rejected: a
/// subtree cannot silently collapse into a scalar.
pub async fn add_keys(
    conn: &mut MultiplexedConnection,
    path: &str,
    value: serde_json::Value,
    flatten: bool,
) -> Result<Vec<String>> {
    let db_key = validated_db_key(path)?;
    let stored_key = kv_stored_key(&db_key);

    if query::object_id_exists(conn, &stored_key).await?
        && query::key_type(conn, &stored_key).await? == KeyType::Hash
        && !value.is_object()
    {
        return Err(StoreError::ContractInvalid(format!(
            "update key {} failed since child keys already exist",
            path
        )));
    }

    let mut commands = upper_level_key_commands(&db_key);
    let now = make_timestamp();

    let written = if flatten {
        let (value_commands, written) = create_value_commands(&stored_key, &value, now)?;
        commands.extend(value_commands);
        written
    } else {
        // Unflattened objects are stored as one serialized leaf
        let stored_value = match &value {
            serde_json::Value::Object(map) => {
                let rendered = serde_json::to_string(map).map_err(|e| {
                    StoreError::ContractInvalid(format!(
                        "unable to JSON marshal value of key {}: {}",
                        path, e
                    ))
                })?;
                serde_json::Value::String(rendered)
            }
            other => other.clone(),
        };
        let (value_commands, written) = create_value_commands(&stored_key, &stored_value, now)?;
        commands.extend(value_commands);
        written
    };

    command::execute(conn, &commands, "keeper key creation").await?;

    Ok(written.iter().map(|key| db_key_to_path(key)).collect())
}

/// Read the value(s) stored at `path`
///
/// A leaf returns its single wrapped value; an interior node expands every
/// descendant leaf, depth-first in field order. With `key_only`, only the
/// leaf key names are returned; with `raw`, leaf payloads are base64-decoded.
pub async fn get_keys(
    conn: &mut MultiplexedConnection,
    path: &str,
    key_only: bool,
    raw: bool,
) -> Result<Vec<KvItem>> {
    let db_key = validated_db_key(path)?;
    let stored_key = kv_stored_key(&db_key);

    if query::key_type(conn, &stored_key).await? == KeyType::None {
        return Err(StoreError::NotFound(format!("query key {} does not exist", path)));
    }

    let mut items = Vec::new();
    let mut stack: Vec<String> = vec![stored_key];

    while let Some(key) = stack.pop() {
        match query::key_type(conn, &key).await? {
            KeyType::String => {
                let external_key = db_key_to_path(query_key_of(&key)?);
                if key_only {
                    items.push(KvItem::Key(external_key));
                    continue;
                }

                let blob = query::object_by_id_raw(conn, &key).await?;
                let stored: StoredData = serde_json::from_slice(&blob).map_err(|e| {
                    StoreError::Database(format!(
                        "keeper value format parsing failed from the database: {}",
                        e
                    ))
                })?;

                let rendered = if raw {
                    let decoded = stored.decode_value().ok_or_else(|| {
                        StoreError::Database(format!("base64 decoding of key {} failed", external_key))
                    })?;
                    String::from_utf8_lossy(&decoded).into_owned()
                } else {
                    stored.value.clone()
                };

                items.push(KvItem::Pair(Kv {
                    key: external_key,
                    value: rendered,
                    created: stored.created,
                    modified: stored.modified,
                }));
            }
            KeyType::Hash => {
                // Reverse so the LIFO stack yields children in field order
                let fields = query::hash_fields(conn, &key).await?;
                for (_, child_key) in fields.into_iter().rev() {
                    stack.push(child_key);
                }
            }
            // A child that vanished mid-walk is skipped
            KeyType::None => {}
            KeyType::Other => {
                return Err(StoreError::Database(format!(
                    "unexpected key type under {}",
                    path
                )));
            }
        }
    }

    Ok(items)
}

enum DeleteWork {
    Visit(String),
    RemoveField { key: String, field: String },
}

/// Delete the key at `path`
///
/// A leaf is removed directly. An interior node is only removed with
/// `prefix_match`, deleting every descendant; without it the call fails
/// with a conflict. After the removal, empty ancestor hashes are pruned
/// bottom-up until an ancestor still has other children.
pub async fn delete_keys(
    conn: &mut MultiplexedConnection,
    path: &str,
    prefix_match: bool,
) -> Result<Vec<String>> {
    let db_key = validated_db_key(path)?;
    let stored_key = kv_stored_key(&db_key);

    if !query::object_id_exists(conn, &stored_key).await? {
        return Err(StoreError::NotFound(format!("query key {} does not exist", path)));
    }

    let mut deleted = Vec::new();
    let mut stack: Vec<DeleteWork> = vec![DeleteWork::Visit(stored_key)];

    while let Some(work) = stack.pop() {
        match work {
            DeleteWork::Visit(key) => match query::key_type(conn, &key).await? {
                KeyType::String => {
                    let external_key = db_key_to_path(query_key_of(&key)?);
                    redis::cmd("DEL")
                        .arg(&key)
                        .query_async::<()>(conn)
                        .await
                        .map_err(|e| {
                            StoreError::Database(format!("key {} deletion failed: {}", key, e))
                        })?;
                    deleted.push(external_key);
                }
                KeyType::Hash => {
                    if !prefix_match {
                        return Err(StoreError::StatusConflict(format!(
                            "keys with the prefix {} exist and cannot be deleted",
                            path
                        )));
                    }
                    let fields = query::hash_fields(conn, &key).await?;
                    for (field, child_key) in fields.into_iter().rev() {
                        // Visit the child first, then drop its field
                        stack.push(DeleteWork::RemoveField {
                            key: key.clone(),
                            field,
                        });
                        stack.push(DeleteWork::Visit(child_key));
                    }
                }
                KeyType::None => {}
                KeyType::Other => {
                    return Err(StoreError::Database(format!(
                        "unexpected key type under {}",
                        path
                    )));
                }
            },
            DeleteWork::RemoveField { key, field } => {
                redis::cmd("HDEL")
                    .arg(&key)
                    .arg(&field)
                    .query_async::<()>(conn)
                    .await
                    .map_err(|e| {
                        StoreError::Database(format!(
                            "hash field {} in key {} deletion failed: {}",
                            field, key, e
                        ))
                    })?;
            }
        }
    }

    prune_upper_levels(conn, &db_key).await?;

    Ok(deleted)
}

/// Remove the deleted key's field from its ancestors, pruning each ancestor
/// that becomes empty, stopping at the first one that still has children
async fn prune_upper_levels(conn: &mut MultiplexedConnection, db_key: &str) -> Result<()> {
    let segments: Vec<&str> = db_key.split(DB_KEY_SEPARATOR).collect();

    for depth in (1..=segments.len()).rev() {
        let field = segments[depth - 1];
        let parent_key = if depth > 1 {
            kv_stored_key(&segments[..depth - 1].join(DB_KEY_SEPARATOR))
        } else {
            KV_COLLECTION.to_string()
        };

        redis::cmd("HDEL")
            .arg(&parent_key)
            .arg(field)
            .query_async::<()>(conn)
            .await
            .map_err(|e| {
                StoreError::Database(format!(
                    "delete hash field {} of key {} failed: {}",
                    field, parent_key, e
                ))
            })?;

        // The root collection hash is never deleted itself
        if depth > 1 && query::hash_len(conn, &parent_key).await? != 0 {
            break;
        }
    }
    Ok(())
}

fn validated_db_key(path: &str) -> Result<String> {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        return Err(StoreError::ContractInvalid("key path must not be empty".into()));
    }
    if trimmed.contains(DB_KEY_SEPARATOR) {
        return Err(StoreError::ContractInvalid(format!(
            "key path {} must not contain the reserved separator '{}'",
            path, DB_KEY_SEPARATOR
        )));
    }
    Ok(path_to_db_key(trimmed))
}

impl Store {
    /// Read the value(s) stored at `path` or beneath it
    pub async fn get_kv_keys(&self, path: &str, key_only: bool, raw: bool) -> Result<Vec<KvItem>> {
        let mut conn = self.conn().await?;
        get_keys(&mut conn, path, key_only, raw).await
    }

    /// Store a value at `path`; returns the keys written
    pub async fn add_kv_keys(
        &self,
        path: &str,
        value: serde_json::Value,
        flatten: bool,
    ) -> Result<Vec<String>> {
        let mut conn = self.conn().await?;
        add_keys(&mut conn, path, value, flatten).await
    }

    /// Delete `path` (with `prefix_match`, the whole subtree); returns the
    /// keys removed
    pub async fn delete_kv_keys(&self, path: &str, prefix_match: bool) -> Result<Vec<String>> {
        let mut conn = self.conn().await?;
        delete_keys(&mut conn, path, prefix_match).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upper_level_commands_walk_to_root() {
        let commands = upper_level_key_commands("a:b:c");
        assert_eq!(commands.len(), 3);

        assert_eq!(
            commands[0],
            Command::HSetNx {
                key: "kp|kv:a:b".into(),
                field: "c".into(),
                value: "kp|kv:a:b:c".into(),
            }
        );
        assert_eq!(
            commands[1],
            Command::HSetNx {
                key: "kp|kv:a".into(),
                field: "b".into(),
                value: "kp|kv:a:b".into(),
            }
        );
        assert_eq!(
            commands[2],
            Command::HSetNx {
                key: "kp|kv".into(),
                field: "a".into(),
                value: "kp|kv:a".into(),
            }
        );
    }

    #[test]
    fn test_upper_level_commands_single_segment() {
        let commands = upper_level_key_commands("svc");
        assert_eq!(commands.len(), 1);
        assert_eq!(
            commands[0],
            Command::HSetNx {
                key: "kp|kv".into(),
                field: "svc".into(),
                value: "kp|kv:svc".into(),
            }
        );
    }

    #[test]
    fn test_create_value_commands_scalar_leaf() {
        let (commands, written) =
            create_value_commands("kp|kv:svc:LogLevel", &serde_json::json!("DEBUG"), 7).unwrap();
        assert_eq!(commands.len(), 1);
        assert_eq!(written, vec!["svc:LogLevel".to_string()]);

        match &commands[0] {
            Command::Set { key, value } => {
                assert_eq!(key, "kp|kv:svc:LogLevel");
                let stored: StoredData = serde_json::from_slice(value).unwrap();
                assert_eq!(stored.decode_value().unwrap(), b"DEBUG");
                assert_eq!(stored.created, 7);
            }
            other => panic!("expected SET, got {:?}", other),
        }
    }

    #[test]
    fn test_create_value_commands_flatten_object() {
        let value = serde_json::json!({
            "Writable": { "LogLevel": "INFO" },
            "Port": 59880
        });
        let (commands, mut written) = create_value_commands("kp|kv:svc", &value, 7).unwrap();

        // HSET svc→Port, HSET svc→Writable, HSET Writable→LogLevel, 2 SETs
        assert_eq!(commands.len(), 5);
        written.sort();
        assert_eq!(written, vec!["svc:Port".to_string(), "svc:Writable:LogLevel".to_string()]);

        assert!(commands.iter().any(|c| matches!(c, Command::HSet { key, field, value }
            if key == "kp|kv:svc" && field == "Writable" && value == "kp|kv:svc:Writable")));
        assert!(commands.iter().any(|c| matches!(c, Command::HSet { key, field, .. }
            if key == "kp|kv:svc:Writable" && field == "LogLevel")));
    }

    #[test]
    fn test_create_value_commands_skips_empty_objects() {
        let value = serde_json::json!({ "Empty": {}, "Kept": "v" });
        let (commands, written) = create_value_commands("kp|kv:svc", &value, 7).unwrap();

        assert!(!commands.iter().any(|c| matches!(c, Command::HSet { field, .. }
            if field == "Empty")));
        assert_eq!(written, vec!["svc:Kept".to_string()]);
    }

    #[test]
    fn test_create_value_commands_array_leaf() {
        let (commands, _) =
            create_value_commands("kp|kv:svc:hosts", &serde_json::json!(["a", "b"]), 7).unwrap();
        match &commands[0] {
            Command::Set { value, .. } => {
                let stored: StoredData = serde_json::from_slice(value).unwrap();
                assert_eq!(stored.decode_value().unwrap(), br#"["a","b"]"#);
            }
            other => panic!("expected SET, got {:?}", other),
        }
    }

    #[test]
    fn test_create_value_commands_rejects_null() {
        let err = create_value_commands("kp|kv:svc", &serde_json::Value::Null, 7).unwrap_err();
        assert!(matches!(err, StoreError::ContractInvalid(_)));
    }

    #[test]
    fn test_validated_db_key() {
        assert_eq!(validated_db_key("a/b/c").unwrap(), "a:b:c");
        assert_eq!(validated_db_key("/a/b/").unwrap(), "a:b");
        assert!(validated_db_key("").is_err());
        assert!(validated_db_key("a/b:c").is_err());
    }
}
