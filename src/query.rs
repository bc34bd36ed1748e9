//! Object store and query engine primitives
//!
//! Everything here operates on borrowed connections and returns serialized
//! blobs; entity modules decode them with their own decoders. Pagination
//! follows one protocol everywhere: a limit of 0 returns an empty result
//! without touching the range command, a limit of -1 means "all remaining
//! from offset", and an offset beyond the member count fails with
//! `RangeNotSatisfiable` (checked with a count command before the windowed
//! fetch).

use redis::aio::MultiplexedConnection;
use std::collections::HashSet;
use uuid::Uuid;

use crate::error::{Result, StoreError};
use crate::keys::make_key;

/// Backing-engine type of a key, for hierarchy node dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyType {
    /// String-valued leaf
    String,
    /// Hash-valued interior node
    Hash,
    /// Key absent
    None,
    /// Any other engine type
    Other,
}

/// Fetch a serialized blob by stored key
pub async fn object_by_id_raw(
    conn: &mut MultiplexedConnection,
    stored_key: &str,
) -> Result<Vec<u8>> {
    let blob: Option<Vec<u8>> = redis::cmd("GET")
        .arg(stored_key)
        .query_async(conn)
        .await
        .map_err(|e| StoreError::Database(format!("query object by id failed: {}", e)))?;

    blob.ok_or_else(|| {
        StoreError::NotFound(format!("id {} does not exist in the database", stored_key))
    })
}

/// Fetch and decode an entity by stored key
pub async fn object_by_id<T: serde::de::DeserializeOwned>(
    conn: &mut MultiplexedConnection,
    stored_key: &str,
) -> Result<T> {
    let blob = object_by_id_raw(conn, stored_key).await?;
    serde_json::from_slice(&blob).map_err(|e| {
        StoreError::Database(format!("object format parsing failed from the database: {}", e))
    })
}

/// Resolve a stored key from a name hash
///
/// Two hops: the hash maps name -> stored key, then the caller fetches by
/// that key. A stale hash entry (pointing at a deleted id) surfaces as
/// `NotFound` from the second hop rather than an empty success.
pub async fn stored_key_by_name(
    conn: &mut MultiplexedConnection,
    hash_key: &str,
    name: &str,
) -> Result<String> {
    let stored_key: Option<String> = redis::cmd("HGET")
        .arg(hash_key)
        .arg(name)
        .query_async(conn)
        .await
        .map_err(|e| StoreError::Database(format!("query {} from the database failed: {}", name, e)))?;

    stored_key.ok_or_else(|| {
        StoreError::NotFound(format!("name {} does not exist in the database", name))
    })
}

/// Fetch and decode an entity through its name hash
pub async fn object_by_name<T: serde::de::DeserializeOwned>(
    conn: &mut MultiplexedConnection,
    hash_key: &str,
    name: &str,
) -> Result<T> {
    let stored_key = stored_key_by_name(conn, hash_key, name).await?;
    object_by_id(conn, &stored_key).await
}

/// Check whether an object exists by stored key
pub async fn object_id_exists(conn: &mut MultiplexedConnection, stored_key: &str) -> Result<bool> {
    let exists: bool = redis::cmd("EXISTS")
        .arg(stored_key)
        .query_async(conn)
        .await
        .map_err(|e| StoreError::Database(format!("object id existence check failed: {}", e)))?;
    Ok(exists)
}

/// Check whether a name is present in a name hash
pub async fn object_name_exists(
    conn: &mut MultiplexedConnection,
    hash_key: &str,
    name: &str,
) -> Result<bool> {
    let exists: bool = redis::cmd("HEXISTS")
        .arg(hash_key)
        .arg(name)
        .query_async(conn)
        .await
        .map_err(|e| StoreError::Database(format!("object name existence check failed: {}", e)))?;
    Ok(exists)
}

/// Fetch blobs for a list of stored keys, skipping keys that vanished
pub async fn objects_by_ids(
    conn: &mut MultiplexedConnection,
    stored_keys: &[String],
) -> Result<Vec<Vec<u8>>> {
    if stored_keys.is_empty() {
        return Ok(Vec::new());
    }

    let blobs: Vec<Option<Vec<u8>>> = redis::cmd("MGET")
        .arg(stored_keys)
        .query_async(conn)
        .await
        .map_err(|e| StoreError::Database(format!("query objects from database failed: {}", e)))?;

    Ok(blobs.into_iter().flatten().collect())
}

/// Range a sorted set in ascending score order with offset/limit
pub async fn objects_by_range(
    conn: &mut MultiplexedConnection,
    key: &str,
    offset: usize,
    limit: i64,
) -> Result<Vec<Vec<u8>>> {
    objects_by_some_range(conn, key, offset, limit, false).await
}

/// Range a sorted set in descending score order (most recent first)
pub async fn objects_by_rev_range(
    conn: &mut MultiplexedConnection,
    key: &str,
    offset: usize,
    limit: i64,
) -> Result<Vec<Vec<u8>>> {
    objects_by_some_range(conn, key, offset, limit, true).await
}

async fn objects_by_some_range(
    conn: &mut MultiplexedConnection,
    key: &str,
    offset: usize,
    limit: i64,
    reverse: bool,
) -> Result<Vec<Vec<u8>>> {
    if limit == 0 {
        return Ok(Vec::new());
    }

    let count = member_count(conn, key).await? as usize;
    if offset > count {
        return Err(StoreError::RangeNotSatisfiable { offset, count });
    }
    if count == 0 {
        return Ok(Vec::new());
    }

    let end: i64 = if limit == -1 {
        -1
    } else {
        offset as i64 + limit - 1
    };

    let command = if reverse { "ZREVRANGE" } else { "ZRANGE" };
    let stored_keys: Vec<String> = redis::cmd(command)
        .arg(key)
        .arg(offset as i64)
        .arg(end)
        .query_async(conn)
        .await
        .map_err(|e| StoreError::Database(format!("query object ids from database failed: {}", e)))?;

    objects_by_ids(conn, &stored_keys).await
}

/// Range a sorted set by score window, most recently scored first
pub async fn objects_by_score_range(
    conn: &mut MultiplexedConnection,
    key: &str,
    min: i64,
    max: i64,
    offset: usize,
    limit: i64,
) -> Result<Vec<Vec<u8>>> {
    if limit == 0 {
        return Ok(Vec::new());
    }

    let count = member_count_by_score_range(conn, key, min, max).await? as usize;
    if offset > count {
        return Err(StoreError::RangeNotSatisfiable { offset, count });
    }
    if count == 0 {
        return Ok(Vec::new());
    }

    let stored_keys: Vec<String> = redis::cmd("ZREVRANGEBYSCORE")
        .arg(key)
        .arg(max)
        .arg(min)
        .arg("LIMIT")
        .arg(offset as i64)
        .arg(limit)
        .query_async(conn)
        .await
        .map_err(|e| {
            StoreError::Database(format!("query object ids by score range failed: {}", e))
        })?;

    objects_by_ids(conn, &stored_keys).await
}

/// Range a collection filtered to members carrying every listed label
///
/// Label AND-semantics: each label's full id set is fetched, the running
/// result is intersected left to right preserving order, and offset/limit
/// apply to the intersected list.
pub async fn objects_by_labels_rev_range(
    conn: &mut MultiplexedConnection,
    collection_key: &str,
    labels: &[String],
    offset: usize,
    limit: i64,
) -> Result<Vec<Vec<u8>>> {
    if labels.is_empty() {
        return objects_by_rev_range(conn, collection_key, offset, limit).await;
    }
    if limit == 0 {
        return Ok(Vec::new());
    }

    let mut id_sets: Vec<Vec<String>> = Vec::with_capacity(labels.len());
    for label in labels {
        let label_key = make_key(&[collection_key, "label", label]);
        let ids: Vec<String> = redis::cmd("ZREVRANGE")
            .arg(&label_key)
            .arg(0)
            .arg(-1)
            .query_async(conn)
            .await
            .map_err(|e| {
                StoreError::Database(format!(
                    "query object ids by label {} from database failed: {}",
                    label, e
                ))
            })?;
        id_sets.push(ids);
    }

    let common = find_common_ids(id_sets);
    let windowed = slice_window(common, offset, limit)?;
    objects_by_ids(conn, &windowed).await
}

/// Member count of a sorted set
pub async fn member_count(conn: &mut MultiplexedConnection, key: &str) -> Result<u32> {
    let count: i64 = redis::cmd("ZCARD")
        .arg(key)
        .query_async(conn)
        .await
        .map_err(|e| StoreError::Database(format!("failed to get member count of {}: {}", key, e)))?;
    Ok(count as u32)
}

/// Member count of a sorted set within a score window
pub async fn member_count_by_score_range(
    conn: &mut MultiplexedConnection,
    key: &str,
    min: i64,
    max: i64,
) -> Result<u32> {
    let count: i64 = redis::cmd("ZCOUNT")
        .arg(key)
        .arg(min)
        .arg(max)
        .query_async(conn)
        .await
        .map_err(|e| {
            StoreError::Database(format!(
                "failed to get member count of {} between {} and {}: {}",
                key, min, max, e
            ))
        })?;
    Ok(count as u32)
}

/// Member count of a collection filtered to members carrying every label
pub async fn member_count_by_labels(
    conn: &mut MultiplexedConnection,
    collection_key: &str,
    labels: &[String],
) -> Result<u32> {
    if labels.is_empty() {
        return member_count(conn, collection_key).await;
    }

    let mut id_sets: Vec<Vec<String>> = Vec::with_capacity(labels.len());
    for label in labels {
        let label_key = make_key(&[collection_key, "label", label]);
        let ids: Vec<String> = redis::cmd("ZREVRANGE")
            .arg(&label_key)
            .arg(0)
            .arg(-1)
            .query_async(conn)
            .await
            .map_err(|e| {
                StoreError::Database(format!(
                    "query object ids by label {} from database failed: {}",
                    label, e
                ))
            })?;
        id_sets.push(ids);
    }

    Ok(find_common_ids(id_sets).len() as u32)
}

/// All member stored keys of a sorted set, ascending score order
pub async fn ids_by_range_all(conn: &mut MultiplexedConnection, key: &str) -> Result<Vec<String>> {
    let ids: Vec<String> = redis::cmd("ZRANGE")
        .arg(key)
        .arg(0)
        .arg(-1)
        .query_async(conn)
        .await
        .map_err(|e| StoreError::Database(format!("retrieve ids under {} failed: {}", key, e)))?;
    Ok(ids)
}

/// Member stored keys within a score window, ascending score order
pub async fn ids_by_score_range(
    conn: &mut MultiplexedConnection,
    key: &str,
    min: i64,
    max: i64,
) -> Result<Vec<String>> {
    let ids: Vec<String> = redis::cmd("ZRANGEBYSCORE")
        .arg(key)
        .arg(min)
        .arg(max)
        .query_async(conn)
        .await
        .map_err(|e| StoreError::Database(format!("retrieve ids by key {} failed: {}", key, e)))?;
    Ok(ids)
}

/// Objects in the union of the given sorted sets (OR-semantics), windowed
pub async fn union_objects_by_keys(
    conn: &mut MultiplexedConnection,
    offset: usize,
    limit: i64,
    keys: &[String],
) -> Result<Vec<Vec<u8>>> {
    objects_by_set_op(conn, "ZUNIONSTORE", offset, limit, keys).await
}

/// Objects in the intersection of the given sorted sets (AND-semantics), windowed
pub async fn intersect_objects_by_keys(
    conn: &mut MultiplexedConnection,
    offset: usize,
    limit: i64,
    keys: &[String],
) -> Result<Vec<Vec<u8>>> {
    objects_by_set_op(conn, "ZINTERSTORE", offset, limit, keys).await
}

/// Compose N sorted sets into an unpredictable temporary key, range the
/// result, and delete the temporary key. The random name keeps concurrent
/// queries from colliding.
async fn objects_by_set_op(
    conn: &mut MultiplexedConnection,
    set_op: &str,
    offset: usize,
    limit: i64,
    keys: &[String],
) -> Result<Vec<Vec<u8>>> {
    if limit == 0 {
        return Ok(Vec::new());
    }

    let cache_set = Uuid::new_v4().to_string();
    redis::cmd(set_op)
        .arg(&cache_set)
        .arg(keys.len())
        .arg(keys)
        .query_async::<()>(conn)
        .await
        .map_err(|e| StoreError::Database(format!("failed to execute {} command: {}", set_op, e)))?;

    let result = async {
        let store_keys: Vec<String> = redis::cmd("ZREVRANGE")
            .arg(&cache_set)
            .arg(0)
            .arg(-1)
            .query_async(conn)
            .await
            .map_err(|e| StoreError::Database(format!("failed to query store keys: {}", e)))?;

        let windowed = slice_window(store_keys, offset, limit)?;
        objects_by_ids(conn, &windowed).await
    }
    .await;

    delete_temp_set(conn, &cache_set).await?;
    result
}

/// Objects in the union of the given sorted sets within a score window,
/// plus the total count of the window before offset/limit apply
pub async fn union_objects_by_keys_and_score_range(
    conn: &mut MultiplexedConnection,
    min: i64,
    max: i64,
    offset: usize,
    limit: i64,
    keys: &[String],
) -> Result<(Vec<Vec<u8>>, u32)> {
    let cache_set = Uuid::new_v4().to_string();
    redis::cmd("ZUNIONSTORE")
        .arg(&cache_set)
        .arg(keys.len())
        .arg(keys)
        .query_async::<()>(conn)
        .await
        .map_err(|e| {
            StoreError::Database(format!("failed to execute ZUNIONSTORE command: {}", e))
        })?;

    let result = async {
        let total = member_count_by_score_range(conn, &cache_set, min, max).await?;
        let objects = objects_by_score_range(conn, &cache_set, min, max, offset, limit).await?;
        Ok((objects, total))
    }
    .await;

    delete_temp_set(conn, &cache_set).await?;
    result
}

async fn delete_temp_set(conn: &mut MultiplexedConnection, cache_set: &str) -> Result<()> {
    redis::cmd("DEL")
        .arg(cache_set)
        .query_async::<()>(conn)
        .await
        .map_err(|e| StoreError::Database(format!("cache set deletion failed: {}", e)))
}

/// Engine type of a key
pub async fn key_type(conn: &mut MultiplexedConnection, key: &str) -> Result<KeyType> {
    let type_name: String = redis::cmd("TYPE")
        .arg(key)
        .query_async(conn)
        .await
        .map_err(|e| StoreError::Database(format!("key type check of {} failed: {}", key, e)))?;

    Ok(match type_name.as_str() {
        "string" => KeyType::String,
        "hash" => KeyType::Hash,
        "none" => KeyType::None,
        _ => KeyType::Other,
    })
}

/// All fields of a hash, sorted by field name for deterministic traversal
pub async fn hash_fields(
    conn: &mut MultiplexedConnection,
    key: &str,
) -> Result<Vec<(String, String)>> {
    let mut fields: Vec<(String, String)> = redis::cmd("HGETALL")
        .arg(key)
        .query_async::<std::collections::HashMap<String, String>>(conn)
        .await
        .map_err(|e| StoreError::Database(format!("retrieve hash fields of {} failed: {}", key, e)))?
        .into_iter()
        .collect();
    fields.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(fields)
}

/// Number of fields in a hash
pub async fn hash_len(conn: &mut MultiplexedConnection, key: &str) -> Result<usize> {
    let len: i64 = redis::cmd("HLEN")
        .arg(key)
        .query_async(conn)
        .await
        .map_err(|e| StoreError::Database(format!("check the length of hash {} failed: {}", key, e)))?;
    Ok(len as usize)
}

/// Order-preserving intersection of id sets, folded left to right
///
/// The first set fixes the output order; each later set only filters.
pub fn find_common_ids(id_sets: Vec<Vec<String>>) -> Vec<String> {
    let mut iter = id_sets.into_iter();
    let mut common = match iter.next() {
        Some(first) => first,
        None => return Vec::new(),
    };

    for set in iter {
        let members: HashSet<&str> = set.iter().map(|s| s.as_str()).collect();
        common.retain(|id| members.contains(id.as_str()));
        if common.is_empty() {
            break;
        }
    }

    common
}

/// Apply the shared offset/limit window to an id list
///
/// Same satisfiability protocol as the range commands: offset beyond the
/// list fails, limit -1 takes everything after offset.
pub fn slice_window(ids: Vec<String>, offset: usize, limit: i64) -> Result<Vec<String>> {
    let count = ids.len();
    if offset > count {
        return Err(StoreError::RangeNotSatisfiable { offset, count });
    }

    let remaining = &ids[offset..];
    let windowed = if limit == -1 {
        remaining.to_vec()
    } else {
        remaining.iter().take(limit as usize).cloned().collect()
    };

    Ok(windowed)
}
