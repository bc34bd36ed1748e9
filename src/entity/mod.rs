//! Entity-specific persistence surfaces
//!
//! One module per entity family. Each follows the same shape: collection
//! key constants, a stored-key builder, pure command-list builders for add
//! and delete (the full index protocol for one write), free async functions
//! operating on a borrowed connection, and the public `impl Store` wrappers.

pub mod device;
pub mod device_profile;
pub mod device_service;
pub mod event;
pub mod notification;
pub mod provision_watcher;
pub mod reading;
pub mod registration;
pub mod scheduler;
pub mod subscription;
pub mod transmission;

use crate::error::{Result, StoreError};

/// Decode a list of blobs into entities, failing on the first malformed one
pub(crate) fn decode_list<T: serde::de::DeserializeOwned>(
    objects: Vec<Vec<u8>>,
    what: &str,
) -> Result<Vec<T>> {
    objects
        .iter()
        .map(|blob| {
            serde_json::from_slice(blob).map_err(|e| {
                StoreError::Database(format!(
                    "{} format parsing failed from the database: {}",
                    what, e
                ))
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_list_surfaces_parse_failures() {
        let blobs = vec![b"{\"ok\":true}".to_vec(), b"not-json".to_vec()];
        let result: Result<Vec<serde_json::Value>> = decode_list(blobs, "probe");
        let err = result.unwrap_err();
        assert!(matches!(err, StoreError::Database(_)));
        assert!(err.to_string().contains("probe"));
    }
}
