//! Key schema helpers
//!
//! Every stored key is built by joining segments with a single reserved
//! separator character. Entity names and labels must not contain the
//! separator or key collisions occur; callers own that validation.

/// Reserved separator joining key segments
pub const DB_KEY_SEPARATOR: &str = ":";

/// Path delimiter used by the external hierarchical KV surface
pub const PATH_DELIMITER: &str = "/";

/// Join key segments with the reserved separator
///
/// ```rust
/// use edgestore::keys::make_key;
/// assert_eq!(make_key(&["md|dv", "label", "outdoor"]), "md|dv:label:outdoor");
/// ```
pub fn make_key(segments: &[&str]) -> String {
    segments.join(DB_KEY_SEPARATOR)
}

/// Extract the object id from a stored key (the final segment)
pub fn id_from_stored_key(stored_key: &str) -> &str {
    stored_key
        .rsplit(DB_KEY_SEPARATOR)
        .next()
        .unwrap_or(stored_key)
}

/// Translate an external "/"-style path into the internal ":"-joined key
pub fn path_to_db_key(path: &str) -> String {
    path.replace(PATH_DELIMITER, DB_KEY_SEPARATOR)
}

/// Translate an internal ":"-joined key back into the external path form
pub fn db_key_to_path(key: &str) -> String {
    key.replace(DB_KEY_SEPARATOR, PATH_DELIMITER)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_make_key() {
        assert_eq!(make_key(&["cd|evt", "abc"]), "cd|evt:abc");
        assert_eq!(
            make_key(&["cd|rd", "deviceName", "resourceName", "thermo", "temp"]),
            "cd|rd:deviceName:resourceName:thermo:temp"
        );
        assert_eq!(make_key(&["solo"]), "solo");
    }

    #[test]
    fn test_id_from_stored_key() {
        assert_eq!(
            id_from_stored_key("cd|evt:6d0e5a54-7a0e-4f0e-9cf7-2f5f2a1c2b52"),
            "6d0e5a54-7a0e-4f0e-9cf7-2f5f2a1c2b52"
        );
        assert_eq!(id_from_stored_key("bare"), "bare");
    }

    #[test]
    fn test_path_translation_round_trip() {
        let path = "core-data/Writable/LogLevel";
        let key = path_to_db_key(path);
        assert_eq!(key, "core-data:Writable:LogLevel");
        assert_eq!(db_key_to_path(&key), path);
    }
}
