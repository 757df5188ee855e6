/*!
 * InstanceInfo: the typed record identifying one opaque instance blob.
 */

use serde::{Deserialize, Serialize};

/// Immutable record `(id, size, md5)`. The invariant `size == |bytes|` and
/// `md5 == MD5(bytes)` is established by whoever constructs this (the host
/// callback, or the instance cache on ingest) and is never re-derived here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceInfo {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "Size")]
    pub size: u64,
    #[serde(rename = "MD5")]
    pub md5: String,
}

impl InstanceInfo {
    pub fn new(id: impl Into<String>, size: u64, md5: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            size,
            md5: md5.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_wire_keys() {
        let info = InstanceInfo::new("abc", 10, "781e5e245d69b566979b86e28d23f2c7");
        let json = serde_json::to_string(&info).unwrap();
        assert!(json.contains("\"ID\":\"abc\""));
        assert!(json.contains("\"Size\":10"));
        assert!(json.contains("\"MD5\":\"781e5e245d69b566979b86e28d23f2c7\""));
    }

    #[test]
    fn round_trips_through_json() {
        let info = InstanceInfo::new("xyz", 5, "deadbeefdeadbeefdeadbeefdeadbeef");
        let json = serde_json::to_string(&info).unwrap();
        let back: InstanceInfo = serde_json::from_str(&json).unwrap();
        assert_eq!(info, back);
    }
}
