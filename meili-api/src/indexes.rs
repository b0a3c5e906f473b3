//! Index descriptors and statistics.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Index descriptor from `GET /indexes` or `GET /indexes/{uid}`.
/// Fields other than `uid` and `primaryKey` (timestamps) are kept in `extra`
/// so the descriptor round-trips unchanged through an archive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexInfo {
    pub uid: String,
    #[serde(default)]
    pub primary_key: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl IndexInfo {
    pub fn new(uid: impl Into<String>, primary_key: Option<String>) -> Self {
        Self {
            uid: uid.into(),
            primary_key,
            extra: Map::new(),
        }
    }
}

/// Page of index descriptors.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexList {
    pub results: Vec<IndexInfo>,
    #[serde(default)]
    pub offset: usize,
    #[serde(default)]
    pub limit: usize,
    #[serde(default)]
    pub total: usize,
}

impl IndexList {
    /// True when the server reported more indexes than were returned.
    pub fn is_truncated(&self) -> bool {
        self.total > self.offset + self.results.len()
    }
}

/// Index statistics from `GET /indexes/{uid}/stats`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexStats {
    #[serde(default)]
    pub number_of_documents: u64,
    #[serde(default)]
    pub is_indexing: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn index_info_preserves_unknown_fields() {
        let raw = json!({
            "uid": "movies",
            "primaryKey": "id",
            "createdAt": "2024-01-01T00:00:00Z",
            "updatedAt": "2024-01-02T00:00:00Z"
        });
        let info: IndexInfo = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(info.primary_key.as_deref(), Some("id"));
        assert_eq!(serde_json::to_value(&info).unwrap(), raw);
    }

    #[test]
    fn missing_primary_key_is_none() {
        let info: IndexInfo = serde_json::from_value(json!({"uid": "page"})).unwrap();
        assert!(info.primary_key.is_none());
        let info: IndexInfo =
            serde_json::from_value(json!({"uid": "page", "primaryKey": null})).unwrap();
        assert!(info.primary_key.is_none());
    }

    #[test]
    fn truncated_listing() {
        let list = IndexList {
            results: vec![IndexInfo::new("a", None)],
            offset: 0,
            limit: 1,
            total: 2,
        };
        assert!(list.is_truncated());
    }
}
