//! Inbound CDC record shape (spec.md §6.3).

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use conflux_service::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CdcAction {
    Insert,
    Update,
    Delete,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CdcMetadata {
    #[serde(default)]
    pub table_schema: Option<String>,
    pub table_name: String,
}

/// A single change-data-capture record: an action plus the post-image
/// column map, an optional diff, and the table it came from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CdcRecord {
    pub action: CdcAction,
    pub record: Map<String, Value>,
    #[serde(default)]
    pub changes: Option<Value>,
    pub metadata: CdcMetadata,
}

impl CdcRecord {
    pub fn table_name(&self) -> &str {
        &self.metadata.table_name
    }

    /// Read a string-valued column from the post-image, if present.
    pub fn column_str(&self, name: &str) -> Option<&str> {
        self.record.get(name).and_then(Value::as_str)
    }

    /// Marshal the canonical outbound payload once per record: the full
    /// CDC object as JSON, preserving `action`, `metadata.table_name`, and
    /// `record` (spec.md §4.5 step 3). Every target user receives the same
    /// `Arc<str>` clone, so this is done exactly once regardless of fan-out
    /// width.
    pub fn canonical_payload(&self) -> Result<Arc<str>> {
        let encoded = serde_json::to_string(self).map_err(Error::from)?;
        Ok(Arc::from(encoded))
    }
}

/// The batch envelope (`{"records": [...]}`). Records are kept as raw
/// `Value`s here so a malformed record (e.g. missing `metadata.table_name`)
/// can be detected and skipped per-record rather than rejecting the whole
/// batch (spec.md §4.5, Testable Scenario S6).
#[derive(Debug, Clone, Deserialize)]
pub struct CdcBatch {
    pub records: Vec<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_payload_round_trips() {
        let record = CdcRecord {
            action: CdcAction::Update,
            record: serde_json::json!({"symbol": "AAPL", "price": "180.5"}).as_object().unwrap().clone(),
            changes: None,
            metadata: CdcMetadata { table_schema: Some("public".into()), table_name: "trades".into() },
        };
        let payload = record.canonical_payload().unwrap();
        let parsed: Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(parsed["action"], "update");
        assert_eq!(parsed["metadata"]["table_name"], "trades");
        assert_eq!(parsed["record"]["symbol"], "AAPL");
    }

    #[test]
    fn test_malformed_record_missing_table_name_fails_to_parse() {
        let raw = serde_json::json!({
            "action": "update",
            "record": {"symbol": "AAPL"},
            "metadata": {}
        });
        let parsed: std::result::Result<CdcRecord, _> = serde_json::from_value(raw);
        assert!(parsed.is_err());
    }
}
