use serde::{Deserialize, Serialize};

use super::ItemId;

/// One unit of batch work, as handed out by the work store.
///
/// Items are read-only to the orchestrator: only their lease state (owned by
/// the store) ever changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: ItemId,

    /// Human-readable label, copied into every log record.
    pub name: String,

    /// Opaque context used to build the worker's prompt (a path, a row, a URL).
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl WorkItem {
    pub fn new(id: impl Into<ItemId>, name: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_defaults_to_null_when_missing() {
        let item: WorkItem = serde_json::from_str(r#"{"id":"a","name":"A"}"#).unwrap();
        assert_eq!(item.id.as_str(), "a");
        assert!(item.payload.is_null());
    }
}
