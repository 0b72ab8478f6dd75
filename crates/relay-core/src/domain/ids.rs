//! Domain identifiers (strongly-typed IDs).
//!
//! Orchestrator-generated IDs are ULIDs wrapped in a phantom-typed `Id<T>`, so
//! a `RunId` can never be passed where another ID kind is expected. Work item
//! IDs are assigned by the external store and kept as opaque strings.
//!
//! ## ULID の特性
//! - **時刻でソート可能**: 同じログに複数 run が並んでも生成順で並べられる
//! - **分散生成可能**: 複数の orchestrator プロセスが調整なしで ID を発行できる

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;
use ulid::Ulid;

/// Marker trait for each ID kind. Provides the display prefix.
pub trait IdMarker: Send + Sync + 'static {
    fn prefix() -> &'static str;
}

/// Generic ULID-backed ID.
#[repr(transparent)]
#[derive(Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Id<T: IdMarker> {
    ulid: Ulid,
    _marker: PhantomData<T>,
}

// derive would require `T: Clone + Copy`, which marker enums never need.
impl<T: IdMarker> Clone for Id<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: IdMarker> Copy for Id<T> {}

impl<T: IdMarker> Id<T> {
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self {
            ulid,
            _marker: PhantomData,
        }
    }

    pub fn as_ulid(&self) -> Ulid {
        self.ulid
    }
}

impl<T: IdMarker> From<Ulid> for Id<T> {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.ulid)
    }
}

/// Error returned when a string is not `<prefix><ulid>`.
#[derive(Debug, thiserror::Error)]
#[error("invalid id '{0}'")]
pub struct ParseIdError(String);

impl<T: IdMarker> FromStr for Id<T> {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s
            .strip_prefix(T::prefix())
            .ok_or_else(|| ParseIdError(s.to_string()))?;
        let ulid = Ulid::from_string(raw).map_err(|_| ParseIdError(s.to_string()))?;
        Ok(Self::from_ulid(ulid))
    }
}

// The log stores IDs in their display form ("run-01H...") so humans can grep it.
impl<T: IdMarker> Serialize for Id<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de, T: IdMarker> Deserialize<'de> for Id<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Run のマーカー型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Run {}

impl IdMarker for Run {
    fn prefix() -> &'static str {
        "run-"
    }
}

/// Identifier of one orchestrator run (one `Scheduler::run` invocation).
pub type RunId = Id<Run>;

/// Identifier of a work item, assigned by the external store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(String);

impl ItemId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for ItemId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ItemId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_id_displays_with_prefix_and_parses_back() {
        let ulid = Ulid::new();
        let run_id = RunId::from_ulid(ulid);

        let shown = run_id.to_string();
        assert!(shown.starts_with("run-"));

        let parsed: RunId = shown.parse().unwrap();
        assert_eq!(parsed, run_id);
    }

    #[test]
    fn run_id_rejects_foreign_prefix() {
        let shown = format!("job-{}", Ulid::new());
        assert!(shown.parse::<RunId>().is_err());
    }

    #[test]
    fn run_id_serializes_as_display_string() {
        let run_id = RunId::from_ulid(Ulid::new());
        let json = serde_json::to_value(run_id).unwrap();
        assert_eq!(json, serde_json::Value::String(run_id.to_string()));
    }

    #[test]
    fn ulid_ids_are_sortable() {
        let id1 = RunId::from_ulid(Ulid::new());
        std::thread::sleep(std::time::Duration::from_millis(2));
        let id2 = RunId::from_ulid(Ulid::new());

        assert!(id1 < id2);
    }

    #[test]
    fn phantom_data_does_not_consume_memory() {
        assert_eq!(std::mem::size_of::<RunId>(), std::mem::size_of::<Ulid>());
    }

    #[test]
    fn item_id_is_transparent_in_json() {
        let id = ItemId::new("chat-42");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"chat-42\"");
    }
}
