//! Outcome model: the terminal classification of one execution attempt.
//!
//! An `Outcome` is built once per TaskRun, appended to the outcome log and then
//! dropped. Nothing keeps live counters; summaries are computed by reading the
//! log back (see `log::OutcomeSummary`).

use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use super::{ItemId, LeaseOwner, RunId, WorkItem};

/// Terminal status of a TaskRun.
///
/// Serialized lowercase to match the log format: success / failed / timeout / error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    /// The worker ran and the verifier confirmed its side effects.
    Success,

    /// The worker ran but produced a wrong/incomplete result, or the verifier rejected it.
    Failed,

    /// The worker exceeded its time budget and was killed.
    Timeout,

    /// The orchestrator itself failed to spawn or manage the process.
    Error,
}

impl OutcomeStatus {
    /// Statuses after which the lease is handed back to the store.
    pub fn releases_lease(self) -> bool {
        !matches!(self, OutcomeStatus::Success)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OutcomeStatus::Success => "success",
            OutcomeStatus::Failed => "failed",
            OutcomeStatus::Timeout => "timeout",
            OutcomeStatus::Error => "error",
        }
    }
}

impl fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the worker's own event stream claimed about completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Verdict {
    /// A final result event was seen without the error flag.
    Completed,

    /// A final result event was seen with the error flag set.
    Errored {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },

    /// No result event at all: the stream ended early or the worker crashed.
    Unknown,
}

/// One line of the outcome log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    #[serde(with = "rfc3339_utc")]
    pub timestamp: DateTime<Utc>,
    pub run_id: RunId,
    pub worker_id: usize,
    pub item_id: ItemId,
    pub item_name: String,
    pub status: OutcomeStatus,
    pub duration_s: u64,

    #[serde(default)]
    pub owner: String,

    #[serde(default)]
    pub exit_code: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verdict: Option<Verdict>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl Outcome {
    pub fn new(
        owner: &LeaseOwner,
        item: &WorkItem,
        status: OutcomeStatus,
        duration_s: u64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            timestamp,
            run_id: owner.run_id,
            worker_id: owner.worker_id,
            item_id: item.id.clone(),
            item_name: item.name.clone(),
            status,
            duration_s,
            owner: owner.to_string(),
            exit_code: None,
            verdict: None,
            reason: None,
        }
    }

    pub fn with_exit_code(mut self, exit_code: Option<i32>) -> Self {
        self.exit_code = exit_code;
        self
    }

    pub fn with_verdict(mut self, verdict: Verdict) -> Self {
        self.verdict = Some(verdict);
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

mod rfc3339_utc {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::Secs, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|ts| ts.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}

/// Format used for human-facing timestamps (transcript headers).
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use ulid::Ulid;

    fn sample() -> Outcome {
        let owner = LeaseOwner::new(RunId::from_ulid(Ulid::nil()), 3, 1);
        let item = WorkItem::new("item-1", "First", serde_json::json!({}));
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        Outcome::new(&owner, &item, OutcomeStatus::Failed, 42, ts)
    }

    #[test]
    fn status_serializes_lowercase() {
        let s = serde_json::to_string(&OutcomeStatus::Timeout).unwrap();
        assert_eq!(s, "\"timeout\"");
    }

    #[test]
    fn only_success_keeps_the_lease() {
        assert!(!OutcomeStatus::Success.releases_lease());
        assert!(OutcomeStatus::Failed.releases_lease());
        assert!(OutcomeStatus::Timeout.releases_lease());
        assert!(OutcomeStatus::Error.releases_lease());
    }

    #[test]
    fn outcome_line_has_required_fields() {
        let o = sample().with_reason("marker file missing");
        let v = serde_json::to_value(&o).unwrap();

        assert_eq!(v["timestamp"], "2024-05-01T12:00:00Z");
        assert!(v["run_id"].as_str().unwrap().starts_with("run-"));
        assert_eq!(v["worker_id"], 3);
        assert_eq!(v["item_id"], "item-1");
        assert_eq!(v["item_name"], "First");
        assert_eq!(v["status"], "failed");
        assert_eq!(v["duration_s"], 42);
        assert_eq!(v["reason"], "marker file missing");
        assert!(v.get("verdict").is_none());
    }

    #[test]
    fn verdict_is_tagged() {
        let v = serde_json::to_value(Verdict::Errored {
            message: Some("boom".to_string()),
        })
        .unwrap();
        assert_eq!(v["kind"], "errored");
        assert_eq!(v["message"], "boom");
    }
}
