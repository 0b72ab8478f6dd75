use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use crate::domain::{ItemId, Outcome, OutcomeStatus, RunId};

/// Stats derived from outcome records.
///
/// Always computed by reading the log back; nothing in the scheduler keeps
/// live counters that could drift from what was actually persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OutcomeSummary {
    pub total: usize,
    pub success: usize,
    pub failed: usize,
    pub timeout: usize,
    pub error: usize,
    /// Sum of `duration_s` across records.
    pub total_duration_s: u64,
    /// Status of the most recent record per item.
    pub latest: BTreeMap<ItemId, OutcomeStatus>,
}

impl OutcomeSummary {
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a Outcome>) -> Self {
        let mut summary = Self::default();
        for record in records {
            summary.total += 1;
            summary.total_duration_s += record.duration_s;
            match record.status {
                OutcomeStatus::Success => summary.success += 1,
                OutcomeStatus::Failed => summary.failed += 1,
                OutcomeStatus::Timeout => summary.timeout += 1,
                OutcomeStatus::Error => summary.error += 1,
            }
            summary.latest.insert(record.item_id.clone(), record.status);
        }
        summary
    }

    /// Only the records of one run (a log file is shared across runs).
    pub fn for_run(records: &[Outcome], run_id: RunId) -> Self {
        Self::from_records(records.iter().filter(|r| r.run_id == run_id))
    }

    pub fn count(&self, status: OutcomeStatus) -> usize {
        match status {
            OutcomeStatus::Success => self.success,
            OutcomeStatus::Failed => self.failed,
            OutcomeStatus::Timeout => self.timeout,
            OutcomeStatus::Error => self.error,
        }
    }

    /// Records per run, for logs that hold several runs.
    pub fn runs(records: &[Outcome]) -> HashMap<RunId, usize> {
        let mut runs = HashMap::new();
        for record in records {
            *runs.entry(record.run_id).or_insert(0) += 1;
        }
        runs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{LeaseOwner, WorkItem};
    use chrono::Utc;
    use ulid::Ulid;

    fn record(run: RunId, item: &str, status: OutcomeStatus, secs: u64) -> Outcome {
        let owner = LeaseOwner::new(run, 0, 0);
        Outcome::new(&owner, &WorkItem::new(item, item, serde_json::Value::Null), status, secs, Utc::now())
    }

    #[test]
    fn counts_each_status_and_keeps_latest_per_item() {
        let run = RunId::from_ulid(Ulid::new());
        let records = vec![
            record(run, "a", OutcomeStatus::Failed, 3),
            record(run, "b", OutcomeStatus::Timeout, 10),
            record(run, "a", OutcomeStatus::Success, 2),
            record(run, "c", OutcomeStatus::Error, 0),
        ];

        let summary = OutcomeSummary::from_records(&records);

        assert_eq!(summary.total, 4);
        assert_eq!(summary.count(OutcomeStatus::Success), 1);
        assert_eq!(summary.count(OutcomeStatus::Failed), 1);
        assert_eq!(summary.count(OutcomeStatus::Timeout), 1);
        assert_eq!(summary.count(OutcomeStatus::Error), 1);
        assert_eq!(summary.total_duration_s, 15);
        assert_eq!(summary.latest[&ItemId::new("a")], OutcomeStatus::Success);
    }

    #[test]
    fn for_run_ignores_other_runs() {
        let run1 = RunId::from_ulid(Ulid::new());
        let run2 = RunId::from_ulid(Ulid::new());
        let records = vec![
            record(run1, "a", OutcomeStatus::Success, 1),
            record(run2, "a", OutcomeStatus::Failed, 1),
            record(run2, "b", OutcomeStatus::Failed, 1),
        ];

        assert_eq!(OutcomeSummary::for_run(&records, run1).total, 1);
        assert_eq!(OutcomeSummary::for_run(&records, run2).failed, 2);
        assert_eq!(OutcomeSummary::runs(&records)[&run2], 2);
    }
}
