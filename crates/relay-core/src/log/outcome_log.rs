use std::path::{Path, PathBuf};

use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::LogError;
use crate::domain::Outcome;

/// Shared append-only outcome log.
///
/// Every record is serialised into one complete line *before* the lock is
/// taken, then written with a single `write_all` while holding it. Concurrent
/// loops therefore never interleave partial lines, and a crash leaves at most
/// one torn final line, which readers skip.
pub struct OutcomeLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl OutcomeLog {
    /// Open (or create) the log in append mode, creating parent directories.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, LogError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(LogError::io(parent))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(LogError::io(&path))?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one outcome.
    pub async fn record(&self, outcome: &Outcome) -> Result<(), LogError> {
        let mut line = serde_json::to_string(outcome)?;
        line.push('\n');

        let mut file = self.file.lock().await;
        file.write_all(line.as_bytes())
            .await
            .map_err(LogError::io(&self.path))?;
        file.flush().await.map_err(LogError::io(&self.path))?;
        file.sync_data().await.map_err(LogError::io(&self.path))?;
        drop(file);

        debug!(item_id = %outcome.item_id, status = %outcome.status, "outcome recorded");
        Ok(())
    }
}

/// Read every intact record of a log file.
///
/// A line that does not parse (a torn write from a crash, or foreign text) is
/// skipped with a warning; it never hides the records after it.
pub async fn read_outcomes(path: impl AsRef<Path>) -> Result<Vec<Outcome>, LogError> {
    let path = path.as_ref();
    let raw = match tokio::fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(LogError::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    };

    let mut records = Vec::new();
    for (idx, line) in raw.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Outcome>(line) {
            Ok(outcome) => records.push(outcome),
            Err(e) => warn!(path = %path.display(), line = idx + 1, error = %e, "skipping unreadable outcome line"),
        }
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{LeaseOwner, OutcomeStatus, RunId, WorkItem};
    use chrono::Utc;
    use std::sync::Arc;
    use ulid::Ulid;

    fn outcome(n: usize) -> Outcome {
        let owner = LeaseOwner::new(RunId::from_ulid(Ulid::nil()), n % 4, n as u64);
        // long names make a torn write far more likely if appends were not serialised
        let item = WorkItem::new(format!("item-{n}"), "x".repeat(4096), serde_json::json!({}));
        Outcome::new(&owner, &item, OutcomeStatus::Success, 1, Utc::now())
    }

    #[tokio::test]
    async fn open_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/deeper/outcomes.jsonl");

        let log = OutcomeLog::open(&path).await.unwrap();
        log.record(&outcome(1)).await.unwrap();

        assert!(path.exists());
    }

    #[tokio::test]
    async fn concurrent_appends_never_interleave() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("outcomes.jsonl");
        let log = Arc::new(OutcomeLog::open(&path).await.unwrap());

        let mut joins = Vec::new();
        for n in 0..64 {
            let log = Arc::clone(&log);
            joins.push(tokio::spawn(async move { log.record(&outcome(n)).await }));
        }
        for j in joins {
            j.await.unwrap().unwrap();
        }

        let raw = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = raw.lines().collect();
        assert_eq!(lines.len(), 64);
        for line in lines {
            serde_json::from_str::<serde_json::Value>(line).expect("every line is valid JSON");
        }
    }

    #[tokio::test]
    async fn reopening_appends_instead_of_truncating() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("outcomes.jsonl");

        OutcomeLog::open(&path).await.unwrap().record(&outcome(1)).await.unwrap();
        OutcomeLog::open(&path).await.unwrap().record(&outcome(2)).await.unwrap();

        assert_eq!(read_outcomes(&path).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn torn_final_line_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("outcomes.jsonl");
        let log = OutcomeLog::open(&path).await.unwrap();
        log.record(&outcome(1)).await.unwrap();
        log.record(&outcome(2)).await.unwrap();
        drop(log);

        let mut raw = std::fs::read_to_string(&path).unwrap();
        raw.push_str(r#"{"timestamp":"2024-01-01T00:00:00Z","run_id":"#);
        std::fs::write(&path, raw).unwrap();

        let records = read_outcomes(&path).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].item_id.as_str(), "item-2");
    }

    #[tokio::test]
    async fn missing_log_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let records = read_outcomes(dir.path().join("nope.jsonl")).await.unwrap();
        assert!(records.is_empty());
    }
}
