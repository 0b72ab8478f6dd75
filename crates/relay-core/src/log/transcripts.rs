//! Per-(run, item) transcript files.
//!
//! Layout: `<dir>/<run_id>/<item_id>.txt`. Only the loop holding the item's
//! lease ever writes its file, so no locking is needed. If the same item is
//! attempted again within one run, the new attempt is appended as a new section.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;

use super::LogError;
use crate::domain::{ItemId, OutcomeStatus, RunId, format_timestamp};

/// Everything written for one attempt.
#[derive(Debug, Clone)]
pub struct TranscriptEntry<'a> {
    pub owner: &'a str,
    pub status: OutcomeStatus,
    pub finished_at: DateTime<Utc>,
    /// Rendered worker event stream.
    pub body: &'a str,
    pub stderr_lines: &'a [String],
    /// Output was cut short by a kill.
    pub partial: bool,
}

impl TranscriptEntry<'_> {
    fn render(&self) -> String {
        let mut out = format!(
            "=== {} {} status={} ===\n",
            self.owner,
            format_timestamp(self.finished_at),
            self.status
        );
        out.push_str(self.body);
        if !self.body.is_empty() && !self.body.ends_with('\n') {
            out.push('\n');
        }
        if !self.stderr_lines.is_empty() {
            out.push_str("--- stderr ---\n");
            for line in self.stderr_lines {
                out.push_str(line);
                out.push('\n');
            }
        }
        if self.partial {
            out.push_str("[partial output: process was terminated]\n");
        }
        out
    }
}

#[derive(Debug, Clone)]
pub struct TranscriptStore {
    dir: PathBuf,
}

impl TranscriptStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, run_id: RunId, item_id: &ItemId) -> PathBuf {
        self.dir
            .join(run_id.to_string())
            .join(format!("{}.txt", file_stem(item_id.as_str())))
    }

    /// Write one attempt's transcript. Returns the file path.
    pub async fn save(
        &self,
        run_id: RunId,
        item_id: &ItemId,
        entry: &TranscriptEntry<'_>,
    ) -> Result<PathBuf, LogError> {
        let path = self.path_for(run_id, item_id);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(LogError::io(parent))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(LogError::io(&path))?;
        file.write_all(entry.render().as_bytes())
            .await
            .map_err(LogError::io(&path))?;
        file.flush().await.map_err(LogError::io(&path))?;
        Ok(path)
    }
}

/// Item IDs come from outside; keep them from escaping the run directory.
fn file_stem(item_id: &str) -> String {
    let mut stem: String = item_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') { c } else { '_' })
        .collect();
    if stem.is_empty() || stem.starts_with('.') {
        stem.insert(0, '_');
    }
    stem
}
