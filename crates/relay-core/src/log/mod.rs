//! Log - the durable, append-only audit trail of a run.
//!
//! - **OutcomeLog**: one NDJSON line per Outcome, serialised appends
//! - **TranscriptStore**: one plain-text file per (run, item)
//! - **OutcomeSummary**: stats computed by reading the log back

mod outcome_log;
mod summary;
mod transcripts;

pub use self::outcome_log::{OutcomeLog, read_outcomes};
pub use self::summary::OutcomeSummary;
pub use self::transcripts::{TranscriptEntry, TranscriptStore};

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LogError {
    #[error("io error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize outcome: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl LogError {
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| LogError::Io { path, source }
    }
}
