//! Errors - orchestrator-level failures.
//!
//! Failures local to one TaskRun (spawn failure, timeout, verification
//! failure) are *not* errors at this level: they become an `Outcome` and the
//! loop continues. Only what must stop the whole scheduler shows up here.

use thiserror::Error;

use crate::app::config::ConfigError;
use crate::log::LogError;
use crate::ports::StoreError;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// The work store is unreachable or broken; the scheduler fails fast.
    #[error("work store failed: {0}")]
    Store(#[from] StoreError),

    /// The outcome log (or transcript directory) cannot be written.
    #[error("outcome log failed: {0}")]
    Log(#[from] LogError),

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// A worker loop task panicked or was aborted.
    #[error("worker loop {worker_id} terminated abnormally: {message}")]
    LoopPanicked { worker_id: usize, message: String },
}
