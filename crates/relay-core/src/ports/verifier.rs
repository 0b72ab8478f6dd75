//! Verifier port - confirms the side effects a worker was supposed to produce.
//!
//! A worker can exit 0 without doing its job, so the exit code alone never
//! makes an outcome `success`; the verifier has the final word.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::WorkItem;

/// Result of a verification: `ok`, plus an optional human-readable reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verification {
    pub ok: bool,
    pub reason: Option<String>,
}

impl Verification {
    pub fn ok() -> Self {
        Self {
            ok: true,
            reason: None,
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            ok: false,
            reason: Some(reason.into()),
        }
    }
}

#[async_trait]
pub trait Verifier: Send + Sync {
    /// Inspect the item's expected side effect. Problems reaching whatever
    /// is being inspected are reported as a rejection with a reason.
    async fn verify(&self, item: &WorkItem) -> Verification;
}
