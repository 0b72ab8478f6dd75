//! WorkStore port - the external source of work items.
//!
//! The store is the only shared mutable resource across worker loops (and
//! across orchestrator processes). Every implementation must make
//! `lease_next` a single atomic conditional update:
//!
//! ```text
//! UPDATE items SET owner = ?, acquired_at = now
//!  WHERE id = (oldest item that is not completed AND
//!              (owner IS NULL OR acquired_at + ttl < now))
//! ```
//!
//! Never read-then-write: two loops must not both win the same item. A loop
//! that loses a race simply gets the next eligible item (or `None`).

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{ItemId, LeaseOwner, WorkItem};

/// Store-level failures. Any of these is fatal to the scheduler.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store query failed: {0}")]
    Query(String),

    #[error("corrupt item {item_id}: {message}")]
    Corrupt { item_id: String, message: String },
}

#[async_trait]
pub trait WorkStore: Send + Sync {
    /// Lease the oldest eligible item for `owner`, or `None` when nothing is eligible.
    ///
    /// `None` is the termination signal for a worker loop, not an error.
    async fn lease_next(&self, owner: &LeaseOwner, ttl: Duration) -> Result<Option<WorkItem>, StoreError>;

    /// Clear the lease on `item_id` if (and only if) `owner` still holds it.
    ///
    /// Calling this twice, or for an item held by someone else, is a no-op.
    async fn release(&self, item_id: &ItemId, owner: &LeaseOwner) -> Result<(), StoreError>;

    /// Mark `item_id` done so it is never leased again. Owner-checked like `release`.
    ///
    /// Stores that track completion elsewhere can keep the default, which
    /// leaves the lease to expire.
    async fn complete(&self, _item_id: &ItemId, _owner: &LeaseOwner) -> Result<(), StoreError> {
        Ok(())
    }
}
