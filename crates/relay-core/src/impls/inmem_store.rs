//! In-memory WorkStore.
//!
//! The whole lease decision happens under one lock, which is the in-process
//! equivalent of a single conditional UPDATE.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::domain::{ItemId, Lease, LeaseOwner, RunId, WorkItem};
use crate::ports::{Clock, StoreError, SystemClock, WorkStore};

#[derive(Debug)]
struct ItemRecord {
    item: WorkItem,
    lease: Option<Lease>,
    /// Attempts of `released_run` that ended in an explicit release
    /// (failed / timeout / error). The attempt cap only counts these, so a
    /// later run starts from zero.
    released: u32,
    released_run: Option<RunId>,
    completed: bool,
}

impl ItemRecord {
    fn is_eligible(&self, now: chrono::DateTime<chrono::Utc>, run_id: RunId, max_attempts: Option<u32>) -> bool {
        if self.completed {
            return false;
        }
        if self.released_run == Some(run_id) && max_attempts.is_some_and(|max| self.released >= max) {
            return false;
        }
        self.lease.as_ref().is_none_or(|lease| lease.is_expired(now))
    }

    fn is_held_by(&self, owner: &LeaseOwner) -> bool {
        self.lease
            .as_ref()
            .is_some_and(|lease| lease.is_held_by(&owner.to_string()))
    }
}

#[derive(Debug, Default)]
struct InMemoryStoreState {
    /// Insertion order is age order: index 0 is the oldest item.
    records: Vec<ItemRecord>,
    index: HashMap<ItemId, usize>,
}

/// Snapshot of one item, for tests and status output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemSnapshot {
    pub holder: Option<String>,
    pub released: u32,
    pub completed: bool,
}

pub struct InMemoryWorkStore {
    state: Arc<Mutex<InMemoryStoreState>>,
    clock: Arc<dyn Clock>,
    max_attempts: Option<u32>,
}

impl InMemoryWorkStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Arc::new(Mutex::new(InMemoryStoreState::default())),
            clock,
            max_attempts: None,
        }
    }

    /// Within one run, stop handing out an item once it has been released this many times.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Add items; an ID that is already present keeps its existing record.
    pub async fn insert_items(&self, items: impl IntoIterator<Item = WorkItem>) -> usize {
        let mut state = self.state.lock().await;
        let mut added = 0;
        for item in items {
            if state.index.contains_key(&item.id) {
                continue;
            }
            let idx = state.records.len();
            state.index.insert(item.id.clone(), idx);
            state.records.push(ItemRecord {
                item,
                lease: None,
                released: 0,
                released_run: None,
                completed: false,
            });
            added += 1;
        }
        added
    }

    pub async fn snapshot(&self, item_id: &ItemId) -> Option<ItemSnapshot> {
        let state = self.state.lock().await;
        let idx = *state.index.get(item_id)?;
        let record = &state.records[idx];
        Some(ItemSnapshot {
            holder: record.lease.as_ref().map(|l| l.owner.clone()),
            released: record.released,
            completed: record.completed,
        })
    }

    /// Items not completed yet (a later run may still pick them up).
    pub async fn pending_count(&self) -> usize {
        let state = self.state.lock().await;
        state.records.iter().filter(|r| !r.completed).count()
    }
}

impl Default for InMemoryWorkStore {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

#[async_trait]
impl WorkStore for InMemoryWorkStore {
    async fn lease_next(&self, owner: &LeaseOwner, ttl: Duration) -> Result<Option<WorkItem>, StoreError> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let max_attempts = self.max_attempts;
        let Some(record) = state
            .records
            .iter_mut()
            .find(|r| r.is_eligible(now, owner.run_id, max_attempts))
        else {
            return Ok(None);
        };

        if let Some(stale) = &record.lease {
            debug!(item_id = %record.item.id, stale_owner = %stale.owner, "re-leasing expired lease");
        }
        record.lease = Some(Lease::new(record.item.id.clone(), owner, now, ttl));
        Ok(Some(record.item.clone()))
    }

    async fn release(&self, item_id: &ItemId, owner: &LeaseOwner) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let Some(&idx) = state.index.get(item_id) else {
            return Ok(());
        };
        let record = &mut state.records[idx];
        if record.is_held_by(owner) {
            record.lease = None;
            if record.released_run == Some(owner.run_id) {
                record.released += 1;
            } else {
                record.released_run = Some(owner.run_id);
                record.released = 1;
            }
        }
        Ok(())
    }

    async fn complete(&self, item_id: &ItemId, owner: &LeaseOwner) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let Some(&idx) = state.index.get(item_id) else {
            return Ok(());
        };
        let record = &mut state.records[idx];
        if record.is_held_by(owner) {
            record.lease = None;
            record.completed = true;
        }
        Ok(())
    }
}
