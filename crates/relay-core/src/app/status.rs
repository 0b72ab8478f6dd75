//! Status - ループごとの状態
//!
//! Each worker loop publishes its `LoopState` on a `watch` channel. The board
//! only holds receivers, so querying it never blocks a loop.

use std::fmt;

use serde::Serialize;
use tokio::sync::watch;

use crate::domain::ItemId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LoopState {
    Idle,
    Leasing,
    Running { item_id: ItemId },
    Verifying { item_id: ItemId },
    Logging { item_id: ItemId },
    /// Shutdown observed; no new leases.
    Aborting,
    Done,
}

impl LoopState {
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            LoopState::Running { .. } | LoopState::Verifying { .. } | LoopState::Logging { .. }
        )
    }
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoopState::Idle => f.write_str("idle"),
            LoopState::Leasing => f.write_str("leasing"),
            LoopState::Running { item_id } => write!(f, "running {item_id}"),
            LoopState::Verifying { item_id } => write!(f, "verifying {item_id}"),
            LoopState::Logging { item_id } => write!(f, "logging {item_id}"),
            LoopState::Aborting => f.write_str("aborting"),
            LoopState::Done => f.write_str("done"),
        }
    }
}

/// Write side, owned by one worker loop.
#[derive(Debug)]
pub struct StatusReporter {
    worker_id: usize,
    tx: watch::Sender<LoopState>,
}

impl StatusReporter {
    pub fn worker_id(&self) -> usize {
        self.worker_id
    }

    pub fn set(&self, state: LoopState) {
        // send_replace never fails, even with no subscribers left
        self.tx.send_replace(state);
    }
}

/// Read side: one receiver per loop.
#[derive(Debug, Clone)]
pub struct StatusBoard {
    loops: Vec<watch::Receiver<LoopState>>,
}

impl StatusBoard {
    pub fn new(loops: usize) -> (Self, Vec<StatusReporter>) {
        let mut receivers = Vec::with_capacity(loops);
        let mut reporters = Vec::with_capacity(loops);
        for worker_id in 0..loops {
            let (tx, rx) = watch::channel(LoopState::Idle);
            receivers.push(rx);
            reporters.push(StatusReporter { worker_id, tx });
        }
        (Self { loops: receivers }, reporters)
    }

    pub fn snapshot(&self) -> Vec<LoopState> {
        self.loops.iter().map(|rx| rx.borrow().clone()).collect()
    }

    pub fn busy(&self) -> usize {
        self.loops.iter().filter(|rx| rx.borrow().is_busy()).count()
    }

    pub fn all_done(&self) -> bool {
        self.loops.iter().all(|rx| *rx.borrow() == LoopState::Done)
    }

    pub fn subscribe(&self, worker_id: usize) -> Option<watch::Receiver<LoopState>> {
        self.loops.get(worker_id).cloned()
    }
}
