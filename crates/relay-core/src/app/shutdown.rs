//! Shutdown - 協調的な停止
//!
//! Two independent tokens:
//! - **graceful**: loops finish their current TaskRun and lease nothing more
//! - **force**: in-flight processes are terminated right away
//!
//! They are independent tokens: a fatal store error cancels only
//! `graceful`, so in-flight runs still finish and get logged.

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    graceful: CancellationToken,
    force: CancellationToken,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop leasing; let in-flight runs finish.
    pub fn request(&self) {
        self.graceful.cancel();
    }

    /// Stop leasing and kill in-flight processes.
    pub fn force(&self) {
        self.graceful.cancel();
        self.force.cancel();
    }

    pub fn is_requested(&self) -> bool {
        self.graceful.is_cancelled()
    }

    pub fn is_forced(&self) -> bool {
        self.force.is_cancelled()
    }

    pub fn graceful_token(&self) -> &CancellationToken {
        &self.graceful
    }

    pub fn force_token(&self) -> &CancellationToken {
        &self.force
    }
}

/// First ctrl-c → graceful, second → force.
pub fn spawn_ctrl_c_listener(shutdown: Shutdown) -> JoinHandle<()> {
    tokio::spawn(async move {
        for press in 0..2 {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "cannot listen for ctrl-c");
                return;
            }
            if press == 0 {
                warn!("ctrl-c: finishing in-flight tasks (press again to kill them)");
                shutdown.request();
            } else {
                warn!("ctrl-c again: terminating in-flight processes");
                shutdown.force();
            }
        }
    })
}
