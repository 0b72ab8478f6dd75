//! Scheduler - ワーカーループの起動と集約
//!
//! Spawns `concurrency` worker loops that share one semaphore, one outcome log
//! and one store, waits for all of them, then summarises the run by reading
//! the log back.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{Instrument, error, info, info_span};

use super::config::OrchestratorConfig;
use super::shutdown::Shutdown;
use super::status::{StatusBoard, StatusReporter};
use super::worker_loop::{LoopContext, WorkerLoop};
use crate::domain::{OrchestratorError, OutcomeStatus, RunId};
use crate::log::{OutcomeLog, OutcomeSummary, TranscriptStore, read_outcomes};
use crate::ports::{Clock, IdGenerator, PromptBuilder, SystemClock, UlidGenerator, Verifier, WorkStore};
use crate::process::ProcessRunner;

/// What one `Scheduler::run` did, derived from the outcome log.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: RunId,
    pub summary: OutcomeSummary,
    pub elapsed: Duration,
    pub shutdown_requested: bool,
    pub forced: bool,
}

impl RunReport {
    pub fn count(&self, status: OutcomeStatus) -> usize {
        self.summary.count(status)
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} items in {:.1}s (success {}, failed {}, timeout {}, error {})",
            self.run_id,
            self.summary.total,
            self.elapsed.as_secs_f64(),
            self.summary.success,
            self.summary.failed,
            self.summary.timeout,
            self.summary.error,
        )?;
        if self.forced {
            f.write_str(" [forced shutdown]")?;
        } else if self.shutdown_requested {
            f.write_str(" [shutdown requested]")?;
        }
        Ok(())
    }
}

pub struct Scheduler {
    config: OrchestratorConfig,
    store: Arc<dyn WorkStore>,
    verifier: Arc<dyn Verifier>,
    prompt: Arc<dyn PromptBuilder>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    shutdown: Shutdown,
    board: StatusBoard,
    reporters: Vec<StatusReporter>,
}

impl Scheduler {
    /// Validates `config` up front (fail-fast).
    pub fn new(
        config: OrchestratorConfig,
        store: Arc<dyn WorkStore>,
        verifier: Arc<dyn Verifier>,
        prompt: Arc<dyn PromptBuilder>,
    ) -> Result<Self, OrchestratorError> {
        config.validate()?;
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let (board, reporters) = StatusBoard::new(config.concurrency);
        Ok(Self {
            ids: Arc::new(UlidGenerator::new(Arc::clone(&clock))),
            clock,
            config,
            store,
            verifier,
            prompt,
            shutdown: Shutdown::new(),
            board,
            reporters,
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    /// Handle for requesting graceful / forced shutdown from outside.
    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    pub fn status_board(&self) -> StatusBoard {
        self.board.clone()
    }

    /// Run until every loop is done.
    ///
    /// A store or log failure in any loop stops leasing everywhere, lets the
    /// in-flight runs finish and log, then comes back as the error.
    pub async fn run(self) -> Result<RunReport, OrchestratorError> {
        let started = Instant::now();
        let run_id = self.ids.generate_run_id();
        let log = Arc::new(OutcomeLog::open(&self.config.log_path).await?);

        let ctx = Arc::new(LoopContext {
            run_id,
            runner: ProcessRunner::new(self.config.grace_period(), self.config.drain_timeout()),
            transcripts: TranscriptStore::new(self.config.transcripts_dir.clone()),
            permits: Arc::new(Semaphore::new(self.config.concurrency)),
            issued: AtomicUsize::new(0),
            log: Arc::clone(&log),
            store: self.store,
            verifier: self.verifier,
            prompt: self.prompt,
            clock: self.clock,
            shutdown: self.shutdown.clone(),
            config: self.config,
        });
        info!(
            %run_id,
            concurrency = ctx.config.concurrency,
            log = %log.path().display(),
            transcripts = %ctx.transcripts.dir().display(),
            "run started"
        );

        let board = self.board.clone();
        let graceful = self.shutdown.graceful_token().clone();
        let drain_notice = tokio::spawn(async move {
            graceful.cancelled().await;
            info!(in_flight = board.busy(), "shutdown requested; no new leases");
        });

        let mut loops = JoinSet::new();
        let mut worker_of = HashMap::new();
        for reporter in self.reporters {
            let worker_id = reporter.worker_id();
            let worker = WorkerLoop::new(Arc::clone(&ctx), reporter);
            let handle = loops.spawn(worker.run().instrument(info_span!("worker", worker_id)));
            worker_of.insert(handle.id(), worker_id);
        }

        let mut first_error: Option<OrchestratorError> = None;
        let mut processed = 0;
        while let Some(joined) = loops.join_next_with_id().await {
            match joined {
                Ok((_, Ok(n))) => processed += n,
                Ok((_, Err(e))) => {
                    first_error.get_or_insert(e);
                }
                Err(join_err) => {
                    let worker_id = worker_of.get(&join_err.id()).copied().unwrap_or(usize::MAX);
                    error!(worker_id, error = %join_err, "worker loop panicked");
                    self.shutdown.request();
                    first_error.get_or_insert(OrchestratorError::LoopPanicked {
                        worker_id,
                        message: join_err.to_string(),
                    });
                }
            }
        }

        drain_notice.abort();

        if let Some(err) = first_error {
            error!(%run_id, processed, error = %err, "run aborted");
            return Err(err);
        }

        let records = read_outcomes(log.path()).await?;
        let report = RunReport {
            run_id,
            summary: OutcomeSummary::for_run(&records, run_id),
            elapsed: started.elapsed(),
            shutdown_requested: self.shutdown.is_requested(),
            forced: self.shutdown.is_forced(),
        };
        info!(%run_id, processed, elapsed_s = report.elapsed.as_secs(), "run finished");
        Ok(report)
    }
}
