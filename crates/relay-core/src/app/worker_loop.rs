//! WorkerLoop - タスク実行ループ
//!
//! # フロー
//! 1. shutdown を確認（要求済みなら新しいリースは取らない）
//! 2. Semaphore の permit を取得（ログ記録が終わるまで保持）
//! 3. `max_items` の枠を予約
//! 4. `WorkStore::lease_next()` で item を取得（None ならループ終了）
//! 5. prompt を組み立てて ProcessRunner で実行
//! 6. stdout を transcript に変換し Verifier で副作用を確認
//! 7. Outcome を分類して outcome log に記録
//! 8. 失敗系なら release、成功なら complete
//! 9. transcript を保存
//!
//! Store / log / transcript failures are fatal: the loop requests a graceful
//! shutdown for every other loop and returns the error. A transcript failure
//! happens after the outcome is recorded and the lease is settled.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tracing::{Instrument, debug, error, info, info_span, warn};

use super::config::OrchestratorConfig;
use super::heartbeat::Heartbeat;
use super::shutdown::Shutdown;
use super::status::{LoopState, StatusReporter};
use crate::domain::{
    ItemId, LeaseOwner, OrchestratorError, Outcome, OutcomeStatus, RunId, Verdict, WorkItem,
};
use crate::log::{OutcomeLog, TranscriptEntry, TranscriptStore};
use crate::parser::parse_stream;
use crate::ports::{Clock, PromptBuilder, Verification, Verifier, WorkStore};
use crate::process::{CommandSpec, ProcessRunner, RunOutput};

/// Everything the loops of one run share.
pub(crate) struct LoopContext {
    pub run_id: RunId,
    pub config: OrchestratorConfig,
    pub store: Arc<dyn WorkStore>,
    pub verifier: Arc<dyn Verifier>,
    pub prompt: Arc<dyn PromptBuilder>,
    pub clock: Arc<dyn Clock>,
    pub runner: ProcessRunner,
    pub log: Arc<OutcomeLog>,
    pub transcripts: TranscriptStore,
    pub permits: Arc<Semaphore>,
    /// Items leased so far across all loops (for `max_items`).
    pub issued: AtomicUsize,
    pub shutdown: Shutdown,
}

impl LoopContext {
    fn reserve_slot(&self) -> bool {
        let Some(max) = self.config.max_items else {
            return true;
        };
        self.issued
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| (n < max).then_some(n + 1))
            .is_ok()
    }

    fn return_slot(&self) {
        if self.config.max_items.is_some() {
            self.issued.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

/// Result of one TaskRun before it is written anywhere.
#[derive(Debug)]
struct Finished {
    status: OutcomeStatus,
    reason: Option<String>,
    exit_code: Option<i32>,
    verdict: Option<Verdict>,
    body: String,
    stderr_lines: Vec<String>,
    partial: bool,
}

impl Finished {
    fn orchestrator_error(reason: String) -> Self {
        Self {
            status: OutcomeStatus::Error,
            body: format!("[orchestrator] {reason}\n"),
            reason: Some(reason),
            exit_code: None,
            verdict: None,
            stderr_lines: Vec::new(),
            partial: false,
        }
    }
}

pub(crate) struct WorkerLoop {
    worker_id: usize,
    ctx: Arc<LoopContext>,
    status: StatusReporter,
    attempt: u64,
}

impl WorkerLoop {
    pub(crate) fn new(ctx: Arc<LoopContext>, status: StatusReporter) -> Self {
        Self {
            worker_id: status.worker_id(),
            ctx,
            status,
            attempt: 0,
        }
    }

    /// Run until the store is empty, the item cap is hit, or shutdown.
    /// Returns the number of items this loop processed.
    pub(crate) async fn run(mut self) -> Result<usize, OrchestratorError> {
        let result = self.run_inner().await;
        self.status.set(LoopState::Done);
        result
    }

    async fn run_inner(&mut self) -> Result<usize, OrchestratorError> {
        let ctx = Arc::clone(&self.ctx);
        let mut processed = 0;

        loop {
            if ctx.shutdown.is_requested() {
                self.status.set(LoopState::Aborting);
                debug!(worker_id = self.worker_id, "shutdown requested; leasing stopped");
                break;
            }
            self.status.set(LoopState::Idle);

            let permit = tokio::select! {
                permit = Arc::clone(&ctx.permits).acquire_owned() => match permit {
                    Ok(p) => p,
                    Err(_) => break,
                },
                _ = ctx.shutdown.graceful_token().cancelled() => continue,
            };

            if !ctx.reserve_slot() {
                debug!(worker_id = self.worker_id, "max_items reached");
                break;
            }

            self.status.set(LoopState::Leasing);
            let owner = LeaseOwner::new(ctx.run_id, self.worker_id, self.attempt);
            self.attempt += 1;

            let item = match ctx.store.lease_next(&owner, ctx.config.lease_ttl()).await {
                Ok(Some(item)) => item,
                Ok(None) => {
                    ctx.return_slot();
                    info!(worker_id = self.worker_id, processed, "no more eligible items");
                    break;
                }
                Err(e) => {
                    ctx.return_slot();
                    return Err(self.fatal(e.into()));
                }
            };

            let span = info_span!("task", item_id = %item.id, owner = %owner);
            self.process(&owner, &item).instrument(span).await?;
            processed += 1;
            drop(permit);
        }

        Ok(processed)
    }

    /// One TaskRun: build → run → parse → verify → log → release/complete → transcript.
    async fn process(&self, owner: &LeaseOwner, item: &WorkItem) -> Result<(), OrchestratorError> {
        let started = Instant::now();
        info!(item_name = %item.name, "task started");

        let finished = self.execute(item).await;
        let duration_s = started.elapsed().as_secs();

        self.status.set(LoopState::Logging {
            item_id: item.id.clone(),
        });
        let mut outcome = Outcome::new(owner, item, finished.status, duration_s, self.ctx.clock.now())
            .with_exit_code(finished.exit_code);
        if let Some(verdict) = &finished.verdict {
            outcome = outcome.with_verdict(verdict.clone());
        }
        if let Some(reason) = &finished.reason {
            outcome = outcome.with_reason(reason.clone());
        }

        if let Err(e) = self.ctx.log.record(&outcome).await {
            return Err(self.fatal(e.into()));
        }

        let settled = if finished.status.releases_lease() {
            self.ctx.store.release(&item.id, owner).await
        } else {
            self.ctx.store.complete(&item.id, owner).await
        };
        if let Err(e) = settled {
            return Err(self.fatal(e.into()));
        }

        // the outcome is already durable and the lease settled
        let owner_tag = owner.to_string();
        let entry = TranscriptEntry {
            owner: &owner_tag,
            status: finished.status,
            finished_at: outcome.timestamp,
            body: &finished.body,
            stderr_lines: &finished.stderr_lines,
            partial: finished.partial,
        };
        if let Err(e) = self.ctx.transcripts.save(owner.run_id, &item.id, &entry).await {
            return Err(self.fatal(e.into()));
        }

        match finished.status {
            OutcomeStatus::Success => info!(duration_s, "task succeeded"),
            status => warn!(
                %status,
                duration_s,
                reason = finished.reason.as_deref().unwrap_or(""),
                "task did not succeed"
            ),
        }
        Ok(())
    }

    async fn execute(&self, item: &WorkItem) -> Finished {
        let ctx = &self.ctx;

        let prompt = match ctx.prompt.build(item) {
            Ok(p) => p,
            Err(e) => return Finished::orchestrator_error(format!("prompt: {e}")),
        };
        let spec = match CommandSpec::from_template(&ctx.config.command, &prompt) {
            Ok(spec) => spec,
            Err(e) => return Finished::orchestrator_error(e.to_string()),
        };

        self.status.set(LoopState::Running {
            item_id: item.id.clone(),
        });
        let heartbeat = ctx
            .config
            .heartbeat_interval()
            .map(|every| self.heartbeat(every, item.id.clone()));
        let run = ctx
            .runner
            .run(&spec, ctx.config.task_timeout(), ctx.shutdown.force_token())
            .await;
        drop(heartbeat);

        let output = match run {
            Ok(output) => output,
            Err(e) => {
                error!(error = %e, "worker process could not be run");
                return Finished::orchestrator_error(e.to_string());
            }
        };

        let transcript = parse_stream(output.stdout_lines.as_slice());
        if transcript.unparsed_count > 0 {
            debug!(unparsed = transcript.unparsed_count, "non-JSON lines kept verbatim");
        }

        if output.forced {
            return Finished {
                status: OutcomeStatus::Error,
                reason: Some("terminated by forced shutdown".into()),
                exit_code: output.exit_code,
                verdict: Some(transcript.verdict),
                body: transcript.text,
                stderr_lines: output.stderr_lines,
                partial: true,
            };
        }

        self.status.set(LoopState::Verifying {
            item_id: item.id.clone(),
        });
        let verification = ctx.verifier.verify(item).await;
        let (status, reason) = classify(&output, &transcript.verdict, &verification, ctx.config.task_timeout());

        Finished {
            status,
            reason,
            exit_code: output.exit_code,
            verdict: Some(transcript.verdict),
            body: transcript.text,
            partial: output.is_partial(),
            stderr_lines: output.stderr_lines,
        }
    }

    fn heartbeat(&self, every: Duration, item_id: ItemId) -> Heartbeat {
        let worker_id = self.worker_id;
        Heartbeat::start(every, move |elapsed| {
            info!(worker_id, item_id = %item_id, elapsed_s = elapsed.as_secs(), "still running");
        })
    }

    /// Stop every loop from leasing more, then hand the error up.
    fn fatal(&self, err: OrchestratorError) -> OrchestratorError {
        error!(worker_id = self.worker_id, error = %err, "fatal error; stopping all loops");
        self.ctx.shutdown.request();
        err
    }
}

/// Final status of a run that was executed (not forced, not an orchestrator error).
///
/// 優先順位: timeout > 非ゼロ終了 > worker 自身のエラー報告 > verifier の判定
fn classify(
    output: &RunOutput,
    verdict: &Verdict,
    verification: &Verification,
    timeout: Duration,
) -> (OutcomeStatus, Option<String>) {
    if output.timed_out {
        let mut reason = format!("timed out after {}s", timeout.as_secs());
        if let Some(why) = verification.reason.as_deref().filter(|_| !verification.ok) {
            reason.push_str(&format!("; verification: {why}"));
        }
        return (OutcomeStatus::Timeout, Some(reason));
    }
    match output.exit_code {
        Some(0) => {}
        Some(code) => return (OutcomeStatus::Failed, Some(format!("exit code {code}"))),
        None => return (OutcomeStatus::Failed, Some("killed by signal".into())),
    }
    if let Verdict::Errored { message } = verdict {
        let reason = match message {
            Some(m) => format!("worker reported an error: {m}"),
            None => "worker reported an error".into(),
        };
        return (OutcomeStatus::Failed, Some(reason));
    }
    if !verification.ok {
        let reason = verification
            .reason
            .clone()
            .unwrap_or_else(|| "verification failed".into());
        return (OutcomeStatus::Failed, Some(reason));
    }
    if *verdict == Verdict::Unknown {
        // the verifier has the final word; just note the missing result event
        return (OutcomeStatus::Success, Some("no result event; accepted by verifier".into()));
    }
    (OutcomeStatus::Success, None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn output(exit_code: Option<i32>, timed_out: bool) -> RunOutput {
        RunOutput {
            exit_code,
            stdout_lines: Vec::new(),
            stderr_lines: Vec::new(),
            timed_out,
            forced: false,
            pid: None,
            duration: Duration::ZERO,
        }
    }

    const TIMEOUT: Duration = Duration::from_secs(30);

    #[rstest]
    #[case::clean(output(Some(0), false), Verdict::Completed, Verification::ok(), OutcomeStatus::Success)]
    #[case::nonzero(output(Some(2), false), Verdict::Completed, Verification::ok(), OutcomeStatus::Failed)]
    #[case::signal(output(None, false), Verdict::Unknown, Verification::ok(), OutcomeStatus::Failed)]
    #[case::timeout(output(None, true), Verdict::Unknown, Verification::ok(), OutcomeStatus::Timeout)]
    #[case::timeout_wins_over_verifier(output(None, true), Verdict::Completed, Verification::rejected("x"), OutcomeStatus::Timeout)]
    #[case::worker_error(output(Some(0), false), Verdict::Errored { message: None }, Verification::ok(), OutcomeStatus::Failed)]
    #[case::rejected(output(Some(0), false), Verdict::Completed, Verification::rejected("no file"), OutcomeStatus::Failed)]
    #[case::unknown_but_verified(output(Some(0), false), Verdict::Unknown, Verification::ok(), OutcomeStatus::Success)]
    fn classification(
        #[case] out: RunOutput,
        #[case] verdict: Verdict,
        #[case] verification: Verification,
        #[case] expected: OutcomeStatus,
    ) {
        let (status, _) = classify(&out, &verdict, &verification, TIMEOUT);
        assert_eq!(status, expected);
    }

    #[test]
    fn rejection_reason_is_kept() {
        let (_, reason) = classify(
            &output(Some(0), false),
            &Verdict::Completed,
            &Verification::rejected("out/a.json missing"),
            TIMEOUT,
        );
        assert_eq!(reason.as_deref(), Some("out/a.json missing"));
    }

    #[test]
    fn timeout_reason_mentions_verification() {
        let (_, reason) = classify(
            &output(None, true),
            &Verdict::Unknown,
            &Verification::rejected("no output file"),
            TIMEOUT,
        );
        assert_eq!(reason.as_deref(), Some("timed out after 30s; verification: no output file"));
    }
}
