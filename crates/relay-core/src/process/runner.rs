//! ProcessRunner - run exactly one external command to completion or timeout.
//!
//! Waiting for exit and reading the two pipes happen inside one combined
//! future. Reading stdout to the end before looking at stderr (or waiting for
//! exit first) can deadlock as soon as the child fills the other pipe's buffer.

use std::process::Stdio;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::collector::LineCollector;
use super::command::CommandSpec;
use super::terminate::terminate;

/// Grace period between SIGTERM and SIGKILL.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(2);

/// Upper bound on the final read after a kill.
///
/// Pipes normally close right after the process dies, but a grandchild that
/// escaped the process group can keep them open.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum RunnerError {
    /// The process could not be started at all (command not found, permissions, ...).
    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to wait for process: {0}")]
    Wait(#[source] std::io::Error),

    #[error("child {0} pipe was not captured")]
    PipeMissing(&'static str),

    #[error("command template is empty")]
    EmptyCommand,
}

/// Everything observed about one process execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutput {
    /// `None` when the process was killed by a signal (timeout, crash).
    pub exit_code: Option<i32>,
    pub stdout_lines: Vec<String>,
    pub stderr_lines: Vec<String>,
    pub timed_out: bool,
    /// Terminated because of a forced shutdown rather than its own timeout.
    pub forced: bool,
    pub pid: Option<u32>,
    pub duration: Duration,
}

impl RunOutput {
    pub fn succeeded(&self) -> bool {
        !self.timed_out && !self.forced && self.exit_code == Some(0)
    }

    /// Whether output was cut short by a kill.
    pub fn is_partial(&self) -> bool {
        self.timed_out || self.forced
    }
}

#[derive(Debug, Clone)]
pub struct ProcessRunner {
    grace_period: Duration,
    drain_timeout: Duration,
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::new(DEFAULT_GRACE_PERIOD, DEFAULT_DRAIN_TIMEOUT)
    }
}

enum Waited {
    Exited(std::io::Result<std::process::ExitStatus>),
    TimedOut,
    Forced,
}

impl ProcessRunner {
    pub fn new(grace_period: Duration, drain_timeout: Duration) -> Self {
        Self {
            grace_period,
            drain_timeout,
        }
    }

    /// Run `spec` with a wall-clock `timeout`.
    ///
    /// Cancelling `force` terminates the process immediately (no grace period);
    /// the result is then marked `forced` and carries whatever output was read.
    pub async fn run(
        &self,
        spec: &CommandSpec,
        timeout: Duration,
        force: &CancellationToken,
    ) -> Result<RunOutput, RunnerError> {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // 子プロセスごと止められるように自分のプロセスグループで起動する
        #[cfg(unix)]
        cmd.process_group(0);

        let started = Instant::now();
        let mut child = cmd.spawn().map_err(|source| RunnerError::Spawn {
            program: spec.program.clone(),
            source,
        })?;
        let pid = child.id();
        debug!(pid, program = %spec.program, "spawned worker process");

        let stdout = child.stdout.take().ok_or(RunnerError::PipeMissing("stdout"))?;
        let stderr = child.stderr.take().ok_or(RunnerError::PipeMissing("stderr"))?;
        let mut out = LineCollector::new(stdout);
        let mut err = LineCollector::new(stderr);

        let waited = {
            let combined = async {
                let (status, out_res, err_res) = tokio::join!(child.wait(), out.drain(), err.drain());
                if let Err(e) = out_res {
                    warn!(pid, error = %e, "stdout read failed");
                }
                if let Err(e) = err_res {
                    warn!(pid, error = %e, "stderr read failed");
                }
                status
            };
            tokio::select! {
                res = tokio::time::timeout(timeout, combined) => match res {
                    Ok(status) => Waited::Exited(status),
                    Err(_) => Waited::TimedOut,
                },
                _ = force.cancelled() => Waited::Forced,
            }
        };

        let (status, timed_out, forced) = match waited {
            Waited::Exited(status) => (status.map_err(RunnerError::Wait)?, false, false),
            Waited::TimedOut => {
                warn!(pid, timeout_secs = timeout.as_secs(), "process timed out; terminating");
                let (how, status) = terminate(&mut child, pid, self.grace_period, force)
                    .await
                    .map_err(RunnerError::Wait)?;
                info!(pid, termination = ?how, "timed-out process reaped");
                (status, true, false)
            }
            Waited::Forced => {
                warn!(pid, "forced shutdown; killing process");
                let (_, status) = terminate(&mut child, pid, Duration::ZERO, force)
                    .await
                    .map_err(RunnerError::Wait)?;
                (status, false, true)
            }
        };

        if timed_out || forced {
            self.final_read(pid, &mut out, &mut err).await;
        }

        let output = RunOutput {
            exit_code: status.code(),
            stdout_lines: out.into_lines(),
            stderr_lines: err.into_lines(),
            timed_out,
            forced,
            pid,
            duration: started.elapsed(),
        };
        debug!(
            pid,
            exit_code = ?output.exit_code,
            stdout_lines = output.stdout_lines.len(),
            stderr_lines = output.stderr_lines.len(),
            "process finished"
        );
        Ok(output)
    }

    /// One bounded attempt to pick up output flushed right before death.
    async fn final_read<A, B>(&self, pid: Option<u32>, out: &mut LineCollector<A>, err: &mut LineCollector<B>)
    where
        A: tokio::io::AsyncRead + Unpin,
        B: tokio::io::AsyncRead + Unpin,
    {
        let drained = tokio::time::timeout(self.drain_timeout, async {
            let (o, e) = tokio::join!(out.drain(), err.drain());
            o.and(e)
        })
        .await;
        match drained {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(pid, error = %e, "final read failed; keeping partial output"),
            Err(_) => warn!(pid, "final read timed out; keeping partial output"),
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> CommandSpec {
        CommandSpec::new("sh").arg("-c").arg(script)
    }

    fn runner() -> ProcessRunner {
        ProcessRunner::new(Duration::from_millis(500), Duration::from_secs(2))
    }

    #[tokio::test]
    async fn captures_stdout_stderr_and_exit_code() {
        let out = runner()
            .run(
                &sh("echo one; echo two; echo oops >&2; exit 3"),
                Duration::from_secs(10),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(out.exit_code, Some(3));
        assert_eq!(out.stdout_lines, vec!["one", "two"]);
        assert_eq!(out.stderr_lines, vec!["oops"]);
        assert!(!out.timed_out);
        assert!(!out.succeeded());
    }

    #[tokio::test]
    async fn large_output_on_both_pipes_does_not_deadlock() {
        // ~1 MiB on each pipe, far beyond a pipe buffer.
        let script = "i=0; while [ $i -lt 20000 ]; do \
                      echo \"out line $i padding padding padding\"; \
                      echo \"err line $i padding padding padding\" >&2; \
                      i=$((i+1)); done";
        let out = runner()
            .run(&sh(script), Duration::from_secs(60), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(out.exit_code, Some(0));
        assert_eq!(out.stdout_lines.len(), 20000);
        assert_eq!(out.stderr_lines.len(), 20000);
    }

    #[tokio::test]
    async fn timeout_kills_and_reaps_process() {
        let out = runner()
            .run(&sh("sleep 30"), Duration::from_millis(200), &CancellationToken::new())
            .await
            .unwrap();

        assert!(out.timed_out);
        assert_eq!(out.exit_code, None);
        assert!(out.duration < Duration::from_secs(10));

        // reaped: the pid no longer exists
        let pid = nix::unistd::Pid::from_raw(out.pid.unwrap() as i32);
        assert!(nix::sys::signal::kill(pid, None).is_err());
    }

    #[tokio::test]
    async fn partial_output_survives_timeout() {
        let out = runner()
            .run(
                &sh("echo before-hang; echo warn-before-hang >&2; sleep 30"),
                Duration::from_millis(500),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(out.timed_out);
        assert!(out.is_partial());
        assert_eq!(out.stdout_lines, vec!["before-hang"]);
        assert_eq!(out.stderr_lines, vec!["warn-before-hang"]);
    }

    #[tokio::test]
    async fn sigterm_ignoring_process_is_killed_after_grace() {
        let started = Instant::now();
        let out = runner()
            .run(
                &sh("trap '' TERM; echo armed; sleep 30"),
                Duration::from_millis(300),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(out.timed_out);
        assert_eq!(out.stdout_lines, vec!["armed"]);
        // timeout + grace, nowhere near the 30s sleep
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn force_token_kills_immediately() {
        let force = CancellationToken::new();
        let trigger = force.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            trigger.cancel();
        });

        let out = runner()
            .run(&sh("echo started; sleep 30"), Duration::from_secs(60), &force)
            .await
            .unwrap();

        assert!(out.forced);
        assert!(!out.timed_out);
        assert_eq!(out.stdout_lines, vec!["started"]);
    }

    #[tokio::test]
    async fn missing_program_is_a_spawn_error() {
        let err = runner()
            .run(
                &CommandSpec::new("/definitely/not/a/real/binary"),
                Duration::from_secs(1),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, RunnerError::Spawn { .. }));
    }
}
