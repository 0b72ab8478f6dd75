//! Two-stage termination: graceful signal, grace period, forced kill.

use std::time::Duration;

use tokio::process::Child;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// How the child finally went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Termination {
    /// Exited within the grace period after SIGTERM.
    Graceful,
    /// Needed SIGKILL.
    Killed,
}

/// Terminate `child` (and its process group) and reap it.
///
/// `force` cuts the grace period short: a second shutdown request means
/// "kill now" for every in-flight run.
///
/// `pid` is the id captured at spawn time: the group is signalled even when
/// the leader already exited but a grandchild still holds the pipes open.
pub(crate) async fn terminate(
    child: &mut Child,
    pid: Option<u32>,
    grace: Duration,
    force: &CancellationToken,
) -> std::io::Result<(Termination, std::process::ExitStatus)> {
    let Some(pid) = pid else {
        child.start_kill()?;
        let status = child.wait().await?;
        return Ok((Termination::Killed, status));
    };

    send_term(pid);

    let graceful = tokio::select! {
        res = tokio::time::timeout(grace, child.wait()) => res.ok(),
        _ = force.cancelled() => None,
    };
    if let Some(status) = graceful {
        debug!(pid, "process exited after SIGTERM");
        return Ok((Termination::Graceful, status?));
    }

    warn!(pid, grace_secs = grace.as_secs(), "process ignored SIGTERM; killing");
    send_kill(pid);
    // Fallback for the direct child in case the group signal missed it.
    if let Err(err) = child.start_kill() {
        debug!(pid, error = %err, "start_kill after group kill");
    }
    let status = child.wait().await?;
    Ok((Termination::Killed, status))
}

#[cfg(unix)]
fn send_term(pid: u32) {
    signal_group(pid, nix::sys::signal::Signal::SIGTERM);
}

#[cfg(unix)]
fn send_kill(pid: u32) {
    signal_group(pid, nix::sys::signal::Signal::SIGKILL);
}

#[cfg(unix)]
fn signal_group(pid: u32, signal: nix::sys::signal::Signal) {
    use nix::sys::signal::killpg;
    use nix::unistd::Pid;

    // The child was spawned as the leader of its own group (pgid == pid).
    #[allow(clippy::cast_possible_wrap)]
    let pgid = Pid::from_raw(pid as i32);
    if let Err(err) = killpg(pgid, signal) {
        // ESRCH: the group is already gone.
        debug!(pid, ?signal, error = %err, "killpg failed");
    }
}

#[cfg(not(unix))]
fn send_term(_pid: u32) {}

#[cfg(not(unix))]
fn send_kill(_pid: u32) {}
