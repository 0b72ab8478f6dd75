//! Verifier implementations.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::prompt::render;
use crate::domain::WorkItem;
use crate::ports::{Verification, Verifier};
use crate::process::{CommandSpec, ProcessRunner};

/// Trusts the worker: every run verifies.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

#[async_trait]
impl Verifier for AcceptAll {
    async fn verify(&self, _item: &WorkItem) -> Verification {
        Verification::ok()
    }
}

/// Checks that the file the worker was supposed to write exists.
///
/// The path is a template rendered against the item, e.g. `out/{id}.json`.
#[derive(Debug, Clone)]
pub struct FileExistsVerifier {
    path_template: String,
    require_non_empty: bool,
}

impl FileExistsVerifier {
    pub fn new(path_template: impl Into<String>) -> Self {
        Self {
            path_template: path_template.into(),
            require_non_empty: false,
        }
    }

    pub fn non_empty(mut self) -> Self {
        self.require_non_empty = true;
        self
    }
}

#[async_trait]
impl Verifier for FileExistsVerifier {
    async fn verify(&self, item: &WorkItem) -> Verification {
        let path = match render(&self.path_template, item) {
            Ok(p) => PathBuf::from(p),
            Err(e) => return Verification::rejected(format!("cannot render path: {e}")),
        };
        match tokio::fs::metadata(&path).await {
            Ok(meta) if !meta.is_file() => Verification::rejected(format!("{} is not a file", path.display())),
            Ok(meta) if self.require_non_empty && meta.len() == 0 => {
                Verification::rejected(format!("{} is empty", path.display()))
            }
            Ok(_) => Verification::ok(),
            Err(e) => Verification::rejected(format!("{}: {e}", path.display())),
        }
    }
}

/// Runs a check command; exit code 0 means verified.
///
/// Every argv element is a template rendered against the item.
#[derive(Debug, Clone)]
pub struct CommandVerifier {
    argv: Vec<String>,
    timeout: Duration,
    runner: ProcessRunner,
}

impl CommandVerifier {
    pub fn new(argv: Vec<String>, timeout: Duration) -> Self {
        Self {
            argv,
            timeout,
            runner: ProcessRunner::default(),
        }
    }

    fn spec_for(&self, item: &WorkItem) -> Result<CommandSpec, String> {
        let mut rendered = Vec::with_capacity(self.argv.len());
        for arg in &self.argv {
            rendered.push(render(arg, item).map_err(|e| e.to_string())?);
        }
        let (program, args) = rendered.split_first().ok_or("verify command is empty")?;
        Ok(CommandSpec::new(program.clone()).args(args.iter().cloned()))
    }
}

#[async_trait]
impl Verifier for CommandVerifier {
    async fn verify(&self, item: &WorkItem) -> Verification {
        let spec = match self.spec_for(item) {
            Ok(spec) => spec,
            Err(reason) => return Verification::rejected(reason),
        };
        // verification is short; it is not interrupted by a forced shutdown
        let never = CancellationToken::new();
        match self.runner.run(&spec, self.timeout, &never).await {
            Ok(out) if out.succeeded() => {
                debug!(item_id = %item.id, "verify command passed");
                Verification::ok()
            }
            Ok(out) if out.timed_out => Verification::rejected("verify command timed out"),
            Ok(out) => {
                let detail = out.stderr_lines.last().or(out.stdout_lines.last());
                match detail {
                    Some(line) => Verification::rejected(format!(
                        "verify command exited with {:?}: {line}",
                        out.exit_code
                    )),
                    None => Verification::rejected(format!("verify command exited with {:?}", out.exit_code)),
                }
            }
            Err(e) => {
                warn!(item_id = %item.id, error = %e, "verify command could not run");
                Verification::rejected(format!("verify command could not run: {e}"))
            }
        }
    }
}
