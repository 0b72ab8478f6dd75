//! Process - one external worker process per TaskRun.
//!
//! - **CommandSpec**: program + args, with the prompt substituted in
//! - **ProcessRunner**: spawn, combined wait-and-drain under a timeout,
//!   two-stage termination, final bounded read
//! - **LineCollector**: cancel-tolerant line capture for a child pipe

mod collector;
mod command;
mod runner;
mod terminate;

pub use self::collector::LineCollector;
pub use self::command::{CommandSpec, PROMPT_PLACEHOLDER};
pub use self::runner::{ProcessRunner, RunOutput, RunnerError};
