use serde::{Deserialize, Serialize};

use super::RunnerError;

/// Token replaced by the prompt inside command arguments.
pub const PROMPT_PLACEHOLDER: &str = "{prompt}";

/// A fully resolved command line for one TaskRun.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Build a command from an argv template.
    ///
    /// Every `{prompt}` occurrence is replaced by `prompt`. When no argument
    /// mentions the placeholder the prompt is appended as the last argument.
    pub fn from_template(argv: &[String], prompt: &str) -> Result<Self, RunnerError> {
        let (program, rest) = argv.split_first().ok_or(RunnerError::EmptyCommand)?;

        let mut substituted = false;
        let mut args = Vec::with_capacity(rest.len() + 1);
        for arg in rest {
            if arg.contains(PROMPT_PLACEHOLDER) {
                substituted = true;
                args.push(arg.replace(PROMPT_PLACEHOLDER, prompt));
            } else {
                args.push(arg.clone());
            }
        }
        if !substituted {
            args.push(prompt.to_string());
        }

        Ok(Self::new(program.clone()).args(args))
    }
}
