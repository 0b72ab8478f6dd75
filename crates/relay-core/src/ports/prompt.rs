//! PromptBuilder port - turns a work item into the worker's prompt string.

use thiserror::Error;

use crate::domain::WorkItem;

#[derive(Debug, Error)]
pub enum PromptError {
    #[error("placeholder '{{{placeholder}}}' has no value for item {item_id}")]
    MissingField { placeholder: String, item_id: String },

    #[error("unterminated placeholder in template")]
    Unterminated,
}

pub trait PromptBuilder: Send + Sync {
    fn build(&self, item: &WorkItem) -> Result<String, PromptError>;
}
