use thiserror::Error;

use crate::model::{Priority, TaskStatus};

/// Normalized quick-add input shared by the CLI and the tool server.
///
/// `text` may carry inline tokens (`#tag`, `+project`, `@user`, `due:`,
/// `deadline:`, `when:`, `p:`, `every:`); explicit fields win over tokens.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaptureInput {
    pub text: Vec<String>,
    pub notes: Option<String>,
    pub project: Option<String>,
    pub area: Option<String>,
    pub assignee: Option<String>,
    pub status: Option<TaskStatus>,
    pub priority: Option<Priority>,
    pub tags: Vec<String>,
    pub when: Option<String>,
    pub due: Option<String>,
    pub deadline: Option<String>,
    pub every: Option<String>,
}

impl CaptureInput {
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            text: text.into().split_whitespace().map(str::to_string).collect(),
            ..Self::default()
        }
    }

    pub fn require_text(&self) -> Result<(), CaptureError> {
        if self.text.iter().all(|word| word.trim().is_empty()) {
            return Err(CaptureError::EmptyText);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptureError {
    #[error("Task text cannot be empty")]
    EmptyText,
    #[error("Unknown project '{0}'")]
    UnknownProject(String),
    #[error("Unknown area '{0}'")]
    UnknownArea(String),
    #[error("Unknown user '{0}'")]
    UnknownUser(String),
}
