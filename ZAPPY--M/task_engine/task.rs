use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Execution mode requested for a task.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskMode {
    /// Web interaction through a browser-driving agent.
    #[default]
    Browser,
    /// Code analysis and generation.
    Code,
    /// Low-latency runs with reduced reasoning.
    Fast,
}

impl TaskMode {
    /// Short label used in logs and metadata.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Browser => "browser",
            Self::Code => "code",
            Self::Fast => "fast",
        }
    }
}

impl fmt::Display for TaskMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Error returned when parsing an unknown mode label.
#[derive(Debug, Error)]
#[error("unknown task mode `{0}` (expected browser, code, or fast)")]
pub struct UnknownTaskMode(pub String);

impl FromStr for TaskMode {
    type Err = UnknownTaskMode;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "browser" => Ok(Self::Browser),
            "code" => Ok(Self::Code),
            "fast" => Ok(Self::Fast),
            other => Err(UnknownTaskMode(other.to_string())),
        }
    }
}

/// Queued unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDescriptor {
    /// Instruction handed to the executor.
    pub task_text: String,
    /// Requested mode.
    pub mode: TaskMode,
}

impl TaskDescriptor {
    /// Creates a descriptor.
    #[must_use]
    pub fn new(task_text: impl Into<String>, mode: TaskMode) -> Self {
        Self {
            task_text: task_text.into(),
            mode,
        }
    }
}

/// Marker for a task that did not produce a result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFailure {
    /// Rendered error, kept for diagnostics.
    pub reason: String,
}

/// Terminal state of a single task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum TaskOutcome {
    /// Executor returned a result.
    Succeeded(String),
    /// Execution failed; see the failure reason.
    Failed(TaskFailure),
}

impl TaskOutcome {
    pub(crate) fn failed(reason: impl Into<String>) -> Self {
        Self::Failed(TaskFailure {
            reason: reason.into(),
        })
    }

    /// Result text when the task succeeded.
    #[must_use]
    pub fn result(&self) -> Option<&str> {
        match self {
            Self::Succeeded(result) => Some(result),
            Self::Failed(_) => None,
        }
    }

    /// True for [`TaskOutcome::Succeeded`].
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded(_))
    }
}

/// Result of one task in a batch, in enqueue order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskResult {
    /// Instruction that ran.
    pub task_text: String,
    /// Mode it ran in.
    pub mode: TaskMode,
    /// What happened.
    pub outcome: TaskOutcome,
}
