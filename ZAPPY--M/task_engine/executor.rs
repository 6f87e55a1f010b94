use std::{fmt, process::Stdio, time::Duration};

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;

use crate::task::TaskDescriptor;

/// Errors surfaced by execution capabilities.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExecutionError {
    /// The executor could not be started.
    #[error("launch error: {0}")]
    Launch(String),
    /// The executor ran but reported failure.
    #[error("execution failed: {0}")]
    Failed(String),
    /// The report carried no usable final result.
    #[error("result extraction failed: {0}")]
    Extraction(String),
    /// The executor panicked.
    #[error("executor panicked: {0}")]
    Panicked(String),
    /// No executor is available for the request.
    #[error("executor unavailable: {0}")]
    Unavailable(String),
}

/// Opaque output of an execution. `Display` is the fallback rendering used when no
/// final result can be extracted.
pub trait ExecutionReport: fmt::Display + Send {
    /// Extracts the final answer.
    fn final_result(&self) -> Result<String, ExecutionError>;
}

/// Capability that carries out a single task.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    /// Identifier used in logs.
    fn name(&self) -> &str;
    /// Runs the task to completion.
    async fn execute(&self, task: &TaskDescriptor)
        -> Result<Box<dyn ExecutionReport>, ExecutionError>;
}

/// Plain report with an optional final answer and a transcript.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextReport {
    final_answer: Option<String>,
    transcript: String,
}

impl TextReport {
    /// Report whose final answer is known.
    #[must_use]
    pub fn answered(answer: impl Into<String>) -> Self {
        let answer = answer.into();
        Self {
            transcript: answer.clone(),
            final_answer: Some(answer),
        }
    }

    /// Report that only has a transcript.
    #[must_use]
    pub fn transcript_only(transcript: impl Into<String>) -> Self {
        Self {
            final_answer: None,
            transcript: transcript.into(),
        }
    }
}

impl fmt::Display for TextReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.transcript)
    }
}

impl ExecutionReport for TextReport {
    fn final_result(&self) -> Result<String, ExecutionError> {
        self.final_answer
            .clone()
            .ok_or_else(|| ExecutionError::Extraction("report has no final answer".into()))
    }
}

/// In-memory executor that echoes the task back (development and tests).
#[derive(Debug, Default, Clone)]
pub struct LoopbackExecutor;

#[async_trait]
impl TaskExecutor for LoopbackExecutor {
    fn name(&self) -> &str {
        "loopback"
    }

    async fn execute(
        &self,
        task: &TaskDescriptor,
    ) -> Result<Box<dyn ExecutionReport>, ExecutionError> {
        Ok(Box::new(TextReport::answered(format!(
            "[{}] {}",
            task.mode, task.task_text
        ))))
    }
}

/// Executor that runs the task text through a shell.
///
/// A non-zero exit status is a failure. Trimmed stdout is the final answer; when
/// stdout is empty the report falls back to the combined transcript.
#[derive(Debug, Clone)]
pub struct ProcessExecutor {
    shell: String,
    timeout: Option<Duration>,
}

impl ProcessExecutor {
    /// Uses `sh -c`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            shell: "sh".into(),
            timeout: None,
        }
    }

    /// Overrides the shell binary.
    #[must_use]
    pub fn shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    /// Fails tasks that run longer than `timeout`.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl Default for ProcessExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskExecutor for ProcessExecutor {
    fn name(&self) -> &str {
        "process"
    }

    async fn execute(
        &self,
        task: &TaskDescriptor,
    ) -> Result<Box<dyn ExecutionReport>, ExecutionError> {
        let child = Command::new(&self.shell)
            .arg("-c")
            .arg(&task.task_text)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| ExecutionError::Launch(format!("{}: {err}", self.shell)))?;
        let waiting = child.wait_with_output();
        let output = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, waiting)
                .await
                .map_err(|_| ExecutionError::Failed(format!("timed out after {limit:?}")))?,
            None => waiting.await,
        }
        .map_err(|err| ExecutionError::Failed(err.to_string()))?;

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if !output.status.success() {
            return Err(ExecutionError::Failed(format!(
                "{}: {stderr}",
                output.status
            )));
        }
        if stdout.is_empty() {
            return Ok(Box::new(TextReport::transcript_only(format!(
                "{} (stderr: {stderr})",
                output.status
            ))));
        }
        Ok(Box::new(TextReport::answered(stdout)))
    }
}
