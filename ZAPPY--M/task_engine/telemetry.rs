use std::{fmt, path::PathBuf, sync::Arc};

use anyhow::Result;
use serde_json::Value;
use shared_logging::{JsonLogger, LogLevel, LogRecord};

/// Builder for task engine telemetry sinks.
pub struct TaskTelemetryBuilder {
    module: String,
    log_path: Option<PathBuf>,
    logger: Option<Arc<JsonLogger>>,
}

impl TaskTelemetryBuilder {
    /// Creates the builder.
    #[must_use]
    pub fn new(module: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            log_path: None,
            logger: None,
        }
    }

    /// Opens a dedicated JSON log at `path`.
    #[must_use]
    pub fn log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_path = Some(path.into());
        self
    }

    /// Reuses a logger shared with other modules. Takes precedence over `log_path`.
    #[must_use]
    pub fn logger(mut self, logger: Arc<JsonLogger>) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Builds the telemetry handle.
    pub fn build(self) -> Result<TaskTelemetry> {
        let logger = match (self.logger, self.log_path) {
            (Some(shared), _) => Some(shared),
            (None, Some(path)) => Some(Arc::new(JsonLogger::new(path)?)),
            (None, None) => None,
        };
        Ok(TaskTelemetry {
            inner: Arc::new(TelemetryInner {
                module: self.module,
                logger,
            }),
        })
    }
}

/// Telemetry handle shared by engine rounds.
#[derive(Clone)]
pub struct TaskTelemetry {
    inner: Arc<TelemetryInner>,
}

impl fmt::Debug for TaskTelemetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskTelemetry")
            .field("module", &self.inner.module)
            .finish()
    }
}

struct TelemetryInner {
    module: String,
    logger: Option<Arc<JsonLogger>>,
}

impl TaskTelemetry {
    /// Returns a builder.
    #[must_use]
    pub fn builder(module: impl Into<String>) -> TaskTelemetryBuilder {
        TaskTelemetryBuilder::new(module)
    }

    /// Logs structured metadata to the JSON sink and mirrors it as a `tracing` event.
    pub fn log(&self, level: LogLevel, message: &str, metadata: Value) -> Result<()> {
        let module = self.inner.module.as_str();
        match level {
            LogLevel::Debug => tracing::debug!(module, %metadata, "{message}"),
            LogLevel::Info => tracing::info!(module, %metadata, "{message}"),
            LogLevel::Warn => tracing::warn!(module, %metadata, "{message}"),
            LogLevel::Error => tracing::error!(module, %metadata, "{message}"),
        }
        if let Some(logger) = &self.inner.logger {
            logger.log(&LogRecord::new(module, level, message).with_metadata(&metadata))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn telemetry_writes_structured_log() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("tasks.log");
        let telemetry = TaskTelemetry::builder("task_engine")
            .log_path(&path)
            .build()
            .unwrap();
        telemetry
            .log(LogLevel::Error, "task.failed", json!({ "task": "render" }))
            .unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("task.failed"));
        assert!(content.contains("\"module\":\"task_engine\""));
    }

    #[test]
    fn telemetry_without_sink_is_a_no_op() {
        let telemetry = TaskTelemetry::builder("task_engine").build().unwrap();
        telemetry
            .log(LogLevel::Info, "task.started", json!({ "task": "noop" }))
            .unwrap();
    }
}
