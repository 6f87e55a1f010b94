use std::{fmt, path::PathBuf, sync::Arc};

use anyhow::Result;
use serde_json::Value;
use shared_logging::{JsonLogger, LogLevel, LogRecord};

/// Builder for memory telemetry sinks.
pub struct MemoryTelemetryBuilder {
    module: String,
    log_path: Option<PathBuf>,
    logger: Option<Arc<JsonLogger>>,
}

impl MemoryTelemetryBuilder {
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
    pub fn build(self) -> Result<MemoryTelemetry> {
        let logger = match (self.logger, self.log_path) {
            (Some(shared), _) => Some(shared),
            (None, Some(path)) => Some(Arc::new(JsonLogger::new(path)?)),
            (None, None) => None,
        };
        Ok(MemoryTelemetry {
            inner: Arc::new(TelemetryInner {
                module: self.module,
                logger,
            }),
        })
    }
}

/// Telemetry handle shared by the memory tiers.
#[derive(Clone)]
pub struct MemoryTelemetry {
    inner: Arc<TelemetryInner>,
}

impl fmt::Debug for MemoryTelemetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryTelemetry")
            .field("module", &self.inner.module)
            .finish()
    }
}

struct TelemetryInner {
    module: String,
    logger: Option<Arc<JsonLogger>>,
}

impl MemoryTelemetry {
    /// Returns a builder.
    #[must_use]
    pub fn builder(module: impl Into<String>) -> MemoryTelemetryBuilder {
        MemoryTelemetryBuilder::new(module)
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
