use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::Deserialize;
use shared_logging::{LogLevel, LoggerOptions};
use zappy_memory_data::MemoryConfig;
use zappy_task_engine::{TaskEngine, TaskMode};

/// Which executor backs the engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ExecutorKind {
    /// Echoes tasks back.
    #[default]
    Loopback,
    /// Runs each task as a shell command.
    Process,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MemorySection {
    pub db_path: PathBuf,
    pub consolidation_threshold: usize,
    pub default_ttl_secs: u64,
}

impl Default for MemorySection {
    fn default() -> Self {
        let defaults = MemoryConfig::default();
        Self {
            db_path: defaults.durable_path,
            consolidation_threshold: defaults.consolidation_threshold,
            default_ttl_secs: defaults.default_ttl.as_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineSection {
    pub concurrency: usize,
    pub mode: TaskMode,
    pub executor: ExecutorKind,
    /// TTL of the short-term record captured for each submitted task.
    pub task_ttl_secs: u64,
    pub process_timeout_secs: Option<u64>,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            concurrency: TaskEngine::DEFAULT_CONCURRENCY,
            mode: TaskMode::default(),
            executor: ExecutorKind::default(),
            task_ttl_secs: 3600,
            process_timeout_secs: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingSection {
    pub level: String,
    pub file: PathBuf,
    pub max_bytes: u64,
    pub max_backups: usize,
}

impl Default for LoggingSection {
    fn default() -> Self {
        let defaults = LoggerOptions::default();
        Self {
            level: LogLevel::Info.label().into(),
            file: PathBuf::from("data").join("logs").join("app.log"),
            max_bytes: defaults.max_bytes,
            max_backups: defaults.max_backups,
        }
    }
}

/// Settings for the `recall` binary, read from an optional TOML file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub memory: MemorySection,
    pub engine: EngineSection,
    pub logging: LoggingSection,
}

impl AppConfig {
    /// Loads `path` when given, defaults otherwise. Relative paths inside the file
    /// resolve against the file's directory.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let mut config = Self::parse(&raw)
            .with_context(|| format!("invalid config {}", path.display()))?;
        if let Some(base) = path.parent() {
            config.memory.db_path = rebase(base, &config.memory.db_path);
            config.logging.file = rebase(base, &config.logging.file);
        }
        Ok(config)
    }

    pub fn parse(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    pub fn memory_config(&self) -> MemoryConfig {
        MemoryConfig::with_path(&self.memory.db_path)
            .consolidation_threshold(self.memory.consolidation_threshold)
            .default_ttl(Duration::from_secs(self.memory.default_ttl_secs))
    }

    /// Effective level: `--debug` wins, then `LOG_LEVEL`, then the file.
    pub fn log_level(&self, debug: bool) -> Result<LogLevel> {
        if debug {
            return Ok(LogLevel::Debug);
        }
        self.resolve_level(LogLevel::from_env("LOG_LEVEL")?)
    }

    fn resolve_level(&self, env_level: Option<LogLevel>) -> Result<LogLevel> {
        if let Some(level) = env_level {
            return Ok(level);
        }
        self.logging
            .level
            .parse()
            .with_context(|| format!("invalid logging.level `{}`", self.logging.level))
    }

    pub const fn logger_options(&self, min_level: LogLevel) -> LoggerOptions {
        LoggerOptions {
            min_level,
            max_bytes: self.logging.max_bytes,
            max_backups: self.logging.max_backups,
        }
    }

    pub const fn task_ttl(&self) -> Duration {
        Duration::from_secs(self.engine.task_ttl_secs)
    }
}

fn rebase(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() || base.as_os_str().is_empty() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}
