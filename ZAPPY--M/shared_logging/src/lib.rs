#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! JSON-lines logging shared by the memory tiers, the task engine, and the CLI.

use std::{
    env,
    fs::{self, File},
    io::Write,
    path::{Path, PathBuf},
    str::FromStr,
};

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Log severity level, ordered from least to most severe.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    /// Verbose diagnostics.
    Debug,
    /// Normal operation.
    Info,
    /// Recoverable problems.
    Warn,
    /// Failures.
    Error,
}

impl LogLevel {
    /// Reads a level from the named environment variable. Unset yields `None`; a set
    /// but unparsable value is an error.
    pub fn from_env(var: &str) -> Result<Option<Self>> {
        match env::var(var) {
            Ok(raw) => raw
                .parse()
                .map(Some)
                .map_err(|err| anyhow!("invalid {var}: {err}")),
            Err(env::VarError::NotPresent) => Ok(None),
            Err(err @ env::VarError::NotUnicode(_)) => Err(anyhow!("invalid {var}: {err}")),
        }
    }

    /// Lower-case label (`debug`, `info`, ...).
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

impl FromStr for LogLevel {
    type Err = anyhow::Error;

    /// Accepts level names as well as the numeric levels 10/20/30/40.
    fn from_str(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if let Ok(numeric) = trimmed.parse::<u32>() {
            return Ok(match numeric {
                0..=10 => Self::Debug,
                11..=20 => Self::Info,
                21..=30 => Self::Warn,
                _ => Self::Error,
            });
        }
        match trimmed.to_ascii_lowercase().as_str() {
            "debug" | "trace" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" | "critical" => Ok(Self::Error),
            other => Err(anyhow!("unknown log level `{other}`")),
        }
    }
}

/// One line of the JSON log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    /// UTC time the record was created.
    pub timestamp: DateTime<Utc>,
    /// Emitting component (`memory_data`, `task_engine`, ...).
    pub module: String,
    /// Record severity.
    pub level: LogLevel,
    /// Event name or short description.
    pub message: String,
    /// Arbitrary JSON payload for metrics/fields.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl LogRecord {
    /// Creates a record with the provided info.
    #[must_use]
    pub fn new(module: impl Into<String>, level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            module: module.into(),
            level,
            message: message.into(),
            metadata: serde_json::Map::new(),
        }
    }

    /// Attaches the fields of a JSON object as metadata. Non-object values are ignored.
    #[must_use]
    pub fn with_metadata(mut self, metadata: &serde_json::Value) -> Self {
        if let Some(obj) = metadata.as_object() {
            self.metadata = obj.clone();
        }
        self
    }
}

/// Filtering and rotation settings for [`JsonLogger`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoggerOptions {
    /// Records below this level are dropped.
    pub min_level: LogLevel,
    /// Size at which the active file is rotated. Zero disables rotation.
    pub max_bytes: u64,
    /// Number of rotated files kept next to the active one.
    pub max_backups: usize,
}

impl Default for LoggerOptions {
    fn default() -> Self {
        Self {
            min_level: LogLevel::Debug,
            max_bytes: 5 * 1024 * 1024,
            max_backups: 5,
        }
    }
}

#[derive(Debug)]
struct LogFile {
    file: File,
    written: u64,
}

/// Thread-safe JSON logger with append-only semantics and size-based rotation.
#[derive(Debug)]
pub struct JsonLogger {
    path: PathBuf,
    options: LoggerOptions,
    writer: Mutex<LogFile>,
}

impl JsonLogger {
    /// Creates or opens a logger at the desired path with default options.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        Self::with_options(path, LoggerOptions::default())
    }

    /// Creates or opens a logger with explicit filtering and rotation settings.
    pub fn with_options(path: impl AsRef<Path>, options: LoggerOptions) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = open_append(&path)?;
        let written = file.metadata()?.len();
        Ok(Self {
            path,
            options,
            writer: Mutex::new(LogFile { file, written }),
        })
    }

    /// Returns true when a record at `level` would be written.
    #[must_use]
    pub fn enabled(&self, level: LogLevel) -> bool {
        level >= self.options.min_level
    }

    /// Writes a log record as JSON line, rotating first if the file would overflow.
    pub fn log(&self, record: &LogRecord) -> Result<()> {
        if !self.enabled(record.level) {
            return Ok(());
        }
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        let mut writer = self.writer.lock();
        let incoming = line.len() as u64;
        if self.options.max_bytes > 0
            && writer.written > 0
            && writer.written + incoming > self.options.max_bytes
        {
            self.rotate(&mut writer)?;
        }
        writer.file.write_all(&line)?;
        writer.file.flush()?;
        writer.written += incoming;
        Ok(())
    }

    /// Active log file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Active options.
    #[must_use]
    pub const fn options(&self) -> LoggerOptions {
        self.options
    }

    fn rotate(&self, writer: &mut LogFile) -> Result<()> {
        writer.file.flush()?;
        if self.options.max_backups == 0 {
            fs::remove_file(&self.path)?;
        } else {
            let oldest = backup_path(&self.path, self.options.max_backups);
            if oldest.exists() {
                fs::remove_file(&oldest)?;
            }
            for index in (1..self.options.max_backups).rev() {
                let from = backup_path(&self.path, index);
                if from.exists() {
                    fs::rename(&from, backup_path(&self.path, index + 1))?;
                }
            }
            fs::rename(&self.path, backup_path(&self.path, 1))?;
        }
        writer.file = open_append(&self.path)?;
        writer.written = 0;
        Ok(())
    }
}

fn open_append(path: &Path) -> Result<File> {
    Ok(fs::OpenOptions::new().create(true).append(true).open(path)?)
}

fn backup_path(path: &Path, index: usize) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(format!(".{index}"));
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn appends_one_json_object_per_line() {
        let dir = tempdir().unwrap();
        let logger = JsonLogger::new(dir.path().join("test.log")).unwrap();
        logger
            .log(&LogRecord::new("module", LogLevel::Info, "hello"))
            .unwrap();
        let content = fs::read_to_string(logger.path()).unwrap();
        assert!(content.contains("\"message\":\"hello\""));
        assert!(content.contains("\"level\":\"INFO\""));
    }

    #[test]
    fn drops_records_below_min_level() {
        let dir = tempdir().unwrap();
        let options = LoggerOptions {
            min_level: LogLevel::Warn,
            ..LoggerOptions::default()
        };
        let logger = JsonLogger::with_options(dir.path().join("filtered.log"), options).unwrap();
        logger
            .log(&LogRecord::new("module", LogLevel::Info, "quiet"))
            .unwrap();
        logger
            .log(&LogRecord::new("module", LogLevel::Error, "loud"))
            .unwrap();
        let content = fs::read_to_string(logger.path()).unwrap();
        assert!(!content.contains("quiet"));
        assert!(content.contains("loud"));
    }

    #[test]
    fn rotates_when_file_would_overflow() {
        let dir = tempdir().unwrap();
        let options = LoggerOptions {
            min_level: LogLevel::Debug,
            max_bytes: 200,
            max_backups: 2,
        };
        let logger = JsonLogger::with_options(dir.path().join("app.log"), options).unwrap();
        for idx in 0..12 {
            let record = LogRecord::new("rotation", LogLevel::Info, format!("line-{idx}"))
                .with_metadata(&serde_json::json!({ "idx": idx }));
            logger.log(&record).unwrap();
        }
        assert!(dir.path().join("app.log.1").exists());
        assert!(dir.path().join("app.log.2").exists());
        assert!(!dir.path().join("app.log.3").exists());
        let active = fs::read_to_string(logger.path()).unwrap();
        assert!(active.contains("line-11"));
        assert!(fs::metadata(logger.path()).unwrap().len() <= 200);
    }

    #[test]
    fn parses_names_and_numeric_levels() {
        assert_eq!("warning".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert_eq!("DEBUG".parse::<LogLevel>().unwrap(), LogLevel::Debug);
        assert_eq!("40".parse::<LogLevel>().unwrap(), LogLevel::Error);
        assert_eq!("20".parse::<LogLevel>().unwrap(), LogLevel::Info);
        assert!("verbose".parse::<LogLevel>().is_err());
        assert!(LogLevel::Error > LogLevel::Warn);
    }

    #[test]
    fn env_level_is_optional_but_strict() {
        assert_eq!(LogLevel::from_env("SHARED_LOGGING_TEST_UNSET").unwrap(), None);
        env::set_var("SHARED_LOGGING_TEST_NUMERIC", "30");
        assert_eq!(
            LogLevel::from_env("SHARED_LOGGING_TEST_NUMERIC").unwrap(),
            Some(LogLevel::Warn)
        );
        env::set_var("SHARED_LOGGING_TEST_BOGUS", "loud");
        let err = LogLevel::from_env("SHARED_LOGGING_TEST_BOGUS").unwrap_err();
        assert!(err.to_string().contains("SHARED_LOGGING_TEST_BOGUS"));
    }
}
