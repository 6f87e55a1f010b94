use std::{path::PathBuf, time::Duration};

/// Settings consumed by [`crate::MemoryCoordinator::open`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryConfig {
    /// SQLite file backing the long-term tier.
    pub durable_path: PathBuf,
    /// Short-term size above which the oldest records migrate to long-term storage.
    pub consolidation_threshold: usize,
    /// TTL applied by [`crate::MemoryCoordinator::remember_short`].
    pub default_ttl: Duration,
}

impl MemoryConfig {
    /// Default consolidation threshold.
    pub const DEFAULT_THRESHOLD: usize = 50;
    /// Default short-term TTL.
    pub const DEFAULT_TTL: Duration = Duration::from_secs(60);

    /// Config rooted at an explicit database path.
    #[must_use]
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            durable_path: path.into(),
            ..Self::default()
        }
    }

    /// Overrides the consolidation threshold.
    #[must_use]
    pub fn consolidation_threshold(mut self, threshold: usize) -> Self {
        self.consolidation_threshold = threshold;
        self
    }

    /// Overrides the default TTL.
    #[must_use]
    pub fn default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            durable_path: PathBuf::from("data").join("memories.sqlite3"),
            consolidation_threshold: Self::DEFAULT_THRESHOLD,
            default_ttl: Self::DEFAULT_TTL,
        }
    }
}
