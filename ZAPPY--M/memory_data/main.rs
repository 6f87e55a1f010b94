//! Memory coordinator combining short-term and long-term storage.

use std::time::Duration;

use parking_lot::Mutex;
use serde_json::json;
use shared_logging::LogLevel;

use crate::{
    config::MemoryConfig,
    long_term::{DurableStore, MemoryStorageError},
    record::{MemoryRecord, Metadata, RecordId},
    short_term::EphemeralStore,
    telemetry::MemoryTelemetry,
};

/// Coordinator responsible for capturing, recalling, and consolidating memories.
///
/// Short-term records migrate to the long-term store whenever the short-term tier
/// grows past the consolidation threshold; nothing is dropped on the way.
#[derive(Debug)]
pub struct MemoryCoordinator {
    short_term: EphemeralStore,
    long_term: DurableStore,
    threshold: usize,
    default_ttl: Duration,
    consolidation: Mutex<()>,
    telemetry: Option<MemoryTelemetry>,
}

impl MemoryCoordinator {
    /// Opens the long-term store described by `config`.
    pub fn open(config: &MemoryConfig) -> Result<Self, MemoryStorageError> {
        let long_term = DurableStore::open(&config.durable_path)?;
        Ok(Self::with_stores(
            EphemeralStore::new(),
            long_term,
            config.consolidation_threshold,
        )
        .with_default_ttl(config.default_ttl))
    }

    /// Creates a coordinator from explicit components (useful for tests).
    #[must_use]
    pub fn with_stores(short_term: EphemeralStore, long_term: DurableStore, threshold: usize) -> Self {
        if threshold == 0 {
            tracing::warn!("consolidation threshold 0 is invalid, using 1");
        }
        Self {
            short_term,
            long_term,
            threshold: threshold.max(1),
            default_ttl: MemoryConfig::DEFAULT_TTL,
            consolidation: Mutex::new(()),
            telemetry: None,
        }
    }

    /// Overrides the TTL used by [`MemoryCoordinator::remember_short`].
    #[must_use]
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Attaches telemetry sinks.
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: MemoryTelemetry) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Effective consolidation threshold.
    #[must_use]
    pub const fn threshold(&self) -> usize {
        self.threshold
    }

    /// Short-term tier.
    #[must_use]
    pub const fn short_term(&self) -> &EphemeralStore {
        &self.short_term
    }

    /// Long-term tier.
    #[must_use]
    pub const fn long_term(&self) -> &DurableStore {
        &self.long_term
    }

    /// Stores content in short-term memory with the default TTL.
    pub fn remember_short(
        &self,
        content: impl Into<String>,
        metadata: Metadata,
    ) -> Result<MemoryRecord, MemoryStorageError> {
        self.remember_short_for(content, Some(self.default_ttl), metadata)
    }

    /// Stores content in short-term memory with an explicit TTL (`None` never expires),
    /// then consolidates if the tier grew past the threshold.
    pub fn remember_short_for(
        &self,
        content: impl Into<String>,
        ttl: Option<Duration>,
        metadata: Metadata,
    ) -> Result<MemoryRecord, MemoryStorageError> {
        let record = self.short_term.add(content, ttl, metadata);
        self.emit(
            LogLevel::Debug,
            "memory.short.captured",
            json!({ "id": record.id, "ttl_secs": ttl.map(|ttl| ttl.as_secs_f64()) }),
        );
        self.consolidate()?;
        Ok(record)
    }

    /// Stores content directly in long-term memory.
    pub fn remember_long(
        &self,
        content: impl Into<String>,
        metadata: Metadata,
    ) -> Result<MemoryRecord, MemoryStorageError> {
        let record = self.long_term.add(content, metadata)?;
        self.emit(
            LogLevel::Debug,
            "memory.long.captured",
            json!({ "id": record.id }),
        );
        Ok(record)
    }

    /// Searches short-term memory first, then fills the remainder from long-term memory.
    pub fn recall(&self, query: &str, limit: usize) -> Result<Vec<MemoryRecord>, MemoryStorageError> {
        let mut results = self.short_term.query(query, limit);
        let from_short = results.len();
        if from_short < limit {
            results.extend(self.long_term.search(query, limit - from_short)?);
        }
        self.emit(
            LogLevel::Debug,
            "memory.recall",
            json!({ "query": query, "short": from_short, "long": results.len() - from_short }),
        );
        Ok(results)
    }

    /// Looks a record up by id in either tier, short-term first.
    pub fn lookup(&self, id: &RecordId) -> Result<Option<MemoryRecord>, MemoryStorageError> {
        match self.short_term.get(id) {
            Some(record) => Ok(Some(record)),
            None => self.long_term.get(id),
        }
    }

    /// Most recent long-term records.
    pub fn recent_long(&self, limit: usize) -> Result<Vec<MemoryRecord>, MemoryStorageError> {
        self.long_term.all(limit)
    }

    /// Deletes a long-term record. Short-term records only expire.
    pub fn forget_long(&self, id: &RecordId) -> Result<bool, MemoryStorageError> {
        let removed = self.long_term.delete(id)?;
        self.emit(
            LogLevel::Info,
            "memory.long.forgotten",
            json!({ "id": id, "removed": removed }),
        );
        Ok(removed)
    }

    /// Moves the oldest short-term records into long-term storage until the
    /// short-term tier is back at the threshold. Returns how many were moved.
    fn consolidate(&self) -> Result<usize, MemoryStorageError> {
        let _guard = self.consolidation.lock();
        let mut moved = 0;
        while self.short_term.len() > self.threshold {
            let Some(oldest) = self.short_term.pop_oldest() else {
                break;
            };
            if let Err(err) = self.long_term.migrate(oldest.clone()) {
                self.short_term.restore(oldest);
                self.emit(
                    LogLevel::Error,
                    "memory.consolidation.failed",
                    json!({ "moved": moved, "error": err.to_string() }),
                );
                return Err(err);
            }
            moved += 1;
        }
        if moved == 0 {
            return Ok(0);
        }
        self.emit(
            LogLevel::Info,
            "memory.consolidated",
            json!({ "moved": moved, "threshold": self.threshold }),
        );
        Ok(moved)
    }

    /// Purges expired short-term records and closes the long-term store.
    pub fn shutdown(self) -> Result<(), MemoryStorageError> {
        let purged = self.short_term.cleanup();
        self.long_term.close()?;
        self.emit(
            LogLevel::Info,
            "memory.shutdown",
            json!({ "purged": purged, "short_term_remaining": self.short_term.len() }),
        );
        Ok(())
    }

    fn emit(&self, level: LogLevel, message: &str, metadata: serde_json::Value) {
        if let Some(tel) = &self.telemetry {
            if let Err(err) = tel.log(level, message, metadata) {
                tracing::warn!(error = %err, "memory telemetry write failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::metadata;
    use std::{sync::Arc, thread::sleep};
    use tempfile::tempdir;

    fn coordinator(threshold: usize) -> MemoryCoordinator {
        MemoryCoordinator::with_stores(
            EphemeralStore::new(),
            DurableStore::open_in_memory().unwrap(),
            threshold,
        )
    }

    #[test]
    fn consolidation_keeps_short_term_at_threshold() {
        let memory = coordinator(3);
        let mut captured = Vec::new();
        for idx in 0..7 {
            captured.push(
                memory
                    .remember_short_for(format!("note-{idx}"), None, Metadata::new())
                    .unwrap(),
            );
            assert!(memory.short_term().len() <= 3);
        }
        assert_eq!(memory.short_term().len(), 3);
        assert_eq!(memory.long_term().count().unwrap(), 4);

        for evicted in &captured[..4] {
            assert!(memory.short_term().get(&evicted.id).is_none());
            let hits = memory.long_term().search(&evicted.content, 10).unwrap();
            assert!(hits.iter().any(|hit| hit.id == evicted.id));
            assert!(hits.iter().all(|hit| hit.expires_at.is_none()));
        }
        for kept in &captured[4..] {
            assert!(memory.short_term().get(&kept.id).is_some());
        }
    }

    #[test]
    fn no_consolidation_below_threshold() {
        let memory = coordinator(5);
        for idx in 0..5 {
            memory
                .remember_short_for(format!("note-{idx}"), None, Metadata::new())
                .unwrap();
        }
        assert_eq!(memory.short_term().len(), 5);
        assert_eq!(memory.long_term().count().unwrap(), 0);
    }

    #[test]
    fn expired_records_do_not_count_toward_consolidation() {
        let memory = coordinator(2);
        let short = memory.short_term();
        short.add("stale-1", Some(Duration::from_millis(5)), Metadata::new());
        short.add("stale-2", Some(Duration::from_millis(5)), Metadata::new());
        short.add("kept-1", None, Metadata::new());
        short.add("kept-2", None, Metadata::new());
        sleep(Duration::from_millis(20));

        memory.remember_short_for("fresh", None, Metadata::new()).unwrap();
        assert_eq!(memory.short_term().len(), 2);
        let migrated = memory.recent_long(10).unwrap();
        assert_eq!(migrated.len(), 1);
        assert_eq!(migrated[0].content, "kept-1");
    }

    #[test]
    fn zero_threshold_is_clamped() {
        let memory = coordinator(0);
        assert_eq!(memory.threshold(), 1);
        memory.remember_short_for("a", None, Metadata::new()).unwrap();
        memory.remember_short_for("b", None, Metadata::new()).unwrap();
        assert_eq!(memory.short_term().len(), 1);
        assert_eq!(memory.short_term().all_items()[0].content, "b");
    }

    #[test]
    fn recall_prefers_short_term_and_respects_limit() {
        let memory = coordinator(50);
        memory
            .remember_long("project alpha archive", Metadata::new())
            .unwrap();
        memory
            .remember_long("project beta archive", Metadata::new())
            .unwrap();
        memory
            .remember_short("project gamma draft", Metadata::new())
            .unwrap();

        let results = memory.recall("project", 10).unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].content, "project gamma draft");
        assert!(results[0].expires_at.is_some());
        assert!(results[1..].iter().all(|r| r.expires_at.is_none()));

        let limited = memory.recall("project", 2).unwrap();
        assert_eq!(limited.len(), 2);
        assert_eq!(limited[0].content, "project gamma draft");
        assert!(memory.recall("project", 0).unwrap().is_empty());
    }

    #[test]
    fn expired_short_term_is_not_recalled() {
        let memory = coordinator(50);
        memory
            .remember_short_for("x", Some(Duration::from_millis(10)), Metadata::new())
            .unwrap();
        sleep(Duration::from_millis(30));
        assert!(memory.recall("x", 10).unwrap().is_empty());
    }

    #[test]
    fn metadata_is_searchable_in_both_tiers() {
        let memory = coordinator(50);
        memory
            .remember_short("short entry", metadata([("type", "user_task")]))
            .unwrap();
        memory
            .remember_long("long entry", metadata([("type", "user_task")]))
            .unwrap();
        let results = memory.recall("USER_TASK", 10).unwrap();
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn forget_long_and_lookup() {
        let memory = coordinator(50);
        let long = memory.remember_long("to forget", Metadata::new()).unwrap();
        let short = memory.remember_short("still hot", Metadata::new()).unwrap();
        assert_eq!(memory.lookup(&short.id).unwrap().unwrap().content, "still hot");
        assert!(memory.lookup(&long.id).unwrap().is_some());
        assert!(memory.forget_long(&long.id).unwrap());
        assert!(!memory.forget_long(&long.id).unwrap());
        assert!(!memory.forget_long(&short.id).unwrap());
        assert!(memory.lookup(&long.id).unwrap().is_none());
    }

    #[test]
    fn failed_migration_restores_record() {
        let memory = coordinator(1);
        let first = memory.remember_short_for("first", None, Metadata::new()).unwrap();
        memory.long_term().close().unwrap();
        let err = memory
            .remember_short_for("second", None, Metadata::new())
            .unwrap_err();
        assert!(matches!(err, MemoryStorageError::Closed));
        assert!(memory.short_term().get(&first.id).is_some());
        assert_eq!(memory.short_term().len(), 2);
    }

    #[test]
    fn concurrent_captures_settle_at_threshold() {
        let memory = Arc::new(coordinator(10));
        let workers: Vec<_> = (0..4)
            .map(|worker| {
                let memory = Arc::clone(&memory);
                std::thread::spawn(move || {
                    for idx in 0..20 {
                        memory
                            .remember_short_for(format!("w{worker}-{idx}"), None, Metadata::new())
                            .unwrap();
                        assert!(memory.short_term().len() <= 10 + 4);
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }
        assert_eq!(memory.short_term().len(), 10);
        assert_eq!(memory.long_term().count().unwrap(), 70);
    }

    #[test]
    fn open_and_shutdown_persist_long_term() {
        let dir = tempdir().unwrap();
        let config = MemoryConfig::with_path(dir.path().join("data").join("memories.sqlite3"))
            .consolidation_threshold(2);
        let memory = MemoryCoordinator::open(&config).unwrap();
        let long = memory
            .remember_long("survives restart", metadata([("type", "task_result")]))
            .unwrap();
        memory
            .remember_short("short lived", Metadata::new())
            .unwrap();
        memory.shutdown().unwrap();

        let reopened = MemoryCoordinator::open(&config).unwrap();
        assert!(reopened.lookup(&long.id).unwrap().is_some());
        assert!(reopened.recall("short lived", 5).unwrap().is_empty());
        assert_eq!(reopened.recent_long(10).unwrap().len(), 1);
        reopened.shutdown().unwrap();
    }
}
