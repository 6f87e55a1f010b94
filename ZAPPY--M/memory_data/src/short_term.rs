use std::time::{Duration, Instant};

use chrono::Utc;
use indexmap::IndexMap;
use parking_lot::Mutex;

use crate::record::{MemoryRecord, Metadata, RecordId};

#[derive(Debug, Clone)]
struct Slot {
    record: MemoryRecord,
    deadline: Option<Instant>,
}

impl Slot {
    fn expired_at(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|deadline| now > deadline)
    }
}

/// Short-term, in-process memory with per-record TTL.
///
/// Expired records are never returned. They are removed lazily by the read that
/// notices them, or in bulk by [`EphemeralStore::cleanup`]. Entries are kept in
/// insertion order.
#[derive(Debug, Default)]
pub struct EphemeralStore {
    entries: Mutex<IndexMap<RecordId, Slot>>,
}

impl EphemeralStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a record. Without a TTL the record lives until it is popped; so does a
    /// record whose TTL reaches past the representable clock range.
    pub fn add(
        &self,
        content: impl Into<String>,
        ttl: Option<Duration>,
        metadata: Metadata,
    ) -> MemoryRecord {
        let mut record = MemoryRecord::new(content, metadata);
        let expiry = ttl.and_then(|ttl| {
            let deadline = Instant::now().checked_add(ttl)?;
            let expires_at = chrono::Duration::from_std(ttl)
                .ok()
                .and_then(|ttl| record.created_at.checked_add_signed(ttl))?;
            Some((deadline, expires_at))
        });
        let deadline = expiry.map(|(deadline, _)| deadline);
        record.expires_at = expiry.map(|(_, expires_at)| expires_at);
        self.entries.lock().insert(
            record.id,
            Slot {
                record: record.clone(),
                deadline,
            },
        );
        record
    }

    /// Fetches a live record. An expired record is deleted and reported absent.
    #[must_use]
    pub fn get(&self, id: &RecordId) -> Option<MemoryRecord> {
        let mut entries = self.entries.lock();
        let expired = entries.get(id)?.expired_at(Instant::now());
        if expired {
            entries.shift_remove(id);
            return None;
        }
        entries.get(id).map(|slot| slot.record.clone())
    }

    /// Case-insensitive keyword search over content and metadata, in insertion order.
    #[must_use]
    pub fn query(&self, keyword: &str, limit: usize) -> Vec<MemoryRecord> {
        if limit == 0 {
            return Vec::new();
        }
        let keyword = keyword.to_lowercase();
        let mut entries = self.entries.lock();
        purge_expired(&mut entries);
        entries
            .values()
            .filter(|slot| slot.record.matches_lowercase(&keyword))
            .take(limit)
            .map(|slot| slot.record.clone())
            .collect()
    }

    /// Returns every live record in insertion order.
    #[must_use]
    pub fn all_items(&self) -> Vec<MemoryRecord> {
        let mut entries = self.entries.lock();
        purge_expired(&mut entries);
        entries.values().map(|slot| slot.record.clone()).collect()
    }

    /// Removes all expired records, returning how many were dropped.
    pub fn cleanup(&self) -> usize {
        purge_expired(&mut self.entries.lock())
    }

    /// Number of live records.
    #[must_use]
    pub fn len(&self) -> usize {
        let mut entries = self.entries.lock();
        purge_expired(&mut entries);
        entries.len()
    }

    /// Returns true when no live record remains.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes and returns the oldest live record. Ties keep insertion order.
    pub fn pop_oldest(&self) -> Option<MemoryRecord> {
        let mut entries = self.entries.lock();
        purge_expired(&mut entries);
        let (index, _) = entries
            .values()
            .enumerate()
            .min_by(|(a_idx, a), (b_idx, b)| {
                a.record
                    .created_at
                    .cmp(&b.record.created_at)
                    .then(a_idx.cmp(b_idx))
            })?;
        entries.shift_remove_index(index).map(|(_, slot)| slot.record)
    }

    /// Puts a record taken by [`EphemeralStore::pop_oldest`] back at the front.
    ///
    /// The remaining lifetime is derived from `expires_at`; a record whose expiry
    /// already passed is dropped instead.
    pub fn restore(&self, record: MemoryRecord) {
        let deadline = match record.expires_at {
            Some(expires_at) => match (expires_at - Utc::now()).to_std() {
                Ok(remaining) => Instant::now().checked_add(remaining),
                Err(_) => return,
            },
            None => None,
        };
        self.entries
            .lock()
            .shift_insert(0, record.id, Slot { record, deadline });
    }
}

fn purge_expired(entries: &mut IndexMap<RecordId, Slot>) -> usize {
    let now = Instant::now();
    let before = entries.len();
    entries.retain(|_, slot| !slot.expired_at(now));
    before - entries.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::metadata;
    use std::thread::sleep;

    fn no_meta() -> Metadata {
        Metadata::new()
    }

    #[test]
    fn expired_records_are_removed_on_read() {
        let store = EphemeralStore::new();
        let record = store.add("fleeting", Some(Duration::from_millis(10)), no_meta());
        assert!(record.expires_at.is_some());
        assert!(store.get(&record.id).is_some());
        sleep(Duration::from_millis(25));
        assert!(store.get(&record.id).is_none());
        assert_eq!(store.entries.lock().len(), 0);
    }

    #[test]
    fn records_without_ttl_never_expire() {
        let store = EphemeralStore::new();
        let record = store.add("pinned", None, no_meta());
        assert!(record.expires_at.is_none());
        sleep(Duration::from_millis(5));
        assert_eq!(store.cleanup(), 0);
        assert_eq!(store.get(&record.id).unwrap().content, "pinned");
    }

    #[test]
    fn unrepresentable_ttl_never_expires() {
        let store = EphemeralStore::new();
        let forever = store.add("forever-ish", Some(Duration::from_secs(u64::MAX)), no_meta());
        assert!(forever.expires_at.is_none());
        let far = store.add("far future", Some(Duration::from_secs(1 << 50)), no_meta());
        assert!(far.expires_at.is_none());
        assert_eq!(store.cleanup(), 0);
        assert_eq!(store.len(), 2);

        let popped = store.pop_oldest().unwrap();
        assert_eq!(popped.content, "forever-ish");
        store.restore(popped);
        assert_eq!(store.get(&forever.id).unwrap().content, "forever-ish");
    }

    #[test]
    fn query_skips_expired_and_honours_limit() {
        let store = EphemeralStore::new();
        store.add("alpha report", Some(Duration::from_millis(5)), no_meta());
        store.add("beta report", None, no_meta());
        store.add("gamma report", None, no_meta());
        store.add("unrelated", None, metadata([("kind", "Report")]));
        sleep(Duration::from_millis(20));

        let all = store.query("REPORT", 10);
        let contents: Vec<_> = all.iter().map(|r| r.content.as_str()).collect();
        assert_eq!(contents, vec!["beta report", "gamma report", "unrelated"]);

        let limited = store.query("report", 2);
        assert_eq!(limited.len(), 2);
        assert!(store.query("report", 0).is_empty());
    }

    #[test]
    fn cleanup_counts_purged_entries() {
        let store = EphemeralStore::new();
        store.add("a", Some(Duration::from_millis(1)), no_meta());
        store.add("b", Some(Duration::from_millis(1)), no_meta());
        store.add("c", None, no_meta());
        sleep(Duration::from_millis(10));
        assert_eq!(store.cleanup(), 2);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn pop_oldest_follows_creation_order() {
        let store = EphemeralStore::new();
        store.add("first", None, no_meta());
        store.add("second", None, no_meta());
        store.add("third", None, no_meta());
        assert_eq!(store.pop_oldest().unwrap().content, "first");
        assert_eq!(store.pop_oldest().unwrap().content, "second");
        assert_eq!(store.len(), 1);
        assert_eq!(store.pop_oldest().unwrap().content, "third");
        assert!(store.pop_oldest().is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn restore_reinserts_at_the_front() {
        let store = EphemeralStore::new();
        store.add("older", Some(Duration::from_secs(60)), no_meta());
        store.add("newer", None, no_meta());
        let popped = store.pop_oldest().unwrap();
        store.restore(popped.clone());
        assert_eq!(store.all_items()[0].id, popped.id);
        assert_eq!(store.pop_oldest().unwrap().id, popped.id);
    }

    #[test]
    fn concurrent_adds_are_all_visible() {
        let store = std::sync::Arc::new(EphemeralStore::new());
        let handles: Vec<_> = (0..8)
            .map(|worker| {
                let store = std::sync::Arc::clone(&store);
                std::thread::spawn(move || {
                    for idx in 0..25 {
                        store.add(format!("w{worker}-{idx}"), None, Metadata::new());
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(store.len(), 200);
    }
}
