//! Bounded, newest-first request history.
//!
//! The history is the single piece of shared mutable state in a capture
//! session. It only ever changes by an append at the front, an eviction at
//! the back, an in-place update of one record looked up by id or key, or a
//! full clear. Records are never reordered.

use crate::record::{HostTimestamp, RecordId, RequestRecord};
use std::collections::VecDeque;

/// Maximum number of records kept.
pub const HISTORY_CAPACITY: usize = 100;

/// Ordered collection of request records, newest first.
#[derive(Clone, Debug)]
pub struct HistoryStore {
    records: VecDeque<RequestRecord>,
    capacity: usize,
}

impl Default for HistoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl HistoryStore {
    /// Empty store holding up to [`HISTORY_CAPACITY`] records
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(HISTORY_CAPACITY)
    }

    /// Empty store with a custom bound (at least one record)
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: VecDeque::with_capacity(capacity + 1),
            capacity,
        }
    }

    /// Insert at the front. Returns the evicted oldest record when the bound
    /// is exceeded.
    pub fn append(&mut self, record: RequestRecord) -> Option<RequestRecord> {
        self.records.push_front(record);
        if self.records.len() > self.capacity {
            self.records.pop_back()
        } else {
            None
        }
    }

    /// Look up a record by id
    #[must_use]
    pub fn find_by_id(&self, id: RecordId) -> Option<&RequestRecord> {
        self.records.iter().find(|record| record.id == id)
    }

    /// Look up a record by id for an in-place update
    pub fn find_by_id_mut(&mut self, id: RecordId) -> Option<&mut RequestRecord> {
        self.records.iter_mut().find(|record| record.id == id)
    }

    /// Most recent record whose url and initiation time match exactly
    pub fn find_by_correlation_key(
        &mut self,
        url: &str,
        timestamp: HostTimestamp,
    ) -> Option<&mut RequestRecord> {
        self.records
            .iter_mut()
            .find(|record| record.timestamp == timestamp && record.url == url)
    }

    /// Remove every record. Returns how many were dropped.
    pub fn clear(&mut self) -> usize {
        let dropped = self.records.len();
        self.records.clear();
        dropped
    }

    /// Records, newest first
    pub fn all(&self) -> impl ExactSizeIterator<Item = &RequestRecord> + '_ {
        self.records.iter()
    }

    /// Owned copy of the current ordered sequence
    #[must_use]
    pub fn snapshot(&self) -> Vec<RequestRecord> {
        self.records.iter().cloned().collect()
    }

    /// Records whose url or method contains `query`, ignoring case.
    /// A blank query matches everything.
    pub fn filter<'a>(&'a self, query: &str) -> impl Iterator<Item = &'a RequestRecord> + 'a {
        let needle = query.trim().to_lowercase();
        self.records.iter().filter(move |record| {
            needle.is_empty()
                || record.url.to_lowercase().contains(&needle)
                || record.method.to_lowercase().contains(&needle)
        })
    }

    /// Newest record
    #[must_use]
    pub fn newest(&self) -> Option<&RequestRecord> {
        self.records.front()
    }

    /// Number of records held
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns `true` when no records are held
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Maximum number of records held
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code
mod tests {
    use super::*;
    use crate::record::RequestKind;
    use proptest::prelude::*;
    use repeater_core::environment::Clock;
    use repeater_testing::test_clock;

    #[allow(clippy::cast_precision_loss)]
    fn record(id: u64, url: &str, method: &str) -> RequestRecord {
        RequestRecord::captured(
            RecordId::new(id),
            RequestKind::ScriptCall,
            url.to_string(),
            method.to_string(),
            HostTimestamp::from_millis(1000.0 + id as f64),
            None,
            test_clock().now(),
        )
    }

    fn ids(store: &HistoryStore) -> Vec<u64> {
        store.all().map(|r| r.id.value()).collect()
    }

    #[test]
    fn append_inserts_newest_first() {
        let mut store = HistoryStore::new();
        store.append(record(1, "https://a.test/1", "GET"));
        store.append(record(2, "https://a.test/2", "GET"));
        store.append(record(3, "https://a.test/3", "GET"));
        assert_eq!(ids(&store), vec![3, 2, 1]);
        assert_eq!(store.newest().map(|r| r.id), Some(RecordId::new(3)));
    }

    #[test]
    fn full_store_evicts_exactly_the_oldest() {
        let mut store = HistoryStore::new();
        for id in 1..=100 {
            assert!(store.append(record(id, "https://a.test/", "GET")).is_none());
        }
        assert_eq!(store.len(), 100);

        let evicted = store.append(record(101, "https://a.test/new", "GET"));
        assert_eq!(evicted.map(|r| r.id), Some(RecordId::new(1)));
        assert_eq!(store.len(), 100);
        assert_eq!(store.newest().map(|r| r.id), Some(RecordId::new(101)));
        assert!(store.find_by_id(RecordId::new(1)).is_none());
    }

    #[test]
    fn correlation_key_prefers_most_recent_match() {
        let mut store = HistoryStore::new();
        let mut older = record(1, "https://a.test/x", "GET");
        older.timestamp = HostTimestamp::from_millis(5.0);
        let mut newer = record(2, "https://a.test/x", "GET");
        newer.timestamp = HostTimestamp::from_millis(5.0);
        store.append(older);
        store.append(newer);

        let found = store
            .find_by_correlation_key("https://a.test/x", HostTimestamp::from_millis(5.0))
            .unwrap();
        assert_eq!(found.id, RecordId::new(2));

        assert!(
            store
                .find_by_correlation_key("https://a.test/x", HostTimestamp::from_millis(6.0))
                .is_none()
        );
        assert!(
            store
                .find_by_correlation_key("https://a.test/y", HostTimestamp::from_millis(5.0))
                .is_none()
        );
    }

    #[test]
    fn clear_empties_and_reports_count() {
        let mut store = HistoryStore::new();
        store.append(record(1, "https://a.test/1", "GET"));
        store.append(record(2, "https://a.test/2", "POST"));
        assert_eq!(store.clear(), 2);
        assert!(store.is_empty());
        assert_eq!(store.all().count(), 0);
    }

    #[test]
    fn filter_matches_url_or_method_ignoring_case() {
        let mut store = HistoryStore::new();
        store.append(record(1, "https://api.test/users", "GET"));
        store.append(record(2, "https://api.test/login", "POST"));
        store.append(record(3, "https://cdn.test/Users.json", "GET"));

        let hits: Vec<u64> = store.filter("USERS").map(|r| r.id.value()).collect();
        assert_eq!(hits, vec![3, 1]);

        let posts: Vec<u64> = store.filter("post").map(|r| r.id.value()).collect();
        assert_eq!(posts, vec![2]);

        assert_eq!(store.filter("  ").count(), 3);
    }

    proptest! {
        #[test]
        fn size_never_exceeds_bound(count in 0_u64..300, capacity in 1_usize..150) {
            let mut store = HistoryStore::with_capacity(capacity);
            for id in 1..=count {
                store.append(record(id, "https://a.test/", "GET"));
                prop_assert!(store.len() <= capacity);
            }

            let expected = usize::try_from(count).unwrap().min(capacity);
            prop_assert_eq!(store.len(), expected);

            let held = ids(&store);
            let mut sorted = held.clone();
            sorted.sort_unstable_by(|a, b| b.cmp(a));
            prop_assert_eq!(held, sorted);
        }
    }
}
