//! Operation counters.
//!
//! # Usage
//!
//! ```rust,ignore
//! use kenobix_core::Database;
//!
//! let db = Database::open_in_memory()?;
//! db.insert(&serde_json::json!({"name": "Alice"}))?;
//!
//! let metrics = db.metrics();
//! println!("Inserted: {}", metrics.documents_inserted);
//! println!("Scans: {}", metrics.scans);
//! ```

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Database operation counters.
///
/// All counters are atomic and monotonically increasing.
#[derive(Debug, Default)]
pub struct DatabaseStats {
    documents_inserted: AtomicU64,
    documents_updated: AtomicU64,
    documents_removed: AtomicU64,
    /// Queries issued against collections.
    queries: AtomicU64,
    /// Queries served entirely by the primary key or generated-column indexes.
    index_lookups: AtomicU64,
    /// Queries needing JSON extraction over the whole table.
    scans: AtomicU64,

    transactions_begun: AtomicU64,
    transactions_committed: AtomicU64,
    transactions_rolled_back: AtomicU64,

    savepoints_created: AtomicU64,
    savepoints_released: AtomicU64,
    savepoints_rolled_back: AtomicU64,
}

impl DatabaseStats {
    /// Creates a new stats instance.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_inserts(&self, count: u64) {
        self.documents_inserted.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn record_updates(&self, count: u64) {
        self.documents_updated.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn record_removes(&self, count: u64) {
        self.documents_removed.fetch_add(count, Ordering::Relaxed);
    }

    /// Records a query and whether an index could serve it.
    pub(crate) fn record_query(&self, indexed: bool) {
        self.queries.fetch_add(1, Ordering::Relaxed);
        if indexed {
            self.index_lookups.fetch_add(1, Ordering::Relaxed);
        } else {
            self.scans.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_begin(&self) {
        self.transactions_begun.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_commit(&self) {
        self.transactions_committed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rollback(&self) {
        self.transactions_rolled_back.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_savepoint(&self) {
        self.savepoints_created.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_savepoint_release(&self) {
        self.savepoints_released.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_savepoint_rollback(&self) {
        self.savepoints_rolled_back.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the number of queries that needed a full scan.
    ///
    /// High scan counts may indicate missing indexes.
    pub fn scans(&self) -> u64 {
        self.scans.load(Ordering::Relaxed)
    }

    /// Returns the number of index-served queries.
    pub fn index_lookups(&self) -> u64 {
        self.index_lookups.load(Ordering::Relaxed)
    }

    /// Returns the number of committed transactions.
    pub fn transactions_committed(&self) -> u64 {
        self.transactions_committed.load(Ordering::Relaxed)
    }

    /// Returns the number of rolled back transactions.
    pub fn transactions_rolled_back(&self) -> u64 {
        self.transactions_rolled_back.load(Ordering::Relaxed)
    }

    /// Returns a snapshot of all counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            documents_inserted: load(&self.documents_inserted),
            documents_updated: load(&self.documents_updated),
            documents_removed: load(&self.documents_removed),
            queries: load(&self.queries),
            index_lookups: load(&self.index_lookups),
            scans: load(&self.scans),
            transactions_begun: load(&self.transactions_begun),
            transactions_committed: load(&self.transactions_committed),
            transactions_rolled_back: load(&self.transactions_rolled_back),
            savepoints_created: load(&self.savepoints_created),
            savepoints_released: load(&self.savepoints_released),
            savepoints_rolled_back: load(&self.savepoints_rolled_back),
        }
    }
}

/// A point-in-time copy of [`DatabaseStats`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct StatsSnapshot {
    /// Documents inserted.
    pub documents_inserted: u64,
    /// Documents updated.
    pub documents_updated: u64,
    /// Documents removed (purges excluded).
    pub documents_removed: u64,
    /// Queries issued.
    pub queries: u64,
    /// Queries served by an index.
    pub index_lookups: u64,
    /// Queries that scanned the payload.
    pub scans: u64,
    /// Outermost transactions begun.
    pub transactions_begun: u64,
    /// Outermost transactions committed.
    pub transactions_committed: u64,
    /// Outermost transactions rolled back.
    pub transactions_rolled_back: u64,
    /// Savepoints created.
    pub savepoints_created: u64,
    /// Savepoints released.
    pub savepoints_released: u64,
    /// Savepoints rolled back to.
    pub savepoints_rolled_back: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_stats_are_zero() {
        let stats = DatabaseStats::new();
        assert_eq!(stats.snapshot(), StatsSnapshot::default());
    }

    #[test]
    fn queries_split_by_access_path() {
        let stats = DatabaseStats::new();
        stats.record_query(true);
        stats.record_query(true);
        stats.record_query(false);

        let snap = stats.snapshot();
        assert_eq!(snap.queries, 3);
        assert_eq!(snap.index_lookups, 2);
        assert_eq!(snap.scans, 1);
    }

    #[test]
    fn record_transactions() {
        let stats = DatabaseStats::new();
        stats.record_begin();
        stats.record_begin();
        stats.record_commit();
        stats.record_rollback();
        stats.record_savepoint();
        stats.record_savepoint_rollback();

        let snap = stats.snapshot();
        assert_eq!(snap.transactions_begun, 2);
        assert_eq!(snap.transactions_committed, 1);
        assert_eq!(snap.transactions_rolled_back, 1);
        assert_eq!(snap.savepoints_created, 1);
        assert_eq!(snap.savepoints_rolled_back, 1);
        assert_eq!(snap.savepoints_released, 0);
    }

    #[test]
    fn concurrent_updates() {
        use std::sync::Arc;
        use std::thread;

        let stats = Arc::new(DatabaseStats::new());
        let mut handles = vec![];

        for _ in 0..10 {
            let s = Arc::clone(&stats);
            handles.push(thread::spawn(move || {
                for _ in 0..100 {
                    s.record_inserts(1);
                    s.record_query(false);
                }
            }));
        }

        for h in handles {
            h.join().unwrap();
        }

        let snap = stats.snapshot();
        assert_eq!(snap.documents_inserted, 1000);
        assert_eq!(snap.scans, 1000);
    }
}
