//! Stress tests for KenobiX.
//!
//! These helpers drive a database under heavy load and concurrent access
//! and report how many operations succeeded.

use kenobix_core::{CoreError, Database};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Collection used by the stress helpers.
pub const STRESS_COLLECTION: &str = "stress";

/// Result of a stress test run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Total operations performed.
    pub total_ops: usize,
    /// Successful operations.
    pub successful_ops: usize,
    /// Failed operations.
    pub failed_ops: usize,
    /// Total duration.
    pub duration: Duration,
    /// Operations per second.
    pub ops_per_second: f64,
}

impl StressTestResult {
    /// Creates a new result.
    pub fn new(successful: usize, failed: usize, duration: Duration) -> Self {
        let total = successful + failed;
        let ops_per_second = if duration.as_secs_f64() > 0.0 {
            total as f64 / duration.as_secs_f64()
        } else {
            0.0
        };

        Self {
            total_ops: total,
            successful_ops: successful,
            failed_ops: failed,
            duration,
            ops_per_second,
        }
    }

    /// Prints a summary of the test.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {} ===", name);
        println!("Total operations: {}", self.total_ops);
        println!("Successful: {}", self.successful_ops);
        println!("Failed: {}", self.failed_ops);
        println!("Duration: {:?}", self.duration);
        println!("Throughput: {:.2} ops/sec", self.ops_per_second);
    }
}

/// Configuration for stress tests.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Number of operations to perform.
    pub operations: usize,
    /// Number of concurrent threads (for concurrent tests).
    pub threads: usize,
    /// Length of the filler string stored in each document.
    pub payload_size: usize,
    /// Number of distinct search keys.
    pub key_count: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            operations: 10_000,
            threads: 4,
            payload_size: 256,
            key_count: 100,
        }
    }
}

fn stress_document(i: usize, config: &StressConfig) -> Value {
    json!({
        "seq": i,
        "key": i % config.key_count.max(1),
        "payload": "x".repeat(config.payload_size),
    })
}

fn tally<T>(result: Result<T, CoreError>, successful: &mut usize, failed: &mut usize) {
    match result {
        Ok(_) => *successful += 1,
        Err(_) => *failed += 1,
    }
}

/// Run a sequential insert stress test.
pub fn stress_sequential_inserts(db: &Database, config: &StressConfig) -> StressTestResult {
    let collection = db
        .collection(STRESS_COLLECTION)
        .expect("Failed to open collection");

    let start = Instant::now();
    let mut successful = 0usize;
    let mut failed = 0usize;

    for i in 0..config.operations {
        tally(
            collection.insert(&stress_document(i, config)),
            &mut successful,
            &mut failed,
        );
    }

    StressTestResult::new(successful, failed, start.elapsed())
}

/// Run an indexed search stress test over a pre-populated collection.
pub fn stress_indexed_searches(db: &Database, config: &StressConfig) -> StressTestResult {
    let collection = db
        .collection_with_indexes(STRESS_COLLECTION, ["key"])
        .expect("Failed to open collection");
    let documents: Vec<_> = (0..config.key_count)
        .map(|i| stress_document(i, config))
        .collect();
    collection
        .insert_many(&documents)
        .expect("Failed to populate collection");

    let start = Instant::now();
    let mut successful = 0usize;
    let mut failed = 0usize;

    for i in 0..config.operations {
        let key = i % config.key_count.max(1);
        match collection.search("key", key) {
            Ok(found) if !found.is_empty() => successful += 1,
            _ => failed += 1,
        }
    }

    StressTestResult::new(successful, failed, start.elapsed())
}

/// Run a mixed insert/search/update/remove stress test.
pub fn stress_mixed_operations(db: &Database, config: &StressConfig) -> StressTestResult {
    let collection = db
        .collection_with_indexes(STRESS_COLLECTION, ["seq"])
        .expect("Failed to open collection");

    let start = Instant::now();
    let mut successful = 0usize;
    let mut failed = 0usize;

    for i in 0..config.operations {
        let target = i / 4;
        match i % 4 {
            0 => tally(
                collection.insert(&stress_document(target, config)),
                &mut successful,
                &mut failed,
            ),
            1 => tally(collection.search("seq", target), &mut successful, &mut failed),
            2 => tally(
                collection.update("seq", target, &json!({"touched": true})),
                &mut successful,
                &mut failed,
            ),
            _ => tally(collection.remove("seq", target), &mut successful, &mut failed),
        }
    }

    StressTestResult::new(successful, failed, start.elapsed())
}

/// Run a concurrent writer stress test on one shared handle.
///
/// Threads alternate single inserts and small batches; batches run in
/// transaction scopes, which must not absorb other threads' writes.
pub fn stress_concurrent_writers(db: Arc<Database>, config: &StressConfig) -> StressTestResult {
    let successful = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));
    let ops_per_thread = config.operations / config.threads.max(1);

    let start = Instant::now();

    let handles: Vec<_> = (0..config.threads)
        .map(|t| {
            let db = Arc::clone(&db);
            let successful = Arc::clone(&successful);
            let failed = Arc::clone(&failed);
            let config = config.clone();

            thread::spawn(move || {
                let collection = db
                    .collection(STRESS_COLLECTION)
                    .expect("Failed to open collection");
                for i in 0..ops_per_thread {
                    let seq = t * ops_per_thread + i;
                    let result = if i % 2 == 0 {
                        collection.insert(&stress_document(seq, &config)).map(|_| ())
                    } else {
                        let batch = [stress_document(seq, &config)];
                        collection.insert_many(&batch).map(|_| ())
                    };
                    match result {
                        Ok(()) => successful.fetch_add(1, Ordering::Relaxed),
                        Err(_) => failed.fetch_add(1, Ordering::Relaxed),
                    };
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    StressTestResult::new(
        successful.load(Ordering::Relaxed),
        failed.load(Ordering::Relaxed),
        start.elapsed(),
    )
}

/// Run a concurrent reader stress test, one connection per thread.
///
/// The collection at `path` must already hold documents.
pub fn stress_concurrent_readers(path: &Path, config: &StressConfig) -> StressTestResult {
    let successful = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));
    let ops_per_thread = config.operations / config.threads.max(1);

    let start = Instant::now();

    let handles: Vec<_> = (0..config.threads)
        .map(|_| {
            let path = path.to_path_buf();
            let successful = Arc::clone(&successful);
            let failed = Arc::clone(&failed);

            thread::spawn(move || {
                let db = Database::open(&path).expect("Failed to open connection");
                let collection = db
                    .collection(STRESS_COLLECTION)
                    .expect("Failed to open collection");
                for _ in 0..ops_per_thread {
                    match collection.all_cursor(None, 10) {
                        Ok(page) if !page.documents.is_empty() => {
                            successful.fetch_add(1, Ordering::Relaxed);
                        }
                        _ => {
                            failed.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    StressTestResult::new(
        successful.load(Ordering::Relaxed),
        failed.load(Ordering::Relaxed),
        start.elapsed(),
    )
}

/// Run a transaction abort stress test.
///
/// Every other scope fails on purpose after writing.
pub fn stress_transaction_aborts(db: &Database, config: &StressConfig) -> StressTestResult {
    let collection = db
        .collection(STRESS_COLLECTION)
        .expect("Failed to open collection");

    let start = Instant::now();
    let mut successful = 0usize;
    let mut failed = 0usize;

    for i in 0..config.operations {
        let should_fail = i % 2 == 0;

        let result = db.transaction(|_| {
            collection.insert(&stress_document(i, config))?;
            if should_fail {
                Err(CoreError::invalid_query("intentional"))
            } else {
                Ok(())
            }
        });

        tally(result, &mut successful, &mut failed);
    }

    StressTestResult::new(successful, failed, start.elapsed())
}

/// Run a large transaction stress test (100 documents per batch).
pub fn stress_large_transactions(db: &Database, config: &StressConfig) -> StressTestResult {
    let collection = db
        .collection(STRESS_COLLECTION)
        .expect("Failed to open collection");
    let batch_size = 100;

    let start = Instant::now();
    let mut successful = 0usize;
    let mut failed = 0usize;

    for batch in 0..(config.operations / batch_size) {
        let documents: Vec<_> = (0..batch_size)
            .map(|i| stress_document(batch * batch_size + i, config))
            .collect();

        match collection.insert_many(&documents) {
            Ok(_) => successful += batch_size,
            Err(_) => failed += batch_size,
        }
    }

    StressTestResult::new(successful, failed, start.elapsed())
}
