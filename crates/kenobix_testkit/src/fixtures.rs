//! Test fixtures and database helpers.
//!
//! Provides convenience functions for setting up test databases
//! and common test scenarios.

use kenobix_core::{Config, Database};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// File name used for file-backed test databases.
pub const TEST_DB_FILE: &str = "test.db";

/// A test database with automatic cleanup.
pub struct TestDatabase {
    /// The database instance.
    pub db: Database,
    /// The temporary directory (kept alive to prevent cleanup).
    temp_dir: Option<TempDir>,
}

impl TestDatabase {
    /// Creates a new in-memory test database.
    pub fn memory() -> Self {
        Self {
            db: Database::open_in_memory().expect("Failed to open in-memory database"),
            temp_dir: None,
        }
    }

    /// Creates a new file-based test database in a temporary directory.
    pub fn file() -> Self {
        Self::file_with_config(Config::default())
    }

    /// Creates a new file-based test database with a custom configuration.
    pub fn file_with_config(config: Config) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = temp_dir.path().join(TEST_DB_FILE);
        let db = Database::open_with_config(&path, config).expect("Failed to open file database");

        Self {
            db,
            temp_dir: Some(temp_dir),
        }
    }

    /// Returns the database path if file-based, None if in-memory.
    pub fn path(&self) -> Option<PathBuf> {
        self.temp_dir.as_ref().map(|d| d.path().join(TEST_DB_FILE))
    }

    /// Opens a second, independent connection to the same file.
    ///
    /// Panics for in-memory databases, which cannot be shared.
    pub fn connect(&self) -> Database {
        let path = self.path().expect("Only file databases can be shared");
        Database::open(path).expect("Failed to open second connection")
    }

    /// Closes the database and opens it again from disk.
    pub fn reopen(self) -> Self {
        let Self { db, temp_dir } = self;
        let temp_dir = temp_dir.expect("Only file databases can be reopened");
        db.close().expect("Failed to close database");
        drop(db);

        let path = temp_dir.path().join(TEST_DB_FILE);
        Self {
            db: Database::open(&path).expect("Failed to reopen database"),
            temp_dir: Some(temp_dir),
        }
    }
}

impl std::ops::Deref for TestDatabase {
    type Target = Database;

    fn deref(&self) -> &Self::Target {
        &self.db
    }
}

/// Runs a test with a temporary in-memory database.
///
/// # Example
///
/// ```rust,ignore
/// use kenobix_testkit::with_temp_db;
///
/// #[test]
/// fn my_test() {
///     with_temp_db(|db| {
///         let users = db.collection("users").unwrap();
///         // ... test operations
///     });
/// }
/// ```
pub fn with_temp_db<F, R>(f: F) -> R
where
    F: FnOnce(&Database) -> R,
{
    let test_db = TestDatabase::memory();
    f(&test_db.db)
}

/// Runs a test with a temporary file-based database.
pub fn with_file_db<F, R>(f: F) -> R
where
    F: FnOnce(&Database, &Path) -> R,
{
    let test_db = TestDatabase::file();
    let path = test_db.path().expect("File database should have a path");
    f(&test_db.db, &path)
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;
    use serde_json::json;

    /// Creates a database whose `test` collection holds `count` documents
    /// of the form `{"index": i, "name": "user_i", "group": i % 3}`.
    pub fn populated_database(count: usize) -> TestDatabase {
        let test_db = TestDatabase::memory();
        let collection = test_db
            .db
            .collection("test")
            .expect("Failed to open collection");

        let documents: Vec<_> = (0..count)
            .map(|i| json!({"index": i, "name": format!("user_{i}"), "group": i % 3}))
            .collect();
        collection
            .insert_many(&documents)
            .expect("Failed to insert documents");

        test_db
    }

    /// Creates a database with `count` collections holding one document each.
    pub fn multi_collection_database(count: usize) -> (TestDatabase, Vec<String>) {
        let test_db = TestDatabase::memory();
        let mut names = Vec::with_capacity(count);

        for i in 0..count {
            let name = format!("collection_{i}");
            test_db
                .db
                .collection(&name)
                .expect("Failed to open collection")
                .insert(&json!({"collection": i}))
                .expect("Failed to insert document");
            names.push(name);
        }

        (test_db, names)
    }

    /// Creates a database with the `accounts` collection used by transfer
    /// tests: Alice with 100 and Bob with 50, indexed by name.
    pub fn accounts_database() -> TestDatabase {
        let test_db = TestDatabase::memory();
        let accounts = test_db
            .db
            .collection_with_indexes("accounts", ["name"])
            .expect("Failed to open collection");
        accounts
            .insert_many(&[
                json!({"name": "Alice", "balance": 100}),
                json!({"name": "Bob", "balance": 50}),
            ])
            .expect("Failed to insert accounts");
        test_db
    }
}
