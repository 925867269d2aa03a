//! Model-checked integration helpers.
//!
//! [`IntegrationHarness`] mirrors every committed write in an in-memory
//! model so a test can check the store against what it should hold.

use crate::generators::ScopeOperation;
use kenobix_core::{Collection, CoreError, CoreResult, Database, Document, DocumentId};
use serde_json::Value;
use std::collections::BTreeMap;

/// Page size used when walking a collection for verification.
const VERIFY_PAGE: usize = 64;

/// A test harness that tracks committed documents per collection.
pub struct IntegrationHarness {
    /// The database instance.
    pub db: Database,
    /// Expected contents, ordered by collection then id.
    documents: BTreeMap<(String, DocumentId), Document>,
}

impl IntegrationHarness {
    /// Creates a new integration harness with an in-memory database.
    pub fn new() -> Self {
        Self::with_database(Database::open_in_memory().expect("Failed to open database"))
    }

    /// Wraps an existing, empty database.
    pub fn with_database(db: Database) -> Self {
        Self {
            db,
            documents: BTreeMap::new(),
        }
    }

    /// Inserts a document and tracks it.
    pub fn insert(&mut self, collection: &str, document: Document) -> DocumentId {
        let id = self
            .db
            .collection(collection)
            .expect("Failed to open collection")
            .insert(&document)
            .expect("Failed to insert document");
        self.documents.insert((collection.to_string(), id), document);
        id
    }

    /// Removes documents where the top-level `field` equals `value`.
    ///
    /// Returns how many the store removed, after checking the model agrees.
    pub fn remove(&mut self, collection: &str, field: &str, value: Value) -> usize {
        let removed = self
            .db
            .collection(collection)
            .expect("Failed to open collection")
            .remove(field, value.clone())
            .expect("Failed to remove documents");

        let before = self.documents.len();
        self.documents
            .retain(|(name, _), doc| name != collection || doc.get(field) != Some(&value));
        assert_eq!(
            before - self.documents.len(),
            removed,
            "Removed count mismatch in {collection}"
        );
        removed
    }

    /// Runs `ops` inside one transaction scope on `collection`.
    ///
    /// Nested operations open inner scopes; an inner scope asked to fail
    /// rolls back only its own writes and the outer scope carries on. When
    /// `fail` is set the outer scope fails too and nothing is tracked.
    ///
    /// Returns how many documents were committed.
    pub fn apply_scope(&mut self, collection: &str, ops: &[ScopeOperation], fail: bool) -> usize {
        let handle = self
            .db
            .collection(collection)
            .expect("Failed to open collection");

        let mut applied = Vec::new();
        let result = self.db.transaction(|db| {
            run_operations(db, &handle, ops, &mut applied)?;
            if fail {
                Err(CoreError::invalid_query("scope failed on request"))
            } else {
                Ok(())
            }
        });

        if result.is_err() {
            return 0;
        }
        let committed = applied.len();
        for (id, document) in applied {
            self.documents.insert((collection.to_string(), id), document);
        }
        committed
    }

    /// Verifies every tracked collection holds exactly the tracked documents.
    pub fn verify_all(&self) {
        let mut names: Vec<&str> = self.documents.keys().map(|(n, _)| n.as_str()).collect();
        names.dedup();
        for name in names {
            self.verify_collection(name);
        }
    }

    /// Verifies one collection against the model, in id order.
    pub fn verify_collection(&self, collection: &str) {
        let actual = read_all(
            &self
                .db
                .collection(collection)
                .expect("Failed to open collection"),
        )
        .expect("Failed to read collection");

        let expected: Vec<&Document> = self
            .documents
            .iter()
            .filter(|((name, _), _)| name == collection)
            .map(|(_, doc)| doc)
            .collect();

        assert_eq!(
            actual.len(),
            expected.len(),
            "Document count mismatch in {collection}"
        );
        for (actual, expected) in actual.iter().zip(expected) {
            assert_eq!(actual, expected, "Document mismatch in {collection}");
        }
    }

    /// Returns the count of tracked documents.
    pub fn tracked_count(&self) -> usize {
        self.documents.len()
    }
}

impl Default for IntegrationHarness {
    fn default() -> Self {
        Self::new()
    }
}

fn run_operations(
    db: &Database,
    collection: &Collection,
    ops: &[ScopeOperation],
    applied: &mut Vec<(DocumentId, Document)>,
) -> CoreResult<()> {
    for op in ops {
        match op {
            ScopeOperation::Insert(document) => {
                let id = collection.insert(document)?;
                applied.push((id, document.clone()));
            }
            ScopeOperation::Nested { ops, fail } => {
                let mut inner = Vec::new();
                let result = db.transaction(|db| {
                    run_operations(db, collection, ops, &mut inner)?;
                    if *fail {
                        Err(CoreError::invalid_query("inner scope failed on request"))
                    } else {
                        Ok(())
                    }
                });
                if result.is_ok() {
                    applied.extend(inner);
                }
            }
        }
    }
    Ok(())
}

/// Reads every document of a collection by walking the id cursor.
pub fn read_all(collection: &Collection) -> CoreResult<Vec<Document>> {
    let mut documents = Vec::new();
    let mut cursor = None;
    loop {
        let page = collection.all_cursor(cursor, VERIFY_PAGE)?;
        documents.extend(page.documents);
        if !page.has_more {
            return Ok(documents);
        }
        cursor = page.next_cursor;
    }
}
