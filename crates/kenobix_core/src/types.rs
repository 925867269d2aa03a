//! Core type definitions for KenobiX.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A document payload: field name to JSON value.
///
/// The store-assigned [`DocumentId`] is never part of the payload.
pub type Document = serde_json::Map<String, serde_json::Value>;

/// Store-assigned identifier of a document.
///
/// Identifiers are assigned by the backing table's auto-increment key, are
/// strictly increasing in insertion order and are never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DocumentId(pub i64);

impl DocumentId {
    /// Creates a new document ID.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_i64(self) -> i64 {
        self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "doc:{}", self.0)
    }
}

impl From<DocumentId> for i64 {
    fn from(id: DocumentId) -> Self {
        id.0
    }
}

/// One page of a keyset-paginated scan.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CursorPage {
    /// Documents in ascending id order.
    pub documents: Vec<Document>,
    /// Id of the last returned document, present only when `has_more`.
    pub next_cursor: Option<DocumentId>,
    /// Whether documents exist after this page.
    pub has_more: bool,
}

/// Per-collection storage statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollectionStats {
    /// Number of documents in the collection.
    pub document_count: u64,
    /// Size of the whole database file in bytes.
    pub database_size_bytes: u64,
    /// Fields with a generated column and secondary index.
    pub indexed_fields: Vec<String>,
    /// Whether the database runs in write-ahead-log mode.
    pub wal_mode: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_id_ordering() {
        let d1 = DocumentId::new(1);
        let d2 = DocumentId::new(2);
        assert!(d1 < d2);
    }

    #[test]
    fn document_id_display() {
        let d = DocumentId::new(42);
        assert_eq!(format!("{d}"), "doc:42");
        assert_eq!(i64::from(d), 42);
    }
}
