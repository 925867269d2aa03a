//! Collection handle: CRUD over one table.

use crate::collection::codec::{decode, encode, to_document};
use crate::connection::journal_mode;
use crate::engine::Engine;
use crate::error::{CoreError, CoreResult};
use crate::query::{contains_all, translate, translate_all, Filter, Operator, Predicate};
use crate::schema::{self, sanitize_field_name, Identifier};
use crate::types::{CollectionStats, CursorPage, Document, DocumentId};
use parking_lot::RwLock;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// A named set of documents stored in one table.
///
/// Handles are obtained from [`Database::collection`](crate::Database::collection)
/// and share the database's connection and transaction context, so writes
/// made through any handle join the current transaction.
///
/// # Example
///
/// ```rust,ignore
/// let users = db.collection_with_indexes("users", ["email"])?;
/// let id = users.insert(&json!({"name": "Alice", "email": "alice@example.com"}))?;
/// let found = users.search("email", "alice@example.com")?;
/// ```
pub struct Collection {
    name: Identifier,
    engine: Arc<Engine>,
    catalog: RwLock<CatalogCache>,
}

/// Indexed fields as read from the catalog, tagged with the rollback epoch
/// they were read under. Any rollback may have undone the table or an
/// index, so a cache from an older epoch is never trusted.
struct CatalogCache {
    epoch: u64,
    indexed: BTreeSet<String>,
}

impl fmt::Debug for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collection")
            .field("name", &self.name.as_str())
            .field("indexed", &self.catalog.read().indexed)
            .finish()
    }
}

impl Collection {
    /// Creates the backing table if needed and loads the indexed fields.
    pub(crate) fn open(engine: Arc<Engine>, name: Identifier) -> CoreResult<Self> {
        let epoch = engine.transactions().rollback_epoch();
        let indexed = engine.with_conn(|conn| {
            schema::ensure_table(conn, &name)?;
            schema::indexed_fields(conn, &name)
        })?;
        Ok(Self {
            name,
            engine,
            catalog: RwLock::new(CatalogCache {
                epoch,
                indexed: indexed.into_iter().collect(),
            }),
        })
    }

    /// Recreates the backing table if a rollback removed it since the
    /// handle last looked.
    pub(crate) fn revalidate(&self) -> CoreResult<()> {
        self.indexed_snapshot().map(drop)
    }

    /// Returns the collection name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Inserts a document and returns its new id.
    ///
    /// Fails with [`CoreError::InvalidDocument`] unless `document` serializes
    /// to a JSON object.
    pub fn insert<T: Serialize + ?Sized>(&self, document: &T) -> CoreResult<DocumentId> {
        let payload = encode(&to_document(document)?)?;
        self.revalidate()?;
        let id = self.engine.with_conn(|conn| self.insert_row(conn, &payload))?;
        self.engine.stats().record_inserts(1);
        Ok(id)
    }

    /// Inserts several documents atomically and returns their ids in order.
    ///
    /// Every document is validated before anything is written. The batch
    /// runs in a transaction scope (a savepoint when a transaction is
    /// already open), so a failure leaves none of the documents behind.
    pub fn insert_many<T: Serialize>(&self, documents: &[T]) -> CoreResult<Vec<DocumentId>> {
        let payloads = documents
            .iter()
            .map(|d| to_document(d).and_then(|doc| encode(&doc)))
            .collect::<CoreResult<Vec<_>>>()?;
        if payloads.is_empty() {
            return Ok(Vec::new());
        }
        self.revalidate()?;

        let ids = self.engine.atomic(|| {
            self.engine.with_conn(|conn| {
                payloads
                    .iter()
                    .map(|payload| self.insert_row(conn, payload))
                    .collect::<CoreResult<Vec<_>>>()
            })
        })?;
        self.engine.stats().record_inserts(ids.len() as u64);
        debug!(collection = self.name(), count = ids.len(), "inserted batch");
        Ok(ids)
    }

    fn insert_row(&self, conn: &Connection, payload: &str) -> CoreResult<DocumentId> {
        let mut stmt =
            conn.prepare_cached(&format!("INSERT INTO {} (data) VALUES (?1)", self.name))?;
        stmt.execute([payload])?;
        Ok(DocumentId::new(conn.last_insert_rowid()))
    }

    /// Merges `patch` into every document where `field == value`.
    ///
    /// The merge is shallow: top-level keys of `patch` replace the stored
    /// keys, nested objects are not merged. Returns whether any document
    /// was updated.
    pub fn update<T: Serialize + ?Sized>(
        &self,
        field: &str,
        value: impl Into<Value>,
        patch: &T,
    ) -> CoreResult<bool> {
        let patch = to_document(patch)?;
        let predicate = self.equality(field, value.into())?;

        let updated = self.engine.atomic(|| {
            self.engine.with_conn(|conn| {
                let rows = self.select_rows(conn, &predicate, None, 0)?;
                let mut stmt = conn.prepare_cached(&format!(
                    "UPDATE {} SET data = ?1 WHERE id = ?2",
                    self.name
                ))?;
                let count = rows.len();
                for (id, mut document) in rows {
                    for (key, value) in &patch {
                        document.insert(key.clone(), value.clone());
                    }
                    stmt.execute(rusqlite::params![encode(&document)?, id.as_i64()])?;
                }
                Ok::<_, CoreError>(count)
            })
        })?;

        self.engine.stats().record_updates(updated as u64);
        Ok(updated > 0)
    }

    /// Deletes every document where `field == value`; returns how many.
    pub fn remove(&self, field: &str, value: impl Into<Value>) -> CoreResult<usize> {
        let predicate = self.equality(field, value.into())?;
        let removed = self.engine.with_conn(|conn| {
            let sql = format!("DELETE FROM {} WHERE {}", self.name, predicate.sql);
            Ok(conn.execute(&sql, params_from_iter(predicate.params.iter()))?)
        })?;
        self.engine.stats().record_removes(removed as u64);
        Ok(removed)
    }

    /// Deletes every document. Tables and indexes are kept.
    pub fn purge(&self) -> CoreResult<usize> {
        self.revalidate()?;
        let removed = self
            .engine
            .with_conn(|conn| Ok(conn.execute(&format!("DELETE FROM {}", self.name), [])?))?;
        debug!(collection = self.name(), removed, "purged collection");
        Ok(removed)
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Finds documents where `field == value`, up to the default limit.
    pub fn search(&self, field: &str, value: impl Into<Value>) -> CoreResult<Vec<Document>> {
        self.search_page(field, value, self.default_limit(), 0)
    }

    /// Finds documents where `field == value`, ordered by id.
    ///
    /// `id` matches the document id; an indexed field is looked up through
    /// its index. A `null` value is rejected with [`CoreError::InvalidQuery`].
    pub fn search_page(
        &self,
        field: &str,
        value: impl Into<Value>,
        limit: usize,
        offset: usize,
    ) -> CoreResult<Vec<Document>> {
        let predicate = self.equality(field, value.into())?;
        self.fetch(&predicate, Some(limit), offset)
    }

    /// Returns up to the default limit of documents, ordered by id.
    pub fn all(&self) -> CoreResult<Vec<Document>> {
        self.all_page(self.default_limit(), 0)
    }

    /// Offset-based pagination ordered by id.
    pub fn all_page(&self, limit: usize, offset: usize) -> CoreResult<Vec<Document>> {
        self.fetch(&Predicate::always(), Some(limit), offset)
    }

    /// Keyset pagination: up to `limit` documents with id greater than `after`.
    ///
    /// Walking `next_cursor` until `has_more` is false visits every document
    /// exactly once, however deep the walk goes.
    ///
    /// A `limit` of zero is rejected with [`CoreError::InvalidQuery`]: an
    /// empty page has no last id to continue from.
    pub fn all_cursor(&self, after: Option<DocumentId>, limit: usize) -> CoreResult<CursorPage> {
        if limit == 0 {
            return Err(CoreError::invalid_query("cursor page limit must be at least 1"));
        }
        self.revalidate()?;
        let after = after.map_or(0, DocumentId::as_i64);
        let mut rows = self.engine.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(&format!(
                "SELECT id, data FROM {} WHERE id > ?1 ORDER BY id LIMIT ?2",
                self.name
            ))?;
            let rows = stmt
                .query_map(
                    rusqlite::params![after, sql_limit(Some(limit.saturating_add(1)))],
                    |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)),
                )?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;
        self.engine.stats().record_query(true);

        let has_more = rows.len() > limit;
        rows.truncate(limit);
        let next_cursor = if has_more {
            rows.last().map(|(id, _)| DocumentId::new(*id))
        } else {
            None
        };
        let documents = rows
            .iter()
            .map(|(_, data)| decode(data))
            .collect::<CoreResult<Vec<_>>>()?;

        Ok(CursorPage {
            documents,
            next_cursor,
            has_more,
        })
    }

    /// Finds documents matching every filter.
    pub fn filter(&self, filters: &[Filter], limit: usize, offset: usize) -> CoreResult<Vec<Document>> {
        let predicate = translate_all(filters, &self.indexed_snapshot()?)?;
        self.fetch(&predicate, Some(limit), offset)
    }

    /// Counts documents matching every filter. No filters counts everything.
    pub fn count(&self, filters: &[Filter]) -> CoreResult<u64> {
        let predicate = translate_all(filters, &self.indexed_snapshot()?)?;
        let count = self.engine.with_conn(|conn| {
            let sql = format!("SELECT COUNT(*) FROM {} WHERE {}", self.name, predicate.sql);
            let count: i64 =
                conn.query_row(&sql, params_from_iter(predicate.params.iter()), |r| r.get(0))?;
            Ok(count)
        })?;
        self.engine.stats().record_query(predicate.fully_indexed());
        Ok(u64::try_from(count).unwrap_or_default())
    }

    /// Finds documents matching every `(field, value)` pair.
    ///
    /// No pairs behaves like [`all`](Self::all).
    pub fn search_optimized<I, K, V>(&self, pairs: I) -> CoreResult<Vec<Document>>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Value>,
    {
        let indexed = self.indexed_snapshot()?;
        let predicates = pairs
            .into_iter()
            .map(|(field, value)| {
                let filter = Filter::eq(field.as_ref(), non_null(field.as_ref(), value.into())?);
                translate(&filter, &indexed)
            })
            .collect::<CoreResult<Vec<_>>>()?;
        self.fetch(&Predicate::and(predicates), Some(self.default_limit()), 0)
    }

    /// Finds documents whose `field` equals any of `values`.
    pub fn find_any<I, V>(&self, field: &str, values: I) -> CoreResult<Vec<Document>>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let filter = Filter::is_in(field, values);
        let predicate = translate(&filter, &self.indexed_snapshot()?)?;
        self.fetch(&predicate, Some(self.default_limit()), 0)
    }

    /// Finds documents whose array `field` contains every one of `values`.
    ///
    /// An empty `values` matches nothing.
    pub fn find_all<I, V>(&self, field: &str, values: I) -> CoreResult<Vec<Document>>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let values: Vec<Value> = values.into_iter().map(Into::into).collect();
        match contains_all(field, &values)? {
            Some(predicate) => self.fetch(&predicate, Some(self.default_limit()), 0),
            None => Ok(Vec::new()),
        }
    }

    /// Finds documents whose `field` matches a regular expression.
    pub fn search_pattern(&self, field: &str, pattern: &str) -> CoreResult<Vec<Document>> {
        let predicate = translate(&Filter::regexp(field, pattern), &self.indexed_snapshot()?)?;
        self.fetch(&predicate, Some(self.default_limit()), 0)
    }

    /// Returns the engine's query plan for `search(field, value)`.
    pub fn explain_search(&self, field: &str, value: impl Into<Value>) -> CoreResult<Vec<String>> {
        let predicate = self.equality(field, value.into())?;
        self.engine.with_conn(|conn| {
            let sql = format!(
                "EXPLAIN QUERY PLAN SELECT id, data FROM {} WHERE {}",
                self.name, predicate.sql
            );
            let mut stmt = conn.prepare(&sql)?;
            let details = stmt
                .query_map(params_from_iter(predicate.params.iter()), |row| {
                    row.get::<_, String>(3)
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(details)
        })
    }

    // ========================================================================
    // Schema
    // ========================================================================

    /// Indexes `field` (top-level or dotted).
    ///
    /// Returns `false` if the field is already indexed. The generated column
    /// and its index are created in one transaction scope.
    pub fn create_index(&self, field: &str) -> CoreResult<bool> {
        let path = sanitize_field_name(field)?;
        let created = self.engine.atomic(|| {
            self.engine
                .with_conn(|conn| schema::create_index(conn, &self.name, &path))
        })?;
        self.refresh_indexed()?;
        Ok(created)
    }

    /// Lists the indexed fields, read from the catalog.
    pub fn get_indexed_fields(&self) -> CoreResult<Vec<String>> {
        self.refresh_indexed()
    }

    /// Returns storage statistics.
    pub fn stats(&self) -> CoreResult<CollectionStats> {
        self.revalidate()?;
        let (count, size, mode) = self.engine.with_conn(|conn| {
            let count: i64 = conn.query_row(
                &format!("SELECT COUNT(*) FROM {}", self.name),
                [],
                |r| r.get(0),
            )?;
            let page_count: i64 = conn.query_row("PRAGMA page_count", [], |r| r.get(0))?;
            let page_size: i64 = conn.query_row("PRAGMA page_size", [], |r| r.get(0))?;
            Ok((count, page_count * page_size, journal_mode(conn)?))
        })?;

        Ok(CollectionStats {
            document_count: u64::try_from(count).unwrap_or_default(),
            database_size_bytes: u64::try_from(size).unwrap_or_default(),
            indexed_fields: self.refresh_indexed()?,
            wal_mode: mode == "wal",
        })
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn default_limit(&self) -> usize {
        self.engine.config().default_limit
    }

    /// Returns the indexed fields, re-reading the catalog after a rollback.
    ///
    /// Must not be called from inside `with_conn`.
    fn indexed_snapshot(&self) -> CoreResult<BTreeSet<String>> {
        let epoch = self.engine.transactions().rollback_epoch();
        {
            let cache = self.catalog.read();
            if cache.epoch == epoch {
                return Ok(cache.indexed.clone());
            }
        }
        self.reload(epoch)
    }

    fn refresh_indexed(&self) -> CoreResult<Vec<String>> {
        let epoch = self.engine.transactions().rollback_epoch();
        Ok(self.reload(epoch)?.into_iter().collect())
    }

    fn reload(&self, epoch: u64) -> CoreResult<BTreeSet<String>> {
        let indexed: BTreeSet<String> = self
            .engine
            .with_conn(|conn| {
                if schema::ensure_table(conn, &self.name)? {
                    debug!(collection = self.name(), "recreated table undone by rollback");
                }
                schema::indexed_fields(conn, &self.name)
            })?
            .into_iter()
            .collect();
        *self.catalog.write() = CatalogCache {
            epoch,
            indexed: indexed.clone(),
        };
        Ok(indexed)
    }

    fn equality(&self, field: &str, value: Value) -> CoreResult<Predicate> {
        let value = non_null(field, value)?;
        translate(&Filter::new(field, Operator::Eq, value), &self.indexed_snapshot()?)
    }

    fn fetch(
        &self,
        predicate: &Predicate,
        limit: Option<usize>,
        offset: usize,
    ) -> CoreResult<Vec<Document>> {
        self.revalidate()?;
        let rows = self
            .engine
            .with_conn(|conn| self.select_rows(conn, predicate, limit, offset))?;
        self.engine.stats().record_query(predicate.fully_indexed());
        Ok(rows.into_iter().map(|(_, doc)| doc).collect())
    }

    fn select_rows(
        &self,
        conn: &Connection,
        predicate: &Predicate,
        limit: Option<usize>,
        offset: usize,
    ) -> CoreResult<Vec<(DocumentId, Document)>> {
        let sql = format!(
            "SELECT id, data FROM {} WHERE {} ORDER BY id LIMIT ? OFFSET ?",
            self.name, predicate.sql
        );
        let mut params = predicate.params.clone();
        params.push(SqlValue::Integer(sql_limit(limit)));
        params.push(SqlValue::Integer(i64::try_from(offset).unwrap_or(i64::MAX)));

        let mut stmt = conn.prepare_cached(&sql)?;
        let raw = stmt
            .query_map(params_from_iter(params.iter()), |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        raw.into_iter()
            .map(|(id, data)| Ok((DocumentId::new(id), decode(&data)?)))
            .collect()
    }
}

/// `None` means no limit.
fn sql_limit(limit: Option<usize>) -> i64 {
    limit.map_or(-1, |l| i64::try_from(l).unwrap_or(i64::MAX))
}

fn non_null(field: &str, value: Value) -> CoreResult<Value> {
    if value.is_null() {
        return Err(CoreError::invalid_query(format!(
            "value for {field:?} must not be null"
        )));
    }
    Ok(value)
}
