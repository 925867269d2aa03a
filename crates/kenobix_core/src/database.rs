//! Database facade.

use crate::collection::{Collection, CollectionRegistry};
use crate::config::Config;
use crate::engine::Engine;
use crate::error::{CoreError, CoreResult};
use crate::query::Filter;
use crate::stats::StatsSnapshot;
use crate::transaction::{Savepoint, TransactionState};
use crate::types::{CollectionStats, CursorPage, Document, DocumentId};
use serde::Serialize;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;

/// The main database handle.
///
/// A `Database` owns one engine connection and its transaction context.
/// Collections are created on first access; the database-level CRUD methods
/// operate on the default collection (`"documents"` unless configured
/// otherwise).
///
/// # Example
///
/// ```rust,ignore
/// use kenobix_core::Database;
/// use serde_json::json;
///
/// let db = Database::open("app.db")?;
/// let users = db.collection_with_indexes("users", ["email"])?;
///
/// db.transaction(|_| {
///     users.insert(&json!({"name": "Alice", "email": "alice@example.com"}))?;
///     users.insert(&json!({"name": "Bob", "email": "bob@example.com"}))?;
///     Ok::<_, kenobix_core::CoreError>(())
/// })?;
///
/// let alice = users.search("email", "alice@example.com")?;
/// ```
pub struct Database {
    engine: Arc<Engine>,
    registry: CollectionRegistry,
    default: Arc<Collection>,
}

impl Database {
    /// Opens (or creates) a database file with the default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or is not a database.
    pub fn open(path: impl AsRef<Path>) -> CoreResult<Self> {
        Self::open_with_config(path, Config::default())
    }

    /// Opens a database file with a custom configuration.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// use kenobix_core::{Config, Database};
    ///
    /// let config = Config::default()
    ///     .indexed_fields(["name", "email"])
    ///     .sync_on_commit(false);
    ///
    /// let db = Database::open_with_config("app.db", config)?;
    /// ```
    pub fn open_with_config(path: impl AsRef<Path>, config: Config) -> CoreResult<Self> {
        Self::init(Engine::open(Some(path.as_ref()), config)?)
    }

    /// Opens a private in-memory database.
    pub fn open_in_memory() -> CoreResult<Self> {
        Self::open_in_memory_with_config(Config::default())
    }

    /// Opens a private in-memory database with a custom configuration.
    pub fn open_in_memory_with_config(config: Config) -> CoreResult<Self> {
        Self::init(Engine::open(None, config)?)
    }

    fn init(engine: Engine) -> CoreResult<Self> {
        let engine = Arc::new(engine);
        let registry = CollectionRegistry::new(Arc::clone(&engine));
        let config = engine.config();
        let default =
            registry.get_or_create(&config.default_collection, config.indexed_fields.iter())?;
        Ok(Self {
            engine,
            registry,
            default,
        })
    }

    // ========================================================================
    // Collections
    // ========================================================================

    /// Returns the collection `name`, creating it on first access.
    ///
    /// Repeated calls with the same name return the same handle.
    pub fn collection(&self, name: &str) -> CoreResult<Arc<Collection>> {
        self.registry.get_or_create(name, std::iter::empty::<&str>())
    }

    /// Returns the collection `name` and makes sure `indexed_fields` are
    /// indexed. Indexes that already exist are kept.
    pub fn collection_with_indexes<I, S>(
        &self,
        name: &str,
        indexed_fields: I,
    ) -> CoreResult<Arc<Collection>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.registry.get_or_create(name, indexed_fields)
    }

    /// Lists every collection stored in the database.
    pub fn collections(&self) -> CoreResult<Vec<String>> {
        self.registry.names()
    }

    /// Returns the default collection.
    #[must_use]
    pub fn default_collection(&self) -> &Arc<Collection> {
        &self.default
    }

    // ========================================================================
    // Default collection shortcuts
    // ========================================================================

    /// Inserts into the default collection.
    pub fn insert<T: Serialize + ?Sized>(&self, document: &T) -> CoreResult<DocumentId> {
        self.default.insert(document)
    }

    /// Inserts several documents into the default collection atomically.
    pub fn insert_many<T: Serialize>(&self, documents: &[T]) -> CoreResult<Vec<DocumentId>> {
        self.default.insert_many(documents)
    }

    /// Searches the default collection.
    pub fn search(&self, field: &str, value: impl Into<Value>) -> CoreResult<Vec<Document>> {
        self.default.search(field, value)
    }

    /// Searches the default collection with explicit pagination.
    pub fn search_page(
        &self,
        field: &str,
        value: impl Into<Value>,
        limit: usize,
        offset: usize,
    ) -> CoreResult<Vec<Document>> {
        self.default.search_page(field, value, limit, offset)
    }

    /// Updates documents in the default collection.
    pub fn update<T: Serialize + ?Sized>(
        &self,
        field: &str,
        value: impl Into<Value>,
        patch: &T,
    ) -> CoreResult<bool> {
        self.default.update(field, value, patch)
    }

    /// Removes documents from the default collection.
    pub fn remove(&self, field: &str, value: impl Into<Value>) -> CoreResult<usize> {
        self.default.remove(field, value)
    }

    /// Lists documents of the default collection.
    pub fn all(&self) -> CoreResult<Vec<Document>> {
        self.default.all()
    }

    /// Lists documents of the default collection with offset pagination.
    pub fn all_page(&self, limit: usize, offset: usize) -> CoreResult<Vec<Document>> {
        self.default.all_page(limit, offset)
    }

    /// Keyset pagination over the default collection.
    pub fn all_cursor(&self, after: Option<DocumentId>, limit: usize) -> CoreResult<CursorPage> {
        self.default.all_cursor(after, limit)
    }

    /// Deletes every document of the default collection.
    pub fn purge(&self) -> CoreResult<usize> {
        self.default.purge()
    }

    /// Statistics of the default collection.
    pub fn stats(&self) -> CoreResult<CollectionStats> {
        self.default.stats()
    }

    /// Indexes a field of the default collection.
    pub fn create_index(&self, field: &str) -> CoreResult<bool> {
        self.default.create_index(field)
    }

    /// Indexed fields of the default collection.
    pub fn get_indexed_fields(&self) -> CoreResult<Vec<String>> {
        self.default.get_indexed_fields()
    }

    /// Filters the default collection.
    pub fn filter(&self, filters: &[Filter], limit: usize, offset: usize) -> CoreResult<Vec<Document>> {
        self.default.filter(filters, limit, offset)
    }

    /// Counts matches in the default collection.
    pub fn count(&self, filters: &[Filter]) -> CoreResult<u64> {
        self.default.count(filters)
    }

    /// Multi-field equality search on the default collection.
    pub fn search_optimized<I, K, V>(&self, pairs: I) -> CoreResult<Vec<Document>>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Value>,
    {
        self.default.search_optimized(pairs)
    }

    /// Membership search on the default collection.
    pub fn find_any<I, V>(&self, field: &str, values: I) -> CoreResult<Vec<Document>>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.default.find_any(field, values)
    }

    /// Array containment search on the default collection.
    pub fn find_all<I, V>(&self, field: &str, values: I) -> CoreResult<Vec<Document>>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.default.find_all(field, values)
    }

    /// Regular expression search on the default collection.
    pub fn search_pattern(&self, field: &str, pattern: &str) -> CoreResult<Vec<Document>> {
        self.default.search_pattern(field, pattern)
    }

    /// Query plan of a search on the default collection.
    pub fn explain_search(&self, field: &str, value: impl Into<Value>) -> CoreResult<Vec<String>> {
        self.default.explain_search(field, value)
    }

    // ========================================================================
    // Transactions
    // ========================================================================

    /// Begins a transaction.
    ///
    /// Writes through any collection handle join it until [`commit`] or
    /// [`rollback`].
    ///
    /// # Errors
    ///
    /// [`CoreError::AlreadyInTransaction`] if a transaction is open.
    ///
    /// [`commit`]: Self::commit
    /// [`rollback`]: Self::rollback
    pub fn begin(&self) -> CoreResult<()> {
        self.engine.begin()
    }

    /// Commits the open transaction.
    ///
    /// # Errors
    ///
    /// [`CoreError::NotInTransaction`] if no transaction is open.
    pub fn commit(&self) -> CoreResult<()> {
        self.engine.commit()
    }

    /// Discards every change since [`begin`](Self::begin).
    ///
    /// # Errors
    ///
    /// [`CoreError::NotInTransaction`] if no transaction is open.
    pub fn rollback(&self) -> CoreResult<()> {
        self.engine.rollback()
    }

    /// Creates a savepoint in the open transaction.
    ///
    /// Without a name, a unique one is generated. Explicit names go through
    /// the identifier sanitizer and must not clash with an active savepoint.
    pub fn savepoint(&self, name: Option<&str>) -> CoreResult<Savepoint> {
        self.engine.savepoint(name)
    }

    /// Undoes the writes made after `savepoint`.
    ///
    /// `savepoint` stays usable; savepoints created after it are invalidated.
    pub fn rollback_to(&self, savepoint: &Savepoint) -> CoreResult<()> {
        self.engine.rollback_to(savepoint)
    }

    /// Keeps the writes made after `savepoint` and retires it, along with
    /// every savepoint created after it.
    pub fn release_savepoint(&self, savepoint: &Savepoint) -> CoreResult<()> {
        self.engine.release_savepoint(savepoint)
    }

    /// Runs `f` atomically.
    ///
    /// Outside a transaction this begins one, committing when `f` returns
    /// `Ok` and rolling back when it returns `Err` or panics. Inside a
    /// transaction (explicit or scoped) it opens a savepoint instead, so a
    /// failing inner scope only undoes its own writes.
    ///
    /// The error returned by `f` is passed through unchanged.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// db.transaction(|db| {
    ///     db.update("name", "Alice", &json!({"balance": 50}))?;
    ///     db.update("name", "Bob", &json!({"balance": 150}))?;
    ///     Ok::<_, CoreError>(())
    /// })?;
    /// ```
    pub fn transaction<F, T, E>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&Self) -> Result<T, E>,
        E: From<CoreError>,
    {
        self.engine.atomic(|| f(self))
    }

    /// Returns the transaction state.
    #[must_use]
    pub fn transaction_state(&self) -> TransactionState {
        self.engine.transactions().state()
    }

    /// Checks if a transaction is open.
    #[must_use]
    pub fn in_transaction(&self) -> bool {
        self.engine.transactions().in_transaction()
    }

    /// Returns how many `transaction` scopes are currently entered.
    #[must_use]
    pub fn transaction_depth(&self) -> usize {
        self.engine.transactions().depth()
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Returns a snapshot of the operation counters.
    #[must_use]
    pub fn metrics(&self) -> StatsSnapshot {
        self.engine.stats().snapshot()
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        self.engine.config()
    }

    /// Returns the file path, `None` for in-memory databases.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.engine.path()
    }

    /// Checks if the database is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.engine.is_open()
    }

    /// Closes the database, rolling back any open transaction.
    ///
    /// Closing twice is a no-op. Every later operation, including through
    /// collection handles, fails with [`CoreError::DatabaseClosed`].
    pub fn close(&self) -> CoreResult<()> {
        self.engine.close()
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.engine.path())
            .field("default_collection", &self.default.name())
            .field("open", &self.engine.is_open())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use serde_json::json;

    #[test]
    fn default_collection_shortcuts() {
        let db = Database::open_in_memory().unwrap();
        db.insert(&json!({"name": "Alice"})).unwrap();
        assert_eq!(db.search("name", "Alice").unwrap().len(), 1);
        assert_eq!(db.collections().unwrap(), vec!["documents"]);
        assert_eq!(db.default_collection().name(), "documents");
    }

    #[test]
    fn configured_indexes_apply_at_open() {
        let config = Config::default().indexed_fields(["name", "email"]);
        let db = Database::open_in_memory_with_config(config).unwrap();
        assert_eq!(db.get_indexed_fields().unwrap(), vec!["email", "name"]);
    }

    #[test]
    fn collection_is_reference_stable() {
        let db = Database::open_in_memory().unwrap();
        let a = db.collection("users").unwrap();
        let b = db.collection_with_indexes("users", ["email"]).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn collections_are_isolated() {
        let db = Database::open_in_memory().unwrap();
        let users = db.collection("users").unwrap();
        let orders = db.collection("orders").unwrap();

        let u = users.insert(&json!({"name": "Alice"})).unwrap();
        let o = orders.insert(&json!({"total": 10})).unwrap();
        assert_eq!(u, o);
        assert!(orders.search("name", "Alice").unwrap().is_empty());
    }

    #[test]
    fn transaction_spans_collections() {
        let db = Database::open_in_memory().unwrap();
        let users = db.collection("users").unwrap();
        let orders = db.collection("orders").unwrap();

        let result: CoreResult<()> = db.transaction(|_| {
            users.insert(&json!({"name": "Alice"}))?;
            orders.insert(&json!({"user": "Alice"}))?;
            Err(CoreError::invalid_query("abort"))
        });
        assert!(result.is_err());
        assert_eq!(users.count(&[]).unwrap(), 0);
        assert_eq!(orders.count(&[]).unwrap(), 0);
    }

    #[test]
    fn explicit_transaction_guards() {
        let db = Database::open_in_memory().unwrap();
        assert!(matches!(db.commit(), Err(CoreError::NotInTransaction)));
        db.begin().unwrap();
        assert_eq!(db.transaction_state(), TransactionState::Active);
        assert_eq!(db.begin().unwrap_err().kind(), ErrorKind::TransactionState);
        db.rollback().unwrap();
        assert!(!db.in_transaction());
    }

    #[test]
    fn close_is_idempotent_and_final() {
        let db = Database::open_in_memory().unwrap();
        let users = db.collection("users").unwrap();
        db.close().unwrap();
        db.close().unwrap();
        assert!(!db.is_open());

        assert!(matches!(db.insert(&json!({"a": 1})), Err(CoreError::DatabaseClosed)));
        assert!(matches!(users.all(), Err(CoreError::DatabaseClosed)));
        assert!(matches!(db.collection("other"), Err(CoreError::DatabaseClosed)));
        assert!(matches!(
            db.transaction(|_| Ok::<_, CoreError>(())),
            Err(CoreError::DatabaseClosed)
        ));
    }

    #[test]
    fn close_rolls_back_open_transaction() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("close.db");
        {
            let db = Database::open(&path).unwrap();
            db.insert(&json!({"kept": true})).unwrap();
            db.begin().unwrap();
            db.insert(&json!({"kept": false})).unwrap();
            db.close().unwrap();
        }
        let db = Database::open(&path).unwrap();
        assert_eq!(db.count(&[]).unwrap(), 1);
    }

    #[test]
    fn metrics_track_operations() {
        let db = Database::open_in_memory_with_config(Config::default().indexed_fields(["name"]))
            .unwrap();
        db.insert_many(&[json!({"name": "a"}), json!({"name": "b"})])
            .unwrap();
        db.search("name", "a").unwrap();
        db.search("age", 3).unwrap();

        let m = db.metrics();
        assert_eq!(m.documents_inserted, 2);
        assert_eq!(m.index_lookups, 1);
        assert_eq!(m.scans, 1);
        // One scope for the index created at open, one for the batch.
        assert_eq!(m.transactions_committed, 2);
    }
}
