//! Database configuration.

use std::time::Duration;

/// Name of the collection used by the database-level shortcuts.
pub const DEFAULT_COLLECTION: &str = "documents";

/// Configuration for opening a database.
#[derive(Debug, Clone)]
pub struct Config {
    /// Whether to create the database file if it doesn't exist.
    pub create_if_missing: bool,

    /// Whether to switch file databases to write-ahead logging.
    ///
    /// WAL lets readers proceed while a writer holds the write lock.
    pub wal_mode: bool,

    /// Whether to fully sync on every commit (safer but slower).
    pub sync_on_commit: bool,

    /// How long a writer waits for the engine's write lock.
    pub busy_timeout: Duration,

    /// Whether `begin()` takes the write lock immediately.
    pub immediate_transactions: bool,

    /// Collection behind `Database::insert`, `Database::search`, ...
    pub default_collection: String,

    /// Fields indexed on the default collection when the database opens.
    pub indexed_fields: Vec<String>,

    /// Row limit used by the convenience query forms.
    pub default_limit: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            wal_mode: true,
            sync_on_commit: true,
            busy_timeout: Duration::from_secs(5),
            immediate_transactions: true,
            default_collection: DEFAULT_COLLECTION.to_string(),
            indexed_fields: Vec::new(),
            default_limit: 100,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to create the database if missing.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets whether to enable write-ahead logging.
    #[must_use]
    pub const fn wal_mode(mut self, value: bool) -> Self {
        self.wal_mode = value;
        self
    }

    /// Sets whether to fully sync on every commit.
    #[must_use]
    pub const fn sync_on_commit(mut self, value: bool) -> Self {
        self.sync_on_commit = value;
        self
    }

    /// Sets the write-lock wait timeout.
    #[must_use]
    pub const fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    /// Sets whether transactions take the write lock at `begin()`.
    #[must_use]
    pub const fn immediate_transactions(mut self, value: bool) -> Self {
        self.immediate_transactions = value;
        self
    }

    /// Sets the default collection name.
    #[must_use]
    pub fn default_collection(mut self, name: impl Into<String>) -> Self {
        self.default_collection = name.into();
        self
    }

    /// Sets the fields indexed on the default collection.
    #[must_use]
    pub fn indexed_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.indexed_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the default row limit.
    #[must_use]
    pub const fn default_limit(mut self, limit: usize) -> Self {
        self.default_limit = limit;
        self
    }

    pub(crate) fn begin_statement(&self) -> &'static str {
        if self.immediate_transactions {
            "BEGIN IMMEDIATE"
        } else {
            "BEGIN"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert!(config.create_if_missing);
        assert!(config.wal_mode);
        assert!(config.sync_on_commit);
        assert_eq!(config.default_collection, "documents");
        assert!(config.indexed_fields.is_empty());
        assert_eq!(config.default_limit, 100);
    }

    #[test]
    fn builder_pattern() {
        let config = Config::new()
            .create_if_missing(false)
            .sync_on_commit(false)
            .busy_timeout(Duration::from_millis(250))
            .indexed_fields(["name", "email"]);

        assert!(!config.create_if_missing);
        assert!(!config.sync_on_commit);
        assert_eq!(config.busy_timeout, Duration::from_millis(250));
        assert_eq!(config.indexed_fields, vec!["name", "email"]);
    }

    #[test]
    fn begin_statement_follows_mode() {
        assert_eq!(Config::new().begin_statement(), "BEGIN IMMEDIATE");
        assert_eq!(
            Config::new().immediate_transactions(false).begin_statement(),
            "BEGIN"
        );
    }
}
