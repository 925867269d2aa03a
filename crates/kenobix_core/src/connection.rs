//! Connection setup and shared access.

use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use parking_lot::Mutex;
use regex::Regex;
use rusqlite::functions::FunctionFlags;
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Minimal statement runner used by the transaction engine.
pub(crate) trait SqlExecutor {
    /// Runs one or more statements without parameters.
    fn execute_batch(&self, sql: &str) -> CoreResult<()>;

    /// Returns whether the engine is outside any transaction.
    fn is_autocommit(&self) -> CoreResult<bool>;
}

impl SqlExecutor for Connection {
    fn execute_batch(&self, sql: &str) -> CoreResult<()> {
        Connection::execute_batch(self, sql)?;
        Ok(())
    }

    fn is_autocommit(&self) -> CoreResult<bool> {
        Ok(Connection::is_autocommit(self))
    }
}

/// The single engine connection of a database handle.
///
/// `None` once the handle is closed; every access then fails with
/// [`CoreError::DatabaseClosed`].
pub(crate) struct ConnectionCell {
    inner: Mutex<Option<Connection>>,
}

impl ConnectionCell {
    pub(crate) fn new(conn: Connection) -> Self {
        Self {
            inner: Mutex::new(Some(conn)),
        }
    }

    /// Runs `f` with exclusive access to the connection.
    pub(crate) fn with<T>(&self, f: impl FnOnce(&Connection) -> CoreResult<T>) -> CoreResult<T> {
        let guard = self.inner.lock();
        match guard.as_ref() {
            Some(conn) => f(conn),
            None => Err(CoreError::DatabaseClosed),
        }
    }

    pub(crate) fn is_open(&self) -> bool {
        self.inner.lock().is_some()
    }

    /// Closes the connection. Closing twice is a no-op.
    pub(crate) fn close(&self) -> CoreResult<()> {
        let Some(conn) = self.inner.lock().take() else {
            return Ok(());
        };
        conn.close().map_err(|(_, e)| CoreError::from(e))
    }
}

impl SqlExecutor for ConnectionCell {
    fn execute_batch(&self, sql: &str) -> CoreResult<()> {
        self.with(|conn| SqlExecutor::execute_batch(conn, sql))
    }

    fn is_autocommit(&self) -> CoreResult<bool> {
        self.with(|conn| Ok(conn.is_autocommit()))
    }
}

/// Opens and configures a connection. `None` opens a private in-memory database.
pub(crate) fn open_connection(path: Option<&Path>, config: &Config) -> CoreResult<Connection> {
    let conn = match path {
        Some(path) => {
            let mut flags = OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_URI
                | OpenFlags::SQLITE_OPEN_NO_MUTEX;
            if config.create_if_missing {
                flags |= OpenFlags::SQLITE_OPEN_CREATE;
            }
            Connection::open_with_flags(path, flags)?
        }
        None => Connection::open_in_memory()?,
    };

    conn.busy_timeout(config.busy_timeout)?;

    if path.is_some() && config.wal_mode {
        let mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        if !mode.eq_ignore_ascii_case("wal") {
            warn!(journal_mode = %mode, "write-ahead logging unavailable");
        }
    }

    let synchronous = if config.sync_on_commit { "FULL" } else { "NORMAL" };
    conn.pragma_update(None, "synchronous", synchronous)?;

    register_regexp(&conn)?;
    debug!(?path, "connection configured");
    Ok(conn)
}

/// Returns the connection's journal mode, lowercased.
pub(crate) fn journal_mode(conn: &Connection) -> CoreResult<String> {
    let mode: String = conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))?;
    Ok(mode.to_ascii_lowercase())
}

/// Installs `REGEXP` (`x REGEXP pattern` calls `regexp(pattern, x)`).
fn register_regexp(conn: &Connection) -> CoreResult<()> {
    conn.create_scalar_function(
        "regexp",
        2,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let re: Arc<Regex> = ctx.get_or_create_aux(0, |vr| -> Result<_, BoxError> {
                Ok(Regex::new(vr.as_str()?)?)
            })?;
            let matched = match ctx.get_raw(1) {
                ValueRef::Null => return Ok(None),
                ValueRef::Text(bytes) => std::str::from_utf8(bytes)
                    .map(|text| re.is_match(text))
                    .unwrap_or(false),
                ValueRef::Integer(i) => re.is_match(&i.to_string()),
                ValueRef::Real(f) => re.is_match(&f.to_string()),
                ValueRef::Blob(_) => false,
            };
            Ok(Some(matched))
        },
    )?;
    Ok(())
}
