//! State shared by a database and all of its collection handles.

use crate::config::Config;
use crate::connection::{open_connection, ConnectionCell};
use crate::error::{CoreError, CoreResult};
use crate::stats::DatabaseStats;
use crate::transaction::{Savepoint, TransactionManager};
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// One connection plus its transaction context.
pub(crate) struct Engine {
    conn: ConnectionCell,
    txn: TransactionManager,
    stats: Arc<DatabaseStats>,
    config: Config,
    path: Option<PathBuf>,
}

impl Engine {
    /// Opens a file database, or a private in-memory one when `path` is `None`.
    pub(crate) fn open(path: Option<&Path>, config: Config) -> CoreResult<Self> {
        let conn = open_connection(path, &config)?;
        let stats = Arc::new(DatabaseStats::new());
        let txn = TransactionManager::new(config.begin_statement(), Arc::clone(&stats));

        info!(path = ?path, wal = config.wal_mode, "database opened");
        Ok(Self {
            conn: ConnectionCell::new(conn),
            txn,
            stats,
            config,
            path: path.map(Path::to_path_buf),
        })
    }

    pub(crate) fn config(&self) -> &Config {
        &self.config
    }

    pub(crate) fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub(crate) fn stats(&self) -> &DatabaseStats {
        &self.stats
    }

    pub(crate) fn transactions(&self) -> &TransactionManager {
        &self.txn
    }

    /// Runs a single unit of work on the connection.
    ///
    /// Waits while another thread is inside a scoped transaction.
    pub(crate) fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> CoreResult<T>,
    ) -> CoreResult<T> {
        let _exclusive = self.txn.exclusive();
        self.conn.with(f)
    }

    /// Runs `f` in a transaction scope (a savepoint when already nested).
    pub(crate) fn atomic<F, T, E>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        E: From<CoreError>,
    {
        self.ensure_open()?;
        self.txn.scope(&self.conn, f)
    }

    pub(crate) fn begin(&self) -> CoreResult<()> {
        let _exclusive = self.txn.exclusive();
        self.txn.begin(&self.conn)
    }

    pub(crate) fn commit(&self) -> CoreResult<()> {
        let _exclusive = self.txn.exclusive();
        self.txn.commit(&self.conn)
    }

    pub(crate) fn rollback(&self) -> CoreResult<()> {
        let _exclusive = self.txn.exclusive();
        self.txn.rollback(&self.conn)
    }

    pub(crate) fn savepoint(&self, name: Option<&str>) -> CoreResult<Savepoint> {
        let _exclusive = self.txn.exclusive();
        self.txn.savepoint(&self.conn, name)
    }

    pub(crate) fn rollback_to(&self, savepoint: &Savepoint) -> CoreResult<()> {
        let _exclusive = self.txn.exclusive();
        self.txn.rollback_to(&self.conn, savepoint)
    }

    pub(crate) fn release_savepoint(&self, savepoint: &Savepoint) -> CoreResult<()> {
        let _exclusive = self.txn.exclusive();
        self.txn.release_savepoint(&self.conn, savepoint)
    }

    pub(crate) fn is_open(&self) -> bool {
        self.conn.is_open()
    }

    fn ensure_open(&self) -> CoreResult<()> {
        if self.conn.is_open() {
            Ok(())
        } else {
            Err(CoreError::DatabaseClosed)
        }
    }

    /// Rolls back any open transaction and closes the connection.
    pub(crate) fn close(&self) -> CoreResult<()> {
        let _exclusive = self.txn.exclusive();
        if !self.conn.is_open() {
            return Ok(());
        }
        if self.txn.in_transaction() {
            warn!("closing with an open transaction; rolling back");
            if let Err(err) = self.txn.rollback(&self.conn) {
                warn!(error = %err, "rollback on close failed");
            }
        }
        self.conn.close()?;
        info!(path = ?self.path, "database closed");
        Ok(())
    }
}
