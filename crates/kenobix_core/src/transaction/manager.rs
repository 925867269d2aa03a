//! Transaction manager.

use crate::connection::SqlExecutor;
use crate::error::{CoreError, CoreResult};
use crate::schema::quote;
use crate::stats::DatabaseStats;
use crate::transaction::context::{Savepoint, TransactionContext, TransactionState};
use parking_lot::{Mutex, ReentrantMutex, ReentrantMutexGuard};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Drives the engine's single transaction level and emulates nesting with
/// savepoints.
///
/// ## Locking
///
/// A scoped transaction holds the re-entrant scope lock for its whole
/// duration, so another thread sharing the handle waits until the scope
/// finishes instead of writing into it. Lock order is always scope lock,
/// then context, then connection.
///
/// Explicit `begin`/`commit` calls are not tied to a thread; handles shared
/// across threads need external serialization around them.
pub struct TransactionManager {
    ctx: Mutex<TransactionContext>,
    scope_lock: ReentrantMutex<()>,
    begin_sql: &'static str,
    stats: Arc<DatabaseStats>,
    /// Bumped whenever written state is undone, including catalog changes.
    rollback_epoch: AtomicU64,
}

/// What a scope opened on entry.
enum Scope {
    Outermost,
    Nested(Savepoint),
}

impl TransactionManager {
    /// Creates an idle manager.
    pub(crate) fn new(begin_sql: &'static str, stats: Arc<DatabaseStats>) -> Self {
        Self {
            ctx: Mutex::new(TransactionContext::new()),
            scope_lock: ReentrantMutex::new(()),
            begin_sql,
            stats,
            rollback_epoch: AtomicU64::new(0),
        }
    }

    /// Returns a counter that changes after every rollback or
    /// rollback-to-savepoint.
    ///
    /// Anything cached from the catalog is stale once this moves.
    pub(crate) fn rollback_epoch(&self) -> u64 {
        self.rollback_epoch.load(Ordering::Acquire)
    }

    /// Returns the current state.
    pub fn state(&self) -> TransactionState {
        self.ctx.lock().state()
    }

    /// Checks if a transaction is open.
    pub fn in_transaction(&self) -> bool {
        self.ctx.lock().is_active()
    }

    /// Returns the nesting depth of scoped transactions.
    pub fn depth(&self) -> usize {
        self.ctx.lock().depth()
    }

    /// Returns the names of the active savepoints, oldest first.
    pub fn active_savepoints(&self) -> Vec<String> {
        self.ctx
            .lock()
            .savepoints()
            .iter()
            .map(|s| s.name().to_string())
            .collect()
    }

    /// Serializes a unit of work against scoped transactions on other threads.
    pub(crate) fn exclusive(&self) -> ReentrantMutexGuard<'_, ()> {
        self.scope_lock.lock()
    }

    /// Opens a transaction.
    pub(crate) fn begin(&self, exec: &impl SqlExecutor) -> CoreResult<()> {
        let mut ctx = self.ctx.lock();
        ctx.ensure_idle()?;

        exec.execute_batch(self.begin_sql)?;
        ctx.mark_begun();
        self.stats.record_begin();
        debug!(statement = self.begin_sql, "transaction begun");
        Ok(())
    }

    /// Commits the open transaction.
    ///
    /// If the engine rejects the commit and the transaction is still open,
    /// the context stays active so the caller can roll back.
    pub(crate) fn commit(&self, exec: &impl SqlExecutor) -> CoreResult<()> {
        let mut ctx = self.ctx.lock();
        ctx.ensure_active()?;

        if let Err(err) = exec.execute_batch("COMMIT") {
            if matches!(exec.is_autocommit(), Ok(true)) {
                ctx.mark_finished();
            }
            warn!(error = %err, "commit failed");
            return Err(err);
        }

        ctx.mark_finished();
        self.stats.record_commit();
        debug!("transaction committed");
        Ok(())
    }

    /// Rolls back the open transaction, discarding all savepoints.
    pub(crate) fn rollback(&self, exec: &impl SqlExecutor) -> CoreResult<()> {
        let mut ctx = self.ctx.lock();
        ctx.ensure_active()?;

        // The engine may already have rolled back on its own (e.g. on a
        // full disk); the context still has to return to idle.
        let result = match exec.is_autocommit() {
            Ok(true) => Ok(()),
            _ => exec.execute_batch("ROLLBACK"),
        };

        ctx.mark_finished();
        self.rollback_epoch.fetch_add(1, Ordering::AcqRel);
        self.stats.record_rollback();
        debug!("transaction rolled back");
        result
    }

    /// Creates a savepoint inside the open transaction.
    pub(crate) fn savepoint(
        &self,
        exec: &impl SqlExecutor,
        name: Option<&str>,
    ) -> CoreResult<Savepoint> {
        let mut ctx = self.ctx.lock();
        let savepoint = ctx.allocate_savepoint(name)?;

        exec.execute_batch(&format!("SAVEPOINT {}", quote(savepoint.name())))?;
        ctx.push(savepoint.clone());
        self.stats.record_savepoint();
        trace!(savepoint = savepoint.name(), "savepoint created");
        Ok(savepoint)
    }

    /// Undoes everything written since `savepoint`.
    ///
    /// `savepoint` stays active; savepoints created after it are discarded.
    pub(crate) fn rollback_to(&self, exec: &impl SqlExecutor, savepoint: &Savepoint) -> CoreResult<()> {
        let mut ctx = self.ctx.lock();
        let position = ctx.position(savepoint)?;

        exec.execute_batch(&format!("ROLLBACK TO SAVEPOINT {}", quote(savepoint.name())))?;
        ctx.truncate(position + 1);
        self.rollback_epoch.fetch_add(1, Ordering::AcqRel);
        self.stats.record_savepoint_rollback();
        trace!(savepoint = savepoint.name(), "rolled back to savepoint");
        Ok(())
    }

    /// Merges `savepoint` into the enclosing transaction.
    ///
    /// `savepoint` and every savepoint created after it become invalid.
    pub(crate) fn release_savepoint(
        &self,
        exec: &impl SqlExecutor,
        savepoint: &Savepoint,
    ) -> CoreResult<()> {
        let mut ctx = self.ctx.lock();
        let position = ctx.position(savepoint)?;

        exec.execute_batch(&format!("RELEASE SAVEPOINT {}", quote(savepoint.name())))?;
        ctx.truncate(position);
        self.stats.record_savepoint_release();
        trace!(savepoint = savepoint.name(), "savepoint released");
        Ok(())
    }

    /// Runs `f` atomically.
    ///
    /// The outermost scope begins a transaction and commits it when `f`
    /// returns `Ok`. A scope entered while a transaction is open uses a
    /// savepoint instead, so its failure only undoes its own writes. When
    /// `f` returns `Err` or panics, the scope's writes are undone before the
    /// error propagates unchanged.
    pub(crate) fn scope<X, F, T, E>(&self, exec: &X, f: F) -> Result<T, E>
    where
        X: SqlExecutor,
        F: FnOnce() -> Result<T, E>,
        E: From<CoreError>,
    {
        let _exclusive = self.exclusive();
        let scope = self.enter(exec)?;
        let mut guard = ScopeGuard {
            manager: self,
            exec,
            scope: Some(scope),
        };

        match f() {
            Ok(value) => {
                guard.finish(true)?;
                Ok(value)
            }
            Err(err) => {
                if let Err(cleanup) = guard.finish(false) {
                    warn!(error = %cleanup, "failed to undo transaction scope");
                }
                Err(err)
            }
        }
    }

    fn enter(&self, exec: &impl SqlExecutor) -> CoreResult<Scope> {
        let nested = self.in_transaction();
        let scope = if nested {
            Scope::Nested(self.savepoint(exec, None)?)
        } else {
            self.begin(exec)?;
            Scope::Outermost
        };
        let depth = self.ctx.lock().enter_scope();
        trace!(depth, nested, "entered transaction scope");
        Ok(scope)
    }

    fn exit(&self, exec: &impl SqlExecutor, scope: Scope, success: bool) -> CoreResult<()> {
        self.ctx.lock().exit_scope();
        match (scope, success) {
            (Scope::Outermost, true) => match self.commit(exec) {
                Ok(()) => Ok(()),
                Err(err) => {
                    if self.in_transaction() {
                        if let Err(cleanup) = self.rollback(exec) {
                            warn!(error = %cleanup, "rollback after failed commit failed");
                        }
                    }
                    Err(err)
                }
            },
            (Scope::Outermost, false) => self.rollback(exec),
            (Scope::Nested(sp), true) => self.release_savepoint(exec, &sp),
            (Scope::Nested(sp), false) => {
                self.rollback_to(exec, &sp)?;
                self.release_savepoint(exec, &sp)
            }
        }
    }
}

/// Undoes an unfinished scope on drop, which covers panics inside the scope.
struct ScopeGuard<'a, X: SqlExecutor> {
    manager: &'a TransactionManager,
    exec: &'a X,
    scope: Option<Scope>,
}

impl<X: SqlExecutor> ScopeGuard<'_, X> {
    fn finish(&mut self, success: bool) -> CoreResult<()> {
        match self.scope.take() {
            Some(scope) => self.manager.exit(self.exec, scope, success),
            None => Ok(()),
        }
    }
}

impl<X: SqlExecutor> Drop for ScopeGuard<'_, X> {
    fn drop(&mut self) {
        if let Err(err) = self.finish(false) {
            warn!(error = %err, "failed to undo abandoned transaction scope");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    fn setup() -> (Connection, TransactionManager) {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (v INTEGER)").unwrap();
        let manager = TransactionManager::new("BEGIN IMMEDIATE", Arc::new(DatabaseStats::new()));
        (conn, manager)
    }

    fn insert(conn: &Connection, v: i64) {
        conn.execute("INSERT INTO t (v) VALUES (?1)", [v]).unwrap();
    }

    fn values(conn: &Connection) -> Vec<i64> {
        conn.prepare("SELECT v FROM t ORDER BY v")
            .unwrap()
            .query_map([], |r| r.get(0))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap()
    }

    #[test]
    fn begin_commit_cycle() {
        let (conn, tm) = setup();
        tm.begin(&conn).unwrap();
        assert!(tm.in_transaction());
        assert!(!conn.is_autocommit());

        insert(&conn, 1);
        tm.commit(&conn).unwrap();
        assert_eq!(tm.state(), TransactionState::Idle);
        assert_eq!(values(&conn), vec![1]);
    }

    #[test]
    fn double_begin_fails() {
        let (conn, tm) = setup();
        tm.begin(&conn).unwrap();
        assert!(matches!(tm.begin(&conn), Err(CoreError::AlreadyInTransaction)));
        assert!(tm.in_transaction());
    }

    #[test]
    fn commit_and_rollback_while_idle_fail() {
        let (conn, tm) = setup();
        assert!(matches!(tm.commit(&conn), Err(CoreError::NotInTransaction)));
        assert!(matches!(tm.rollback(&conn), Err(CoreError::NotInTransaction)));
        assert!(matches!(
            tm.savepoint(&conn, None),
            Err(CoreError::NotInTransaction)
        ));
    }

    #[test]
    fn rollback_discards_writes() {
        let (conn, tm) = setup();
        tm.begin(&conn).unwrap();
        insert(&conn, 1);
        tm.rollback(&conn).unwrap();
        assert!(values(&conn).is_empty());
        assert!(!tm.in_transaction());
    }

    #[test]
    fn rollback_to_keeps_handle() {
        let (conn, tm) = setup();
        tm.begin(&conn).unwrap();
        insert(&conn, 1);
        let sp = tm.savepoint(&conn, None).unwrap();
        insert(&conn, 2);

        tm.rollback_to(&conn, &sp).unwrap();
        assert_eq!(values(&conn), vec![1]);

        insert(&conn, 3);
        tm.rollback_to(&conn, &sp).unwrap();
        tm.release_savepoint(&conn, &sp).unwrap();
        tm.commit(&conn).unwrap();
        assert_eq!(values(&conn), vec![1]);
    }

    #[test]
    fn rollback_to_invalidates_later_savepoints() {
        let (conn, tm) = setup();
        tm.begin(&conn).unwrap();
        let outer = tm.savepoint(&conn, Some("outer")).unwrap();
        let inner = tm.savepoint(&conn, Some("inner")).unwrap();

        tm.rollback_to(&conn, &outer).unwrap();
        assert_eq!(tm.active_savepoints(), vec!["outer"]);
        assert!(matches!(
            tm.release_savepoint(&conn, &inner),
            Err(CoreError::UnknownSavepoint { .. })
        ));
    }

    #[test]
    fn release_merges_and_invalidates() {
        let (conn, tm) = setup();
        tm.begin(&conn).unwrap();
        let sp = tm.savepoint(&conn, None).unwrap();
        insert(&conn, 1);
        tm.release_savepoint(&conn, &sp).unwrap();

        assert!(tm.in_transaction());
        assert!(matches!(
            tm.rollback_to(&conn, &sp),
            Err(CoreError::UnknownSavepoint { .. })
        ));
        tm.commit(&conn).unwrap();
        assert_eq!(values(&conn), vec![1]);
    }

    #[test]
    fn rollback_discards_savepoints() {
        let (conn, tm) = setup();
        tm.begin(&conn).unwrap();
        tm.savepoint(&conn, None).unwrap();
        tm.savepoint(&conn, None).unwrap();
        tm.rollback(&conn).unwrap();
        assert!(tm.active_savepoints().is_empty());
    }

    #[test]
    fn scope_commits_on_success() {
        let (conn, tm) = setup();
        let out: CoreResult<i32> = tm.scope(&conn, || {
            insert(&conn, 1);
            Ok(7)
        });
        assert_eq!(out.unwrap(), 7);
        assert_eq!(values(&conn), vec![1]);
        assert!(!tm.in_transaction());
        assert_eq!(tm.depth(), 0);
    }

    #[test]
    fn scope_rolls_back_on_error() {
        let (conn, tm) = setup();
        let out: CoreResult<()> = tm.scope(&conn, || {
            insert(&conn, 1);
            Err(CoreError::invalid_query("boom"))
        });
        assert!(matches!(out, Err(CoreError::InvalidQuery { .. })));
        assert!(values(&conn).is_empty());
        assert!(!tm.in_transaction());
    }

    #[test]
    fn nested_scope_failure_keeps_outer_writes() {
        let (conn, tm) = setup();
        let out: CoreResult<()> = tm.scope(&conn, || {
            insert(&conn, 1);
            let inner: CoreResult<()> = tm.scope(&conn, || {
                assert_eq!(tm.depth(), 2);
                insert(&conn, 2);
                Err(CoreError::invalid_query("inner"))
            });
            assert!(inner.is_err());
            insert(&conn, 3);
            Ok(())
        });
        out.unwrap();
        assert_eq!(values(&conn), vec![1, 3]);
    }

    #[test]
    fn outer_failure_discards_released_inner_writes() {
        let (conn, tm) = setup();
        let out: CoreResult<()> = tm.scope(&conn, || {
            tm.scope(&conn, || {
                insert(&conn, 1);
                Ok::<_, CoreError>(())
            })?;
            Err(CoreError::invalid_query("outer"))
        });
        assert!(out.is_err());
        assert!(values(&conn).is_empty());
    }

    #[test]
    fn scope_inside_explicit_transaction_uses_savepoint() {
        let (conn, tm) = setup();
        tm.begin(&conn).unwrap();
        insert(&conn, 1);
        let out: CoreResult<()> = tm.scope(&conn, || {
            insert(&conn, 2);
            Err(CoreError::invalid_query("inner"))
        });
        assert!(out.is_err());
        assert!(tm.in_transaction());
        tm.commit(&conn).unwrap();
        assert_eq!(values(&conn), vec![1]);
    }

    #[test]
    fn panic_inside_scope_rolls_back() {
        let (conn, tm) = setup();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _: CoreResult<()> = tm.scope(&conn, || {
                insert(&conn, 1);
                panic!("boom");
            });
        }));
        assert!(result.is_err());
        assert!(values(&conn).is_empty());
        assert!(!tm.in_transaction());
        assert_eq!(tm.depth(), 0);
    }

    #[test]
    fn custom_error_type_propagates_unchanged() {
        #[derive(Debug, PartialEq)]
        enum AppError {
            Core(String),
            Business(&'static str),
        }
        impl From<CoreError> for AppError {
            fn from(e: CoreError) -> Self {
                AppError::Core(e.to_string())
            }
        }

        let (conn, tm) = setup();
        let out: Result<(), AppError> = tm.scope(&conn, || {
            insert(&conn, 1);
            Err(AppError::Business("insufficient funds"))
        });
        assert_eq!(out, Err(AppError::Business("insufficient funds")));
        assert_eq!(
            AppError::from(CoreError::NotInTransaction),
            AppError::Core("not in a transaction".to_string())
        );
        assert!(values(&conn).is_empty());
    }

    #[test]
    fn stats_count_outermost_transactions() {
        let (conn, tm) = setup();
        let _: CoreResult<()> = tm.scope(&conn, || tm.scope(&conn, || Ok(())));
        let snap = tm.stats.snapshot();
        assert_eq!(snap.transactions_begun, 1);
        assert_eq!(snap.transactions_committed, 1);
        assert_eq!(snap.savepoints_created, 1);
        assert_eq!(snap.savepoints_released, 1);
    }

    #[test]
    fn rollback_epoch_moves_only_when_work_is_undone() {
        let (conn, tm) = setup();
        let start = tm.rollback_epoch();

        let _: CoreResult<()> = tm.scope(&conn, || Ok(()));
        assert_eq!(tm.rollback_epoch(), start);

        tm.begin(&conn).unwrap();
        let sp = tm.savepoint(&conn, None).unwrap();
        tm.rollback_to(&conn, &sp).unwrap();
        assert_eq!(tm.rollback_epoch(), start + 1);
        tm.rollback(&conn).unwrap();
        assert_eq!(tm.rollback_epoch(), start + 2);

        let _: CoreResult<()> = tm.scope(&conn, || Err(CoreError::invalid_query("abort")));
        assert_eq!(tm.rollback_epoch(), start + 3);
    }

    #[test]
    fn failed_commit_in_scope_rolls_back() {
        let (conn, tm) = setup();
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             CREATE TABLE parent (id INTEGER PRIMARY KEY);
             CREATE TABLE child (
                 parent_id INTEGER REFERENCES parent(id) DEFERRABLE INITIALLY DEFERRED
             );",
        )
        .unwrap();

        // The deferred foreign key only fails at COMMIT, leaving the
        // transaction open for the scope to roll back.
        let out: CoreResult<()> = tm.scope(&conn, || {
            insert(&conn, 1);
            conn.execute("INSERT INTO child (parent_id) VALUES (42)", [])
                .unwrap();
            Ok(())
        });

        assert!(matches!(out, Err(CoreError::Sqlite(_))));
        assert!(!tm.in_transaction());
        assert!(conn.is_autocommit());
        assert!(values(&conn).is_empty());
        assert_eq!(tm.stats.snapshot().transactions_rolled_back, 1);
    }
}
