//! Transaction bookkeeping.
//!
//! The context mirrors what the engine has been told: whether a transaction
//! is open, how deep scoped transactions are nested, and which savepoints
//! are still active. It never talks to the engine itself, so every state
//! rule can be checked before any SQL runs.

use crate::error::{CoreError, CoreResult};
use crate::schema::sanitize_identifier;
use std::fmt;

/// Whether a transaction is open on the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// No transaction; every statement commits on its own.
    Idle,
    /// An explicit transaction is open.
    Active,
}

/// Handle to an active savepoint.
///
/// Handles are cheap to clone. A handle stays valid until it is released,
/// or until an earlier savepoint is released or rolled back to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Savepoint {
    name: String,
    seq: u64,
}

impl Savepoint {
    /// Returns the savepoint name as issued to the engine.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for Savepoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Per-connection transaction state.
#[derive(Debug, Default)]
pub struct TransactionContext {
    active: bool,
    depth: usize,
    savepoints: Vec<Savepoint>,
    next_seq: u64,
}

impl TransactionContext {
    /// Creates an idle context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> TransactionState {
        if self.active {
            TransactionState::Active
        } else {
            TransactionState::Idle
        }
    }

    /// Checks if a transaction is open.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Returns how many scoped transactions are currently entered.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Returns the active savepoints, oldest first.
    #[must_use]
    pub fn savepoints(&self) -> &[Savepoint] {
        &self.savepoints
    }

    pub(crate) fn ensure_idle(&self) -> CoreResult<()> {
        if self.active {
            return Err(CoreError::AlreadyInTransaction);
        }
        Ok(())
    }

    pub(crate) fn ensure_active(&self) -> CoreResult<()> {
        if !self.active {
            return Err(CoreError::NotInTransaction);
        }
        Ok(())
    }

    pub(crate) fn mark_begun(&mut self) {
        self.active = true;
        self.savepoints.clear();
    }

    /// Returns to idle. Entered scopes keep their depth until they exit.
    pub(crate) fn mark_finished(&mut self) {
        self.active = false;
        self.savepoints.clear();
    }

    pub(crate) fn enter_scope(&mut self) -> usize {
        self.depth += 1;
        self.depth
    }

    pub(crate) fn exit_scope(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    /// Allocates a savepoint without recording it as active.
    ///
    /// Explicit names are sanitized and must not clash with an active
    /// savepoint. Generated names are `sp_{n}` with `n` unique for the
    /// lifetime of the context.
    pub(crate) fn allocate_savepoint(&mut self, name: Option<&str>) -> CoreResult<Savepoint> {
        self.ensure_active()?;

        let name = match name {
            Some(name) => {
                let name = sanitize_identifier(name)?.as_str().to_string();
                if self.is_taken(&name) {
                    return Err(CoreError::DuplicateSavepoint { name });
                }
                name
            }
            None => loop {
                self.next_seq += 1;
                let candidate = format!("sp_{}", self.next_seq);
                if !self.is_taken(&candidate) {
                    break candidate;
                }
            },
        };

        self.next_seq += 1;
        Ok(Savepoint {
            name,
            seq: self.next_seq,
        })
    }

    pub(crate) fn push(&mut self, savepoint: Savepoint) {
        self.savepoints.push(savepoint);
    }

    /// Finds the stack position of an active savepoint.
    pub(crate) fn position(&self, savepoint: &Savepoint) -> CoreResult<usize> {
        self.ensure_active()?;
        self.savepoints
            .iter()
            .rposition(|s| s == savepoint)
            .ok_or_else(|| CoreError::unknown_savepoint(savepoint.name()))
    }

    /// Drops every savepoint from `len` onwards.
    pub(crate) fn truncate(&mut self, len: usize) {
        self.savepoints.truncate(len);
    }

    fn is_taken(&self, name: &str) -> bool {
        self.savepoints
            .iter()
            .any(|s| s.name.eq_ignore_ascii_case(name))
    }
}
