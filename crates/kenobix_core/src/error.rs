//! Error types for KenobiX core.

use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Broad classification of a [`CoreError`].
///
/// Callers that only care about "whose fault was it" can match on the kind
/// instead of on individual variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The document is structurally invalid (not a JSON object).
    InvalidDocument,
    /// A query argument or field identifier is malformed.
    InvalidArgument,
    /// The operation is not valid in the current transaction state.
    TransactionState,
    /// The backing engine failed (I/O, corruption, constraint, closed handle).
    Engine,
}

/// Errors that can occur in KenobiX core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// SQLite engine error.
    #[error("engine error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// JSON serialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Document is not a JSON object.
    #[error("invalid document: {message}")]
    InvalidDocument {
        /// Description of the problem.
        message: String,
    },

    /// Field or collection name cannot be used as an identifier.
    #[error("invalid field {name:?}: {reason}")]
    InvalidField {
        /// The offending name.
        name: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Query arguments are malformed.
    #[error("invalid query: {message}")]
    InvalidQuery {
        /// Description of the problem.
        message: String,
    },

    /// `begin()` called while a transaction is open.
    #[error("already in a transaction")]
    AlreadyInTransaction,

    /// Transaction operation called while idle.
    #[error("not in a transaction")]
    NotInTransaction,

    /// Savepoint handle was released, rolled past, or never existed.
    #[error("unknown or invalidated savepoint: {name}")]
    UnknownSavepoint {
        /// Name of the savepoint.
        name: String,
    },

    /// A savepoint with this name is already active.
    #[error("savepoint already active: {name}")]
    DuplicateSavepoint {
        /// Name of the savepoint.
        name: String,
    },

    /// Database is closed.
    #[error("database is closed")]
    DatabaseClosed,
}

impl CoreError {
    /// Creates an invalid document error.
    pub fn invalid_document(message: impl Into<String>) -> Self {
        Self::InvalidDocument {
            message: message.into(),
        }
    }

    /// Creates an invalid field error.
    pub fn invalid_field(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Creates an invalid query error.
    pub fn invalid_query(message: impl Into<String>) -> Self {
        Self::InvalidQuery {
            message: message.into(),
        }
    }

    /// Creates an unknown savepoint error.
    pub fn unknown_savepoint(name: impl Into<String>) -> Self {
        Self::UnknownSavepoint { name: name.into() }
    }

    /// Returns the broad classification of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidDocument { .. } => ErrorKind::InvalidDocument,
            Self::InvalidField { .. } | Self::InvalidQuery { .. } => ErrorKind::InvalidArgument,
            Self::AlreadyInTransaction
            | Self::NotInTransaction
            | Self::UnknownSavepoint { .. }
            | Self::DuplicateSavepoint { .. } => ErrorKind::TransactionState,
            Self::Sqlite(_) | Self::Json(_) | Self::Io(_) | Self::DatabaseClosed => {
                ErrorKind::Engine
            }
        }
    }
}
