//! # KenobiX Core
//!
//! Schema-less document store on top of SQLite.
//!
//! This crate provides:
//! - Named collections of JSON documents, created on first access
//! - Indexed fields backed by virtual generated columns and secondary indexes
//! - Query translation that picks the index when one exists
//! - Transactions with nested scopes emulated through savepoints
//!
//! ```rust,ignore
//! use kenobix_core::{CoreError, Database};
//! use serde_json::json;
//!
//! let db = Database::open("app.db")?;
//! let users = db.collection_with_indexes("users", ["email"])?;
//!
//! db.transaction(|_| {
//!     users.insert(&json!({"name": "Alice", "email": "alice@example.com"}))?;
//!     Ok::<_, CoreError>(())
//! })?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod collection;
mod config;
mod connection;
mod database;
mod engine;
mod error;
pub mod query;
pub mod schema;
mod stats;
pub mod transaction;
mod types;

pub use collection::{from_document, to_document, Collection};
pub use config::{Config, DEFAULT_COLLECTION};
pub use database::Database;
pub use error::{CoreError, CoreResult, ErrorKind};
pub use query::{Filter, Operator};
pub use stats::{DatabaseStats, StatsSnapshot};
pub use transaction::{Savepoint, TransactionState};
pub use types::{CollectionStats, CursorPage, Document, DocumentId};
