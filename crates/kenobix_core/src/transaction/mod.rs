//! Transactions and savepoints.
//!
//! The engine supports a single transaction level. Nesting is emulated:
//! the outermost scope owns `BEGIN`/`COMMIT`, and every scope entered while
//! a transaction is open becomes a savepoint.

mod context;
mod manager;

pub use context::{Savepoint, TransactionContext, TransactionState};
pub use manager::TransactionManager;
