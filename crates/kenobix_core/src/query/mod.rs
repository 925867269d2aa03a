//! Query translation.
//!
//! Turns `(field, operator, value)` filters into SQL predicates with bound
//! parameters, choosing the indexed generated column when one exists and
//! JSON extraction otherwise. Indexing changes only the cost of a query,
//! never its results.

mod filter;
mod translator;

pub use filter::{Filter, Operator};
pub use translator::{
    contains_all, to_sql_value, translate, translate_all, AccessPath, Predicate, ID_FIELD,
};
