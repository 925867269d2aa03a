//! Schema management: identifiers, collection tables and indexed fields.
//!
//! A collection is one table with an auto-increment `id` and a JSON `data`
//! column. Indexing a field adds a virtual generated column computed from
//! `data` plus a secondary index on it. Generated columns are never written
//! directly, so they cannot diverge from the payload.

mod ident;
mod manager;

pub(crate) use ident::quote;
pub use ident::{
    sanitize_collection_name, sanitize_field_name, sanitize_identifier, FieldPath, Identifier,
};
pub use manager::{
    create_index, ensure_table, index_name, indexed_fields, list_collections, table_exists,
};
