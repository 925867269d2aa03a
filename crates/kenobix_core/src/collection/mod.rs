//! Collections and their CRUD surface.
//!
//! Each collection is one table holding JSON documents. Handles are cached
//! per name, so every caller asking for the same collection shares one
//! [`Collection`].

mod codec;
mod handle;
mod registry;

pub use codec::{from_document, to_document};
pub use handle::Collection;
pub(crate) use registry::CollectionRegistry;
