//! Collection handle cache.

use crate::collection::handle::Collection;
use crate::engine::Engine;
use crate::error::CoreResult;
use crate::schema::{list_collections, sanitize_collection_name};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Hands out one shared [`Collection`] per name.
///
/// Names are sanitized to their lowercase catalog spelling, so `Users` and
/// `users` share one handle and one table.
pub(crate) struct CollectionRegistry {
    engine: Arc<Engine>,
    handles: RwLock<HashMap<String, Arc<Collection>>>,
}

impl CollectionRegistry {
    pub(crate) fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            handles: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the handle for `name`, creating the table on first use, and
    /// makes sure every field in `indexed_fields` is indexed.
    ///
    /// Existing indexes are never dropped.
    pub(crate) fn get_or_create<I, S>(&self, name: &str, indexed_fields: I) -> CoreResult<Arc<Collection>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let ident = sanitize_collection_name(name)?;
        let key = ident.as_str().to_string();

        let cached = self.handles.read().get(&key).cloned();
        let handle = match cached {
            Some(handle) => {
                // A rollback since the handle was built may have dropped
                // its table.
                handle.revalidate()?;
                handle
            }
            None => {
                // Built outside the registry lock: opening touches the
                // connection, which may be busy with a scoped transaction.
                let created = Arc::new(Collection::open(Arc::clone(&self.engine), ident)?);
                let mut handles = self.handles.write();
                let handle = handles.entry(key).or_insert(created);
                debug!(collection = handle.name(), "registered collection");
                Arc::clone(handle)
            }
        };

        for field in indexed_fields {
            handle.create_index(field.as_ref())?;
        }
        Ok(handle)
    }

    /// Lists every collection in the catalog, including ones not opened yet.
    pub(crate) fn names(&self) -> CoreResult<Vec<String>> {
        self.engine.with_conn(list_collections)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::error::ErrorKind;

    fn registry() -> CollectionRegistry {
        CollectionRegistry::new(Arc::new(Engine::open(None, Config::default()).unwrap()))
    }

    #[test]
    fn same_name_same_instance() {
        let reg = registry();
        let a = reg.get_or_create("users", Vec::<&str>::new()).unwrap();
        let b = reg.get_or_create("users", ["email"]).unwrap();
        let c = reg.get_or_create("USERS", Vec::<&str>::new()).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(Arc::ptr_eq(&a, &c));
        assert_eq!(a.get_indexed_fields().unwrap(), vec!["email"]);
    }

    #[test]
    fn later_indexes_are_added_not_replaced() {
        let reg = registry();
        reg.get_or_create("users", ["email"]).unwrap();
        let users = reg.get_or_create("users", ["name"]).unwrap();
        assert_eq!(users.get_indexed_fields().unwrap(), vec!["email", "name"]);
    }

    #[test]
    fn names_reflect_catalog() {
        let reg = registry();
        reg.get_or_create("users", Vec::<&str>::new()).unwrap();
        reg.get_or_create("orders", Vec::<&str>::new()).unwrap();
        assert_eq!(reg.names().unwrap(), vec!["orders", "users"]);
    }

    #[test]
    fn invalid_names_are_rejected() {
        let reg = registry();
        for name in ["", "bad name", "users; DROP TABLE x", "sqlite_master"] {
            let err = reg.get_or_create(name, Vec::<&str>::new()).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidArgument, "{name}");
        }
    }

    #[test]
    fn handle_from_rolled_back_scope_is_usable() {
        let reg = registry();
        let result: CoreResult<()> = reg.engine.atomic(|| {
            reg.get_or_create("ghost", ["name"])?;
            Err(crate::error::CoreError::invalid_query("abort"))
        });
        assert!(result.is_err());
        assert!(reg.names().unwrap().is_empty());

        let ghost = reg.get_or_create("ghost", Vec::<&str>::new()).unwrap();
        assert_eq!(reg.names().unwrap(), vec!["ghost"]);
        assert!(ghost.get_indexed_fields().unwrap().is_empty());
        ghost.insert(&serde_json::json!({"name": "x"})).unwrap();
        assert_eq!(ghost.search("name", "x").unwrap().len(), 1);
    }
}
