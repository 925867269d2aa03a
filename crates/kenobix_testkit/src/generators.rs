//! Property-based test generators using proptest.
//!
//! Provides strategies for generating random test data
//! that maintains required invariants.

use proptest::prelude::*;
use serde_json::{Map, Value};

/// Strategy for generating valid collection names.
pub fn collection_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9_]{0,15}")
        .expect("Invalid regex")
        .prop_filter("Reserved prefix", |s| !s.starts_with("sqlite_"))
}

/// Strategy for generating valid top-level field names.
pub fn field_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9_]{0,11}")
        .expect("Invalid regex")
        .prop_filter("Reserved column", |s| s != "id" && s != "data")
}

/// Strategy for names that the identifier sanitizer must reject.
pub fn invalid_identifier_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        Just(String::new()),
        "[0-9][a-z0-9]{0,8}",
        "[a-z]{1,4}[ ;'\"()*=][a-z]{0,4}",
        "[a-z]{1,4} (OR|AND) 1=1",
    ]
}

/// Strategy for scalar JSON values that compare by equality in SQL.
///
/// Floats are left out on purpose so equality searches stay exact.
pub fn scalar_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<i32>().prop_map(Value::from),
        any::<bool>().prop_map(Value::from),
        "[a-zA-Z0-9 ]{0,16}".prop_map(Value::from),
    ]
}

/// Strategy for generating documents (JSON objects).
///
/// Documents hold up to six scalar fields, an optional nested object and an
/// optional array of short tags.
pub fn document_strategy() -> impl Strategy<Value = Map<String, Value>> {
    (
        prop::collection::btree_map(field_name_strategy(), scalar_strategy(), 0..6),
        prop::option::of(prop::collection::btree_map(
            field_name_strategy(),
            scalar_strategy(),
            1..3,
        )),
        prop::option::of(prop::collection::vec("[a-z]{1,6}", 0..4)),
    )
        .prop_map(|(fields, nested, tags)| {
            let mut doc: Map<String, Value> = fields.into_iter().collect();
            if let Some(nested) = nested {
                doc.insert("nested".into(), Value::Object(nested.into_iter().collect()));
            }
            if let Some(tags) = tags {
                doc.insert("tags".into(), Value::from(tags));
            }
            doc
        })
}

/// Strategy for a batch of documents sharing a searchable `key` field.
pub fn keyed_documents_strategy(
    max_docs: usize,
) -> impl Strategy<Value = Vec<Map<String, Value>>> {
    prop::collection::vec((document_strategy(), 0i64..5), 1..max_docs).prop_map(|docs| {
        docs.into_iter()
            .map(|(mut doc, key)| {
                doc.insert("key".into(), Value::from(key));
                doc
            })
            .collect()
    })
}

/// A write performed inside a nested transaction scope.
#[derive(Debug, Clone)]
pub enum ScopeOperation {
    /// Insert a document.
    Insert(Map<String, Value>),
    /// Open an inner scope running the operations, failing it if asked.
    Nested {
        /// Operations of the inner scope.
        ops: Vec<ScopeOperation>,
        /// Whether the inner scope returns an error.
        fail: bool,
    },
}

/// Strategy for trees of nested scope operations up to `depth` levels.
pub fn scope_operations_strategy(depth: u32) -> impl Strategy<Value = Vec<ScopeOperation>> {
    let leaf = document_strategy().prop_map(ScopeOperation::Insert);
    let tree = leaf.prop_recursive(depth, 24, 4, |inner| {
        prop_oneof![
            3 => document_strategy().prop_map(ScopeOperation::Insert),
            1 => (prop::collection::vec(inner, 0..4), any::<bool>())
                .prop_map(|(ops, fail)| ScopeOperation::Nested { ops, fail }),
        ]
    });
    prop::collection::vec(tree, 0..5)
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Creates a configuration for thorough tests.
    #[must_use]
    pub fn thorough() -> Self {
        Self {
            cases: 1024,
            max_shrink_iters: 10000,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kenobix_core::schema::{sanitize_collection_name, sanitize_field_name};

    proptest! {
        #![proptest_config(PropTestConfig::quick().to_proptest_config())]

        #[test]
        fn collection_names_sanitize(name in collection_name_strategy()) {
            prop_assert!(sanitize_collection_name(&name).is_ok());
        }

        #[test]
        fn field_names_sanitize(name in field_name_strategy()) {
            prop_assert!(sanitize_field_name(&name).is_ok());
        }

        #[test]
        fn invalid_identifiers_are_rejected(name in invalid_identifier_strategy()) {
            prop_assert!(sanitize_field_name(&name).is_err());
        }

        #[test]
        fn keyed_documents_have_key(docs in keyed_documents_strategy(8)) {
            for doc in &docs {
                prop_assert!(doc.get("key").is_some_and(Value::is_i64));
            }
        }
    }
}
