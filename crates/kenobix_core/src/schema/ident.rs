//! Identifier sanitizing.
//!
//! Every logical name that ends up in SQL text (collection names, generated
//! column names, savepoint names) goes through this module. The schema
//! manager and the query translator both derive physical column names from
//! [`FieldPath::column`], so the two always agree on where a field lives.

use crate::error::{CoreError, CoreResult};
use std::fmt;

/// Columns every collection table owns; generated columns may not reuse them.
const RESERVED_COLUMNS: [&str; 2] = ["id", "data"];

/// SQLite keywords. Identifiers matching one of these are quoted.
const SQL_KEYWORDS: &[&str] = &[
    "ABORT", "ACTION", "ADD", "AFTER", "ALL", "ALTER", "ALWAYS", "ANALYZE", "AND", "AS", "ASC",
    "ATTACH", "AUTOINCREMENT", "BEFORE", "BEGIN", "BETWEEN", "BY", "CASCADE", "CASE", "CAST",
    "CHECK", "COLLATE", "COLUMN", "COMMIT", "CONFLICT", "CONSTRAINT", "CREATE", "CROSS",
    "CURRENT", "CURRENT_DATE", "CURRENT_TIME", "CURRENT_TIMESTAMP", "DATABASE", "DEFAULT",
    "DEFERRABLE", "DEFERRED", "DELETE", "DESC", "DETACH", "DISTINCT", "DO", "DROP", "EACH",
    "ELSE", "END", "ESCAPE", "EXCEPT", "EXCLUDE", "EXCLUSIVE", "EXISTS", "EXPLAIN", "FAIL",
    "FILTER", "FIRST", "FOLLOWING", "FOR", "FOREIGN", "FROM", "FULL", "GENERATED", "GLOB",
    "GROUP", "GROUPS", "HAVING", "IF", "IGNORE", "IMMEDIATE", "IN", "INDEX", "INDEXED",
    "INITIALLY", "INNER", "INSERT", "INSTEAD", "INTERSECT", "INTO", "IS", "ISNULL", "JOIN",
    "KEY", "LAST", "LEFT", "LIKE", "LIMIT", "MATCH", "MATERIALIZED", "NATURAL", "NO", "NOT",
    "NOTHING", "NOTNULL", "NULL", "NULLS", "OF", "OFFSET", "ON", "OR", "ORDER", "OTHERS",
    "OUTER", "OVER", "PARTITION", "PLAN", "PRAGMA", "PRECEDING", "PRIMARY", "QUERY", "RAISE",
    "RANGE", "RECURSIVE", "REFERENCES", "REGEXP", "REINDEX", "RELEASE", "RENAME", "REPLACE",
    "RESTRICT", "RETURNING", "RIGHT", "ROLLBACK", "ROW", "ROWS", "SAVEPOINT", "SELECT", "SET",
    "TABLE", "TEMP", "TEMPORARY", "THEN", "TIES", "TO", "TRANSACTION", "TRIGGER", "UNBOUNDED",
    "UNION", "UNIQUE", "UPDATE", "USING", "VACUUM", "VALUES", "VIEW", "VIRTUAL", "WHEN",
    "WHERE", "WINDOW", "WITH", "WITHOUT",
];

/// A validated SQL identifier.
///
/// Contains only ASCII letters, digits and underscores and never starts with
/// a digit. `Display` renders the SQL form, quoting reserved keywords.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identifier(String);

impl Identifier {
    /// Returns the bare identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns whether the identifier collides with a SQL keyword.
    #[must_use]
    pub fn is_keyword(&self) -> bool {
        SQL_KEYWORDS.iter().any(|k| k.eq_ignore_ascii_case(&self.0))
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_keyword() {
            write!(f, "\"{}\"", self.0)
        } else {
            f.write_str(&self.0)
        }
    }
}

/// A validated (possibly dotted) document field path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath {
    raw: String,
    segments: Vec<String>,
    column: Identifier,
}

impl FieldPath {
    /// Returns the path exactly as the caller wrote it.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Returns whether the path reaches below the top level.
    #[must_use]
    pub fn is_nested(&self) -> bool {
        self.segments.len() > 1
    }

    /// Returns the name of the generated column for this field.
    ///
    /// Only the sanitized leaf is used. A leaf that names one of the table's
    /// own columns gets a leading underscore.
    #[must_use]
    pub fn column(&self) -> &Identifier {
        &self.column
    }

    /// Returns the JSON path expression (`$.a.b`) addressing this field.
    #[must_use]
    pub fn json_path(&self) -> String {
        let mut path = String::from("$");
        for segment in &self.segments {
            path.push('.');
            if segment.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_') {
                path.push_str(segment);
            } else {
                path.push('"');
                path.push_str(segment);
                path.push('"');
            }
        }
        path
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Sanitizes a single name (collection, column or savepoint) into an identifier.
///
/// Hyphens are mapped to underscores. Fails if the result is empty, starts
/// with a digit, or contains anything but ASCII letters, digits and
/// underscores.
pub fn sanitize_identifier(name: &str) -> CoreResult<Identifier> {
    if name.is_empty() {
        return Err(CoreError::invalid_field(name, "name must be a non-empty string"));
    }

    let normalized: String = name
        .chars()
        .map(|c| if c == '-' { '_' } else { c })
        .collect();

    let mut chars = normalized.chars();
    let valid_start = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    if !valid_start || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(CoreError::invalid_field(
            name,
            "not a valid identifier (letters, digits, '_' and '-' only, no leading digit)",
        ));
    }

    Ok(Identifier(normalized))
}

/// Sanitizes a collection name.
///
/// Same rules as [`sanitize_identifier`], and the `sqlite_` prefix owned by
/// the engine's catalog is refused. The result is lowercased: table names
/// are case-insensitive in the engine, so `Users` and `users` are one
/// collection and must map to one catalog spelling.
pub fn sanitize_collection_name(name: &str) -> CoreResult<Identifier> {
    let ident = sanitize_identifier(name)?;
    let lowered = ident.as_str().to_ascii_lowercase();
    if lowered.starts_with("sqlite_") {
        return Err(CoreError::invalid_field(
            name,
            "names starting with 'sqlite_' are reserved",
        ));
    }
    Ok(Identifier(lowered))
}

/// Parses and validates a field path such as `name` or `address.city`.
pub fn sanitize_field_name(name: &str) -> CoreResult<FieldPath> {
    if name.is_empty() {
        return Err(CoreError::invalid_field(name, "key must be a non-empty string"));
    }

    let mut segments = Vec::new();
    let mut leaf = None;
    for segment in name.split('.') {
        if segment.is_empty() {
            return Err(CoreError::invalid_field(name, "empty path segment"));
        }
        // Each segment must be identifier-like so the path can be inlined
        // into generated column definitions.
        leaf = Some(sanitize_identifier(segment).map_err(|_| {
            CoreError::invalid_field(name, format!("invalid path segment {segment:?}"))
        })?);
        segments.push(segment.to_string());
    }

    let leaf = leaf.ok_or_else(|| CoreError::invalid_field(name, "empty field path"))?;
    let column = if RESERVED_COLUMNS
        .iter()
        .any(|r| r.eq_ignore_ascii_case(leaf.as_str()))
    {
        Identifier(format!("_{}", leaf.as_str()))
    } else {
        leaf
    };

    Ok(FieldPath {
        raw: name.to_string(),
        segments,
        column,
    })
}

/// Quotes an arbitrary name for use as a SQL identifier.
pub(crate) fn quote(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
