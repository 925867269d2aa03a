//! Collection tables, generated columns and secondary indexes.
//!
//! There is no index registry: the set of indexed fields of a collection is
//! read back from the catalog by index name (`{collection}_idx_{field}`), so
//! it survives restarts for as long as the catalog does.
//!
//! Catalog lookups ignore ASCII case, matching how the engine resolves
//! table and index names.

use crate::error::{CoreError, CoreResult};
use crate::schema::ident::{quote, sanitize_field_name, FieldPath, Identifier};
use rusqlite::{Connection, OptionalExtension};
use tracing::debug;

/// Returns the catalog name of the index backing `field` in `table`.
#[must_use]
pub fn index_name(table: &Identifier, field: &FieldPath) -> String {
    format!("{}{}", index_prefix(table), field.as_str())
}

fn index_prefix(table: &Identifier) -> String {
    format!("{}_idx_", table.as_str())
}

/// Creates the backing table for a collection if it does not exist.
///
/// Returns `true` if the table was created by this call.
pub fn ensure_table(conn: &Connection, table: &Identifier) -> CoreResult<bool> {
    if table_exists(conn, table)? {
        return Ok(false);
    }

    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {table} (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            data TEXT NOT NULL CHECK (json_valid(data))
        )"
    ))?;
    debug!(collection = table.as_str(), "created collection table");
    Ok(true)
}

/// Checks whether a collection table exists.
pub fn table_exists(conn: &Connection, table: &Identifier) -> CoreResult<bool> {
    let found = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1 COLLATE NOCASE",
            [table.as_str()],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Adds a generated column and a secondary index for `field`.
///
/// Returns `false` without touching the schema if the index already exists.
/// The column is virtual, so existing rows need no backfill and documents
/// missing the field simply project NULL.
///
/// The caller is expected to run this inside a transaction scope so the
/// column and index appear together.
pub fn create_index(conn: &Connection, table: &Identifier, field: &FieldPath) -> CoreResult<bool> {
    ensure_table(conn, table)?;

    let name = index_name(table, field);
    if index_exists(conn, &name)? {
        return Ok(false);
    }

    let column = field.column();
    for other in indexed_fields(conn, table)? {
        let Ok(other_path) = sanitize_field_name(&other) else {
            continue;
        };
        if other_path
            .column()
            .as_str()
            .eq_ignore_ascii_case(column.as_str())
        {
            return Err(CoreError::invalid_field(
                field.as_str(),
                format!("column {column} is already used by indexed field {other:?}"),
            ));
        }
    }

    let has_column = table_columns(conn, table)?
        .iter()
        .any(|c| c.eq_ignore_ascii_case(column.as_str()));
    if !has_column {
        // Segments are validated identifiers, so the path is safe to inline.
        conn.execute_batch(&format!(
            "ALTER TABLE {table} ADD COLUMN {column} \
             GENERATED ALWAYS AS (json_extract(data, '{path}')) VIRTUAL",
            path = field.json_path(),
        ))?;
    }

    conn.execute_batch(&format!(
        "CREATE INDEX IF NOT EXISTS {} ON {table} ({column})",
        quote(&name)
    ))?;
    debug!(
        collection = table.as_str(),
        field = field.as_str(),
        index = %name,
        "created index"
    );
    Ok(true)
}

/// Lists the indexed fields of a collection, sorted by name.
pub fn indexed_fields(conn: &Connection, table: &Identifier) -> CoreResult<Vec<String>> {
    let prefix = index_prefix(table);
    let mut stmt = conn.prepare_cached(
        "SELECT name FROM sqlite_master \
         WHERE type = 'index' AND tbl_name = ?1 COLLATE NOCASE ORDER BY name",
    )?;
    let names = stmt
        .query_map([table.as_str()], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(names
        .into_iter()
        .filter_map(|name| strip_prefix_ignore_case(&name, &prefix).map(str::to_string))
        .filter(|field| !field.is_empty())
        .collect())
}

/// Lists every collection table, skipping the engine's own tables.
pub fn list_collections(conn: &Connection) -> CoreResult<Vec<String>> {
    let mut stmt =
        conn.prepare_cached("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(names
        .into_iter()
        .filter(|name| !name.starts_with("sqlite_"))
        .collect())
}

fn index_exists(conn: &Connection, name: &str) -> CoreResult<bool> {
    let found = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type = 'index' AND name = ?1 COLLATE NOCASE",
            [name],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

fn strip_prefix_ignore_case<'a>(name: &'a str, prefix: &str) -> Option<&'a str> {
    let head = name.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix)
        .then(|| &name[prefix.len()..])
}

/// Returns every column of a table, generated columns included.
fn table_columns(conn: &Connection, table: &Identifier) -> CoreResult<Vec<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_xinfo({})", quote(table.as_str())))?;
    let columns = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(columns)
}
