//! Filter-to-SQL translation.
//!
//! Each filter picks one of three access paths:
//!
//! 1. `id` targets the primary key.
//! 2. An indexed field targets its generated column (index-backed).
//! 3. Anything else is extracted from the payload with `json_extract`.
//!
//! Values are always bound as parameters. The only text interpolated into
//! SQL is a sanitized column identifier.

use crate::error::{CoreError, CoreResult};
use crate::query::filter::{Filter, Operator};
use crate::schema::sanitize_field_name;
use rusqlite::types::Value as SqlValue;
use serde_json::Value;
use std::collections::BTreeSet;

/// Name of the synthetic identity field.
pub const ID_FIELD: &str = "id";

/// How a predicate reaches its field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessPath {
    /// The primary key column.
    PrimaryKey,
    /// A generated column backed by a secondary index.
    Indexed(String),
    /// JSON extraction from the payload (full scan).
    JsonPath,
}

impl AccessPath {
    /// Returns whether the predicate can be served by an index.
    #[must_use]
    pub fn uses_index(&self) -> bool {
        !matches!(self, Self::JsonPath)
    }
}

/// A SQL boolean expression plus its bound parameters, in order.
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    /// SQL fragment with `?` placeholders.
    pub sql: String,
    /// Values for the placeholders.
    pub params: Vec<SqlValue>,
    /// Access paths of the fields involved.
    pub access: Vec<AccessPath>,
}

impl Predicate {
    /// A predicate that matches every row.
    #[must_use]
    pub fn always() -> Self {
        Self {
            sql: "1 = 1".to_string(),
            params: Vec::new(),
            access: Vec::new(),
        }
    }

    /// Joins predicates with `AND`. An empty list matches everything.
    #[must_use]
    pub fn and(predicates: Vec<Predicate>) -> Self {
        if predicates.is_empty() {
            return Self::always();
        }

        let mut sql = Vec::with_capacity(predicates.len());
        let mut params = Vec::new();
        let mut access = Vec::new();
        for p in predicates {
            sql.push(format!("({})", p.sql));
            params.extend(p.params);
            access.extend(p.access);
        }

        Self {
            sql: sql.join(" AND "),
            params,
            access,
        }
    }

    /// Returns whether every field involved is index-backed.
    #[must_use]
    pub fn fully_indexed(&self) -> bool {
        !self.access.is_empty() && self.access.iter().all(AccessPath::uses_index)
    }
}

/// Converts a JSON value into a bindable SQL value.
///
/// Booleans become `0`/`1`, matching what `json_extract` yields for JSON
/// `false`/`true`. Arrays and objects bind as their JSON text; equality
/// filters pair that text with a type check (see [`translate`]).
#[must_use]
pub fn to_sql_value(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or(f64::NAN)),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        Value::Array(_) | Value::Object(_) => SqlValue::Text(value.to_string()),
    }
}

/// Resolves the SQL expression addressing `field`.
struct Target {
    expr: String,
    params: Vec<SqlValue>,
    access: AccessPath,
    /// Payload path of the field; `None` for the primary key.
    json_path: Option<String>,
}

fn resolve(field: &str, indexed: &BTreeSet<String>) -> CoreResult<Target> {
    let path = sanitize_field_name(field)?;

    if field == ID_FIELD {
        return Ok(Target {
            expr: ID_FIELD.to_string(),
            params: Vec::new(),
            access: AccessPath::PrimaryKey,
            json_path: None,
        });
    }

    if indexed.contains(field) {
        let column = path.column().to_string();
        return Ok(Target {
            expr: column.clone(),
            params: Vec::new(),
            access: AccessPath::Indexed(column),
            json_path: Some(path.json_path()),
        });
    }

    let json_path = path.json_path();
    Ok(Target {
        expr: "json_extract(data, ?)".to_string(),
        params: vec![SqlValue::Text(json_path.clone())],
        access: AccessPath::JsonPath,
        json_path: Some(json_path),
    })
}

/// Returns the JSON type a stored value must have to equal `value`, when
/// comparing text alone cannot tell.
///
/// Arrays and objects come out of the payload as JSON text, so an object
/// field and a string spelling the same JSON look identical to SQL.
fn type_guard(value: &Value) -> Option<&'static str> {
    match value {
        Value::Array(_) => Some("array"),
        Value::Object(_) => Some("object"),
        Value::String(s) => match serde_json::from_str::<Value>(s) {
            Ok(Value::Array(_) | Value::Object(_)) => Some("text"),
            _ => None,
        },
        _ => None,
    }
}

/// Translates one filter into a predicate.
///
/// `indexed` is the collection's current set of indexed fields.
///
/// Equality on an array, an object, or a string that parses as one also
/// checks the stored value's JSON type, so `{"a":1}` never equals the
/// string `"{\"a\":1}"`. Ordering and `in` lookups compare the bound text
/// only.
pub fn translate(filter: &Filter, indexed: &BTreeSet<String>) -> CoreResult<Predicate> {
    let target = resolve(&filter.field, indexed)?;
    let Target {
        expr,
        mut params,
        access,
        json_path,
    } = target;

    let guard = match filter.op {
        Operator::Eq | Operator::Ne => json_path.zip(type_guard(&filter.value)),
        _ => None,
    };
    if let Some((path, json_type)) = guard {
        let placeholder = if filter.value.is_string() { "?" } else { "json(?)" };
        params.push(to_sql_value(&filter.value));
        params.push(SqlValue::Text(path));
        let sql = if filter.op == Operator::Eq {
            format!("{expr} = {placeholder} AND json_type(data, ?) = '{json_type}'")
        } else {
            format!("({expr} != {placeholder} OR json_type(data, ?) != '{json_type}')")
        };
        return Ok(Predicate {
            sql,
            params,
            access: vec![access],
        });
    }

    let sql = match filter.op {
        Operator::IsNull | Operator::IsNotNull => format!("{expr} {}", filter.op.sql()),
        Operator::Eq | Operator::Ne if filter.value.is_null() => {
            let check = if filter.op == Operator::Eq {
                Operator::IsNull
            } else {
                Operator::IsNotNull
            };
            format!("{expr} {}", check.sql())
        }
        Operator::Eq | Operator::Ne | Operator::Gt | Operator::Gte | Operator::Lt | Operator::Lte => {
            if filter.value.is_null() {
                return Err(CoreError::invalid_query(format!(
                    "{} lookup on {:?} requires a non-null value",
                    filter.op, filter.field
                )));
            }
            params.push(to_sql_value(&filter.value));
            format!("{expr} {} ?", filter.op.sql())
        }
        Operator::Like | Operator::Regexp => {
            let pattern = match &filter.value {
                Value::String(s) if !s.is_empty() => s,
                _ => {
                    return Err(CoreError::invalid_query(
                        "pattern must be a non-empty string",
                    ))
                }
            };
            if filter.op == Operator::Regexp {
                regex::Regex::new(pattern).map_err(|e| {
                    CoreError::invalid_query(format!("invalid regular expression: {e}"))
                })?;
            }
            params.push(SqlValue::Text(pattern.clone()));
            format!("{expr} {} ?", filter.op.sql())
        }
        Operator::In => {
            let Value::Array(values) = &filter.value else {
                return Err(CoreError::invalid_query(
                    "in lookup requires an array of values",
                ));
            };
            if values.is_empty() {
                return Ok(Predicate {
                    sql: "1 = 0".to_string(),
                    params: Vec::new(),
                    access: vec![access],
                });
            }
            let placeholders = vec!["?"; values.len()].join(", ");
            params.extend(values.iter().map(to_sql_value));
            format!("{expr} IN ({placeholders})")
        }
    };

    Ok(Predicate {
        sql,
        params,
        access: vec![access],
    })
}

/// Translates several filters and joins them with `AND`.
pub fn translate_all(filters: &[Filter], indexed: &BTreeSet<String>) -> CoreResult<Predicate> {
    let predicates = filters
        .iter()
        .map(|f| translate(f, indexed))
        .collect::<CoreResult<Vec<_>>>()?;
    Ok(Predicate::and(predicates))
}

/// Builds a predicate matching documents whose array `field` holds every one
/// of `values`.
///
/// Returns `None` for an empty value list; callers treat that as "no match".
pub fn contains_all(field: &str, values: &[Value]) -> CoreResult<Option<Predicate>> {
    let path = sanitize_field_name(field)?;

    let mut distinct: Vec<SqlValue> = Vec::with_capacity(values.len());
    for value in values {
        let v = to_sql_value(value);
        if !distinct.contains(&v) {
            distinct.push(v);
        }
    }
    if distinct.is_empty() {
        return Ok(None);
    }

    let placeholders = vec!["?"; distinct.len()].join(", ");
    let count = i64::try_from(distinct.len())
        .map_err(|_| CoreError::invalid_query("too many values"))?;

    let mut params = Vec::with_capacity(distinct.len() + 2);
    params.push(SqlValue::Text(path.json_path()));
    params.extend(distinct);
    params.push(SqlValue::Integer(count));

    Ok(Some(Predicate {
        sql: format!(
            "(SELECT COUNT(DISTINCT je.value) FROM json_each(data, ?) AS je \
             WHERE je.value IN ({placeholders})) = ?"
        ),
        params,
        access: vec![AccessPath::JsonPath],
    }))
}
