//! Query operators and filter triples.

use serde_json::Value;
use std::fmt;

/// Comparison applied by a [`Filter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    /// `field = value`
    Eq,
    /// `field != value`
    Ne,
    /// `field > value`
    Gt,
    /// `field >= value`
    Gte,
    /// `field < value`
    Lt,
    /// `field <= value`
    Lte,
    /// SQL `LIKE` pattern match.
    Like,
    /// Regular expression match.
    Regexp,
    /// Field is missing or null.
    IsNull,
    /// Field is present and not null.
    IsNotNull,
    /// Field equals one of the values of a JSON array.
    In,
}

impl Operator {
    /// Returns the lookup suffix naming this operator (`age__gte`).
    #[must_use]
    pub const fn lookup(self) -> &'static str {
        match self {
            Self::Eq => "exact",
            Self::Ne => "ne",
            Self::Gt => "gt",
            Self::Gte => "gte",
            Self::Lt => "lt",
            Self::Lte => "lte",
            Self::Like => "like",
            Self::Regexp => "regex",
            Self::IsNull => "isnull",
            Self::IsNotNull => "notnull",
            Self::In => "in",
        }
    }

    /// Parses a lookup suffix.
    #[must_use]
    pub fn from_lookup(suffix: &str) -> Option<Self> {
        Some(match suffix {
            "exact" => Self::Eq,
            "ne" => Self::Ne,
            "gt" => Self::Gt,
            "gte" => Self::Gte,
            "lt" => Self::Lt,
            "lte" => Self::Lte,
            "like" => Self::Like,
            "regex" => Self::Regexp,
            "isnull" => Self::IsNull,
            "notnull" => Self::IsNotNull,
            "in" => Self::In,
            _ => return None,
        })
    }

    pub(crate) const fn sql(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "!=",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Lt => "<",
            Self::Lte => "<=",
            Self::Like => "LIKE",
            Self::Regexp => "REGEXP",
            Self::IsNull => "IS NULL",
            Self::IsNotNull => "IS NOT NULL",
            Self::In => "IN",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.lookup())
    }
}

/// A `(field, operator, value)` triple.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    /// Field path, `id` for the document identifier.
    pub field: String,
    /// Comparison to apply.
    pub op: Operator,
    /// Operand; ignored by the null checks.
    pub value: Value,
}

impl Filter {
    /// Creates a filter.
    pub fn new(field: impl Into<String>, op: Operator, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            op,
            value: value.into(),
        }
    }

    /// `field = value`
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(field, Operator::Eq, value)
    }

    /// `field != value`
    pub fn ne(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(field, Operator::Ne, value)
    }

    /// `field > value`
    pub fn gt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(field, Operator::Gt, value)
    }

    /// `field >= value`
    pub fn gte(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(field, Operator::Gte, value)
    }

    /// `field < value`
    pub fn lt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(field, Operator::Lt, value)
    }

    /// `field <= value`
    pub fn lte(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(field, Operator::Lte, value)
    }

    /// `field LIKE pattern`
    pub fn like(field: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self::new(field, Operator::Like, Value::String(pattern.into()))
    }

    /// `field REGEXP pattern`
    pub fn regexp(field: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self::new(field, Operator::Regexp, Value::String(pattern.into()))
    }

    /// `field IS NULL`
    pub fn is_null(field: impl Into<String>) -> Self {
        Self::new(field, Operator::IsNull, Value::Null)
    }

    /// `field IS NOT NULL`
    pub fn is_not_null(field: impl Into<String>) -> Self {
        Self::new(field, Operator::IsNotNull, Value::Null)
    }

    /// `field IN (values...)`
    pub fn is_in<I, V>(field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let values = values.into_iter().map(Into::into).collect();
        Self::new(field, Operator::In, Value::Array(values))
    }

    /// Builds a filter from a lookup key such as `age__gte` or `name`.
    ///
    /// An unknown suffix is treated as part of the field name. `isnull`
    /// takes a boolean: `false` turns it into a not-null check.
    pub fn from_lookup(key: &str, value: impl Into<Value>) -> Self {
        let value = value.into();
        let (field, op) = match key.rsplit_once("__") {
            Some((field, suffix)) if !field.is_empty() => match Operator::from_lookup(suffix) {
                Some(op) => (field, op),
                None => (key, Operator::Eq),
            },
            _ => (key, Operator::Eq),
        };

        if op == Operator::IsNull && value == Value::Bool(false) {
            return Self::is_not_null(field);
        }
        Self::new(field, op, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn lookup_round_trips() {
        for op in [
            Operator::Eq,
            Operator::Ne,
            Operator::Gt,
            Operator::Gte,
            Operator::Lt,
            Operator::Lte,
            Operator::Like,
            Operator::Regexp,
            Operator::IsNull,
            Operator::IsNotNull,
            Operator::In,
        ] {
            assert_eq!(Operator::from_lookup(op.lookup()), Some(op));
        }
        assert_eq!(Operator::from_lookup("between"), None);
    }

    #[test]
    fn plain_key_is_equality() {
        assert_eq!(Filter::from_lookup("name", "Alice"), Filter::eq("name", "Alice"));
        assert_eq!(
            Filter::from_lookup("first_name", "Al"),
            Filter::eq("first_name", "Al")
        );
    }

    #[test]
    fn suffix_selects_operator() {
        assert_eq!(Filter::from_lookup("age__gt", 18), Filter::gt("age", 18));
        assert_eq!(
            Filter::from_lookup("first_name__like", "A%"),
            Filter::like("first_name", "A%")
        );
        assert_eq!(
            Filter::from_lookup("status__in", json!(["a", "b"])),
            Filter::is_in("status", ["a", "b"])
        );
    }

    #[test]
    fn unknown_suffix_stays_in_field() {
        assert_eq!(
            Filter::from_lookup("user__status", "x"),
            Filter::eq("user__status", "x")
        );
    }

    #[test]
    fn isnull_false_is_not_null() {
        assert_eq!(
            Filter::from_lookup("description__isnull", true).op,
            Operator::IsNull
        );
        assert_eq!(
            Filter::from_lookup("description__isnull", false),
            Filter::is_not_null("description")
        );
    }
}
