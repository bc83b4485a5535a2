//! Predicate values compiled to parameterized SQL.

use crate::model::audit::AUDIT_COLUMNS;
use crate::model::entity::Entity;
use crate::repo::error::{RepoError, RepoResult};
use rusqlite::types::Value;

/// Comparison operator for `Filter::Compare`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    fn as_sql(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "<>",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        }
    }
}

/// Row predicate over `id`, audit columns and the entity's domain columns.
///
/// `Eq`/`Ne` against `Value::Null` compile to `IS NULL` / `IS NOT NULL`.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Compare {
        column: String,
        op: CompareOp,
        value: Value,
    },
    IsNull(String),
    IsNotNull(String),
    /// SQL `LIKE` with `%` and `_` wildcards.
    Like {
        column: String,
        pattern: String,
    },
    /// Every value is bound separately; a query whose filters bind more
    /// than 32766 values in total is rejected with `InvalidQuery`.
    In {
        column: String,
        values: Vec<Value>,
    },
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
}

impl Filter {
    pub fn compare(column: impl Into<String>, op: CompareOp, value: impl Into<Value>) -> Self {
        Self::Compare {
            column: column.into(),
            op,
            value: value.into(),
        }
    }

    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(column, CompareOp::Eq, value)
    }

    pub fn ne(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(column, CompareOp::Ne, value)
    }

    pub fn lt(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(column, CompareOp::Lt, value)
    }

    pub fn le(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(column, CompareOp::Le, value)
    }

    pub fn gt(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(column, CompareOp::Gt, value)
    }

    pub fn ge(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(column, CompareOp::Ge, value)
    }

    /// Text equality; shorthand for `eq` with a string value.
    pub fn eq_text(column: impl Into<String>, value: impl Into<String>) -> Self {
        Self::eq(column, value.into())
    }

    pub fn is_null(column: impl Into<String>) -> Self {
        Self::IsNull(column.into())
    }

    pub fn is_not_null(column: impl Into<String>) -> Self {
        Self::IsNotNull(column.into())
    }

    pub fn like(column: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self::Like {
            column: column.into(),
            pattern: pattern.into(),
        }
    }

    pub fn in_list<V: Into<Value>>(
        column: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        Self::In {
            column: column.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// Conjunction, flattening nested `And` nodes.
    pub fn and(self, other: Filter) -> Self {
        match (self, other) {
            (Self::And(mut left), Self::And(right)) => {
                left.extend(right);
                Self::And(left)
            }
            (Self::And(mut left), other) => {
                left.push(other);
                Self::And(left)
            }
            (this, other) => Self::And(vec![this, other]),
        }
    }

    /// Disjunction, flattening nested `Or` nodes.
    pub fn or(self, other: Filter) -> Self {
        match (self, other) {
            (Self::Or(mut left), Self::Or(right)) => {
                left.extend(right);
                Self::Or(left)
            }
            (Self::Or(mut left), other) => {
                left.push(other);
                Self::Or(left)
            }
            (this, other) => Self::Or(vec![this, other]),
        }
    }

    /// Compiles this filter for `T`, appending bound values to `binds`.
    pub(crate) fn to_sql<T: Entity>(&self, binds: &mut Vec<Value>) -> RepoResult<String> {
        match self {
            Self::Compare { column, op, value } => {
                let column = checked_column::<T>(column)?;
                match (op, value) {
                    (CompareOp::Eq, Value::Null) => Ok(format!("{column} IS NULL")),
                    (CompareOp::Ne, Value::Null) => Ok(format!("{column} IS NOT NULL")),
                    _ => {
                        binds.push(value.clone());
                        Ok(format!("{column} {} ?", op.as_sql()))
                    }
                }
            }
            Self::IsNull(column) => Ok(format!("{} IS NULL", checked_column::<T>(column)?)),
            Self::IsNotNull(column) => {
                Ok(format!("{} IS NOT NULL", checked_column::<T>(column)?))
            }
            Self::Like { column, pattern } => {
                let column = checked_column::<T>(column)?;
                binds.push(Value::Text(pattern.clone()));
                Ok(format!("{column} LIKE ?"))
            }
            Self::In { column, values } => {
                let column = checked_column::<T>(column)?;
                if values.is_empty() {
                    return Ok("1 = 0".to_string());
                }
                binds.extend(values.iter().cloned());
                let placeholders = vec!["?"; values.len()].join(", ");
                Ok(format!("{column} IN ({placeholders})"))
            }
            Self::And(filters) => join::<T>(filters, " AND ", "1 = 1", binds),
            Self::Or(filters) => join::<T>(filters, " OR ", "1 = 0", binds),
            Self::Not(inner) => Ok(format!("NOT ({})", inner.to_sql::<T>(binds)?)),
        }
    }
}

impl std::ops::Not for Filter {
    type Output = Filter;

    fn not(self) -> Self::Output {
        match self {
            Self::Not(inner) => *inner,
            other => Self::Not(Box::new(other)),
        }
    }
}

fn join<T: Entity>(
    filters: &[Filter],
    separator: &str,
    empty: &str,
    binds: &mut Vec<Value>,
) -> RepoResult<String> {
    if filters.is_empty() {
        return Ok(empty.to_string());
    }
    let parts = filters
        .iter()
        .map(|filter| filter.to_sql::<T>(binds).map(|sql| format!("({sql})")))
        .collect::<RepoResult<Vec<_>>>()?;
    Ok(parts.join(separator))
}

/// Returns whether `column` exists on every row of `T`.
pub(crate) fn is_known_column<T: Entity>(column: &str) -> bool {
    column == "id" || AUDIT_COLUMNS.contains(&column) || T::COLUMNS.contains(&column)
}

pub(crate) fn checked_column<'a, T: Entity>(column: &'a str) -> RepoResult<&'a str> {
    if is_known_column::<T>(column) {
        Ok(column)
    } else {
        Err(RepoError::UnknownColumn {
            table: T::TABLE,
            column: column.to_string(),
        })
    }
}
