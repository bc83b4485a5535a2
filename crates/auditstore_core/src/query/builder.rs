//! Lazy query builder over an entity set.
//!
//! # Responsibility
//! - Hold filter, eager-load, ordering and paging requirements as a value.
//! - Execute only from the terminal calls `to_list`, `first`, `count`, `any`.
//!
//! # Invariants
//! - Natural order is `id ASC`; explicit orderings keep `id ASC` as tie-breaker.
//! - Includes are attached in the order they were requested.

use super::filter::{checked_column, Filter};
use crate::context::set::EntitySet;
use crate::model::audit::{AuditMetadata, EntityId, AUDIT_COLUMNS};
use crate::model::entity::Entity;
use crate::repo::error::{RepoError, RepoResult};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, Row};
use tokio_util::sync::CancellationToken;

/// Sort direction for `Query::order_by`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

impl Direction {
    fn as_sql(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// Parent keys bound per statement by `load_where_in`.
pub(crate) const WHERE_IN_CHUNK: usize = 500;

/// SQLite's default `SQLITE_MAX_VARIABLE_NUMBER`.
pub(crate) const MAX_BIND_PARAMS: usize = 32_766;

#[derive(Debug, Clone, Copy)]
enum Projection {
    Rows,
    Count,
    Exists,
}

/// Composed, not-yet-executed query for `T`.
pub struct Query<T: Entity> {
    set: EntitySet<T>,
    filter: Option<Filter>,
    includes: Vec<String>,
    order: Vec<(String, Direction)>,
    limit: Option<u32>,
    offset: u32,
}

impl<T: Entity> Clone for Query<T> {
    fn clone(&self) -> Self {
        Self {
            set: self.set.clone(),
            filter: self.filter.clone(),
            includes: self.includes.clone(),
            order: self.order.clone(),
            limit: self.limit,
            offset: self.offset,
        }
    }
}

impl<T: Entity> std::fmt::Debug for Query<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Query")
            .field("table", &T::TABLE)
            .field("filter", &self.filter)
            .field("includes", &self.includes)
            .field("order", &self.order)
            .field("limit", &self.limit)
            .field("offset", &self.offset)
            .finish()
    }
}

impl<T: Entity> Query<T> {
    pub(crate) fn new(set: EntitySet<T>) -> Self {
        Self {
            set,
            filter: None,
            includes: Vec::new(),
            order: Vec::new(),
            limit: None,
            offset: 0,
        }
    }

    /// Adds `filter`, combined with any existing filter by `AND`.
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = Some(match self.filter.take() {
            Some(existing) => existing.and(filter),
            None => filter,
        });
        self
    }

    /// Adds an optional filter; `None` leaves the query unchanged.
    pub fn filter_opt(self, filter: Option<Filter>) -> Self {
        match filter {
            Some(filter) => self.filter(filter),
            None => self,
        }
    }

    /// Requests eager loading of a relation declared in `T::RELATIONS`.
    pub fn include(mut self, relation: impl Into<String>) -> Self {
        self.includes.push(relation.into());
        self
    }

    pub fn order_by(mut self, column: impl Into<String>, direction: Direction) -> Self {
        self.order.push((column.into(), direction));
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u32) -> Self {
        self.offset = offset;
        self
    }

    pub fn includes(&self) -> &[String] {
        &self.includes
    }

    pub fn filter_ref(&self) -> Option<&Filter> {
        self.filter.as_ref()
    }

    /// Checks every column and relation name against the mapping.
    pub fn validate(&self) -> RepoResult<()> {
        self.compile(Projection::Rows).map(|_| ())
    }

    /// Executes the query and returns every matching entity.
    pub async fn to_list(&self, cancel: &CancellationToken) -> RepoResult<Vec<T>> {
        let (sql, binds) = self.compile(Projection::Rows)?;
        let includes = self.includes.clone();
        self.set
            .context()
            .run(cancel, move |conn, cancel| {
                let conn: &Connection = conn;
                let mut stmt = conn.prepare(&sql)?;
                let mut rows = stmt.query(params_from_iter(binds))?;
                let mut entities = Vec::new();
                while let Some(row) = rows.next()? {
                    if cancel.is_cancelled() {
                        return Err(RepoError::Cancelled);
                    }
                    entities.push(read_entity::<T>(row)?);
                }

                for relation in &includes {
                    T::load_relation(conn, relation, &mut entities)?;
                }
                Ok(entities)
            })
            .await
    }

    /// Executes the query and returns the first match, if any.
    pub async fn first(&self, cancel: &CancellationToken) -> RepoResult<Option<T>> {
        let limit = self.limit.map_or(1, |limit| limit.min(1));
        let entities = self.clone().limit(limit).to_list(cancel).await?;
        Ok(entities.into_iter().next())
    }

    /// Counts matching rows, honoring limit/offset.
    pub async fn count(&self, cancel: &CancellationToken) -> RepoResult<u64> {
        let (sql, binds) = self.compile(Projection::Count)?;
        self.set
            .context()
            .run(cancel, move |conn, _| {
                let count: i64 =
                    conn.query_row(&sql, params_from_iter(binds), |row| row.get(0))?;
                u64::try_from(count)
                    .map_err(|_| RepoError::InvalidData(format!("negative row count {count}")))
            })
            .await
    }

    /// Returns whether at least one row matches.
    pub async fn any(&self, cancel: &CancellationToken) -> RepoResult<bool> {
        let (sql, binds) = self.compile(Projection::Exists)?;
        self.set
            .context()
            .run(cancel, move |conn, _| {
                let exists: i64 =
                    conn.query_row(&sql, params_from_iter(binds), |row| row.get(0))?;
                Ok(exists == 1)
            })
            .await
    }

    fn compile(&self, projection: Projection) -> RepoResult<(String, Vec<Value>)> {
        for relation in &self.includes {
            if !T::RELATIONS.contains(&relation.as_str()) {
                return Err(RepoError::UnknownRelation {
                    table: T::TABLE,
                    relation: relation.clone(),
                });
            }
        }

        let mut binds = Vec::new();
        let columns = match projection {
            Projection::Rows => select_list::<T>(),
            Projection::Count | Projection::Exists => "id".to_string(),
        };
        let mut sql = format!("SELECT {columns} FROM {}", T::TABLE);

        if let Some(filter) = &self.filter {
            sql.push_str(" WHERE ");
            sql.push_str(&filter.to_sql::<T>(&mut binds)?);
        }

        let mut ordering = Vec::with_capacity(self.order.len() + 1);
        for (column, direction) in &self.order {
            ordering.push(format!(
                "{} {}",
                checked_column::<T>(column)?,
                direction.as_sql()
            ));
        }
        if !self.order.iter().any(|(column, _)| column == "id") {
            ordering.push("id ASC".to_string());
        }
        sql.push_str(" ORDER BY ");
        sql.push_str(&ordering.join(", "));

        if let Some(limit) = self.limit {
            sql.push_str(" LIMIT ?");
            binds.push(Value::Integer(i64::from(limit)));
            if self.offset > 0 {
                sql.push_str(" OFFSET ?");
                binds.push(Value::Integer(i64::from(self.offset)));
            }
        } else if self.offset > 0 {
            sql.push_str(" LIMIT -1 OFFSET ?");
            binds.push(Value::Integer(i64::from(self.offset)));
        }

        if binds.len() > MAX_BIND_PARAMS {
            return Err(RepoError::InvalidQuery(format!(
                "query on `{}` binds {} values; at most {MAX_BIND_PARAMS} are allowed",
                T::TABLE,
                binds.len()
            )));
        }

        let sql = match projection {
            Projection::Rows => format!("{sql};"),
            Projection::Count => format!("SELECT COUNT(*) FROM ({sql});"),
            Projection::Exists => format!("SELECT EXISTS({sql});"),
        };
        Ok((sql, binds))
    }
}

/// `id`, audit columns and domain columns of `T`, comma separated.
pub(crate) fn select_list<T: Entity>() -> String {
    std::iter::once("id")
        .chain(AUDIT_COLUMNS.iter().copied())
        .chain(T::COLUMNS.iter().copied())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Maps one row selected with `select_list::<T>()`.
pub(crate) fn read_entity<T: Entity>(row: &Row<'_>) -> RepoResult<T> {
    let mut entity = T::from_row(row)?;
    entity.set_id(row.get("id")?);
    *entity.audit_mut() = AuditMetadata::from_row(row)?;
    Ok(entity)
}

/// Loads every `C` whose `column` holds one of `keys`, ordered by id.
///
/// Keys are bound `WHERE_IN_CHUNK` at a time, so any number of parents can
/// be eager-loaded.
///
/// Intended for `Entity::load_relation` implementations.
pub fn load_where_in<C: Entity>(
    conn: &Connection,
    column: &str,
    keys: &[EntityId],
) -> RepoResult<Vec<C>> {
    let column = checked_column::<C>(column)?;
    let mut keys = keys.to_vec();
    keys.sort_unstable();
    keys.dedup();

    let mut related = Vec::new();
    for chunk in keys.chunks(WHERE_IN_CHUNK) {
        let placeholders = vec!["?"; chunk.len()].join(", ");
        let sql = format!(
            "SELECT {} FROM {} WHERE {column} IN ({placeholders});",
            select_list::<C>(),
            C::TABLE
        );
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(chunk.iter()))?;
        while let Some(row) = rows.next()? {
            related.push(read_entity::<C>(row)?);
        }
    }
    related.sort_by_key(|entity| entity.id());
    Ok(related)
}
