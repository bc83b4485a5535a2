//! Typed, table-scoped view over a persistence context.
//!
//! # Responsibility
//! - Validate an entity mapping once, when the set is derived.
//! - Stage inserts/updates/deletes for one entity type.
//! - Provide identifier lookups and the root of query composition.
//!
//! # Invariants
//! - Mapping names are checked against `IDENTIFIER_RE` before any SQL is built.
//! - Staged writes always pass `Entity::validate()` first.

use super::unit_of_work::ChangeKind;
use super::DbContext;
use crate::model::audit::{now_epoch_ms, EntityId, AUDIT_COLUMNS};
use crate::model::entity::Entity;
use crate::query::builder::{read_entity, select_list, Query};
use crate::repo::error::{RepoError, RepoResult};
use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::OptionalExtension;
use std::collections::HashSet;
use std::marker::PhantomData;
use tokio_util::sync::CancellationToken;

static IDENTIFIER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid identifier regex"));

/// Returns whether `name` can be interpolated into SQL as an identifier.
pub fn is_identifier(name: &str) -> bool {
    IDENTIFIER_RE.is_match(name)
}

/// Entity set for one table.
pub struct EntitySet<T: Entity> {
    context: DbContext,
    _entity: PhantomData<fn() -> T>,
}

impl<T: Entity> Clone for EntitySet<T> {
    fn clone(&self) -> Self {
        Self {
            context: self.context.clone(),
            _entity: PhantomData,
        }
    }
}

impl<T: Entity> EntitySet<T> {
    pub(crate) fn derive(context: DbContext) -> RepoResult<Self> {
        validate_mapping::<T>()?;

        let table_exists = context.with_connection(|conn| {
            let exists: i64 = conn.query_row(
                "SELECT EXISTS(
                    SELECT 1
                    FROM sqlite_master
                    WHERE type = 'table' AND name = ?1
                );",
                [T::TABLE],
                |row| row.get(0),
            )?;
            Ok(exists == 1)
        })?;
        if !table_exists {
            return Err(RepoError::MissingTable(T::TABLE));
        }

        Ok(Self {
            context,
            _entity: PhantomData,
        })
    }

    pub fn context(&self) -> &DbContext {
        &self.context
    }

    /// Stages an insert after stamping creation audit fields.
    pub fn add(&self, mut entity: T) -> RepoResult<T> {
        entity.validate().map_err(RepoError::Validation)?;
        entity
            .audit_mut()
            .stamp_created(now_epoch_ms(), self.context.options().actor.as_deref());
        self.context.stage(T::TABLE, ChangeKind::insert(&entity))?;
        Ok(entity)
    }

    /// Stages a full-row update after stamping modification audit fields.
    pub fn update(&self, mut entity: T) -> RepoResult<T> {
        if !entity.has_id() {
            return Err(RepoError::Validation(format!(
                "cannot update `{}` without an assigned id",
                T::TABLE
            )));
        }
        entity.validate().map_err(RepoError::Validation)?;
        entity
            .audit_mut()
            .stamp_modified(now_epoch_ms(), self.context.options().actor.as_deref());
        self.context.stage(T::TABLE, ChangeKind::update(&entity))?;
        Ok(entity)
    }

    /// Stages a delete for `id` without checking the row exists.
    ///
    /// Returns `false` when a delete for `id` was already pending.
    pub fn remove(&self, id: EntityId) -> RepoResult<bool> {
        self.context.stage(T::TABLE, ChangeKind::Delete { id })
    }

    pub async fn contains(&self, id: EntityId, cancel: &CancellationToken) -> RepoResult<bool> {
        let sql = format!(
            "SELECT EXISTS(SELECT 1 FROM {} WHERE id = ?1);",
            T::TABLE
        );
        self.context
            .run(cancel, move |conn, _| {
                let exists: i64 = conn.query_row(&sql, [id], |row| row.get(0))?;
                Ok(exists == 1)
            })
            .await
    }

    pub async fn find(&self, id: EntityId, cancel: &CancellationToken) -> RepoResult<Option<T>> {
        let sql = format!(
            "SELECT {} FROM {} WHERE id = ?1;",
            select_list::<T>(),
            T::TABLE
        );
        self.context
            .run(cancel, move |conn, _| {
                let mut stmt = conn.prepare(&sql)?;
                let row = stmt
                    .query_row([id], |row| Ok(read_entity::<T>(row)))
                    .optional()?;
                row.transpose()
            })
            .await
    }

    /// Starts an unfiltered query over this set.
    pub fn query(&self) -> Query<T> {
        Query::new(self.clone())
    }
}

fn validate_mapping<T: Entity>() -> RepoResult<()> {
    if !is_identifier(T::TABLE) {
        return Err(RepoError::InvalidMapping(format!(
            "table name `{}` is not a plain identifier",
            T::TABLE
        )));
    }

    let mut seen = HashSet::new();
    for column in T::COLUMNS {
        if !is_identifier(column) {
            return Err(RepoError::InvalidMapping(format!(
                "column `{column}` on `{}` is not a plain identifier",
                T::TABLE
            )));
        }
        if *column == "id" || AUDIT_COLUMNS.contains(column) {
            return Err(RepoError::InvalidMapping(format!(
                "column `{column}` on `{}` is managed by the context",
                T::TABLE
            )));
        }
        if !seen.insert(*column) {
            return Err(RepoError::InvalidMapping(format!(
                "column `{column}` on `{}` is listed twice",
                T::TABLE
            )));
        }
    }

    for relation in T::RELATIONS {
        if !is_identifier(relation) {
            return Err(RepoError::InvalidMapping(format!(
                "relation `{relation}` on `{}` is not a plain identifier",
                T::TABLE
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::is_identifier;

    #[test]
    fn identifiers_reject_sql_fragments() {
        assert!(is_identifier("author_id"));
        assert!(is_identifier("_hidden"));
        assert!(!is_identifier("1st"));
        assert!(!is_identifier("name; DROP TABLE x"));
        assert!(!is_identifier("a.b"));
        assert!(!is_identifier(""));
    }
}
