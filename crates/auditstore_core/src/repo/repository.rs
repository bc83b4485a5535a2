//! Generic repository over one entity type.
//!
//! # Responsibility
//! - Expose add/exists/delete/save/select-all/select/update for any `Entity`.
//! - Delegate every call to the bound `EntitySet` and `DbContext`.
//!
//! # Invariants
//! - A repository stays bound to one entity type and one context.
//! - Only `save` reaches durable storage; other writes are staged.
//! - `delete` of an id that does not resolve stages nothing and returns `false`.
//! - Repeated `delete` of a resolvable id returns `true` but stages one delete.

use crate::context::set::EntitySet;
use crate::context::DbContext;
use crate::model::audit::EntityId;
use crate::model::entity::Entity;
use crate::query::builder::Query;
use crate::query::filter::Filter;
use crate::repo::error::{RepoError, RepoResult};
use log::debug;
use std::future::Future;
use tokio_util::sync::CancellationToken;

/// Repository contract for auditable entities.
pub trait AuditRepository<T: Entity>: Send + Sync {
    /// Stages `entity` for insertion and returns the staged value.
    fn add(
        &self,
        entity: T,
        cancel: &CancellationToken,
    ) -> impl Future<Output = RepoResult<T>> + Send;

    /// Returns whether a stored row has `id`.
    fn exists(
        &self,
        id: EntityId,
        cancel: &CancellationToken,
    ) -> impl Future<Output = RepoResult<bool>> + Send;

    /// Stages removal of the row with `id`; `false` when no such row exists.
    fn delete(
        &self,
        id: EntityId,
        cancel: &CancellationToken,
    ) -> impl Future<Output = RepoResult<bool>> + Send;

    /// Commits every staged change; `true` when at least one row changed.
    fn save(&self, cancel: &CancellationToken) -> impl Future<Output = RepoResult<bool>> + Send;

    /// Composes a filtered, eager-loading query without executing it.
    fn select_all(
        &self,
        filter: Option<Filter>,
        includes: &[&str],
        cancel: &CancellationToken,
    ) -> impl Future<Output = RepoResult<Query<T>>> + Send;

    /// Returns the first entity matching `filter` in natural order.
    fn select(
        &self,
        filter: Option<Filter>,
        includes: &[&str],
        cancel: &CancellationToken,
    ) -> impl Future<Output = RepoResult<Option<T>>> + Send;

    /// Stages a wholesale update of `entity` and returns the staged value.
    fn update(
        &self,
        entity: T,
        cancel: &CancellationToken,
    ) -> impl Future<Output = RepoResult<T>> + Send;
}

/// Context-backed `AuditRepository` implementation.
pub struct Repository<T: Entity> {
    context: DbContext,
    set: EntitySet<T>,
}

impl<T: Entity> Clone for Repository<T> {
    fn clone(&self) -> Self {
        Self {
            context: self.context.clone(),
            set: self.set.clone(),
        }
    }
}

impl<T: Entity> Repository<T> {
    /// Binds a repository to `context`.
    ///
    /// # Errors
    /// - `ContextUnavailable` when `context` is closed.
    /// - `InvalidMapping` / `MissingTable` when `T` cannot be mapped.
    pub fn try_new(context: &DbContext) -> RepoResult<Self> {
        let set = context.set::<T>()?;
        debug!(
            "event=repo_bind module=repo status=ok ctx={} table={}",
            context.id(),
            T::TABLE
        );
        Ok(Self {
            context: context.clone(),
            set,
        })
    }

    pub fn context(&self) -> &DbContext {
        &self.context
    }

    pub fn set(&self) -> &EntitySet<T> {
        &self.set
    }
}

impl<T: Entity> AuditRepository<T> for Repository<T> {
    async fn add(&self, entity: T, cancel: &CancellationToken) -> RepoResult<T> {
        ensure_not_cancelled(cancel)?;
        self.set.add(entity)
    }

    async fn exists(&self, id: EntityId, cancel: &CancellationToken) -> RepoResult<bool> {
        self.set.contains(id, cancel).await
    }

    async fn delete(&self, id: EntityId, cancel: &CancellationToken) -> RepoResult<bool> {
        if self.set.find(id, cancel).await?.is_none() {
            debug!(
                "event=repo_delete module=repo status=not_found ctx={} table={} id={}",
                self.context.id(),
                T::TABLE,
                id
            );
            return Ok(false);
        }

        if !self.set.remove(id)? {
            debug!(
                "event=repo_delete module=repo status=already_staged ctx={} table={} id={}",
                self.context.id(),
                T::TABLE,
                id
            );
        }
        Ok(true)
    }

    async fn save(&self, cancel: &CancellationToken) -> RepoResult<bool> {
        let report = self.context.save_changes(cancel).await?;
        Ok(report.has_changes())
    }

    async fn select_all(
        &self,
        filter: Option<Filter>,
        includes: &[&str],
        cancel: &CancellationToken,
    ) -> RepoResult<Query<T>> {
        ensure_not_cancelled(cancel)?;
        let query = includes
            .iter()
            .fold(self.set.query().filter_opt(filter), |query, relation| {
                query.include(*relation)
            });
        query.validate()?;
        Ok(query)
    }

    async fn select(
        &self,
        filter: Option<Filter>,
        includes: &[&str],
        cancel: &CancellationToken,
    ) -> RepoResult<Option<T>> {
        let query = self.select_all(filter, includes, cancel).await?;
        query.first(cancel).await
    }

    async fn update(&self, entity: T, cancel: &CancellationToken) -> RepoResult<T> {
        ensure_not_cancelled(cancel)?;
        self.set.update(entity)
    }
}

fn ensure_not_cancelled(cancel: &CancellationToken) -> RepoResult<()> {
    if cancel.is_cancelled() {
        return Err(RepoError::Cancelled);
    }
    Ok(())
}
