//! Generic repository for auditable entities over a SQLite unit-of-work.
//!
//! A `DbContext` owns one connection and the staged changes of every
//! `Repository<T>` built over it; `save` flushes them in one transaction.

pub mod context;
pub mod db;
pub mod logging;
pub mod model;
pub mod query;
pub mod repo;

pub use context::options::ContextOptions;
pub use context::set::EntitySet;
pub use context::unit_of_work::{ChangeState, InsertedKey, SaveReport, StagedChange};
pub use context::DbContext;
pub use db::migrations::Migration;
pub use db::{DbError, DbResult};
pub use logging::{init_logging, logging_status, LogLevel, LoggingConfig, LoggingError};
pub use model::audit::{AuditMetadata, Auditable, EntityId, UNASSIGNED_ID};
pub use model::entity::Entity;
pub use query::builder::{load_where_in, Direction, Query};
pub use query::filter::{CompareOp, Filter};
pub use repo::error::{RepoError, RepoResult};
pub use repo::repository::{AuditRepository, Repository};
pub use tokio_util::sync::CancellationToken;

/// Returns the crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
