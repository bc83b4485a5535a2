//! Table mapping contract for repository-managed types.
//!
//! # Responsibility
//! - Map an `Auditable` type onto one SQLite table.
//! - Expose named relations that queries may eager-load.
//!
//! # Invariants
//! - `COLUMNS` lists domain columns only; `id` and audit columns are implicit.
//! - `values()` yields exactly one value per entry of `COLUMNS`, in order.
//! - Table, column and relation names must be plain SQL identifiers.

use crate::model::audit::Auditable;
use crate::repo::error::{RepoError, RepoResult};
use rusqlite::types::Value;
use rusqlite::{Connection, Row};

/// A persisted record type bound to one table.
pub trait Entity: Auditable + Clone + Send + Sync + 'static {
    /// Backing table name.
    const TABLE: &'static str;
    /// Domain columns, excluding `id` and audit columns.
    const COLUMNS: &'static [&'static str];
    /// Relation names accepted by `Query::include`.
    const RELATIONS: &'static [&'static str] = &[];

    /// Domain column values in `COLUMNS` order.
    fn values(&self) -> Vec<Value>;

    /// Builds the domain part of an entity from a selected row.
    ///
    /// `id` and audit metadata are filled in by the caller afterwards.
    fn from_row(row: &Row<'_>) -> RepoResult<Self>;

    /// Rejects invalid state before a write is staged.
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }

    /// Attaches the named relation to every entity in `entities`.
    ///
    /// Only called with names listed in `RELATIONS`.
    fn load_relation(
        conn: &Connection,
        relation: &str,
        entities: &mut [Self],
    ) -> RepoResult<()> {
        let _ = (conn, entities);
        Err(RepoError::UnknownRelation {
            table: Self::TABLE,
            relation: relation.to_string(),
        })
    }
}
