//! Staged changes and the atomic flush that applies them.
//!
//! # Invariants
//! - Changes are applied in staging order inside a single transaction.
//! - An update or delete that matches no row aborts and rolls back the flush.
//! - Cancellation observed before commit rolls back the flush.

use crate::model::audit::{EntityId, AUDIT_COLUMNS};
use crate::model::entity::Entity;
use crate::repo::error::{RepoError, RepoResult};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};
use tokio_util::sync::CancellationToken;

/// Lifecycle state of a staged change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeState {
    Added,
    Modified,
    Deleted,
}

/// Public view of one staged change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedChange {
    pub table: &'static str,
    /// `None` for inserts whose id the store will assign.
    pub id: Option<EntityId>,
    pub state: ChangeState,
}

/// Id assigned (or confirmed) for one inserted row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InsertedKey {
    pub table: &'static str,
    pub id: EntityId,
}

/// Outcome of a successful flush.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SaveReport {
    pub affected_rows: usize,
    /// Inserted keys in staging order.
    pub inserted: Vec<InsertedKey>,
}

impl SaveReport {
    pub fn has_changes(&self) -> bool {
        self.affected_rows > 0
    }

    /// Ids inserted into `table`, in staging order.
    pub fn inserted_ids(&self, table: &str) -> Vec<EntityId> {
        self.inserted
            .iter()
            .filter(|key| key.table == table)
            .map(|key| key.id)
            .collect()
    }
}

#[derive(Debug, Clone)]
pub(crate) struct PendingChange {
    pub seq: u64,
    pub table: &'static str,
    pub kind: ChangeKind,
}

#[derive(Debug, Clone)]
pub(crate) enum ChangeKind {
    Insert {
        id: Option<EntityId>,
        columns: Vec<&'static str>,
        values: Vec<Value>,
    },
    Update {
        id: EntityId,
        columns: Vec<&'static str>,
        values: Vec<Value>,
    },
    Delete {
        id: EntityId,
    },
}

impl ChangeKind {
    pub fn insert<T: Entity>(entity: &T) -> Self {
        let (columns, values) = row_image(entity);
        Self::Insert {
            id: entity.has_id().then_some(entity.id()),
            columns,
            values,
        }
    }

    pub fn update<T: Entity>(entity: &T) -> Self {
        let (columns, values) = row_image(entity);
        Self::Update {
            id: entity.id(),
            columns,
            values,
        }
    }
}

impl PendingChange {
    pub fn describe(&self) -> StagedChange {
        let (id, state) = match &self.kind {
            ChangeKind::Insert { id, .. } => (*id, ChangeState::Added),
            ChangeKind::Update { id, .. } => (Some(*id), ChangeState::Modified),
            ChangeKind::Delete { id } => (Some(*id), ChangeState::Deleted),
        };
        StagedChange {
            table: self.table,
            id,
            state,
        }
    }
}

/// Every column except `id`, audit columns first.
fn row_image<T: Entity>(entity: &T) -> (Vec<&'static str>, Vec<Value>) {
    let columns = AUDIT_COLUMNS
        .iter()
        .chain(T::COLUMNS.iter())
        .copied()
        .collect();
    let mut values = entity.audit().to_values();
    values.extend(entity.values());
    (columns, values)
}

pub(crate) fn flush(
    conn: &mut Connection,
    changes: &[PendingChange],
    cancel: &CancellationToken,
) -> RepoResult<SaveReport> {
    let tx = conn.transaction()?;
    let mut report = SaveReport::default();

    for change in changes {
        if cancel.is_cancelled() {
            return Err(RepoError::Cancelled);
        }

        match &change.kind {
            ChangeKind::Insert {
                id,
                columns,
                values,
            } => {
                let mut names: Vec<&str> = Vec::with_capacity(columns.len() + 1);
                let mut binds: Vec<Value> = Vec::with_capacity(values.len() + 1);
                if let Some(id) = id {
                    names.push("id");
                    binds.push(Value::Integer(*id));
                }
                names.extend(columns.iter().copied());
                binds.extend(values.iter().cloned());

                let placeholders = vec!["?"; names.len()].join(", ");
                let sql = format!(
                    "INSERT INTO {} ({}) VALUES ({});",
                    change.table,
                    names.join(", "),
                    placeholders
                );
                report.affected_rows += tx.execute(&sql, params_from_iter(binds))?;
                report.inserted.push(InsertedKey {
                    table: change.table,
                    id: tx.last_insert_rowid(),
                });
            }
            ChangeKind::Update {
                id,
                columns,
                values,
            } => {
                let assignments = columns
                    .iter()
                    .map(|column| format!("{column} = ?"))
                    .collect::<Vec<_>>()
                    .join(", ");
                let sql = format!(
                    "UPDATE {} SET {} WHERE id = ?;",
                    change.table, assignments
                );
                let mut binds = values.clone();
                binds.push(Value::Integer(*id));

                let changed = tx.execute(&sql, params_from_iter(binds))?;
                if changed == 0 {
                    return Err(RepoError::Concurrency {
                        table: change.table,
                        id: *id,
                    });
                }
                report.affected_rows += changed;
            }
            ChangeKind::Delete { id } => {
                let sql = format!("DELETE FROM {} WHERE id = ?1;", change.table);
                let changed = tx.execute(&sql, [*id])?;
                if changed == 0 {
                    return Err(RepoError::Concurrency {
                        table: change.table,
                        id: *id,
                    });
                }
                report.affected_rows += changed;
            }
        }
    }

    if cancel.is_cancelled() {
        return Err(RepoError::Cancelled);
    }
    tx.commit()?;
    Ok(report)
}
