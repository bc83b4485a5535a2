//! Audit metadata and the identity/audit capability set.
//!
//! # Responsibility
//! - Describe who created/modified a row and when.
//! - Provide stamping helpers used when changes are staged.
//!
//! # Invariants
//! - `created_at` is set once, when an insert is staged.
//! - `modified_at` is `None` until the first staged update.
//! - Timestamps are Unix epoch milliseconds.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Store-level identifier for every entity.
///
/// `0` means the store has not assigned an id yet.
pub type EntityId = i64;

/// Identifier value of an entity that was never persisted.
pub const UNASSIGNED_ID: EntityId = 0;

/// Audit columns present on every entity table, in select order.
pub const AUDIT_COLUMNS: &[&str] = &["created_at", "created_by", "modified_at", "modified_by"];

/// Creation/modification metadata carried by every entity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditMetadata {
    /// Unix epoch milliseconds of the staged insert.
    pub created_at: i64,
    /// Actor configured on the context that staged the insert.
    pub created_by: Option<String>,
    /// Unix epoch milliseconds of the latest staged update.
    pub modified_at: Option<i64>,
    /// Actor configured on the context that staged the latest update.
    pub modified_by: Option<String>,
}

impl AuditMetadata {
    /// Stamps creation fields and clears modification fields.
    pub fn stamp_created(&mut self, at: i64, actor: Option<&str>) {
        self.created_at = at;
        self.created_by = actor.map(str::to_owned);
        self.modified_at = None;
        self.modified_by = None;
    }

    /// Stamps modification fields, leaving creation fields untouched.
    pub fn stamp_modified(&mut self, at: i64, actor: Option<&str>) {
        self.modified_at = Some(at);
        self.modified_by = actor.map(str::to_owned);
    }

    pub(crate) fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            created_at: row.get("created_at")?,
            created_by: row.get("created_by")?,
            modified_at: row.get("modified_at")?,
            modified_by: row.get("modified_by")?,
        })
    }

    pub(crate) fn to_values(&self) -> Vec<rusqlite::types::Value> {
        vec![
            self.created_at.into(),
            self.created_by.clone().into(),
            self.modified_at.into(),
            self.modified_by.clone().into(),
        ]
    }
}

/// Identity and audit accessors required from every stored type.
pub trait Auditable {
    fn id(&self) -> EntityId;
    fn set_id(&mut self, id: EntityId);
    fn audit(&self) -> &AuditMetadata;
    fn audit_mut(&mut self) -> &mut AuditMetadata;

    /// Returns whether the store already assigned an id.
    fn has_id(&self) -> bool {
        self.id() != UNASSIGNED_ID
    }
}

/// Current time as Unix epoch milliseconds.
pub fn now_epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| {
            i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX)
        })
}
