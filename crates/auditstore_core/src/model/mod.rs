//! Entity contracts shared by every persisted record.
//!
//! # Responsibility
//! - Define the audit metadata carried by every row.
//! - Define the capability set a type needs to be stored by a repository.
//!
//! # Invariants
//! - Every entity is identified by a single `EntityId` column named `id`.
//! - Audit columns are owned by the persistence layer, not by entity mappings.

pub mod audit;
pub mod entity;
