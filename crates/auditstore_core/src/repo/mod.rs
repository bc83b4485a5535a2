//! Repository layer over the persistence context.
//!
//! # Responsibility
//! - Define the generic data access contract for auditable entities.
//! - Keep SQLite details behind the context and query modules.
//!
//! # Invariants
//! - Repository writes enforce `Entity::validate()` before staging.
//! - Store errors surface unchanged inside `RepoError::Db`.

pub mod error;
pub mod repository;
