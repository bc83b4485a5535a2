//! Query composition and materialization.
//!
//! # Responsibility
//! - Describe filters and eager loads as values, without touching the store.
//! - Materialize a composed query only on an explicit terminal call.
//!
//! # Invariants
//! - Every column named by a filter or ordering is checked against the mapping.
//! - Filter values are always bound as parameters, never interpolated.

pub mod builder;
pub mod filter;
