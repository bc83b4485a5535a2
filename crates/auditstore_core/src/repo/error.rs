//! Repository error taxonomy.
//!
//! Store failures are carried unchanged inside `Db`; every other variant is
//! raised by the repository/context layer itself.

use crate::db::DbError;
use crate::model::audit::EntityId;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type RepoResult<T> = Result<T, RepoError>;

/// Error for repository, context and query operations.
#[derive(Debug)]
pub enum RepoError {
    /// The context was closed before or during construction/use.
    ContextUnavailable,
    /// The entity table is not present in the opened schema.
    MissingTable(&'static str),
    /// The entity mapping uses a name that is not a plain SQL identifier.
    InvalidMapping(String),
    UnknownColumn {
        table: &'static str,
        column: String,
    },
    UnknownRelation {
        table: &'static str,
        relation: String,
    },
    /// A composed query cannot be executed as written.
    InvalidQuery(String),
    /// The entity rejected its own state before a write was staged.
    Validation(String),
    /// A staged update/delete no longer matched a row when flushed.
    Concurrency {
        table: &'static str,
        id: EntityId,
    },
    Cancelled,
    Db(DbError),
    InvalidData(String),
    /// The blocking task running the store call panicked or was aborted.
    Task(String),
    Poisoned,
}

impl RepoError {
    /// Returns whether this error is the cancellation signal.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ContextUnavailable => write!(f, "persistence context is closed"),
            Self::MissingTable(table) => write!(f, "table `{table}` does not exist"),
            Self::InvalidMapping(message) => write!(f, "invalid entity mapping: {message}"),
            Self::UnknownColumn { table, column } => {
                write!(f, "unknown column `{column}` on `{table}`")
            }
            Self::UnknownRelation { table, relation } => {
                write!(f, "unknown relation `{relation}` on `{table}`")
            }
            Self::InvalidQuery(message) => write!(f, "invalid query: {message}"),
            Self::Validation(message) => write!(f, "entity validation failed: {message}"),
            Self::Concurrency { table, id } => write!(
                f,
                "staged change for `{table}` id {id} matched no row when saved"
            ),
            Self::Cancelled => write!(f, "operation cancelled"),
            Self::Db(err) => write!(f, "{err}"),
            Self::InvalidData(message) => write!(f, "invalid persisted data: {message}"),
            Self::Task(message) => write!(f, "store task failed: {message}"),
            Self::Poisoned => write!(f, "persistence context lock poisoned"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}
