//! Persistence context configuration.

use serde::Deserialize;

const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// Connection and audit settings applied when a context is opened.
///
/// Deserializable so applications can embed it in their own config files;
/// missing fields fall back to `Default`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ContextOptions {
    /// How long SQLite waits on a locked database before failing.
    pub busy_timeout_ms: u64,
    /// Enables `PRAGMA foreign_keys`.
    pub foreign_keys: bool,
    /// Written to `created_by` / `modified_by` when changes are staged.
    pub actor: Option<String>,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            foreign_keys: true,
            actor: None,
        }
    }
}

impl ContextOptions {
    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }
}
