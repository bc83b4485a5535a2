//! Persistence context: one SQLite connection plus one unit-of-work.
//!
//! # Responsibility
//! - Own the connection shared by every repository built over the context.
//! - Stage add/update/delete changes until `save_changes` flushes them.
//! - Run store calls on the blocking pool with cancellation support.
//!
//! # Invariants
//! - Nothing reaches durable storage except through `save_changes`.
//! - A failed or cancelled flush keeps staged changes for inspection/discard.
//! - Once closed, a context rejects every operation.

pub mod options;
pub mod set;
pub mod unit_of_work;

use crate::db::migrations::Migration;
use crate::db::{open_connection, open_connection_in_memory};
use crate::model::entity::Entity;
use crate::repo::error::{RepoError, RepoResult};
use log::{debug, info, warn};
use options::ContextOptions;
use rusqlite::Connection;
use set::EntitySet;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use unit_of_work::{flush, ChangeKind, PendingChange, SaveReport, StagedChange};
use uuid::Uuid;

/// SQLite VM instructions between cancellation checks of a running statement.
const PROGRESS_HANDLER_OPS: i32 = 1_000;

/// Cloneable handle to a shared persistence context.
#[derive(Clone)]
pub struct DbContext {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    id: Uuid,
    options: ContextOptions,
    conn: Mutex<Connection>,
    pending: Mutex<Vec<PendingChange>>,
    next_seq: AtomicU64,
    closed: AtomicBool,
}

impl DbContext {
    /// Opens (or creates) a database file and applies `migrations`.
    pub fn open(
        path: impl AsRef<Path>,
        migrations: &[Migration],
        options: ContextOptions,
    ) -> RepoResult<Self> {
        let conn = open_connection(path, migrations, &options)?;
        Ok(Self::from_connection(conn, options))
    }

    /// Opens a private in-memory database and applies `migrations`.
    pub fn open_in_memory(migrations: &[Migration], options: ContextOptions) -> RepoResult<Self> {
        let conn = open_connection_in_memory(migrations, &options)?;
        Ok(Self::from_connection(conn, options))
    }

    fn from_connection(conn: Connection, options: ContextOptions) -> Self {
        let id = Uuid::new_v4();
        info!("event=context_open module=context status=ok ctx={id}");
        Self {
            inner: Arc::new(ContextInner {
                id,
                options,
                conn: Mutex::new(conn),
                pending: Mutex::new(Vec::new()),
                next_seq: AtomicU64::new(0),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Stable identifier used to correlate log events of this context.
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn options(&self) -> &ContextOptions {
        &self.inner.options
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Marks the context unusable and drops staged changes.
    ///
    /// Handles held by repositories observe `ContextUnavailable` afterwards.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let dropped = match self.inner.pending.lock() {
            Ok(mut pending) => std::mem::take(&mut *pending).len(),
            Err(_) => 0,
        };
        info!(
            "event=context_close module=context status=ok ctx={} dropped_changes={}",
            self.inner.id, dropped
        );
    }

    /// Derives the typed entity set for `T`.
    ///
    /// # Errors
    /// - `ContextUnavailable` when the context is closed.
    /// - `InvalidMapping` when `T` names are not plain identifiers.
    /// - `MissingTable` when `T::TABLE` is absent from the schema.
    pub fn set<T: Entity>(&self) -> RepoResult<EntitySet<T>> {
        EntitySet::derive(self.clone())
    }

    /// Returns whether any change is staged.
    pub fn has_changes(&self) -> RepoResult<bool> {
        Ok(!self.lock_pending()?.is_empty())
    }

    pub fn pending_count(&self) -> RepoResult<usize> {
        Ok(self.lock_pending()?.len())
    }

    /// Staged changes in the order they will be flushed.
    pub fn pending_changes(&self) -> RepoResult<Vec<StagedChange>> {
        Ok(self
            .lock_pending()?
            .iter()
            .map(PendingChange::describe)
            .collect())
    }

    /// Drops every staged change without touching the store.
    pub fn discard_changes(&self) -> RepoResult<usize> {
        let dropped = std::mem::take(&mut *self.lock_pending()?).len();
        debug!(
            "event=context_discard module=context status=ok ctx={} dropped_changes={}",
            self.inner.id, dropped
        );
        Ok(dropped)
    }

    /// Flushes every staged change in one transaction.
    ///
    /// Changes staged while the flush runs stay pending for the next call.
    /// Saves on one context must not overlap: two concurrent calls snapshot
    /// the same pending changes, and the second flush then fails with
    /// `Concurrency` on rows the first already removed.
    pub async fn save_changes(&self, cancel: &CancellationToken) -> RepoResult<SaveReport> {
        self.ensure_open()?;
        if cancel.is_cancelled() {
            return Err(RepoError::Cancelled);
        }

        let snapshot = self.lock_pending()?.clone();
        let Some(last_seq) = snapshot.last().map(|change| change.seq) else {
            debug!(
                "event=context_save module=context status=ok ctx={} staged=0 affected_rows=0",
                self.inner.id
            );
            return Ok(SaveReport::default());
        };

        let started_at = Instant::now();
        let staged = snapshot.len();
        let result = self
            .run(cancel, move |conn, cancel| flush(conn, &snapshot, cancel))
            .await;

        match result {
            Ok(report) => {
                self.lock_pending()?.retain(|change| change.seq > last_seq);
                info!(
                    "event=context_save module=context status=ok ctx={} staged={} affected_rows={} duration_ms={}",
                    self.inner.id,
                    staged,
                    report.affected_rows,
                    started_at.elapsed().as_millis()
                );
                Ok(report)
            }
            Err(err) => {
                warn!(
                    "event=context_save module=context status=error ctx={} staged={} duration_ms={} error={}",
                    self.inner.id,
                    staged,
                    started_at.elapsed().as_millis(),
                    err
                );
                Err(err)
            }
        }
    }

    /// Appends a change to the unit-of-work.
    ///
    /// A delete already pending for the same `(table, id)` is not staged
    /// again; returns `false` in that case.
    pub(crate) fn stage(&self, table: &'static str, kind: ChangeKind) -> RepoResult<bool> {
        self.ensure_open()?;
        let mut pending = self.lock_pending()?;
        if let ChangeKind::Delete { id } = kind {
            let already_deleted = pending.iter().any(|change| {
                change.table == table
                    && matches!(change.kind, ChangeKind::Delete { id: staged } if staged == id)
            });
            if already_deleted {
                return Ok(false);
            }
        }
        let seq = self.inner.next_seq.fetch_add(1, Ordering::Relaxed);
        pending.push(PendingChange { seq, table, kind });
        Ok(true)
    }

    /// Runs `op` against the connection on the blocking pool.
    ///
    /// The token is checked before dispatch, after the connection lock is
    /// taken, and every `PROGRESS_HANDLER_OPS` VM steps of a running statement.
    pub(crate) async fn run<F, R>(&self, cancel: &CancellationToken, op: F) -> RepoResult<R>
    where
        F: FnOnce(&mut Connection, &CancellationToken) -> RepoResult<R> + Send + 'static,
        R: Send + 'static,
    {
        self.ensure_open()?;
        if cancel.is_cancelled() {
            return Err(RepoError::Cancelled);
        }

        let inner = Arc::clone(&self.inner);
        let token = cancel.clone();
        let task = tokio::task::spawn_blocking(move || -> RepoResult<R> {
            let mut conn = inner.conn.lock().map_err(|_| RepoError::Poisoned)?;
            if inner.closed.load(Ordering::Acquire) {
                return Err(RepoError::ContextUnavailable);
            }
            if token.is_cancelled() {
                return Err(RepoError::Cancelled);
            }

            let watcher = AssertUnwindSafe(token.clone());
            conn.progress_handler(
                PROGRESS_HANDLER_OPS,
                Some(move || {
                    let watcher = &watcher;
                    watcher.0.is_cancelled()
                }),
            );
            let result = op(&mut *conn, &token);
            conn.progress_handler(0, None::<fn() -> bool>);

            interrupted_as_cancelled(result)
        });

        task.await
            .map_err(|err| RepoError::Task(err.to_string()))?
    }

    /// Runs a short read on the caller's thread.
    ///
    /// Only used where no async boundary exists (set derivation).
    pub(crate) fn with_connection<R>(
        &self,
        op: impl FnOnce(&Connection) -> RepoResult<R>,
    ) -> RepoResult<R> {
        self.ensure_open()?;
        let conn = self.inner.conn.lock().map_err(|_| RepoError::Poisoned)?;
        op(&conn)
    }

    fn ensure_open(&self) -> RepoResult<()> {
        if self.is_closed() {
            return Err(RepoError::ContextUnavailable);
        }
        Ok(())
    }

    fn lock_pending(&self) -> RepoResult<MutexGuard<'_, Vec<PendingChange>>> {
        self.inner.pending.lock().map_err(|_| RepoError::Poisoned)
    }
}

/// Maps SQLite interruptions raised by the progress handler to `Cancelled`.
///
/// Every other store error is returned unchanged.
fn interrupted_as_cancelled<R>(result: RepoResult<R>) -> RepoResult<R> {
    match result {
        Err(RepoError::Db(err))
            if err.sqlite_code() == Some(rusqlite::ErrorCode::OperationInterrupted) =>
        {
            Err(RepoError::Cancelled)
        }
        other => other,
    }
}
