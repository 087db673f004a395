//! The push cycle: replaying queued operations against the service.
//!
//! # Algorithm
//!
//! 1. Check the cancellation flag
//! 2. Take the oldest operation after the cycle cursor
//! 3. Mark it attempted (durably), then send it
//! 4. Settle the outcome: reconcile and complete, resolve a conflict,
//!    requeue and stop, or drop a permanently rejected operation
//!
//! Operations are sent strictly one at a time in queue order. Per-operation
//! failures are collected in the [`PushResult`] and recorded in the errors
//! table (see [`crate::sync_error`]); only local store errors abort the cycle
//! with `Err`.

use crate::conflict::{Conflict, ConflictResolver, Resolution};
use crate::operation::{OperationKind, OperationState, TableOperation};
use crate::processor::LocalOperationProcessor;
use crate::queue::OperationQueue;
use crate::remote::{RemoteError, RemoteTableClient};
use crate::sync_error;
use crate::{error::Result, item, LocalStore, TableName};
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// How a push cycle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum PushStatus {
    /// Every eligible operation was processed
    #[default]
    Complete,
    /// The cancellation flag was set
    CancelledByCaller,
    /// A network or server failure stopped the cycle
    AbortedByTransientError,
    /// The service refused the credentials
    AbortedByAuthentication,
}

/// Why a single operation did not complete.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum OperationError {
    #[error("unresolved conflict: {0}")]
    Conflict(RemoteError),

    #[error("transient failure: {0}")]
    Transient(RemoteError),

    #[error("not authorized: {0}")]
    Unauthorized(RemoteError),

    #[error("rejected by the service: {0}")]
    Permanent(RemoteError),

    #[error("discarded by conflict resolution")]
    Discarded,

    #[error("no item to push")]
    MissingItem,
}

impl OperationError {
    /// Whether the operation is still queued.
    pub fn is_retained(&self) -> bool {
        matches!(
            self,
            OperationError::Conflict(_) | OperationError::Transient(_) | OperationError::Unauthorized(_)
        )
    }
}

/// An operation that did not complete, and why.
#[derive(Debug, Clone, PartialEq)]
pub struct FailedOperation {
    pub operation: TableOperation,
    pub error: OperationError,
}

/// Outcome of one push cycle.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PushResult {
    pub status: PushStatus,
    /// Operations confirmed by the service, in push order
    pub completed: Vec<TableOperation>,
    pub failed: Vec<FailedOperation>,
}

impl PushResult {
    pub fn is_complete(&self) -> bool {
        self.status == PushStatus::Complete
    }

    /// Check if every operation went through.
    pub fn is_success(&self) -> bool {
        self.is_complete() && self.failed.is_empty()
    }
}

/// Cooperative cancellation for push cycles.
///
/// Checked before each operation; the remote call in flight always runs to
/// completion.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

enum Outcome {
    Completed(TableOperation),
    Failed(FailedOperation),
    Abort(PushStatus, FailedOperation),
}

/// One push cycle over a queue.
pub struct Pusher<'a, S: LocalStore, R: RemoteTableClient> {
    queue: &'a OperationQueue<S>,
    processor: &'a LocalOperationProcessor<S>,
    store: &'a S,
    remote: &'a R,
    resolver: Option<Arc<dyn ConflictResolver>>,
    max_conflict_retries: u32,
}

impl<'a, S: LocalStore, R: RemoteTableClient> Pusher<'a, S, R> {
    pub fn new(
        queue: &'a OperationQueue<S>,
        processor: &'a LocalOperationProcessor<S>,
        store: &'a S,
        remote: &'a R,
    ) -> Self {
        Self {
            queue,
            processor,
            store,
            remote,
            resolver: None,
            max_conflict_retries: crate::config::DEFAULT_MAX_CONFLICT_RETRIES,
        }
    }

    pub fn with_resolver(mut self, resolver: Option<Arc<dyn ConflictResolver>>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_max_conflict_retries(mut self, retries: u32) -> Self {
        self.max_conflict_retries = retries;
        self
    }

    /// Drain the queue once, optionally limited to some tables.
    pub async fn run(&self, tables: Option<&[TableName]>, cancel: &CancelFlag) -> Result<PushResult> {
        let mut result = PushResult::default();
        let mut cursor = 0;

        loop {
            if cancel.is_cancelled() {
                tracing::info!("push cancelled by caller");
                result.status = PushStatus::CancelledByCaller;
                break;
            }

            let Some(next) = self.queue.peek_after(cursor, tables) else {
                break;
            };
            cursor = next.sequence;

            // Attempted before this cycle: recovered after a crash mid-send
            let replay = next.state == OperationState::Attempted;
            let op = self.queue.mark_attempted(&next.id)?;
            match self.push_operation(op, replay).await? {
                Outcome::Completed(op) => {
                    sync_error::clear_error(self.store, &op.table_name, &op.item_id)?;
                    result.completed.push(op);
                }
                Outcome::Failed(failed) => {
                    sync_error::record_error(self.store, &failed)?;
                    result.failed.push(failed);
                }
                Outcome::Abort(status, failed) => {
                    sync_error::record_error(self.store, &failed)?;
                    result.failed.push(failed);
                    result.status = status;
                    break;
                }
            }
        }

        tracing::info!(
            status = ?result.status,
            completed = result.completed.len(),
            failed = result.failed.len(),
            "push cycle finished"
        );
        Ok(result)
    }

    async fn push_operation(&self, mut op: TableOperation, replay: bool) -> Result<Outcome> {
        let mut conflicts = 0;
        // An insert the service already has goes out as an update on retry
        let mut kind = op.kind;

        loop {
            let item = match self.item_to_send(&op)? {
                Some(item) => Some(item),
                None if op.kind == OperationKind::Delete => None,
                None => {
                    tracing::warn!(op_id = %op.id, key = %op.table_item_id(), "no item to push; dropping");
                    let op = self.queue.discard(&op.id)?;
                    return Ok(failed(op, OperationError::MissingItem));
                }
            };

            tracing::debug!(op_id = %op.id, kind = %kind, key = %op.table_item_id(), "sending operation");
            let err = match self.send(kind, &op, item.clone()).await {
                Ok(server_item) => {
                    self.processor.reconcile(&op, server_item)?;
                    let op = self.queue.complete(&op.id)?;
                    return Ok(Outcome::Completed(op));
                }
                Err(err) => err,
            };

            if err.is_conflict() {
                if replay && already_applied(&op, item.as_ref(), err.server_item.as_ref()) {
                    tracing::info!(op_id = %op.id, key = %op.table_item_id(), "operation reached the service before restart");
                    self.processor.reconcile(&op, err.server_item)?;
                    let op = self.queue.complete(&op.id)?;
                    return Ok(Outcome::Completed(op));
                }

                let resolver = match &self.resolver {
                    Some(resolver) if conflicts < self.max_conflict_retries => resolver,
                    _ => {
                        tracing::warn!(op_id = %op.id, error = %err, "conflict left unresolved");
                        let op = self.queue.requeue(&op.id)?;
                        return Ok(failed(op, OperationError::Conflict(err)));
                    }
                };

                let conflict = Conflict {
                    operation: op.clone(),
                    local_item: item.clone(),
                    server_item: err.server_item.clone(),
                };
                match resolver.resolve(&conflict) {
                    Resolution::UseRemote => {
                        tracing::debug!(op_id = %op.id, "conflict resolved with the service's row");
                        self.processor.accept_remote(&op, err.server_item.as_ref())?;
                        let op = self.queue.complete(&op.id)?;
                        return Ok(Outcome::Completed(op));
                    }
                    Resolution::UseLocal => {
                        conflicts += 1;
                        tracing::debug!(op_id = %op.id, attempt = conflicts, "conflict resolved with the local row; retrying");
                        let local = item.unwrap_or_else(|| item::tombstone(&op.item_id, None));
                        op = self
                            .queue
                            .update_item(&op.id, adopt_version(local, err.server_item.as_ref()))?;
                        if kind == OperationKind::Insert {
                            kind = OperationKind::Update;
                        }
                        continue;
                    }
                    Resolution::Cancel => {
                        let op = self.queue.discard(&op.id)?;
                        return Ok(failed(op, OperationError::Discarded));
                    }
                }
            }

            if err.is_unauthorized() {
                tracing::warn!(op_id = %op.id, error = %err, "push not authorized; stopping");
                let op = self.queue.requeue(&op.id)?;
                return Ok(abort(
                    PushStatus::AbortedByAuthentication,
                    op,
                    OperationError::Unauthorized(err),
                ));
            }

            if err.is_transient() {
                tracing::warn!(op_id = %op.id, error = %err, "transient push failure; stopping");
                let op = self.queue.requeue(&op.id)?;
                return Ok(abort(
                    PushStatus::AbortedByTransientError,
                    op,
                    OperationError::Transient(err),
                ));
            }

            if op.kind == OperationKind::Delete && err.status == Some(404) {
                // Already gone on the service
                self.processor.reconcile(&op, None)?;
                let op = self.queue.complete(&op.id)?;
                return Ok(Outcome::Completed(op));
            }

            tracing::warn!(op_id = %op.id, error = %err, "operation rejected; dropping");
            let op = self.queue.discard(&op.id)?;
            return Ok(failed(op, OperationError::Permanent(err)));
        }
    }

    fn item_to_send(&self, op: &TableOperation) -> Result<Option<Value>> {
        match &op.item {
            Some(item) => Ok(Some(item.clone())),
            None if op.kind == OperationKind::Delete => Ok(None),
            None => self.store.lookup(&op.table_name, &op.item_id),
        }
    }

    async fn send(
        &self,
        kind: OperationKind,
        op: &TableOperation,
        item: Option<Value>,
    ) -> std::result::Result<Option<Value>, RemoteError> {
        match (kind, item) {
            (OperationKind::Insert, Some(item)) => self
                .remote
                .insert(&op.table_name, item::without_system_properties(&item))
                .await
                .map(Some),
            (OperationKind::Update, Some(item)) => {
                self.remote.update(&op.table_name, item).await.map(Some)
            }
            (OperationKind::Delete, item) => {
                let version = item.as_ref().and_then(item::version).map(str::to_string);
                self.remote
                    .delete(&op.table_name, &op.item_id, version)
                    .await
                    .map(|_| None)
            }
            (_, None) => Ok(None),
        }
    }
}

/// The local item carrying the service's version, so a re-send passes the
/// service's precondition check.
fn adopt_version(mut local: Value, server_item: Option<&Value>) -> Value {
    if let Some(version) = server_item.and_then(item::version) {
        item::set_str(&mut local, item::VERSION, version);
    }
    local
}

/// Whether the service's row already holds what was sent: the id matches and
/// every user column agrees.
fn already_applied(op: &TableOperation, sent: Option<&Value>, server_item: Option<&Value>) -> bool {
    let (Some(sent), Some(server_item)) = (sent, server_item) else {
        return false;
    };
    if op.kind == OperationKind::Delete
        || item::is_deleted(server_item)
        || item::id(server_item) != Some(op.item_id.as_str())
    {
        return false;
    }

    match item::without_system_properties(sent).as_object() {
        Some(columns) => columns
            .iter()
            .all(|(column, value)| server_item.get(column) == Some(value)),
        None => false,
    }
}

fn failed(operation: TableOperation, error: OperationError) -> Outcome {
    Outcome::Failed(FailedOperation { operation, error })
}

fn abort(status: PushStatus, operation: TableOperation, error: OperationError) -> Outcome {
    Outcome::Abort(status, FailedOperation { operation, error })
}
