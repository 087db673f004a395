//! The durable operation queue.
//!
//! The queue holds at most one operation per table-item-id. A new local
//! mutation against a row that already has a queued operation is collapsed
//! into it:
//!
//! | existing | new    | result                                   |
//! |----------|--------|------------------------------------------|
//! | Insert   | Update | Insert, item replaced in place           |
//! | Insert   | Delete | existing removed, nothing queued         |
//! | Update   | Update | Update, item replaced in place           |
//! | Update   | Delete | Delete takes the Update's queue slot     |
//! | Delete   | Insert | Insert appended, Delete dropped          |
//! | Delete   | Delete | existing kept                            |
//!
//! Every other pairing is rejected. Nothing collapses into an operation that
//! has been attempted; the caller gets [`Error::OperationInFlight`].
//!
//! All state lives in the local store's `__operations` table. Each change is
//! written there before the in-memory index is updated, so a failed write
//! leaves the queue exactly as it was.

use crate::clock::{OperationClock, Stamp};
use crate::operation::{table_item_id, OperationKind, OperationState, TableOperation};
use crate::{
    error::Result, item, ColumnType, Error, LocalStore, OperationId, Query, TableName,
    TableSchema,
};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::Arc;

/// Local table holding queued operations.
pub const OPERATIONS_TABLE: &str = "__operations";

/// Schema of the operations table.
pub fn operations_table_schema() -> TableSchema {
    TableSchema::new(OPERATIONS_TABLE)
        .with_column("tableName", ColumnType::String)
        .with_column("itemId", ColumnType::String)
        .with_column("kind", ColumnType::String)
        .with_column("createdAt", ColumnType::Date)
        .with_column("state", ColumnType::String)
        .with_column("item", ColumnType::Object)
        .with_column("sequence", ColumnType::Integer)
        .with_column("version", ColumnType::Integer)
}

/// In-memory index over the persisted operations.
#[derive(Debug, Default)]
struct QueueState {
    /// Operations by sequence (FIFO order)
    ops: BTreeMap<u64, TableOperation>,
    /// table-item-id -> sequence
    by_key: HashMap<String, u64>,
    /// operation id -> sequence
    by_id: HashMap<OperationId, u64>,
    clock: OperationClock,
}

impl QueueState {
    fn insert(&mut self, op: TableOperation) {
        self.by_key.insert(op.table_item_id(), op.sequence);
        self.by_id.insert(op.id.clone(), op.sequence);
        self.ops.insert(op.sequence, op);
    }

    fn remove(&mut self, sequence: u64) -> Option<TableOperation> {
        let op = self.ops.remove(&sequence)?;
        self.by_key.remove(&op.table_item_id());
        self.by_id.remove(&op.id);
        Some(op)
    }

    fn by_key(&self, key: &str) -> Option<&TableOperation> {
        self.by_key.get(key).and_then(|seq| self.ops.get(seq))
    }

    fn by_id(&self, id: &str) -> Option<&TableOperation> {
        self.by_id.get(id).and_then(|seq| self.ops.get(seq))
    }
}

/// What a new mutation does to the queue.
#[derive(Debug)]
enum Collapse {
    /// No existing operation: queue the new one
    Append(TableOperation),
    /// Same operation id, new item and version
    InPlace(TableOperation),
    /// Existing operation dropped, new one appended
    Replace {
        old: TableOperation,
        new: TableOperation,
    },
    /// Existing operation dropped, nothing queued
    Remove(TableOperation),
    /// Nothing changes
    Keep(TableOperation),
}

impl Collapse {
    fn result(&self) -> Option<&TableOperation> {
        match self {
            Collapse::Append(op) | Collapse::InPlace(op) | Collapse::Keep(op) => Some(op),
            Collapse::Replace { new, .. } => Some(new),
            Collapse::Remove(_) => None,
        }
    }
}

/// Ordered, durable collection of pending operations.
pub struct OperationQueue<S: LocalStore> {
    store: Arc<S>,
    state: Mutex<QueueState>,
}

impl<S: LocalStore> OperationQueue<S> {
    /// Create an empty queue over a store. Call [`Self::initialize`] before use.
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            state: Mutex::new(QueueState::default()),
        }
    }

    /// Define the operations table and load any persisted operations.
    pub fn initialize(&self) -> Result<usize> {
        self.store.define_table(operations_table_schema())?;
        self.load()
    }

    /// Rebuild the in-memory index from the operations table.
    ///
    /// Attempted operations stay attempted: their outcome is unknown, so they
    /// keep blocking collapses until the next push retries them.
    pub fn load(&self) -> Result<usize> {
        let records = self.store.query(&Query::new(OPERATIONS_TABLE))?;

        let mut ops = Vec::with_capacity(records.len());
        for record in records {
            let op = TableOperation::from_record(record)
                .map_err(|e| Error::Storage(format!("corrupt operation record: {}", e)))?;
            ops.push(op);
        }
        ops.sort();

        let mut state = QueueState::default();
        let mut superseded = Vec::new();
        for op in ops {
            state.clock.merge(op.sequence, op.created_at);
            // A crash between writing a replacement and deleting the operation
            // it replaced leaves two rows for one key.
            if let Some(existing) = state.by_key(&op.table_item_id()).cloned() {
                if !supersedes(&op, &existing) {
                    superseded.push(op);
                    continue;
                }
                state.remove(existing.sequence);
                superseded.push(existing);
            }
            if op.is_attempted() {
                tracing::warn!(
                    op_id = %op.id,
                    table = %op.table_name,
                    item_id = %op.item_id,
                    "operation was in flight at shutdown; it will be retried"
                );
            }
            state.insert(op);
        }

        for op in superseded {
            tracing::warn!(op_id = %op.id, "dropping superseded operation");
            self.store.delete(OPERATIONS_TABLE, &op.id)?;
        }

        let count = state.ops.len();
        *self.state.lock() = state;
        tracing::debug!(count, "operation queue loaded");
        Ok(count)
    }

    /// Queue a local mutation, collapsing it into any existing operation for
    /// the same row. Returns the resulting queued operation, or `None` when the
    /// mutation cancelled out the existing one.
    pub fn enqueue(
        &self,
        kind: OperationKind,
        table: &str,
        item_id: &str,
        item: Option<Value>,
    ) -> Result<Option<TableOperation>> {
        self.enqueue_with(kind, table, item_id, item, |_| Ok(()))
    }

    /// Like [`Self::enqueue`], running `apply` inside the queue's critical
    /// section after the collapse has been decided and before it is written.
    ///
    /// If `apply` fails nothing is queued. `apply` must not call back into
    /// the queue.
    pub fn enqueue_with<F>(
        &self,
        kind: OperationKind,
        table: &str,
        item_id: &str,
        item: Option<Value>,
        apply: F,
    ) -> Result<Option<TableOperation>>
    where
        F: FnOnce(Option<&TableOperation>) -> Result<()>,
    {
        validate_mutation(kind, table, item_id, item.as_ref())?;

        let mut state = self.state.lock();
        let existing = state.by_key(&table_item_id(table, item_id)).cloned();

        let collapse = match existing {
            None => {
                let stamp = state.clock.tick();
                Collapse::Append(TableOperation::new(kind, table, item_id, item, stamp))
            }
            Some(existing) => {
                if existing.is_attempted() {
                    return Err(Error::OperationInFlight {
                        table: table.to_string(),
                        item_id: item_id.to_string(),
                    });
                }
                collapse(existing, kind, item, &mut state.clock)?
            }
        };

        apply(collapse.result())?;
        self.persist(&mut state, collapse)
    }

    fn persist(
        &self,
        state: &mut QueueState,
        collapse: Collapse,
    ) -> Result<Option<TableOperation>> {
        match collapse {
            Collapse::Append(op) => {
                self.write(&op)?;
                tracing::debug!(op_id = %op.id, kind = %op.kind, key = %op.table_item_id(), "operation queued");
                state.insert(op.clone());
                Ok(Some(op))
            }
            Collapse::InPlace(op) => {
                self.write(&op)?;
                tracing::debug!(op_id = %op.id, version = op.version, "operation collapsed in place");
                state.remove(op.sequence);
                state.insert(op.clone());
                Ok(Some(op))
            }
            Collapse::Replace { old, new } => {
                // New row first: a crash in between leaves a duplicate that
                // `load` resolves, never a lost mutation.
                self.write(&new)?;
                self.store.delete(OPERATIONS_TABLE, &old.id)?;
                tracing::debug!(old = %old.id, new = %new.id, kind = %new.kind, "operation replaced");
                state.remove(old.sequence);
                state.insert(new.clone());
                Ok(Some(new))
            }
            Collapse::Remove(old) => {
                self.store.delete(OPERATIONS_TABLE, &old.id)?;
                tracing::debug!(op_id = %old.id, "operation cancelled out");
                state.remove(old.sequence);
                Ok(None)
            }
            Collapse::Keep(op) => Ok(Some(op)),
        }
    }

    fn write(&self, op: &TableOperation) -> Result<()> {
        let record = op.to_record().map_err(Error::storage)?;
        self.store.upsert(OPERATIONS_TABLE, record, false)
    }

    /// The oldest queued operation.
    pub fn peek_next(&self) -> Option<TableOperation> {
        self.state.lock().ops.values().next().cloned()
    }

    /// The oldest operation queued after `after_sequence`, optionally limited
    /// to a set of tables.
    pub fn peek_after(
        &self,
        after_sequence: u64,
        tables: Option<&[TableName]>,
    ) -> Option<TableOperation> {
        let state = self.state.lock();
        state
            .ops
            .range((Bound::Excluded(after_sequence), Bound::Unbounded))
            .map(|(_, op)| op)
            .find(|op| tables.map_or(true, |t| t.iter().any(|name| *name == op.table_name)))
            .cloned()
    }

    /// Mark an operation as attempted and return its current contents.
    pub fn mark_attempted(&self, id: &str) -> Result<TableOperation> {
        self.set_state(id, OperationState::Attempted)
    }

    /// Return an operation to the pending state for a later retry.
    pub fn requeue(&self, id: &str) -> Result<TableOperation> {
        self.set_state(id, OperationState::Pending)
    }

    fn set_state(&self, id: &str, new_state: OperationState) -> Result<TableOperation> {
        let mut state = self.state.lock();
        let mut op = state
            .by_id(id)
            .cloned()
            .ok_or_else(|| Error::OperationNotFound(id.to_string()))?;

        if op.state != new_state {
            op.state = new_state;
            self.write(&op)?;
            state.remove(op.sequence);
            state.insert(op.clone());
        }
        Ok(op)
    }

    /// Replace the item an operation will push.
    pub fn update_item(&self, id: &str, item: Value) -> Result<TableOperation> {
        let mut state = self.state.lock();
        let mut op = state
            .by_id(id)
            .cloned()
            .ok_or_else(|| Error::OperationNotFound(id.to_string()))?;

        op.item = Some(item);
        op.version += 1;
        self.write(&op)?;
        state.remove(op.sequence);
        state.insert(op.clone());
        Ok(op)
    }

    /// Remove an operation whose remote call was confirmed.
    pub fn complete(&self, id: &str) -> Result<TableOperation> {
        let op = self.remove(id)?;
        tracing::debug!(op_id = %op.id, key = %op.table_item_id(), "operation completed");
        Ok(op)
    }

    /// Remove an operation that will never be pushed (terminal failure or
    /// cancelled by conflict resolution).
    pub fn discard(&self, id: &str) -> Result<TableOperation> {
        let op = self.remove(id)?;
        tracing::info!(op_id = %op.id, key = %op.table_item_id(), "operation discarded");
        Ok(op)
    }

    fn remove(&self, id: &str) -> Result<TableOperation> {
        let mut state = self.state.lock();
        let sequence = state
            .by_id(id)
            .map(|op| op.sequence)
            .ok_or_else(|| Error::OperationNotFound(id.to_string()))?;

        self.store.delete(OPERATIONS_TABLE, id)?;
        state
            .remove(sequence)
            .ok_or_else(|| Error::OperationNotFound(id.to_string()))
    }

    /// Remove every operation for a table. Returns how many were removed.
    pub fn remove_table(&self, table: &str) -> Result<usize> {
        let mut state = self.state.lock();
        let doomed: Vec<(u64, OperationId)> = state
            .ops
            .values()
            .filter(|op| op.table_name == table)
            .map(|op| (op.sequence, op.id.clone()))
            .collect();

        for (sequence, id) in &doomed {
            self.store.delete(OPERATIONS_TABLE, id)?;
            state.remove(*sequence);
        }
        Ok(doomed.len())
    }

    /// Get an operation by id.
    pub fn get(&self, id: &str) -> Option<TableOperation> {
        self.state.lock().by_id(id).cloned()
    }

    /// Get the queued operation for a row.
    pub fn get_by_item(&self, table: &str, item_id: &str) -> Option<TableOperation> {
        self.state
            .lock()
            .by_key(&table_item_id(table, item_id))
            .cloned()
    }

    /// Number of queued operations, optionally for one table.
    pub fn pending_count(&self, table: Option<&str>) -> usize {
        let state = self.state.lock();
        match table {
            None => state.ops.len(),
            Some(table) => state.ops.values().filter(|op| op.table_name == table).count(),
        }
    }

    /// All queued operations in FIFO order.
    pub fn operations(&self) -> Vec<TableOperation> {
        self.state.lock().ops.values().cloned().collect()
    }

    /// Check if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.state.lock().ops.is_empty()
    }
}

fn validate_mutation(
    kind: OperationKind,
    table: &str,
    item_id: &str,
    item: Option<&Value>,
) -> Result<()> {
    if table.is_empty() || TableSchema::is_system_table(table) {
        return Err(Error::Validation(format!("invalid table name '{}'", table)));
    }
    if item_id.is_empty() {
        return Err(Error::Validation("item id must not be empty".into()));
    }
    match (kind, item) {
        (OperationKind::Insert | OperationKind::Update, None) => Err(Error::Validation(format!(
            "{} requires an item",
            kind
        ))),
        (_, Some(value)) if !value.is_object() => {
            Err(Error::InvalidItem("item must be a JSON object".into()))
        }
        (_, Some(value)) => match item::id(value) {
            Some(id) if id != item_id => Err(Error::Validation(format!(
                "item id '{}' does not match operation item id '{}'",
                id, item_id
            ))),
            _ => Ok(()),
        },
        (OperationKind::Delete, None) => Ok(()),
    }
}

/// Which of two persisted operations for one key is the replacement.
///
/// Replacements are either appended (higher sequence) or a Delete taking an
/// Update's slot (same sequence).
fn supersedes(candidate: &TableOperation, existing: &TableOperation) -> bool {
    candidate.sequence > existing.sequence
        || (candidate.sequence == existing.sequence && candidate.kind == OperationKind::Delete)
}

fn collapse(
    existing: TableOperation,
    kind: OperationKind,
    item: Option<Value>,
    clock: &mut OperationClock,
) -> Result<Collapse> {
    use OperationKind::*;

    match (existing.kind, kind) {
        (Insert, Update) | (Update, Update) => {
            let mut op = existing;
            op.item = item;
            op.version += 1;
            Ok(Collapse::InPlace(op))
        }
        (Insert, Delete) => Ok(Collapse::Remove(existing)),
        (Update, Delete) | (Delete, Insert) => {
            let stamp = if kind == Delete {
                Stamp {
                    sequence: existing.sequence,
                    created_at: existing.created_at,
                }
            } else {
                clock.tick()
            };
            let new = TableOperation::new(
                kind,
                existing.table_name.clone(),
                existing.item_id.clone(),
                item,
                stamp,
            );
            Ok(Collapse::Replace { old: existing, new })
        }
        (Delete, Delete) => Ok(Collapse::Keep(existing)),
        (Delete, Update) => Err(Error::Validation(format!(
            "cannot update {}: a delete is pending",
            existing.table_item_id()
        ))),
        (Insert, Insert) | (Update, Insert) => Err(Error::Validation(format!(
            "cannot insert {}: the item already exists locally",
            existing.table_item_id()
        ))),
    }
}
