//! Applies operations to the local store.
//!
//! Local mutations land in the store optimistically, before they are pushed.
//! Once the service confirms (or overrides) a change, the processor writes
//! the service's representation back.

use crate::operation::{OperationKind, TableOperation};
use crate::{error::Result, item, LocalStore};
use serde_json::Value;
use std::sync::Arc;

/// Writes local and service-confirmed row states to the local store.
pub struct LocalOperationProcessor<S: LocalStore> {
    store: Arc<S>,
}

impl<S: LocalStore> LocalOperationProcessor<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Apply a local mutation.
    ///
    /// For a delete, returns the row as it was before deletion (the given
    /// snapshot if any, else whatever the store held).
    pub fn apply(
        &self,
        kind: OperationKind,
        table: &str,
        item_id: &str,
        item: Option<&Value>,
    ) -> Result<Option<Value>> {
        match kind {
            OperationKind::Insert | OperationKind::Update => {
                if let Some(item) = item {
                    self.store.upsert(table, item.clone(), false)?;
                }
                Ok(None)
            }
            OperationKind::Delete => {
                let captured = match item {
                    Some(item) => Some(item.clone()),
                    None => self.store.lookup(table, item_id)?,
                };
                self.store.delete(table, item_id)?;
                Ok(captured)
            }
        }
    }

    /// Write back the outcome of a confirmed remote call.
    pub fn reconcile(&self, op: &TableOperation, server_item: Option<Value>) -> Result<()> {
        match (op.kind, server_item) {
            (OperationKind::Delete, _) => self.store.delete(&op.table_name, &op.item_id),
            (_, Some(server_item)) => self.write_server_item(op, server_item),
            // Nothing came back; the optimistic local row stands
            (_, None) => Ok(()),
        }
    }

    /// Make the local row match the service's copy after a conflict.
    ///
    /// A missing or soft-deleted server item removes the local row.
    pub fn accept_remote(&self, op: &TableOperation, server_item: Option<&Value>) -> Result<()> {
        match server_item {
            Some(server_item) if !item::is_deleted(server_item) => {
                self.write_server_item(op, server_item.clone())
            }
            _ => self.store.delete(&op.table_name, &op.item_id),
        }
    }

    fn write_server_item(&self, op: &TableOperation, server_item: Value) -> Result<()> {
        let server_id = item::require_id(&server_item)?.to_string();
        if server_id != op.item_id {
            tracing::debug!(
                table = %op.table_name,
                local_id = %op.item_id,
                server_id = %server_id,
                "service assigned a new id"
            );
            self.store.delete(&op.table_name, &op.item_id)?;
        }
        self.store.upsert(&op.table_name, server_item, true)
    }
}
