//! Push failures kept in the local store.
//!
//! Every operation a push cycle could not complete leaves a row in the
//! `__errors` table, one per logical row, so the application can inspect
//! unresolved conflicts and rejected writes after a restart. The row is
//! cleared when a later push completes the operation.

use crate::operation::{table_item_id, OperationKind};
use crate::push::{FailedOperation, OperationError};
use crate::{
    error::Result, ColumnType, Error, Filter, ItemId, LocalStore, OperationId, Query, TableName,
    TableSchema,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Local table holding push failures.
pub const ERRORS_TABLE: &str = "__errors";

/// Schema of the errors table.
pub fn errors_table_schema() -> TableSchema {
    TableSchema::new(ERRORS_TABLE)
        .with_column("operationId", ColumnType::String)
        .with_column("tableName", ColumnType::String)
        .with_column("itemId", ColumnType::String)
        .with_column("kind", ColumnType::String)
        .with_column("retained", ColumnType::Boolean)
        .with_column("status", ColumnType::Integer)
        .with_column("message", ColumnType::String)
        .with_column("item", ColumnType::Object)
        .with_column("serverItem", ColumnType::Object)
        .with_column("recordedAt", ColumnType::Date)
}

/// A recorded push failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncError {
    /// Table-item-id key of the row
    pub id: String,
    pub operation_id: OperationId,
    pub table_name: TableName,
    pub item_id: ItemId,
    pub kind: OperationKind,
    /// Whether the operation is still queued
    pub retained: bool,
    /// HTTP status, when the service answered
    #[serde(default)]
    pub status: Option<u16>,
    pub message: String,
    #[serde(default)]
    pub item: Option<Value>,
    #[serde(default)]
    pub server_item: Option<Value>,
    pub recorded_at: DateTime<Utc>,
}

impl SyncError {
    pub fn from_failure(failed: &FailedOperation) -> Self {
        let op = &failed.operation;
        let remote = match &failed.error {
            OperationError::Conflict(err)
            | OperationError::Transient(err)
            | OperationError::Unauthorized(err)
            | OperationError::Permanent(err) => Some(err),
            OperationError::Discarded | OperationError::MissingItem => None,
        };

        Self {
            id: op.table_item_id(),
            operation_id: op.id.clone(),
            table_name: op.table_name.clone(),
            item_id: op.item_id.clone(),
            kind: op.kind,
            retained: failed.error.is_retained(),
            status: remote.and_then(|err| err.status),
            message: failed.error.to_string(),
            item: op.item.clone(),
            server_item: remote.and_then(|err| err.server_item.clone()),
            recorded_at: Utc::now(),
        }
    }

    pub fn to_record(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }

    pub fn from_record(record: Value) -> serde_json::Result<Self> {
        serde_json::from_value(record)
    }
}

/// Store a failure, replacing any earlier one for the same row.
pub fn record_error<S: LocalStore>(store: &S, failed: &FailedOperation) -> Result<()> {
    let error = SyncError::from_failure(failed);
    let record = error.to_record().map_err(Error::storage)?;
    store.upsert(ERRORS_TABLE, record, false)
}

/// Forget the failure recorded for a row, if any.
pub fn clear_error<S: LocalStore>(store: &S, table: &str, item_id: &str) -> Result<()> {
    store.delete(ERRORS_TABLE, &table_item_id(table, item_id))
}

/// Recorded failures, oldest first, optionally for one table.
pub fn read_errors<S: LocalStore>(store: &S, table: Option<&str>) -> Result<Vec<SyncError>> {
    let mut query = Query::new(ERRORS_TABLE).order_by("recordedAt").order_by("id");
    if let Some(table) = table {
        query = query.filter(Filter::eq("tableName", table));
    }

    store
        .query(&query)?
        .into_iter()
        .map(|row| SyncError::from_record(row).map_err(Error::storage))
        .collect()
}

/// Remove recorded failures, optionally for one table. Returns how many
/// were removed.
pub fn clear_errors<S: LocalStore>(store: &S, table: Option<&str>) -> Result<usize> {
    let errors = read_errors(store, table)?;
    for error in &errors {
        store.delete(ERRORS_TABLE, &error.id)?;
    }
    Ok(errors.len())
}
