//! Snapshot types for persisting and restoring the in-memory store.
//!
//! Snapshots are the bridge between [`crate::MemoryStore`] and persistent
//! storage. They include the engine's bookkeeping tables, so restoring a
//! snapshot restores the operation queue as well.

use crate::queue::OPERATIONS_TABLE;
use crate::{error::Result, item, Error, ItemId, TableName, TableSchema};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Version of the snapshot format for future compatibility.
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// A point-in-time snapshot of every table in the store.
///
/// Uses BTreeMap instead of HashMap for deterministic serialization order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreSnapshot {
    /// Snapshot format version
    pub format_version: u32,
    /// Table definitions by name
    pub schemas: BTreeMap<TableName, TableSchema>,
    /// Rows organized by table, then by row id
    pub tables: BTreeMap<TableName, BTreeMap<ItemId, Value>>,
}

impl Default for StoreSnapshot {
    fn default() -> Self {
        Self::new()
    }
}

impl StoreSnapshot {
    /// Create a new empty snapshot.
    pub fn new() -> Self {
        Self {
            format_version: SNAPSHOT_FORMAT_VERSION,
            schemas: BTreeMap::new(),
            tables: BTreeMap::new(),
        }
    }

    /// Add a table definition.
    pub fn add_schema(&mut self, schema: TableSchema) {
        self.schemas.insert(schema.name.clone(), schema);
    }

    /// Add a row. Rows without a usable id are ignored.
    pub fn add_row(&mut self, table: &str, row: Value) {
        if let Some(id) = item::id(&row).map(str::to_string) {
            self.tables
                .entry(table.to_string())
                .or_default()
                .insert(id, row);
        }
    }

    /// Get a row from the snapshot.
    pub fn get_row(&self, table: &str, id: &str) -> Option<&Value> {
        self.tables.get(table)?.get(id)
    }

    /// Count rows across all tables.
    pub fn row_count(&self) -> usize {
        self.tables.values().map(|t| t.len()).sum()
    }

    /// Count queued operations.
    pub fn pending_count(&self) -> usize {
        self.tables.get(OPERATIONS_TABLE).map_or(0, |t| t.len())
    }

    /// Check that every table with rows is defined and every row matches
    /// its table schema and key.
    pub fn validate(&self) -> Result<()> {
        if self.format_version > SNAPSHOT_FORMAT_VERSION {
            return Err(Error::InvalidSnapshot(format!(
                "unsupported snapshot format version: {} (max supported: {})",
                self.format_version, SNAPSHOT_FORMAT_VERSION
            )));
        }

        for (table, rows) in &self.tables {
            let schema = self
                .schemas
                .get(table)
                .ok_or_else(|| Error::TableNotDefined(table.clone()))?;

            for (id, row) in rows {
                schema.validate_item(row)?;
                if item::id(row) != Some(id.as_str()) {
                    return Err(Error::InvalidSnapshot(format!(
                        "row key '{}' in table '{}' does not match its id",
                        id, table
                    )));
                }
            }
        }

        Ok(())
    }

    /// Serialize to JSON with deterministic ordering.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    /// Serialize to pretty JSON with deterministic ordering.
    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    /// Deserialize from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        let snapshot: Self =
            serde_json::from_str(json).map_err(|e| Error::InvalidSnapshot(e.to_string()))?;
        snapshot.validate()?;
        Ok(snapshot)
    }
}

/// Metadata about a snapshot (without the full data).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotMetadata {
    /// Snapshot format version
    pub format_version: u32,
    /// Number of defined tables
    pub table_count: usize,
    /// Total row count, bookkeeping tables included
    pub row_count: usize,
    /// Queued operation count
    pub pending_count: usize,
}

impl From<&StoreSnapshot> for SnapshotMetadata {
    fn from(snapshot: &StoreSnapshot) -> Self {
        Self {
            format_version: snapshot.format_version,
            table_count: snapshot.schemas.len(),
            row_count: snapshot.row_count(),
            pending_count: snapshot.pending_count(),
        }
    }
}
