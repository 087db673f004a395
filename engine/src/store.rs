//! Local store contract and the in-memory store.
//!
//! The engine never talks to a database directly. Everything it persists,
//! including its own operation queue, goes through [`LocalStore`]. The
//! [`MemoryStore`] implementation keeps tables in memory and can be exported
//! to and restored from a [`StoreSnapshot`].

use crate::snapshot::StoreSnapshot;
use crate::{error::Result, item, Error, ItemId, Query, TableName, TableSchema};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

/// Durable per-table CRUD + query, consumed by the engine.
///
/// Calls are synchronous from the engine's point of view; an implementation
/// backed by an asynchronous database is expected to block or buffer
/// internally. A call returning `Ok` means the write is durable.
pub trait LocalStore: Send + Sync {
    /// Declare a table. Redefining an existing table replaces its schema.
    fn define_table(&self, schema: TableSchema) -> Result<()>;

    /// Insert or replace a row. `from_server` marks rows written from a
    /// service response rather than a local mutation.
    fn upsert(&self, table: &str, item: Value, from_server: bool) -> Result<()>;

    /// Look up a row by id.
    fn lookup(&self, table: &str, id: &str) -> Result<Option<Value>>;

    /// Delete a row by id. Deleting a missing row is not an error.
    fn delete(&self, table: &str, id: &str) -> Result<()>;

    /// Run a query against one table.
    fn query(&self, query: &Query) -> Result<Vec<Value>>;
}

/// Rows of one table, by id.
#[derive(Debug, Clone, Default)]
pub struct Table {
    schema: Option<TableSchema>,
    rows: HashMap<ItemId, Value>,
}

impl Table {
    /// Get a row by ID.
    pub fn get(&self, id: &str) -> Option<&Value> {
        self.rows.get(id)
    }

    /// All rows in arbitrary order.
    pub fn rows(&self) -> impl Iterator<Item = &Value> {
        self.rows.values()
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Check if the table has no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// An in-memory [`LocalStore`].
///
/// Tables must be defined before use. Rows are validated against the table
/// schema on every upsert.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<HashMap<TableName, Table>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows in a table, or `None` if it is not defined.
    pub fn row_count(&self, table: &str) -> Option<usize> {
        self.tables.read().get(table).map(Table::len)
    }

    /// Names of all defined tables.
    pub fn table_names(&self) -> Vec<TableName> {
        let mut names: Vec<_> = self.tables.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Export every table, including the engine's bookkeeping tables.
    pub fn export_state(&self) -> StoreSnapshot {
        let tables = self.tables.read();
        let mut snapshot = StoreSnapshot::new();
        for (name, table) in tables.iter() {
            if let Some(schema) = &table.schema {
                snapshot.add_schema(schema.clone());
            }
            for row in table.rows() {
                snapshot.add_row(name, row.clone());
            }
        }
        snapshot
    }

    /// Replace the store contents with a snapshot.
    pub fn import_state(&self, snapshot: StoreSnapshot) -> Result<()> {
        snapshot.validate()?;

        let mut tables: HashMap<TableName, Table> = HashMap::new();
        for (name, schema) in snapshot.schemas {
            tables.entry(name).or_default().schema = Some(schema);
        }
        for (name, rows) in snapshot.tables {
            let table = tables.entry(name).or_default();
            for (id, row) in rows {
                table.rows.insert(id, row);
            }
        }

        *self.tables.write() = tables;
        Ok(())
    }

    /// Build a store from a snapshot.
    pub fn from_snapshot(snapshot: StoreSnapshot) -> Result<Self> {
        let store = Self::new();
        store.import_state(snapshot)?;
        Ok(store)
    }
}

impl LocalStore for MemoryStore {
    fn define_table(&self, schema: TableSchema) -> Result<()> {
        let name = schema.name.clone();
        let mut tables = self.tables.write();
        tables.entry(name).or_default().schema = Some(schema);
        Ok(())
    }

    fn upsert(&self, table: &str, item: Value, _from_server: bool) -> Result<()> {
        let mut tables = self.tables.write();
        let entry = tables
            .get_mut(table)
            .filter(|t| t.schema.is_some())
            .ok_or_else(|| Error::TableNotDefined(table.to_string()))?;

        if let Some(schema) = &entry.schema {
            schema.validate_item(&item)?;
        }
        let id = item::require_id(&item)?.to_string();
        entry.rows.insert(id, item);
        Ok(())
    }

    fn lookup(&self, table: &str, id: &str) -> Result<Option<Value>> {
        let tables = self.tables.read();
        let entry = tables
            .get(table)
            .ok_or_else(|| Error::TableNotDefined(table.to_string()))?;
        Ok(entry.get(id).cloned())
    }

    fn delete(&self, table: &str, id: &str) -> Result<()> {
        let mut tables = self.tables.write();
        let entry = tables
            .get_mut(table)
            .ok_or_else(|| Error::TableNotDefined(table.to_string()))?;
        entry.rows.remove(id);
        Ok(())
    }

    fn query(&self, query: &Query) -> Result<Vec<Value>> {
        let tables = self.tables.read();
        let entry = tables
            .get(&query.table)
            .ok_or_else(|| Error::TableNotDefined(query.table.clone()))?;

        // Stable base order so unordered queries are deterministic
        let ordered: BTreeMap<&ItemId, &Value> = entry.rows.iter().collect();
        Ok(query.apply(ordered.into_values()))
    }
}
