//! Queued table operations.
//!
//! Every local mutation is recorded as a [`TableOperation`]. Operations are
//! never mutated into a different kind; a kind change is expressed by the
//! queue replacing one operation with another.

use crate::clock::Stamp;
use crate::{ItemId, OperationId, TableName};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The kind of mutation an operation replays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationKind {
    Insert,
    Update,
    Delete,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::Insert => write!(f, "insert"),
            OperationKind::Update => write!(f, "update"),
            OperationKind::Delete => write!(f, "delete"),
        }
    }
}

/// Persisted state of a queued operation.
///
/// Completed and failed operations are removed from the queue, so only the
/// two non-terminal states are ever stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OperationState {
    /// Waiting to be pushed
    #[default]
    Pending,
    /// A network round trip has begun; outcome unknown until confirmed
    Attempted,
}

/// One logical table mutation awaiting remote replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableOperation {
    /// Operation ID
    pub id: OperationId,
    /// Target table
    pub table_name: TableName,
    /// Row key within the table
    pub item_id: ItemId,
    /// Mutation kind
    pub kind: OperationKind,
    /// When the operation was created
    pub created_at: DateTime<Utc>,
    /// Push state
    #[serde(default)]
    pub state: OperationState,
    /// Item payload for insert/update, last known row for delete
    #[serde(default)]
    pub item: Option<serde_json::Value>,
    /// Queue position
    #[serde(default)]
    pub sequence: u64,
    /// Bumped on every in-place collapse
    #[serde(default = "initial_version")]
    pub version: u64,
}

fn initial_version() -> u64 {
    1
}

impl TableOperation {
    /// Create a new pending operation with a fresh id.
    pub fn new(
        kind: OperationKind,
        table_name: impl Into<TableName>,
        item_id: impl Into<ItemId>,
        item: Option<serde_json::Value>,
        stamp: Stamp,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            table_name: table_name.into(),
            item_id: item_id.into(),
            kind,
            created_at: stamp.created_at,
            state: OperationState::Pending,
            item,
            sequence: stamp.sequence,
            version: initial_version(),
        }
    }

    /// The key used to detect operations targeting the same logical row.
    pub fn table_item_id(&self) -> String {
        table_item_id(&self.table_name, &self.item_id)
    }

    /// Whether a network round trip has begun for this operation.
    pub fn is_attempted(&self) -> bool {
        self.state == OperationState::Attempted
    }

    /// Serialize to the persisted row shape.
    pub fn to_record(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(self)
    }

    /// Deserialize from the persisted row shape.
    pub fn from_record(record: serde_json::Value) -> serde_json::Result<Self> {
        serde_json::from_value(record)
    }
}

/// Build the table-item-id key for a table and row.
pub fn table_item_id(table_name: &str, item_id: &str) -> String {
    format!("{}/{}", table_name, item_id)
}

/// Operations order by queue position, then id for a total order.
impl Ord for TableOperation {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.sequence
            .cmp(&other.sequence)
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl PartialOrd for TableOperation {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Eq for TableOperation {}
