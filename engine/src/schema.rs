//! Table definitions and item validation.
//!
//! Local tables are declared before use. Declared columns are type-checked on
//! upsert; undeclared columns pass through untouched, since the service may
//! add columns the client does not know about.

use crate::{error::Result, item, Error, TableName};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Column types supported in local tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    String,
    Integer,
    Real,
    Boolean,
    /// RFC 3339 timestamp string
    Date,
    /// Arbitrary nested JSON
    Object,
}

impl std::fmt::Display for ColumnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ColumnType::String => write!(f, "String"),
            ColumnType::Integer => write!(f, "Integer"),
            ColumnType::Real => write!(f, "Real"),
            ColumnType::Boolean => write!(f, "Boolean"),
            ColumnType::Date => write!(f, "Date"),
            ColumnType::Object => write!(f, "Object"),
        }
    }
}

impl ColumnType {
    fn accepts(&self, value: &Value) -> bool {
        match self {
            ColumnType::String => value.is_string(),
            ColumnType::Integer => value.is_i64() || value.is_u64(),
            ColumnType::Real => value.is_number(),
            ColumnType::Boolean => value.is_boolean(),
            ColumnType::Date => value
                .as_str()
                .map(|s| chrono::DateTime::parse_from_rfc3339(s).is_ok())
                .unwrap_or(false),
            ColumnType::Object => true,
        }
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "Null",
        Value::Bool(_) => "Boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "Integer",
        Value::Number(_) => "Real",
        Value::String(_) => "String",
        Value::Array(_) => "Array",
        Value::Object(_) => "Object",
    }
}

/// Definition of a local table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableSchema {
    /// Table name
    pub name: TableName,
    /// Declared columns by name
    pub columns: BTreeMap<String, ColumnType>,
}

impl TableSchema {
    /// Create a table with only the `id` column declared.
    pub fn new(name: impl Into<TableName>) -> Self {
        let mut columns = BTreeMap::new();
        columns.insert(item::ID.to_string(), ColumnType::String);
        Self {
            name: name.into(),
            columns,
        }
    }

    /// Builder-style method to declare a column.
    pub fn with_column(mut self, name: impl Into<String>, column_type: ColumnType) -> Self {
        self.columns.insert(name.into(), column_type);
        self
    }

    /// Declare the service-managed columns.
    pub fn with_system_columns(self) -> Self {
        self.with_column(item::VERSION, ColumnType::String)
            .with_column(item::UPDATED_AT, ColumnType::Date)
            .with_column(item::CREATED_AT, ColumnType::Date)
            .with_column(item::DELETED, ColumnType::Boolean)
    }

    /// Whether the table is reserved for engine bookkeeping.
    pub fn is_system_table(name: &str) -> bool {
        name.starts_with("__")
    }

    /// Validate an item before it is written to this table.
    pub fn validate_item(&self, value: &Value) -> Result<()> {
        let obj = value
            .as_object()
            .ok_or_else(|| Error::InvalidItem("item must be a JSON object".into()))?;
        item::require_id(value)?;

        for (column, column_type) in &self.columns {
            match obj.get(column) {
                None | Some(Value::Null) => {}
                Some(v) if column_type.accepts(v) => {}
                Some(v) => {
                    return Err(Error::TypeMismatch {
                        column: column.clone(),
                        expected: column_type.to_string(),
                        got: json_type_name(v).to_string(),
                    })
                }
            }
        }

        Ok(())
    }
}
