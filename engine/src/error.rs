//! Error types for the sync engine.

use crate::remote::RemoteError;
use crate::{ItemId, TableName};
use thiserror::Error;

/// All possible errors from the sync engine.
///
/// Per-operation push failures are not reported through this type; they are
/// collected in [`crate::PushResult`]. Only errors that make the current call
/// meaningless end up here.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum Error {
    // Validation errors
    #[error("invalid item: {0}")]
    InvalidItem(String),

    #[error("invalid operation: {0}")]
    Validation(String),

    #[error("table not defined: {0}")]
    TableNotDefined(TableName),

    #[error("type mismatch for column '{column}': expected {expected}, got {got}")]
    TypeMismatch {
        column: String,
        expected: String,
        got: String,
    },

    // Queue errors
    #[error("operation already in flight for {table}/{item_id}")]
    OperationInFlight { table: TableName, item_id: ItemId },

    #[error("table '{0}' has pending operations")]
    PendingOperations(TableName),

    #[error("operation not found: {0}")]
    OperationNotFound(String),

    // State errors
    #[error("sync context is not initialized")]
    NotInitialized,

    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),

    #[error("local store error: {0}")]
    Storage(String),

    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),
}

impl Error {
    /// Build a storage error from anything displayable.
    pub fn storage(err: impl std::fmt::Display) -> Self {
        Error::Storage(err.to_string())
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = Error::TableNotDefined("todos".into());
        assert_eq!(err.to_string(), "table not defined: todos");

        let err = Error::OperationInFlight {
            table: "todos".into(),
            item_id: "t-1".into(),
        };
        assert_eq!(err.to_string(), "operation already in flight for todos/t-1");

        let err = Error::TypeMismatch {
            column: "done".into(),
            expected: "Boolean".into(),
            got: "String".into(),
        };
        assert_eq!(
            err.to_string(),
            "type mismatch for column 'done': expected Boolean, got String"
        );
    }

    #[test]
    fn remote_error_converts() {
        let err: Error = RemoteError::network("connection reset").into();
        assert!(matches!(err, Error::Remote(_)));
        assert!(err.to_string().contains("connection reset"));
    }
}
