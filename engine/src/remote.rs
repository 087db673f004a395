//! Remote table client contract.
//!
//! The engine does not speak HTTP. An application provides a
//! [`RemoteTableClient`] that performs the actual service calls and maps
//! failures into [`RemoteError`]s. Timeouts are the client's business; they
//! should come back as [`ErrorClass::Network`].

use crate::Query;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Broad category of a remote failure. Drives the push engine's retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorClass {
    /// Version mismatch (409 / 412)
    Conflict,
    /// Authentication or authorization failure (401 / 403)
    Unauthorized,
    /// Any other 4xx; retrying will not help
    ClientError,
    /// 5xx, 408 and 429; worth retrying later
    ServerError,
    /// No response at all: connection failure or timeout
    Network,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorClass::Conflict => write!(f, "conflict"),
            ErrorClass::Unauthorized => write!(f, "unauthorized"),
            ErrorClass::ClientError => write!(f, "client error"),
            ErrorClass::ServerError => write!(f, "server error"),
            ErrorClass::Network => write!(f, "network error"),
        }
    }
}

/// A failed remote call.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[error("{class}{}: {message}", .status.map(|s| format!(" ({})", s)).unwrap_or_default())]
pub struct RemoteError {
    pub class: ErrorClass,
    /// HTTP status, when the service answered
    pub status: Option<u16>,
    pub message: String,
    /// The service's current version of the row, returned with conflicts
    pub server_item: Option<Value>,
}

impl RemoteError {
    /// A call that never got a response.
    pub fn network(message: impl Into<String>) -> Self {
        Self {
            class: ErrorClass::Network,
            status: None,
            message: message.into(),
            server_item: None,
        }
    }

    /// Classify a non-success HTTP status.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let class = match status {
            409 | 412 => ErrorClass::Conflict,
            401 | 403 => ErrorClass::Unauthorized,
            408 | 429 => ErrorClass::ServerError,
            400..=499 => ErrorClass::ClientError,
            _ => ErrorClass::ServerError,
        };
        Self {
            class,
            status: Some(status),
            message: message.into(),
            server_item: None,
        }
    }

    /// A 412 carrying the service's copy of the row.
    pub fn conflict(server_item: Value) -> Self {
        Self::from_status(412, "precondition failed").with_server_item(server_item)
    }

    /// Attach the service's copy of the row.
    pub fn with_server_item(mut self, item: Value) -> Self {
        self.server_item = Some(item);
        self
    }

    pub fn is_conflict(&self) -> bool {
        self.class == ErrorClass::Conflict
    }

    pub fn is_unauthorized(&self) -> bool {
        self.class == ErrorClass::Unauthorized
    }

    /// Whether the same call may succeed later.
    pub fn is_transient(&self) -> bool {
        matches!(self.class, ErrorClass::ServerError | ErrorClass::Network)
    }
}

/// A page of rows read from the service.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemotePage {
    pub items: Vec<Value>,
    /// Inline total count, when requested and supported
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_count: Option<u64>,
}

impl RemotePage {
    pub fn new(items: Vec<Value>) -> Self {
        Self {
            items,
            total_count: None,
        }
    }
}

/// Result type for remote calls.
pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

/// Remote CRUD + query, consumed by the push and pull paths.
///
/// Successful writes return the service's representation of the row, with
/// its system properties filled in.
#[async_trait]
pub trait RemoteTableClient: Send + Sync {
    async fn insert(&self, table: &str, item: Value) -> RemoteResult<Value>;

    async fn update(&self, table: &str, item: Value) -> RemoteResult<Value>;

    /// Delete by id. `version` is sent as the precondition when known.
    async fn delete(&self, table: &str, id: &str, version: Option<String>) -> RemoteResult<()>;

    /// Read one page.
    async fn read(&self, query: &Query) -> RemoteResult<RemotePage>;
}
