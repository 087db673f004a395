//! # Tablesync Engine
//!
//! An offline table-operation sync engine for mobile data clients.
//!
//! Applications write to local tables while offline. Every write lands in the
//! local store immediately and is recorded as a durable operation. When a
//! connection is available, the queue is pushed to the service in order and
//! remote changes are pulled back.
//!
//! ## Design Principles
//!
//! - **Pluggable IO**: Storage and network sit behind the [`LocalStore`] and
//!   [`RemoteTableClient`] traits
//! - **Durable**: Every queue change is written to the local store before it
//!   is acknowledged; an in-flight operation survives a restart
//! - **Ordered**: Operations are pushed strictly in the order they were made
//!
//! ## Core Concepts
//!
//! ### Operations
//!
//! A local mutation becomes a [`TableOperation`] of kind Insert, Update or
//! Delete. The [`OperationQueue`] keeps at most one operation per row,
//! collapsing later mutations into the queued one (an insert followed by an
//! update is still one insert).
//!
//! ### Push
//!
//! A push cycle sends operations one by one. Transient failures stop the
//! cycle and keep the operation queued; version conflicts go to a
//! [`ConflictResolver`]; permanent rejections are dropped and reported in
//! the [`PushResult`].
//!
//! ### Pull
//!
//! A pull pages through a remote query with skip/top ([`PullStrategy`]).
//! Pulls tagged with a query id are incremental: only rows updated since the
//! last pull are fetched.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use async_trait::async_trait;
//! use serde_json::{json, Value};
//! use tablesync_engine::{
//!     MemoryStore, Query, RemotePage, RemoteResult, RemoteTableClient, SyncContext,
//!     SyncSettings, TableSchema,
//! };
//!
//! // A service that echoes writes back
//! struct Echo;
//!
//! #[async_trait]
//! impl RemoteTableClient for Echo {
//!     async fn insert(&self, _table: &str, item: Value) -> RemoteResult<Value> {
//!         Ok(item)
//!     }
//!     async fn update(&self, _table: &str, item: Value) -> RemoteResult<Value> {
//!         Ok(item)
//!     }
//!     async fn delete(&self, _table: &str, _id: &str, _version: Option<String>) -> RemoteResult<()> {
//!         Ok(())
//!     }
//!     async fn read(&self, _query: &Query) -> RemoteResult<RemotePage> {
//!         Ok(RemotePage::default())
//!     }
//! }
//!
//! // 1. Create a context and define a table
//! let ctx = SyncContext::new(Arc::new(MemoryStore::new()), Arc::new(Echo), SyncSettings::default());
//! ctx.define_table(TableSchema::new("todos").with_system_columns()).unwrap();
//! ctx.initialize().unwrap();
//!
//! // 2. Write locally, while offline
//! let todo = ctx.insert("todos", json!({"text": "buy milk"})).unwrap();
//! assert_eq!(ctx.pending_operations(Some("todos")), 1);
//!
//! // 3. Push when online
//! let runtime = tokio::runtime::Runtime::new().unwrap();
//! let result = runtime
//!     .block_on(ctx.push(None, &Default::default()))
//!     .unwrap();
//! assert_eq!(result.completed.len(), 1);
//! assert_eq!(ctx.pending_operations(None), 0);
//! assert!(ctx.lookup("todos", todo["id"].as_str().unwrap()).unwrap().is_some());
//! ```
//!
//! ## Persistence
//!
//! The queue lives in the local store's `__operations` table, delta tokens in
//! `__config` and push failures in `__errors`. With the
//! in-memory store, use [`MemoryStore::export_state`] and
//! [`MemoryStore::import_state`] with [`StoreSnapshot`]; a context created over
//! a restored store recovers its queue in [`SyncContext::initialize`].

pub mod clock;
pub mod config;
pub mod conflict;
pub mod context;
pub mod error;
pub mod item;
pub mod operation;
pub mod processor;
pub mod pull;
pub mod push;
pub mod query;
pub mod queue;
pub mod remote;
pub mod schema;
pub mod snapshot;
pub mod store;
pub mod sync_error;

// Re-export main types at crate root
pub use clock::{OperationClock, Stamp};
pub use config::{ConfigError, SyncSettings};
pub use conflict::{Conflict, ConflictResolver, LocalWins, RemoteWins, Resolution};
pub use context::SyncContext;
pub use error::{Error, Result};
pub use operation::{OperationKind, OperationState, TableOperation};
pub use processor::LocalOperationProcessor;
pub use pull::{PullResult, PullStrategy};
pub use push::{CancelFlag, FailedOperation, OperationError, PushResult, PushStatus};
pub use query::{CompareOp, Direction, Filter, OrderBy, Query};
pub use queue::OperationQueue;
pub use remote::{ErrorClass, RemoteError, RemotePage, RemoteResult, RemoteTableClient};
pub use schema::{ColumnType, TableSchema};
pub use snapshot::{SnapshotMetadata, StoreSnapshot, SNAPSHOT_FORMAT_VERSION};
pub use store::{LocalStore, MemoryStore};
pub use sync_error::SyncError;

/// Type aliases for clarity
pub type TableName = String;
pub type ItemId = String;
pub type OperationId = String;
