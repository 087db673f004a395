//! The sync context: the engine's public entry point.
//!
//! A [`SyncContext`] ties a local store, a remote client and the operation
//! queue together. Local mutations go through it so that the optimistic
//! local write and the queued operation always agree. Push, pull and purge
//! are serialized by an async gate; local mutations are not blocked by a
//! running push, only by the queue's own lock.

use crate::conflict::ConflictResolver;
use crate::operation::{OperationKind, TableOperation};
use crate::processor::LocalOperationProcessor;
use crate::pull::{self, PullResult, PullStrategy, Puller};
use crate::push::{CancelFlag, PushResult, Pusher};
use crate::queue::OperationQueue;
use crate::remote::RemoteTableClient;
use crate::sync_error::{self, SyncError};
use crate::{
    error::Result, item, Error, Filter, LocalStore, Query, SyncSettings, TableName, TableSchema,
};
use parking_lot::RwLock;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Offline table synchronization over a local store and a remote service.
pub struct SyncContext<S: LocalStore, R: RemoteTableClient> {
    store: Arc<S>,
    remote: Arc<R>,
    settings: SyncSettings,
    queue: OperationQueue<S>,
    processor: LocalOperationProcessor<S>,
    resolver: RwLock<Option<Arc<dyn ConflictResolver>>>,
    /// One push, pull or purge at a time
    sync_gate: tokio::sync::Mutex<()>,
    initialized: AtomicBool,
}

impl<S: LocalStore, R: RemoteTableClient> SyncContext<S, R> {
    pub fn new(store: Arc<S>, remote: Arc<R>, settings: SyncSettings) -> Self {
        Self {
            queue: OperationQueue::new(store.clone()),
            processor: LocalOperationProcessor::new(store.clone()),
            store,
            remote,
            settings,
            resolver: RwLock::new(None),
            sync_gate: tokio::sync::Mutex::new(()),
            initialized: AtomicBool::new(false),
        }
    }

    /// Define the engine's tables and load the operation queue.
    ///
    /// Returns the number of operations recovered. Calling it again reloads
    /// the queue from the store.
    pub fn initialize(&self) -> Result<usize> {
        self.store.define_table(pull::config_table_schema())?;
        self.store.define_table(sync_error::errors_table_schema())?;
        let recovered = self.queue.initialize()?;
        self.initialized.store(true, Ordering::SeqCst);
        tracing::info!(recovered, "sync context initialized");
        Ok(recovered)
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    fn ensure_initialized(&self) -> Result<()> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(Error::NotInitialized)
        }
    }

    /// Define an application table.
    pub fn define_table(&self, schema: TableSchema) -> Result<()> {
        if TableSchema::is_system_table(&schema.name) {
            return Err(Error::Validation(format!(
                "table name '{}' is reserved",
                schema.name
            )));
        }
        self.store.define_table(schema)
    }

    /// Insert a row locally and queue it for push. A missing id is generated.
    pub fn insert(&self, table: &str, mut item: Value) -> Result<Value> {
        self.ensure_initialized()?;
        if !item.is_object() {
            return Err(Error::InvalidItem("item must be a JSON object".into()));
        }
        if item::id(&item).is_none() {
            item::set_str(&mut item, item::ID, &uuid::Uuid::new_v4().to_string());
        }
        let id = item::require_id(&item)?.to_string();

        if self.store.lookup(table, &id)?.is_some() {
            return Err(Error::Validation(format!(
                "cannot insert {}/{}: the item already exists",
                table, id
            )));
        }

        self.queue
            .enqueue_with(OperationKind::Insert, table, &id, Some(item.clone()), |_| {
                self.processor
                    .apply(OperationKind::Insert, table, &id, Some(&item))
                    .map(|_| ())
            })?;
        Ok(item)
    }

    /// Update an existing row locally and queue it for push.
    pub fn update(&self, table: &str, item: Value) -> Result<Value> {
        self.ensure_initialized()?;
        let id = item::require_id(&item)?.to_string();

        if self.store.lookup(table, &id)?.is_none() {
            return Err(Error::Validation(format!(
                "cannot update {}/{}: no such item",
                table, id
            )));
        }

        self.queue
            .enqueue_with(OperationKind::Update, table, &id, Some(item.clone()), |_| {
                self.processor
                    .apply(OperationKind::Update, table, &id, Some(&item))
                    .map(|_| ())
            })?;
        Ok(item)
    }

    /// Delete a row locally and queue the delete for push.
    pub fn delete(&self, table: &str, id: &str) -> Result<()> {
        self.ensure_initialized()?;
        let snapshot = self.store.lookup(table, id)?;
        if snapshot.is_none() {
            return Err(Error::Validation(format!(
                "cannot delete {}/{}: no such item",
                table, id
            )));
        }

        self.queue
            .enqueue_with(OperationKind::Delete, table, id, snapshot.clone(), |_| {
                self.processor
                    .apply(OperationKind::Delete, table, id, snapshot.as_ref())
                    .map(|_| ())
            })?;
        Ok(())
    }

    /// Look up a local row.
    pub fn lookup(&self, table: &str, id: &str) -> Result<Option<Value>> {
        self.store.lookup(table, id)
    }

    /// Query local rows.
    pub fn read(&self, query: &Query) -> Result<Vec<Value>> {
        self.store.query(query)
    }

    /// Push queued operations, optionally only for some tables.
    pub async fn push(
        &self,
        tables: Option<&[TableName]>,
        cancel: &CancelFlag,
    ) -> Result<PushResult> {
        self.ensure_initialized()?;
        let _gate = self.sync_gate.lock().await;
        self.push_locked(tables, cancel).await
    }

    async fn push_locked(
        &self,
        tables: Option<&[TableName]>,
        cancel: &CancelFlag,
    ) -> Result<PushResult> {
        let resolver = self.resolver.read().clone();
        Pusher::new(&self.queue, &self.processor, self.store.as_ref(), self.remote.as_ref())
            .with_resolver(resolver)
            .with_max_conflict_retries(self.settings.max_conflict_retries)
            .run(tables, cancel)
            .await
    }

    /// Pull remote rows matching `query` into the local store.
    ///
    /// Pending operations for the table are pushed first; the pull fails if
    /// any remain. With a `query_id` the pull is incremental.
    pub async fn pull(&self, query: Query, query_id: Option<&str>) -> Result<PullResult> {
        self.ensure_initialized()?;
        let table = query.table.clone();
        if TableSchema::is_system_table(&table) {
            return Err(Error::Validation(format!("cannot pull into '{}'", table)));
        }

        let _gate = self.sync_gate.lock().await;

        if self.queue.pending_count(Some(&table)) > 0 {
            tracing::debug!(table = %table, "pushing pending operations before pull");
            let tables = [table.clone()];
            self.push_locked(Some(&tables), &CancelFlag::new()).await?;
            if self.queue.pending_count(Some(&table)) > 0 {
                return Err(Error::PendingOperations(table));
            }
        }

        let strategy = match query_id {
            Some(query_id) => {
                let token = pull::read_delta_token(self.store.as_ref(), &table, query_id)?;
                PullStrategy::incremental(query, query_id, token)
            }
            None => PullStrategy::new(query),
        }
        .with_page_size(self.settings.page_size);

        Puller::new(&self.queue, self.store.as_ref(), self.remote.as_ref())
            .run(strategy)
            .await
    }

    /// Remove local rows of a table, optionally only those matching a filter.
    ///
    /// Fails if the table has queued operations, unless `force` is set, in
    /// which case they are dropped first. Delta tokens for the table are
    /// cleared. Returns the number of rows removed.
    pub async fn purge(&self, table: &str, filter: Option<Filter>, force: bool) -> Result<usize> {
        self.ensure_initialized()?;
        let _gate = self.sync_gate.lock().await;

        let pending = self.queue.pending_count(Some(table));
        if pending > 0 {
            if !force {
                return Err(Error::PendingOperations(table.to_string()));
            }
            let dropped = self.queue.remove_table(table)?;
            tracing::warn!(table, dropped, "forced purge dropped pending operations");
        }

        let mut query = Query::new(table).include_deleted();
        if let Some(filter) = filter {
            query = query.filter(filter);
        }
        let rows = self.store.query(&query)?;
        for id in rows.iter().filter_map(item::id) {
            self.store.delete(table, id)?;
        }
        pull::clear_delta_tokens(self.store.as_ref(), table)?;
        sync_error::clear_errors(self.store.as_ref(), Some(table))?;

        tracing::info!(table, rows = rows.len(), "table purged");
        Ok(rows.len())
    }

    /// Number of queued operations, optionally for one table.
    pub fn pending_operations(&self, table: Option<&str>) -> usize {
        self.queue.pending_count(table)
    }

    /// Queued operations in push order.
    pub fn operations(&self) -> Vec<TableOperation> {
        self.queue.operations()
    }

    /// Push failures recorded so far, oldest first.
    pub fn sync_errors(&self, table: Option<&str>) -> Result<Vec<SyncError>> {
        sync_error::read_errors(self.store.as_ref(), table)
    }

    /// Forget recorded push failures. Returns how many were removed.
    pub fn clear_sync_errors(&self, table: Option<&str>) -> Result<usize> {
        sync_error::clear_errors(self.store.as_ref(), table)
    }

    /// Install the hook consulted when a push hits a conflict.
    pub fn set_conflict_resolver<C: ConflictResolver + 'static>(&self, resolver: C) {
        *self.resolver.write() = Some(Arc::new(resolver));
    }

    pub fn clear_conflict_resolver(&self) {
        *self.resolver.write() = None;
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }
}
