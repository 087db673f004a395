//! Shared test fixtures: an in-memory service and context builders.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, SecondsFormat, TimeZone, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tablesync_engine::{
    item, Error, LocalStore, MemoryStore, Query, RemoteError, RemotePage, RemoteResult,
    RemoteTableClient, Result, SyncContext, SyncSettings, TableSchema,
};

/// One call received by the fake service.
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub method: &'static str,
    pub table: String,
    pub id: Option<String>,
    pub item: Option<Value>,
    pub version: Option<String>,
    pub skip: Option<i64>,
    pub filter: bool,
}

#[derive(Default)]
struct ServerState {
    tables: HashMap<String, BTreeMap<String, Value>>,
    /// Outcomes for upcoming writes; `None` lets the call through
    script: VecDeque<Option<RemoteError>>,
    calls: Vec<Call>,
    version: u64,
    assign_ids: bool,
}

impl ServerState {
    fn stamp(&mut self, row: &mut Value) {
        self.version += 1;
        let updated_at = base_time() + Duration::seconds(self.version as i64);
        let version = self.version.to_string();
        item::set_str(row, item::VERSION, &version);
        item::set_str(
            row,
            item::UPDATED_AT,
            &updated_at.to_rfc3339_opts(SecondsFormat::Millis, true),
        );
    }

    fn scripted(&mut self) -> Option<RemoteError> {
        self.script.pop_front().flatten()
    }
}

fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or_else(Utc::now)
}

/// An in-memory stand-in for the table service.
///
/// Writes are version checked the way the real service does: an update or
/// delete whose `version` does not match gets a 412 carrying the current row,
/// an insert of an existing id gets a 409. Deletes are soft.
#[derive(Default)]
pub struct FakeRemote {
    state: Mutex<ServerState>,
}

impl FakeRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue outcomes for the next write calls, in order.
    pub fn script(&self, outcomes: Vec<Option<RemoteError>>) {
        self.state.lock().script.extend(outcomes);
    }

    /// Make inserts get a service-generated id.
    pub fn assign_ids(&self) {
        self.state.lock().assign_ids = true;
    }

    /// Put a row on the service directly. Returns the stored row.
    pub fn seed(&self, table: &str, mut row: Value) -> Value {
        let mut state = self.state.lock();
        state.stamp(&mut row);
        let id = item::id(&row).unwrap_or_default().to_string();
        state
            .tables
            .entry(table.to_string())
            .or_default()
            .insert(id, row.clone());
        row
    }

    pub fn row(&self, table: &str, id: &str) -> Option<Value> {
        self.state.lock().tables.get(table)?.get(id).cloned()
    }

    pub fn row_count(&self, table: &str) -> usize {
        self.state.lock().tables.get(table).map_or(0, |t| t.len())
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().calls.clone()
    }

    pub fn write_calls(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| c.method != "read")
            .collect()
    }

    pub fn read_calls(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| c.method == "read")
            .collect()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    fn record(&self, state: &mut ServerState, method: &'static str, table: &str, item: Option<&Value>) {
        state.calls.push(Call {
            method,
            table: table.to_string(),
            id: item.and_then(item::id).map(str::to_string),
            item: item.cloned(),
            version: item.and_then(item::version).map(str::to_string),
            skip: None,
            filter: false,
        });
    }
}

#[async_trait]
impl RemoteTableClient for FakeRemote {
    async fn insert(&self, table: &str, mut item: Value) -> RemoteResult<Value> {
        let mut state = self.state.lock();
        self.record(&mut state, "insert", table, Some(&item));
        if let Some(err) = state.scripted() {
            return Err(err);
        }

        if state.assign_ids {
            let id = format!("srv-{}", state.version + 1);
            item::set_str(&mut item, item::ID, &id);
        }
        let id = item::id(&item).unwrap_or_default().to_string();
        if let Some(existing) = state.tables.get(table).and_then(|t| t.get(&id)) {
            return Err(RemoteError::from_status(409, "conflict").with_server_item(existing.clone()));
        }

        state.stamp(&mut item);
        state
            .tables
            .entry(table.to_string())
            .or_default()
            .insert(id, item.clone());
        Ok(item)
    }

    async fn update(&self, table: &str, mut item: Value) -> RemoteResult<Value> {
        let mut state = self.state.lock();
        self.record(&mut state, "update", table, Some(&item));
        if let Some(err) = state.scripted() {
            return Err(err);
        }

        let id = item::id(&item).unwrap_or_default().to_string();
        let existing = state
            .tables
            .get(table)
            .and_then(|t| t.get(&id))
            .cloned()
            .ok_or_else(|| RemoteError::from_status(404, "not found"))?;
        if item::version(&item).is_some() && item::version(&item) != item::version(&existing) {
            return Err(RemoteError::conflict(existing));
        }

        state.stamp(&mut item);
        state
            .tables
            .entry(table.to_string())
            .or_default()
            .insert(id, item.clone());
        Ok(item)
    }

    async fn delete(&self, table: &str, id: &str, version: Option<String>) -> RemoteResult<()> {
        let mut state = self.state.lock();
        state.calls.push(Call {
            method: "delete",
            table: table.to_string(),
            id: Some(id.to_string()),
            item: None,
            version: version.clone(),
            skip: None,
            filter: false,
        });
        if let Some(err) = state.scripted() {
            return Err(err);
        }

        let existing = match state.tables.get(table).and_then(|t| t.get(id)) {
            Some(row) if !item::is_deleted(row) => row.clone(),
            _ => return Err(RemoteError::from_status(404, "not found")),
        };
        if version.is_some() && version.as_deref() != item::version(&existing) {
            return Err(RemoteError::conflict(existing));
        }

        let mut tombstone = existing;
        if let Some(obj) = tombstone.as_object_mut() {
            obj.insert(item::DELETED.to_string(), Value::Bool(true));
        }
        state.stamp(&mut tombstone);
        state
            .tables
            .entry(table.to_string())
            .or_default()
            .insert(id.to_string(), tombstone);
        Ok(())
    }

    async fn read(&self, query: &Query) -> RemoteResult<RemotePage> {
        let mut state = self.state.lock();
        state.calls.push(Call {
            method: "read",
            table: query.table.clone(),
            id: None,
            item: None,
            version: None,
            skip: query.skip,
            filter: query.filter.is_some(),
        });
        let items = match state.tables.get(&query.table) {
            Some(rows) => query.apply(rows.values()),
            None => Vec::new(),
        };
        Ok(RemotePage::new(items))
    }
}

/// A store whose writes to one table can be made to fail.
pub struct FailingStore {
    inner: MemoryStore,
    table: String,
    fail_upserts: AtomicBool,
    fail_deletes: AtomicBool,
}

impl FailingStore {
    pub fn new(table: &str) -> Self {
        Self {
            inner: MemoryStore::new(),
            table: table.to_string(),
            fail_upserts: AtomicBool::new(false),
            fail_deletes: AtomicBool::new(false),
        }
    }

    pub fn fail_upserts(&self, fail: bool) {
        self.fail_upserts.store(fail, Ordering::SeqCst);
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    fn check(&self, table: &str, flag: &AtomicBool) -> Result<()> {
        if table == self.table && flag.load(Ordering::SeqCst) {
            return Err(Error::Storage(format!("write to {} failed", table)));
        }
        Ok(())
    }
}

impl LocalStore for FailingStore {
    fn define_table(&self, schema: TableSchema) -> Result<()> {
        self.inner.define_table(schema)
    }

    fn upsert(&self, table: &str, item: Value, from_server: bool) -> Result<()> {
        self.check(table, &self.fail_upserts)?;
        self.inner.upsert(table, item, from_server)
    }

    fn lookup(&self, table: &str, id: &str) -> Result<Option<Value>> {
        self.inner.lookup(table, id)
    }

    fn delete(&self, table: &str, id: &str) -> Result<()> {
        self.check(table, &self.fail_deletes)?;
        self.inner.delete(table, id)
    }

    fn query(&self, query: &Query) -> Result<Vec<Value>> {
        self.inner.query(query)
    }
}

pub fn todos_schema() -> TableSchema {
    TableSchema::new("todos").with_system_columns()
}

pub type TestContext = SyncContext<MemoryStore, FakeRemote>;

/// A context with `todos` and `notes` tables over a fresh store.
pub fn context(remote: Arc<FakeRemote>) -> TestContext {
    context_with(Arc::new(MemoryStore::new()), remote, SyncSettings::default())
}

pub fn context_with(
    store: Arc<MemoryStore>,
    remote: Arc<FakeRemote>,
    settings: SyncSettings,
) -> TestContext {
    let ctx = SyncContext::new(store, remote, settings);
    ctx.define_table(todos_schema()).unwrap();
    ctx.define_table(TableSchema::new("notes").with_system_columns())
        .unwrap();
    ctx.initialize().unwrap();
    ctx
}
