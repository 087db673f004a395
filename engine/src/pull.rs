//! Pulling remote rows into the local store.
//!
//! A pull pages through the service with skip/top. [`PullStrategy`] owns the
//! paging state; [`Puller`] feeds each page into the local store.
//!
//! # Incremental pulls
//!
//! A pull tagged with a query id only asks for rows changed since the last
//! pull of that query. Rows are ordered by `updatedAt` then `id`, and the
//! highest `updatedAt` seen (the delta token) is stored in the `__config`
//! table after every page. When a page moves the token forward, the filter
//! is rebuilt on the new token and skip restarts at the number of rows
//! already read that share it.

use crate::config::{DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};
use crate::query::OrderBy;
use crate::queue::OperationQueue;
use crate::remote::RemoteTableClient;
use crate::{error::Result, item, ColumnType, Error, Filter, LocalStore, Query, TableSchema};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{json, Value};

/// Local table holding engine settings such as delta tokens.
pub const CONFIG_TABLE: &str = "__config";

const DELTA_TOKEN_PREFIX: &str = "deltaToken";

/// Schema of the config table.
pub fn config_table_schema() -> TableSchema {
    TableSchema::new(CONFIG_TABLE).with_column("value", ColumnType::String)
}

/// Config row id for a query's delta token.
pub fn delta_token_key(table: &str, query_id: &str) -> String {
    format!("{}|{}|{}", DELTA_TOKEN_PREFIX, table, query_id)
}

/// Read a stored delta token.
pub fn read_delta_token<S: LocalStore>(
    store: &S,
    table: &str,
    query_id: &str,
) -> Result<Option<DateTime<Utc>>> {
    let row = store.lookup(CONFIG_TABLE, &delta_token_key(table, query_id))?;
    Ok(row
        .as_ref()
        .and_then(|row| row.get("value"))
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc)))
}

/// Store a delta token.
pub fn write_delta_token<S: LocalStore>(
    store: &S,
    table: &str,
    query_id: &str,
    token: DateTime<Utc>,
) -> Result<()> {
    let row = json!({
        "id": delta_token_key(table, query_id),
        "value": format_token(token),
    });
    store.upsert(CONFIG_TABLE, row, false)
}

/// Remove every delta token of a table. Returns how many were removed.
pub fn clear_delta_tokens<S: LocalStore>(store: &S, table: &str) -> Result<usize> {
    let prefix = format!("{}|{}|", DELTA_TOKEN_PREFIX, table);
    let rows = store.query(&Query::new(CONFIG_TABLE))?;
    let mut removed = 0;
    for id in rows.iter().filter_map(item::id).filter(|id| id.starts_with(&prefix)) {
        store.delete(CONFIG_TABLE, id)?;
        removed += 1;
    }
    Ok(removed)
}

fn format_token(token: DateTime<Utc>) -> String {
    token.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[derive(Debug, Clone)]
struct Incremental {
    query_id: String,
    /// Caller's own filter, before the token clause is added
    base_filter: Option<Filter>,
    token: Option<DateTime<Utc>>,
    /// Highest `updatedAt` seen so far
    max_seen: Option<DateTime<Utc>>,
    /// Rows read with `updatedAt == max_seen`
    at_max: i64,
}

/// Paging state for one pull.
#[derive(Debug, Clone)]
pub struct PullStrategy {
    query: Query,
    page_size: i64,
    initial_skip: i64,
    total_read: i64,
    incremental: Option<Incremental>,
}

impl PullStrategy {
    /// A full pull of `query`.
    pub fn new(query: Query) -> Self {
        Self {
            query,
            page_size: DEFAULT_PAGE_SIZE,
            initial_skip: 0,
            total_read: 0,
            incremental: None,
        }
    }

    /// An incremental pull resuming from `token`.
    pub fn incremental(
        query: Query,
        query_id: impl Into<String>,
        token: Option<DateTime<Utc>>,
    ) -> Self {
        let base_filter = query.filter.clone();
        Self {
            incremental: Some(Incremental {
                query_id: query_id.into(),
                base_filter,
                token,
                max_seen: token,
                at_max: 0,
            }),
            ..Self::new(query)
        }
    }

    /// Builder-style method to set the default page size.
    pub fn with_page_size(mut self, page_size: i64) -> Self {
        self.page_size = page_size.clamp(1, MAX_PAGE_SIZE);
        self
    }

    /// Normalize the query for paging. Call once before the first page.
    pub fn initialize(&mut self) {
        self.query.include_deleted = true;
        self.query.include_total_count = false;
        self.query.selection.clear();

        self.query.top = Some(match self.query.top {
            Some(top) if top > MAX_PAGE_SIZE => MAX_PAGE_SIZE,
            Some(top) if top > 0 => top,
            _ => self.page_size,
        });

        if self.incremental.is_some() {
            self.query.order_by = vec![OrderBy::asc(item::UPDATED_AT), OrderBy::asc(item::ID)];
            self.initial_skip = 0;
            self.rebuild_filter();
        } else {
            if self.query.order_by.is_empty() {
                self.query.order_by.push(OrderBy::asc(item::ID));
            }
            self.initial_skip = self.query.skip.unwrap_or(0).max(0);
        }

        self.query.skip = Some(self.initial_skip);
        self.total_read = 0;
    }

    /// Track a pulled row. Only matters for incremental pulls.
    pub fn on_item_pulled(&mut self, row: &Value) {
        let Some(inc) = self.incremental.as_mut() else {
            return;
        };
        let Some(updated_at) = item::updated_at(row) else {
            return;
        };
        match inc.max_seen {
            Some(max) if updated_at < max => {}
            Some(max) if updated_at == max => inc.at_max += 1,
            _ => {
                inc.max_seen = Some(updated_at);
                inc.at_max = 1;
            }
        }
    }

    /// Advance past a page of `last_page_count` rows. Returns `false` when
    /// the pull is finished, which happens only on an empty page.
    pub fn move_to_next_page(&mut self, last_page_count: usize) -> bool {
        if last_page_count == 0 {
            return false;
        }
        let count = last_page_count as i64;
        self.total_read += count;

        let advanced = match self.incremental.as_mut() {
            Some(inc) if inc.max_seen > inc.token => {
                inc.token = inc.max_seen;
                Some(inc.at_max)
            }
            _ => None,
        };

        match advanced {
            Some(already_read) => {
                self.rebuild_filter();
                self.query.skip = Some(already_read);
            }
            None => {
                let skip = match self.incremental {
                    Some(_) => self.query.skip.unwrap_or(0) + count,
                    None => self.initial_skip + self.total_read,
                };
                self.query.skip = Some(skip);
            }
        }
        true
    }

    fn rebuild_filter(&mut self) {
        let Some(inc) = &self.incremental else {
            return;
        };
        let token_clause = inc
            .token
            .map(|token| Filter::ge(item::UPDATED_AT, format_token(token)));
        self.query.filter = match (inc.base_filter.clone(), token_clause) {
            (Some(base), Some(clause)) => Some(base.and(clause)),
            (base, clause) => base.or(clause),
        };
    }

    /// The query for the next page.
    pub fn query(&self) -> &Query {
        &self.query
    }

    pub fn skip(&self) -> i64 {
        self.query.skip.unwrap_or(0)
    }

    pub fn total_read(&self) -> i64 {
        self.total_read
    }

    pub fn query_id(&self) -> Option<&str> {
        self.incremental.as_ref().map(|inc| inc.query_id.as_str())
    }

    pub fn delta_token(&self) -> Option<DateTime<Utc>> {
        self.incremental.as_ref().and_then(|inc| inc.token)
    }
}

/// Outcome of one pull.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PullResult {
    /// Pages requested, the final empty page included
    pub pages: usize,
    /// Rows written from the service
    pub upserted: usize,
    /// Rows removed because the service soft-deleted them
    pub deleted: usize,
    /// Rows left alone because they have queued local changes
    pub skipped: usize,
}

/// Runs a [`PullStrategy`] against the service and the local store.
pub struct Puller<'a, S: LocalStore, R: RemoteTableClient> {
    queue: &'a OperationQueue<S>,
    store: &'a S,
    remote: &'a R,
}

impl<'a, S: LocalStore, R: RemoteTableClient> Puller<'a, S, R> {
    pub fn new(queue: &'a OperationQueue<S>, store: &'a S, remote: &'a R) -> Self {
        Self {
            queue,
            store,
            remote,
        }
    }

    /// Page through the service until an empty page comes back.
    pub async fn run(&self, mut strategy: PullStrategy) -> Result<PullResult> {
        strategy.initialize();
        let table = strategy.query().table.clone();
        let mut result = PullResult::default();

        loop {
            let page = self.remote.read(strategy.query()).await?;
            result.pages += 1;
            tracing::debug!(
                table = %table,
                skip = strategy.skip(),
                rows = page.items.len(),
                "pulled page"
            );

            for row in &page.items {
                self.apply_row(&table, row, &mut result)?;
                strategy.on_item_pulled(row);
            }

            let before = strategy.delta_token();
            if !strategy.move_to_next_page(page.items.len()) {
                break;
            }
            if let (Some(query_id), Some(token)) = (strategy.query_id(), strategy.delta_token()) {
                if Some(token) != before {
                    write_delta_token(self.store, &table, query_id, token)?;
                }
            }
        }

        tracing::info!(
            table = %table,
            pages = result.pages,
            upserted = result.upserted,
            deleted = result.deleted,
            skipped = result.skipped,
            "pull finished"
        );
        Ok(result)
    }

    fn apply_row(&self, table: &str, row: &Value, result: &mut PullResult) -> Result<()> {
        let id = item::id(row)
            .ok_or_else(|| Error::Validation("pulled row has no id".into()))?;

        if self.queue.get_by_item(table, id).is_some() {
            result.skipped += 1;
            return Ok(());
        }

        if item::is_deleted(row) {
            self.store.delete(table, id)?;
            result.deleted += 1;
        } else {
            self.store.upsert(table, row.clone(), true)?;
            result.upserted += 1;
        }
        Ok(())
    }
}
