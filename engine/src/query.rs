//! Table queries.
//!
//! A [`Query`] is the filter/order/top/skip description shared by local reads,
//! purges and remote pulls. The local store evaluates it directly; remote
//! clients translate it to whatever their wire format needs.

use crate::{item, TableName};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;

/// Comparison operators usable in a filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

/// A filter expression over item columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Filter {
    Compare {
        column: String,
        op: CompareOp,
        value: Value,
    },
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
}

impl Filter {
    /// `column == value`
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(column, CompareOp::Eq, value)
    }

    /// `column != value`
    pub fn ne(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(column, CompareOp::Ne, value)
    }

    /// `column > value`
    pub fn gt(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(column, CompareOp::Gt, value)
    }

    /// `column >= value`
    pub fn ge(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(column, CompareOp::Ge, value)
    }

    /// `column < value`
    pub fn lt(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(column, CompareOp::Lt, value)
    }

    /// `column <= value`
    pub fn le(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(column, CompareOp::Le, value)
    }

    fn compare(column: impl Into<String>, op: CompareOp, value: impl Into<Value>) -> Self {
        Filter::Compare {
            column: column.into(),
            op,
            value: value.into(),
        }
    }

    /// Combine with another filter; nested `And`s are flattened.
    pub fn and(self, other: Filter) -> Self {
        match self {
            Filter::And(mut parts) => {
                parts.push(other);
                Filter::And(parts)
            }
            first => Filter::And(vec![first, other]),
        }
    }

    /// Evaluate against an item. Missing columns compare as null.
    pub fn matches(&self, item: &Value) -> bool {
        match self {
            Filter::Compare { column, op, value } => {
                let actual = item.get(column).unwrap_or(&Value::Null);
                let ord = compare_values(actual, value);
                match op {
                    CompareOp::Eq => ord == Ordering::Equal,
                    CompareOp::Ne => ord != Ordering::Equal,
                    // Ordered comparisons against null never match
                    _ if actual.is_null() || value.is_null() => false,
                    CompareOp::Gt => ord == Ordering::Greater,
                    CompareOp::Ge => ord != Ordering::Less,
                    CompareOp::Lt => ord == Ordering::Less,
                    CompareOp::Le => ord != Ordering::Greater,
                }
            }
            Filter::And(parts) => parts.iter().all(|f| f.matches(item)),
            Filter::Or(parts) => parts.iter().any(|f| f.matches(item)),
            Filter::Not(inner) => !inner.matches(item),
        }
    }
}

/// Total order over JSON values used for filtering and sorting.
///
/// Null sorts first. Strings that both parse as RFC 3339 timestamps compare
/// as instants, so `Z` and `+00:00` spellings agree.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Less,
        (_, Value::Null) => Ordering::Greater,
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or(f64::NAN);
            let y = y.as_f64().unwrap_or(f64::NAN);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => {
            match (
                chrono::DateTime::parse_from_rfc3339(x),
                chrono::DateTime::parse_from_rfc3339(y),
            ) {
                (Ok(dx), Ok(dy)) => dx.cmp(&dy),
                _ => x.cmp(y),
            }
        }
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Asc,
    Desc,
}

/// One ordering clause.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderBy {
    pub column: String,
    pub direction: Direction,
}

impl OrderBy {
    pub fn asc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            direction: Direction::Asc,
        }
    }

    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            direction: Direction::Desc,
        }
    }
}

/// A query against one table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Query {
    /// Target table
    pub table: TableName,
    /// Row filter
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<Filter>,
    /// Ordering clauses, applied in order
    #[serde(default)]
    pub order_by: Vec<OrderBy>,
    /// Maximum rows to return
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top: Option<i64>,
    /// Rows to skip before returning
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip: Option<i64>,
    /// Include soft-deleted rows
    #[serde(default)]
    pub include_deleted: bool,
    /// Ask the service for an inline total count
    #[serde(default)]
    pub include_total_count: bool,
    /// Column projection; empty means all columns
    #[serde(default)]
    pub selection: Vec<String>,
}

impl Query {
    /// Create a query returning every row of a table.
    pub fn new(table: impl Into<TableName>) -> Self {
        Self {
            table: table.into(),
            filter: None,
            order_by: Vec::new(),
            top: None,
            skip: None,
            include_deleted: false,
            include_total_count: false,
            selection: Vec::new(),
        }
    }

    /// Add a filter, ANDed with any existing one.
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = Some(match self.filter.take() {
            Some(existing) => existing.and(filter),
            None => filter,
        });
        self
    }

    /// Append an ascending ordering clause.
    pub fn order_by(mut self, column: impl Into<String>) -> Self {
        self.order_by.push(OrderBy::asc(column));
        self
    }

    /// Append a descending ordering clause.
    pub fn order_by_desc(mut self, column: impl Into<String>) -> Self {
        self.order_by.push(OrderBy::desc(column));
        self
    }

    /// Limit the number of rows.
    pub fn top(mut self, top: i64) -> Self {
        self.top = Some(top);
        self
    }

    /// Skip rows.
    pub fn skip(mut self, skip: i64) -> Self {
        self.skip = Some(skip);
        self
    }

    /// Include soft-deleted rows.
    pub fn include_deleted(mut self) -> Self {
        self.include_deleted = true;
        self
    }

    /// Request an inline total count.
    pub fn include_total_count(mut self) -> Self {
        self.include_total_count = true;
        self
    }

    /// Project to the given columns.
    pub fn select<I, C>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<String>,
    {
        self.selection = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Evaluate the query over a set of rows.
    pub fn apply<'a>(&self, rows: impl IntoIterator<Item = &'a Value>) -> Vec<Value> {
        let mut matched: Vec<&Value> = rows
            .into_iter()
            .filter(|row| self.include_deleted || !item::is_deleted(row))
            .filter(|row| self.filter.as_ref().map_or(true, |f| f.matches(row)))
            .collect();

        if !self.order_by.is_empty() {
            matched.sort_by(|a, b| {
                for clause in &self.order_by {
                    let av = a.get(&clause.column).unwrap_or(&Value::Null);
                    let bv = b.get(&clause.column).unwrap_or(&Value::Null);
                    let ord = match clause.direction {
                        Direction::Asc => compare_values(av, bv),
                        Direction::Desc => compare_values(bv, av),
                    };
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                Ordering::Equal
            });
        }

        let skip = self.skip.unwrap_or(0).max(0) as usize;
        let top = match self.top {
            Some(top) if top >= 0 => top as usize,
            _ => usize::MAX,
        };

        matched
            .into_iter()
            .skip(skip)
            .take(top)
            .map(|row| self.project(row))
            .collect()
    }

    fn project(&self, row: &Value) -> Value {
        if self.selection.is_empty() {
            return row.clone();
        }
        match row {
            Value::Object(obj) => Value::Object(
                obj.iter()
                    .filter(|(k, _)| self.selection.iter().any(|c| c == *k))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            ),
            other => other.clone(),
        }
    }
}
