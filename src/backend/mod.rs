pub mod memory;
pub mod normalize;
pub mod rest;

use std::cmp::Ordering;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::AppResult;

/// Table names on the hosted service.
pub mod tables {
    pub const POSTS: &str = "Posts";
    pub const POST_IMAGES: &str = "PostImages";
    pub const COMMENTS: &str = "Comments";
    pub const CONVERSATIONS: &str = "Conversations";
    pub const MESSAGES: &str = "Messages";
    pub const NOTIFICATIONS: &str = "UserNotifications";
    pub const PROFILES: &str = "profiles";
}

pub const IMAGE_BUCKET: &str = "post-images";

/// A single column predicate.
#[derive(Debug, Clone, PartialEq)]
pub enum Cond {
    Eq(String, Value),
    Neq(String, Value),
    In(String, Vec<Value>),
}

impl Cond {
    pub fn eq(column: &str, value: impl Into<Value>) -> Self {
        Cond::Eq(column.to_string(), value.into())
    }

    pub fn neq(column: &str, value: impl Into<Value>) -> Self {
        Cond::Neq(column.to_string(), value.into())
    }

    pub fn is_in(column: &str, values: Vec<Value>) -> Self {
        Cond::In(column.to_string(), values)
    }

    pub fn column(&self) -> &str {
        match self {
            Cond::Eq(c, _) | Cond::Neq(c, _) | Cond::In(c, _) => c,
        }
    }

    /// Evaluate against a JSON row. Missing columns read as null.
    pub fn matches(&self, row: &Value) -> bool {
        let field = |col: &str| row.get(col).cloned().unwrap_or(Value::Null);
        match self {
            Cond::Eq(col, value) => field(col) == *value,
            Cond::Neq(col, value) => field(col) != *value,
            Cond::In(col, values) => values.contains(&field(col)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

/// Row query: conjunctive predicates, an optional OR group, ordering,
/// and an inclusive row range. Mirrors the hosted service's
/// query/filter/order/range surface.
#[derive(Debug, Clone, Default)]
pub struct Select {
    pub conds: Vec<Cond>,
    pub any_of: Vec<Cond>,
    pub order: Option<(String, Direction)>,
    pub range: Option<(usize, usize)>,
}

impl Select {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, cond: Cond) -> Self {
        self.conds.push(cond);
        self
    }

    /// OR group: a row matches when any of these hold. ANDed with the
    /// other predicates.
    pub fn any_of(mut self, conds: Vec<Cond>) -> Self {
        self.any_of = conds;
        self
    }

    pub fn order(mut self, column: &str, direction: Direction) -> Self {
        self.order = Some((column.to_string(), direction));
        self
    }

    pub fn range(mut self, start: usize, end: usize) -> Self {
        self.range = Some((start, end));
        self
    }

    pub fn matches(&self, row: &Value) -> bool {
        self.conds.iter().all(|c| c.matches(row))
            && (self.any_of.is_empty() || self.any_of.iter().any(|c| c.matches(row)))
    }

    /// Evaluate the whole query over in-memory rows.
    pub fn apply(&self, rows: &[Value]) -> Vec<Value> {
        let mut out: Vec<Value> = rows.iter().filter(|r| self.matches(r)).cloned().collect();
        if let Some((column, direction)) = &self.order {
            out.sort_by(|a, b| {
                let ord = cmp_values(
                    a.get(column).unwrap_or(&Value::Null),
                    b.get(column).unwrap_or(&Value::Null),
                );
                match direction {
                    Direction::Asc => ord,
                    Direction::Desc => ord.reverse(),
                }
            });
        }
        if let Some((start, end)) = self.range {
            let start = start.min(out.len());
            let end = (end + 1).min(out.len());
            out = out[start..end].to_vec();
        }
        out
    }
}

/// Total order over scalar JSON values: nulls first, then booleans,
/// numbers, strings. RFC 3339 timestamps order correctly as strings.
fn cmp_values(a: &Value, b: &Value) -> Ordering {
    fn rank(v: &Value) -> u8 {
        match v {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            _ => 4,
        }
    }
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
pub struct AuthUser {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
}

/// A row-insert push event.
#[derive(Debug, Clone)]
pub struct RowEvent {
    pub table: String,
    pub row: Value,
}

/// Live push subscription. Dropping it tears the subscription down;
/// there is no replay of events missed while disconnected.
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<RowEvent>,
    _guard: SubscriptionGuard,
}

impl Subscription {
    pub fn new(rx: mpsc::UnboundedReceiver<RowEvent>, guard: SubscriptionGuard) -> Self {
        Self { rx, _guard: guard }
    }

    /// Next event, or `None` once the channel closes.
    pub async fn next_event(&mut self) -> Option<RowEvent> {
        self.rx.recv().await
    }

    pub fn try_next_event(&mut self) -> Option<RowEvent> {
        self.rx.try_recv().ok()
    }
}

/// Aborts the transport task (when there is one) as the subscription
/// goes out of scope.
#[derive(Default)]
pub struct SubscriptionGuard {
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl SubscriptionGuard {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn for_task(handle: tokio::task::JoinHandle<()>) -> Self {
        Self {
            handle: Some(handle),
        }
    }
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

/// The hosted backend service, abstracted to the operations this
/// application consumes. Rows travel as opaque JSON; normalization to
/// domain types happens in [`normalize`] at this boundary.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn select(&self, table: &str, query: Select) -> AppResult<Vec<Value>>;

    /// Insert rows, returning their stored representations (ids and
    /// server defaults filled in).
    async fn insert(&self, table: &str, rows: Vec<Value>) -> AppResult<Vec<Value>>;

    /// Merge `patch` into every row matching `conds`; returns the
    /// number of rows updated.
    async fn update(&self, table: &str, patch: Value, conds: Vec<Cond>) -> AppResult<u64>;

    async fn delete(&self, table: &str, conds: Vec<Cond>) -> AppResult<()>;

    async fn current_user(&self) -> AppResult<Option<AuthUser>>;

    async fn upload_file(
        &self,
        bucket: &str,
        path: &str,
        data: Bytes,
        content_type: &str,
    ) -> AppResult<()>;

    fn public_url(&self, bucket: &str, path: &str) -> String;

    /// Subscribe to row-insert events on `table` matching `conds`.
    async fn subscribe(&self, table: &str, conds: Vec<Cond>) -> AppResult<Subscription>;
}

pub type DynBackend = Arc<dyn Backend>;
