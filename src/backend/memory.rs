//! Deterministic in-memory stand-in for the hosted service. Drives the
//! test suites and the CLI's offline demo mode; behavior mirrors the
//! REST backend (id assignment, insert push events) without a network.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::backend::{
    AuthUser, Backend, Cond, RowEvent, Select, Subscription, SubscriptionGuard,
};
use crate::error::{AppError, AppResult};

struct Subscriber {
    table: String,
    conds: Vec<Cond>,
    tx: mpsc::UnboundedSender<RowEvent>,
}

#[derive(Default)]
pub struct MemoryBackend {
    tables: Mutex<HashMap<String, Vec<Value>>>,
    user: Mutex<Option<AuthUser>>,
    uploads: Mutex<HashMap<String, Bytes>>,
    subscribers: Mutex<Vec<Subscriber>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sign_in(&self, user_id: &str) {
        *self.user.lock().unwrap() = Some(AuthUser {
            id: user_id.to_string(),
            email: Some(format!("{}@example.org", user_id)),
        });
    }

    pub fn sign_out(&self) {
        *self.user.lock().unwrap() = None;
    }

    pub fn row_count(&self, table: &str) -> usize {
        self.tables
            .lock()
            .unwrap()
            .get(table)
            .map(|rows| rows.len())
            .unwrap_or(0)
    }

    pub fn uploaded(&self, bucket: &str, path: &str) -> Option<Bytes> {
        self.uploads
            .lock()
            .unwrap()
            .get(&format!("{}/{}", bucket, path))
            .cloned()
    }

    fn notify(&self, table: &str, row: &Value) {
        let mut subscribers = self.subscribers.lock().unwrap();
        subscribers.retain(|sub| {
            if sub.table != table || !sub.conds.iter().all(|c| c.matches(row)) {
                return !sub.tx.is_closed();
            }
            sub.tx
                .send(RowEvent {
                    table: table.to_string(),
                    row: row.clone(),
                })
                .is_ok()
        });
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn select(&self, table: &str, query: Select) -> AppResult<Vec<Value>> {
        let tables = self.tables.lock().unwrap();
        let rows = tables.get(table).cloned().unwrap_or_default();
        Ok(query.apply(&rows))
    }

    async fn insert(&self, table: &str, rows: Vec<Value>) -> AppResult<Vec<Value>> {
        let mut stored = Vec::with_capacity(rows.len());
        {
            let mut tables = self.tables.lock().unwrap();
            let bucket = tables.entry(table.to_string()).or_default();
            for mut row in rows {
                let obj = row
                    .as_object_mut()
                    .ok_or_else(|| AppError::Backend("insert rows must be objects".into()))?;
                obj.entry("id")
                    .or_insert_with(|| Value::String(uuid::Uuid::now_v7().to_string()));
                bucket.push(row.clone());
                stored.push(row);
            }
        }
        for row in &stored {
            self.notify(table, row);
        }
        Ok(stored)
    }

    async fn update(&self, table: &str, patch: Value, conds: Vec<Cond>) -> AppResult<u64> {
        let patch = patch
            .as_object()
            .ok_or_else(|| AppError::Backend("update patch must be an object".into()))?
            .clone();
        let mut tables = self.tables.lock().unwrap();
        let Some(rows) = tables.get_mut(table) else {
            return Ok(0);
        };
        let mut updated = 0;
        for row in rows.iter_mut() {
            if conds.iter().all(|c| c.matches(row)) {
                if let Some(obj) = row.as_object_mut() {
                    for (key, value) in &patch {
                        obj.insert(key.clone(), value.clone());
                    }
                    updated += 1;
                }
            }
        }
        Ok(updated)
    }

    async fn delete(&self, table: &str, conds: Vec<Cond>) -> AppResult<()> {
        let mut tables = self.tables.lock().unwrap();
        if let Some(rows) = tables.get_mut(table) {
            rows.retain(|row| !conds.iter().all(|c| c.matches(row)));
        }
        Ok(())
    }

    async fn current_user(&self) -> AppResult<Option<AuthUser>> {
        Ok(self.user.lock().unwrap().clone())
    }

    async fn upload_file(
        &self,
        bucket: &str,
        path: &str,
        data: Bytes,
        _content_type: &str,
    ) -> AppResult<()> {
        self.uploads
            .lock()
            .unwrap()
            .insert(format!("{}/{}", bucket, path), data);
        Ok(())
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        format!("memory://{}/{}", bucket, path)
    }

    async fn subscribe(&self, table: &str, conds: Vec<Cond>) -> AppResult<Subscription> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().unwrap().push(Subscriber {
            table: table.to_string(),
            conds,
            tx,
        });
        Ok(Subscription::new(rx, SubscriptionGuard::none()))
    }
}
