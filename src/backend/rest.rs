//! REST + websocket client for the hosted backend service. Speaks the
//! service's row dialect (`col=eq.value` filters, `order=` keys, Range
//! headers) and its phoenix-style realtime channel for row-insert push.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, RANGE};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use url::Url;

use crate::backend::{
    AuthUser, Backend, Cond, Direction, RowEvent, Select, Subscription, SubscriptionGuard,
};
use crate::error::{AppError, AppResult};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

pub struct RestBackend {
    http: reqwest::Client,
    base: Url,
    api_key: String,
    access_token: Option<String>,
}

impl RestBackend {
    pub fn new(base_url: &str, api_key: &str, access_token: Option<String>) -> AppResult<Self> {
        let base = Url::parse(base_url)
            .map_err(|e| AppError::Backend(format!("invalid backend url: {}", e)))?;
        Ok(Self {
            http: reqwest::Client::new(),
            base,
            api_key: api_key.to_string(),
            access_token,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base.as_str().trim_end_matches('/'), path)
    }

    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Ok(value) = HeaderValue::from_str(&self.api_key) {
            headers.insert("apikey", value);
        }
        let bearer = self.access_token.as_deref().unwrap_or(&self.api_key);
        if let Ok(value) = HeaderValue::from_str(&format!("Bearer {}", bearer)) {
            headers.insert(AUTHORIZATION, value);
        }
        headers
    }

    fn cond_params(conds: &[Cond]) -> Vec<(String, String)> {
        conds
            .iter()
            .map(|cond| match cond {
                Cond::Eq(col, v) => (col.clone(), format!("eq.{}", render(v))),
                Cond::Neq(col, v) => (col.clone(), format!("neq.{}", render(v))),
                Cond::In(col, vs) => (
                    col.clone(),
                    format!(
                        "in.({})",
                        vs.iter().map(render).collect::<Vec<_>>().join(",")
                    ),
                ),
            })
            .collect()
    }

    fn query_params(query: &Select) -> Vec<(String, String)> {
        let mut params = Self::cond_params(&query.conds);
        if !query.any_of.is_empty() {
            let joined = query
                .any_of
                .iter()
                .map(|cond| match cond {
                    Cond::Eq(col, v) => format!("{}.eq.{}", col, render(v)),
                    Cond::Neq(col, v) => format!("{}.neq.{}", col, render(v)),
                    Cond::In(col, vs) => format!(
                        "{}.in.({})",
                        col,
                        vs.iter().map(render).collect::<Vec<_>>().join(",")
                    ),
                })
                .collect::<Vec<_>>()
                .join(",");
            params.push(("or".to_string(), format!("({})", joined)));
        }
        if let Some((column, direction)) = &query.order {
            let dir = match direction {
                Direction::Asc => "asc",
                Direction::Desc => "desc",
            };
            params.push(("order".to_string(), format!("{}.{}", column, dir)));
        }
        params
    }
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[async_trait]
impl Backend for RestBackend {
    async fn select(&self, table: &str, query: Select) -> AppResult<Vec<Value>> {
        let mut request = self
            .http
            .get(self.endpoint(&format!("rest/v1/{}", table)))
            .headers(self.headers())
            .query(&RestBackend::query_params(&query));
        if let Some((start, end)) = query.range {
            request = request
                .header("Range-Unit", "items")
                .header(RANGE, format!("{}-{}", start, end));
        }
        let rows = request
            .send()
            .await?
            .error_for_status()?
            .json::<Vec<Value>>()
            .await?;
        Ok(rows)
    }

    async fn insert(&self, table: &str, rows: Vec<Value>) -> AppResult<Vec<Value>> {
        let stored = self
            .http
            .post(self.endpoint(&format!("rest/v1/{}", table)))
            .headers(self.headers())
            .header("Prefer", "return=representation")
            .json(&rows)
            .send()
            .await?
            .error_for_status()?
            .json::<Vec<Value>>()
            .await?;
        Ok(stored)
    }

    async fn update(&self, table: &str, patch: Value, conds: Vec<Cond>) -> AppResult<u64> {
        let rows = self
            .http
            .patch(self.endpoint(&format!("rest/v1/{}", table)))
            .headers(self.headers())
            .header("Prefer", "return=representation")
            .query(&RestBackend::cond_params(&conds))
            .json(&patch)
            .send()
            .await?
            .error_for_status()?
            .json::<Vec<Value>>()
            .await?;
        Ok(rows.len() as u64)
    }

    async fn delete(&self, table: &str, conds: Vec<Cond>) -> AppResult<()> {
        self.http
            .delete(self.endpoint(&format!("rest/v1/{}", table)))
            .headers(self.headers())
            .query(&RestBackend::cond_params(&conds))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn current_user(&self) -> AppResult<Option<AuthUser>> {
        // Without a session token there is no one to ask about.
        if self.access_token.is_none() {
            return Ok(None);
        }
        let response = self
            .http
            .get(self.endpoint("auth/v1/user"))
            .headers(self.headers())
            .send()
            .await?;
        if response.status() == reqwest::StatusCode::UNAUTHORIZED
            || response.status() == reqwest::StatusCode::FORBIDDEN
        {
            return Ok(None);
        }
        let user = response.error_for_status()?.json::<AuthUser>().await?;
        Ok(Some(user))
    }

    async fn upload_file(
        &self,
        bucket: &str,
        path: &str,
        data: Bytes,
        content_type: &str,
    ) -> AppResult<()> {
        self.http
            .post(self.endpoint(&format!("storage/v1/object/{}/{}", bucket, path)))
            .headers(self.headers())
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(data)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        self.endpoint(&format!("storage/v1/object/public/{}/{}", bucket, path))
    }

    async fn subscribe(&self, table: &str, conds: Vec<Cond>) -> AppResult<Subscription> {
        let mut ws_url = self.base.clone();
        let scheme = if ws_url.scheme() == "https" { "wss" } else { "ws" };
        ws_url
            .set_scheme(scheme)
            .map_err(|_| AppError::Realtime("cannot derive websocket url".into()))?;
        ws_url.set_path("realtime/v1/websocket");
        ws_url
            .query_pairs_mut()
            .append_pair("apikey", &self.api_key)
            .append_pair("vsn", "1.0.0");

        // The channel filters by at most one column predicate; remaining
        // predicates are applied to decoded rows before forwarding.
        let topic = match conds.iter().find_map(|c| match c {
            Cond::Eq(col, v) => Some(format!("{}=eq.{}", col, render(v))),
            _ => None,
        }) {
            Some(filter) => format!("realtime:public:{}:{}", table, filter),
            None => format!("realtime:public:{}", table),
        };

        let (stream, _) = connect_async(ws_url.as_str())
            .await
            .map_err(|e| AppError::Realtime(e.to_string()))?;
        let (mut sink, mut source) = stream.split();

        let join = PhoenixMessage {
            topic: topic.clone(),
            event: "phx_join".to_string(),
            payload: json!({}),
            reference: Some("1".to_string()),
        };
        sink.send(WsMessage::Text(serde_json::to_string(&join)?))
            .await
            .map_err(|e| AppError::Realtime(e.to_string()))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let table_name = table.to_string();
        let handle = tokio::spawn(async move {
            let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
            let mut heartbeat_ref: u64 = 2;
            loop {
                tokio::select! {
                    _ = heartbeat.tick() => {
                        let beat = PhoenixMessage {
                            topic: "phoenix".to_string(),
                            event: "heartbeat".to_string(),
                            payload: json!({}),
                            reference: Some(heartbeat_ref.to_string()),
                        };
                        heartbeat_ref += 1;
                        let Ok(text) = serde_json::to_string(&beat) else { break };
                        if sink.send(WsMessage::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    incoming = source.next() => {
                        let Some(Ok(frame)) = incoming else { break };
                        let WsMessage::Text(text) = frame else { continue };
                        let Ok(message) = serde_json::from_str::<PhoenixMessage>(&text) else {
                            continue;
                        };
                        if message.event != "INSERT" {
                            continue;
                        }
                        let Some(record) = message.payload.get("record").cloned() else {
                            continue;
                        };
                        if !conds.iter().all(|c| c.matches(&record)) {
                            continue;
                        }
                        if tx
                            .send(RowEvent { table: table_name.clone(), row: record })
                            .is_err()
                        {
                            break;
                        }
                    }
                }
            }
        });

        Ok(Subscription::new(rx, SubscriptionGuard::for_task(handle)))
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct PhoenixMessage {
    topic: String,
    event: String,
    payload: Value,
    #[serde(rename = "ref")]
    reference: Option<String>,
}
