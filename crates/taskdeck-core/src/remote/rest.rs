//! PostgREST-style client for the hosted database.
//!
//! Tables live under `{url}/rest/v1/{table}`; single rows are addressed with an
//! `id=eq.{id}` filter and writes ask for the affected row back.

use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, instrument, warn};

use super::{RemoteCategory, RemoteClient, RemoteError, RemoteRecord, RemoteTask};
use crate::category::{CategoryPatch, NewCategory};
use crate::config::Config;
use crate::task::{NewTask, TaskPatch};

const TASKS_TABLE: &str = "tasks";
const CATEGORIES_TABLE: &str = "categories";

#[derive(Debug, Clone)]
pub struct RestClient {
    http: Client,
    base_url: String,
    api_key: Option<String>,
    access_token: Option<String>,
    timeout: Duration,
}

impl RestClient {
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        access_token: Option<String>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let base_url = base_url.trim().trim_end_matches('/').to_string();
        if !(base_url.starts_with("https://") || base_url.starts_with("http://")) {
            return Err(anyhow!("remote.url must be an http(s) URL, got {base_url:?}"));
        }

        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| anyhow!("failed to build HTTP client: {err}"))?;

        Ok(Self {
            http,
            base_url,
            api_key,
            access_token,
            timeout,
        })
    }

    pub fn from_config(cfg: &Config, timeout: Duration) -> anyhow::Result<Self> {
        let url = cfg
            .get_nonempty("remote.url")
            .ok_or_else(|| anyhow!("remote.url is not configured"))?;
        Self::new(
            &url,
            cfg.get_nonempty("remote.key"),
            cfg.get_nonempty("remote.token"),
            timeout,
        )
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{table}", self.base_url)
    }

    fn row_url(&self, table: &str, id: &str) -> String {
        format!("{}?id=eq.{}", self.table_url(table), encode_component(id))
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        let mut request = request.header("Accept", "application/json");
        if let Some(key) = &self.api_key {
            request = request.header("apikey", key);
        }
        if let Some(token) = self.access_token.as_ref().or(self.api_key.as_ref()) {
            request = request.bearer_auth(token);
        }
        request
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, RemoteError> {
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|err| self.transport_error(err))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let message = response
            .text()
            .await
            .unwrap_or_default()
            .trim()
            .to_string();
        warn!(status = status.as_u16(), message = %message, "service rejected request");
        Err(RemoteError::Service {
            status: status.as_u16(),
            message: if message.is_empty() {
                status.canonical_reason().unwrap_or("error").to_string()
            } else {
                message
            },
        })
    }

    async fn list<T: DeserializeOwned>(&self, table: &str) -> Result<Vec<T>, RemoteError> {
        let response = self
            .send(self.http.get(format!("{}?select=*", self.table_url(table))))
            .await?;
        decode(response).await
    }

    async fn insert<B, T>(&self, table: &str, body: &B) -> Result<T, RemoteError>
    where
        B: Serialize + Sync,
        T: DeserializeOwned,
    {
        let request = self
            .http
            .post(self.table_url(table))
            .header("Prefer", "return=representation")
            .json(body);
        let rows: Vec<T> = decode(self.send(request).await?).await?;
        single_row(rows, table, None)
    }

    async fn patch<B, T>(&self, table: &str, id: &str, body: &B) -> Result<T, RemoteError>
    where
        B: Serialize + Sync,
        T: DeserializeOwned,
    {
        let request = self
            .http
            .patch(self.row_url(table, id))
            .header("Prefer", "return=representation")
            .json(body);
        let rows: Vec<T> = decode(self.send(request).await?).await?;
        single_row(rows, table, Some(id))
    }

    async fn remove(&self, table: &str, id: &str) -> Result<(), RemoteError> {
        self.send(self.http.delete(self.row_url(table, id)))
            .await?;
        Ok(())
    }

    fn transport_error(&self, err: reqwest::Error) -> RemoteError {
        if err.is_timeout() {
            RemoteError::Timeout(self.timeout)
        } else {
            RemoteError::Transport(err.to_string())
        }
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, RemoteError> {
    let bytes = response
        .bytes()
        .await
        .map_err(|err| RemoteError::Transport(err.to_string()))?;
    serde_json::from_slice(&bytes).map_err(|err| RemoteError::Decode(err.to_string()))
}

fn single_row<T>(mut rows: Vec<T>, table: &str, id: Option<&str>) -> Result<T, RemoteError> {
    match rows.len() {
        1 => rows.pop().ok_or_else(|| RemoteError::Decode("empty response".to_string())),
        0 => Err(RemoteError::Service {
            status: StatusCode::NOT_FOUND.as_u16(),
            message: format!("no {table} row matched {}", id.unwrap_or("insert")),
        }),
        n => Err(RemoteError::Decode(format!(
            "expected one {table} row, got {n}"
        ))),
    }
}

/// Percent-encodes everything outside the RFC 3986 unreserved set.
fn encode_component(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.' | b'~') {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

#[async_trait]
impl RemoteClient for RestClient {
    #[instrument(skip(self))]
    async fn list_tasks(&self) -> Result<Vec<RemoteTask>, RemoteError> {
        let rows: Vec<RemoteTask> = self.list(TASKS_TABLE).await?;
        debug!(count = rows.len(), "fetched tasks");
        Ok(rows)
    }

    #[instrument(skip(self, task), fields(title = %task.title))]
    async fn create_task(&self, task: &NewTask) -> Result<RemoteTask, RemoteError> {
        self.insert(TASKS_TABLE, task).await
    }

    #[instrument(skip(self, patch))]
    async fn update_task(&self, id: &str, patch: &TaskPatch) -> Result<RemoteTask, RemoteError> {
        self.patch(TASKS_TABLE, id, patch).await
    }

    #[instrument(skip(self))]
    async fn delete_task(&self, id: &str) -> Result<(), RemoteError> {
        self.remove(TASKS_TABLE, id).await
    }

    #[instrument(skip(self))]
    async fn list_categories(&self) -> Result<Vec<RemoteCategory>, RemoteError> {
        let rows: Vec<RemoteRecord<_>> = self.list(CATEGORIES_TABLE).await?;
        debug!(count = rows.len(), "fetched categories");
        Ok(rows)
    }

    #[instrument(skip(self, category), fields(name = %category.name))]
    async fn create_category(
        &self,
        category: &NewCategory,
    ) -> Result<RemoteCategory, RemoteError> {
        self.insert(CATEGORIES_TABLE, category).await
    }

    #[instrument(skip(self, patch))]
    async fn update_category(
        &self,
        id: &str,
        patch: &CategoryPatch,
    ) -> Result<RemoteCategory, RemoteError> {
        self.patch(CATEGORIES_TABLE, id, patch).await
    }

    #[instrument(skip(self))]
    async fn delete_category(&self, id: &str) -> Result<(), RemoteError> {
        self.remove(CATEGORIES_TABLE, id).await
    }
}
