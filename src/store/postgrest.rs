//! Hosted store client
//!
//! Talks to a PostgREST endpoint (`/rest/v1`) and the companion Storage API
//! (`/storage/v1`) with a service key.

use super::{BlobStore, Filter, Query, Rows, Store, StoreError};
use async_trait::async_trait;
use reqwest::{header, Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

/// Hosted store connection settings
#[derive(Debug, Clone)]
pub struct PostgrestConfig {
    /// Project base URL, e.g. `https://xyz.supabase.co`
    pub url: String,
    /// Service role key (or anon key)
    pub api_key: String,
}

/// PostgREST / Storage client
#[derive(Clone)]
pub struct PostgrestStore {
    client: Client,
    config: PostgrestConfig,
}

/// Error body returned by PostgREST and Storage
#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl PostgrestStore {
    pub fn new(config: PostgrestConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    fn rest_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.config.url.trim_end_matches('/'), table)
    }

    fn storage_url(&self, bucket: &str, path: &str) -> String {
        format!(
            "{}/storage/v1/object/{}/{}",
            self.config.url.trim_end_matches('/'),
            bucket,
            path
        )
    }

    /// Public URL of an object in a public bucket
    pub fn public_url(&self, bucket: &str, path: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{}/{}",
            self.config.url.trim_end_matches('/'),
            bucket,
            path
        )
    }

    fn authed(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header("apikey", &self.config.api_key)
            .bearer_auth(&self.config.api_key)
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response, StoreError> {
        let response = self
            .authed(builder)
            .send()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status();
        let message = match response.json::<ErrorBody>().await {
            Ok(body) => body
                .message
                .or(body.error)
                .unwrap_or_else(|| status.to_string()),
            Err(_) => status.to_string(),
        };

        debug!("Store request failed ({}): {}", status, message);

        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            Err(StoreError::Unavailable(message))
        } else {
            Err(StoreError::Rejected(message))
        }
    }
}

/// Quote a value for use inside a PostgREST list or logic tree
fn quote(value: &str) -> String {
    if value.contains([',', '(', ')', '"', ' ', '*']) {
        format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
    } else {
        value.to_string()
    }
}

/// Translate filters to PostgREST query parameters
pub(crate) fn filter_params(filters: &[Filter]) -> Vec<(String, String)> {
    filters
        .iter()
        .map(|filter| match filter {
            Filter::Eq(column, value) => (column.clone(), format!("eq.{}", value)),
            Filter::Gte(column, value) => (column.clone(), format!("gte.{}", value)),
            Filter::In(column, values) => (
                column.clone(),
                format!(
                    "in.({})",
                    values.iter().map(|v| quote(v)).collect::<Vec<_>>().join(",")
                ),
            ),
            Filter::Search(columns, term) => {
                let pattern = format!("*{}*", term.replace(['*', ',', '(', ')'], ""));
                let parts: Vec<String> = columns
                    .iter()
                    .map(|c| format!("{}.ilike.{}", c, pattern))
                    .collect();
                ("or".to_string(), format!("({})", parts.join(",")))
            }
        })
        .collect()
}

/// Translate a select query to PostgREST query parameters
pub(crate) fn query_params(query: &Query) -> Vec<(String, String)> {
    let select = if query.columns.is_empty() {
        "*".to_string()
    } else {
        query.columns.join(",")
    };

    let mut params = vec![("select".to_string(), select)];
    params.extend(filter_params(&query.filters));

    if let Some(order) = &query.order {
        let dir = if order.ascending { "asc" } else { "desc" };
        params.push(("order".to_string(), format!("{}.{}", order.column, dir)));
    }
    if let Some(limit) = query.limit {
        params.push(("limit".to_string(), limit.to_string()));
    }
    if let Some(offset) = query.offset {
        params.push(("offset".to_string(), offset.to_string()));
    }
    params
}

/// Parse the total out of a `Content-Range: 0-19/123` header
pub(crate) fn parse_content_range(value: &str) -> Option<u64> {
    value.rsplit('/').next()?.parse().ok()
}

fn total_from(response: &Response) -> Option<u64> {
    response
        .headers()
        .get(header::CONTENT_RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_content_range)
}

#[async_trait]
impl Store for PostgrestStore {
    async fn select(&self, table: &str, query: &Query) -> Result<Rows, StoreError> {
        let mut builder = self
            .client
            .get(self.rest_url(table))
            .query(&query_params(query));
        if query.with_count {
            builder = builder.header("Prefer", "count=exact");
        }

        let response = self.send(builder).await?;
        let total = if query.with_count { total_from(&response) } else { None };
        let rows: Vec<Value> = response
            .json()
            .await
            .map_err(|e| StoreError::Decode(e.to_string()))?;

        Ok(Rows { rows, total })
    }

    async fn insert(&self, table: &str, row: Value) -> Result<(), StoreError> {
        let builder = self
            .client
            .post(self.rest_url(table))
            .header("Prefer", "return=minimal")
            .json(&row);
        self.send(builder).await.map(|_| ())
    }

    async fn upsert(&self, table: &str, row: Value, conflict_column: &str) -> Result<(), StoreError> {
        let builder = self
            .client
            .post(self.rest_url(table))
            .query(&[("on_conflict", conflict_column)])
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(&row);
        self.send(builder).await.map(|_| ())
    }

    async fn update(&self, table: &str, filters: &[Filter], patch: Value) -> Result<(), StoreError> {
        let builder = self
            .client
            .patch(self.rest_url(table))
            .query(&filter_params(filters))
            .header("Prefer", "return=minimal")
            .json(&patch);
        self.send(builder).await.map(|_| ())
    }

    async fn delete(&self, table: &str, filters: &[Filter]) -> Result<(), StoreError> {
        let builder = self
            .client
            .delete(self.rest_url(table))
            .query(&filter_params(filters));
        self.send(builder).await.map(|_| ())
    }

    async fn count(&self, table: &str, filters: &[Filter]) -> Result<u64, StoreError> {
        let builder = self
            .client
            .head(self.rest_url(table))
            .query(&[("select", "*")])
            .query(&filter_params(filters))
            .header("Prefer", "count=exact");

        let response = self.send(builder).await?;
        total_from(&response).ok_or_else(|| StoreError::Decode("missing Content-Range".into()))
    }
}

#[async_trait]
impl BlobStore for PostgrestStore {
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, StoreError> {
        let builder = self
            .client
            .post(self.storage_url(bucket, path))
            .header(header::CONTENT_TYPE, content_type)
            .header("x-upsert", "false")
            .body(bytes);
        self.send(builder).await?;
        Ok(self.public_url(bucket, path))
    }
}
