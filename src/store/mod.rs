//! Persistent Store Interface
//!
//! The admin gateway owns no storage of its own. Every resource lives in the
//! hosted relational store and is reached through the [`Store`] trait; broadcast
//! images go to [`BlobStore`].
//!
//! Rows travel as `serde_json::Value` objects so each handler can pick the
//! columns it cares about without a schema crate in between.
//!
//! Implementations:
//! - [`postgrest::PostgrestStore`]: PostgREST + Storage API over HTTP
//! - [`memory::MemoryStore`]: in-process tables, used by tests and local runs

pub mod memory;
pub mod postgrest;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

pub use memory::MemoryStore;
pub use postgrest::{PostgrestConfig, PostgrestStore};

/// Store errors
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// Store could not be reached or answered with a server fault
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Store refused the operation (constraint, bad column, ...)
    #[error("{0}")]
    Rejected(String),

    /// Response did not have the expected shape
    #[error("Unexpected store response: {0}")]
    Decode(String),
}

/// Row filter
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// `column = value`
    Eq(String, String),
    /// `column >= value`
    Gte(String, String),
    /// `column IN (values)`
    In(String, Vec<String>),
    /// Case-insensitive substring match on any of the columns
    Search(Vec<String>, String),
}

impl Filter {
    pub fn eq(column: &str, value: impl ToString) -> Self {
        Self::Eq(column.to_string(), value.to_string())
    }

    pub fn gte(column: &str, value: impl ToString) -> Self {
        Self::Gte(column.to_string(), value.to_string())
    }

    pub fn any_of<T: ToString>(column: &str, values: &[T]) -> Self {
        Self::In(
            column.to_string(),
            values.iter().map(ToString::to_string).collect(),
        )
    }

    pub fn search(columns: &[&str], term: &str) -> Self {
        Self::Search(
            columns.iter().map(|c| c.to_string()).collect(),
            term.to_string(),
        )
    }
}

/// Sort order
#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub column: String,
    pub ascending: bool,
}

/// Select query
#[derive(Debug, Clone, Default)]
pub struct Query {
    /// Columns to return (empty = all)
    pub columns: Vec<String>,
    pub filters: Vec<Filter>,
    pub order: Option<Order>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    /// Also return the exact number of matching rows
    pub with_count: bool,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn columns(mut self, columns: &[&str]) -> Self {
        self.columns = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn order_by(mut self, column: &str, ascending: bool) -> Self {
        self.order = Some(Order {
            column: column.to_string(),
            ascending,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn with_count(mut self) -> Self {
        self.with_count = true;
        self
    }
}

/// Result set
#[derive(Debug, Clone, Default)]
pub struct Rows {
    pub rows: Vec<Value>,
    /// Exact match count, when requested
    pub total: Option<u64>,
}

impl Rows {
    /// Deserialize rows into typed records
    pub fn decode<T: DeserializeOwned>(self) -> Result<Vec<T>, StoreError> {
        self.rows
            .into_iter()
            .map(|row| serde_json::from_value(row).map_err(|e| StoreError::Decode(e.to_string())))
            .collect()
    }

    /// First row, if any
    pub fn first(self) -> Option<Value> {
        self.rows.into_iter().next()
    }
}

/// Hosted relational store
#[async_trait]
pub trait Store: Send + Sync {
    async fn select(&self, table: &str, query: &Query) -> Result<Rows, StoreError>;

    async fn insert(&self, table: &str, row: Value) -> Result<(), StoreError>;

    /// Insert, or merge into the row that conflicts on `conflict_column`
    async fn upsert(&self, table: &str, row: Value, conflict_column: &str) -> Result<(), StoreError>;

    async fn update(&self, table: &str, filters: &[Filter], patch: Value) -> Result<(), StoreError>;

    async fn delete(&self, table: &str, filters: &[Filter]) -> Result<(), StoreError>;

    async fn count(&self, table: &str, filters: &[Filter]) -> Result<u64, StoreError>;
}

/// Public blob storage
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Upload bytes and return their public URL
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, StoreError>;
}

/// Fetch a single row by id
pub async fn find_by_id(
    store: &dyn Store,
    table: &str,
    columns: &[&str],
    id: &str,
) -> Result<Option<Value>, StoreError> {
    let query = Query::new()
        .columns(columns)
        .filter(Filter::eq("id", id))
        .limit(1);
    Ok(store.select(table, &query).await?.first())
}

/// Render a JSON scalar the way filters compare it
pub fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
