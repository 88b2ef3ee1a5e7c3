//! In-memory store
//!
//! Tables of JSON rows behind a lock. Mirrors the filter and ordering
//! semantics of the hosted store closely enough for handler tests and
//! local runs without network access.

use super::{value_text, BlobStore, Filter, Query, Rows, Store, StoreError};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::HashMap;

#[derive(Default)]
struct Table {
    rows: Vec<Value>,
    next_id: i64,
}

/// In-memory implementation of [`Store`] and [`BlobStore`]
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<HashMap<String, Table>>,
    blobs: RwLock<HashMap<String, (Vec<u8>, String)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert rows directly, assigning ids where missing
    pub fn seed(&self, table: &str, rows: Vec<Value>) {
        let mut tables = self.tables.write();
        let table = tables.entry(table.to_string()).or_default();
        for row in rows {
            push_row(table, row);
        }
    }

    /// Snapshot of a table
    pub fn rows(&self, table: &str) -> Vec<Value> {
        self.tables
            .read()
            .get(table)
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    /// Stored blob bytes and content type
    pub fn blob(&self, bucket: &str, path: &str) -> Option<(Vec<u8>, String)> {
        self.blobs.read().get(&format!("{}/{}", bucket, path)).cloned()
    }
}

fn push_row(table: &mut Table, row: Value) {
    let mut row = match row {
        Value::Object(map) => map,
        other => {
            let mut map = Map::new();
            map.insert("value".into(), other);
            map
        }
    };

    match row.get("id").and_then(Value::as_i64) {
        Some(id) => table.next_id = table.next_id.max(id),
        None if !row.contains_key("id") => {
            table.next_id += 1;
            row.insert("id".into(), Value::from(table.next_id));
        }
        None => {}
    }

    table.rows.push(Value::Object(row));
}

fn compare(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .unwrap_or_default()
            .partial_cmp(&y.as_f64().unwrap_or_default())
            .unwrap_or(Ordering::Equal),
        (Some(x), Some(y)) => value_text(x).cmp(&value_text(y)),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        (None, None) => Ordering::Equal,
    }
}

fn matches(row: &Value, filter: &Filter) -> bool {
    let field = |column: &str| row.get(column).and_then(value_text);

    match filter {
        Filter::Eq(column, value) => field(column).as_deref() == Some(value.as_str()),
        Filter::Gte(column, value) => match field(column) {
            Some(actual) => match (actual.parse::<f64>(), value.parse::<f64>()) {
                (Ok(a), Ok(b)) => a >= b,
                _ => actual.as_str() >= value.as_str(),
            },
            None => false,
        },
        Filter::In(column, values) => field(column).map_or(false, |v| values.contains(&v)),
        Filter::Search(columns, term) => {
            let term = term.to_lowercase();
            columns.iter().any(|c| {
                field(c).map_or(false, |v| v.to_lowercase().contains(&term))
            })
        }
    }
}

fn project(row: &Value, columns: &[String]) -> Value {
    if columns.is_empty() || columns.iter().any(|c| c == "*") {
        return row.clone();
    }
    let mut out = Map::new();
    for column in columns {
        if let Some(value) = row.get(column) {
            out.insert(column.clone(), value.clone());
        }
    }
    Value::Object(out)
}

fn merge(target: &mut Value, patch: &Value) {
    if let (Value::Object(target), Value::Object(patch)) = (target, patch) {
        for (key, value) in patch {
            target.insert(key.clone(), value.clone());
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn select(&self, table: &str, query: &Query) -> Result<Rows, StoreError> {
        let tables = self.tables.read();
        let source = tables.get(table).map(|t| t.rows.as_slice()).unwrap_or(&[]);

        let mut rows: Vec<&Value> = source
            .iter()
            .filter(|row| query.filters.iter().all(|f| matches(row, f)))
            .collect();

        if let Some(order) = &query.order {
            rows.sort_by(|a, b| {
                let ord = compare(a.get(&order.column), b.get(&order.column));
                if order.ascending {
                    ord
                } else {
                    ord.reverse()
                }
            });
        }

        let total = query.with_count.then_some(rows.len() as u64);
        let offset = query.offset.unwrap_or(0);
        let limit = query.limit.unwrap_or(usize::MAX);

        Ok(Rows {
            rows: rows
                .into_iter()
                .skip(offset)
                .take(limit)
                .map(|row| project(row, &query.columns))
                .collect(),
            total,
        })
    }

    async fn insert(&self, table: &str, row: Value) -> Result<(), StoreError> {
        let mut tables = self.tables.write();
        let table = tables.entry(table.to_string()).or_default();
        match row {
            Value::Array(rows) => rows.into_iter().for_each(|r| push_row(table, r)),
            row => push_row(table, row),
        }
        Ok(())
    }

    async fn upsert(&self, table: &str, row: Value, conflict_column: &str) -> Result<(), StoreError> {
        let key = row
            .get(conflict_column)
            .and_then(value_text)
            .ok_or_else(|| StoreError::Rejected(format!("missing conflict column {}", conflict_column)))?;

        let mut tables = self.tables.write();
        let table = tables.entry(table.to_string()).or_default();
        let existing = table
            .rows
            .iter_mut()
            .find(|r| r.get(conflict_column).and_then(value_text).as_deref() == Some(key.as_str()));

        match existing {
            Some(current) => merge(current, &row),
            None => push_row(table, row),
        }
        Ok(())
    }

    async fn update(&self, table: &str, filters: &[Filter], patch: Value) -> Result<(), StoreError> {
        let mut tables = self.tables.write();
        if let Some(table) = tables.get_mut(table) {
            table
                .rows
                .iter_mut()
                .filter(|row| filters.iter().all(|f| matches(row, f)))
                .for_each(|row| merge(row, &patch));
        }
        Ok(())
    }

    async fn delete(&self, table: &str, filters: &[Filter]) -> Result<(), StoreError> {
        let mut tables = self.tables.write();
        if let Some(table) = tables.get_mut(table) {
            table.rows.retain(|row| !filters.iter().all(|f| matches(row, f)));
        }
        Ok(())
    }

    async fn count(&self, table: &str, filters: &[Filter]) -> Result<u64, StoreError> {
        let tables = self.tables.read();
        Ok(tables
            .get(table)
            .map(|t| {
                t.rows
                    .iter()
                    .filter(|row| filters.iter().all(|f| matches(row, f)))
                    .count() as u64
            })
            .unwrap_or(0))
    }
}

#[async_trait]
impl BlobStore for MemoryStore {
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, StoreError> {
        let key = format!("{}/{}", bucket, path);
        let mut blobs = self.blobs.write();
        if blobs.contains_key(&key) {
            return Err(StoreError::Rejected("The resource already exists".into()));
        }
        blobs.insert(key.clone(), (bytes, content_type.to_string()));
        Ok(format!("memory://{}", key))
    }
}
