use super::query::render_value;
use super::{QueryParams, Transport};
use crate::core::{CacheError, Result};
use async_trait::async_trait;
use serde_json::{Map, Value, json};
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use tokio::sync::Notify;

/// One request seen by an `InMemoryTransport`.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestRecord {
    pub method: &'static str,
    pub path: String,
    pub query: Vec<(String, String)>,
}

/// In-process stand-in for the REST server.
///
/// Tables are plain lists of JSON rows. List requests honour equality filters,
/// `limit`/`offset` (`limit=0` means unbounded) and answer with the standard
/// envelope unless `omit_meta` is switched on. Requests can be held with
/// `pause` to observe in-flight behaviour.
pub struct InMemoryTransport {
    api_root: String,
    tables: RefCell<BTreeMap<String, Vec<Map<String, Value>>>>,
    next_id: Cell<i64>,
    requests: RefCell<Vec<RequestRecord>>,
    omit_meta: Cell<bool>,
    paused: Cell<bool>,
    gate: Notify,
}

impl InMemoryTransport {
    pub fn new(api_root: &str) -> Self {
        Self {
            api_root: api_root.trim_end_matches('/').to_string(),
            tables: RefCell::new(BTreeMap::new()),
            next_id: Cell::new(1),
            requests: RefCell::new(Vec::new()),
            omit_meta: Cell::new(false),
            paused: Cell::new(false),
            gate: Notify::new(),
        }
    }

    /// Stores a row as-is and returns its id (assigned when missing).
    pub fn insert(&self, table: &str, row: Value) -> i64 {
        let table = table.to_lowercase();
        let mut row = match row {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        let id = match row.get("id").and_then(Value::as_i64) {
            Some(id) => {
                if id >= self.next_id.get() {
                    self.next_id.set(id + 1);
                }
                id
            }
            None => self.allocate_id(),
        };
        row.insert("id".to_string(), json!(id));
        row.insert(
            "resource_uri".to_string(),
            json!(format!("{}/{}/{}/", self.api_root, table, id)),
        );
        self.tables.borrow_mut().entry(table).or_default().push(row);
        id
    }

    pub fn row(&self, table: &str, id: i64) -> Option<Map<String, Value>> {
        self.tables
            .borrow()
            .get(&table.to_lowercase())
            .and_then(|rows| rows.iter().find(|row| row_id(row) == Some(id)).cloned())
    }

    pub fn rows(&self, table: &str) -> Vec<Map<String, Value>> {
        self.tables
            .borrow()
            .get(&table.to_lowercase())
            .cloned()
            .unwrap_or_default()
    }

    pub fn requests(&self) -> Vec<RequestRecord> {
        self.requests.borrow().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.borrow().len()
    }

    /// Answers list requests with a bare array, like servers predating `meta`.
    pub fn omit_meta(&self, omit: bool) {
        self.omit_meta.set(omit);
    }

    pub fn pause(&self) {
        self.paused.set(true);
    }

    pub fn resume(&self) {
        self.paused.set(false);
        self.gate.notify_waiters();
    }

    async fn admit(&self, method: &'static str, path: &str, query: Vec<(String, String)>) {
        self.requests.borrow_mut().push(RequestRecord {
            method,
            path: path.to_string(),
            query,
        });
        while self.paused.get() {
            self.gate.notified().await;
        }
    }

    fn allocate_id(&self) -> i64 {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        id
    }

    fn route(&self, path: &str) -> Result<(String, Option<i64>)> {
        let rest = path
            .strip_prefix(&self.api_root)
            .ok_or_else(|| CacheError::NotFound(path.to_string()))?;
        let segments: Vec<&str> = rest.split('/').filter(|s| !s.is_empty()).collect();
        match segments.as_slice() {
            [table] => Ok((table.to_lowercase(), None)),
            [table, id] => {
                let id = id
                    .parse::<i64>()
                    .map_err(|_| CacheError::NotFound(path.to_string()))?;
                Ok((table.to_lowercase(), Some(id)))
            }
            _ => Err(CacheError::NotFound(path.to_string())),
        }
    }

    fn list(&self, table: &str, params: &QueryParams) -> Value {
        let tables = self.tables.borrow();
        let matching: Vec<Value> = tables
            .get(table)
            .map(|rows| {
                rows.iter()
                    .filter(|row| {
                        params
                            .filters
                            .iter()
                            .all(|(key, expected)| field_matches(row.get(key), expected))
                    })
                    .map(|row| Value::Object(row.clone()))
                    .collect()
            })
            .unwrap_or_default();

        let total_count = matching.len();
        let offset = params.offset.unwrap_or(0);
        let page: Vec<Value> = match params.limit {
            Some(0) | None => matching.into_iter().skip(offset).collect(),
            Some(limit) => matching.into_iter().skip(offset).take(limit).collect(),
        };

        if self.omit_meta.get() {
            return Value::Array(page);
        }
        json!({
            "objects": page,
            "meta": {
                "limit": params.limit.unwrap_or(0),
                "offset": offset,
                "total_count": total_count,
            }
        })
    }

    fn store(&self, table: &str, id: i64, body: &Value) -> Result<Value> {
        let mut row = match body {
            Value::Object(map) => map.clone(),
            _ => {
                return Err(CacheError::InvalidResponse(
                    "request body is not an object".to_string(),
                ));
            }
        };
        row.insert("id".to_string(), json!(id));
        row.insert(
            "resource_uri".to_string(),
            json!(format!("{}/{}/{}/", self.api_root, table, id)),
        );
        self.assign_nested_ids(&mut row);

        let mut tables = self.tables.borrow_mut();
        let rows = tables.entry(table.to_string()).or_default();
        match rows.iter_mut().find(|existing| row_id(existing) == Some(id)) {
            Some(existing) => *existing = row.clone(),
            None => rows.push(row.clone()),
        }
        Ok(Value::Object(row))
    }

    // Embedded to-many members come back with ids, as a real server would report.
    fn assign_nested_ids(&self, row: &mut Map<String, Value>) {
        for value in row.values_mut() {
            if let Value::Array(items) = value {
                for item in items.iter_mut() {
                    if let Value::Object(member) = item {
                        if row_id(member).is_none() {
                            member.insert("id".to_string(), json!(self.allocate_id()));
                        }
                        self.assign_nested_ids(member);
                    }
                }
            }
        }
    }
}

#[async_trait(?Send)]
impl Transport for InMemoryTransport {
    async fn get(&self, path: &str, params: &QueryParams) -> Result<Value> {
        self.admit("GET", path, params.to_pairs()).await;
        match self.route(path)? {
            (table, None) => Ok(self.list(&table, params)),
            (table, Some(id)) => self
                .row(&table, id)
                .map(Value::Object)
                .ok_or_else(|| CacheError::NotFound(path.to_string())),
        }
    }

    async fn post(&self, path: &str, body: &Value) -> Result<Value> {
        self.admit("POST", path, Vec::new()).await;
        match self.route(path)? {
            (table, None) => {
                let id = self.allocate_id();
                self.store(&table, id, body)
            }
            (_, Some(_)) => Err(CacheError::UnsupportedOperation(format!(
                "POST to existing resource {}",
                path
            ))),
        }
    }

    async fn put(&self, path: &str, body: &Value) -> Result<Value> {
        self.admit("PUT", path, Vec::new()).await;
        match self.route(path)? {
            (table, Some(id)) if self.row(&table, id).is_some() => self.store(&table, id, body),
            _ => Err(CacheError::NotFound(path.to_string())),
        }
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.admit("DELETE", path, Vec::new()).await;
        match self.route(path)? {
            (table, Some(id)) => {
                let mut tables = self.tables.borrow_mut();
                let rows = tables
                    .get_mut(&table)
                    .ok_or_else(|| CacheError::NotFound(path.to_string()))?;
                let before = rows.len();
                rows.retain(|row| row_id(row) != Some(id));
                if rows.len() == before {
                    return Err(CacheError::NotFound(path.to_string()));
                }
                Ok(())
            }
            (_, None) => Err(CacheError::UnsupportedOperation(format!(
                "DELETE of a whole table {}",
                path
            ))),
        }
    }
}

fn row_id(row: &Map<String, Value>) -> Option<i64> {
    row.get("id").and_then(Value::as_i64)
}

// A foreign key stored as a resource URL matches a filter on the bare id.
fn field_matches(actual: Option<&Value>, expected: &Value) -> bool {
    let expected = render_value(expected);
    match actual {
        Some(Value::String(s)) => *s == expected || s.ends_with(&format!("/{}/", expected)),
        Some(other) => render_value(other) == expected,
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::Filters;

    fn transport() -> InMemoryTransport {
        let transport = InMemoryTransport::new("/api/specify");
        for n in 0..5 {
            transport.insert(
                "determination",
                json!({"collectionobject": "/api/specify/collectionobject/7/", "n": n}),
            );
        }
        transport.insert("determination", json!({"collectionobject": "/api/specify/collectionobject/8/"}));
        transport
    }

    #[test]
    fn test_list_filters_and_pages() {
        tokio_test::block_on(async {
            let transport = transport();
            let params = QueryParams::new(Filters::new().with("collectionobject", 7))
                .limit(2)
                .offset(2);
            let payload = transport
                .get("/api/specify/determination/", &params)
                .await
                .unwrap();

            assert_eq!(payload["meta"]["total_count"], json!(5));
            assert_eq!(payload["objects"].as_array().unwrap().len(), 2);
            assert_eq!(payload["objects"][0]["n"], json!(2));
            assert_eq!(transport.request_count(), 1);
        });
    }

    #[test]
    fn test_post_put_delete() {
        tokio_test::block_on(async {
            let transport = InMemoryTransport::new("/api/specify");
            let created = transport
                .post("/api/specify/agent/", &json!({"lastname": "Darwin"}))
                .await
                .unwrap();
            let id = created["id"].as_i64().unwrap();
            assert_eq!(created["resource_uri"], json!(format!("/api/specify/agent/{}/", id)));

            let path = format!("/api/specify/agent/{}/", id);
            transport.put(&path, &json!({"lastname": "Wallace"})).await.unwrap();
            assert_eq!(transport.row("agent", id).unwrap()["lastname"], json!("Wallace"));

            transport.delete(&path).await.unwrap();
            assert!(transport.row("agent", id).is_none());
            assert!(matches!(
                transport.delete(&path).await,
                Err(CacheError::NotFound(_))
            ));
        });
    }
}
