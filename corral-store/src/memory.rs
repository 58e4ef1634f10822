//! In-memory store implementation for testing
//!
//! Thread-safe via `Arc<RwLock>`, suitable for multi-threaded async
//! runtimes. Tables are registered with [`MemoryStore::create_table`] or
//! implicitly by the operations that carry a key attribute
//! (`put_unique`, `get`, `delete`); a plain `put` to an unknown table is an
//! error, since the store would have no key schema to index the item under.
//!
//! Fidelity notes, relevant when asserting against this backend:
//!
//! - rows are kept in key order, so scans are deterministic;
//! - `update` evaluates the compiled `SET` expression subset (plain
//!   assignment, increment, `list_append`, nested and indexed paths) and
//!   enforces the key-existence guard; caller-supplied extra conditions are
//!   not evaluated;
//! - scan filter expressions are not evaluated.

use crate::error::StoreError;
use crate::scan::ScanRequest;
use crate::update::UpdateParams;
use crate::{Item, Result, ScanPage, StoreClient};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt::Debug;
use std::ops::Bound;
use std::sync::Arc;

/// Opaque cursor attribute used by the in-memory scan
const CURSOR_ATTR: &str = "last_key";

#[derive(Debug)]
struct Table {
    key_attr: String,
    rows: BTreeMap<String, Item>,
}

impl Table {
    fn new(key_attr: impl Into<String>) -> Self {
        Self {
            key_attr: key_attr.into(),
            rows: BTreeMap::new(),
        }
    }
}

/// In-memory store for testing
#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<RwLock<HashMap<String, Table>>>,
}

impl Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tables = self.tables.read();
        f.debug_struct("MemoryStore")
            .field("table_count", &tables.len())
            .field("row_count", &tables.values().map(|t| t.rows.len()).sum::<usize>())
            .finish()
    }
}

impl MemoryStore {
    /// Create a new empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a table with its partition key attribute.
    ///
    /// Convenience for tests that start with plain `put` calls.
    pub fn create_table(&self, table: impl Into<String>, key_attr: impl Into<String>) {
        self.tables
            .write()
            .entry(table.into())
            .or_insert_with(|| Table::new(key_attr));
    }

    /// Row key under which a key value is indexed
    fn row_key(value: &Value) -> String {
        match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

#[async_trait]
impl StoreClient for MemoryStore {
    async fn get(&self, table: &str, key_attr: &str, key_value: &Value) -> Result<Option<Item>> {
        let mut tables = self.tables.write();
        let table = tables
            .entry(table.to_string())
            .or_insert_with(|| Table::new(key_attr));
        Ok(table.rows.get(&Self::row_key(key_value)).cloned())
    }

    async fn put(&self, table: &str, item: Item) -> Result<()> {
        let mut tables = self.tables.write();
        let table_data = tables
            .get_mut(table)
            .ok_or_else(|| StoreError::store(format!("table not registered: {table}")))?;
        let row_key = {
            let key_value = item.get(&table_data.key_attr).ok_or_else(|| {
                StoreError::store(format!(
                    "item missing key attribute `{}`",
                    table_data.key_attr
                ))
            })?;
            Self::row_key(key_value)
        };
        table_data.rows.insert(row_key, item);
        Ok(())
    }

    async fn put_unique(&self, table: &str, item: Item, key_attr: &str) -> Result<()> {
        let mut tables = self.tables.write();
        let table_data = tables
            .entry(table.to_string())
            .or_insert_with(|| Table::new(key_attr));
        let key_value = item
            .get(key_attr)
            .ok_or_else(|| StoreError::store(format!("item missing key attribute `{key_attr}`")))?;
        let row_key = Self::row_key(key_value);
        if table_data.rows.contains_key(&row_key) {
            return Err(StoreError::ConditionFailed);
        }
        table_data.rows.insert(row_key, item);
        Ok(())
    }

    async fn delete(&self, table: &str, key_attr: &str, key_value: &Value) -> Result<()> {
        let mut tables = self.tables.write();
        let table = tables
            .entry(table.to_string())
            .or_insert_with(|| Table::new(key_attr));
        table.rows.remove(&Self::row_key(key_value));
        Ok(())
    }

    async fn update(&self, table: &str, params: &UpdateParams) -> Result<()> {
        let mut tables = self.tables.write();
        let table_data = tables
            .get_mut(table)
            .ok_or_else(|| StoreError::store(format!("table not registered: {table}")))?;
        let row_key = Self::row_key(params.key_value());
        // The compiled existence guard: update-only, never upsert.
        let row = table_data
            .rows
            .get_mut(&row_key)
            .ok_or(StoreError::ConditionFailed)?;
        apply_update(row, params)
    }

    async fn scan_page(
        &self,
        table: &str,
        request: &ScanRequest,
        cursor: Option<&Item>,
    ) -> Result<ScanPage> {
        let tables = self.tables.read();
        let Some(table) = tables.get(table) else {
            return Ok(ScanPage {
                items: vec![],
                cursor: None,
            });
        };

        let start = match cursor.and_then(|c| c.get(CURSOR_ATTR)).and_then(Value::as_str) {
            Some(last) => Bound::Excluded(last.to_string()),
            None => Bound::Unbounded,
        };
        let limit = request.limit.map(|l| l as usize).unwrap_or(usize::MAX);

        let mut items = Vec::new();
        let mut last_key = None;
        let mut more = false;
        for (key, row) in table.rows.range((start, Bound::Unbounded)) {
            if items.len() == limit {
                more = true;
                break;
            }
            items.push(row.clone());
            last_key = Some(key.clone());
        }

        let cursor = match (more, last_key) {
            (true, Some(key)) => Some(Item::from([(CURSOR_ATTR.to_string(), Value::from(key))])),
            _ => None,
        };
        Ok(ScanPage { items, cursor })
    }
}

/// One resolved segment of an update path
struct PathStep {
    name: String,
    indices: Vec<usize>,
}

/// Apply the compiled `SET` expression subset to a row in place
fn apply_update(row: &mut Item, params: &UpdateParams) -> Result<()> {
    let expr = params.update_expression();
    let body = expr
        .strip_prefix("SET ")
        .or_else(|| expr.strip_prefix("set "))
        .ok_or_else(|| StoreError::store(format!("unsupported update expression: {expr}")))?;

    for assignment in split_assignments(body) {
        let assignment = assignment.trim();
        if assignment.is_empty() {
            continue;
        }
        let (lhs, rhs) = assignment
            .split_once(" = ")
            .ok_or_else(|| StoreError::store(format!("malformed assignment: {assignment}")))?;
        let path = resolve_path(lhs.trim(), params.names())?;

        if let Some(call) = rhs.trim().strip_prefix("list_append(") {
            let inner = call
                .strip_suffix(')')
                .ok_or_else(|| StoreError::store(format!("malformed list_append: {rhs}")))?;
            let (_, placeholder) = inner
                .rsplit_once(',')
                .ok_or_else(|| StoreError::store(format!("malformed list_append: {rhs}")))?;
            let value = bound_value(placeholder.trim(), params)?;
            let slot = slot_mut(row, &path)?;
            let list = slot
                .as_array_mut()
                .ok_or_else(|| StoreError::store("list_append target is not a list"))?;
            match value {
                Value::Array(mut extension) => list.append(&mut extension),
                other => list.push(other),
            }
        } else if let Some((_, placeholder)) = rhs.rsplit_once(" + ") {
            let value = bound_value(placeholder.trim(), params)?;
            let slot = slot_mut(row, &path)?;
            let sum = add_numbers(slot, &value)?;
            *slot = sum;
        } else {
            let value = bound_value(rhs.trim(), params)?;
            let slot = slot_mut(row, &path)?;
            *slot = value;
        }
    }
    Ok(())
}

/// Split on commas outside parentheses
fn split_assignments(body: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in body.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(&body[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&body[start..]);
    parts
}

/// Resolve a placeholder path (`#0.#1[3]`) into named steps.
///
/// Raw (non-placeholder) segments are accepted as literal names so that
/// caller-built raw expressions work too.
fn resolve_path(lhs: &str, names: &HashMap<String, String>) -> Result<Vec<PathStep>> {
    lhs.split('.')
        .map(|segment| {
            let bare_end = segment.find('[').unwrap_or(segment.len());
            let (head, index_part) = segment.split_at(bare_end);
            let name = if head.starts_with('#') {
                names
                    .get(head)
                    .cloned()
                    .ok_or_else(|| StoreError::store(format!("unbound name placeholder {head}")))?
            } else {
                head.to_string()
            };
            let mut indices = Vec::new();
            for part in index_part.split(']') {
                let part = part.trim_start_matches('[');
                if part.is_empty() {
                    continue;
                }
                indices.push(part.parse::<usize>().map_err(|_| {
                    StoreError::store(format!("bad list index `{part}` in {segment}"))
                })?);
            }
            Ok(PathStep { name, indices })
        })
        .collect()
}

/// Navigate to the assignment slot, creating intermediate maps as needed
fn slot_mut<'a>(row: &'a mut Item, path: &[PathStep]) -> Result<&'a mut Value> {
    let (first, rest) = path
        .split_first()
        .ok_or_else(|| StoreError::store("empty update path"))?;
    let mut current = row.entry(first.name.clone()).or_insert(Value::Null);
    current = descend(current, &first.indices)?;
    for step in rest {
        if current.is_null() {
            *current = Value::Object(serde_json::Map::new());
        }
        let object = current
            .as_object_mut()
            .ok_or_else(|| StoreError::store("update path traverses a non-map value"))?;
        current = object.entry(step.name.clone()).or_insert(Value::Null);
        current = descend(current, &step.indices)?;
    }
    Ok(current)
}

fn descend<'a>(value: &'a mut Value, indices: &[usize]) -> Result<&'a mut Value> {
    let mut current = value;
    for &index in indices {
        let list = current
            .as_array_mut()
            .ok_or_else(|| StoreError::store("indexed into a non-list value"))?;
        current = list
            .get_mut(index)
            .ok_or_else(|| StoreError::store(format!("list index {index} out of range")))?;
    }
    Ok(current)
}

fn bound_value(placeholder: &str, params: &UpdateParams) -> Result<Value> {
    params
        .values()
        .get(placeholder)
        .cloned()
        .ok_or_else(|| StoreError::store(format!("unbound value placeholder {placeholder}")))
}

fn add_numbers(current: &Value, delta: &Value) -> Result<Value> {
    if let (Some(a), Some(b)) = (current.as_i64(), delta.as_i64()) {
        return Ok(Value::from(a + b));
    }
    let (a, b) = (current.as_f64(), delta.as_f64());
    match (a, b) {
        (Some(a), Some(b)) => serde_json::Number::from_f64(a + b)
            .map(Value::Number)
            .ok_or_else(|| StoreError::store("increment produced a non-finite number")),
        _ => Err(StoreError::store("increment target is not a number")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::update::{compile, UpdateDoc};
    use serde_json::json;

    fn user(id: &str) -> Item {
        Item::from([
            ("id".to_string(), json!(id)),
            ("score".to_string(), json!(1)),
            ("tags".to_string(), json!(["a"])),
            ("profile".to_string(), json!({"city": "Oslo", "visits": [3, 4]})),
        ])
    }

    #[tokio::test]
    async fn put_requires_registered_table() {
        let store = MemoryStore::new();
        let err = store.put("users", user("u1")).await.unwrap_err();
        assert!(matches!(err, StoreError::Store(_)));

        store.create_table("users", "id");
        store.put("users", user("u1")).await.unwrap();
        let item = store
            .get("users", "id", &json!("u1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(item["score"], json!(1));
    }

    #[tokio::test]
    async fn put_unique_rejects_duplicates() {
        let store = MemoryStore::new();
        store.put_unique("users", user("u1"), "id").await.unwrap();
        let err = store.put_unique("users", user("u1"), "id").await.unwrap_err();
        assert!(matches!(err, StoreError::ConditionFailed));
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let store = MemoryStore::new();
        store.put_unique("users", user("u1"), "id").await.unwrap();
        store.delete("users", "id", &json!("u1")).await.unwrap();
        store.delete("users", "id", &json!("u1")).await.unwrap();
        assert!(store.get("users", "id", &json!("u1")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn update_applies_compiled_document() {
        let store = MemoryStore::new();
        store.put_unique("users", user("u1"), "id").await.unwrap();

        let doc = UpdateDoc::new()
            .set("id", "u1")
            .set("name", "Alice")
            .increment("score", 5)
            .append("tags", json!(["b", "c"]))
            .set("profile.city", "Bergen")
            .increment("profile.visits[1]", 10);
        let compiled = compile("id", &doc, None).unwrap();
        store.update("users", &compiled.into()).await.unwrap();

        let item = store
            .get("users", "id", &json!("u1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(item["name"], json!("Alice"));
        assert_eq!(item["score"], json!(6));
        assert_eq!(item["tags"], json!(["a", "b", "c"]));
        assert_eq!(item["profile"]["city"], json!("Bergen"));
        assert_eq!(item["profile"]["visits"], json!([3, 14]));
    }

    #[tokio::test]
    async fn update_missing_row_fails_condition() {
        let store = MemoryStore::new();
        store.create_table("users", "id");

        let doc = UpdateDoc::new().set("id", "ghost").set("name", "x");
        let compiled = compile("id", &doc, None).unwrap();
        let err = store.update("users", &compiled.into()).await.unwrap_err();
        assert!(matches!(err, StoreError::ConditionFailed));
    }

    #[tokio::test]
    async fn scan_pages_resume_from_cursor() {
        let store = MemoryStore::new();
        for i in 0..5 {
            store
                .put_unique("users", user(&format!("u{i}")), "id")
                .await
                .unwrap();
        }

        let request = ScanRequest {
            limit: Some(2),
            ..ScanRequest::all()
        };
        let first = store.scan_page("users", &request, None).await.unwrap();
        assert_eq!(first.items.len(), 2);
        let cursor = first.cursor.expect("more pages remain");

        let second = store
            .scan_page("users", &request, Some(&cursor))
            .await
            .unwrap();
        assert_eq!(second.items.len(), 2);
        assert_ne!(first.items[0]["id"], second.items[0]["id"]);

        let third = store
            .scan_page("users", &request, second.cursor.as_ref())
            .await
            .unwrap();
        assert_eq!(third.items.len(), 1);
        assert!(third.cursor.is_none());
    }
}
