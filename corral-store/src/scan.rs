//! Exhaustive scan aggregation
//!
//! The store returns scans one page at a time with an opaque continuation
//! cursor. [`scan_all`] follows the cursor chain and aggregates every page
//! into a single ordered result, so callers never handle pagination
//! themselves.

use crate::error::StoreError;
use crate::{Item, StoreClient};
use serde_json::Value;
use std::collections::HashMap;

/// Caller parameters passed through to the store's scan primitive
#[derive(Debug, Clone, Default)]
pub struct ScanRequest {
    /// Native filter expression over placeholders, applied server-side
    pub filter_expression: Option<String>,
    /// `#N` placeholder → attribute name
    pub names: HashMap<String, String>,
    /// `:N` placeholder → bound value
    pub values: HashMap<String, Value>,
    /// Page size limit
    pub limit: Option<u32>,
}

impl ScanRequest {
    /// Scan everything, unfiltered
    pub fn all() -> Self {
        Self::default()
    }
}

/// Scan a table to exhaustion, aggregating pages in store order.
///
/// The previous page's cursor is threaded into each request (omitted on the
/// first). Aggregation stops when a page returns no items or no cursor.
/// A failing page aborts the whole call with that failure: the operation is
/// all-or-nothing from the caller's perspective, even though it issues one
/// request per page internally.
pub async fn scan_all<S>(store: &S, table: &str, request: &ScanRequest) -> Result<Vec<Item>, StoreError>
where
    S: StoreClient + ?Sized,
{
    let mut items = Vec::new();
    let mut cursor: Option<Item> = None;
    loop {
        let page = store.scan_page(table, request, cursor.as_ref()).await?;
        tracing::debug!(
            table,
            page_items = page.items.len(),
            more = page.cursor.is_some(),
            "scan page fetched"
        );
        if page.items.is_empty() {
            break;
        }
        items.extend(page.items);
        match page.cursor {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }
    Ok(items)
}
