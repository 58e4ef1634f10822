//! Coordination primitives over a partition-keyed key-value store
//!
//! The backing store (Amazon DynamoDB in `corral-store-aws`) offers only
//! single-item atomic operations: conditional insert, point read, point
//! delete, expression-based update, and paginated scan. This crate turns
//! those primitives into the guarantees the store does not provide natively:
//!
//! - [`PseudoLock`]: cross-process mutual exclusion built from a
//!   conditional-insert/delete pair against a shared lock table
//! - [`update::compile`]: compiles a declarative update document into the
//!   store's native update/condition expression dialect, handling nested
//!   paths, array indices, and placeholder-collision avoidance
//! - [`retry::poll_until`]: bounded fixed-interval polling for callers that
//!   must wait on external asynchronous state transitions
//! - [`scan::scan_all`]: exhaustive cursor-following scan aggregation
//!
//! The store itself is an external collaborator behind the [`StoreClient`]
//! trait. [`MemoryStore`] is a thread-safe in-memory implementation for
//! testing.

pub mod error;
pub mod lock;
pub mod memory;
pub mod retry;
pub mod scan;
pub mod update;

pub use error::{LockError, Result, StoreError, UpdateError};
pub use lock::{PseudoLock, ATTR_LOCK_KEY, ATTR_LOCK_TIME, DEFAULT_LOCK_TABLE};
pub use memory::MemoryStore;
pub use retry::{poll_until, RetryPolicy};
pub use scan::{scan_all, ScanRequest};
pub use update::{compile, CompiledUpdate, RawUpdate, UpdateDoc, UpdateParams};

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt::Debug;

/// A store item: an attribute map with JSON-shaped values.
///
/// Backends convert to and from their native attribute representation at
/// the wire boundary.
pub type Item = HashMap<String, Value>;

/// One page of a scan.
///
/// `cursor` is the opaque continuation token for the next page; `None`
/// signals exhaustion. A cursor is only meaningful when threaded back into
/// the same scan within one aggregation call.
#[derive(Debug, Clone)]
pub struct ScanPage {
    /// Items in store-returned order.
    pub items: Vec<Item>,
    /// Continuation cursor, absent on the final page.
    pub cursor: Option<Item>,
}

/// The store collaborator contract.
///
/// Every operation is single-item atomic on the store side; there are no
/// multi-item transactions anywhere in this layer. Implementations map
/// their native "condition failed" signal to [`StoreError::ConditionFailed`]
/// so that the lock and other conditional writers can treat it as an
/// expected, retryable outcome.
#[async_trait]
pub trait StoreClient: Debug + Send + Sync {
    /// Point read. Returns `None` when no item exists under `key_value`.
    async fn get(&self, table: &str, key_attr: &str, key_value: &Value) -> Result<Option<Item>>;

    /// Unconditional upsert.
    async fn put(&self, table: &str, item: Item) -> Result<()>;

    /// Insert guarded by attribute-not-exists on `key_attr`.
    ///
    /// Fails with [`StoreError::ConditionFailed`] when an item already
    /// exists under the item's key. This is the sole arbitration point for
    /// [`PseudoLock`] acquisition.
    async fn put_unique(&self, table: &str, item: Item, key_attr: &str) -> Result<()>;

    /// Point delete, idempotent on a missing key.
    async fn delete(&self, table: &str, key_attr: &str, key_value: &Value) -> Result<()>;

    /// Apply compiled or raw update parameters.
    ///
    /// A violated condition expression surfaces as
    /// [`StoreError::ConditionFailed`].
    async fn update(&self, table: &str, params: &UpdateParams) -> Result<()>;

    /// Fetch one scan page, resuming from `cursor` when present.
    async fn scan_page(
        &self,
        table: &str,
        request: &ScanRequest,
        cursor: Option<&Item>,
    ) -> Result<ScanPage>;
}
