//! Pseudo-lock on an arbitrary key
//!
//! Cross-process mutual exclusion built from nothing but the store's
//! conditional insert/delete pair. A lock record `{key, time}` is inserted
//! into a shared lock table guarded by attribute-not-exists on `key`; the
//! store's atomic conditional write is the sole arbitration point, so no
//! in-process mutex is needed or used. Competitors retry the insert on a
//! fixed interval until the record disappears or their budget runs out.
//!
//! # Limitation
//!
//! There is no lease expiry and no fencing token. A holder that crashes
//! before releasing leaves its record behind permanently, and every later
//! competitor exhausts its attempts and fails with
//! [`LockError::Timeout`] — the lock never self-heals. Clear the record
//! manually (delete the key from the lock table) to recover.

use crate::error::{LockError, StoreError};
use crate::retry::RetryPolicy;
use crate::{Item, StoreClient};
use serde_json::Value;
use std::future::Future;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Default lock table name
pub const DEFAULT_LOCK_TABLE: &str = "LOCK";

/// Lock table partition key attribute (string)
pub const ATTR_LOCK_KEY: &str = "key";

/// Acquisition timestamp attribute (integer epoch millis)
pub const ATTR_LOCK_TIME: &str = "time";

/// Default acquisition budget: 25 retries at 50 ms, fixed interval
const DEFAULT_POLICY: RetryPolicy = RetryPolicy::new(Duration::from_millis(50), 25);

/// Distributed mutual exclusion over a caller-chosen key
#[derive(Debug, Clone)]
pub struct PseudoLock<S> {
    store: S,
    table: String,
    policy: RetryPolicy,
}

impl<S: StoreClient> PseudoLock<S> {
    /// Create a lock against the default lock table with the default
    /// acquisition budget (25 retries at 50 ms).
    pub fn new(store: S) -> Self {
        Self {
            store,
            table: DEFAULT_LOCK_TABLE.to_string(),
            policy: DEFAULT_POLICY,
        }
    }

    /// Use a different lock table
    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    /// Use a different acquisition budget
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Acquire the lock on `key`, run `section`, release, and return the
    /// section's result.
    ///
    /// Acquisition attempts a conditional insert of the lock record up to
    /// `max_retries + 1` times, sleeping the fixed policy delay after each
    /// guard violation. Exhaustion raises [`LockError::Timeout`] without
    /// ever running `section`; any other store failure propagates
    /// immediately.
    ///
    /// Once held, the lock record is deleted after `section` settles —
    /// on its failure path too — before anything is returned. A failed
    /// section re-raises as [`LockError::Section`] only after the release
    /// completes.
    pub async fn acquire_and_run<T, E, F, Fut>(
        &self,
        key: &str,
        section: F,
    ) -> Result<T, LockError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + 'static,
    {
        let attempts = self.policy.attempts();
        let mut acquired = false;
        for attempt in 0..attempts {
            match self.try_insert(key).await {
                Ok(()) => {
                    acquired = true;
                    break;
                }
                Err(StoreError::ConditionFailed) => {
                    tracing::debug!(key, attempt, "lock held elsewhere, retrying");
                    tokio::time::sleep(self.policy.delay).await;
                }
                Err(other) => return Err(LockError::Store(other)),
            }
        }
        if !acquired {
            return Err(LockError::Timeout {
                key: key.to_string(),
                attempts,
            });
        }
        tracing::debug!(key, "lock acquired");

        let outcome = section().await;

        self.store
            .delete(&self.table, ATTR_LOCK_KEY, &Value::from(key))
            .await?;
        tracing::debug!(key, "lock released");

        outcome.map_err(LockError::Section)
    }

    async fn try_insert(&self, key: &str) -> Result<(), StoreError> {
        let mut record = Item::new();
        record.insert(ATTR_LOCK_KEY.to_string(), Value::from(key));
        record.insert(ATTR_LOCK_TIME.to_string(), Value::from(now_millis()));
        self.store
            .put_unique(&self.table, record, ATTR_LOCK_KEY)
            .await
    }
}

/// Current Unix epoch milliseconds
fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use crate::ScanRequest;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_lock(store: MemoryStore) -> PseudoLock<MemoryStore> {
        PseudoLock::new(store).with_policy(RetryPolicy::new(Duration::from_millis(1), 5))
    }

    #[tokio::test]
    async fn acquire_runs_section_and_releases() {
        let store = MemoryStore::new();
        let lock = fast_lock(store.clone());

        let result: Result<u32, LockError<StoreError>> =
            lock.acquire_and_run("job", || async { Ok(42) }).await;
        assert_eq!(result.unwrap(), 42);

        // Record is gone after release.
        let held = store
            .get(DEFAULT_LOCK_TABLE, ATTR_LOCK_KEY, &Value::from("job"))
            .await
            .unwrap();
        assert!(held.is_none());
    }

    #[tokio::test]
    async fn lock_record_carries_key_and_time() {
        let store = MemoryStore::new();
        let lock = fast_lock(store.clone());

        let record = lock
            .acquire_and_run("job", || {
                let store = store.clone();
                async move {
                    store
                        .get(DEFAULT_LOCK_TABLE, ATTR_LOCK_KEY, &Value::from("job"))
                        .await
                }
            })
            .await
            .unwrap()
            .expect("record present while held");

        assert_eq!(record[ATTR_LOCK_KEY], Value::from("job"));
        assert!(record[ATTR_LOCK_TIME].is_i64());
    }

    #[tokio::test]
    async fn releases_on_section_failure_then_reraises() {
        let store = MemoryStore::new();
        let lock = fast_lock(store.clone());

        let result: Result<(), LockError<StoreError>> = lock
            .acquire_and_run("job", || async { Err(StoreError::store("boom")) })
            .await;

        match result.unwrap_err() {
            LockError::Section(StoreError::Store(msg)) => assert_eq!(msg, "boom"),
            other => panic!("expected Section error, got {other:?}"),
        }
        let held = store
            .get(DEFAULT_LOCK_TABLE, ATTR_LOCK_KEY, &Value::from("job"))
            .await
            .unwrap();
        assert!(held.is_none(), "lock must be released on the failure path");
    }

    #[tokio::test]
    async fn timeout_when_holder_never_releases() {
        let store = MemoryStore::new();
        // Simulate a crashed holder: a stale record nobody will delete.
        let mut stale = Item::new();
        stale.insert(ATTR_LOCK_KEY.to_string(), Value::from("job"));
        stale.insert(ATTR_LOCK_TIME.to_string(), Value::from(0));
        store
            .put_unique(DEFAULT_LOCK_TABLE, stale, ATTR_LOCK_KEY)
            .await
            .unwrap();

        let lock = fast_lock(store.clone());
        let section_ran = AtomicU32::new(0);
        let result: Result<(), LockError<StoreError>> = lock
            .acquire_and_run("job", || {
                section_ran.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })
            .await;

        match result.unwrap_err() {
            LockError::Timeout { key, attempts } => {
                assert_eq!(key, "job");
                assert_eq!(attempts, 6);
            }
            other => panic!("expected Timeout, got {other:?}"),
        }
        assert_eq!(section_ran.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn timeout_performs_bounded_attempts() {
        /// Always-contended store that counts conditional inserts.
        #[derive(Debug)]
        struct Contended {
            inserts: Arc<AtomicU32>,
        }

        #[async_trait]
        impl StoreClient for Contended {
            async fn get(
                &self,
                _table: &str,
                _key_attr: &str,
                _key_value: &Value,
            ) -> crate::Result<Option<Item>> {
                Ok(None)
            }

            async fn put(&self, _table: &str, _item: Item) -> crate::Result<()> {
                Ok(())
            }

            async fn put_unique(
                &self,
                _table: &str,
                _item: Item,
                _key_attr: &str,
            ) -> crate::Result<()> {
                self.inserts.fetch_add(1, Ordering::SeqCst);
                Err(StoreError::ConditionFailed)
            }

            async fn delete(
                &self,
                _table: &str,
                _key_attr: &str,
                _key_value: &Value,
            ) -> crate::Result<()> {
                Ok(())
            }

            async fn update(
                &self,
                _table: &str,
                _params: &crate::UpdateParams,
            ) -> crate::Result<()> {
                Ok(())
            }

            async fn scan_page(
                &self,
                _table: &str,
                _request: &ScanRequest,
                _cursor: Option<&Item>,
            ) -> crate::Result<crate::ScanPage> {
                Ok(crate::ScanPage {
                    items: vec![],
                    cursor: None,
                })
            }
        }

        let inserts = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::new(Duration::from_millis(1), 4);
        let lock = PseudoLock::new(Contended {
            inserts: inserts.clone(),
        })
        .with_policy(policy);

        let result: Result<(), LockError<StoreError>> =
            lock.acquire_and_run("job", || async { Ok(()) }).await;
        assert!(matches!(result, Err(LockError::Timeout { .. })));
        assert_eq!(inserts.load(Ordering::SeqCst), policy.attempts());
    }

    #[tokio::test]
    async fn second_acquirer_proceeds_after_release() {
        let store = MemoryStore::new();
        let lock_a = fast_lock(store.clone()).with_policy(RetryPolicy::new(
            Duration::from_millis(5),
            50,
        ));
        let lock_b = lock_a.clone();

        let in_section = Arc::new(AtomicU32::new(0));
        let max_concurrency = Arc::new(AtomicU32::new(0));

        let mut tasks = Vec::new();
        for lock in [lock_a, lock_b] {
            let in_section = in_section.clone();
            let max_concurrency = max_concurrency.clone();
            tasks.push(tokio::spawn(async move {
                lock.acquire_and_run("job", || async move {
                    let now = in_section.fetch_add(1, Ordering::SeqCst) + 1;
                    max_concurrency.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    in_section.fetch_sub(1, Ordering::SeqCst);
                    Ok::<_, StoreError>(())
                })
                .await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        // Mutual exclusion: never two holders at once.
        assert_eq!(max_concurrency.load(Ordering::SeqCst), 1);
    }
}
