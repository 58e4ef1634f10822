//! Amazon DynamoDB backend for corral-store
//!
//! Implements the [`StoreClient`] contract over DynamoDB and adds the
//! administrative table glue (create, delete, describe, wait-until-active)
//! that sits outside the core contract.
//!
//! ## Usage
//!
//! ```ignore
//! use corral_store::{PseudoLock, UpdateDoc, compile};
//! use corral_store_aws::{DynamoConfig, DynamoStore};
//!
//! // Load AWS SDK config, then layer backend overrides on top.
//! let sdk_config = aws_config::load_defaults(BehaviorVersion::latest()).await;
//! let store = DynamoStore::new(&sdk_config, DynamoConfig::default()).await?;
//!
//! // Mutual exclusion across processes, arbitrated by the store.
//! let lock = PseudoLock::new(store.clone());
//! lock.acquire_and_run("nightly-rollup", || async {
//!     // ... critical section ...
//!     Ok::<_, corral_store::StoreError>(())
//! })
//! .await?;
//!
//! // Declarative partial update, compiled to the native dialect.
//! let doc = UpdateDoc::new().set("id", "u1").increment("score", 5);
//! let params = compile("id", &doc, None)?;
//! store.update("users", &params.into()).await?;
//! ```

pub mod dynamodb;

pub use dynamodb::{DynamoConfig, DynamoStore, KeyType, TABLE_WAIT_POLICY};

// Re-export the core contract for convenience
pub use corral_store::{
    Item, PseudoLock, RetryPolicy, ScanPage, ScanRequest, StoreClient, StoreError,
};
