//! Error types for store operations, update compilation, and locking

use thiserror::Error;

/// Result type for store operations
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors surfaced by a [`StoreClient`](crate::StoreClient) backend
#[derive(Debug, Error)]
pub enum StoreError {
    /// A conditional write's guard was violated.
    ///
    /// Expected and non-fatal: drives the retry loop in
    /// [`PseudoLock`](crate::PseudoLock) and any caller using conditional
    /// writes for uniqueness.
    #[error("conditional check failed")]
    ConditionFailed,

    /// The store rejected the request due to rate limiting
    #[error("throttled: {0}")]
    Throttled(String),

    /// The store is unreachable or returned a server-side fault
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// No region was resolvable from the SDK or backend configuration
    #[error("missing region configuration")]
    MissingRegion,

    /// Invalid backend configuration or request shape
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Any other backend failure, propagated untouched
    #[error("store error: {0}")]
    Store(String),
}

impl StoreError {
    pub fn throttled(msg: impl Into<String>) -> Self {
        Self::Throttled(msg.into())
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }
}

/// Errors from update-document compilation
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum UpdateError {
    /// The document lacks an entry for the table's key attribute.
    ///
    /// The key entry is required: it builds the existence condition and the
    /// record key, and is never an assignment target.
    #[error("update document does not contain key attribute `{attribute}`")]
    MissingKeyAttribute {
        /// The expected key attribute name
        attribute: String,
    },
}

/// Errors from [`PseudoLock::acquire_and_run`](crate::PseudoLock::acquire_and_run)
///
/// `E` is the critical section's own error type; it is re-raised as
/// [`LockError::Section`] only after the lock record has been released.
#[derive(Debug, Error)]
pub enum LockError<E>
where
    E: std::error::Error + 'static,
{
    /// The attempt budget was exhausted without acquiring the lock.
    ///
    /// The critical section was never executed.
    #[error("lock timeout on key `{key}` after {attempts} attempts")]
    Timeout {
        /// The contested lock key
        key: String,
        /// Conditional-insert attempts performed
        attempts: u32,
    },

    /// A non-conditional store failure during acquisition or release
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The critical section failed; the lock was released before re-raising
    #[error("critical section failed: {0}")]
    Section(#[source] E),
}
