//! Key-value store abstraction
//!
//! The driver measures operations against anything implementing `KvStore`.
//! The store is shared by every in-flight task, so implementations take
//! `&self` and handle their own synchronization.
//!
//! # Store Types
//!
//! - **MemoryStore**: in-process map with simulated latency, jitter and
//!   failure injection; the stand-in for a remote cluster client
//!
//! # Example
//!
//! ```
//! use kvpulse::store::{KvStore, MemoryStore};
//! use std::sync::Arc;
//!
//! # tokio_test_block_on(async {
//! let store = MemoryStore::instant();
//! store.set(1, Arc::from(&b"value"[..])).await.unwrap();
//! assert!(!store.is_empty().await.unwrap());
//! # });
//! # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Runtime::new().unwrap().block_on(f)
//! # }
//! ```

pub mod memory;

pub use memory::{MemoryStore, MemoryStoreConfig};

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Store keys are plain integers, allocated by the workload
pub type Key = i64;

/// Values are immutable byte buffers, shared cheaply between tasks
pub type Value = Arc<[u8]>;

/// Failure of a single store operation
///
/// Every variant is recoverable from the driver's point of view: the failing
/// invocation is counted and its latency still recorded.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("store unavailable: {message}")]
    Unavailable { message: String },

    #[error("operation timed out after {after:?}")]
    Timeout { after: Duration },

    #[error("key {key} not found")]
    KeyMissing { key: Key },

    #[error("operation rejected: {message}")]
    Rejected { message: String },
}

impl StoreError {
    /// Short error class name for log lines
    pub fn kind(&self) -> &'static str {
        match self {
            StoreError::Unavailable { .. } => "Unavailable",
            StoreError::Timeout { .. } => "Timeout",
            StoreError::KeyMissing { .. } => "KeyMissing",
            StoreError::Rejected { .. } => "Rejected",
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Operations the workload drives against a store
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Human-readable store name for reports
    fn name(&self) -> &str;

    /// Read a value
    async fn get(&self, key: Key) -> StoreResult<Option<Value>>;

    /// Write a value, replacing any previous one
    async fn set(&self, key: Key, value: Value) -> StoreResult<()>;

    /// Write only if the key is absent
    ///
    /// Returns the existing value when the key was already present.
    async fn put_if_absent(&self, key: Key, value: Value) -> StoreResult<Option<Value>>;

    async fn is_empty(&self) -> StoreResult<bool>;

    async fn len(&self) -> StoreResult<usize>;

    /// Remove every entry
    async fn clear(&self) -> StoreResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_names() {
        let cases = [
            (
                StoreError::Unavailable {
                    message: "down".to_string(),
                },
                "Unavailable",
            ),
            (
                StoreError::Timeout {
                    after: Duration::from_millis(5),
                },
                "Timeout",
            ),
            (StoreError::KeyMissing { key: 7 }, "KeyMissing"),
            (
                StoreError::Rejected {
                    message: "full".to_string(),
                },
                "Rejected",
            ),
        ];

        for (error, kind) in cases {
            assert_eq!(error.kind(), kind);
        }
    }

    #[test]
    fn test_error_display() {
        let error = StoreError::KeyMissing { key: 42 };
        assert_eq!(error.to_string(), "key 42 not found");
    }
}
