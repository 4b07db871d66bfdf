//! Store operations driven by TimedTasks
//!
//! Each operation is one store call plus the check that makes its result
//! meaningful. An unexpected result is reported as a `StoreError`, so it is
//! counted and logged like any other failure.

use crate::config::workload::OperationKind;
use crate::store::{Key, KvStore, StoreError, StoreResult, Value};
use async_trait::async_trait;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

/// A single timed unit of work
#[async_trait]
pub trait Operation: Send + Sync {
    /// Method-style name used in reports and failure logs
    fn name(&self) -> &str;

    /// Skip per-sample outlier warnings (bulk loaders)
    fn quiet(&self) -> bool {
        false
    }

    async fn invoke(&self) -> StoreResult<()>;
}

/// Lets a caller keep a handle on an operation a TimedTask owns
#[async_trait]
impl<T: Operation + ?Sized> Operation for Arc<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn quiet(&self) -> bool {
        (**self).quiet()
    }

    async fn invoke(&self) -> StoreResult<()> {
        (**self).invoke().await
    }
}

/// Key range `[first, last)` written by the preload phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyBoundary {
    pub first: Key,
    pub last: Key,
}

impl KeyBoundary {
    /// `None` when the range is empty
    pub fn new(first: Key, last: Key) -> Option<Self> {
        (last > first).then_some(Self { first, last })
    }

    pub fn len(&self) -> u64 {
        self.last.abs_diff(self.first)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Build the value written by set and put_if_absent
pub fn filler_value(value_size: usize) -> Value {
    Arc::from(vec![b'*'; value_size])
}

/// Write fresh keys in increasing order
///
/// A key whose write failed is handed out again before any fresh key, so
/// every key below `next_key()` is either written or pending in
/// `take_failed_keys()`.
pub struct SetOp {
    store: Arc<dyn KvStore>,
    value: Value,
    next_key: AtomicI64,
    last_key: AtomicI64,
    failed: Mutex<Vec<Key>>,
    quiet: bool,
}

impl SetOp {
    pub fn new(store: Arc<dyn KvStore>, value_size: usize, first_key: Key) -> Self {
        Self {
            store,
            value: filler_value(value_size),
            next_key: AtomicI64::new(first_key),
            last_key: AtomicI64::new(first_key),
            failed: Mutex::new(Vec::new()),
            quiet: false,
        }
    }

    /// Loader variant without outlier warnings
    pub fn quiet_loader(mut self) -> Self {
        self.quiet = true;
        self
    }

    /// Highest key handed out so far
    pub fn last_key(&self) -> Key {
        self.last_key.load(Ordering::Acquire)
    }

    /// Next fresh key
    pub fn next_key(&self) -> Key {
        self.next_key.load(Ordering::Acquire)
    }

    /// Value written by every invocation
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Remove and return the keys whose last write failed
    pub fn take_failed_keys(&self) -> Vec<Key> {
        std::mem::take(&mut *self.failed.lock().unwrap())
    }

    fn claim_key(&self) -> Key {
        if let Some(key) = self.failed.lock().unwrap().pop() {
            return key;
        }
        let key = self.next_key.fetch_add(1, Ordering::AcqRel);
        self.last_key.fetch_max(key, Ordering::AcqRel);
        key
    }
}

#[async_trait]
impl Operation for SetOp {
    fn name(&self) -> &str {
        "set"
    }

    fn quiet(&self) -> bool {
        self.quiet
    }

    async fn invoke(&self) -> StoreResult<()> {
        let key = self.claim_key();
        let result = self.store.set(key, self.value.clone()).await;
        if result.is_err() {
            self.failed.lock().unwrap().push(key);
        }
        result
    }
}

/// Cycle through `[first, last)` and hand out one key per call
#[derive(Debug)]
struct KeyCycle {
    boundary: KeyBoundary,
    next: Mutex<Key>,
}

impl KeyCycle {
    fn new(boundary: KeyBoundary) -> Self {
        Self {
            boundary,
            next: Mutex::new(boundary.first),
        }
    }

    fn next_key(&self) -> Key {
        let mut next = self.next.lock().unwrap();
        let key = *next;
        *next += 1;
        if *next >= self.boundary.last {
            *next = self.boundary.first;
        }
        key
    }
}

/// Conditional write against preloaded keys
///
/// Every key in the boundary was written during preload, so the store must
/// report an existing value. A missing key is a failure.
pub struct PutIfAbsentOp {
    store: Arc<dyn KvStore>,
    value: Value,
    keys: KeyCycle,
}

impl PutIfAbsentOp {
    pub fn new(store: Arc<dyn KvStore>, value_size: usize, boundary: KeyBoundary) -> Self {
        Self {
            store,
            value: filler_value(value_size),
            keys: KeyCycle::new(boundary),
        }
    }
}

#[async_trait]
impl Operation for PutIfAbsentOp {
    fn name(&self) -> &str {
        "putIfAbsent"
    }

    async fn invoke(&self) -> StoreResult<()> {
        let key = self.keys.next_key();
        match self.store.put_if_absent(key, self.value.clone()).await? {
            Some(_) => Ok(()),
            None => Err(StoreError::KeyMissing { key }),
        }
    }
}

/// Read preloaded keys in a cycle
pub struct GetOp {
    store: Arc<dyn KvStore>,
    keys: KeyCycle,
}

impl GetOp {
    pub fn new(store: Arc<dyn KvStore>, boundary: KeyBoundary) -> Self {
        Self {
            store,
            keys: KeyCycle::new(boundary),
        }
    }
}

#[async_trait]
impl Operation for GetOp {
    fn name(&self) -> &str {
        "get"
    }

    async fn invoke(&self) -> StoreResult<()> {
        let key = self.keys.next_key();
        match self.store.get(key).await? {
            Some(_) => Ok(()),
            None => Err(StoreError::KeyMissing { key }),
        }
    }
}

/// Emptiness check against a preloaded store
pub struct IsEmptyOp {
    store: Arc<dyn KvStore>,
}

impl IsEmptyOp {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Operation for IsEmptyOp {
    fn name(&self) -> &str {
        "isEmpty"
    }

    async fn invoke(&self) -> StoreResult<()> {
        if self.store.is_empty().await? {
            Err(StoreError::Rejected {
                message: "store is empty".to_string(),
            })
        } else {
            Ok(())
        }
    }
}

/// Create the operation for a workload entry
///
/// `next_fresh_key` seeds `set`, which writes above the preloaded range.
pub fn build_operation(
    kind: OperationKind,
    store: Arc<dyn KvStore>,
    value_size: usize,
    boundary: KeyBoundary,
    next_fresh_key: Key,
) -> Box<dyn Operation> {
    match kind {
        OperationKind::Set => Box::new(SetOp::new(store, value_size, next_fresh_key)),
        OperationKind::Get => Box::new(GetOp::new(store, boundary)),
        OperationKind::PutIfAbsent => Box::new(PutIfAbsentOp::new(store, value_size, boundary)),
        OperationKind::IsEmpty => Box::new(IsEmptyOp::new(store)),
    }
}
