//! In-memory store with simulated latency and failures
//!
//! `MemoryStore` stands in for a remote cluster client. Every operation
//! waits a simulated service time and may fail on demand, so the driver and
//! statistics see realistic latency distributions without a network.
//!
//! # Features
//!
//! - Base latency plus normally distributed jitter (never negative)
//! - Random failure injection at a configurable rate
//! - Forced failure mode (`set_should_fail`) for outage tests
//! - Reproducible runs with a fixed seed
//! - Operation counter for verification
//!
//! # Example
//!
//! ```
//! use kvpulse::store::{MemoryStore, MemoryStoreConfig};
//! use std::time::Duration;
//!
//! let store = MemoryStore::new(MemoryStoreConfig {
//!     latency: Duration::from_millis(1),
//!     latency_jitter: Duration::from_micros(200),
//!     failure_rate: 0.01,
//!     seed: Some(7),
//! });
//! assert_eq!(store.operation_count(), 0);
//! ```

use super::{Key, KvStore, StoreError, StoreResult, Value};
use async_trait::async_trait;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use rand_xoshiro::Xoshiro256PlusPlus;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};
use std::time::Duration;

/// Simulation parameters for [`MemoryStore`]
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryStoreConfig {
    /// Mean service time per operation
    pub latency: Duration,
    /// Standard deviation of the service time
    pub latency_jitter: Duration,
    /// Probability in `[0, 1]` that an operation fails
    pub failure_rate: f64,
    /// RNG seed; `None` seeds from entropy
    pub seed: Option<u64>,
}

impl Default for MemoryStoreConfig {
    fn default() -> Self {
        Self {
            latency: Duration::from_millis(1),
            latency_jitter: Duration::from_micros(250),
            failure_rate: 0.0,
            seed: None,
        }
    }
}

/// Shared in-process key-value map
pub struct MemoryStore {
    config: MemoryStoreConfig,
    entries: RwLock<HashMap<Key, Value>>,
    rng: Mutex<Xoshiro256PlusPlus>,
    jitter: Option<Normal<f64>>,
    should_fail: AtomicBool,
    operations: AtomicU64,
}

impl MemoryStore {
    pub fn new(config: MemoryStoreConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => Xoshiro256PlusPlus::seed_from_u64(seed),
            None => Xoshiro256PlusPlus::from_entropy(),
        };
        // Normal::new only fails for a non-finite or negative stddev
        let jitter = if config.latency_jitter.is_zero() {
            None
        } else {
            Normal::new(0.0, config.latency_jitter.as_secs_f64()).ok()
        };

        Self {
            config,
            entries: RwLock::new(HashMap::new()),
            rng: Mutex::new(rng),
            jitter,
            should_fail: AtomicBool::new(false),
            operations: AtomicU64::new(0),
        }
    }

    /// Store with no simulated latency or failures
    pub fn instant() -> Self {
        Self::new(MemoryStoreConfig {
            latency: Duration::ZERO,
            latency_jitter: Duration::ZERO,
            failure_rate: 0.0,
            seed: Some(0),
        })
    }

    pub fn config(&self) -> &MemoryStoreConfig {
        &self.config
    }

    /// Fail every operation until cleared
    pub fn set_should_fail(&self, should_fail: bool) {
        self.should_fail.store(should_fail, Ordering::Relaxed);
    }

    /// Operations attempted so far, failed ones included
    pub fn operation_count(&self) -> u64 {
        self.operations.load(Ordering::Relaxed)
    }

    /// Wait the simulated service time, then decide success or failure
    async fn simulate(&self) -> StoreResult<()> {
        self.operations.fetch_add(1, Ordering::Relaxed);

        let (delay, injected) = {
            let mut rng = self.rng.lock().unwrap();
            let offset = self.jitter.as_ref().map_or(0.0, |normal| normal.sample(&mut *rng));
            let secs = (self.config.latency.as_secs_f64() + offset).max(0.0);
            let injected =
                self.config.failure_rate > 0.0 && rng.gen_bool(self.config.failure_rate.min(1.0));
            (Duration::from_secs_f64(secs), injected)
        };

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if self.should_fail.load(Ordering::Relaxed) {
            return Err(StoreError::Unavailable {
                message: "store marked down".to_string(),
            });
        }
        if injected {
            return Err(StoreError::Unavailable {
                message: "injected failure".to_string(),
            });
        }
        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(MemoryStoreConfig::default())
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("config", &self.config)
            .field("should_fail", &self.should_fail.load(Ordering::Relaxed))
            .field("operations", &self.operation_count())
            .finish()
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get(&self, key: Key) -> StoreResult<Option<Value>> {
        self.simulate().await?;
        Ok(self.entries.read().unwrap().get(&key).cloned())
    }

    async fn set(&self, key: Key, value: Value) -> StoreResult<()> {
        self.simulate().await?;
        self.entries.write().unwrap().insert(key, value);
        Ok(())
    }

    async fn put_if_absent(&self, key: Key, value: Value) -> StoreResult<Option<Value>> {
        self.simulate().await?;
        let mut entries = self.entries.write().unwrap();
        match entries.get(&key) {
            Some(existing) => Ok(Some(existing.clone())),
            None => {
                entries.insert(key, value);
                Ok(None)
            }
        }
    }

    async fn is_empty(&self) -> StoreResult<bool> {
        self.simulate().await?;
        Ok(self.entries.read().unwrap().is_empty())
    }

    async fn len(&self) -> StoreResult<usize> {
        self.simulate().await?;
        Ok(self.entries.read().unwrap().len())
    }

    async fn clear(&self) -> StoreResult<()> {
        self.simulate().await?;
        self.entries.write().unwrap().clear();
        Ok(())
    }
}
