//! kvpulse - key-value store latency driver
//!
//! kvpulse fills a store, keeps a fixed number of operations in flight
//! against it, and reports per-operation latency over a sliding time window.
//!
//! # Architecture
//!
//! - **Statistics**: a bucketed sliding window per operation, fed through a
//!   bounded queue and refreshed by a background consumer task
//! - **Workers**: timed store operations (`set`, `get`, `put_if_absent`, `is_empty`)
//! - **Driver**: round-robin dispatch with a concurrency cap and a bounded drain
//! - **Runner**: preload, wait for a full window, baseline, measure, report
//! - **Store**: an async key-value trait with an in-memory simulated backend

pub mod config;
pub mod driver;
pub mod output;
pub mod runner;
pub mod stats;
pub mod store;
pub mod util;
pub mod worker;

// Re-export commonly used types
pub use config::Config;
pub use driver::ConcurrencyBoundedDriver;
pub use stats::StatisticsEngine;
pub use store::KvStore;

/// Result type used throughout kvpulse
pub type Result<T> = anyhow::Result<T>;
