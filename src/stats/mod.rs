//! Sliding-window latency statistics
//!
//! This module keeps approximate statistics over a trailing time window while
//! samples arrive concurrently from many workers. Key pieces:
//!
//! - **RingBuffer**: fixed-capacity circular FIFO used for bucket storage
//! - **TimeBucket**: per-slice accumulator (count, total, min, max, samples)
//! - **SlidingWindow**: ring of contiguous buckets with O(1) fast state
//!   (count, total, mean, window span) and a periodic refresh that trims
//!   expired samples and recomputes slow state (stddev, min, max)
//! - **StatisticsEngine**: async front end owning one `SlidingWindow` on a
//!   single consumer task, fed through a bounded queue, publishing immutable
//!   `WindowStats` snapshots
//! - **MovingAverage**: lightweight count-bounded rolling mean for outlier
//!   detection
//!
//! # Example
//!
//! ```
//! use kvpulse::stats::{SlidingWindow, WindowConfig};
//! use std::time::Duration;
//!
//! let config = WindowConfig::new(Duration::from_secs(1), 10);
//! let mut window = SlidingWindow::new(config);
//!
//! window.add(Duration::from_millis(5), 2.0).unwrap();
//! window.add(Duration::from_millis(15), 4.0).unwrap();
//!
//! assert_eq!(window.n(), 2);
//! assert_eq!(window.mean(), Some(3.0));
//! ```

pub mod bucket;
pub mod engine;
pub mod moving_average;
pub mod ring_buffer;
pub mod snapshot;
pub mod window;

pub use bucket::{Sample, TimeBucket};
pub use engine::StatisticsEngine;
pub use moving_average::MovingAverage;
pub use ring_buffer::{OverflowPolicy, RingBuffer};
pub use snapshot::{SlowStats, WindowStats};
pub use window::{SlidingWindow, WindowConfig};

use std::time::Duration;
use thiserror::Error;

/// Contract errors raised by the statistics data structures
///
/// None of these are expected during normal operation. Inside the engine
/// consumer they are treated as bugs: logged and then fatal to the consumer.
#[derive(Debug, Error)]
pub enum StatsError {
    #[error("ring buffer overflow (capacity {capacity})")]
    Overflow { capacity: usize },

    #[error("ring buffer underflow")]
    Underflow,

    #[error("ring buffer is empty")]
    Empty,

    #[error("timestamp {at:?} outside bucket [{start:?}, {end:?}]")]
    Range {
        at: Duration,
        start: Duration,
        end: Duration,
    },

    #[error("bucket [{start:?}, {end:?}) is finalized")]
    Finalized { start: Duration, end: Duration },

    #[error("timestamp {at:?} is older than newest sample {newest:?}")]
    OutOfOrder { at: Duration, newest: Duration },

    #[error("statistics engine is closed")]
    EngineClosed,
}
