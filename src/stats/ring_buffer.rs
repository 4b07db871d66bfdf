//! Fixed-capacity circular FIFO
//!
//! `RingBuffer` is the storage primitive under both the sliding-window bucket
//! queue and the lightweight rolling metrics. Items enter at the tail and
//! leave from the head; the buffer never grows past the capacity it was
//! created with.
//!
//! # Overflow behavior
//!
//! - [`OverflowPolicy::Reject`]: `enqueue` on a full buffer fails with
//!   [`StatsError::Overflow`]
//! - [`OverflowPolicy::EvictHead`]: the oldest item is removed, handed to the
//!   eviction callback (if one is configured), and returned to the caller
//!
//! # Example
//!
//! ```
//! use kvpulse::stats::ring_buffer::RingBuffer;
//!
//! let mut ring = RingBuffer::with_eviction(2);
//! ring.enqueue(1).unwrap();
//! ring.enqueue(2).unwrap();
//! let evicted = ring.enqueue(3).unwrap();
//!
//! assert_eq!(evicted, Some(1));
//! assert_eq!(ring.iter().copied().collect::<Vec<_>>(), vec![2, 3]);
//! ```

use super::StatsError;
use std::fmt;

/// What `enqueue` does when the buffer is full
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Fail with `StatsError::Overflow`
    Reject,
    /// Remove the head item to make room
    EvictHead,
}

type EvictionCallback<T> = Box<dyn FnMut(&T) + Send>;

/// Fixed-capacity circular FIFO with O(1) enqueue, dequeue and peeks
///
/// `head` is the read index, `tail` is the index the *next* item will be
/// written to. Both always stay in `[0, capacity)` and `0 <= size <= capacity`.
pub struct RingBuffer<T> {
    slots: Vec<Option<T>>,
    capacity: usize,
    head: usize,
    tail: usize,
    size: usize,
    policy: OverflowPolicy,
    on_evict: Option<EvictionCallback<T>>,
}

impl<T> RingBuffer<T> {
    /// Create a buffer that rejects enqueues once full
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        Self::with_policy(capacity, OverflowPolicy::Reject)
    }

    /// Create a buffer that evicts its head item when full
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn with_eviction(capacity: usize) -> Self {
        Self::with_policy(capacity, OverflowPolicy::EvictHead)
    }

    /// Create a buffer with an explicit overflow policy
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn with_policy(capacity: usize, policy: OverflowPolicy) -> Self {
        assert!(capacity > 0, "ring buffer capacity must be non-zero");

        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);

        Self {
            slots,
            capacity,
            head: 0,
            tail: 0,
            size: 0,
            policy,
            on_evict: None,
        }
    }

    /// Install a callback invoked with each item displaced by capacity pressure
    ///
    /// Only called in [`OverflowPolicy::EvictHead`] mode. Explicit `dequeue`
    /// calls do not trigger it.
    pub fn on_evict<F>(mut self, callback: F) -> Self
    where
        F: FnMut(&T) + Send + 'static,
    {
        self.on_evict = Some(Box::new(callback));
        self
    }

    /// Insert an item at the tail
    ///
    /// Returns the evicted head item when the buffer was full and the policy
    /// is `EvictHead`, `None` otherwise.
    ///
    /// # Errors
    ///
    /// `StatsError::Overflow` when the buffer is full and the policy is `Reject`.
    pub fn enqueue(&mut self, item: T) -> Result<Option<T>, StatsError> {
        let evicted = if self.is_full() {
            match self.policy {
                OverflowPolicy::Reject => {
                    return Err(StatsError::Overflow {
                        capacity: self.capacity,
                    })
                }
                OverflowPolicy::EvictHead => {
                    let old = self.dequeue()?;
                    if let Some(callback) = self.on_evict.as_mut() {
                        callback(&old);
                    }
                    Some(old)
                }
            }
        } else {
            None
        };

        self.slots[self.tail] = Some(item);
        self.tail = (self.tail + 1) % self.capacity;
        self.size += 1;

        Ok(evicted)
    }

    /// Remove and return the head (oldest) item
    ///
    /// # Errors
    ///
    /// `StatsError::Underflow` when the buffer is empty.
    pub fn dequeue(&mut self) -> Result<T, StatsError> {
        if self.size == 0 {
            return Err(StatsError::Underflow);
        }

        let item = self.slots[self.head].take().ok_or(StatsError::Underflow)?;
        self.head = (self.head + 1) % self.capacity;
        self.size -= 1;

        Ok(item)
    }

    /// Oldest item, without removing it
    pub fn peek_head(&self) -> Result<&T, StatsError> {
        if self.size == 0 {
            return Err(StatsError::Empty);
        }
        self.slots[self.head].as_ref().ok_or(StatsError::Empty)
    }

    /// Mutable access to the oldest item
    pub fn peek_head_mut(&mut self) -> Result<&mut T, StatsError> {
        if self.size == 0 {
            return Err(StatsError::Empty);
        }
        self.slots[self.head].as_mut().ok_or(StatsError::Empty)
    }

    /// Newest item, without removing it
    pub fn peek_tail(&self) -> Result<&T, StatsError> {
        if self.size == 0 {
            return Err(StatsError::Empty);
        }
        let newest = self.newest_index();
        self.slots[newest].as_ref().ok_or(StatsError::Empty)
    }

    /// Mutable access to the newest item
    pub fn peek_tail_mut(&mut self) -> Result<&mut T, StatsError> {
        if self.size == 0 {
            return Err(StatsError::Empty);
        }
        let newest = self.newest_index();
        self.slots[newest].as_mut().ok_or(StatsError::Empty)
    }

    /// Iterate from head to tail in FIFO order
    ///
    /// The iterator borrows the buffer, so mutation during iteration is ruled
    /// out by the borrow checker. Each call starts a fresh pass.
    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            ring: self,
            index: self.head,
            remaining: self.size,
        }
    }

    /// Drop every item, keeping the capacity
    pub fn clear(&mut self) {
        for slot in self.slots.iter_mut() {
            *slot = None;
        }
        self.head = 0;
        self.tail = 0;
        self.size = 0;
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.size == self.capacity
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    #[inline]
    fn newest_index(&self) -> usize {
        (self.tail + self.capacity - 1) % self.capacity
    }
}

impl<T: fmt::Debug> fmt::Debug for RingBuffer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RingBuffer")
            .field("capacity", &self.capacity)
            .field("head", &self.head)
            .field("tail", &self.tail)
            .field("size", &self.size)
            .field("policy", &self.policy)
            .field("items", &self.iter().collect::<Vec<_>>())
            .finish()
    }
}

/// FIFO iterator over a [`RingBuffer`]
pub struct Iter<'a, T> {
    ring: &'a RingBuffer<T>,
    index: usize,
    remaining: usize,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }

        let item = self.ring.slots[self.index].as_ref();
        self.index = (self.index + 1) % self.ring.capacity;
        self.remaining -= 1;
        item
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<T> ExactSizeIterator for Iter<'_, T> {}

impl<'a, T> IntoIterator for &'a RingBuffer<T> {
    type Item = &'a T;
    type IntoIter = Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
