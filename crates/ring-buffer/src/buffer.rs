//! History Ring Implementation

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Default history capacity (60 frames = ~1 min at one telegram per second)
pub const DEFAULT_CAPACITY: usize = 60;

/// Fixed capacity ring that drops its oldest item when full
#[derive(Debug, Clone)]
pub struct HistoryRing<T> {
    /// Items, oldest at the front
    items: VecDeque<T>,
    /// Capacity of the ring
    capacity: usize,
    /// Total items ever pushed (for statistics)
    total_written: u64,
}

impl<T> HistoryRing<T> {
    /// Create a new ring with given capacity
    ///
    /// # Panics
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "HistoryRing capacity must be > 0");
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
            total_written: 0,
        }
    }

    /// Append an item, returning the evicted oldest item if the ring was full
    pub fn push(&mut self, item: T) -> Option<T> {
        let evicted = if self.items.len() == self.capacity {
            self.items.pop_front()
        } else {
            None
        };
        self.items.push_back(item);
        self.total_written += 1;
        evicted
    }

    /// Number of items currently held
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Check if ring is empty
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Check if ring is full
    pub fn is_full(&self) -> bool {
        self.items.len() == self.capacity
    }

    /// Get the ring capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Get fill ratio (0.0 to 1.0)
    pub fn fill_ratio(&self) -> f64 {
        self.items.len() as f64 / self.capacity as f64
    }

    /// Iterate oldest first
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + ExactSizeIterator {
        self.items.iter()
    }

    /// Most recent item
    pub fn latest(&self) -> Option<&T> {
        self.items.back()
    }

    /// Get total items ever pushed
    pub fn total_written(&self) -> u64 {
        self.total_written
    }

    /// Clear the ring
    pub fn clear(&mut self) {
        self.items.clear();
    }
}

impl<T: Clone> HistoryRing<T> {
    /// Copy of all items, oldest first
    pub fn snapshot(&self) -> Vec<T> {
        self.items.iter().cloned().collect()
    }

    /// Read the last N items (most recent first)
    pub fn read_last(&self, count: usize) -> Vec<T> {
        self.items.iter().rev().take(count).cloned().collect()
    }
}

/// A [`HistoryRing`] behind a mutex, shared between the consumer loop and
/// exporters.
///
/// Exporters only ever see copies taken under the same lock the consumer
/// uses for its appends.
#[derive(Debug)]
pub struct SharedHistory<T> {
    inner: Arc<Mutex<HistoryRing<T>>>,
}

impl<T> Clone for SharedHistory<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> SharedHistory<T> {
    /// Wrap a new ring with the given capacity
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(HistoryRing::new(capacity))),
        }
    }

    // A panic while holding the lock cannot leave the ring half-updated
    fn lock(&self) -> MutexGuard<'_, HistoryRing<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append an item, evicting the oldest if full
    pub fn push(&self, item: T) -> Option<T> {
        self.lock().push(item)
    }

    /// Number of items currently held
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Ring capacity
    pub fn capacity(&self) -> usize {
        self.lock().capacity()
    }

    /// Clear all items
    pub fn clear(&self) {
        self.lock().clear();
    }
}

impl<T: Clone> SharedHistory<T> {
    /// Point-in-time copy, oldest first
    pub fn snapshot(&self) -> Vec<T> {
        self.lock().snapshot()
    }

    /// Most recent item
    pub fn latest(&self) -> Option<T> {
        self.lock().latest().cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_push_and_read() {
        let mut ring = HistoryRing::new(10);

        for i in 0..5 {
            ring.push(i * 100);
        }

        assert_eq!(ring.len(), 5);

        let items = ring.read_last(3);
        assert_eq!(items, vec![400, 300, 200]); // Most recent first
    }

    #[test]
    fn test_overwrite_oldest() {
        let mut ring = HistoryRing::new(60);

        for frame in 1..=61 {
            ring.push(frame);
        }

        assert_eq!(ring.len(), 60);
        let items = ring.snapshot();
        assert_eq!(items.first(), Some(&2));
        assert_eq!(items.last(), Some(&61));
        assert!(!items.contains(&1));
        assert_eq!(ring.total_written(), 61);
    }

    #[test]
    fn test_push_reports_eviction() {
        let mut ring = HistoryRing::new(2);
        assert_eq!(ring.push('a'), None);
        assert_eq!(ring.push('b'), None);
        assert!(ring.is_full());
        assert_eq!(ring.push('c'), Some('a'));
    }

    #[test]
    fn test_fill_ratio() {
        let mut ring = HistoryRing::new(100);
        assert_eq!(ring.fill_ratio(), 0.0);

        for i in 0..50 {
            ring.push(i);
        }

        assert!((ring.fill_ratio() - 0.5).abs() < 0.01);
    }

    #[test]
    fn test_shared_snapshot_is_a_copy() {
        let shared = SharedHistory::new(3);
        shared.push(1);
        shared.push(2);

        let snapshot = shared.snapshot();
        shared.push(3);
        shared.push(4);

        assert_eq!(snapshot, vec![1, 2]);
        assert_eq!(shared.snapshot(), vec![2, 3, 4]);
        assert_eq!(shared.latest(), Some(4));
    }

    #[test]
    #[should_panic(expected = "capacity must be > 0")]
    fn test_zero_capacity_panics() {
        let _ = HistoryRing::<u8>::new(0);
    }

    proptest! {
        #[test]
        fn prop_len_bounded_and_order_kept(capacity in 1usize..32, count in 0usize..200) {
            let mut ring = HistoryRing::new(capacity);
            for i in 0..count {
                ring.push(i);
                prop_assert!(ring.len() <= capacity);
            }
            let expected: Vec<usize> = (count.saturating_sub(capacity)..count).collect();
            prop_assert_eq!(ring.snapshot(), expected);
        }
    }
}
