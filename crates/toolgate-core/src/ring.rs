//! Fixed-capacity FIFO log used by the execution, audit and request logs.

use std::collections::VecDeque;

/// A bounded deque that evicts its oldest entry once `capacity` is reached.
#[derive(Debug, Clone)]
pub struct BoundedLog<T> {
    entries: VecDeque<T>,
    capacity: usize,
}

impl<T> BoundedLog<T> {
    /// A capacity of zero is bumped to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    /// Append `entry`, returning the evicted oldest entry if the log was full.
    pub fn push(&mut self, entry: T) -> Option<T> {
        let evicted = if self.entries.len() >= self.capacity {
            self.entries.pop_front()
        } else {
            None
        };
        self.entries.push_back(entry);
        evicted
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Oldest first.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + ExactSizeIterator {
        self.entries.iter()
    }

    /// Up to `n` most recent entries, oldest first.
    pub fn recent(&self, n: usize) -> impl Iterator<Item = &T> {
        self.entries.iter().skip(self.entries.len().saturating_sub(n))
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evicts_oldest_first() {
        let mut log = BoundedLog::new(3);
        assert_eq!(log.push(1), None);
        assert_eq!(log.push(2), None);
        assert_eq!(log.push(3), None);
        assert_eq!(log.push(4), Some(1));
        assert_eq!(log.iter().copied().collect::<Vec<_>>(), vec![2, 3, 4]);
        assert_eq!(log.len(), 3);
    }

    #[test]
    fn test_recent_returns_tail_in_order() {
        let mut log = BoundedLog::new(10);
        for i in 0..5 {
            log.push(i);
        }
        assert_eq!(log.recent(2).copied().collect::<Vec<_>>(), vec![3, 4]);
        assert_eq!(log.recent(50).count(), 5);
    }

    #[test]
    fn test_zero_capacity_holds_one() {
        let mut log = BoundedLog::new(0);
        log.push("a");
        assert_eq!(log.push("b"), Some("a"));
        assert_eq!(log.capacity(), 1);
    }
}
