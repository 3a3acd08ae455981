//! Fixed-capacity FIFO history.
//!
//! Backed by a stack-allocated `heapless::Deque`, so push and evict are
//! both O(1) and the buffer never grows past `N`.  When full, the oldest
//! entry is dropped to make room.

use heapless::Deque;

/// Bounded ring of the last `N` values pushed.
#[derive(Debug, Clone)]
pub struct BoundedHistory<T, const N: usize> {
    items: Deque<T, N>,
}

impl<T, const N: usize> Default for BoundedHistory<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, const N: usize> BoundedHistory<T, N> {
    pub const fn new() -> Self {
        Self {
            items: Deque::new(),
        }
    }

    /// Append `item`, evicting the oldest entry when at capacity.
    /// Returns the evicted entry, if any.
    pub fn push(&mut self, item: T) -> Option<T> {
        let evicted = if self.items.is_full() {
            self.items.pop_front()
        } else {
            None
        };
        // Cannot fail: a slot was just freed above if the deque was full.
        let _ = self.items.push_back(item);
        evicted
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    /// Most recent entry.
    pub fn latest(&self) -> Option<&T> {
        self.items.back()
    }

    /// Entry `n` places back from the most recent (`0` is the latest).
    pub fn nth_back(&self, n: usize) -> Option<&T> {
        let len = self.items.len();
        if n >= len {
            return None;
        }
        self.items.iter().nth(len - 1 - n)
    }

    /// Oldest-first iterator.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    /// The last `n` entries, oldest first.
    pub fn last_n(&self, n: usize) -> impl Iterator<Item = &T> {
        let skip = self.items.len().saturating_sub(n);
        self.items.iter().skip(skip)
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}
