//! Fixed-capacity sample window
//!
//! Storage is allocated once at construction. Pushing into a full window
//! overwrites the oldest slot and advances the write cursor.

/// Ring buffer holding the most recent `capacity` values
#[derive(Debug, Clone)]
pub struct Window<T> {
    slots: Box<[Option<T>]>,
    /// Next slot to write
    cursor: usize,
    len: usize,
}

impl<T: Clone> Window<T> {
    /// Create an empty window. A zero capacity is bumped to 1.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: vec![None; capacity].into_boxed_slice(),
            cursor: 0,
            len: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == self.capacity()
    }

    /// Insert a value, returning the evicted one when the window was full
    pub fn push(&mut self, value: T) -> Option<T> {
        let evicted = self.slots[self.cursor].replace(value);
        self.cursor = (self.cursor + 1) % self.capacity();
        if self.len < self.capacity() {
            self.len += 1;
        }
        evicted
    }

    /// Iterate from oldest to newest
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        let capacity = self.capacity();
        let start = (self.cursor + capacity - self.len) % capacity;
        (0..self.len).filter_map(move |offset| self.slots[(start + offset) % capacity].as_ref())
    }

    /// Newest value
    pub fn latest(&self) -> Option<&T> {
        if self.len == 0 {
            return None;
        }
        let capacity = self.capacity();
        self.slots[(self.cursor + capacity - 1) % capacity].as_ref()
    }

    /// Copy out the contents, oldest first
    pub fn to_vec(&self) -> Vec<T> {
        self.iter().cloned().collect()
    }

    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|slot| *slot = None);
        self.cursor = 0;
        self.len = 0;
    }
}
