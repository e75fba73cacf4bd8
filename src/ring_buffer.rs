//! Fixed-capacity ring buffer
//!
//! Backs every bounded history on the sensing node: the optical sliding
//! window, the heart-rate average buffer and the inter-beat interval buffer.
//! Storage is a plain array, so the buffers never allocate after construction.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingBuffer<T: Copy + Default, const N: usize> {
    slots: [T; N],
    /// Next slot to write
    index: usize,
    /// Set once the write index has wrapped at least once
    full: bool,
}

impl<T: Copy + Default, const N: usize> Default for RingBuffer<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Copy + Default, const N: usize> RingBuffer<T, N> {
    pub fn new() -> Self {
        Self {
            slots: [T::default(); N],
            index: 0,
            full: false,
        }
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    pub fn len(&self) -> usize {
        if self.full {
            N
        } else {
            self.index
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.full
    }

    /// Write a value, overwriting the oldest once full
    pub fn push(&mut self, value: T) {
        if N == 0 {
            return;
        }
        self.slots[self.index] = value;
        self.index = (self.index + 1) % N;
        if self.index == 0 {
            self.full = true;
        }
    }

    pub fn clear(&mut self) {
        self.slots = [T::default(); N];
        self.index = 0;
        self.full = false;
    }

    /// Most recently written value
    pub fn latest(&self) -> Option<T> {
        if self.is_empty() {
            return None;
        }
        Some(self.slots[(self.index + N - 1) % N])
    }

    /// Values oldest to newest
    pub fn iter(&self) -> impl Iterator<Item = T> + '_ {
        let start = if self.full { self.index } else { 0 };
        (0..self.len()).map(move |i| self.slots[(start + i) % N])
    }

    pub fn to_vec(&self) -> Vec<T> {
        self.iter().collect()
    }
}
