//! Bounded FIFO with overwrite-on-full semantics, used to retain the most
//! recent kernel log messages.

/// A fixed-capacity ring. `push` never fails; once full, the oldest element
/// is evicted. Evicted and cleared slots drop their values immediately so
/// retained references do not outlive their window.
#[derive(Debug)]
pub struct RingBuffer<T> {
    slots: Vec<Option<T>>,
    head: usize,
    len: usize,
}

impl<T> RingBuffer<T> {
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "ring buffer capacity must be positive");
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self {
            slots,
            head: 0,
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

    /// Append an element, overwriting the oldest when full.
    pub fn push(&mut self, value: T) {
        let cap = self.slots.len();
        let tail = (self.head + self.len) % cap;
        self.slots[tail] = Some(value);
        if self.len == cap {
            self.head = (self.head + 1) % cap;
        } else {
            self.len += 1;
        }
    }

    /// Materialized snapshot in oldest-to-newest order.
    pub fn get_all(&self) -> Vec<T>
    where
        T: Clone,
    {
        let cap = self.slots.len();
        (0..self.len)
            .filter_map(|i| self.slots[(self.head + i) % cap].clone())
            .collect()
    }

    /// Drop every element and reset the cursor.
    pub fn clear(&mut self) {
        for slot in &mut self.slots {
            *slot = None;
        }
        self.head = 0;
        self.len = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    #[should_panic(expected = "capacity must be positive")]
    fn zero_capacity_is_rejected() {
        let _ = RingBuffer::<u32>::new(0);
    }

    #[test]
    fn fills_in_order() {
        let mut ring = RingBuffer::new(4);
        for i in 0..3 {
            ring.push(i);
        }
        assert_eq!(ring.len(), 3);
        assert_eq!(ring.get_all(), vec![0, 1, 2]);
    }

    #[test]
    fn overwrites_oldest_when_full() {
        let mut ring = RingBuffer::new(3);
        for i in 0..7 {
            ring.push(i);
        }
        assert_eq!(ring.len(), 3);
        assert_eq!(ring.get_all(), vec![4, 5, 6]);
    }

    #[test]
    fn length_is_min_of_capacity_and_pushes() {
        for pushes in 0..10usize {
            let mut ring = RingBuffer::new(4);
            for i in 0..pushes {
                ring.push(i);
            }
            assert_eq!(ring.len(), pushes.min(4));
            let all = ring.get_all();
            assert_eq!(all.len(), pushes.min(4));
            // Content equals the last min(cap, pushes) values in order.
            let expected: Vec<usize> = (pushes.saturating_sub(4)..pushes).collect();
            assert_eq!(all, expected);
        }
    }

    #[test]
    fn clear_releases_references() {
        let tracked = Arc::new(());
        let mut ring = RingBuffer::new(2);
        ring.push(Arc::clone(&tracked));
        ring.push(Arc::clone(&tracked));
        assert_eq!(Arc::strong_count(&tracked), 3);
        ring.clear();
        assert_eq!(Arc::strong_count(&tracked), 1);
        assert!(ring.is_empty());
    }

    #[test]
    fn evicted_elements_are_dropped() {
        let tracked = Arc::new(());
        let mut ring = RingBuffer::new(1);
        ring.push(Arc::clone(&tracked));
        assert_eq!(Arc::strong_count(&tracked), 2);
        ring.push(Arc::new(()));
        assert_eq!(Arc::strong_count(&tracked), 1);
    }
}
