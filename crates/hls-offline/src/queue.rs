//! FIFO work queue with lazy removal and amortized compaction.
//!
//! Dequeued slots are emptied in place instead of shifting the backing vector.
//! Once the consumed prefix grows past [`QueueConfig::compaction_threshold`] of a
//! backing vector larger than [`QueueConfig::min_compaction_size`], the prefix is
//! dropped in a single pass.
//!
//! The queue is not synchronized; the download engine owns it behind its state lock.

use crate::config::QueueConfig;

#[derive(Debug)]
pub struct WorkQueue<T> {
    slots: Vec<Option<T>>,
    /// Index of the first live slot. Every slot at or after `head` is `Some`.
    head: usize,
    config: QueueConfig,
}

impl<T> Default for WorkQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> WorkQueue<T> {
    pub fn new() -> Self {
        Self::with_config(QueueConfig::default())
    }

    pub fn with_config(config: QueueConfig) -> Self {
        Self {
            slots: Vec::new(),
            head: 0,
            config,
        }
    }

    pub fn enqueue(&mut self, item: T) {
        self.slots.push(Some(item));
    }

    pub fn enqueue_all(&mut self, items: impl IntoIterator<Item = T>) {
        self.slots.extend(items.into_iter().map(Some));
    }

    /// Places `items` ahead of everything queued, keeping their relative order.
    pub fn enqueue_at_front(&mut self, items: impl IntoIterator<Item = T>) {
        let items: Vec<T> = items.into_iter().collect();
        if items.is_empty() {
            return;
        }

        if items.len() <= self.head {
            // Reuse consumed slots.
            let start = self.head - items.len();
            for (slot, item) in self.slots[start..self.head].iter_mut().zip(items) {
                *slot = Some(item);
            }
            self.head = start;
        } else {
            let mut slots = Vec::with_capacity(items.len() + self.len());
            slots.extend(items.into_iter().map(Some));
            slots.extend(self.slots.drain(self.head..));
            self.slots = slots;
            self.head = 0;
        }
    }

    pub fn dequeue(&mut self) -> Option<T> {
        let item = self.slots.get_mut(self.head)?.take()?;
        self.head += 1;

        if self.head == self.slots.len() {
            self.slots.clear();
            self.head = 0;
        } else {
            self.compact_if_needed();
        }
        Some(item)
    }

    pub fn len(&self) -> usize {
        self.slots.len() - self.head
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn purge(&mut self) {
        self.slots.clear();
        self.head = 0;
    }

    /// Removes and returns every queued item in FIFO order.
    pub fn drain(&mut self) -> Vec<T> {
        let items = self.slots.drain(self.head..).flatten().collect();
        self.purge();
        items
    }

    fn compact_if_needed(&mut self) {
        let backing = self.slots.len();
        if backing <= self.config.min_compaction_size {
            return;
        }
        if (self.head as f64 / backing as f64) > self.config.compaction_threshold {
            self.slots.drain(..self.head);
            self.head = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_order() {
        let mut queue = WorkQueue::new();
        queue.enqueue_all(1..=5);
        assert_eq!(queue.len(), 5);
        assert_eq!(queue.dequeue(), Some(1));
        assert_eq!(queue.dequeue(), Some(2));
        assert_eq!(queue.len(), 3);
    }

    #[test]
    fn test_dequeue_all_then_empty() {
        let mut queue = WorkQueue::new();
        queue.enqueue_all(0..10);
        for expected in 0..10 {
            assert_eq!(queue.dequeue(), Some(expected));
        }
        assert_eq!(queue.len(), 0);
        assert!(queue.is_empty());
        assert_eq!(queue.dequeue(), None);
    }

    #[test]
    fn test_partial_dequeue_count() {
        let mut queue = WorkQueue::new();
        queue.enqueue_all(0..100);
        for _ in 0..37 {
            queue.dequeue();
        }
        assert_eq!(queue.len(), 63);
    }

    #[test]
    fn test_compaction_preserves_remaining_order() {
        let mut queue = WorkQueue::with_config(QueueConfig {
            min_compaction_size: 10,
            compaction_threshold: 0.25,
        });
        queue.enqueue_all(0..40);

        for expected in 0..11 {
            assert_eq!(queue.dequeue(), Some(expected));
        }
        // 11 of 40 consumed (27.5%) exceeds the threshold.
        assert_eq!(queue.head, 0);
        assert_eq!(queue.slots.len(), 29);

        let rest: Vec<_> = std::iter::from_fn(|| queue.dequeue()).collect();
        assert_eq!(rest, (11..40).collect::<Vec<_>>());
    }

    #[test]
    fn test_no_compaction_below_min_size() {
        let mut queue = WorkQueue::new();
        queue.enqueue_all(0..20);
        for _ in 0..15 {
            queue.dequeue();
        }
        assert_eq!(queue.head, 15);
        assert_eq!(queue.len(), 5);
    }

    #[test]
    fn test_enqueue_at_front_reuses_consumed_slots() {
        let mut queue = WorkQueue::new();
        queue.enqueue_all(["a", "b", "c", "d"]);
        queue.dequeue();
        queue.dequeue();

        queue.enqueue_at_front(["x", "y"]);
        assert_eq!(queue.head, 0);
        assert_eq!(queue.drain(), vec!["x", "y", "c", "d"]);
    }

    #[test]
    fn test_enqueue_at_front_takes_priority() {
        let mut queue = WorkQueue::new();
        queue.enqueue_all([3, 4]);
        queue.enqueue_at_front([1, 2]);
        queue.enqueue(5);
        let all: Vec<_> = std::iter::from_fn(|| queue.dequeue()).collect();
        assert_eq!(all, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_purge() {
        let mut queue = WorkQueue::new();
        queue.enqueue_all(0..5);
        queue.dequeue();
        queue.purge();
        assert!(queue.is_empty());
        assert_eq!(queue.dequeue(), None);
    }
}
