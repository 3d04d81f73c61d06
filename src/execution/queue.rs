//! Step Signal Queue
//!
//! Buffers step-completion signals between their arrival and their
//! application to state, so visible progress advances at the drain cadence
//! no matter how signals burst in.
//!
//! There is no deduplication here and no size cap: duplicates become no-ops
//! when applied, and growth is bounded only by the drain keeping pace.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// FIFO of pending step sequence numbers for one instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepSignalQueue {
    pending: VecDeque<u32>,
}

impl StepSignalQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a sequence number.
    pub fn enqueue(&mut self, sequence: u32) {
        self.pending.push_back(sequence);
    }

    /// Removes and returns the oldest sequence number, if any.
    pub fn dequeue_one(&mut self) -> Option<u32> {
        self.pending.pop_front()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Iterates pending entries oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &u32> {
        self.pending.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_order() {
        let mut queue = StepSignalQueue::new();
        queue.enqueue(3);
        queue.enqueue(1);
        queue.enqueue(2);

        assert_eq!(queue.dequeue_one(), Some(3));
        assert_eq!(queue.dequeue_one(), Some(1));
        assert_eq!(queue.dequeue_one(), Some(2));
        assert_eq!(queue.dequeue_one(), None);
    }

    #[test]
    fn test_duplicates_are_kept() {
        let mut queue = StepSignalQueue::new();
        queue.enqueue(1);
        queue.enqueue(1);

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.iter().copied().collect::<Vec<_>>(), vec![1, 1]);
    }

    #[test]
    fn test_dequeue_empty() {
        let mut queue = StepSignalQueue::new();
        assert!(queue.is_empty());
        assert_eq!(queue.dequeue_one(), None);
    }
}
