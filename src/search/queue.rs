//! Concurrent priority queue of search messages.
//!
//! A mutex-guarded binary heap: contention is tick-granular (every worker
//! takes the lock once per message), so a sharded or lock-free queue has not
//! been worth its complexity. Duplicate messages are allowed; dispatch is
//! idempotent.

use std::collections::BinaryHeap;
use std::sync::Mutex;

use crate::search::message::Message;
use crate::search::lock;

/// MPMC priority queue, larger priority first.
#[derive(Debug, Default)]
pub struct MessageQueue {
    heap: Mutex<BinaryHeap<Message>>,
}

impl MessageQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, message: Message) {
        lock(&self.heap).push(message);
    }

    /// Pop the highest-priority message, if any.
    pub fn pop(&self) -> Option<Message> {
        lock(&self.heap).pop()
    }

    pub fn len(&self) -> usize {
        lock(&self.heap).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.heap).is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bits::BitSet;

    fn exploration(priority: f32) -> Message {
        Message::Exploration {
            sender: BitSet::empty(0),
            capture: BitSet::full(1),
            features: BitSet::full(1),
            feature: 0,
            scope: f32::MAX,
            priority,
        }
    }

    #[test]
    fn pops_in_priority_order() {
        let queue = MessageQueue::new();
        queue.push(exploration(0.1));
        queue.push(exploration(0.9));
        queue.push(exploration(0.5));
        assert_eq!(queue.len(), 3);

        let priorities: Vec<f32> = std::iter::from_fn(|| queue.pop())
            .map(|m| m.priority())
            .collect();
        assert_eq!(priorities, vec![0.9, 0.5, 0.1]);
        assert!(queue.is_empty());
    }

    #[test]
    fn concurrent_producers_and_consumers_drain_cleanly() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let queue = MessageQueue::new();
        let popped = AtomicUsize::new(0);
        let per_thread = 200;

        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    for i in 0..per_thread {
                        queue.push(exploration(i as f32));
                    }
                });
            }
            for _ in 0..4 {
                scope.spawn(|| {
                    loop {
                        if queue.pop().is_some() {
                            if popped.fetch_add(1, Ordering::Relaxed) + 1 == 4 * per_thread {
                                return;
                            }
                        } else if popped.load(Ordering::Relaxed) == 4 * per_thread {
                            return;
                        }
                        std::hint::spin_loop();
                    }
                });
            }
        });
        assert_eq!(popped.load(Ordering::Relaxed), 4 * per_thread);
        assert!(queue.is_empty());
    }
}
