//! Bounded outbound message queue.
//!
//! One per node. Only the head entry is ever a transmission candidate, and
//! only the head carries a meaningful retry counter. The queue itself is not
//! synchronised — it is owned by the ring engine actor, and every operation
//! reaches it through a single task.

use std::collections::VecDeque;
use std::time::Instant;

use crate::frame;

/// Messages a node will buffer before refusing new submissions.
pub const QUEUE_CAPACITY: usize = 10;

/// A user message waiting for a transmission opportunity.
#[derive(Debug, Clone)]
pub struct QueuedMessage {
    pub destination: String,
    pub payload: String,
    pub queued_at: Instant,
    pub retries: u32,
}

/// Errors surfaced to the operator on enqueue.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    #[error("queue full (maximum {capacity} messages)")]
    Full { capacity: usize },
    #[error("invalid destination name {0:?}")]
    InvalidDestination(String),
    #[error("payload too large: frame would be {len} bytes, limit {max}")]
    PayloadTooLarge { len: usize, max: usize },
}

/// FIFO of pending messages, capacity [`QUEUE_CAPACITY`].
#[derive(Debug, Default)]
pub struct SendQueue {
    messages: VecDeque<QueuedMessage>,
}

impl SendQueue {
    pub fn new() -> Self {
        SendQueue {
            messages: VecDeque::with_capacity(QUEUE_CAPACITY),
        }
    }

    /// Append a message. Rejects bad destination names and anything that
    /// would not fit the queue or a wire datagram.
    ///
    /// `origin` is the local node name; it participates in the wire-size
    /// check because the frame carries it.
    pub fn enqueue(
        &mut self,
        origin: &str,
        destination: &str,
        payload: &str,
    ) -> Result<(), QueueError> {
        if destination.is_empty() || destination.contains([':', ';']) {
            return Err(QueueError::InvalidDestination(destination.to_string()));
        }
        let len = frame::encoded_len(origin, destination, payload);
        if len > frame::MAX_DATAGRAM {
            return Err(QueueError::PayloadTooLarge {
                len,
                max: frame::MAX_DATAGRAM,
            });
        }
        if self.messages.len() >= QUEUE_CAPACITY {
            return Err(QueueError::Full {
                capacity: QUEUE_CAPACITY,
            });
        }

        self.messages.push_back(QueuedMessage {
            destination: destination.to_string(),
            payload: payload.to_string(),
            queued_at: Instant::now(),
            retries: 0,
        });
        Ok(())
    }

    /// Head of the queue, if any.
    pub fn peek_head(&self) -> Option<&QueuedMessage> {
        self.messages.front()
    }

    /// Remove the head. No-op on an empty queue.
    pub fn drop_head(&mut self) -> Option<QueuedMessage> {
        self.messages.pop_front()
    }

    /// Increment the head's retry counter. No-op on an empty queue.
    /// Returns the new count.
    pub fn bump_retry(&mut self) -> u32 {
        match self.messages.front_mut() {
            Some(head) => {
                head.retries += 1;
                head.retries
            }
            None => 0,
        }
    }

    /// Ordered copy of the pending messages.
    pub fn snapshot(&self) -> Vec<QueuedMessage> {
        self.messages.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enqueue_preserves_order() {
        let mut q = SendQueue::new();
        q.enqueue("Alice", "Bob", "first").unwrap();
        q.enqueue("Alice", "Carol", "second").unwrap();
        assert_eq!(q.len(), 2);
        assert_eq!(q.peek_head().unwrap().payload, "first");
        assert_eq!(q.drop_head().unwrap().payload, "first");
        assert_eq!(q.peek_head().unwrap().payload, "second");
    }

    #[test]
    fn eleventh_enqueue_fails_and_first_ten_survive() {
        let mut q = SendQueue::new();
        for i in 0..QUEUE_CAPACITY {
            q.enqueue("Alice", "Bob", &format!("msg {i}")).unwrap();
        }
        let err = q.enqueue("Alice", "Bob", "overflow").unwrap_err();
        assert_eq!(
            err,
            QueueError::Full {
                capacity: QUEUE_CAPACITY
            }
        );
        assert_eq!(q.len(), QUEUE_CAPACITY);
        for i in 0..QUEUE_CAPACITY {
            assert_eq!(q.drop_head().unwrap().payload, format!("msg {i}"));
        }
        assert!(q.is_empty());
    }

    #[test]
    fn drop_and_bump_are_noops_when_empty() {
        let mut q = SendQueue::new();
        assert!(q.drop_head().is_none());
        assert_eq!(q.bump_retry(), 0);
    }

    #[test]
    fn bump_retry_touches_only_the_head() {
        let mut q = SendQueue::new();
        q.enqueue("Alice", "Bob", "a").unwrap();
        q.enqueue("Alice", "Bob", "b").unwrap();
        assert_eq!(q.bump_retry(), 1);
        assert_eq!(q.bump_retry(), 2);
        let snap = q.snapshot();
        assert_eq!(snap[0].retries, 2);
        assert_eq!(snap[1].retries, 0);
    }

    #[test]
    fn rejects_bad_destination_names() {
        let mut q = SendQueue::new();
        assert!(matches!(
            q.enqueue("Alice", "", "x"),
            Err(QueueError::InvalidDestination(_))
        ));
        assert!(matches!(
            q.enqueue("Alice", "Bo:b", "x"),
            Err(QueueError::InvalidDestination(_))
        ));
        assert!(matches!(
            q.enqueue("Alice", "Bo;b", "x"),
            Err(QueueError::InvalidDestination(_))
        ));
    }

    #[test]
    fn rejects_payload_that_cannot_fit_a_datagram() {
        let mut q = SendQueue::new();
        let huge = "x".repeat(frame::MAX_DATAGRAM);
        assert!(matches!(
            q.enqueue("Alice", "Bob", &huge),
            Err(QueueError::PayloadTooLarge { .. })
        ));
        // A payload near the cap but under it is accepted.
        let ok = "x".repeat(frame::MAX_DATAGRAM - 64);
        q.enqueue("Alice", "Bob", &ok).unwrap();
    }

    #[test]
    fn fresh_entries_start_with_zero_retries() {
        let mut q = SendQueue::new();
        q.enqueue("Alice", "Bob", "hello").unwrap();
        let head = q.peek_head().unwrap();
        assert_eq!(head.retries, 0);
        assert_eq!(head.destination, "Bob");
    }
}
