//! Ordered buffer of outbound payloads awaiting delivery

use std::collections::VecDeque;

use tether_core::Payload;

/// A payload waiting in the queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingMessage {
    /// Insertion order, unique per queue
    pub seq: u64,
    /// The payload itself
    pub payload: Payload,
}

/// Result of a flush pass
#[derive(Debug)]
pub struct FlushOutcome<E> {
    /// Messages handed to the send function successfully
    pub delivered: usize,
    /// Error that stopped the pass, if any
    pub failure: Option<E>,
}

impl<E> FlushOutcome<E> {
    /// Whether every queued message was delivered
    pub fn is_complete(&self) -> bool {
        self.failure.is_none()
    }
}

/// FIFO queue of payloads sent while the link was down
///
/// Payloads are never merged or dropped. A failure during [`flush`] puts the
/// failed message back at the front and stops the pass, whereas a failed
/// direct write is appended at the tail with [`enqueue`] since it was never
/// part of the backlog.
///
/// [`flush`]: PendingMessageQueue::flush
/// [`enqueue`]: PendingMessageQueue::enqueue
#[derive(Debug, Default)]
pub struct PendingMessageQueue {
    messages: VecDeque<PendingMessage>,
    next_seq: u64,
}

impl PendingMessageQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a payload to the tail, returning its sequence number
    pub fn enqueue(&mut self, payload: Payload) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.messages.push_back(PendingMessage { seq, payload });
        seq
    }

    /// Deliver queued payloads in order until one fails
    ///
    /// The failing message is re-inserted at the front and nothing after it
    /// is attempted in this pass.
    pub fn flush<F, E>(&mut self, mut send: F) -> FlushOutcome<E>
    where
        F: FnMut(&Payload) -> Result<(), E>,
    {
        let mut delivered = 0;
        while let Some(message) = self.messages.pop_front() {
            if let Err(e) = send(&message.payload) {
                self.messages.push_front(message);
                return FlushOutcome {
                    delivered,
                    failure: Some(e),
                };
            }
            delivered += 1;
        }
        FlushOutcome {
            delivered,
            failure: None,
        }
    }

    /// Oldest queued message
    pub fn front(&self) -> Option<&PendingMessage> {
        self.messages.front()
    }

    /// Iterate queued messages, oldest first
    pub fn iter(&self) -> impl Iterator<Item = &PendingMessage> {
        self.messages.iter()
    }

    /// Put payloads back at the front, keeping their relative order
    ///
    /// Used for payloads a link accepted but never wrote; they predate
    /// everything still queued.
    pub fn requeue_front(&mut self, payloads: Vec<Payload>) {
        for payload in payloads.into_iter().rev() {
            let seq = self.next_seq;
            self.next_seq += 1;
            self.messages.push_front(PendingMessage { seq, payload });
        }
    }

    /// Number of queued payloads
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Check if the queue is empty
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
