//! Per-routine channel bookkeeping tokens.

use std::collections::VecDeque;

/// Producer-side bookkeeping for one routine on one channel.
///
/// Holds the contiguous range of sequence numbers reserved by the last
/// permission request and the messages queued for those sequences.
/// Invariant: the number of reserved sequences not yet populated equals
/// `reserved() - queued()`; batch publishing requires the two to be
/// equal.
#[derive(Debug)]
pub struct PublisherToken<T> {
    pub(crate) next_seq: u64,
    pub(crate) end_seq: u64,
    pub(crate) queue: VecDeque<T>,
}

impl<T> PublisherToken<T> {
    pub(crate) fn new() -> Self {
        Self {
            next_seq: 0,
            end_seq: 0,
            queue: VecDeque::new(),
        }
    }

    /// Number of reserved sequences not yet published.
    #[must_use]
    pub fn reserved(&self) -> usize {
        usize::try_from(self.end_seq - self.next_seq).unwrap_or(usize::MAX)
    }

    /// Number of messages queued for publishing.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Number of reserved sequences still awaiting a message.
    #[must_use]
    pub fn unfilled(&self) -> usize {
        self.reserved().saturating_sub(self.queue.len())
    }

    /// Returns true when every reserved sequence has a queued message.
    #[must_use]
    pub fn is_filled(&self) -> bool {
        self.unfilled() == 0
    }

    /// Queues a message for the next unfilled reserved sequence.
    pub fn push(&mut self, message: T) {
        self.queue.push_back(message);
    }

    pub(crate) fn grant(&mut self, start: u64, count: u64) {
        debug_assert_eq!(self.next_seq, self.end_seq, "grant over live reservation");
        self.next_seq = start;
        self.end_seq = start + count;
    }
}

impl<T> Default for PublisherToken<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Consumer-side bookkeeping for one routine on one channel.
///
/// Holds the cursor position this subscriber has reached and the index
/// of the channel cursor slot assigned at subscription.
#[derive(Debug)]
pub struct SubscriberToken {
    pub(crate) slot: usize,
    pub(crate) cursor: u64,
}

impl SubscriberToken {
    pub(crate) fn new(slot: usize, cursor: u64) -> Self {
        Self { slot, cursor }
    }

    /// The cursor slot index assigned at subscription.
    #[must_use]
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// The next sequence this subscriber will observe.
    #[must_use]
    pub fn cursor(&self) -> u64 {
        self.cursor
    }
}
