//! The bounded multi-producer / multi-consumer channel.
//!
//! [`MultiChannel<T>`] is a power-of-2 ring with sequence-based flow
//! control. Producers reserve contiguous sequence ranges by advancing a
//! shared reservation cursor, fill the corresponding slots, and commit
//! them in reservation order by advancing a separately tracked commit
//! cursor. Consumers hold per-subscriber cursors and only observe
//! sequences below the commit cursor.
//!
//! ## Design
//!
//! - Pre-allocated ring of `Option<T>` slots, bitmask indexing
//! - Cache-padded reservation / commit cursors, 64-byte aligned
//!   subscriber cursor slots (no false sharing between sides)
//! - Acquire/Release ordering throughout; a slot write happens-before
//!   the commit-cursor store that makes it observable
//! - Reservation grants are `min(n, capacity - (reserve - slowest
//!   cursor))`, so a producer can never overwrite an unread slot
//! - The termination handshake is a monotonic four-state machine; see
//!   [`state`](super::state)
//!
//! ## Safety
//!
//! Slot access uses `UnsafeCell`. The protocol guarantees exclusive
//! writers: a sequence is written only by the producer that reserved
//! it, and only while every subscriber cursor is at or below
//! `sequence - capacity + 1`'s reader side. Readers only dereference
//! slots below the commit cursor, which the committing producer
//! published with Release ordering.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use crate::fatal;
use crate::sync::CachePadded;

use super::config::{ChannelConfig, DeliveryMode};
use super::error::ChannelError;
use super::state::{TerminationCell, TerminationState};
use super::token::{PublisherToken, SubscriberToken};

/// Cache-padded subscriber cursor slot.
///
/// Each slot is 64-byte aligned so concurrent cursor updates from
/// different subscribers never share a cache line.
#[repr(C, align(64))]
struct CursorSlot {
    /// Whether this slot has an active subscriber.
    active: AtomicBool,
    /// Next sequence this subscriber will observe.
    read_seq: AtomicU64,
}

impl CursorSlot {
    const fn empty() -> Self {
        Self {
            active: AtomicBool::new(false),
            read_seq: AtomicU64::new(0),
        }
    }

    /// Tries to claim this slot atomically for a new subscriber.
    fn try_claim(&self, start_seq: u64) -> bool {
        if self
            .active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
        {
            self.read_seq.store(start_seq, Ordering::Release);
            true
        } else {
            false
        }
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
    }
}

/// Bounded, typed multi-producer / multi-consumer channel.
///
/// See the [module documentation](self) for the flow-control protocol.
///
/// # Example
///
/// ```rust,ignore
/// let channel: MultiChannel<u64> = MultiChannel::new("events", ChannelConfig::default());
/// let mut producer = channel.register_producer()?;
/// let mut subscriber = channel.subscribe()?;
///
/// if channel.request_permission_to_publish(&mut producer, 4).await {
///     for i in 0..producer.unfilled() as u64 {
///         producer.push(i);
///     }
///     channel.publish_messages(&mut producer).await;
/// }
/// ```
pub struct MultiChannel<T> {
    name: String,
    ring: Box<[UnsafeCell<Option<T>>]>,
    capacity: u64,
    mask: u64,

    /// Reservation cursor `T`: next sequence to hand to a producer.
    reserve_seq: CachePadded<AtomicU64>,
    /// Commit cursor `P <= T`: sequences below it are observable.
    commit_seq: CachePadded<AtomicU64>,
    /// Shared claim cursor for load-balanced delivery.
    claim_seq: CachePadded<AtomicU64>,

    cursors: Box<[CursorSlot]>,
    subscribers: AtomicUsize,
    producers: AtomicUsize,
    waiting_producers: AtomicUsize,

    state: TerminationCell,
    config: ChannelConfig,
}

// SAFETY: all shared mutation goes through atomics; ring slots are
// accessed under the single-writer-per-reservation / read-below-commit
// protocol described in the module documentation.
unsafe impl<T: Send> Send for MultiChannel<T> {}
// SAFETY: see above.
unsafe impl<T: Send> Sync for MultiChannel<T> {}

impl<T> MultiChannel<T> {
    /// Creates a channel with the given name and configuration.
    #[must_use]
    pub fn new(name: impl Into<String>, config: ChannelConfig) -> Self {
        let capacity = config.effective_capacity();
        let ring: Vec<UnsafeCell<Option<T>>> = (0..capacity).map(|_| UnsafeCell::new(None)).collect();
        let cursors: Vec<CursorSlot> = (0..config.max_subscribers)
            .map(|_| CursorSlot::empty())
            .collect();

        Self {
            name: name.into(),
            ring: ring.into_boxed_slice(),
            capacity: capacity as u64,
            mask: capacity as u64 - 1,
            reserve_seq: CachePadded::new(AtomicU64::new(0)),
            commit_seq: CachePadded::new(AtomicU64::new(0)),
            claim_seq: CachePadded::new(AtomicU64::new(0)),
            cursors: cursors.into_boxed_slice(),
            subscribers: AtomicUsize::new(0),
            producers: AtomicUsize::new(0),
            waiting_producers: AtomicUsize::new(0),
            state: TerminationCell::new(),
            config,
        }
    }

    /// The channel name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Ring capacity (a power of 2).
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn capacity(&self) -> usize {
        self.capacity as usize
    }

    /// The configured per-reservation batch size.
    #[must_use]
    pub fn default_batch(&self) -> usize {
        self.config.effective_publish_batch()
    }

    /// The delivery variant chosen at creation.
    #[must_use]
    pub fn delivery(&self) -> DeliveryMode {
        self.config.delivery
    }

    /// Current termination state.
    #[must_use]
    pub fn state(&self) -> TerminationState {
        self.state.load()
    }

    /// Number of registered producers that have not yet confirmed
    /// termination (or otherwise retired).
    #[must_use]
    pub fn producer_count(&self) -> usize {
        self.producers.load(Ordering::Acquire)
    }

    /// Number of active subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.load(Ordering::Acquire)
    }

    /// True iff at least one producer is suspended inside
    /// `request_permission_to_publish*`.
    #[must_use]
    pub fn is_waiting(&self) -> bool {
        self.waiting_producers.load(Ordering::Acquire) > 0
    }

    /// Committed messages not yet consumed by the slowest subscriber.
    /// A snapshot; may change immediately after returning.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn len(&self) -> usize {
        let commit = self.commit_seq.load(Ordering::Acquire);
        commit.saturating_sub(self.consumer_floor()) as usize
    }

    /// True when no committed message is awaiting the slowest subscriber.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Registers a producer.
    ///
    /// # Errors
    ///
    /// Fails once the termination handshake has begun or when the
    /// producer budget is exhausted.
    pub fn register_producer(&self) -> Result<PublisherToken<T>, ChannelError> {
        if self.state() >= TerminationState::ConsumerInitialized {
            return Err(ChannelError::RegisterAfterTermination(self.name.clone()));
        }
        let previous = self.producers.fetch_add(1, Ordering::AcqRel);
        if previous >= self.config.max_producers {
            self.producers.fetch_sub(1, Ordering::AcqRel);
            return Err(ChannelError::MaxProducersReached(self.config.max_producers));
        }
        Ok(PublisherToken::new())
    }

    /// Registers a subscriber, allocating it a cursor starting at the
    /// current commit tail.
    ///
    /// # Errors
    ///
    /// Fails once the termination handshake has begun or when all
    /// cursor slots are occupied.
    pub fn subscribe(&self) -> Result<SubscriberToken, ChannelError> {
        if self.state() >= TerminationState::ConsumerInitialized {
            return Err(ChannelError::SubscribeAfterTermination(self.name.clone()));
        }
        // New subscribers do not see history: they start at the commit
        // tail, or at the shared claim cursor when deliveries compete.
        let start = match self.config.delivery {
            DeliveryMode::FanOut => self.commit_seq.load(Ordering::Acquire),
            DeliveryMode::LoadBalanced => self.claim_seq.load(Ordering::Acquire),
        };
        for (slot_id, slot) in self.cursors.iter().enumerate() {
            if slot.try_claim(start) {
                self.subscribers.fetch_add(1, Ordering::AcqRel);
                return Ok(SubscriberToken::new(slot_id, start));
            }
        }
        Err(ChannelError::MaxSubscribersReached(self.config.max_subscribers))
    }

    /// Detaches a subscriber. Its cursor stops holding back producers.
    pub fn unsubscribe(&self, token: &SubscriberToken) {
        let slot = &self.cursors[token.slot];
        if slot.is_active() {
            slot.deactivate();
            self.subscribers.fetch_sub(1, Ordering::AcqRel);
        }
    }

    /// Consumer-side: begins the termination handshake.
    pub fn initialize_termination(&self) {
        if self.state.advance_to(TerminationState::ConsumerInitialized) {
            tracing::debug!(channel = %self.name, "termination initialized");
        }
    }

    /// Producer-side: acknowledges the shutdown and retires this
    /// producer. The `PUBLISHER_RECEIVED` transition fires when the last
    /// registered producer confirms, so the consumer-side drain observes
    /// it only after every upstream queue has been flushed.
    pub fn confirm_termination(&self) {
        let previous = self.producers.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "confirm_termination without registration");
        if previous == 1
            && self.state.transition(
                TerminationState::ConsumerInitialized,
                TerminationState::PublisherReceived,
            )
        {
            tracing::debug!(channel = %self.name, "termination confirmed by last producer");
        }
    }

    /// Consumer-side: completes the handshake after draining every
    /// in-flight slot.
    pub fn finalize_termination(&self) {
        if self.state.advance_to(TerminationState::ConsumerFinalized) {
            tracing::debug!(channel = %self.name, "termination finalized");
        }
    }

    /// The slowest point producers must not overrun.
    ///
    /// In both delivery modes this is the minimum over the active
    /// subscriber cursors. A load-balanced subscriber publishes the
    /// position it is about to claim before claiming it, so the floor
    /// covers takes that are still in progress and the slot cannot be
    /// handed back to a producer mid-take.
    fn consumer_floor(&self) -> u64 {
        let mut min = u64::MAX;
        for slot in &*self.cursors {
            if slot.is_active() {
                min = min.min(slot.read_seq.load(Ordering::Acquire));
            }
        }
        if min == u64::MAX {
            // No subscribers; nothing holds producers back beyond the
            // unclaimed (load-balanced) or uncommitted backlog.
            match self.config.delivery {
                DeliveryMode::LoadBalanced => self.claim_seq.load(Ordering::Acquire),
                DeliveryMode::FanOut => self.commit_seq.load(Ordering::Acquire),
            }
        } else {
            min
        }
    }

    /// Reserves up to `batch` contiguous sequence numbers for `token`.
    ///
    /// Suspends while the ring is full. Returns `false` iff the
    /// termination handshake has begun *and* no reservation could be
    /// granted; the caller reacts by entering its drain phase.
    pub async fn request_permission_to_publish(
        &self,
        token: &mut PublisherToken<T>,
        batch: usize,
    ) -> bool {
        if token.reserved() != 0 {
            fatal("permission requested while a reservation is still live");
        }
        let want = (batch.max(1) as u64).min(self.capacity);
        let mut waiting = false;
        loop {
            let reserve = self.reserve_seq.load(Ordering::Acquire);
            let floor = self.consumer_floor();
            let free = self.capacity.saturating_sub(reserve - floor);

            if free > 0 {
                let grant = want.min(free);
                if self
                    .reserve_seq
                    .compare_exchange(reserve, reserve + grant, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    token.grant(reserve, grant);
                    if waiting {
                        self.waiting_producers.fetch_sub(1, Ordering::AcqRel);
                    }
                    return true;
                }
                // Lost the race for this range; retry immediately.
                continue;
            }

            if self.state() >= TerminationState::ConsumerInitialized {
                if waiting {
                    self.waiting_producers.fetch_sub(1, Ordering::AcqRel);
                }
                return false;
            }

            if !waiting {
                waiting = true;
                self.waiting_producers.fetch_add(1, Ordering::AcqRel);
            }
            tokio::task::yield_now().await;
        }
    }

    /// The single-sequence specialisation used during the drain phase.
    pub async fn request_permission_to_publish_one(&self, token: &mut PublisherToken<T>) -> bool {
        self.request_permission_to_publish(token, 1).await
    }

    /// Commits every queued message into its reserved slot and makes
    /// the batch observable.
    ///
    /// Precondition: the token's queue length equals its reservation
    /// length; a mismatch is an engine invariant violation and aborts.
    pub async fn publish_messages(&self, token: &mut PublisherToken<T>) {
        let count = token.reserved();
        if token.queued() != count {
            fatal("publish with mismatched token sizes");
        }
        if count == 0 {
            return;
        }
        let first = token.next_seq;
        let end = token.end_seq;
        for (seq, message) in (first..end).zip(token.queue.drain(..count)) {
            let idx = (seq & self.mask) as usize;
            // SAFETY: `seq` was reserved by this token, so no other
            // producer writes this slot, and the grant bound guarantees
            // every subscriber has consumed `seq - capacity`.
            unsafe { *self.ring[idx].get() = Some(message) };
        }
        token.next_seq = end;
        self.commit_in_order(first, end).await;
    }

    /// Commits exactly one queued message; used by the drain trickle.
    pub async fn publish_one(&self, token: &mut PublisherToken<T>) {
        if token.queued() == 0 || token.reserved() == 0 {
            fatal("publish_one without a queued message and reservation");
        }
        let seq = token.next_seq;
        let message = match token.queue.pop_front() {
            Some(message) => message,
            None => fatal("publish_one raced on its own token"),
        };
        let idx = (seq & self.mask) as usize;
        // SAFETY: as in `publish_messages`.
        unsafe { *self.ring[idx].get() = Some(message) };
        token.next_seq = seq + 1;
        self.commit_in_order(seq, seq + 1).await;
    }

    /// Commits any still-unused reserved sequences as empty slots.
    ///
    /// In-order committing means every granted sequence must eventually
    /// commit or later reservations stall; releasing lets a routine
    /// abandon the tail of a batch at shutdown. Readers skip the empty
    /// slots. Any messages still queued without a matching publish are
    /// dropped (the downstream side has already finalized).
    pub async fn release_reservation(&self, token: &mut PublisherToken<T>) {
        if !token.queue.is_empty() {
            tracing::debug!(
                channel = %self.name,
                dropped = token.queue.len(),
                "releasing reservation with undeliverable messages"
            );
            token.queue.clear();
        }
        let first = token.next_seq;
        let end = token.end_seq;
        if first == end {
            return;
        }
        for seq in first..end {
            let idx = (seq & self.mask) as usize;
            // SAFETY: as in `publish_messages`; the slot is cleared so a
            // previous lap's value is not re-observed.
            unsafe { *self.ring[idx].get() = None };
        }
        token.next_seq = end;
        self.commit_in_order(first, end).await;
    }

    /// Waits until the commit cursor reaches `first`, then advances it
    /// to `end`. Commits land in reservation order, which keeps the
    /// merge across producers deterministic once grants are handed out.
    async fn commit_in_order(&self, first: u64, end: u64) {
        loop {
            let commit = self.commit_seq.load(Ordering::Acquire);
            if commit == first {
                break;
            }
            debug_assert!(commit < first, "commit cursor overran a reservation");
            tokio::task::yield_now().await;
        }
        self.commit_seq.store(end, Ordering::Release);
    }

    /// Steps the subscriber's generator: returns the next committed
    /// message, or `None` when the subscriber is caught up (or
    /// detached). Does not advance the consumption cursor; pair with
    /// [`notify_message_consumed`](Self::notify_message_consumed).
    pub fn try_next_message(&self, token: &mut SubscriberToken) -> Option<T>
    where
        T: Clone,
    {
        match self.config.delivery {
            DeliveryMode::FanOut => {
                let slot = &self.cursors[token.slot];
                if !slot.is_active() {
                    return None;
                }
                loop {
                    let pos = token.cursor;
                    if pos >= self.commit_seq.load(Ordering::Acquire) {
                        return None;
                    }
                    let idx = (pos & self.mask) as usize;
                    // SAFETY: `pos` is below the commit cursor, so the
                    // slot write happened-before our Acquire load, and
                    // no producer may overwrite it until this cursor
                    // advances past `pos`.
                    let value = unsafe { (*self.ring[idx].get()).clone() };
                    match value {
                        Some(message) => return Some(message),
                        None => {
                            // Released (empty) sequence; skip it.
                            token.cursor = pos + 1;
                            slot.read_seq.store(pos + 1, Ordering::Release);
                        }
                    }
                }
            }
            DeliveryMode::LoadBalanced => {
                let slot = &self.cursors[token.slot];
                if !slot.is_active() {
                    return None;
                }
                loop {
                    let pos = self.claim_seq.load(Ordering::Acquire);
                    // Publish the position about to be claimed so the
                    // producer floor covers this take until notified.
                    slot.read_seq.store(pos, Ordering::Release);
                    token.cursor = pos;
                    if pos >= self.commit_seq.load(Ordering::Acquire) {
                        return None;
                    }
                    if self
                        .claim_seq
                        .compare_exchange(pos, pos + 1, Ordering::AcqRel, Ordering::Acquire)
                        .is_err()
                    {
                        continue;
                    }
                    let idx = (pos & self.mask) as usize;
                    // SAFETY: the claim CAS grants this subscriber
                    // exclusive ownership of a committed slot, and the
                    // cursor published above keeps producers away from
                    // it until `notify_message_consumed`.
                    let value = unsafe { (*self.ring[idx].get()).take() };
                    match value {
                        Some(message) => return Some(message),
                        // Released (empty) sequence; claim the next.
                        None => continue,
                    }
                }
            }
        }
    }

    /// Advances the subscriber's cursor past the message last returned
    /// by [`try_next_message`](Self::try_next_message), publishing the
    /// new minimum to producers.
    pub fn notify_message_consumed(&self, token: &mut SubscriberToken) {
        token.cursor += 1;
        self.cursors[token.slot]
            .read_seq
            .store(token.cursor, Ordering::Release);
    }

    /// True when this subscriber has observed everything committed.
    #[must_use]
    pub fn is_drained(&self, token: &SubscriberToken) -> bool {
        let commit = self.commit_seq.load(Ordering::Acquire);
        match self.config.delivery {
            DeliveryMode::FanOut => token.cursor >= commit,
            DeliveryMode::LoadBalanced => self.claim_seq.load(Ordering::Acquire) >= commit,
        }
    }
}

impl<T> std::fmt::Debug for MultiChannel<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiChannel")
            .field("name", &self.name)
            .field("capacity", &self.capacity)
            .field("state", &self.state())
            .field("producers", &self.producer_count())
            .field("subscribers", &self.subscriber_count())
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
#[allow(clippy::cast_possible_truncation)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn channel(capacity: usize) -> MultiChannel<u64> {
        MultiChannel::new("test", ChannelConfig::with_capacity(capacity))
    }

    async fn fill_and_publish(chan: &MultiChannel<u64>, token: &mut PublisherToken<u64>, base: u64) {
        for i in 0..token.unfilled() as u64 {
            token.push(base + i);
        }
        chan.publish_messages(token).await;
    }

    // --- Registration ---

    #[test]
    fn test_register_and_subscribe() {
        let chan = channel(8);
        assert_eq!(chan.capacity(), 8);
        assert_eq!(chan.producer_count(), 0);

        let _producer = chan.register_producer().unwrap();
        let subscriber = chan.subscribe().unwrap();
        assert_eq!(chan.producer_count(), 1);
        assert_eq!(chan.subscriber_count(), 1);
        assert_eq!(subscriber.cursor(), 0);
    }

    #[test]
    fn test_registration_refused_after_termination() {
        let chan = channel(8);
        chan.initialize_termination();

        assert!(matches!(
            chan.subscribe(),
            Err(ChannelError::SubscribeAfterTermination(_))
        ));
        assert!(matches!(
            chan.register_producer(),
            Err(ChannelError::RegisterAfterTermination(_))
        ));
    }

    #[test]
    fn test_subscriber_slots_exhaust() {
        let config = ChannelConfig::builder().capacity(8).max_subscribers(2).build();
        let chan: MultiChannel<u64> = MultiChannel::new("small", config);

        chan.subscribe().unwrap();
        chan.subscribe().unwrap();
        assert!(matches!(
            chan.subscribe(),
            Err(ChannelError::MaxSubscribersReached(2))
        ));
    }

    #[test]
    fn test_producer_budget_exhausts() {
        let config = ChannelConfig::builder().capacity(8).max_producers(1).build();
        let chan: MultiChannel<u64> = MultiChannel::new("small", config);

        let _first = chan.register_producer().unwrap();
        assert!(matches!(
            chan.register_producer(),
            Err(ChannelError::MaxProducersReached(1))
        ));
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let chan = channel(8);
        let token = chan.subscribe().unwrap();
        assert_eq!(chan.subscriber_count(), 1);

        chan.unsubscribe(&token);
        chan.unsubscribe(&token);
        assert_eq!(chan.subscriber_count(), 0);
    }

    // --- Publish / consume ---

    #[tokio::test]
    async fn test_single_producer_roundtrip() {
        let chan = channel(8);
        let mut producer = chan.register_producer().unwrap();
        let mut subscriber = chan.subscribe().unwrap();

        assert!(chan.request_permission_to_publish(&mut producer, 4).await);
        assert_eq!(producer.reserved(), 4);
        fill_and_publish(&chan, &mut producer, 10).await;

        for expected in 10..14 {
            let message = chan.try_next_message(&mut subscriber).unwrap();
            assert_eq!(message, expected);
            chan.notify_message_consumed(&mut subscriber);
        }
        assert!(chan.try_next_message(&mut subscriber).is_none());
        assert!(chan.is_drained(&subscriber));
    }

    #[tokio::test]
    async fn test_fan_out_delivers_to_every_subscriber() {
        let chan = channel(8);
        let mut producer = chan.register_producer().unwrap();
        let mut first = chan.subscribe().unwrap();
        let mut second = chan.subscribe().unwrap();

        assert!(chan.request_permission_to_publish(&mut producer, 3).await);
        fill_and_publish(&chan, &mut producer, 0).await;

        for subscriber in [&mut first, &mut second] {
            let mut seen = Vec::new();
            while let Some(message) = chan.try_next_message(subscriber) {
                seen.push(message);
                chan.notify_message_consumed(subscriber);
            }
            assert_eq!(seen, vec![0, 1, 2]);
        }
    }

    #[tokio::test]
    async fn test_load_balanced_delivers_exactly_once() {
        let config = ChannelConfig::builder()
            .capacity(8)
            .delivery(DeliveryMode::LoadBalanced)
            .build();
        let chan: MultiChannel<u64> = MultiChannel::new("lb", config);
        let mut producer = chan.register_producer().unwrap();
        let mut first = chan.subscribe().unwrap();
        let mut second = chan.subscribe().unwrap();

        assert!(chan.request_permission_to_publish(&mut producer, 4).await);
        fill_and_publish(&chan, &mut producer, 0).await;

        let mut seen = Vec::new();
        loop {
            let mut progressed = false;
            for subscriber in [&mut first, &mut second] {
                if let Some(message) = chan.try_next_message(subscriber) {
                    seen.push(message);
                    chan.notify_message_consumed(subscriber);
                    progressed = true;
                }
            }
            if !progressed {
                break;
            }
        }
        seen.sort_unstable();
        assert_eq!(seen, vec![0, 1, 2, 3]);
    }

    // --- Flow control ---

    #[tokio::test]
    async fn test_grant_limited_by_free_slots() {
        let chan = channel(4);
        let mut producer = chan.register_producer().unwrap();
        let _subscriber = chan.subscribe().unwrap();

        assert!(chan.request_permission_to_publish(&mut producer, 64).await);
        assert_eq!(producer.reserved(), 4);
        fill_and_publish(&chan, &mut producer, 0).await;
        assert_eq!(chan.len(), 4);
    }

    #[tokio::test]
    async fn test_request_false_when_terminating_and_full() {
        let chan = channel(2);
        let mut producer = chan.register_producer().unwrap();
        let _subscriber = chan.subscribe().unwrap();

        assert!(chan.request_permission_to_publish(&mut producer, 2).await);
        fill_and_publish(&chan, &mut producer, 0).await;

        chan.initialize_termination();
        // Ring is full and the handshake has begun: no grant.
        assert!(!chan.request_permission_to_publish(&mut producer, 1).await);
    }

    #[tokio::test]
    async fn test_request_granted_while_terminating_with_space() {
        let chan = channel(4);
        let mut producer = chan.register_producer().unwrap();
        let _subscriber = chan.subscribe().unwrap();

        chan.initialize_termination();
        // Space is available, so the drain trickle can still reserve.
        assert!(chan.request_permission_to_publish_one(&mut producer).await);
        assert_eq!(producer.reserved(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_suspended_producer_resumes_after_consumption() {
        let chan = Arc::new(channel(2));
        let mut producer = chan.register_producer().unwrap();
        let mut subscriber = chan.subscribe().unwrap();

        assert!(chan.request_permission_to_publish(&mut producer, 2).await);
        fill_and_publish(&chan, &mut producer, 0).await;

        let blocked = {
            let chan = Arc::clone(&chan);
            tokio::spawn(async move {
                assert!(chan.request_permission_to_publish(&mut producer, 1).await);
                producer.push(99);
                chan.publish_messages(&mut producer).await;
            })
        };

        // Wait until the producer is parked in its permission request.
        while !chan.is_waiting() {
            tokio::task::yield_now().await;
        }

        // Draining frees slots and wakes it.
        let mut seen = Vec::new();
        while seen.len() < 3 {
            match chan.try_next_message(&mut subscriber) {
                Some(message) => {
                    chan.notify_message_consumed(&mut subscriber);
                    seen.push(message);
                }
                None => tokio::task::yield_now().await,
            }
        }
        blocked.await.unwrap();

        assert_eq!(seen, vec![0, 1, 99]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_commits_land_in_reservation_order() {
        let chan = Arc::new(channel(8));
        let mut early = chan.register_producer().unwrap();
        let mut late = chan.register_producer().unwrap();
        let mut subscriber = chan.subscribe().unwrap();

        assert!(chan.request_permission_to_publish(&mut early, 2).await);
        assert!(chan.request_permission_to_publish(&mut late, 2).await);

        // The later reservation publishes first; it must not become
        // observable until the earlier one commits.
        let late_task = {
            let chan = Arc::clone(&chan);
            tokio::spawn(async move {
                late.push(10);
                late.push(11);
                chan.publish_messages(&mut late).await;
            })
        };

        tokio::task::yield_now().await;
        assert!(chan.try_next_message(&mut subscriber).is_none());

        early.push(0);
        early.push(1);
        chan.publish_messages(&mut early).await;
        late_task.await.unwrap();

        let mut seen = Vec::new();
        while let Some(message) = chan.try_next_message(&mut subscriber) {
            seen.push(message);
            chan.notify_message_consumed(&mut subscriber);
        }
        assert_eq!(seen, vec![0, 1, 10, 11]);
    }

    #[tokio::test]
    async fn test_release_reservation_skips_empty_slots() {
        let chan = channel(8);
        let mut producer = chan.register_producer().unwrap();
        let mut subscriber = chan.subscribe().unwrap();

        assert!(chan.request_permission_to_publish(&mut producer, 4).await);
        producer.push(7);
        chan.publish_one(&mut producer).await;
        chan.release_reservation(&mut producer).await;

        // A follow-up reservation is not stalled by the released tail.
        assert!(chan.request_permission_to_publish_one(&mut producer).await);
        producer.push(8);
        chan.publish_one(&mut producer).await;

        let mut seen = Vec::new();
        while let Some(message) = chan.try_next_message(&mut subscriber) {
            seen.push(message);
            chan.notify_message_consumed(&mut subscriber);
        }
        assert_eq!(seen, vec![7, 8]);
    }

    // --- Termination handshake ---

    #[test]
    fn test_confirm_fires_on_last_producer() {
        let chan = channel(8);
        let _first = chan.register_producer().unwrap();
        let _second = chan.register_producer().unwrap();

        chan.initialize_termination();
        chan.confirm_termination();
        assert_eq!(chan.state(), TerminationState::ConsumerInitialized);

        chan.confirm_termination();
        assert_eq!(chan.state(), TerminationState::PublisherReceived);

        chan.finalize_termination();
        assert_eq!(chan.state(), TerminationState::ConsumerFinalized);
    }

    #[test]
    fn test_confirm_before_initialize_leaves_running() {
        let chan = channel(8);
        let _producer = chan.register_producer().unwrap();

        // A producer retiring while the channel still runs (disabled
        // publisher) must not corrupt the state machine.
        chan.confirm_termination();
        assert_eq!(chan.state(), TerminationState::Running);
        assert_eq!(chan.producer_count(), 0);

        chan.initialize_termination();
        chan.finalize_termination();
        assert_eq!(chan.state(), TerminationState::ConsumerFinalized);
    }

    #[test]
    fn test_state_is_monotonic() {
        let chan = channel(8);
        chan.initialize_termination();
        chan.initialize_termination();
        assert_eq!(chan.state(), TerminationState::ConsumerInitialized);

        chan.finalize_termination();
        chan.initialize_termination();
        assert_eq!(chan.state(), TerminationState::ConsumerFinalized);
    }

    // --- Degenerate capacity ---

    #[tokio::test]
    async fn test_capacity_one_roundtrip() {
        let chan = channel(1);
        let mut producer = chan.register_producer().unwrap();
        let mut subscriber = chan.subscribe().unwrap();

        for i in 0..3 {
            assert!(chan.request_permission_to_publish(&mut producer, 8).await);
            assert_eq!(producer.reserved(), 1);
            producer.push(i);
            chan.publish_messages(&mut producer).await;

            assert_eq!(chan.try_next_message(&mut subscriber), Some(i));
            chan.notify_message_consumed(&mut subscriber);
        }
    }

    #[test]
    fn test_debug_format() {
        let chan = channel(8);
        let rendered = format!("{chan:?}");
        assert!(rendered.contains("MultiChannel"));
        assert!(rendered.contains("capacity"));
    }
}
