//! Cooperative spin routines.
//!
//! A routine is one long-lived task on the shared worker pool that keeps
//! invoking its user function until cancelled or until its channel's
//! termination handshake tells it to stop. Routines suspend only at
//! channel boundaries: waiting for ring space, waiting for a new commit
//! past the cursor, or waiting on a drain mutex during shutdown.
//!
//! Shutdown flows tail-to-head. The consumer initialises termination on
//! its channel, flushes whatever upstream producers still hold, and
//! finalises; a transformer confirms downstream, trickles residual
//! messages to the tail one slot at a time, and then runs the same
//! consumer-side drain against its own upstream channel.

mod consumer;
mod publisher;
mod transformer;

pub use consumer::spin_consumer;
pub use publisher::spin_publisher;
pub use transformer::spin_transformer;

use tokio::sync::Mutex;

use crate::cancellation::Cancellable;
use crate::channel::{MultiChannel, SubscriberToken, TerminationState};

/// The two mutexes that serialise shutdown drains on one worker pool.
///
/// Consumer drains must not interleave (the last subscriber out runs
/// the finalisation), and transformer drains must not interleave with
/// each other. Each network owns one instance and hands it to every
/// routine it launches.
#[derive(Debug, Default)]
pub struct DrainLocks {
    transformer: Mutex<()>,
    consumer: Mutex<()>,
}

impl DrainLocks {
    /// Creates a fresh pair of drain mutexes.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn transformer(&self) -> &Mutex<()> {
        &self.transformer
    }

    pub(crate) fn consumer(&self) -> &Mutex<()> {
        &self.consumer
    }
}

/// Keeps calling the spinner function until it is cancelled.
///
/// Spinners own no channels; they exist for periodic side-effecting
/// work driven by the same pool.
pub async fn spin_spinner<F>(mut callback: Cancellable<F>)
where
    F: FnMut() + Send + 'static,
{
    tracing::debug!(id = callback.id(), "spinner routine started");
    while !callback.is_cancellation_requested() {
        callback.produce();
        tokio::task::yield_now().await;
    }
    callback.mark_cancelled();
    tracing::debug!(id = callback.id(), "spinner routine finished");
}

/// Drains every currently-committed message through `apply`, repeating
/// while a producer is suspended on the other end of the channel.
///
/// Exists because a suspended producer must be released even after the
/// consumer side has decided to stop; a parked producer task would
/// otherwise keep the pool from joining.
pub(crate) async fn flush<T, F>(
    channel: &MultiChannel<T>,
    token: &mut SubscriberToken,
    mut apply: F,
) where
    T: Clone,
    F: FnMut(T),
{
    loop {
        while let Some(message) = channel.try_next_message(token) {
            apply(message);
            channel.notify_message_consumed(token);
        }
        if !channel.is_waiting() {
            return;
        }
        tokio::task::yield_now().await;
    }
}

/// True once nothing more can arrive from upstream: every producer has
/// confirmed (or retired), none is suspended, and this subscriber has
/// observed everything committed.
pub(crate) fn upstream_flushed<T>(channel: &MultiChannel<T>, token: &SubscriberToken) -> bool {
    (channel.state() >= TerminationState::PublisherReceived || channel.producer_count() == 0)
        && !channel.is_waiting()
        && channel.is_drained(token)
}
