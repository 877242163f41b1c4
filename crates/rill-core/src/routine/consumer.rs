//! The consumer driver (tail of chain).

use std::sync::Arc;

use crate::cancellation::Cancellable;
use crate::channel::{MultiChannel, SubscriberToken};

use super::{flush, upstream_flushed, DrainLocks};

/// Keeps invoking the consumer function on arriving messages until its
/// token is cancelled, then drives the termination handshake.
///
/// The consumer is the tail of the chain and the only valid shutdown
/// initiator. After its loop it initialises termination, flushes every
/// residual upstream message (so no suspended producer is left holding
/// the pool), and finalises.
///
/// A consumer whose handle was merely *disabled* leaves quietly when
/// other subscribers remain on the channel; the last subscriber to
/// leave always runs the full handshake so the network can terminate.
pub async fn spin_consumer<T, F>(
    channel: Arc<MultiChannel<T>>,
    mut token: SubscriberToken,
    mut callback: Cancellable<F>,
    locks: Arc<DrainLocks>,
) where
    T: Clone + Send + 'static,
    F: FnMut(T) + Send + 'static,
{
    tracing::debug!(id = callback.id(), channel = %channel.name(), "consumer routine started");

    while !callback.is_cancellation_requested() {
        match channel.try_next_message(&mut token) {
            Some(message) => {
                callback.consume(message);
                channel.notify_message_consumed(&mut token);
            }
            None => tokio::task::yield_now().await,
        }
    }

    // Synchronize routines only when terminating; consumer drains on
    // one pool must not interleave.
    let _guard = locks.consumer().lock().await;

    if callback.is_detach_requested() && channel.subscriber_count() > 1 {
        channel.unsubscribe(&token);
        callback.mark_cancelled();
        tracing::debug!(id = callback.id(), channel = %channel.name(), "consumer detached");
        return;
    }

    channel.initialize_termination();
    loop {
        flush(&channel, &mut token, |message| callback.consume(message)).await;
        if upstream_flushed(&channel, &token) {
            break;
        }
        tokio::task::yield_now().await;
    }

    if channel.subscriber_count() > 1 {
        channel.unsubscribe(&token);
    } else {
        channel.finalize_termination();
    }
    callback.mark_cancelled();
    tracing::debug!(id = callback.id(), channel = %channel.name(), "consumer routine finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{ChannelConfig, TerminationState};
    use crate::routine::spin_publisher;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Duration;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_consumer_drains_everything_on_cancel() {
        let channel = Arc::new(MultiChannel::new("pipe", ChannelConfig::with_capacity(4)));
        let producer_token = channel.register_producer().unwrap();
        let subscriber_token = channel.subscribe().unwrap();

        let produced = Arc::new(AtomicU64::new(0));
        let consumed = Arc::new(AtomicU64::new(0));

        let produced_counter = Arc::clone(&produced);
        let publisher = Cancellable::new(move || produced_counter.fetch_add(1, Ordering::Relaxed));

        let consumed_counter = Arc::clone(&consumed);
        let consumer = Cancellable::new(move |_message: u64| {
            consumed_counter.fetch_add(1, Ordering::Relaxed);
        });
        let cancel = consumer.handle();

        let locks = Arc::new(DrainLocks::new());
        let publish_task = tokio::spawn(spin_publisher(
            Arc::clone(&channel),
            producer_token,
            publisher,
        ));
        let consume_task = tokio::spawn(spin_consumer(
            Arc::clone(&channel),
            subscriber_token,
            consumer,
            locks,
        ));

        tokio::time::sleep(Duration::from_millis(10)).await;
        cancel.request_cancellation();

        publish_task.await.unwrap();
        consume_task.await.unwrap();

        assert_eq!(produced.load(Ordering::Relaxed), consumed.load(Ordering::Relaxed));
        assert_eq!(channel.state(), TerminationState::ConsumerFinalized);
        assert!(!channel.is_waiting());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_detached_consumer_leaves_channel_running() {
        let channel = Arc::new(MultiChannel::new("pipe", ChannelConfig::with_capacity(8)));
        let producer_token = channel.register_producer().unwrap();
        let first_token = channel.subscribe().unwrap();
        let second_token = channel.subscribe().unwrap();

        let publisher = Cancellable::new(|| 1u64);
        let first = Cancellable::new(|_message: u64| {});
        let second = Cancellable::new(|_message: u64| {});
        let detach = first.handle();
        let cancel = second.handle();

        let locks = Arc::new(DrainLocks::new());
        let tasks = vec![
            tokio::spawn(spin_publisher(Arc::clone(&channel), producer_token, publisher)),
            tokio::spawn(spin_consumer(
                Arc::clone(&channel),
                first_token,
                first,
                Arc::clone(&locks),
            )),
            tokio::spawn(spin_consumer(
                Arc::clone(&channel),
                second_token,
                second,
                locks,
            )),
        ];

        tokio::time::sleep(Duration::from_millis(5)).await;
        detach.request_detach();
        tokio::time::sleep(Duration::from_millis(5)).await;
        // The channel must still be running with one subscriber left.
        assert_eq!(channel.state(), TerminationState::Running);
        assert_eq!(channel.subscriber_count(), 1);

        cancel.request_cancellation();
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(channel.state(), TerminationState::ConsumerFinalized);
    }
}
