//! The transformer driver (middle of chain).

use std::sync::Arc;

use crate::cancellation::Cancellable;
use crate::channel::{MultiChannel, PublisherToken, SubscriberToken, TerminationState};

use super::{flush, upstream_flushed, DrainLocks};

/// Keeps pulling from the upstream channel, transforming, and batching
/// into the downstream channel until the downstream side initialises
/// termination; then drains both sides.
///
/// The steady phase batches: results are queued on the publisher token
/// and committed whenever the reservation is filled. The drain phase
/// trickles one message at a time to the downstream consumer (which is
/// driving the final drain), releases whatever reservation is left, and
/// then runs the consumer-side handshake against the upstream channel.
///
/// Cancelling a transformer directly is undefined; the driver reacts to
/// channel state only.
pub async fn spin_transformer<A, R, F>(
    input: Arc<MultiChannel<A>>,
    mut input_token: SubscriberToken,
    output: Arc<MultiChannel<R>>,
    mut output_token: PublisherToken<R>,
    mut callback: Cancellable<F>,
    locks: Arc<DrainLocks>,
) where
    A: Clone + Send + 'static,
    R: Clone + Send + 'static,
    F: FnMut(A) -> R + Send + 'static,
{
    tracing::debug!(
        id = callback.id(),
        input = %input.name(),
        output = %output.name(),
        "transformer routine started"
    );
    let batch = output.default_batch();

    if output.request_permission_to_publish(&mut output_token, batch).await {
        while output.state() < TerminationState::ConsumerInitialized {
            match input.try_next_message(&mut input_token) {
                Some(message) => {
                    output_token.push(callback.transform(message));
                    input.notify_message_consumed(&mut input_token);

                    if output_token.is_filled() {
                        output.publish_messages(&mut output_token).await;
                        if !output
                            .request_permission_to_publish(&mut output_token, batch)
                            .await
                        {
                            break;
                        }
                    }
                }
                None => tokio::task::yield_now().await,
            }
        }
    }

    let _guard = locks.transformer().lock().await;
    output.confirm_termination();

    // Trickle queued results and any residual upstream input one slot
    // at a time while the tail consumer drives the final drain.
    while output.state() < TerminationState::ConsumerFinalized {
        if output_token.queued() == 0 {
            match input.try_next_message(&mut input_token) {
                Some(message) => {
                    output_token.push(callback.transform(message));
                    input.notify_message_consumed(&mut input_token);
                }
                None => {
                    tokio::task::yield_now().await;
                    continue;
                }
            }
        }
        if output_token.reserved() == 0
            && !output.request_permission_to_publish_one(&mut output_token).await
        {
            break;
        }
        output.publish_one(&mut output_token).await;
    }
    output.release_reservation(&mut output_token).await;

    input.initialize_termination();
    loop {
        flush(&input, &mut input_token, |message| {
            // Downstream has finalized; residual results have nowhere
            // to go, but the upstream producer still must be released.
            let _ = callback.transform(message);
        })
        .await;
        if upstream_flushed(&input, &input_token) {
            break;
        }
        tokio::task::yield_now().await;
    }
    input.finalize_termination();
    callback.mark_cancelled();
    tracing::debug!(id = callback.id(), "transformer routine finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ChannelConfig;
    use crate::routine::{spin_consumer, spin_publisher};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Duration;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_three_stage_pipeline_terminates_cleanly() {
        let upstream = Arc::new(MultiChannel::new("up", ChannelConfig::with_capacity(8)));
        let downstream = Arc::new(MultiChannel::new("down", ChannelConfig::with_capacity(8)));

        let publisher_token = upstream.register_producer().unwrap();
        let transformer_in = upstream.subscribe().unwrap();
        let transformer_out = downstream.register_producer().unwrap();
        let consumer_token = downstream.subscribe().unwrap();

        let next = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&next);
        let publisher = Cancellable::new(move || counter.fetch_add(1, Ordering::Relaxed));
        let transformer = Cancellable::new(|value: u64| value + 1);

        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&received);
        let consumer = Cancellable::new(move |value: u64| sink.lock().push(value));
        let cancel = consumer.handle();

        let locks = Arc::new(DrainLocks::new());
        let tasks = vec![
            tokio::spawn(spin_publisher(Arc::clone(&upstream), publisher_token, publisher)),
            tokio::spawn(spin_transformer(
                Arc::clone(&upstream),
                transformer_in,
                Arc::clone(&downstream),
                transformer_out,
                transformer,
                Arc::clone(&locks),
            )),
            tokio::spawn(spin_consumer(
                Arc::clone(&downstream),
                consumer_token,
                consumer,
                locks,
            )),
        ];

        tokio::time::sleep(Duration::from_millis(10)).await;
        cancel.request_cancellation();
        for task in tasks {
            task.await.unwrap();
        }

        // Termination propagated tail-to-head.
        assert_eq!(downstream.state(), TerminationState::ConsumerFinalized);
        assert_eq!(upstream.state(), TerminationState::ConsumerFinalized);

        // The transform was applied and per-producer order preserved.
        let received = received.lock();
        assert!(received.iter().all(|value| *value >= 1));
        assert!(received.windows(2).all(|pair| pair[0] < pair[1]));
    }
}
