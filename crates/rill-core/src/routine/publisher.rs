//! The publisher driver (head of chain).

use std::sync::Arc;

use crate::cancellation::Cancellable;
use crate::channel::{MultiChannel, PublisherToken, TerminationState};

/// Keeps invoking the publisher function and committing its messages
/// until the downstream side initialises termination (or the
/// publisher's own token is cancelled through its handle).
///
/// The publisher sits at the head of the chain and has nothing in front
/// of it, so it owns no drain obligation beyond confirming the
/// termination handshake on its way out.
pub async fn spin_publisher<T, F>(
    channel: Arc<MultiChannel<T>>,
    mut token: PublisherToken<T>,
    mut callback: Cancellable<F>,
) where
    T: Clone + Send + 'static,
    F: FnMut() -> T + Send + 'static,
{
    tracing::debug!(id = callback.id(), channel = %channel.name(), "publisher routine started");
    let batch = channel.default_batch();

    while channel.state() < TerminationState::ConsumerInitialized
        && !callback.is_cancellation_requested()
    {
        if !channel.request_permission_to_publish(&mut token, batch).await {
            break;
        }
        for _ in 0..token.unfilled() {
            token.push(callback.produce());
        }
        channel.publish_messages(&mut token).await;
    }

    channel.release_reservation(&mut token).await;
    channel.confirm_termination();
    callback.mark_cancelled();
    tracing::debug!(id = callback.id(), channel = %channel.name(), "publisher routine finished");
}
