//! Recoverable channel errors.
//!
//! Registration against a channel whose shutdown handshake has begun is
//! refused with an error rather than silently ignored; callers surface
//! these to the network builder. Invariant violations inside channel
//! operations are not represented here — they are bugs in the runtime
//! and terminate the process.

/// Errors from channel registration operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    /// The channel's termination handshake has begun; no new
    /// subscriptions are accepted.
    #[error("channel '{0}' is terminating; subscription refused")]
    SubscribeAfterTermination(String),

    /// The channel's termination handshake has begun; no new producers
    /// are accepted.
    #[error("channel '{0}' is terminating; producer registration refused")]
    RegisterAfterTermination(String),

    /// All subscriber cursor slots are occupied.
    #[error("maximum subscribers ({0}) reached")]
    MaxSubscribersReached(usize),

    /// The producer budget is exhausted.
    #[error("maximum producers ({0}) reached")]
    MaxProducersReached(usize),
}
