//! # Rill
//!
//! Declarative dataflow pipelines. A user declares a chain of plain
//! functions — a publisher at the head, zero or more transformers in
//! the middle, a consumer at the tail — and `rill` connects them with
//! bounded, typed multi-producer/multi-consumer channels and drives
//! them as cooperative tasks on a shared worker pool until a
//! cancellation deadline elapses. Shutdown is a handshake, not an
//! abort: in-flight messages are drained before [`spin`] returns.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::time::Duration;
//!
//! fn hello_world() -> String {
//!     "Hello World".to_string()
//! }
//!
//! let mut net = rill::network(
//!     rill::chain()
//!         .publish(hello_world)
//!         .consume(|message: String| tracing::info!("received: {message}")),
//! );
//!
//! // Cancellation is cooperative and its timing non-deterministic;
//! // the pipeline drains before spin returns.
//! net.cancel_after(Duration::from_millis(10));
//! rill::spin(net).unwrap();
//! ```
//!
//! ## Lower-level entry points
//!
//! When the chain sugar does not fit — several subscribers fanning out
//! of one channel, several publishers fanning in — routines attach to
//! named registry channels directly:
//!
//! ```rust,no_run
//! use std::time::Duration;
//!
//! let mut net = rill::Network::new();
//! rill::publish::<u64, _>("readings", &mut net, || 42).unwrap();
//! let handle = rill::subscribe::<u64, _>("readings", &mut net, |value| {
//!     assert_eq!(value, 42);
//! })
//! .unwrap();
//! tracing::debug!("attached {handle}");
//!
//! net.cancel_after(Duration::from_millis(10));
//! rill::spin(net).unwrap();
//! ```

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod chain;
pub mod network;

pub use chain::{chain, network, Chain, Complete, Empty, Flowing, Terminal};
pub use network::{Network, NetworkConfig};

pub use rill_core::channel::{
    ChannelConfig, ChannelConfigBuilder, ChannelError, ChannelRegistry, DeliveryMode,
    MultiChannel, TerminationState,
};
pub use rill_core::{
    CallbackHandle, CallbackKind, Cancellable, CancellationHandle, CancellationSource, Error,
    Result,
};

/// Launches every routine of `network` on the pool and blocks until the
/// termination handshake completes.
///
/// # Errors
///
/// Fails when the worker pool cannot be built.
pub fn spin(network: Network) -> Result<()> {
    network.spin()
}

/// Attaches a consumer routine to the named channel of `network`.
///
/// # Errors
///
/// Fails when the channel is already terminating or its subscriber
/// slots are exhausted.
pub fn subscribe<T, F>(
    channel_name: &str,
    network: &mut Network,
    callback: F,
) -> Result<CallbackHandle>
where
    T: Clone + Send + 'static,
    F: FnMut(T) + Send + 'static,
{
    network.subscribe::<T, F>(channel_name, callback)
}

/// Attaches a publisher routine to the named channel of `network`.
///
/// # Errors
///
/// Fails when the channel is already terminating or its producer budget
/// is exhausted.
pub fn publish<T, F>(
    channel_name: &str,
    network: &mut Network,
    callback: F,
) -> Result<CallbackHandle>
where
    T: Clone + Send + 'static,
    F: FnMut() -> T + Send + 'static,
{
    network.publish::<T, F>(channel_name, callback)
}
