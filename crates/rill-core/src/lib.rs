//! # Rill Core
//!
//! The core dataflow engine for `rill`: bounded, typed multi-producer /
//! multi-consumer channels with sequence-based flow control, cooperative
//! spin routines, and the termination handshake that drains in-flight
//! messages on shutdown.
//!
//! This crate provides:
//! - **Cancellation**: one-shot cooperative cancel signals shared by a
//!   routine and its external handle
//! - **Multi-channel**: a power-of-two ring with per-subscriber cursors,
//!   reservation-order commits, and a monotonic termination state machine
//! - **Spin routines**: the publisher / transformer / consumer drivers
//!   that run as long-lived tasks on a shared worker pool
//! - **Channel registry**: a `(name, message type)`-keyed store so
//!   multiple publishers and subscribers fan in/out on named channels
//!
//! ## Design Principles
//!
//! 1. **Suspension only at channel boundaries** - routines yield while
//!    waiting for ring space or new commits, never inside user code
//! 2. **No locks on the message path** - cursors and state are atomics;
//!    the only mutexes serialise the shutdown drain
//! 3. **Nothing lost on shutdown** - the tail consumer initiates a
//!    handshake that flushes every upstream producer before finalising
//!
//! ## Example
//!
//! ```rust,ignore
//! use rill_core::channel::{ChannelConfig, MultiChannel};
//!
//! let channel: MultiChannel<u64> = MultiChannel::new("events", ChannelConfig::default());
//! let mut token = channel.register_producer()?;
//! ```

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
// The ring buffer needs unsafe for shared slot access; see the SAFETY
// comments in channel::multi.
#![allow(unsafe_code)]

pub mod cancellation;
pub mod channel;
pub mod handle;
pub mod routine;
pub mod sync;

pub use cancellation::{Cancellable, CancellationHandle, CancellationSource};
pub use channel::{ChannelConfig, ChannelError, ChannelRegistry, DeliveryMode, MultiChannel};
pub use handle::{CallbackHandle, CallbackKind};

/// Result type for rill-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for rill-core.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Channel registration or subscription errors.
    #[error("channel error: {0}")]
    Channel(#[from] channel::ChannelError),

    /// Scheduler construction errors.
    #[error("scheduler error: {0}")]
    Scheduler(#[from] std::io::Error),
}

/// Logs an unrecoverable runtime invariant violation and aborts the task.
///
/// These indicate a bug in the engine, never in user code; there is no
/// recovery path, so the failure is surfaced loudly and the process
/// terminates once the panic reaches `spin`.
pub(crate) fn fatal(message: &str) -> ! {
    tracing::error!("{message}");
    panic!("{message}");
}
