//! The channel termination state machine.
//!
//! Shutdown is a two-phase handshake driven from the consumer side:
//!
//! ```text
//! RUNNING ──initialize──▶ CONSUMER_INITIALIZED ──confirm──▶
//!     PUBLISHER_RECEIVED ──finalize──▶ CONSUMER_FINALIZED
//! ```
//!
//! `initialize` and `finalize` are consumer-side transitions; `confirm`
//! is producer-side. The state is atomic and monotonically
//! non-decreasing; every suspended producer observes
//! `CONSUMER_INITIALIZED` on its next poll and exits its permission
//! request with `false`.

use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle states of a channel, in their total order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum TerminationState {
    /// Normal operation.
    Running = 0,
    /// The consumer side has decided to quit.
    ConsumerInitialized = 1,
    /// Every producer has observed the shutdown and flushed its queue.
    PublisherReceived = 2,
    /// The consumer side has drained every in-flight slot.
    ConsumerFinalized = 3,
}

impl TerminationState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            0 => Self::Running,
            1 => Self::ConsumerInitialized,
            2 => Self::PublisherReceived,
            _ => Self::ConsumerFinalized,
        }
    }
}

impl std::fmt::Display for TerminationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Running => "running",
            Self::ConsumerInitialized => "consumer_initialized",
            Self::PublisherReceived => "publisher_received",
            Self::ConsumerFinalized => "consumer_finalized",
        };
        write!(f, "{name}")
    }
}

/// Atomic cell holding a [`TerminationState`] with monotonic advance.
#[derive(Debug)]
pub(crate) struct TerminationCell {
    raw: AtomicU8,
}

impl TerminationCell {
    pub(crate) fn new() -> Self {
        Self {
            raw: AtomicU8::new(TerminationState::Running as u8),
        }
    }

    pub(crate) fn load(&self) -> TerminationState {
        TerminationState::from_raw(self.raw.load(Ordering::Acquire))
    }

    /// Performs the exact transition `from -> to`. Returns true on the
    /// winning call; losing calls (already advanced) are no-ops, which
    /// makes repeated handshake steps from parallel routines idempotent.
    pub(crate) fn transition(&self, from: TerminationState, to: TerminationState) -> bool {
        debug_assert!(from < to);
        self.raw
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Advances to `to` from any lower state. Monotonic: a higher
    /// current state is left untouched.
    pub(crate) fn advance_to(&self, to: TerminationState) -> bool {
        self.raw.fetch_max(to as u8, Ordering::AcqRel) < to as u8
    }
}
