//! Cooperative cancellation and the cancellable callable wrapper.
//!
//! A cancellation signal is a one-shot flag with two views: a
//! [`CancellationSource`] owned by the routine that observes it, and a
//! [`CancellationHandle`] held externally by whoever may request the
//! routine to stop. Transitions are monotonic and repeat requests are
//! idempotent.
//!
//! The signal carries two distinct requests:
//!
//! - **cancel** — network shutdown. The routine exits its loop and
//!   drives (or joins) the channel termination handshake.
//! - **detach** — handle [`disable`](crate::handle::CallbackHandle::disable).
//!   A consumer routine leaves its channel quietly when other
//!   subscribers remain, so the rest of the network keeps running.
//!
//! `is_cancellation_requested` observes either request; routines that
//! care about the difference ask [`CancellationSource::is_detach_requested`].

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

const CANCEL_BIT: u8 = 0b01;
const DETACH_BIT: u8 = 0b10;

/// Process-wide counter for stable callable identifiers.
static NEXT_CALLABLE_ID: AtomicU64 = AtomicU64::new(1);

/// The routine-owned view of a cancellation signal.
#[derive(Debug, Default)]
pub struct CancellationSource {
    flags: Arc<AtomicU8>,
}

impl CancellationSource {
    /// Creates a fresh, unsignalled source.
    #[must_use]
    pub fn new() -> Self {
        Self {
            flags: Arc::new(AtomicU8::new(0)),
        }
    }

    /// Issues an external handle for this source.
    #[must_use]
    pub fn handle(&self) -> CancellationHandle {
        CancellationHandle {
            flags: Arc::clone(&self.flags),
        }
    }

    /// Returns true once cancellation or detach has been requested.
    #[must_use]
    pub fn is_cancellation_requested(&self) -> bool {
        self.flags.load(Ordering::Acquire) != 0
    }

    /// Returns true once a detach (handle disable) has been requested.
    #[must_use]
    pub fn is_detach_requested(&self) -> bool {
        self.flags.load(Ordering::Acquire) & DETACH_BIT != 0
    }

    /// Marks the source cancelled from the owning side.
    ///
    /// Drivers call this on exit so handles observe a terminal state
    /// after the network has spun down.
    pub fn mark_cancelled(&self) {
        self.flags.fetch_or(CANCEL_BIT, Ordering::Release);
    }
}

/// The externally held view of a cancellation signal.
#[derive(Debug, Clone)]
pub struct CancellationHandle {
    flags: Arc<AtomicU8>,
}

impl CancellationHandle {
    /// Requests cancellation. Idempotent.
    pub fn request_cancellation(&self) {
        self.flags.fetch_or(CANCEL_BIT, Ordering::Release);
    }

    /// Requests a detach. Idempotent.
    ///
    /// A detach also counts as a cancellation request for the purposes
    /// of loop guards; the routine additionally learns it should leave
    /// its channel without shutting the channel down.
    pub fn request_detach(&self) {
        self.flags.fetch_or(DETACH_BIT, Ordering::Release);
    }

    /// Returns true once cancellation or detach has been requested.
    #[must_use]
    pub fn is_cancellation_requested(&self) -> bool {
        self.flags.load(Ordering::Acquire) != 0
    }
}

/// Wraps a user function together with a cancellation source.
///
/// The wrapper records how often the function has been invoked and
/// carries a stable identifier used by callback handles and log lines.
/// Cancellation is not injected per call; drivers observe it at their
/// loop boundaries.
pub struct Cancellable<F> {
    callback: F,
    id: u64,
    source: CancellationSource,
    invocations: Arc<AtomicU64>,
}

impl<F> Cancellable<F> {
    /// Wraps a user function with a fresh cancellation source.
    pub fn new(callback: F) -> Self {
        Self {
            callback,
            id: NEXT_CALLABLE_ID.fetch_add(1, Ordering::Relaxed),
            source: CancellationSource::new(),
            invocations: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Stable identifier for this callable.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Issues a cancellation handle for this callable's source.
    #[must_use]
    pub fn handle(&self) -> CancellationHandle {
        self.source.handle()
    }

    /// Forwards to the underlying source.
    #[must_use]
    pub fn is_cancellation_requested(&self) -> bool {
        self.source.is_cancellation_requested()
    }

    /// Forwards to the underlying source.
    #[must_use]
    pub fn is_detach_requested(&self) -> bool {
        self.source.is_detach_requested()
    }

    /// Marks the source cancelled; called by drivers on exit.
    pub fn mark_cancelled(&self) {
        self.source.mark_cancelled();
    }

    /// Number of times the wrapped function has been invoked.
    #[must_use]
    pub fn invocation_count(&self) -> u64 {
        self.invocations.load(Ordering::Relaxed)
    }

    /// Invokes an argument-less callable (publisher or spinner).
    pub fn produce<R>(&mut self) -> R
    where
        F: FnMut() -> R,
    {
        self.invocations.fetch_add(1, Ordering::Relaxed);
        (self.callback)()
    }

    /// Invokes a one-argument callable returning a value (transformer).
    pub fn transform<A, R>(&mut self, argument: A) -> R
    where
        F: FnMut(A) -> R,
    {
        self.invocations.fetch_add(1, Ordering::Relaxed);
        (self.callback)(argument)
    }

    /// Invokes a one-argument callable without a result (consumer).
    pub fn consume<A>(&mut self, argument: A)
    where
        F: FnMut(A),
    {
        self.invocations.fetch_add(1, Ordering::Relaxed);
        (self.callback)(argument);
    }
}

impl<F> std::fmt::Debug for Cancellable<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cancellable")
            .field("id", &self.id)
            .field("cancelled", &self.is_cancellation_requested())
            .field("invocations", &self.invocation_count())
            .finish_non_exhaustive()
    }
}
