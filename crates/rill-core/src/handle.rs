//! Callback handles returned from channel registration.
//!
//! A [`CallbackHandle`] is the externally held receipt for a registered
//! publisher or subscription. It carries enough identity for log lines
//! and bears cancellation authority over the owning routine; the handle
//! may outlive the routine.

use crate::cancellation::CancellationHandle;

/// What kind of registration a handle stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackKind {
    /// A publisher registration on a channel.
    Publisher,
    /// A subscription registration on a channel.
    Subscription,
}

impl std::fmt::Display for CallbackKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Publisher => write!(f, "publisher"),
            Self::Subscription => write!(f, "subscription"),
        }
    }
}

/// Receipt for a registered publisher or subscription.
///
/// [`disable`](Self::disable) requests the owning routine to exit. For a
/// subscription this detaches it from the channel; remaining subscribers
/// keep receiving messages, and the channel only shuts down when its
/// last subscriber leaves.
#[derive(Debug, Clone)]
pub struct CallbackHandle {
    id: u64,
    kind: CallbackKind,
    channel_name: String,
    message_type: &'static str,
    disabled: bool,
    cancel: CancellationHandle,
}

impl CallbackHandle {
    /// Creates a handle for a freshly registered routine.
    #[must_use]
    pub fn new(
        id: u64,
        kind: CallbackKind,
        channel_name: impl Into<String>,
        message_type: &'static str,
        cancel: CancellationHandle,
    ) -> Self {
        Self {
            id,
            kind,
            channel_name: channel_name.into(),
            message_type,
            disabled: false,
            cancel,
        }
    }

    /// Stable identifier shared with the underlying callable.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Registration kind.
    #[must_use]
    pub fn kind(&self) -> CallbackKind {
        self.kind
    }

    /// Name of the channel this registration is attached to.
    #[must_use]
    pub fn channel_name(&self) -> &str {
        &self.channel_name
    }

    /// Type name of the messages flowing through the channel.
    #[must_use]
    pub fn message_type(&self) -> &'static str {
        self.message_type
    }

    /// Requests the owning routine to exit. Idempotent.
    pub fn disable(&mut self) {
        self.disabled = true;
        self.cancel.request_detach();
    }

    /// Returns true once [`disable`](Self::disable) has been called.
    #[must_use]
    pub fn is_disabled(&self) -> bool {
        self.disabled
    }
}

impl std::fmt::Display for CallbackHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "callback_handle: {{ id: {}, kind: {}, channel_name: {}, message: {}, is_disabled: {} }}",
            self.id, self.kind, self.channel_name, self.message_type, self.disabled
        )
    }
}
