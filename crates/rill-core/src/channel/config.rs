//! Channel configuration types.

/// Default ring capacity.
pub const DEFAULT_CAPACITY: usize = 128;

/// Minimum ring capacity. A capacity of 1 is a degenerate bounded queue
/// and is supported.
pub const MIN_CAPACITY: usize = 1;

/// Maximum ring capacity (prevents excessive memory usage).
pub const MAX_CAPACITY: usize = 1 << 20;

/// Default number of sequences reserved per publish batch.
pub const DEFAULT_PUBLISH_BATCH: usize = 8;

/// Default maximum number of subscribers per channel.
pub const DEFAULT_MAX_SUBSCRIBERS: usize = 64;

/// Default maximum number of producers per channel.
pub const DEFAULT_MAX_PRODUCERS: usize = 64;

/// How messages are handed to subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeliveryMode {
    /// Every subscriber observes every message exactly once.
    ///
    /// Requires `T: Clone`; wrap large payloads in `Arc` so the clone is
    /// an atomic increment.
    #[default]
    FanOut,

    /// Each message is handed to exactly one subscriber.
    ///
    /// Subscribers compete on a shared claim cursor; the message is
    /// moved, not cloned.
    LoadBalanced,
}

/// Configuration for a [`MultiChannel`](super::MultiChannel).
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Ring capacity (rounded up to a power of 2).
    pub capacity: usize,

    /// Sequences reserved per `request_permission_to_publish` call.
    pub publish_batch: usize,

    /// Maximum allowed subscribers.
    pub max_subscribers: usize,

    /// Maximum allowed producers.
    pub max_producers: usize,

    /// Delivery variant, chosen at channel creation.
    pub delivery: DeliveryMode,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            publish_batch: DEFAULT_PUBLISH_BATCH,
            max_subscribers: DEFAULT_MAX_SUBSCRIBERS,
            max_producers: DEFAULT_MAX_PRODUCERS,
            delivery: DeliveryMode::FanOut,
        }
    }
}

impl ChannelConfig {
    /// Creates a configuration with the specified capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.clamp(MIN_CAPACITY, MAX_CAPACITY),
            ..Default::default()
        }
    }

    /// Creates a builder for custom configuration.
    #[must_use]
    pub fn builder() -> ChannelConfigBuilder {
        ChannelConfigBuilder::default()
    }

    /// Returns the effective capacity (rounded to a power of 2).
    #[must_use]
    pub fn effective_capacity(&self) -> usize {
        self.capacity
            .clamp(MIN_CAPACITY, MAX_CAPACITY)
            .next_power_of_two()
    }

    /// Returns the effective batch size (at least 1, at most capacity).
    #[must_use]
    pub fn effective_publish_batch(&self) -> usize {
        self.publish_batch.clamp(1, self.effective_capacity())
    }
}

/// Builder for [`ChannelConfig`].
#[derive(Debug, Default)]
pub struct ChannelConfigBuilder {
    capacity: Option<usize>,
    publish_batch: Option<usize>,
    max_subscribers: Option<usize>,
    max_producers: Option<usize>,
    delivery: Option<DeliveryMode>,
}

impl ChannelConfigBuilder {
    /// Sets the ring capacity.
    #[must_use]
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity);
        self
    }

    /// Sets the per-reservation batch size.
    #[must_use]
    pub fn publish_batch(mut self, batch: usize) -> Self {
        self.publish_batch = Some(batch);
        self
    }

    /// Sets the maximum number of subscribers.
    #[must_use]
    pub fn max_subscribers(mut self, max: usize) -> Self {
        self.max_subscribers = Some(max);
        self
    }

    /// Sets the maximum number of producers.
    #[must_use]
    pub fn max_producers(mut self, max: usize) -> Self {
        self.max_producers = Some(max);
        self
    }

    /// Sets the delivery variant.
    #[must_use]
    pub fn delivery(mut self, mode: DeliveryMode) -> Self {
        self.delivery = Some(mode);
        self
    }

    /// Builds the configuration.
    #[must_use]
    pub fn build(self) -> ChannelConfig {
        ChannelConfig {
            capacity: self.capacity.unwrap_or(DEFAULT_CAPACITY),
            publish_batch: self.publish_batch.unwrap_or(DEFAULT_PUBLISH_BATCH),
            max_subscribers: self.max_subscribers.unwrap_or(DEFAULT_MAX_SUBSCRIBERS),
            max_producers: self.max_producers.unwrap_or(DEFAULT_MAX_PRODUCERS),
            delivery: self.delivery.unwrap_or_default(),
        }
    }
}
