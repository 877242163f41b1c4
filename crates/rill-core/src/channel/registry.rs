//! The `(name, message type)`-keyed channel store.
//!
//! Multiple publishers and subscribers naming the same channel must end
//! up on the same [`MultiChannel`] instance so fan-in and fan-out work;
//! the registry guarantees that by keying on the channel name together
//! with the message type's `TypeId`. Two channels with the same name
//! but different message types are distinct.

use std::any::{Any, TypeId};
use std::sync::Arc;

use fxhash::FxHashMap;
use parking_lot::Mutex;

use super::config::ChannelConfig;
use super::multi::MultiChannel;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ChannelKey {
    name: String,
    message_type: TypeId,
}

/// Keyed store mapping `(channel name, message type)` to a unique
/// channel instance.
pub struct ChannelRegistry {
    channels: Mutex<FxHashMap<ChannelKey, Arc<dyn Any + Send + Sync>>>,
    default_config: ChannelConfig,
}

impl ChannelRegistry {
    /// Creates a registry whose channels use the given configuration.
    #[must_use]
    pub fn new(default_config: ChannelConfig) -> Self {
        Self {
            channels: Mutex::new(FxHashMap::default()),
            default_config,
        }
    }

    /// The configuration applied to channels this registry creates.
    #[must_use]
    pub fn default_config(&self) -> &ChannelConfig {
        &self.default_config
    }

    /// Returns the channel registered under `(name, T)`, creating it on
    /// first use. Idempotent: repeated lookups with the same key return
    /// the same instance.
    pub fn get_or_create<T: Send + 'static>(&self, name: &str) -> Arc<MultiChannel<T>> {
        self.get_or_create_with::<T>(name, self.default_config.clone())
    }

    /// As [`get_or_create`](Self::get_or_create) with an explicit
    /// configuration, applied only if the channel does not exist yet.
    pub fn get_or_create_with<T: Send + 'static>(
        &self,
        name: &str,
        config: ChannelConfig,
    ) -> Arc<MultiChannel<T>> {
        let key = ChannelKey {
            name: name.to_string(),
            message_type: TypeId::of::<T>(),
        };
        let mut channels = self.channels.lock();
        if let Some(existing) = channels.get(&key) {
            return Arc::clone(existing)
                .downcast::<MultiChannel<T>>()
                .unwrap_or_else(|_| crate::fatal("channel registry key and payload type diverged"));
        }
        tracing::debug!(channel = %name, message_type = std::any::type_name::<T>(), "channel created");
        let channel = Arc::new(MultiChannel::<T>::new(name, config));
        channels.insert(key, Arc::clone(&channel) as Arc<dyn Any + Send + Sync>);
        channel
    }

    /// Returns true when a channel is registered under `(name, T)`.
    #[must_use]
    pub fn contains<T: Send + 'static>(&self, name: &str) -> bool {
        let key = ChannelKey {
            name: name.to_string(),
            message_type: TypeId::of::<T>(),
        };
        self.channels.lock().contains_key(&key)
    }

    /// Number of registered channels.
    #[must_use]
    pub fn len(&self) -> usize {
        self.channels.lock().len()
    }

    /// True when no channel has been registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.channels.lock().is_empty()
    }
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::new(ChannelConfig::default())
    }
}

impl std::fmt::Debug for ChannelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelRegistry")
            .field("channels", &self.len())
            .field("default_config", &self.default_config)
            .finish()
    }
}
