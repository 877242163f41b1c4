//! The typed chain builder.
//!
//! A chain is the user-declared linear sequence of nodes describing a
//! pipeline. Nodes are classified by signature: a *publisher*
//! (`FnMut() -> R`) opens the chain, *transformers* (`FnMut(A) -> R`)
//! sit in the middle, a *consumer* (`FnMut(A)`) closes it, and
//! *spinners* (`FnMut()`) may be appended anywhere. Adjacent nodes must
//! agree on the message type; the builder carries the open edge's type
//! in its own type (`Chain<Flowing<T>>`), so a mismatch — or an attempt
//! to materialise an unterminated chain — is a compile-time failure.
//!
//! Each edge gets its own channel. Unnamed edges use a synthetic name
//! derived from the message type and the edge ordinal, so two
//! same-typed edges in one chain never alias; explicitly named edges
//! (`publish_to`, `transform_to`) deliberately do alias, which is how
//! fan-in and fan-out onto registry channels is built.

use std::sync::Arc;

use rill_core::channel::{ChannelConfig, ChannelRegistry, MultiChannel};
use rill_core::routine::{spin_consumer, spin_publisher, spin_spinner, spin_transformer, DrainLocks};
use rill_core::{Cancellable, CallbackHandle, CallbackKind};

use crate::network::{Network, RoutineKind, RoutineSpec};

mod sealed {
    pub trait Sealed {}
    impl Sealed for super::Empty {}
    impl Sealed for super::Complete {}
}

/// Marker for chain states that may be materialised into a network: a
/// closed chain, or an empty one carrying only spinners.
pub trait Terminal: sealed::Sealed {}

/// Chain state: no publisher appended yet.
pub struct Empty {
    _private: (),
}

impl Terminal for Empty {}

/// Chain state: the tail edge carries messages of type `T` and still
/// needs a transformer or consumer.
pub struct Flowing<T> {
    channel: Arc<MultiChannel<T>>,
}

/// Chain state: closed by a consumer.
pub struct Complete {
    _private: (),
}

impl Terminal for Complete {}

/// Builder producing the linear pipeline description.
///
/// ```rust,ignore
/// let net = network(
///     chain()
///         .publish(|| fetch_reading())
///         .transform(|raw: Reading| raw.calibrate())
///         .consume(|value: Calibrated| store(value)),
/// );
/// ```
pub struct Chain<S> {
    registry: Arc<ChannelRegistry>,
    routines: Vec<RoutineSpec>,
    handles: Vec<CallbackHandle>,
    locks: Arc<DrainLocks>,
    edges: usize,
    stage: S,
}

/// Starts an empty chain with default channel configuration.
#[must_use]
pub fn chain() -> Chain<Empty> {
    Chain::new(ChannelConfig::default())
}

fn default_channel_name<T>(edge: usize) -> String {
    format!("{}#{edge}", std::any::type_name::<T>())
}

impl Chain<Empty> {
    /// Starts an empty chain whose edge channels use `config`.
    #[must_use]
    pub fn new(config: ChannelConfig) -> Self {
        Self {
            registry: Arc::new(ChannelRegistry::new(config)),
            routines: Vec::new(),
            handles: Vec::new(),
            locks: Arc::new(DrainLocks::new()),
            edges: 0,
            stage: Empty { _private: () },
        }
    }

    /// Appends the head publisher; its output edge gets a synthetic
    /// channel name.
    #[must_use]
    pub fn publish<T, F>(self, callback: F) -> Chain<Flowing<T>>
    where
        T: Clone + Send + 'static,
        F: FnMut() -> T + Send + 'static,
    {
        let name = default_channel_name::<T>(self.edges);
        self.publish_named(&name, callback)
    }

    /// Appends the head publisher with an explicit output channel name.
    #[must_use]
    pub fn publish_to<T, F>(self, channel_name: &str, callback: F) -> Chain<Flowing<T>>
    where
        T: Clone + Send + 'static,
        F: FnMut() -> T + Send + 'static,
    {
        self.publish_named(channel_name, callback)
    }

    fn publish_named<T, F>(mut self, channel_name: &str, callback: F) -> Chain<Flowing<T>>
    where
        T: Clone + Send + 'static,
        F: FnMut() -> T + Send + 'static,
    {
        let channel = self.registry.get_or_create::<T>(channel_name);
        let token = channel
            .register_producer()
            .unwrap_or_else(|error| panic!("{error}"));
        let callback = Cancellable::new(callback);
        let cancel = callback.handle();
        self.handles.push(CallbackHandle::new(
            callback.id(),
            CallbackKind::Publisher,
            channel_name,
            std::any::type_name::<T>(),
            callback.handle(),
        ));
        self.routines.push(RoutineSpec {
            future: Box::pin(spin_publisher(Arc::clone(&channel), token, callback)),
            kind: RoutineKind::Publisher,
            cancel,
        });
        self.edges += 1;
        Chain {
            registry: self.registry,
            routines: self.routines,
            handles: self.handles,
            locks: self.locks,
            edges: self.edges,
            stage: Flowing { channel },
        }
    }
}

impl<T: Clone + Send + 'static> Chain<Flowing<T>> {
    /// Appends a transformer; its output edge gets a synthetic channel
    /// name.
    #[must_use]
    pub fn transform<R, F>(self, callback: F) -> Chain<Flowing<R>>
    where
        R: Clone + Send + 'static,
        F: FnMut(T) -> R + Send + 'static,
    {
        let name = default_channel_name::<R>(self.edges);
        self.transform_named(&name, callback)
    }

    /// Appends a transformer with an explicit output channel name.
    #[must_use]
    pub fn transform_to<R, F>(self, channel_name: &str, callback: F) -> Chain<Flowing<R>>
    where
        R: Clone + Send + 'static,
        F: FnMut(T) -> R + Send + 'static,
    {
        self.transform_named(channel_name, callback)
    }

    fn transform_named<R, F>(mut self, channel_name: &str, callback: F) -> Chain<Flowing<R>>
    where
        R: Clone + Send + 'static,
        F: FnMut(T) -> R + Send + 'static,
    {
        let input = self.stage.channel;
        let input_token = input
            .subscribe()
            .unwrap_or_else(|error| panic!("{error}"));
        let output = self.registry.get_or_create::<R>(channel_name);
        let output_token = output
            .register_producer()
            .unwrap_or_else(|error| panic!("{error}"));
        let callback = Cancellable::new(callback);
        let cancel = callback.handle();
        self.handles.push(CallbackHandle::new(
            callback.id(),
            CallbackKind::Subscription,
            input.name().to_string(),
            std::any::type_name::<T>(),
            callback.handle(),
        ));
        self.routines.push(RoutineSpec {
            future: Box::pin(spin_transformer(
                input,
                input_token,
                Arc::clone(&output),
                output_token,
                callback,
                Arc::clone(&self.locks),
            )),
            kind: RoutineKind::Transformer,
            cancel,
        });
        self.edges += 1;
        Chain {
            registry: self.registry,
            routines: self.routines,
            handles: self.handles,
            locks: self.locks,
            edges: self.edges,
            stage: Flowing { channel: output },
        }
    }

    /// Closes the chain with its terminal consumer.
    #[must_use]
    pub fn consume<F>(mut self, callback: F) -> Chain<Complete>
    where
        F: FnMut(T) + Send + 'static,
    {
        let channel = self.stage.channel;
        let token = channel.subscribe().unwrap_or_else(|error| panic!("{error}"));
        let callback = Cancellable::new(callback);
        let cancel = callback.handle();
        self.handles.push(CallbackHandle::new(
            callback.id(),
            CallbackKind::Subscription,
            channel.name().to_string(),
            std::any::type_name::<T>(),
            callback.handle(),
        ));
        self.routines.push(RoutineSpec {
            future: Box::pin(spin_consumer(
                channel,
                token,
                callback,
                Arc::clone(&self.locks),
            )),
            kind: RoutineKind::Consumer,
            cancel,
        });
        Chain {
            registry: self.registry,
            routines: self.routines,
            handles: self.handles,
            locks: self.locks,
            edges: self.edges,
            stage: Complete { _private: () },
        }
    }
}

impl<S> Chain<S> {
    /// Appends a spinner: a channel-less routine invoked until the
    /// network shuts down.
    #[must_use]
    pub fn spinner<F>(mut self, callback: F) -> Chain<S>
    where
        F: FnMut() + Send + 'static,
    {
        let callback = Cancellable::new(callback);
        let cancel = callback.handle();
        self.routines.push(RoutineSpec {
            future: Box::pin(spin_spinner(callback)),
            kind: RoutineKind::Spinner,
            cancel,
        });
        self
    }
}

impl<S: Terminal> Chain<S> {
    pub(crate) fn into_network(self) -> Network {
        Network::from_parts(self.registry, self.routines, self.handles, self.locks)
    }
}

/// Materialises a terminal chain into a [`Network`].
///
/// Only a closed chain (ending in a consumer) or a spinner-only chain
/// may be materialised; anything else fails to compile.
#[must_use]
pub fn network<S: Terminal>(chain: Chain<S>) -> Network {
    chain.into_network()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edges_get_unique_default_names() {
        // u64 -> u64 -> u64: both edges carry the same type and must
        // not alias onto one channel.
        let built = chain()
            .publish(|| 1u64)
            .transform(|value: u64| value + 1)
            .consume(|_value: u64| {});

        assert_eq!(built.registry.len(), 2);
        assert!(built.registry.contains::<u64>(&default_channel_name::<u64>(0)));
        assert!(built.registry.contains::<u64>(&default_channel_name::<u64>(1)));
    }

    #[test]
    fn test_named_edges_share_the_registry_channel() {
        let built = chain()
            .publish_to("readings", || 3u64)
            .consume(|_value: u64| {});

        assert_eq!(built.registry.len(), 1);
        assert!(built.registry.contains::<u64>("readings"));
        assert_eq!(built.handles.len(), 2);
        assert_eq!(built.handles[0].kind(), CallbackKind::Publisher);
        assert_eq!(built.handles[1].kind(), CallbackKind::Subscription);
    }

    #[test]
    fn test_spinner_only_chain_is_terminal() {
        let built = chain().spinner(|| {}).spinner(|| {});
        let net = network(built);
        assert_eq!(net.handles().len(), 0);
    }
}
