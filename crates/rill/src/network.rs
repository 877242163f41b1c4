//! The materialised network: routines, channels, handles, scheduler.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;

use rill_core::channel::ChannelConfig;
use rill_core::routine::{spin_consumer, spin_publisher, DrainLocks};
use rill_core::{
    Cancellable, CallbackHandle, CallbackKind, CancellationHandle, ChannelRegistry, Error,
};

/// What a routine does in the pipeline; determines who the shutdown
/// timer targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RoutineKind {
    Spinner,
    Publisher,
    Transformer,
    Consumer,
}

/// One routine staged for launch.
pub(crate) struct RoutineSpec {
    pub(crate) future: BoxFuture<'static, ()>,
    pub(crate) kind: RoutineKind,
    pub(crate) cancel: CancellationHandle,
}

/// Configuration for a [`Network`].
#[derive(Debug, Clone, Default)]
pub struct NetworkConfig {
    /// Default configuration for channels this network creates.
    pub channel: ChannelConfig,
    /// Worker threads for the pool; defaults to hardware parallelism.
    pub worker_threads: Option<usize>,
}

/// The materialised set of routines, channels, and handles for one
/// pipeline, plus the scheduler that will drive them.
///
/// A network is built either from a [`Chain`](crate::Chain) via
/// [`network`](crate::network), or incrementally through the
/// lower-level [`subscribe`](Self::subscribe) / [`publish`](Self::publish)
/// entry points. [`cancel_after`](Self::cancel_after) arms the shutdown
/// timer; [`spin`](Self::spin) launches every routine on the pool and
/// blocks until the termination handshake completes.
pub struct Network {
    registry: Arc<ChannelRegistry>,
    routines: Vec<RoutineSpec>,
    handles: Vec<CallbackHandle>,
    locks: Arc<DrainLocks>,
    deadline: Option<Duration>,
    worker_threads: Option<usize>,
}

impl Network {
    /// Creates an empty network with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(NetworkConfig::default())
    }

    /// Creates an empty network with the given configuration.
    #[must_use]
    pub fn with_config(config: NetworkConfig) -> Self {
        Self {
            registry: Arc::new(ChannelRegistry::new(config.channel)),
            routines: Vec::new(),
            handles: Vec::new(),
            locks: Arc::new(DrainLocks::new()),
            deadline: None,
            worker_threads: config.worker_threads,
        }
    }

    pub(crate) fn from_parts(
        registry: Arc<ChannelRegistry>,
        routines: Vec<RoutineSpec>,
        handles: Vec<CallbackHandle>,
        locks: Arc<DrainLocks>,
    ) -> Self {
        Self {
            registry,
            routines,
            handles,
            locks,
            deadline: None,
            worker_threads: None,
        }
    }

    /// The channel registry backing this network.
    #[must_use]
    pub fn registry(&self) -> &ChannelRegistry {
        &self.registry
    }

    /// Handles for every routine registered so far, in registration
    /// order.
    #[must_use]
    pub fn handles(&self) -> &[CallbackHandle] {
        &self.handles
    }

    /// Takes ownership of the registered handles, e.g. to disable
    /// routines from another thread while the network spins.
    #[must_use]
    pub fn detach_handles(&mut self) -> Vec<CallbackHandle> {
        std::mem::take(&mut self.handles)
    }

    /// Sets the number of pool workers.
    pub fn set_worker_threads(&mut self, workers: usize) {
        self.worker_threads = Some(workers);
    }

    /// Arms a one-shot timer that requests cancellation on every
    /// terminal routine's token once `deadline` elapses.
    ///
    /// Only the tail of a pipeline is a valid shutdown initiator — the
    /// termination handshake flows tail-to-head — so the timer targets
    /// consumers (and spinners, which own no downstream). Cancellation
    /// is cooperative and its timing is not deterministic; the network
    /// still drains in-flight messages before `spin` returns.
    pub fn cancel_after(&mut self, deadline: Duration) {
        self.deadline = Some(deadline);
    }

    /// Attaches a consumer routine to the named channel.
    ///
    /// # Errors
    ///
    /// Fails when the channel is already terminating or its subscriber
    /// slots are exhausted.
    pub fn subscribe<T, F>(&mut self, channel_name: &str, callback: F) -> Result<CallbackHandle, Error>
    where
        T: Clone + Send + 'static,
        F: FnMut(T) + Send + 'static,
    {
        let channel = self.registry.get_or_create::<T>(channel_name);
        let token = channel.subscribe()?;
        let callback = Cancellable::new(callback);
        let cancel = callback.handle();
        let handle = CallbackHandle::new(
            callback.id(),
            CallbackKind::Subscription,
            channel_name,
            std::any::type_name::<T>(),
            callback.handle(),
        );
        self.routines.push(RoutineSpec {
            future: Box::pin(spin_consumer(channel, token, callback, Arc::clone(&self.locks))),
            kind: RoutineKind::Consumer,
            cancel,
        });
        Ok(handle)
    }

    /// Attaches a publisher routine to the named channel.
    ///
    /// # Errors
    ///
    /// Fails when the channel is already terminating or its producer
    /// budget is exhausted.
    pub fn publish<T, F>(&mut self, channel_name: &str, callback: F) -> Result<CallbackHandle, Error>
    where
        T: Clone + Send + 'static,
        F: FnMut() -> T + Send + 'static,
    {
        let channel = self.registry.get_or_create::<T>(channel_name);
        let token = channel.register_producer()?;
        let callback = Cancellable::new(callback);
        let cancel = callback.handle();
        let handle = CallbackHandle::new(
            callback.id(),
            CallbackKind::Publisher,
            channel_name,
            std::any::type_name::<T>(),
            callback.handle(),
        );
        self.routines.push(RoutineSpec {
            future: Box::pin(spin_publisher(channel, token, callback)),
            kind: RoutineKind::Publisher,
            cancel,
        });
        Ok(handle)
    }

    /// Launches every routine on the pool and blocks until all of them
    /// have returned.
    ///
    /// A panic inside a user callback is resumed on the calling thread;
    /// per the error policy there is no per-message error channel and a
    /// failing callback terminates the process.
    ///
    /// # Errors
    ///
    /// Fails when the worker pool cannot be built.
    pub fn spin(mut self) -> Result<(), Error> {
        let mut builder = tokio::runtime::Builder::new_multi_thread();
        builder.enable_time().thread_name("rill-worker");
        if let Some(workers) = self.worker_threads {
            builder.worker_threads(workers);
        }
        let runtime = builder.build()?;

        tracing::info!(routines = self.routines.len(), "network spinning up");

        if let Some(deadline) = self.deadline {
            let mut cancels: Vec<CancellationHandle> = self
                .routines
                .iter()
                .filter(|spec| {
                    matches!(spec.kind, RoutineKind::Consumer | RoutineKind::Spinner)
                })
                .map(|spec| spec.cancel.clone())
                .collect();
            if cancels.is_empty() {
                // No terminal routine to initiate the handshake; cancel
                // everything so the deadline still stops the network.
                cancels = self.routines.iter().map(|spec| spec.cancel.clone()).collect();
            }
            runtime.spawn(async move {
                tokio::time::sleep(deadline).await;
                tracing::debug!(?deadline, "cancellation deadline elapsed");
                for cancel in cancels {
                    cancel.request_cancellation();
                }
            });
        }

        let tasks: Vec<_> = self
            .routines
            .drain(..)
            .map(|spec| runtime.spawn(spec.future))
            .collect();

        runtime.block_on(async {
            for joined in futures::future::join_all(tasks).await {
                if let Err(error) = joined {
                    if error.is_panic() {
                        std::panic::resume_unwind(error.into_panic());
                    }
                }
            }
        });

        tracing::info!("network spun down");
        Ok(())
    }
}

impl Default for Network {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Network")
            .field("routines", &self.routines.len())
            .field("handles", &self.handles.len())
            .field("deadline", &self.deadline)
            .field("registry", &self.registry)
            .finish()
    }
}
