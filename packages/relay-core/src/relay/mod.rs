//! Shared decode sessions with subscriber fan-out.
//!
//! Callers ask for a source id through a bounded [`RequestQueue`]; a single
//! worker task serves the queue in order, keeps at most one live
//! [`DecodeSession`](crate::session::DecodeSession) per source in the
//! [`SessionRegistry`], and hands out reference-counted [`Subscription`]s.
//!
//! ```text
//! caller ──► RequestQueue ──► worker ──► SessionRegistry
//!                                │
//!                                └──► DecodeSession ──► Subscriptions
//!                                                  └──► MetadataSink
//! ```

mod queue;
mod registry;
mod subscription;
mod worker;

pub use queue::RequestQueue;
pub use registry::{RegistryEntry, SessionRegistry};
pub use subscription::Subscription;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::catalog::SourceCatalog;
use crate::config::RelayConfig;
use crate::error::{RelayError, RelayResult};
use crate::runtime::{TaskSpawner, TokioSpawner};
use crate::session::SessionInfo;
use crate::sink::{MetadataSink, NoopSink};
use crate::transport::{HttpConnector, StreamConnector};
use worker::RelayWorker;

/// Handle to a running relay.
///
/// Dropping the last handle (and every [`RequestQueue`] clone) stops the
/// worker. Sessions with live subscriptions keep running either way.
pub struct Relay {
    queue: RequestQueue,
    registry: Arc<SessionRegistry>,
    shutdown: CancellationToken,
    config: RelayConfig,
}

impl Relay {
    /// Creates a new builder for constructing a `Relay`.
    pub fn builder() -> RelayBuilder {
        RelayBuilder::new()
    }

    /// Subscribes to `source_id`, joining its live session or opening one.
    ///
    /// # Errors
    ///
    /// - [`RelayError::UnknownSource`] if the catalog has no such source
    /// - [`RelayError::UpstreamUnavailable`] if the upstream cannot be reached
    /// - [`RelayError::ProtocolNotSupported`] if the upstream sends no metadata interval
    /// - [`RelayError::RelayStopped`] after [`shutdown`](Self::shutdown)
    pub async fn subscribe(&self, source_id: &str) -> RelayResult<Subscription> {
        self.queue.subscribe(source_id).await
    }

    /// Like [`subscribe`](Self::subscribe), abandoning the request with
    /// [`RelayError::Cancelled`] once `cancel` fires.
    pub async fn subscribe_with_cancel(
        &self,
        source_id: &str,
        cancel: &CancellationToken,
    ) -> RelayResult<Subscription> {
        self.queue.subscribe_with_cancel(source_id, cancel).await
    }

    /// A producer handle that can be moved into other tasks.
    pub fn queue(&self) -> RequestQueue {
        self.queue.clone()
    }

    /// Subscriber count of the live session for `source_id`.
    pub fn refcount(&self, source_id: &str) -> Option<usize> {
        self.registry.refcount(source_id)
    }

    /// Source ids with a live session, sorted.
    pub fn active_sources(&self) -> Vec<String> {
        self.registry.active_sources()
    }

    /// Snapshot of the live session for `source_id`.
    pub fn session(&self, source_id: &str) -> Option<SessionInfo> {
        self.registry.session(source_id).map(|s| s.info())
    }

    /// Stops accepting requests. Pending requests fail with
    /// [`RelayError::RelayStopped`]; open sessions keep serving their
    /// subscribers until those are disposed.
    pub fn shutdown(&self) {
        if !self.shutdown.is_cancelled() {
            log::info!("[Relay] Shutdown requested");
            self.shutdown.cancel();
        }
    }

    /// Returns `true` while the worker accepts requests.
    pub fn is_running(&self) -> bool {
        !self.shutdown.is_cancelled() && !self.queue.is_closed()
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }
}

/// Builder for constructing a [`Relay`].
#[derive(Default)]
pub struct RelayBuilder {
    config: Option<RelayConfig>,
    catalog: Option<Arc<dyn SourceCatalog>>,
    connector: Option<Arc<dyn StreamConnector>>,
    sink: Option<Arc<dyn MetadataSink>>,
}

impl RelayBuilder {
    /// Creates a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the configuration. Defaults to [`RelayConfig::default`].
    pub fn config(mut self, config: RelayConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Sets the source catalog (required).
    pub fn catalog(mut self, catalog: Arc<dyn SourceCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Sets the upstream connector. Defaults to an [`HttpConnector`] built
    /// from the configuration.
    pub fn connector(mut self, connector: Arc<dyn StreamConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Sets the broadcast sink. Defaults to [`NoopSink`].
    pub fn sink(mut self, sink: Arc<dyn MetadataSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Starts the relay on the current Tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime context.
    pub fn start(self) -> RelayResult<Relay> {
        self.start_with(TokioSpawner::current())
    }

    /// Starts the relay, spawning the worker and every session read loop
    /// through `spawner`.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Configuration`] if the configuration is invalid
    /// or no catalog was set.
    pub fn start_with<S>(self, spawner: S) -> RelayResult<Relay>
    where
        S: TaskSpawner + Clone + 'static,
    {
        let config = self.config.unwrap_or_default();
        config.validate()?;

        let catalog = self
            .catalog
            .ok_or_else(|| RelayError::Configuration("a source catalog is required".into()))?;
        let connector = match self.connector {
            Some(connector) => connector,
            None => Arc::new(HttpConnector::new(&config)?),
        };
        let sink = self.sink.unwrap_or_else(|| Arc::new(NoopSink));

        let (queue, requests) = RequestQueue::bounded(config.queue_capacity);
        let (ended_tx, ended_rx) = mpsc::unbounded_channel();
        let registry = Arc::new(SessionRegistry::new());
        let shutdown = CancellationToken::new();

        let worker = RelayWorker {
            registry: Arc::clone(&registry),
            catalog,
            connector,
            sink,
            spawner: spawner.clone(),
            ended_tx,
            response_timeout: Duration::from_secs(config.response_timeout_secs),
        };
        let worker_shutdown = shutdown.clone();
        spawner.spawn(async move {
            worker.run(requests, ended_rx, worker_shutdown).await;
        });

        log::info!(
            "[Relay] Started (queue capacity {})",
            config.queue_capacity
        );

        Ok(Relay {
            queue,
            registry,
            shutdown,
            config,
        })
    }
}
