//! The single consumer of the request queue.
//!
//! The worker owns every structural change to the [`SessionRegistry`]: it
//! joins callers to live sessions, opens new ones, and removes entries whose
//! session ended. Because it handles one request at a time, two concurrent
//! requests for the same source can never both open a session.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::queue::SubscriptionRequest;
use super::registry::{RegistryEntry, SessionRegistry};
use super::subscription::Subscription;
use crate::catalog::SourceCatalog;
use crate::error::{RelayError, RelayResult};
use crate::runtime::TaskSpawner;
use crate::session::{DecodeSession, SessionEnded};
use crate::sink::MetadataSink;
use crate::transport::StreamConnector;

pub(crate) struct RelayWorker<S> {
    pub registry: Arc<SessionRegistry>,
    pub catalog: Arc<dyn SourceCatalog>,
    pub connector: Arc<dyn StreamConnector>,
    pub sink: Arc<dyn MetadataSink>,
    pub spawner: S,
    pub ended_tx: mpsc::UnboundedSender<SessionEnded>,
    pub response_timeout: Duration,
}

impl<S: TaskSpawner> RelayWorker<S> {
    /// Consumes requests until `shutdown` fires or every queue producer is gone.
    ///
    /// Session-ended notices take priority over new requests so stale entries
    /// are cleared first. Requests still queued at shutdown are answered with
    /// [`RelayError::RelayStopped`]. Open sessions are left running.
    pub async fn run(
        self,
        mut requests: mpsc::Receiver<SubscriptionRequest>,
        mut ended: mpsc::UnboundedReceiver<SessionEnded>,
        shutdown: CancellationToken,
    ) {
        log::info!("[Relay] Worker started");

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                Some(notice) = ended.recv() => self.on_session_ended(notice),
                request = requests.recv() => match request {
                    Some(request) => {
                        // Dropping an unfinished request answers it with RelayStopped
                        tokio::select! {
                            biased;
                            _ = shutdown.cancelled() => break,
                            _ = self.handle(request) => {}
                        }
                    }
                    None => break,
                },
            }
        }

        requests.close();
        let mut rejected = 0usize;
        while let Ok(request) = requests.try_recv() {
            request.resolve(Err(RelayError::RelayStopped));
            rejected += 1;
        }

        log::info!(
            "[Relay] Worker stopped ({} pending request(s) rejected, {} session(s) left open)",
            rejected,
            self.registry.active_sources().len()
        );
    }

    /// Serves one request. Gives up as soon as the caller stops waiting, so
    /// an abandoned request never keeps the queue busy.
    async fn handle(&self, mut request: SubscriptionRequest) {
        if request.is_abandoned() {
            log::debug!(
                "[Relay] Skipping request for {}: caller went away",
                request.source_id
            );
            return;
        }

        let result = tokio::select! {
            biased;
            _ = request.reply.closed() => {
                log::debug!(
                    "[Relay] Abandoned request for {} while it was being served",
                    request.source_id
                );
                return;
            }
            result = self.subscribe(&request.source_id) => result,
        };
        if let Err(ref e) = result {
            log::warn!("[Relay] Subscribe to {} failed: {}", request.source_id, e);
        }
        request.resolve(result);
    }

    async fn subscribe(&self, source_id: &str) -> RelayResult<Subscription> {
        if let Some(subscription) = self.join_existing(source_id) {
            return Ok(subscription);
        }

        let url = self.catalog.resolve(source_id).await?;
        let (session, events) = DecodeSession::open(
            source_id,
            &url,
            self.connector.as_ref(),
            self.response_timeout,
            Arc::clone(&self.sink),
            Some(self.ended_tx.clone()),
            &self.spawner,
        )
        .await?;

        let entry = Arc::new(RegistryEntry::new(session));
        self.registry.insert(source_id, Arc::clone(&entry));
        log::info!("[Relay] Started new session for {} ({})", source_id, url);

        Ok(Subscription::new(source_id, entry, events))
    }

    /// Joins the live session for `source_id`, if there is one.
    ///
    /// A terminal or fully released entry is removed here, so the caller gets
    /// a fresh session even if the ended notice is still in flight.
    fn join_existing(&self, source_id: &str) -> Option<Subscription> {
        let entry = self.registry.get(source_id)?;

        if !entry.session().is_terminal() && entry.try_acquire() {
            if let Some(events) = entry.session().try_attach() {
                log::debug!(
                    "[Relay] Joined session for {} (refcount {})",
                    source_id,
                    entry.refcount()
                );
                return Some(Subscription::new(source_id, entry, events));
            }
            // Ended between the check and the attach
            entry.release();
        }

        log::debug!(
            "[Relay] Dropping stale session {} for {}",
            entry.session().id(),
            source_id
        );
        self.registry.remove_session(source_id, entry.session().id());
        None
    }

    fn on_session_ended(&self, notice: SessionEnded) {
        let removed = self
            .registry
            .remove_session(&notice.source_id, notice.session_id);

        match (&notice.error, removed) {
            (Some(e), true) => log::warn!(
                "[Relay] Session for {} faulted and was unregistered: {}",
                notice.source_id,
                e
            ),
            (None, true) => log::info!(
                "[Relay] Session for {} ended and was unregistered",
                notice.source_id
            ),
            (_, false) => log::debug!(
                "[Relay] Ended notice for stale session {} of {}",
                notice.session_id,
                notice.source_id
            ),
        }
    }
}
