//! Sink implementation that maps decoded blocks to per-group broadcast channels.
//!
//! The [`BroadcastSink`] lives at the boundary between the relay and whatever
//! remote transport serves listeners (WebSocket, SSE, ...). Transport handlers
//! call [`BroadcastSink::subscribe`] for the group they serve.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::sync::broadcast;

use super::MetadataSink;
use crate::icy::DecodedMetadata;

/// Bridges decoded metadata to per-group `tokio::sync::broadcast` channels.
///
/// Groups are created lazily, either by the first publish or by the first
/// remote listener. Publishing to a group without listeners is not an error.
/// When a group's session ends the group is dropped, unless listeners are
/// still attached to it.
///
/// An optional external sink receives every block as well, which lets an
/// embedder chain a second transport without wrapping this type.
///
/// # Thread Safety
///
/// The sink is `Send + Sync` and can be shared across async tasks.
#[derive(Clone)]
pub struct BroadcastSink {
    groups: Arc<DashMap<String, broadcast::Sender<Arc<DecodedMetadata>>>>,
    capacity: usize,
    external_sink: Arc<RwLock<Option<Arc<dyn MetadataSink>>>>,
}

impl BroadcastSink {
    /// Creates a sink whose group channels hold `capacity` blocks each.
    ///
    /// A capacity of zero is raised to one (`broadcast::channel` panics on 0).
    pub fn new(capacity: usize) -> Self {
        Self {
            groups: Arc::new(DashMap::new()),
            capacity: capacity.max(1),
            external_sink: Arc::new(RwLock::new(None)),
        }
    }

    /// Sets an external sink that receives every published block.
    pub fn set_external_sink(&self, sink: Arc<dyn MetadataSink>) {
        *self.external_sink.write() = Some(sink);
    }

    /// Returns a receiver for the given group, creating the group if needed.
    ///
    /// Receivers that fall more than `capacity` blocks behind observe
    /// `RecvError::Lagged`; this is the remote-listener contract, unlike
    /// relay subscriptions which never drop blocks.
    pub fn subscribe(&self, group: &str) -> broadcast::Receiver<Arc<DecodedMetadata>> {
        self.groups
            .entry(group.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Number of remote listeners currently attached to `group`.
    #[must_use]
    pub fn listener_count(&self, group: &str) -> usize {
        self.groups
            .get(group)
            .map_or(0, |tx| tx.receiver_count())
    }

    /// Returns the names of all known groups.
    #[must_use]
    pub fn groups(&self) -> Vec<String> {
        self.groups.iter().map(|r| r.key().clone()).collect()
    }

    /// Drops a group; its listeners observe the channel closing.
    pub fn remove_group(&self, group: &str) {
        self.groups.remove(group);
    }
}

#[async_trait]
impl MetadataSink for BroadcastSink {
    async fn publish(&self, group: &str, metadata: &DecodedMetadata) {
        // Clone the Arc out so no lock guard is held across the await
        let external = self.external_sink.read().clone();
        if let Some(sink) = external {
            sink.publish(group, metadata).await;
        }

        let tx = self
            .groups
            .entry(group.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone();
        if let Err(e) = tx.send(Arc::new(metadata.clone())) {
            log::trace!("[BroadcastSink] No listeners for group {}: {}", group, e);
        }
    }

    /// Drops the group if no remote listener is attached to it.
    async fn group_ended(&self, group: &str) {
        let external = self.external_sink.read().clone();
        if let Some(sink) = external {
            sink.group_ended(group).await;
        }

        if self
            .groups
            .remove_if(group, |_, tx| tx.receiver_count() == 0)
            .is_some()
        {
            log::debug!("[BroadcastSink] Pruned idle group {}", group);
        }
    }
}
