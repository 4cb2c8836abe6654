//! Downstream broadcast of decoded metadata.
//!
//! Every decoded block for source S is published once to the group named S,
//! so any number of remote listeners share one decode session. The relay
//! depends on the [`MetadataSink`] trait rather than a concrete transport:
//!
//! - [`BroadcastSink`] keeps one `tokio::sync::broadcast` channel per group
//! - [`LoggingSink`] logs each block (development)
//! - [`NoopSink`] discards everything (tests, embedded use)

mod bridge;

pub use bridge::BroadcastSink;

use async_trait::async_trait;

use crate::icy::DecodedMetadata;

/// Publishes decoded metadata to a named broadcast group.
///
/// `publish` runs inside the session's read loop: a slow sink delays decoding
/// of that session only, and blocks of one source are published in decode order.
#[async_trait]
pub trait MetadataSink: Send + Sync {
    /// Publishes one block to `group` (the source id).
    async fn publish(&self, group: &str, metadata: &DecodedMetadata);

    /// Called once when the session feeding `group` has ended.
    ///
    /// A later session for the same source publishes to the same group again.
    async fn group_ended(&self, _group: &str) {}
}

/// Sink that silently discards every block.
pub struct NoopSink;

#[async_trait]
impl MetadataSink for NoopSink {
    async fn publish(&self, _group: &str, _metadata: &DecodedMetadata) {}
}

/// Sink that logs every block at debug level.
pub struct LoggingSink;

#[async_trait]
impl MetadataSink for LoggingSink {
    async fn publish(&self, group: &str, metadata: &DecodedMetadata) {
        match serde_json::to_string(metadata) {
            Ok(json) => tracing::debug!(group, metadata = %json, "metadata_published"),
            Err(e) => tracing::warn!(group, error = %e, "metadata_not_serializable"),
        }
    }
}
