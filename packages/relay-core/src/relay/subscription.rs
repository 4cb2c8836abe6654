//! Caller-held lease on a decode session.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;

use super::registry::RegistryEntry;
use crate::error::{RelayError, RelayResult};
use crate::icy::DecodedMetadata;
use crate::session::{DecodeSession, SessionEvent, SessionInfo};

/// A subscriber's view of one live decode session.
///
/// Blocks arrive in decode order without loss. Dropping the subscription
/// disposes it; when the last subscription of a source is disposed the
/// session is torn down.
///
/// # Example
///
/// ```ignore
/// let mut sub = relay.subscribe("jazz").await?;
/// while let Some(metadata) = sub.recv().await? {
///     println!("{:?}", metadata.get("StreamTitle"));
/// }
/// ```
pub struct Subscription {
    source_id: String,
    entry: Arc<RegistryEntry>,
    events: mpsc::UnboundedReceiver<SessionEvent>,
    /// `Some` once the session ended or this subscription was disposed.
    outcome: Option<Option<RelayError>>,
    released: bool,
}

impl Subscription {
    pub(crate) fn new(
        source_id: &str,
        entry: Arc<RegistryEntry>,
        events: mpsc::UnboundedReceiver<SessionEvent>,
    ) -> Self {
        Self {
            source_id: source_id.to_string(),
            entry,
            events,
            outcome: None,
            released: false,
        }
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    /// The session this subscription is attached to.
    pub fn session(&self) -> &Arc<DecodeSession> {
        self.entry.session()
    }

    pub fn info(&self) -> SessionInfo {
        self.entry.session().info()
    }

    /// Returns `true` once disposed or once the session ended.
    pub fn is_finished(&self) -> bool {
        self.outcome.is_some()
    }

    /// Waits for the next decoded block.
    ///
    /// Returns `Ok(None)` after a graceful end or disposal. After a fault,
    /// every call returns the captured error.
    pub async fn recv(&mut self) -> RelayResult<Option<Arc<DecodedMetadata>>> {
        if let Some(outcome) = &self.outcome {
            return Self::finished(outcome);
        }

        let event = self.events.recv().await;
        self.accept(event)
    }

    /// Releases this subscription. Idempotent.
    ///
    /// Blocks already queued for this subscriber are discarded.
    pub fn dispose(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.events.close();
        if self.outcome.is_none() {
            self.outcome = Some(None);
        }

        let remaining = self.entry.release();
        log::debug!(
            "[Subscription] Disposed subscription to {} ({} remaining)",
            self.source_id,
            remaining
        );
    }

    fn accept(&mut self, event: Option<SessionEvent>) -> RelayResult<Option<Arc<DecodedMetadata>>> {
        match event {
            Some(SessionEvent::Metadata(metadata)) => Ok(Some(metadata)),
            Some(SessionEvent::Ended(error)) => {
                let outcome = self.outcome.insert(error);
                Self::finished(outcome)
            }
            // Sender gone without an end event; fall back to the session's own record
            None => {
                let outcome = self.outcome.insert(self.entry.session().fault());
                Self::finished(outcome)
            }
        }
    }

    fn finished(outcome: &Option<RelayError>) -> RelayResult<Option<Arc<DecodedMetadata>>> {
        match outcome {
            Some(error) => Err(error.clone()),
            None => Ok(None),
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("source_id", &self.source_id)
            .field("session_id", &self.entry.session().id())
            .field("finished", &self.is_finished())
            .finish()
    }
}

/// Yields blocks until the session ends. A fault is yielded once as the
/// final item.
impl Stream for Subscription {
    type Item = RelayResult<Arc<DecodedMetadata>>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.outcome.is_some() {
            return Poll::Ready(None);
        }

        match this.events.poll_recv(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(event) => Poll::Ready(this.accept(event).transpose()),
        }
    }
}
