//! Decode sessions: one live upstream connection and its read loop.
//!
//! A [`DecodeSession`] owns one source's byte stream, the interval learned
//! when it was opened, and its terminal state. Decoded blocks are delivered to
//! an explicit observer list (one unbounded channel per subscriber) and then
//! published to the broadcast sink, in decode order.
//!
//! State machine: `Starting -> Live -> {Faulted | Closed}`. Both end states are
//! terminal and reached exactly once.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use futures::StreamExt;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{RelayError, RelayResult};
use crate::icy::{parse_metaint, DecodedMetadata, FrameDecoder, IcyHeaders};
use crate::runtime::TaskSpawner;
use crate::sink::MetadataSink;
use crate::transport::{ByteStream, StreamConnector};

/// Lifecycle state of a decode session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionState {
    /// Upstream accepted; read loop not yet running.
    Starting,
    /// Read loop running.
    Live,
    /// Terminated by a parse or transport error.
    Faulted,
    /// Closed by teardown or by a clean upstream end.
    Closed,
}

impl SessionState {
    /// Returns `true` for `Faulted` and `Closed`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Faulted | Self::Closed)
    }
}

/// Event delivered to each subscriber of a session.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A decoded block.
    Metadata(Arc<DecodedMetadata>),
    /// The session ended; `Some` carries the fault.
    Ended(Option<RelayError>),
}

/// Notification sent to the relay worker when a session's read loop exits.
#[derive(Debug, Clone)]
pub struct SessionEnded {
    /// Source the session was decoding.
    pub source_id: String,
    /// Identity of the session, so a stale notification never removes a newer one.
    pub session_id: Uuid,
    /// The fault, if the session faulted.
    pub error: Option<RelayError>,
}

/// Read-only snapshot of a session.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub id: Uuid,
    pub source_id: String,
    pub url: String,
    pub interval: usize,
    pub headers: IcyHeaders,
    pub state: SessionState,
    pub blocks_decoded: u64,
    pub subscribers: usize,
}

/// How the read loop exited.
enum Exit {
    Cancelled,
    Ended,
    Faulted(RelayError),
}

/// One open, live decode of a single upstream audio stream.
pub struct DecodeSession {
    id: Uuid,
    source_id: String,
    url: String,
    interval: NonZeroUsize,
    headers: IcyHeaders,
    state: RwLock<SessionState>,
    /// Set once, when the session faults.
    fault: OnceLock<RelayError>,
    /// Per-subscriber channels. Dispatch and termination hold this lock, so a
    /// subscriber is either attached before a block is dispatched or after it.
    observers: Mutex<Vec<mpsc::UnboundedSender<SessionEvent>>>,
    blocks_decoded: AtomicU64,
    cancel: CancellationToken,
}

impl DecodeSession {
    /// Connects to `url`, validates the metadata interval and starts the read loop.
    ///
    /// Returns the session together with the event receiver of its first
    /// subscriber, attached before any byte is decoded.
    ///
    /// # Errors
    ///
    /// - [`RelayError::UpstreamUnavailable`] if the connection fails or no
    ///   response arrives within `response_timeout`
    /// - [`RelayError::ProtocolNotSupported`] if the response carries no
    ///   usable `icy-metaint`; the connection is dropped and no task starts
    pub async fn open<S: TaskSpawner>(
        source_id: &str,
        url: &str,
        connector: &dyn StreamConnector,
        response_timeout: Duration,
        sink: Arc<dyn MetadataSink>,
        ended_tx: Option<mpsc::UnboundedSender<SessionEnded>>,
        spawner: &S,
    ) -> RelayResult<(Arc<Self>, mpsc::UnboundedReceiver<SessionEvent>)> {
        let response = tokio::time::timeout(response_timeout, connector.connect(url))
            .await
            .map_err(|_| {
                RelayError::UpstreamUnavailable(format!(
                    "{} sent no response within {:?}",
                    url, response_timeout
                ))
            })??;
        let interval = parse_metaint(&response.headers)?;
        let headers = IcyHeaders::from_headers(&response.headers);

        let (first_tx, first_rx) = mpsc::unbounded_channel();
        let session = Arc::new(Self {
            id: Uuid::new_v4(),
            source_id: source_id.to_string(),
            url: url.to_string(),
            interval,
            headers,
            state: RwLock::new(SessionState::Starting),
            fault: OnceLock::new(),
            observers: Mutex::new(vec![first_tx]),
            blocks_decoded: AtomicU64::new(0),
            cancel: CancellationToken::new(),
        });

        log::info!(
            "[Session] Opened {} for source {} (interval {}, station {:?})",
            session.id,
            source_id,
            interval,
            session.headers.name
        );

        let task = Arc::clone(&session);
        spawner.spawn(async move {
            task.run(response.body, sink, ended_tx).await;
        });

        Ok((session, first_rx))
    }

    /// Unique id of this session.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Source id this session decodes.
    #[must_use]
    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    /// Stream URL this session is connected to.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Metadata interval learned at session start.
    #[must_use]
    pub fn interval(&self) -> usize {
        self.interval.get()
    }

    /// Informational ICY headers from the upstream response.
    #[must_use]
    pub fn headers(&self) -> &IcyHeaders {
        &self.headers
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    /// Returns `true` once the session is `Faulted` or `Closed`.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.state().is_terminal()
    }

    /// The captured fault, if the session faulted.
    ///
    /// Once set, this never changes.
    #[must_use]
    pub fn fault(&self) -> Option<RelayError> {
        self.fault.get().cloned()
    }

    /// Number of attached subscriber channels (closed ones are pruned on dispatch).
    #[must_use]
    pub fn observer_count(&self) -> usize {
        self.observers.lock().len()
    }

    /// Snapshot for diagnostics.
    #[must_use]
    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id,
            source_id: self.source_id.clone(),
            url: self.url.clone(),
            interval: self.interval.get(),
            headers: self.headers.clone(),
            state: self.state(),
            blocks_decoded: self.blocks_decoded.load(Ordering::Relaxed),
            subscribers: self.observer_count(),
        }
    }

    /// Attaches another subscriber.
    ///
    /// Returns `None` if the session is already terminal; a terminal session
    /// is never handed to a new subscriber.
    pub(crate) fn try_attach(&self) -> Option<mpsc::UnboundedReceiver<SessionEvent>> {
        let mut observers = self.observers.lock();
        if self.is_terminal() {
            return None;
        }
        let (tx, rx) = mpsc::unbounded_channel();
        observers.push(tx);
        Some(rx)
    }

    /// Closes the session: cancels the read loop and notifies subscribers.
    ///
    /// Idempotent. The byte source is released by the read loop as soon as it
    /// observes the cancellation.
    pub fn close(&self) {
        self.cancel.cancel();
        if self.terminate(None) {
            log::info!("[Session] Closed {} for source {}", self.id, self.source_id);
        }
    }

    /// Moves the session to its terminal state and notifies every subscriber.
    ///
    /// Returns `false` if the session was already terminal.
    fn terminate(&self, error: Option<RelayError>) -> bool {
        let mut observers = self.observers.lock();
        {
            let mut state = self.state.write();
            if state.is_terminal() {
                return false;
            }
            *state = if error.is_some() {
                SessionState::Faulted
            } else {
                SessionState::Closed
            };
        }

        if let Some(ref e) = error {
            let _ = self.fault.set(e.clone());
        }

        for observer in observers.drain(..) {
            let _ = observer.send(SessionEvent::Ended(error.clone()));
        }
        true
    }

    /// Marks the session live unless it was closed before the loop started.
    fn mark_live(&self) {
        let mut state = self.state.write();
        if *state == SessionState::Starting {
            *state = SessionState::Live;
        }
    }

    /// The read loop. Runs until cancellation, upstream end, or a fault.
    async fn run(
        self: Arc<Self>,
        mut body: ByteStream,
        sink: Arc<dyn MetadataSink>,
        ended_tx: Option<mpsc::UnboundedSender<SessionEnded>>,
    ) {
        let mut decoder = FrameDecoder::new(self.interval);
        self.mark_live();

        let exit = loop {
            let chunk = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break Exit::Cancelled,
                chunk = body.next() => chunk,
            };

            match chunk {
                Some(Ok(bytes)) => {
                    decoder.push(&bytes);
                    if let Err(e) = self.drain(&mut decoder, sink.as_ref()).await {
                        break Exit::Faulted(e);
                    }
                }
                Some(Err(e)) => break Exit::Faulted(e),
                None => match decoder.finish() {
                    Ok(()) => break Exit::Ended,
                    Err(e) => break Exit::Faulted(e),
                },
            }
        };

        // Release the upstream connection before anyone is told the session ended
        drop(body);

        let error = match exit {
            Exit::Cancelled => {
                log::debug!("[Session] Read loop for {} cancelled", self.id);
                None
            }
            Exit::Ended => {
                if self.terminate(None) {
                    log::info!(
                        "[Session] Upstream for source {} ended after {} cycle(s)",
                        self.source_id,
                        decoder.cycles()
                    );
                }
                None
            }
            Exit::Faulted(e) => {
                if self.terminate(Some(e.clone())) {
                    log::warn!("[Session] Source {} faulted: {}", self.source_id, e);
                }
                Some(e)
            }
        };

        sink.group_ended(&self.source_id).await;

        if let Some(tx) = ended_tx {
            let _ = tx.send(SessionEnded {
                source_id: self.source_id.clone(),
                session_id: self.id,
                error,
            });
        }
    }

    /// Dispatches every complete block currently buffered.
    async fn drain(&self, decoder: &mut FrameDecoder, sink: &dyn MetadataSink) -> RelayResult<()> {
        while let Some(metadata) = decoder.decode_next()? {
            if self.cancel.is_cancelled() {
                return Ok(());
            }
            self.dispatch(metadata, sink).await;
        }
        Ok(())
    }

    /// Delivers one block to all current subscribers, then to the sink.
    async fn dispatch(&self, metadata: DecodedMetadata, sink: &dyn MetadataSink) {
        let metadata = Arc::new(metadata);
        {
            let mut observers = self.observers.lock();
            observers.retain(|tx| tx.send(SessionEvent::Metadata(Arc::clone(&metadata))).is_ok());
        }
        self.blocks_decoded.fetch_add(1, Ordering::Relaxed);
        log::debug!(
            "[Session] Source {} block #{}: {:?}",
            self.source_id,
            self.blocks_decoded.load(Ordering::Relaxed),
            metadata.get("StreamTitle")
        );
        sink.publish(&self.source_id, &metadata).await;
    }
}

impl Drop for DecodeSession {
    fn drop(&mut self) {
        self.cancel.cancel();
        log::debug!("[Session] {} for source {} dropped", self.id, self.source_id);
    }
}
