//! Shared test fixtures: scripted upstream connections, a recording sink and
//! wire-format builders.

use std::collections::{HashMap, HashSet, VecDeque};
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::Mutex;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tokio::sync::{mpsc, Notify};

use crate::catalog::{SourceCatalog, StaticCatalog};
use crate::error::{RelayError, RelayResult};
use crate::icy::DecodedMetadata;
use crate::protocol_constants::ICY_BLOCK_UNIT;
use crate::session::SessionEvent;
use crate::sink::MetadataSink;
use crate::transport::{StreamConnector, UpstreamResponse};

const TEST_TIMEOUT: Duration = Duration::from_secs(2);

// ─────────────────────────────────────────────────────────────────────────────
// Wire format builders
// ─────────────────────────────────────────────────────────────────────────────

/// Formats `text` as a length byte plus NUL-padded block.
///
/// `blocks` forces the length byte; by default the smallest fitting value is used.
pub(crate) fn metadata_block(text: &str, blocks: Option<u8>) -> Vec<u8> {
    let bytes = text.as_bytes();
    let num_blocks = blocks.map_or_else(|| bytes.len().div_ceil(ICY_BLOCK_UNIT), usize::from);
    let padded_len = num_blocks * ICY_BLOCK_UNIT;
    assert!(bytes.len() <= padded_len, "text does not fit in {} blocks", num_blocks);

    let mut result = Vec::with_capacity(padded_len + 1);
    result.push(num_blocks as u8);
    result.extend_from_slice(bytes);
    result.resize(padded_len + 1, 0);
    result
}

/// Non-silent filler so tests notice if audio bytes are ever interpreted.
fn audio_filler(interval: usize) -> Vec<u8> {
    (0..interval).map(|i| (i * 31 % 251) as u8 + 1).collect()
}

/// One full cycle: `interval` audio bytes followed by a metadata block.
pub(crate) fn encode_cycle(interval: usize, text: &str, blocks: Option<u8>) -> Vec<u8> {
    let mut cycle = audio_filler(interval);
    cycle.extend(metadata_block(text, blocks));
    cycle
}

/// One cycle without metadata (length byte 0).
pub(crate) fn encode_silent_cycle(interval: usize) -> Vec<u8> {
    let mut cycle = audio_filler(interval);
    cycle.push(0);
    cycle
}

pub(crate) fn sample_metadata(interval: usize, title: &str) -> DecodedMetadata {
    DecodedMetadata::new(
        NonZeroUsize::new(interval).expect("non-zero interval"),
        vec![("StreamTitle".to_string(), title.to_string())],
    )
}

// ─────────────────────────────────────────────────────────────────────────────
// Async helpers
// ─────────────────────────────────────────────────────────────────────────────

pub(crate) async fn recv_event(rx: &mut mpsc::UnboundedReceiver<SessionEvent>) -> SessionEvent {
    tokio::time::timeout(TEST_TIMEOUT, rx.recv())
        .await
        .expect("timed out waiting for session event")
        .expect("session event channel closed")
}

/// Polls `condition` until it holds or the test timeout elapses.
pub(crate) async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(TEST_TIMEOUT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached before timeout");
}

// ─────────────────────────────────────────────────────────────────────────────
// Scripted connector
// ─────────────────────────────────────────────────────────────────────────────

type Chunk = RelayResult<Bytes>;

/// Test-side handle feeding one scripted upstream body.
pub(crate) struct Feed {
    tx: Mutex<Option<mpsc::UnboundedSender<Chunk>>>,
}

impl Feed {
    pub(crate) fn send(&self, bytes: &[u8]) {
        if let Some(tx) = self.tx.lock().as_ref() {
            let _ = tx.send(Ok(Bytes::copy_from_slice(bytes)));
        }
    }

    pub(crate) fn fail(&self, error: RelayError) {
        if let Some(tx) = self.tx.lock().take() {
            let _ = tx.send(Err(error));
        }
    }

    /// Ends the body cleanly.
    pub(crate) fn end(&self) {
        self.tx.lock().take();
    }
}

struct Script {
    headers: HeaderMap,
    rx: mpsc::UnboundedReceiver<Chunk>,
}

/// Counts how many times a scripted body was released.
struct ReleaseGuard {
    url: String,
    releases: Arc<DashMap<String, usize>>,
}

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        *self.releases.entry(self.url.clone()).or_insert(0) += 1;
    }
}

/// In-memory [`StreamConnector`] with per-URL queues of scripted responses.
#[derive(Default)]
pub(crate) struct ScriptedConnector {
    scripts: Mutex<HashMap<String, VecDeque<Script>>>,
    /// URLs whose connection attempts never produce a response.
    stalled: Mutex<HashSet<String>>,
    connects: DashMap<String, usize>,
    releases: Arc<DashMap<String, usize>>,
}

impl ScriptedConnector {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Queues a response for the next connection to `url`.
    pub(crate) fn script(&self, url: &str, headers: &[(&str, &str)]) -> Feed {
        let mut map = HeaderMap::new();
        for (name, value) in headers {
            map.insert(
                HeaderName::from_bytes(name.as_bytes()).expect("header name"),
                HeaderValue::from_str(value).expect("header value"),
            );
        }

        let (tx, rx) = mpsc::unbounded_channel();
        self.scripts
            .lock()
            .entry(url.to_string())
            .or_default()
            .push_back(Script { headers: map, rx });
        Feed {
            tx: Mutex::new(Some(tx)),
        }
    }

    /// Makes every connection to `url` hang before any response arrives.
    pub(crate) fn stall(&self, url: &str) {
        self.stalled.lock().insert(url.to_string());
    }

    pub(crate) fn connects(&self, url: &str) -> usize {
        self.connects.get(url).map_or(0, |n| *n)
    }

    pub(crate) fn releases(&self, url: &str) -> usize {
        self.releases.get(url).map_or(0, |n| *n)
    }

    pub(crate) async fn wait_for_releases(&self, url: &str, expected: usize) {
        wait_until(|| self.releases(url) >= expected).await;
    }
}

#[async_trait]
impl StreamConnector for ScriptedConnector {
    async fn connect(&self, url: &str) -> RelayResult<UpstreamResponse> {
        *self.connects.entry(url.to_string()).or_insert(0) += 1;

        let stalled = self.stalled.lock().contains(url);
        if stalled {
            std::future::pending::<()>().await;
        }

        let script = self
            .scripts
            .lock()
            .get_mut(url)
            .and_then(VecDeque::pop_front)
            .ok_or_else(|| RelayError::UpstreamUnavailable(format!("no script for {}", url)))?;

        let guard = ReleaseGuard {
            url: url.to_string(),
            releases: Arc::clone(&self.releases),
        };
        let mut rx = script.rx;
        let body = async_stream::stream! {
            let _guard = guard;
            while let Some(chunk) = rx.recv().await {
                yield chunk;
            }
        };

        Ok(UpstreamResponse {
            headers: script.headers,
            body: Box::pin(body),
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Catalog and sink fixtures
// ─────────────────────────────────────────────────────────────────────────────

/// Catalog whose lookups of one id block until the gate is opened.
pub(crate) struct GatedCatalog {
    inner: StaticCatalog,
    gated_id: String,
    pub(crate) gate: Arc<Notify>,
}

impl GatedCatalog {
    pub(crate) fn new(inner: StaticCatalog, gated_id: &str) -> Self {
        Self {
            inner,
            gated_id: gated_id.to_string(),
            gate: Arc::new(Notify::new()),
        }
    }
}

#[async_trait]
impl SourceCatalog for GatedCatalog {
    async fn resolve(&self, source_id: &str) -> RelayResult<String> {
        if source_id == self.gated_id {
            self.gate.notified().await;
        }
        self.inner.resolve(source_id).await
    }
}

/// Sink that records every published block.
#[derive(Default)]
pub(crate) struct RecordingSink {
    published: Mutex<Vec<(String, DecodedMetadata)>>,
    ended: Mutex<Vec<String>>,
}

impl RecordingSink {
    pub(crate) fn titles(&self, group: &str) -> Vec<String> {
        self.published
            .lock()
            .iter()
            .filter(|(g, _)| g == group)
            .filter_map(|(_, m)| m.get("StreamTitle").map(str::to_string))
            .collect()
    }

    pub(crate) fn ended_groups(&self) -> Vec<String> {
        self.ended.lock().clone()
    }
}

#[async_trait]
impl MetadataSink for RecordingSink {
    async fn publish(&self, group: &str, metadata: &DecodedMetadata) {
        self.published
            .lock()
            .push((group.to_string(), metadata.clone()));
    }

    async fn group_ended(&self, group: &str) {
        self.ended.lock().push(group.to_string());
    }
}
