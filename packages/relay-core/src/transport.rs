//! Upstream byte transport.
//!
//! Sessions depend on the [`StreamConnector`] trait rather than a concrete
//! HTTP client, so tests can script upstream responses byte by byte.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{Stream, StreamExt};
use reqwest::header::HeaderMap;
use reqwest::Client;

use crate::config::RelayConfig;
use crate::error::{RelayError, RelayResult};
use crate::protocol_constants::ICY_METADATA_REQUEST_HEADER;

/// Boxed stream of raw upstream bytes.
///
/// Transport failures surface as [`RelayError::UpstreamUnavailable`] items.
/// Dropping the stream releases the underlying connection.
pub type ByteStream = Pin<Box<dyn Stream<Item = RelayResult<Bytes>> + Send>>;

/// An opened upstream connection: response headers plus the body.
pub struct UpstreamResponse {
    /// Response headers, checked for `icy-metaint` before any session exists.
    pub headers: HeaderMap,
    /// The interleaved audio/metadata byte stream.
    pub body: ByteStream,
}

/// Opens upstream audio connections with metadata requested.
#[async_trait]
pub trait StreamConnector: Send + Sync {
    /// Connects to `url`, asking the server to interleave ICY metadata.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::UpstreamUnavailable`] if the connection cannot be
    /// established or the server answers with a non-success status.
    async fn connect(&self, url: &str) -> RelayResult<UpstreamResponse>;
}

/// `reqwest`-based connector used outside of tests.
pub struct HttpConnector {
    client: Client,
}

impl HttpConnector {
    /// Creates a connector with the timeout and user agent from `config`.
    ///
    /// Only the connect phase is bounded; the body is a live stream with no
    /// overall deadline.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Configuration`] if the HTTP client cannot be built.
    pub fn new(config: &RelayConfig) -> RelayResult<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| RelayError::Configuration(format!("HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    /// Creates a connector around an existing HTTP client.
    #[must_use]
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl StreamConnector for HttpConnector {
    async fn connect(&self, url: &str) -> RelayResult<UpstreamResponse> {
        let response = self
            .client
            .get(url)
            .header(ICY_METADATA_REQUEST_HEADER, "1")
            .send()
            .await
            .map_err(|e| RelayError::UpstreamUnavailable(format!("{}: {}", url, e)))?;

        if !response.status().is_success() {
            return Err(RelayError::UpstreamUnavailable(format!(
                "{} returned HTTP {}",
                url,
                response.status()
            )));
        }

        log::debug!(
            "[Transport] Connected to {} (status {})",
            url,
            response.status()
        );

        let headers = response.headers().clone();
        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| RelayError::UpstreamUnavailable(e.to_string())));

        Ok(UpstreamResponse {
            headers,
            body: Box::pin(body),
        })
    }
}
