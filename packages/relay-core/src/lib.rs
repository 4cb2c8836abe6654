//! ICY Relay Core - shared ICY metadata decode sessions.
//!
//! This crate decodes the metadata that ICY/SHOUTcast servers interleave into
//! an audio byte stream, and shares one live decode session per source among
//! any number of concurrent subscribers.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`icy`]: Wire protocol (header checks, frame splitting, block parsing)
//! - [`session`]: One upstream connection and its background read loop
//! - [`relay`]: Request queue, session registry, fan-out worker and subscriptions
//! - [`sink`]: Downstream broadcast of decoded metadata
//! - [`runtime`]: Task spawning abstraction for async runtime independence
//! - [`error`]: Centralized error types
//!
//! # Abstraction Traits
//!
//! The relay depends on traits for everything outside its core:
//!
//! - [`StreamConnector`](transport::StreamConnector): Opening upstream byte streams
//! - [`SourceCatalog`](catalog::SourceCatalog): Resolving source ids to URLs
//! - [`MetadataSink`](sink::MetadataSink): Publishing blocks to remote listeners
//! - [`TaskSpawner`](runtime::TaskSpawner): Spawning background tasks
//!
//! Each trait has a default implementation suitable for the standalone server.

#![warn(clippy::all)]

pub mod catalog;
pub mod config;
pub mod error;
pub mod icy;
pub mod protocol_constants;
pub mod relay;
pub mod runtime;
pub mod session;
pub mod sink;
pub mod transport;

#[cfg(test)]
mod test_support;

// Re-export commonly used types at the crate root
pub use catalog::{SourceCatalog, StaticCatalog};
pub use config::RelayConfig;
pub use error::{ErrorCode, RelayError, RelayResult};
pub use icy::{DecodedMetadata, FrameDecoder, IcyHeaders};
pub use relay::{Relay, RelayBuilder, RequestQueue, SessionRegistry, Subscription};
pub use runtime::{TaskSpawner, TokioSpawner};
pub use session::{DecodeSession, SessionInfo, SessionState};
pub use sink::{BroadcastSink, LoggingSink, MetadataSink, NoopSink};
pub use transport::{HttpConnector, StreamConnector};

// Re-export so embedders can build cancellation tokens without a direct dependency
pub use tokio_util::sync::CancellationToken;
