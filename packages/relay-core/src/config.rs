//! Relay configuration.
//!
//! [`RelayConfig`] groups the tunables of the request queue, the upstream
//! connector and the broadcast sink. All fields have sensible defaults.

use serde::{Deserialize, Serialize};

use crate::error::{RelayError, RelayResult};
use crate::protocol_constants::{
    APP_NAME, DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_GROUP_CHANNEL_CAPACITY,
    DEFAULT_QUEUE_CAPACITY, DEFAULT_RESPONSE_TIMEOUT_SECS,
};

/// Configuration for the relay.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct RelayConfig {
    /// Capacity of the subscribe request queue.
    /// Callers block when this many requests are pending.
    pub queue_capacity: usize,

    /// Capacity of each broadcast group channel used by `BroadcastSink`.
    pub group_channel_capacity: usize,

    /// Timeout for establishing upstream HTTP connections (seconds).
    pub connect_timeout_secs: u64,

    /// Timeout for receiving the upstream response headers once a connection
    /// attempt starts (seconds). Bounds how long one source can hold up the
    /// relay worker.
    pub response_timeout_secs: u64,

    /// User agent sent to upstream servers.
    pub user_agent: String,
}

impl RelayConfig {
    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Configuration`] if any value would cause runtime issues.
    pub fn validate(&self) -> RelayResult<()> {
        if self.queue_capacity == 0 {
            return Err(RelayError::Configuration(
                "queue_capacity must be >= 1 (mpsc::channel panics on 0)".to_string(),
            ));
        }
        if self.group_channel_capacity == 0 {
            return Err(RelayError::Configuration(
                "group_channel_capacity must be >= 1 (broadcast::channel panics on 0)".to_string(),
            ));
        }
        if self.connect_timeout_secs == 0 {
            return Err(RelayError::Configuration(
                "connect_timeout_secs must be >= 1".to_string(),
            ));
        }
        if self.response_timeout_secs == 0 {
            return Err(RelayError::Configuration(
                "response_timeout_secs must be >= 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            group_channel_capacity: DEFAULT_GROUP_CHANNEL_CAPACITY,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            response_timeout_secs: DEFAULT_RESPONSE_TIMEOUT_SECS,
            user_agent: format!("{}/{}", APP_NAME.replace(' ', ""), env!("CARGO_PKG_VERSION")),
        }
    }
}
