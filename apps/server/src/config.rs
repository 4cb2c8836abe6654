//! Server configuration.
//!
//! Supports loading from YAML files with environment variable overrides.
//!
//! ```yaml
//! sources:
//!   jazz: http://radio.example/jazz
//!   talk: http://radio.example/talk
//! relay:
//!   queue_capacity: 1024
//!   connect_timeout_secs: 10
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{bail, Context, Result};
use icy_relay_core::{RelayConfig, StaticCatalog};
use serde::Deserialize;

/// Server configuration loaded from YAML with environment overrides.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Source catalog: source id to stream URL.
    pub sources: BTreeMap<String, String>,

    /// Source ids to watch at startup. Empty means every catalog source.
    pub watch: Vec<String>,

    /// Relay tunables.
    /// Overrides: `RELAY_QUEUE_CAPACITY`, `RELAY_CONNECT_TIMEOUT_SECS`,
    /// `RELAY_RESPONSE_TIMEOUT_SECS`, `RELAY_GROUP_CHANNEL_CAPACITY`, `RELAY_USER_AGENT`
    pub relay: RelayConfig,
}

impl ServerConfig {
    /// Loads configuration from a YAML file, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            Self::from_yaml(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    fn from_yaml(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Applies environment variable overrides to the configuration.
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Applies overrides from `lookup`; unparsable values are ignored.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(capacity) = lookup("RELAY_QUEUE_CAPACITY").and_then(|v| v.parse().ok()) {
            self.relay.queue_capacity = capacity;
        }

        if let Some(secs) = lookup("RELAY_CONNECT_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            self.relay.connect_timeout_secs = secs;
        }

        if let Some(secs) = lookup("RELAY_RESPONSE_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            self.relay.response_timeout_secs = secs;
        }

        if let Some(capacity) =
            lookup("RELAY_GROUP_CHANNEL_CAPACITY").and_then(|v| v.parse().ok())
        {
            self.relay.group_channel_capacity = capacity;
        }

        if let Some(agent) = lookup("RELAY_USER_AGENT").filter(|v| !v.trim().is_empty()) {
            self.relay.user_agent = agent;
        }

        // Note: RELAY_LOG_LEVEL is handled by clap via #[arg(env = ...)] in main.rs
    }

    /// Adds or replaces catalog entries given on the command line.
    pub fn add_sources(&mut self, sources: impl IntoIterator<Item = (String, String)>) {
        self.sources.extend(sources);
    }

    /// Source ids to subscribe to at startup.
    ///
    /// Fails if a watched id is missing from the catalog or nothing is configured.
    pub fn watched_sources(&self) -> Result<Vec<String>> {
        if self.sources.is_empty() {
            bail!("No sources configured. Add a `sources` map to the config file or pass --source ID=URL");
        }
        if self.watch.is_empty() {
            return Ok(self.sources.keys().cloned().collect());
        }
        for id in &self.watch {
            if !self.sources.contains_key(id) {
                bail!("Watched source '{}' is not in the catalog", id);
            }
        }
        Ok(self.watch.clone())
    }

    /// Builds the relay's source catalog.
    pub fn catalog(&self) -> StaticCatalog {
        self.sources
            .iter()
            .map(|(id, url)| (id.clone(), url.clone()))
            .collect()
    }
}

/// Parses a `--source ID=URL` argument.
pub fn parse_source_arg(arg: &str) -> Result<(String, String), String> {
    let (id, url) = arg
        .split_once('=')
        .ok_or_else(|| format!("expected ID=URL, got '{}'", arg))?;
    let (id, url) = (id.trim(), url.trim());
    if id.is_empty() || url.is_empty() {
        return Err(format!("expected ID=URL, got '{}'", arg));
    }
    Ok((id.to_string(), url.to_string()))
}
