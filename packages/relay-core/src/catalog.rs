//! Source id → stream URL resolution.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::{RelayError, RelayResult};

/// Resolves a source id to the URL of its audio stream.
///
/// Implementations may consult an external catalog; failures are reported
/// only to the caller whose subscribe request triggered the lookup.
#[async_trait]
pub trait SourceCatalog: Send + Sync {
    /// Returns the stream URL for `source_id`.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::UnknownSource`] if the id is not known.
    async fn resolve(&self, source_id: &str) -> RelayResult<String>;
}

/// Fixed catalog backed by an in-memory map, typically built from configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    sources: HashMap<String, String>,
}

impl StaticCatalog {
    /// Creates a catalog from `id -> url` pairs.
    pub fn new(sources: HashMap<String, String>) -> Self {
        Self { sources }
    }

    /// Number of known sources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    /// Returns `true` if the catalog has no sources.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Returns the known source ids, sorted.
    #[must_use]
    pub fn source_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sources.keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for StaticCatalog {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self::new(
            iter.into_iter()
                .map(|(id, url)| (id.into(), url.into()))
                .collect(),
        )
    }
}

#[async_trait]
impl SourceCatalog for StaticCatalog {
    async fn resolve(&self, source_id: &str) -> RelayResult<String> {
        self.sources
            .get(source_id)
            .cloned()
            .ok_or_else(|| RelayError::UnknownSource(source_id.to_string()))
    }
}
