//! Decoded ICY metadata blocks.

use std::collections::BTreeMap;
use std::num::NonZeroUsize;

use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::protocol_constants::INTERVAL_KEY;

/// One successfully parsed metadata block.
///
/// An immutable, case-insensitive string map. Always contains an `Interval`
/// entry (the audio-bytes-per-cycle value used to decode it) plus whatever
/// keys the upstream server supplied, typically `StreamTitle` and `StreamUrl`.
///
/// Keys keep the spelling the server used; lookups ignore ASCII case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedMetadata {
    interval: NonZeroUsize,
    /// Lowercased key -> (original key, value).
    entries: BTreeMap<String, (String, String)>,
}

impl DecodedMetadata {
    /// Builds a block from parsed `key='value'` pairs.
    ///
    /// Later duplicates of a key replace earlier ones. The `Interval` entry is
    /// always the decoder's own value, even if the server sent a key with the
    /// same name.
    pub(crate) fn new(interval: NonZeroUsize, pairs: Vec<(String, String)>) -> Self {
        let mut entries = BTreeMap::new();
        for (key, value) in pairs {
            entries.insert(key.to_ascii_lowercase(), (key, value));
        }
        entries.insert(
            INTERVAL_KEY.to_ascii_lowercase(),
            (INTERVAL_KEY.to_string(), interval.to_string()),
        );
        Self { interval, entries }
    }

    /// Looks up a value by key, ignoring ASCII case.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .get(&key.to_ascii_lowercase())
            .map(|(_, value)| value.as_str())
    }

    /// Returns `true` if the block contains `key` (ASCII case-insensitive).
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(&key.to_ascii_lowercase())
    }

    /// The metadata interval this block was decoded with.
    #[must_use]
    pub fn interval(&self) -> usize {
        self.interval.get()
    }

    /// Number of entries, including `Interval`.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Always `false`: every block carries at least the `Interval` entry.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates entries as `(key, value)` in case-insensitive key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .values()
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }
}

impl Serialize for DecodedMetadata {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, value) in self.iter() {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}
