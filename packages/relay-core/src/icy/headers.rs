//! ICY response header handling.
//!
//! The metadata interval is the only header the decoder depends on; the rest
//! are informational and exposed on the session for diagnostics.

use std::num::NonZeroUsize;

use reqwest::header::{HeaderMap, CONTENT_TYPE};
use serde::Serialize;

use crate::error::{RelayError, RelayResult};
use crate::protocol_constants::{
    ICY_BITRATE_HEADER, ICY_DESCRIPTION_HEADER, ICY_GENRE_HEADER, ICY_METAINT_HEADER,
    ICY_NAME_HEADER, ICY_URL_HEADER, MAX_METAINT,
};

/// Extracts the metadata interval from an upstream response.
///
/// # Errors
///
/// Returns [`RelayError::ProtocolNotSupported`] if the header is missing, not
/// a decimal integer, zero, or larger than [`MAX_METAINT`].
pub fn parse_metaint(headers: &HeaderMap) -> RelayResult<NonZeroUsize> {
    let raw = headers.get(ICY_METAINT_HEADER).ok_or_else(|| {
        RelayError::ProtocolNotSupported(format!(
            "upstream response has no {} header",
            ICY_METAINT_HEADER
        ))
    })?;

    raw.to_str()
        .ok()
        .and_then(|v| v.trim().parse::<usize>().ok())
        .filter(|&v| v <= MAX_METAINT)
        .and_then(NonZeroUsize::new)
        .ok_or_else(|| {
            RelayError::ProtocolNotSupported(format!(
                "invalid {} header: {:?}",
                ICY_METAINT_HEADER, raw
            ))
        })
}

/// Informational headers advertised by an ICY server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IcyHeaders {
    /// Station name (`icy-name`).
    pub name: Option<String>,
    /// Station genre (`icy-genre`).
    pub genre: Option<String>,
    /// Station description (`icy-description`).
    pub description: Option<String>,
    /// Station homepage (`icy-url`).
    pub url: Option<String>,
    /// Nominal bitrate in kbit/s (`icy-br`).
    pub bitrate: Option<u32>,
    /// Audio MIME type (`content-type`).
    pub content_type: Option<String>,
}

impl IcyHeaders {
    /// Collects the informational ICY headers from a response.
    ///
    /// Missing or non-text values are left as `None`.
    #[must_use]
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let text = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        Self {
            name: text(ICY_NAME_HEADER),
            genre: text(ICY_GENRE_HEADER),
            description: text(ICY_DESCRIPTION_HEADER),
            url: text(ICY_URL_HEADER),
            // Some servers send "128,128" for multi-rate streams
            bitrate: text(ICY_BITRATE_HEADER)
                .and_then(|v| v.split(',').next().and_then(|b| b.trim().parse().ok())),
            content_type: text(CONTENT_TYPE.as_str()),
        }
    }
}
