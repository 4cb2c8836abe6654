//! ICY (Shoutcast) metadata decoding.
//!
//! This module encapsulates the wire protocol: response header checks, frame
//! splitting and block parsing. Session lifecycle and fan-out live elsewhere.

pub mod decoder;
pub mod headers;
pub mod metadata;

pub use decoder::FrameDecoder;
pub use headers::{parse_metaint, IcyHeaders};
pub use metadata::DecodedMetadata;
