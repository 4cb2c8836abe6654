//! Fixed protocol constants that should NOT be changed.
//!
//! These values are defined by the ICY/Shoutcast convention and changing them
//! would break interoperability with upstream servers.

// ─────────────────────────────────────────────────────────────────────────────
// ICY Protocol (Shoutcast/Icecast metadata)
// ─────────────────────────────────────────────────────────────────────────────

/// Request header asking the upstream server to interleave metadata.
pub const ICY_METADATA_REQUEST_HEADER: &str = "Icy-MetaData";

/// Response header carrying the metadata interval (audio bytes per cycle).
pub const ICY_METAINT_HEADER: &str = "icy-metaint";

/// Largest accepted metadata interval (1 MiB of audio per cycle).
///
/// Real servers advertise 8 KiB to 64 KiB; anything above this is rejected
/// before a session exists.
pub const MAX_METAINT: usize = 1024 * 1024;

/// Metadata block length unit. The length byte counts 16-byte units.
pub const ICY_BLOCK_UNIT: usize = 16;

/// Key under which every decoded block records the interval used to decode it.
pub const INTERVAL_KEY: &str = "Interval";

/// Informational response headers captured at session start.
pub const ICY_NAME_HEADER: &str = "icy-name";
pub const ICY_GENRE_HEADER: &str = "icy-genre";
pub const ICY_DESCRIPTION_HEADER: &str = "icy-description";
pub const ICY_URL_HEADER: &str = "icy-url";
pub const ICY_BITRATE_HEADER: &str = "icy-br";

// ─────────────────────────────────────────────────────────────────────────────
// Relay defaults
// ─────────────────────────────────────────────────────────────────────────────

/// Default capacity of the subscribe request queue.
///
/// Callers block (rather than fail) once this many requests are pending.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Default capacity of each per-source broadcast group channel.
pub const DEFAULT_GROUP_CHANNEL_CAPACITY: usize = 64;

/// Default timeout for establishing the upstream connection (seconds).
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default timeout for receiving the upstream response headers (seconds).
pub const DEFAULT_RESPONSE_TIMEOUT_SECS: u64 = 15;

/// Application name used in the default user agent.
pub const APP_NAME: &str = "ICY Relay";
