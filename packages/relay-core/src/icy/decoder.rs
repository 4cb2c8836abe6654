//! ICY frame decoder.
//!
//! Splits an interleaved byte stream into audio and metadata segments. Each
//! cycle on the wire is:
//!
//! ```text
//! [interval bytes of audio][L][L * 16 bytes of metadata text, NUL padded]
//! ```
//!
//! A length byte of zero means "no metadata this cycle". The decoder is a pure
//! state machine over a byte buffer: callers push chunks as they arrive and
//! drain decoded blocks; it performs no I/O of its own.

use std::num::NonZeroUsize;

use bytes::{Buf, BytesMut};

use super::metadata::DecodedMetadata;
use crate::error::{RelayError, RelayResult};
use crate::protocol_constants::{ICY_BLOCK_UNIT, MAX_METAINT};

/// Stateful decoder for one stream connection.
///
/// The interval is fixed for the lifetime of the connection.
pub struct FrameDecoder {
    interval: NonZeroUsize,
    /// Bytes received but not yet consumed. Always starts at a cycle boundary.
    buffer: BytesMut,
    /// Cycles consumed so far, including ones without metadata.
    cycles: u64,
}

impl FrameDecoder {
    /// Creates a decoder for the given metadata interval.
    #[must_use]
    pub fn new(interval: NonZeroUsize) -> Self {
        Self {
            interval,
            buffer: BytesMut::with_capacity(interval.get().min(MAX_METAINT)),
            cycles: 0,
        }
    }

    /// Appends a chunk received from the upstream source.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Decodes the next metadata block, if one is complete.
    ///
    /// Consumes whole cycles only. Cycles whose length byte is zero, or whose
    /// text is empty once NUL padding is trimmed, are consumed silently.
    ///
    /// Returns `Ok(None)` when more bytes are needed.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::MalformedStream`] if a complete block is not
    /// valid `key='value';` UTF-8 text. The decoder must not be used after an
    /// error.
    pub fn decode_next(&mut self) -> RelayResult<Option<DecodedMetadata>> {
        let interval = self.interval.get();

        loop {
            if self.buffer.len() <= interval {
                return Ok(None);
            }
            let header_len = interval + 1;

            let block_len = self.buffer[interval] as usize * ICY_BLOCK_UNIT;
            if block_len == 0 {
                self.buffer.advance(header_len);
                self.cycles += 1;
                continue;
            }

            if self.buffer.len() < header_len + block_len {
                return Ok(None);
            }

            let cycle = self.buffer.split_to(header_len + block_len);
            self.cycles += 1;

            let pairs = parse_block(&cycle[header_len..])?;
            if pairs.is_empty() {
                log::trace!("[Decoder] Cycle {} carried an empty block", self.cycles);
                continue;
            }

            return Ok(Some(DecodedMetadata::new(self.interval, pairs)));
        }
    }

    /// Checks the buffered remainder once the upstream source has ended.
    ///
    /// Ending inside the audio part of a cycle is a graceful end. Ending after
    /// a non-zero length byte but before the whole block arrived is not.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::MalformedStream`] for a truncated metadata block.
    pub fn finish(&self) -> RelayResult<()> {
        let interval = self.interval.get();
        if self.buffer.len() <= interval {
            return Ok(());
        }

        let block_len = self.buffer[interval] as usize * ICY_BLOCK_UNIT;
        let available = self.buffer.len() - interval - 1;
        if block_len > available {
            return Err(RelayError::MalformedStream(format!(
                "stream ended after {} of {} metadata bytes",
                available, block_len
            )));
        }
        Ok(())
    }

    /// Number of bytes buffered but not yet consumed.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Number of complete cycles consumed.
    #[must_use]
    pub fn cycles(&self) -> u64 {
        self.cycles
    }
}

/// Parses one raw metadata block (trailing NUL padding included).
fn parse_block(block: &[u8]) -> RelayResult<Vec<(String, String)>> {
    let end = block.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
    let text = std::str::from_utf8(&block[..end]).map_err(|e| {
        RelayError::MalformedStream(format!("metadata block is not valid UTF-8: {}", e))
    })?;
    parse_pairs(text)
}

/// Parses `key='value';key='value';...` text.
///
/// Quoted values run until the next `';`, so values may contain `'` and `;`.
/// Unquoted values run until the next `;`. Blank segments are skipped.
pub(crate) fn parse_pairs(text: &str) -> RelayResult<Vec<(String, String)>> {
    let is_separator = |c: char| c == ';' || c == '\0' || c.is_whitespace();

    let mut pairs = Vec::new();
    let mut rest = text;

    loop {
        rest = rest.trim_start_matches(is_separator);
        if rest.is_empty() {
            return Ok(pairs);
        }

        let eq = rest.find('=').ok_or_else(|| {
            RelayError::MalformedStream(format!("metadata segment without '=': {:?}", rest))
        })?;
        let key = rest[..eq].trim();
        if key.is_empty() {
            return Err(RelayError::MalformedStream(format!(
                "metadata segment without key: {:?}",
                rest
            )));
        }

        let after = &rest[eq + 1..];
        let (value, remaining) = if let Some(quoted) = after.strip_prefix('\'') {
            match quoted.find("';") {
                Some(close) => (&quoted[..close], &quoted[close + 2..]),
                None => {
                    let tail = quoted.trim_end_matches(is_separator);
                    (tail.strip_suffix('\'').unwrap_or(tail), "")
                }
            }
        } else {
            match after.find(';') {
                Some(close) => (after[..close].trim(), &after[close + 1..]),
                None => (after.trim(), ""),
            }
        };

        pairs.push((key.to_string(), value.to_string()));
        rest = remaining;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{encode_cycle, encode_silent_cycle, metadata_block};

    fn decoder(interval: usize) -> FrameDecoder {
        FrameDecoder::new(NonZeroUsize::new(interval).unwrap())
    }

    fn drain(decoder: &mut FrameDecoder) -> Vec<DecodedMetadata> {
        let mut blocks = Vec::new();
        while let Some(block) = decoder.decode_next().unwrap() {
            blocks.push(block);
        }
        blocks
    }

    #[test]
    fn huge_interval_waits_without_overflow() {
        let mut decoder = FrameDecoder::new(NonZeroUsize::MAX);
        decoder.push(&encode_cycle(64, "StreamTitle='X';", None));

        assert_eq!(decoder.decode_next(), Ok(None));
        assert_eq!(decoder.finish(), Ok(()));
    }

    #[test]
    fn decodes_reference_cycle() {
        // interval=100, length byte 2 (32 bytes), NUL padded title
        let mut bytes = vec![0xAAu8; 100];
        bytes.push(2);
        let mut text = b"StreamTitle='Test Song';".to_vec();
        text.resize(32, 0);
        bytes.extend_from_slice(&text);

        let mut decoder = decoder(100);
        decoder.push(&bytes);
        let block = decoder.decode_next().unwrap().expect("block");

        assert_eq!(block.len(), 2);
        assert_eq!(block.get("Interval"), Some("100"));
        assert_eq!(block.get("StreamTitle"), Some("Test Song"));
        assert_eq!(decoder.buffered(), 0);
        assert!(decoder.finish().is_ok());
    }

    #[test]
    fn decodes_every_block_length_without_leakage() {
        for interval in [1usize, 7, 100, 8192] {
            let mut bytes = Vec::new();
            let mut expected = Vec::new();
            for blocks in 1..=255u8 {
                let capacity = blocks as usize * ICY_BLOCK_UNIT;
                let value_len = capacity - "StreamTitle='';".len() - (blocks as usize % 2);
                let value: String = (0..value_len)
                    .map(|i| (b'a' + ((i + blocks as usize) % 26) as u8) as char)
                    .collect();
                bytes.extend(encode_cycle(
                    interval,
                    &format!("StreamTitle='{}';", value),
                    Some(blocks),
                ));
                expected.push(value);
            }

            let mut decoder = decoder(interval);
            decoder.push(&bytes);
            let decoded = drain(&mut decoder);

            assert_eq!(decoded.len(), 255, "interval {}", interval);
            for (block, value) in decoded.iter().zip(&expected) {
                assert_eq!(block.get("StreamTitle"), Some(value.as_str()));
                assert_eq!(block.interval(), interval);
                assert_eq!(block.len(), 2);
            }
            assert_eq!(decoder.buffered(), 0);
        }
    }

    #[test]
    fn chunking_does_not_change_the_result() {
        let mut bytes = Vec::new();
        bytes.extend(encode_cycle(64, "StreamTitle='One';", None));
        bytes.extend(encode_silent_cycle(64));
        bytes.extend(encode_cycle(64, "StreamTitle='Two';StreamUrl='http://x';", None));

        let mut whole = decoder(64);
        whole.push(&bytes);
        let expected = drain(&mut whole);

        let mut bytewise = decoder(64);
        let mut decoded = Vec::new();
        for byte in &bytes {
            bytewise.push(std::slice::from_ref(byte));
            decoded.extend(drain(&mut bytewise));
        }

        assert_eq!(expected.len(), 2);
        assert_eq!(decoded, expected);
        assert_eq!(bytewise.cycles(), 3);
    }

    #[test]
    fn waits_for_interval_plus_length_byte() {
        let mut decoder = decoder(10);
        decoder.push(&[0u8; 10]);
        assert!(decoder.decode_next().unwrap().is_none());
        assert_eq!(decoder.buffered(), 10);
        assert_eq!(decoder.cycles(), 0);
    }

    #[test]
    fn zero_length_cycles_are_suppressed() {
        let mut decoder = decoder(32);
        decoder.push(&encode_silent_cycle(32));
        decoder.push(&encode_silent_cycle(32));
        assert!(decoder.decode_next().unwrap().is_none());
        assert_eq!(decoder.cycles(), 2);
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn all_padding_block_is_suppressed() {
        let mut bytes = vec![0u8; 16];
        bytes.push(1);
        bytes.extend_from_slice(&[0u8; 16]);

        let mut decoder = decoder(16);
        decoder.push(&bytes);
        assert!(decoder.decode_next().unwrap().is_none());
        assert_eq!(decoder.cycles(), 1);
    }

    #[test]
    fn partial_metadata_block_at_end_is_malformed() {
        let cycle = encode_cycle(50, "StreamTitle='Cut Off';", None);
        let mut decoder = decoder(50);
        decoder.push(&cycle[..cycle.len() - 3]);

        assert!(decoder.decode_next().unwrap().is_none());
        let err = decoder.finish().unwrap_err();
        assert!(matches!(err, RelayError::MalformedStream(_)));
    }

    #[test]
    fn ending_inside_audio_is_graceful() {
        let mut decoder = decoder(50);
        decoder.push(&encode_cycle(50, "StreamTitle='A';", None));
        decoder.push(&[0u8; 20]);
        assert_eq!(drain(&mut decoder).len(), 1);
        assert!(decoder.finish().is_ok());
    }

    #[test]
    fn invalid_utf8_is_malformed() {
        let mut bytes = vec![0u8; 8];
        bytes.push(1);
        let mut block = vec![0xFFu8, 0xFE, b'='];
        block.resize(16, 0);
        bytes.extend(block);

        let mut decoder = decoder(8);
        decoder.push(&bytes);
        let err = decoder.decode_next().unwrap_err();
        assert!(matches!(err, RelayError::MalformedStream(_)));
    }

    #[test]
    fn segment_without_equals_is_malformed() {
        let mut decoder = decoder(8);
        decoder.push(&encode_cycle(8, "garbage;", None));
        assert!(matches!(
            decoder.decode_next(),
            Err(RelayError::MalformedStream(_))
        ));
    }

    #[test]
    fn metadata_block_helper_pads_to_unit() {
        let block = metadata_block("StreamTitle='Test Song';", None);
        assert_eq!(block[0], 2);
        assert_eq!(block.len(), 33);
    }

    #[test]
    fn parses_values_containing_quotes_and_semicolons() {
        let pairs = parse_pairs("StreamTitle='It's; fine';StreamUrl='';").unwrap();
        assert_eq!(
            pairs,
            vec![
                ("StreamTitle".to_string(), "It's; fine".to_string()),
                ("StreamUrl".to_string(), String::new()),
            ]
        );
    }

    #[test]
    fn parses_final_pair_without_semicolon_and_unquoted_values() {
        let pairs = parse_pairs("a=1; StreamTitle='Last'").unwrap();
        assert_eq!(
            pairs,
            vec![
                ("a".to_string(), "1".to_string()),
                ("StreamTitle".to_string(), "Last".to_string()),
            ]
        );
    }

    #[test]
    fn blank_text_parses_to_nothing() {
        assert!(parse_pairs("").unwrap().is_empty());
        assert!(parse_pairs(" ;; \0").unwrap().is_empty());
    }
}
