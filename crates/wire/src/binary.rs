// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Binary framing (spec §4.1, §6): 16-byte big-endian header followed by
//! `length` bytes of payload.
//!
//! The header carries `id`, `type`, `length`, and `timestamp_high` — per
//! spec §9's noted wire quirk, only the high 32 bits of a 64-bit
//! microsecond timestamp are written. This is preserved as-is for wire
//! compatibility; see [`Header::timestamp_high`].

use thiserror::Error;

/// Size in bytes of the binary header.
pub const HEADER_LEN: usize = 16;

/// Default cap on `length`, overridable per spec §4.1 up to [`MAX_MESSAGE_SIZE_CEILING`].
pub const DEFAULT_MAX_MESSAGE_SIZE: u32 = 1 << 20; // 1 MiB

/// Hard ceiling on `length` regardless of configuration.
pub const MAX_MESSAGE_SIZE_CEILING: u32 = 100 << 20; // 100 MiB

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub id: u32,
    pub msg_type: u32,
    pub length: u32,
    /// High 32 bits of a 64-bit microsecond timestamp (spec §9 open question).
    pub timestamp_high: u32,
}

impl Header {
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[0..4].copy_from_slice(&self.id.to_be_bytes());
        buf[4..8].copy_from_slice(&self.msg_type.to_be_bytes());
        buf[8..12].copy_from_slice(&self.length.to_be_bytes());
        buf[12..16].copy_from_slice(&self.timestamp_high.to_be_bytes());
        buf
    }

    pub fn decode(buf: &[u8; HEADER_LEN]) -> Self {
        Self {
            id: read_be_u32(buf, 0),
            msg_type: read_be_u32(buf, 4),
            length: read_be_u32(buf, 8),
            timestamp_high: read_be_u32(buf, 12),
        }
    }

    /// The high 32 bits of a microsecond epoch timestamp, as the wire
    /// format stores it (spec §9: the low bits are lost by design of the
    /// original implementation; the 16-byte header is kept by default for
    /// compatibility).
    pub fn timestamp_high_from_micros(epoch_micros: u64) -> u32 {
        (epoch_micros >> 32) as u32
    }
}

/// Read a big-endian `u32` out of a fixed 16-byte header buffer at
/// `offset`. Indexing (not `try_into`) keeps this infallible without an
/// `expect()`, since `offset` is always one of the four known header
/// field starts.
fn read_be_u32(buf: &[u8; HEADER_LEN], offset: usize) -> u32 {
    u32::from_be_bytes([buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]])
}

/// Encode a full message (header + payload) for writing to the socket.
pub fn encode_message(header: &Header, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.extend_from_slice(&header.encode());
    out.extend_from_slice(payload);
    out
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BinaryDecodeError {
    #[error("message length {length} exceeds max_message_size {max}")]
    TooLarge { length: u32, max: u32 },
}

/// Accumulates bytes read off a client socket and extracts complete
/// binary messages (spec §4.1).
///
/// Partial reads accumulate into an internal buffer; once >= 16 bytes are
/// buffered the header can be parsed, and once `16 + length` bytes are
/// buffered the message is extracted and the consumed prefix is dropped
/// by in-place compaction (`Vec::drain`).
pub struct BinaryFramer {
    buf: Vec<u8>,
    max_message_size: u32,
}

impl BinaryFramer {
    pub fn new(max_message_size: u32) -> Self {
        Self { buf: Vec::new(), max_message_size: max_message_size.min(MAX_MESSAGE_SIZE_CEILING) }
    }

    /// Append freshly read bytes to the internal buffer.
    pub fn feed(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Try to extract one complete message from the buffer.
    ///
    /// Returns `Ok(None)` if more bytes are needed. Returns
    /// `Err(BinaryDecodeError::TooLarge)` if the header declares a length
    /// over the configured cap — per spec §4.1 this is fatal for the
    /// connection, the caller is expected to close it.
    pub fn try_extract(&mut self) -> Result<Option<(Header, Vec<u8>)>, BinaryDecodeError> {
        if self.buf.len() < HEADER_LEN {
            return Ok(None);
        }
        let mut header_bytes = [0u8; HEADER_LEN];
        header_bytes.copy_from_slice(&self.buf[..HEADER_LEN]);
        let header = Header::decode(&header_bytes);
        if header.length > self.max_message_size {
            return Err(BinaryDecodeError::TooLarge {
                length: header.length,
                max: self.max_message_size,
            });
        }
        let total = HEADER_LEN + header.length as usize;
        if self.buf.len() < total {
            return Ok(None);
        }
        let payload = self.buf[HEADER_LEN..total].to_vec();
        self.buf.drain(..total);
        Ok(Some((header, payload)))
    }

    /// Number of bytes currently buffered (diagnostics only).
    pub fn buffered_len(&self) -> usize {
        self.buf.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header(length: u32) -> Header {
        Header { id: 7, msg_type: 1, length, timestamp_high: 0x1234_5678 }
    }

    #[test]
    fn round_trip_header_encode_decode() {
        let h = sample_header(42);
        let bytes = h.encode();
        assert_eq!(Header::decode(&bytes), h);
    }

    #[test]
    fn encode_decode_message_round_trip_for_well_formed_bytes() {
        let header = sample_header(5);
        let payload = b"hello";
        let wire = encode_message(&header, payload);

        let mut framer = BinaryFramer::new(DEFAULT_MAX_MESSAGE_SIZE);
        framer.feed(&wire);
        let (decoded_header, decoded_payload) = framer.try_extract().unwrap().unwrap();
        assert_eq!(decoded_header, header);
        assert_eq!(decoded_payload, payload);

        // encode(decode(bytes)) == bytes (spec §8 invariant 9)
        assert_eq!(encode_message(&decoded_header, &decoded_payload), wire);
    }

    #[test]
    fn partial_reads_accumulate_until_complete() {
        let header = sample_header(4);
        let wire = encode_message(&header, b"data");
        let mut framer = BinaryFramer::new(DEFAULT_MAX_MESSAGE_SIZE);

        framer.feed(&wire[..10]);
        assert_eq!(framer.try_extract().unwrap(), None);

        framer.feed(&wire[10..]);
        let (h, payload) = framer.try_extract().unwrap().unwrap();
        assert_eq!(h, header);
        assert_eq!(payload, b"data");
    }

    #[test]
    fn buffer_compacts_after_extraction_leaving_next_message_intact() {
        let h1 = sample_header(3);
        let h2 = Header { id: 8, ..sample_header(3) };
        let mut wire = encode_message(&h1, b"one");
        wire.extend(encode_message(&h2, b"two"));

        let mut framer = BinaryFramer::new(DEFAULT_MAX_MESSAGE_SIZE);
        framer.feed(&wire);
        let (first, p1) = framer.try_extract().unwrap().unwrap();
        assert_eq!(first.id, 7);
        assert_eq!(p1, b"one");
        let (second, p2) = framer.try_extract().unwrap().unwrap();
        assert_eq!(second.id, 8);
        assert_eq!(p2, b"two");
        assert_eq!(framer.buffered_len(), 0);
    }

    #[test]
    fn oversize_length_is_rejected() {
        let header = Header { id: 1, msg_type: 1, length: DEFAULT_MAX_MESSAGE_SIZE + 1, timestamp_high: 0 };
        let mut framer = BinaryFramer::new(DEFAULT_MAX_MESSAGE_SIZE);
        framer.feed(&header.encode());
        let err = framer.try_extract().unwrap_err();
        assert_eq!(
            err,
            BinaryDecodeError::TooLarge { length: DEFAULT_MAX_MESSAGE_SIZE + 1, max: DEFAULT_MAX_MESSAGE_SIZE }
        );
    }

    #[test]
    fn configured_max_is_clamped_to_hard_ceiling() {
        let framer = BinaryFramer::new(MAX_MESSAGE_SIZE_CEILING + 1);
        assert_eq!(framer.max_message_size, MAX_MESSAGE_SIZE_CEILING);
    }

    proptest::proptest! {
        #[test]
        fn round_trip_holds_for_arbitrary_small_payloads(
            id in proptest::num::u32::ANY,
            msg_type in proptest::num::u32::ANY,
            timestamp_high in proptest::num::u32::ANY,
            payload in proptest::collection::vec(proptest::num::u8::ANY, 0..256),
        ) {
            let header = Header { id, msg_type, length: payload.len() as u32, timestamp_high };
            let wire = encode_message(&header, &payload);
            let mut framer = BinaryFramer::new(DEFAULT_MAX_MESSAGE_SIZE);
            framer.feed(&wire);
            let (decoded_header, decoded_payload) = framer.try_extract().unwrap().unwrap();
            proptest::prop_assert_eq!(decoded_header, header);
            proptest::prop_assert_eq!(decoded_payload, payload);
        }
    }
}
