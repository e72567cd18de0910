// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Protocol detection (spec §4.1 "Protocol detection").
//!
//! Pure decision logic over a peeked byte slice; actually peeking the
//! socket without consuming (`MSG_PEEK`) is the connection layer's job
//! (`voxd-daemon::listener`), not this crate's.

use voxd_core::Protocol;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Detection {
    Protocol(Protocol),
    /// Fewer than the bytes needed to decide were peeked; caller should
    /// peek again once more data has arrived.
    NeedMoreData,
}

/// Classify a connection from up to 4 peeked bytes.
///
/// JSON iff the first non-whitespace byte is `{` immediately followed by
/// `"`; otherwise BINARY. Whitespace-only input with fewer than 4 bytes
/// is `NeedMoreData` so the caller can peek again; 4 bytes of pure
/// whitespace (or more peeked but still all whitespace) falls back to
/// BINARY, since spec bounds the peek at 4 bytes.
pub fn detect_protocol(peeked: &[u8]) -> Detection {
    let mut iter = peeked.iter().copied();
    let first_non_ws = loop {
        match iter.next() {
            Some(b) if b.is_ascii_whitespace() => continue,
            Some(b) => break Some(b),
            None => break None,
        }
    };

    match first_non_ws {
        None if peeked.len() < 4 => Detection::NeedMoreData,
        None => Detection::Protocol(Protocol::Binary),
        Some(b'{') => match iter.next() {
            Some(b'"') => Detection::Protocol(Protocol::Json),
            Some(_) => Detection::Protocol(Protocol::Binary),
            None if peeked.len() < 4 => Detection::NeedMoreData,
            None => Detection::Protocol(Protocol::Binary),
        },
        Some(_) => Detection::Protocol(Protocol::Binary),
    }
}
