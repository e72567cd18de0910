// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! voxd-wire: the two wire encodings (spec §4.1 / §6) plus JSON-RPC 2.0
//! request/response types (spec §4.6 / §6).
//!
//! Wire formats:
//! - Binary framing: 16-byte big-endian header (`id | type | length |
//!   timestamp_high`) followed by `length` bytes of payload.
//! - JSON framing: UTF-8 JSON objects/arrays concatenated on a stream,
//!   optionally newline-terminated.

pub mod binary;
pub mod detect;
pub mod json_framer;
pub mod rpc;

pub use binary::{
    encode_message, BinaryDecodeError, BinaryFramer, Header, DEFAULT_MAX_MESSAGE_SIZE, HEADER_LEN,
    MAX_MESSAGE_SIZE_CEILING,
};
pub use detect::{detect_protocol, Detection};
pub use json_framer::JsonFramer;
pub use rpc::{error_codes, RpcError, RpcRequest, RpcResponse};
