// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! voxd-cache: the render cache (spec §4.8) — TTL-and-size-bounded
//! tracking of rendered artifact files produced by JSON-RPC handlers.

pub mod config;
pub mod error;
pub mod janitor;
pub mod record;

pub use config::CacheConfig;
pub use error::CacheError;
pub use janitor::run_janitor;
pub use record::{checksum_rotate_xor, generate_path, RenderCache, RenderRecord};
