// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! voxd-core: shared domain types for the voxel engine request daemon.
//!
//! This crate has no I/O of its own — it defines the vocabulary (ids,
//! priorities, client/request records, the project lock, the opaque
//! engine-context handle) that `voxd-wire` and `voxd-daemon` build on.

pub mod clock;
pub mod client;
pub mod engine;
pub mod error;
pub mod project_lock;
pub mod request;

pub use clock::{Clock, FakeClock, SystemClock};
pub use client::{Client, ClientId, ClientRegistry, PeerCreds, Protocol, SharedClientRegistry};
pub use engine::{EngineContext, NullEngine};
pub use error::{CoreError, ErrorKind};
pub use project_lock::{LockError, ProjectLock};
pub use request::{Priority, RequestId, RequestIdGen, RequestStatus};
