// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Request identity, priority, and status (spec §3 "Request").

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};

/// Monotonically assigned identifier for a queued request.
///
/// Distinct from the wire-level JSON-RPC `id` (which is client-chosen and
/// opaque); this is the daemon's own bookkeeping key for the work queue
/// and worker-pool statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestId(pub u32);

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Generator for [`RequestId`]s, monotonic for the lifetime of the daemon.
#[derive(Default)]
pub struct RequestIdGen(AtomicU32);

impl RequestIdGen {
    pub fn next(&self) -> RequestId {
        RequestId(self.0.fetch_add(1, Ordering::Relaxed))
    }
}

/// Priority of a queued request (spec §3 "Work queue").
///
/// `Ord` is derived in declaration order, so `HIGH > NORMAL` compares true
/// the way the priority queue needs: higher priority dequeues first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Priority {
    Low,
    Normal,
    High,
    Critical,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

/// Request lifecycle status. Transitions are monotone:
/// `Queued -> Processing -> {Completed, Failed, TimedOut}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestStatus {
    Queued,
    Processing,
    Completed,
    Failed,
    TimedOut,
}

impl RequestStatus {
    /// Whether `self -> next` is a legal transition per the invariant in
    /// spec §3: status transitions are monotone, never revisiting a prior
    /// stage and never skipping backward into `Queued`/`Processing`.
    pub fn can_transition_to(self, next: RequestStatus) -> bool {
        use RequestStatus::*;
        matches!(
            (self, next),
            (Queued, Processing)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Processing, TimedOut)
                | (Queued, TimedOut)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RequestStatus::Completed | RequestStatus::Failed | RequestStatus::TimedOut)
    }
}
