// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tracks the one-shot reply channel for every in-flight (non-notification)
//! request so the worker pool's cleanup callback can hand a finished
//! response back to the connection task that submitted it.
//!
//! This is plumbing, not part of the specification's `Request` data
//! model (spec §3) — `QueuedRequest` stays exactly as specified; this map
//! lives alongside the queue instead of inside it.

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use voxd_core::RequestId;
use voxd_wire::RpcResponse;

pub struct PendingResponses {
    inner: Mutex<HashMap<RequestId, oneshot::Sender<Option<RpcResponse>>>>,
}

impl PendingResponses {
    pub fn new() -> Self {
        Self { inner: Mutex::new(HashMap::new()) }
    }

    pub fn register(&self, id: RequestId) -> oneshot::Receiver<Option<RpcResponse>> {
        let (tx, rx) = oneshot::channel();
        self.inner.lock().insert(id, tx);
        rx
    }

    /// Called from the worker pool's cleanup callback. A missing entry
    /// (already removed by a timeout sweep) is not an error.
    pub fn complete(&self, id: RequestId, response: Option<RpcResponse>) {
        if let Some(tx) = self.inner.lock().remove(&id) {
            let _ = tx.send(response);
        }
    }

    /// Drop the sender for a request the queue culled as timed out —
    /// dropping (rather than sending) makes the connection's `await` on
    /// the receiver resolve to `Err`, which it treats as a timeout.
    pub fn cancel(&self, id: RequestId) {
        self.inner.lock().remove(&id);
    }
}

impl Default for PendingResponses {
    fn default() -> Self {
        Self::new()
    }
}
