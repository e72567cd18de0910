// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Timeout-sweeper task (spec §4.4 `handle_timeouts`, §5 concurrency
//! model): periodically culls requests that have sat QUEUED past their
//! `timeout_ms`, mirroring [`voxd_cache::run_janitor`]'s interval +
//! shutdown-notify shape.
//!
//! Culling alone isn't enough: a connection task may still be awaiting
//! the reply for one of the culled requests, so each one's
//! [`crate::pending::PendingResponses`] slot is cancelled too.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

use crate::pending::PendingResponses;
use crate::queue::WorkQueue;

const SWEEP_INTERVAL: Duration = Duration::from_millis(500);

pub async fn run_timeout_sweeper(queue: Arc<WorkQueue>, pending: Arc<PendingResponses>, shutdown: Arc<Notify>) {
    let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let culled = queue.cull_timed_out(std::time::Instant::now());
                if !culled.is_empty() {
                    tracing::debug!(count = culled.len(), "timeout sweeper culled requests");
                }
                for request in culled {
                    pending.cancel(request.request_id);
                }
            }
            _ = shutdown.notified() => {
                tracing::debug!("timeout sweeper stopping");
                break;
            }
        }
    }
}
