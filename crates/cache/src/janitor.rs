// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Background janitor task (spec §4.8, §5 "one janitor task for the
//! render cache"): runs both eviction passes on an interval until told
//! to stop.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use voxd_core::Clock;

use crate::record::RenderCache;

/// Run `cleanup_expired` then `enforce_cache_limit` every
/// `cleanup_interval_seconds`, until `shutdown` is notified.
///
/// Intended to be `tokio::spawn`ed by the daemon's lifecycle supervisor
/// alongside the accept loop and worker pool (spec §5's "one janitor
/// task").
pub async fn run_janitor<C: Clock>(cache: Arc<RenderCache>, clock: C, shutdown: Arc<Notify>) {
    let interval = Duration::from_secs(cache.config().cleanup_interval_seconds.max(1));
    let mut ticker = tokio::time::interval(interval);
    // The first tick fires immediately; skip it so startup doesn't race a
    // cleanup pass before anything has been registered.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let now = clock.epoch_micros() / 1_000_000;
                let expired_freed = cache.cleanup_expired(now);
                let evicted_freed = cache.enforce_cache_limit();
                if expired_freed > 0 || evicted_freed > 0 {
                    tracing::debug!(expired_freed, evicted_freed, "render cache janitor pass");
                }
            }
            _ = shutdown.notified() => {
                tracing::debug!("render cache janitor stopping");
                break;
            }
        }
    }
}
