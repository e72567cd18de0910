// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The project lock (spec §4.7 "Project lock", C7).
//!
//! A single process-wide mutex serializing mutation of the shared engine
//! context. Acquisition spin-tries for up to 5s (50 x 100ms) rather than
//! blocking indefinitely, so a stuck handler degrades into a retryable
//! "project busy" error instead of starving every other worker.

use crate::clock::Clock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, MutexGuard};

const ACQUIRE_RETRIES: u32 = 50;
const ACQUIRE_RETRY_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum LockError {
    /// Spin-try exceeded its budget (5s by default) without acquiring the lock.
    #[error("project busy")]
    Busy,
}

/// Guards an `EngineContext` behind a single mutex, per spec §4.7's
/// rationale: the engine is not thread-safe in bulk, so serializing
/// mutation through one lock is simpler and correct.
pub struct ProjectLock<E> {
    inner: Mutex<E>,
    last_activity_micros: AtomicU64,
}

impl<E> ProjectLock<E> {
    pub fn new(engine: E) -> Self {
        Self { inner: Mutex::new(engine), last_activity_micros: AtomicU64::new(0) }
    }

    /// Acquire the lock, spin-trying for up to `ACQUIRE_RETRIES *
    /// ACQUIRE_RETRY_INTERVAL` (5s by default) before giving up.
    ///
    /// On success, updates `last_activity` using `clock` so
    /// [`Self::is_idle`] can later decide whether the engine may be
    /// unloaded.
    pub async fn acquire<C: Clock>(&self, clock: &C) -> Result<MutexGuard<'_, E>, LockError> {
        for attempt in 0..ACQUIRE_RETRIES {
            match self.inner.try_lock() {
                Ok(guard) => {
                    self.last_activity_micros.store(clock.epoch_micros(), Ordering::Relaxed);
                    return Ok(guard);
                }
                Err(_) if attempt + 1 == ACQUIRE_RETRIES => return Err(LockError::Busy),
                Err(_) => tokio::time::sleep(ACQUIRE_RETRY_INTERVAL).await,
            }
        }
        Err(LockError::Busy)
    }

    /// Whether the engine has gone unused for at least `timeout_s` seconds,
    /// i.e. whether it is safe for the supervisor to unload it.
    pub fn is_idle<C: Clock>(&self, clock: &C, timeout_s: u64) -> bool {
        let last = self.last_activity_micros.load(Ordering::Relaxed);
        if last == 0 {
            return false;
        }
        let now = clock.epoch_micros();
        now.saturating_sub(last) >= timeout_s.saturating_mul(1_000_000)
    }
}

pub type SharedProjectLock<E> = Arc<ProjectLock<E>>;
