// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Work queue (spec §4.4): a bounded, optionally priority-ordered FIFO of
//! [`QueuedRequest`]s shared between the connection handlers (producers)
//! and the worker pool (consumers).
//!
//! The mutex-guarded state plus [`tokio::sync::Notify`] stand in for the
//! mutex + condition variable the specification describes: `enqueue`
//! notifies one waiter, shutdown notifies all of them (spec §4.4
//! "Broadcast on shutdown wakes all waiters").

pub mod sweeper;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::Notify;

use voxd_core::{ClientId, Priority, RequestId, RequestStatus};
use voxd_wire::RpcRequest;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("queue is full")]
    Full,
}

/// Default bound on the main queue ring (spec §6 "--queue-size N (1-65536)").
pub const DEFAULT_QUEUE_MAX_SIZE: u32 = 1_024;

/// Default bound on the overflow ring (spec §3 "optional overflow ring
/// bounded by overflow_max_size"); zero disables overflow entirely.
pub const DEFAULT_OVERFLOW_MAX_SIZE: u32 = 0;

/// A request sitting in the work queue, awaiting a worker (spec §3
/// "Request (queued)").
#[derive(Debug)]
pub struct QueuedRequest {
    pub request_id: RequestId,
    pub client_id: ClientId,
    pub rpc: RpcRequest,
    pub priority: Priority,
    pub status: RequestStatus,
    pub submit_time: Instant,
    pub start_time: Option<Instant>,
    pub complete_time: Option<Instant>,
    pub timeout_ms: u64,
    pub worker_id: Option<u32>,
}

impl QueuedRequest {
    pub fn new(
        request_id: RequestId,
        client_id: ClientId,
        rpc: RpcRequest,
        priority: Priority,
        timeout_ms: u64,
        submit_time: Instant,
    ) -> Self {
        Self {
            request_id,
            client_id,
            rpc,
            priority,
            status: RequestStatus::Queued,
            submit_time,
            start_time: None,
            complete_time: None,
            timeout_ms,
            worker_id: None,
        }
    }
}

/// Queue statistics (spec §4.4 "Dropped-on-full counts are exposed via
/// statistics"), atomics so readers never contend with the queue mutex.
#[derive(Debug, Default)]
pub struct QueueStats {
    pub enqueued: AtomicU64,
    pub dequeued: AtomicU64,
    pub dropped: AtomicU64,
    pub timed_out: AtomicU64,
}

impl QueueStats {
    pub fn snapshot(&self) -> QueueStatsSnapshot {
        QueueStatsSnapshot {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            dequeued: self.dequeued.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueStatsSnapshot {
    pub enqueued: u64,
    pub dequeued: u64,
    pub dropped: u64,
    pub timed_out: u64,
}

struct QueueState {
    items: VecDeque<QueuedRequest>,
    overflow: VecDeque<QueuedRequest>,
}

/// The bounded work queue (spec §4.4).
pub struct WorkQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    stats: QueueStats,
    max_size: usize,
    overflow_max_size: usize,
    priority_mode: bool,
    shutting_down: AtomicBool,
}

impl WorkQueue {
    pub fn new(max_size: usize, overflow_max_size: usize, priority_mode: bool) -> Self {
        Self {
            state: Mutex::new(QueueState { items: VecDeque::new(), overflow: VecDeque::new() }),
            notify: Notify::new(),
            stats: QueueStats::default(),
            max_size,
            overflow_max_size,
            priority_mode,
            shutting_down: AtomicBool::new(false),
        }
    }

    pub fn stats(&self) -> QueueStatsSnapshot {
        self.stats.snapshot()
    }

    /// Number of requests currently queued (main queue plus overflow).
    pub fn len(&self) -> usize {
        let state = self.state.lock();
        state.items.len() + state.overflow.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Insert a request. Priority mode inserts before the first element
    /// with strictly lower priority, keeping priority descending and FIFO
    /// within a priority (spec §4.4). Returns `Err(Full)` and leaves the
    /// queue unchanged if both the main queue and overflow ring are full
    /// (spec §8 invariant 3).
    pub fn enqueue(&self, request: QueuedRequest) -> Result<RequestId, QueueError> {
        let id = request.request_id;
        let mut state = self.state.lock();

        if state.items.len() < self.max_size {
            if self.priority_mode {
                let pos = state
                    .items
                    .iter()
                    .position(|queued| queued.priority < request.priority)
                    .unwrap_or(state.items.len());
                state.items.insert(pos, request);
            } else {
                state.items.push_back(request);
            }
            drop(state);
            self.stats.enqueued.fetch_add(1, Ordering::Relaxed);
            self.notify.notify_one();
            return Ok(id);
        }

        if self.overflow_max_size > 0 && state.overflow.len() < self.overflow_max_size {
            state.overflow.push_back(request);
            drop(state);
            self.stats.enqueued.fetch_add(1, Ordering::Relaxed);
            self.notify.notify_one();
            return Ok(id);
        }

        self.stats.dropped.fetch_add(1, Ordering::Relaxed);
        Err(QueueError::Full)
    }

    /// Non-blocking dequeue attempt: main queue head first, then overflow.
    pub fn try_dequeue(&self) -> Option<QueuedRequest> {
        let mut state = self.state.lock();
        let item = state.items.pop_front().or_else(|| state.overflow.pop_front());
        drop(state);
        if item.is_some() {
            self.stats.dequeued.fetch_add(1, Ordering::Relaxed);
        }
        item
    }

    /// Wait for a request to become available, waking on every `enqueue`
    /// or on shutdown. Returns `None` once shutdown has been signalled and
    /// no work remains — the worker pool treats that as "stop looping".
    pub async fn wait_dequeue(&self) -> Option<QueuedRequest> {
        loop {
            if let Some(item) = self.try_dequeue() {
                return Some(item);
            }
            if self.shutting_down.load(Ordering::Acquire) {
                return None;
            }
            self.notify.notified().await;
        }
    }

    /// Remove a still-queued request by id, if present in either ring.
    pub fn cancel(&self, request_id: RequestId) -> Option<QueuedRequest> {
        let mut state = self.state.lock();
        if let Some(pos) = state.items.iter().position(|r| r.request_id == request_id) {
            return state.items.remove(pos);
        }
        if let Some(pos) = state.overflow.iter().position(|r| r.request_id == request_id) {
            return state.overflow.remove(pos);
        }
        None
    }

    /// Remove every request that has been queued longer than its
    /// `timeout_ms`, returning how many were culled (spec §4.4).
    pub fn handle_timeouts(&self, now: Instant) -> u64 {
        self.cull_timed_out(now).len() as u64
    }

    /// Same culling as [`Self::handle_timeouts`], but returns the culled
    /// requests themselves so a caller (the timeout-sweeper task) can
    /// notify whoever is waiting on each one's response.
    pub fn cull_timed_out(&self, now: Instant) -> Vec<QueuedRequest> {
        let mut state = self.state.lock();
        let mut culled = Vec::new();

        for ring in [&mut state.items, &mut state.overflow] {
            let mut i = 0;
            while i < ring.len() {
                let elapsed = now.saturating_duration_since(ring[i].submit_time);
                if elapsed > Duration::from_millis(ring[i].timeout_ms) {
                    if let Some(request) = ring.remove(i) {
                        culled.push(request);
                    }
                } else {
                    i += 1;
                }
            }
        }

        drop(state);
        if !culled.is_empty() {
            self.stats.timed_out.fetch_add(culled.len() as u64, Ordering::Relaxed);
        }
        culled
    }

    /// Signal all current and future waiters to stop blocking (spec §4.4
    /// "Broadcast on shutdown wakes all waiters").
    pub fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use voxd_wire::RpcRequest;

    fn sample_rpc() -> RpcRequest {
        RpcRequest::parse(br#"{"jsonrpc":"2.0","method":"ping","id":1}"#).unwrap()
    }

    fn sample_request(id: u32, priority: Priority) -> QueuedRequest {
        QueuedRequest::new(
            RequestId(id),
            ClientId(1),
            sample_rpc(),
            priority,
            5_000,
            Instant::now(),
        )
    }

    #[test]
    fn fifo_order_without_priority_mode() {
        let queue = WorkQueue::new(10, 0, false);
        queue.enqueue(sample_request(1, Priority::Normal)).unwrap();
        queue.enqueue(sample_request(2, Priority::Normal)).unwrap();
        assert_eq!(queue.try_dequeue().unwrap().request_id, RequestId(1));
        assert_eq!(queue.try_dequeue().unwrap().request_id, RequestId(2));
    }

    #[test]
    fn priority_mode_orders_high_before_low_fifo_within_tier() {
        let queue = WorkQueue::new(10, 0, true);
        queue.enqueue(sample_request(1, Priority::Low)).unwrap();
        queue.enqueue(sample_request(2, Priority::High)).unwrap();
        queue.enqueue(sample_request(3, Priority::Normal)).unwrap();
        queue.enqueue(sample_request(4, Priority::High)).unwrap();

        assert_eq!(queue.try_dequeue().unwrap().request_id, RequestId(2));
        assert_eq!(queue.try_dequeue().unwrap().request_id, RequestId(4));
        assert_eq!(queue.try_dequeue().unwrap().request_id, RequestId(3));
        assert_eq!(queue.try_dequeue().unwrap().request_id, RequestId(1));
    }

    #[test]
    fn enqueue_past_max_size_without_overflow_is_full_and_size_unchanged() {
        let queue = WorkQueue::new(1, 0, false);
        queue.enqueue(sample_request(1, Priority::Normal)).unwrap();
        let before = queue.len();
        let err = queue.enqueue(sample_request(2, Priority::Normal)).unwrap_err();
        assert_eq!(err, QueueError::Full);
        assert_eq!(queue.len(), before);
        assert_eq!(queue.stats().dropped, 1);
    }

    #[test]
    fn overflow_ring_accepts_once_main_queue_is_full() {
        let queue = WorkQueue::new(1, 1, false);
        queue.enqueue(sample_request(1, Priority::Normal)).unwrap();
        queue.enqueue(sample_request(2, Priority::Normal)).unwrap();
        assert_eq!(queue.len(), 2);
        let err = queue.enqueue(sample_request(3, Priority::Normal)).unwrap_err();
        assert_eq!(err, QueueError::Full);
    }

    #[test]
    fn cancel_removes_a_still_queued_request() {
        let queue = WorkQueue::new(10, 0, false);
        queue.enqueue(sample_request(1, Priority::Normal)).unwrap();
        queue.enqueue(sample_request(2, Priority::Normal)).unwrap();
        let cancelled = queue.cancel(RequestId(1)).unwrap();
        assert_eq!(cancelled.request_id, RequestId(1));
        assert_eq!(queue.len(), 1);
        assert!(queue.cancel(RequestId(99)).is_none());
    }

    #[test]
    fn handle_timeouts_culls_only_expired_entries() {
        let queue = WorkQueue::new(10, 0, false);
        let mut old = sample_request(1, Priority::Normal);
        old.submit_time = Instant::now() - Duration::from_millis(200);
        old.timeout_ms = 50;
        queue.enqueue(old).unwrap();

        let mut fresh = sample_request(2, Priority::Normal);
        fresh.timeout_ms = 5_000;
        queue.enqueue(fresh).unwrap();

        let culled = queue.handle_timeouts(Instant::now());
        assert_eq!(culled, 1);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.try_dequeue().unwrap().request_id, RequestId(2));
    }

    #[tokio::test]
    async fn wait_dequeue_wakes_on_enqueue() {
        let queue = std::sync::Arc::new(WorkQueue::new(10, 0, false));
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.wait_dequeue().await })
        };
        tokio::task::yield_now().await;
        queue.enqueue(sample_request(1, Priority::Normal)).unwrap();

        let item = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("wait_dequeue should wake promptly")
            .unwrap();
        assert_eq!(item.unwrap().request_id, RequestId(1));
    }

    #[tokio::test]
    async fn shutdown_wakes_all_waiters_with_none() {
        let queue = std::sync::Arc::new(WorkQueue::new(10, 0, false));
        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let queue = queue.clone();
                tokio::spawn(async move { queue.wait_dequeue().await })
            })
            .collect();
        tokio::task::yield_now().await;
        queue.shutdown();

        for waiter in waiters {
            let result = tokio::time::timeout(Duration::from_secs(1), waiter)
                .await
                .expect("shutdown should wake waiters promptly")
                .unwrap();
            assert!(result.is_none());
        }
    }
}
