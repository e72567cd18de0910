// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worker pool (spec §4.5): a fixed set of tasks that pull requests off
//! the [`WorkQueue`](crate::queue::WorkQueue) and invoke the dispatcher.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use voxd_wire::RpcResponse;

use crate::queue::{QueuedRequest, WorkQueue};

/// Minimum and maximum worker counts (spec §4.5, §6 "--workers N (1-64)").
pub const MIN_WORKERS: u32 = 1;
pub const MAX_WORKERS: u32 = 64;

/// Per-worker state (spec §3 "Worker pool").
#[derive(Debug, Default)]
pub struct WorkerStats {
    pub active: AtomicBool,
    pub requests_processed: AtomicU64,
    last_activity: Mutex<Option<Instant>>,
}

impl WorkerStats {
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    pub fn requests_processed(&self) -> u64 {
        self.requests_processed.load(Ordering::Relaxed)
    }

    pub fn last_activity(&self) -> Option<Instant> {
        *self.last_activity.lock()
    }
}

/// A handler invoked per dequeued request; returns the JSON-RPC response
/// (or `None` for a notification, which produces no response — spec
/// §4.6). The dispatcher (C6) is the concrete implementation plugged in
/// here; this module stays agnostic of its internals.
pub type Handler = Arc<
    dyn Fn(QueuedRequest) -> Pin<Box<dyn Future<Output = (QueuedRequest, Option<RpcResponse>)> + Send>>
        + Send
        + Sync,
>;

/// A callback invoked after every request, successful or not, so the
/// connection layer can write the response or release resources (spec
/// §4.5 "run the cleanup callback").
pub type Cleanup = Arc<dyn Fn(QueuedRequest, Option<RpcResponse>) + Send + Sync>;

pub struct WorkerPool {
    queue: Arc<WorkQueue>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    stats: Vec<Arc<WorkerStats>>,
    shutdown_timeout: Duration,
}

impl WorkerPool {
    /// Spawn `worker_count` worker tasks (clamped to
    /// [`MIN_WORKERS`]..=[`MAX_WORKERS`]), each running `handler` against
    /// requests pulled off `queue` and passing the result to `cleanup`.
    pub fn spawn(
        queue: Arc<WorkQueue>,
        worker_count: u32,
        shutdown_timeout: Duration,
        handler: Handler,
        cleanup: Cleanup,
    ) -> Self {
        let worker_count = worker_count.clamp(MIN_WORKERS, MAX_WORKERS);
        let mut handles = Vec::with_capacity(worker_count as usize);
        let mut stats = Vec::with_capacity(worker_count as usize);

        for worker_id in 0..worker_count {
            let queue = queue.clone();
            let handler = handler.clone();
            let cleanup = cleanup.clone();
            let worker_stats = Arc::new(WorkerStats::default());
            stats.push(worker_stats.clone());

            handles.push(tokio::spawn(worker_loop(
                worker_id,
                queue,
                handler,
                cleanup,
                worker_stats,
            )));
        }

        Self { queue, handles: Mutex::new(handles), stats, shutdown_timeout }
    }

    pub fn worker_count(&self) -> usize {
        self.stats.len()
    }

    pub fn active_count(&self) -> usize {
        self.stats.iter().filter(|s| s.is_active()).count()
    }

    pub fn stats(&self) -> &[Arc<WorkerStats>] {
        &self.stats
    }

    /// Flip the queue's shutdown flag (which wakes all workers with
    /// `None`) and join every worker task within `shutdown_timeout_ms`
    /// (spec §4.5 "Shutdown"). Workers still running past the deadline
    /// are abandoned — the spec scopes forced process termination to the
    /// lifecycle supervisor (§4.9), not this pool.
    pub async fn shutdown(&self) {
        self.queue.shutdown();
        let handles = std::mem::take(&mut *self.handles.lock());
        let join_all = futures_join_all(handles);
        if tokio::time::timeout(self.shutdown_timeout, join_all).await.is_err() {
            tracing::warn!(
                timeout_ms = self.shutdown_timeout.as_millis() as u64,
                "worker pool did not shut down within shutdown_timeout_ms"
            );
        }
    }
}

async fn futures_join_all(handles: Vec<JoinHandle<()>>) {
    for handle in handles {
        let _ = handle.await;
    }
}

async fn worker_loop(
    worker_id: u32,
    queue: Arc<WorkQueue>,
    handler: Handler,
    cleanup: Cleanup,
    stats: Arc<WorkerStats>,
) {
    loop {
        let Some(mut request) = queue.wait_dequeue().await else {
            tracing::debug!(worker_id, "worker stopping: queue shut down");
            return;
        };

        request.start_time = Some(Instant::now());
        request.worker_id = Some(worker_id);
        stats.active.store(true, Ordering::Relaxed);

        let (mut request, response) = handler(request).await;

        request.complete_time = Some(Instant::now());
        stats.requests_processed.fetch_add(1, Ordering::Relaxed);
        *stats.last_activity.lock() = request.complete_time;
        stats.active.store(false, Ordering::Relaxed);

        cleanup(request, response);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use voxd_core::{ClientId, Priority, RequestId, RequestStatus};
    use voxd_wire::RpcRequest;

    fn sample_request(id: u32) -> QueuedRequest {
        let rpc = RpcRequest::parse(br#"{"jsonrpc":"2.0","method":"ping","id":1}"#).unwrap();
        QueuedRequest::new(RequestId(id), ClientId(1), rpc, Priority::Normal, 5_000, Instant::now())
    }

    fn echo_handler() -> Handler {
        Arc::new(|mut request: QueuedRequest| {
            Box::pin(async move {
                request.status = RequestStatus::Completed;
                (request, None)
            })
        })
    }

    #[tokio::test]
    async fn pool_clamps_worker_count_to_valid_range() {
        let queue = Arc::new(WorkQueue::new(10, 0, false));
        let pool = WorkerPool::spawn(
            queue,
            0,
            Duration::from_millis(500),
            echo_handler(),
            Arc::new(|_, _| {}),
        );
        assert_eq!(pool.worker_count(), MIN_WORKERS as usize);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn dequeued_requests_are_processed_and_counted() {
        let queue = Arc::new(WorkQueue::new(10, 0, false));
        let processed = Arc::new(AtomicUsize::new(0));
        let processed_clone = processed.clone();

        let cleanup: Cleanup = Arc::new(move |_, _| {
            processed_clone.fetch_add(1, Ordering::SeqCst);
        });

        let pool = WorkerPool::spawn(queue.clone(), 2, Duration::from_millis(500), echo_handler(), cleanup);

        for i in 0..5 {
            queue.enqueue(sample_request(i)).unwrap();
        }

        let deadline = Instant::now() + Duration::from_secs(2);
        while processed.load(Ordering::SeqCst) < 5 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(processed.load(Ordering::SeqCst), 5);

        pool.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_joins_all_workers() {
        let queue = Arc::new(WorkQueue::new(10, 0, false));
        let pool = WorkerPool::spawn(
            queue,
            4,
            Duration::from_millis(500),
            echo_handler(),
            Arc::new(|_, _| {}),
        );
        pool.shutdown().await;
        assert!(pool.handles.lock().is_empty());
    }
}
