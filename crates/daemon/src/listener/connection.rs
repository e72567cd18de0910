// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Connection handler (spec §4.3, C3): per-client read loop that decodes
//! requests, enqueues them, and writes back whatever response the worker
//! pool eventually produces.
//!
//! Both protocols share the same downstream path (spec §4.3's "call the
//! dispatcher synchronously... the thread-pool path enqueues a work item"
//! is read here as the *same* work item always going through the queue +
//! worker pool; "synchronous" is simply the observable behavior when
//! `worker_count == 1`). This keeps the queue-saturation and priority
//! ordering guarantees (spec §8) uniform across BINARY and JSON clients.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;

use voxd_core::{ClientId, Priority};
use voxd_wire::{
    encode_message, error_codes, BinaryDecodeError, BinaryFramer, Header, JsonFramer, RpcError, RpcId,
    RpcRequest, RpcResponse,
};

use super::ListenCtx;
use crate::queue::{QueuedRequest, QueueError};

/// Oversize-message threshold for JSON clients (spec §4.3 "Oversize
/// messages (>= 64 KiB per message buffer)").
const JSON_OVERSIZE_THRESHOLD: usize = 64 * 1024;

/// Default per-request timeout for requests submitted over a connection;
/// the queue itself is timeout-agnostic about protocol, this is just the
/// value the connection layer hands to every [`QueuedRequest`] it builds.
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;

/// Default priority assigned to requests arriving over the wire; nothing
/// in the wire formats currently lets a client request a priority, so
/// every connection-originated request is NORMAL (spec §3 Request model
/// lists LOW/NORMAL/HIGH/CRITICAL but §4 never says how a client picks
/// one over the wire).
const DEFAULT_PRIORITY: Priority = Priority::Normal;

pub async fn run(client_id: ClientId, protocol: voxd_core::Protocol, stream: UnixStream, ctx: Arc<ListenCtx>) {
    let result = match protocol {
        voxd_core::Protocol::Binary => run_binary(client_id, stream, ctx.clone()).await,
        voxd_core::Protocol::Json => run_json(client_id, stream, ctx.clone()).await,
    };
    if let Err(e) = result {
        tracing::debug!(%client_id, error = %e, "connection closed");
    }
    ctx.registry.unregister(client_id);
}

#[derive(Debug, thiserror::Error)]
enum ConnectionError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("oversize binary message")]
    OversizeBinary,
}

/// BINARY read loop: grow the buffer up to `max_message_size`, extract
/// complete messages, route each through the dispatch pipeline, and write
/// the response back framed the same way (spec §4.1, §4.3).
async fn run_binary(
    client_id: ClientId,
    mut stream: UnixStream,
    ctx: Arc<ListenCtx>,
) -> Result<(), ConnectionError> {
    let mut framer = BinaryFramer::new(ctx.max_message_size);
    let mut read_buf = vec![0u8; 4096];

    loop {
        if ctx.shutting_down.load(Ordering::Acquire) {
            return Ok(());
        }

        loop {
            match framer.try_extract() {
                Ok(Some((header, payload))) => {
                    let response_payload = dispatch_payload(client_id, &payload, &ctx).await;
                    if let Some(response_payload) = response_payload {
                        let response_header = Header {
                            id: header.id,
                            msg_type: header.msg_type,
                            length: response_payload.len() as u32,
                            timestamp_high: header.timestamp_high,
                        };
                        let wire = encode_message(&response_header, &response_payload);
                        write_all_no_sigpipe(&mut stream, &wire).await?;
                    }
                }
                Ok(None) => break,
                Err(BinaryDecodeError::TooLarge { .. }) => return Err(ConnectionError::OversizeBinary),
            }
        }

        let n = stream.read(&mut read_buf).await?;
        if n == 0 {
            return Ok(());
        }
        framer.feed(&read_buf[..n]);
        if read_buf.len() < ctx.max_message_size as usize {
            read_buf.resize((read_buf.len() * 2).min(ctx.max_message_size as usize), 0);
        }
    }
}

/// JSON monitor loop: read, extract complete objects with [`JsonFramer`],
/// dispatch each, and write the response followed by a single `\n` (spec
/// §4.3, §6).
async fn run_json(
    client_id: ClientId,
    mut stream: UnixStream,
    ctx: Arc<ListenCtx>,
) -> Result<(), ConnectionError> {
    let mut framer = JsonFramer::new();
    let mut read_buf = vec![0u8; 4096];

    loop {
        if ctx.shutting_down.load(Ordering::Acquire) {
            return Ok(());
        }

        loop {
            if framer.buffered_len() >= JSON_OVERSIZE_THRESHOLD {
                let error = RpcError::parse_error("message exceeds maximum buffered size");
                let response = RpcResponse::error(RpcId::Null, error);
                write_all_no_sigpipe(&mut stream, &response.to_json_line()).await?;
                framer.reset();
                continue;
            }

            let Some(raw) = framer.try_extract() else { break };
            if let Some(response) = dispatch_rpc_bytes(client_id, &raw, &ctx).await {
                write_all_no_sigpipe(&mut stream, &response.to_json_line()).await?;
            }
        }

        let n = stream.read(&mut read_buf).await?;
        if n == 0 {
            return Ok(());
        }
        framer.feed(&read_buf[..n]);
    }
}

/// Route one decoded binary payload through the JSON-RPC pipeline,
/// returning the serialized response payload to wrap in a reply header
/// (or `None` for a notification).
async fn dispatch_payload(client_id: ClientId, payload: &[u8], ctx: &Arc<ListenCtx>) -> Option<Vec<u8>> {
    let response = dispatch_rpc_bytes(client_id, payload, ctx).await?;
    Some(serde_json::to_vec(&response.to_value()).unwrap_or_default())
}

/// Shared tail of both read loops: parse, enqueue (or synthesize an
/// overload/parse-error response), and await the worker pool's reply.
async fn dispatch_rpc_bytes(client_id: ClientId, raw: &[u8], ctx: &Arc<ListenCtx>) -> Option<RpcResponse> {
    let request = match RpcRequest::parse(raw) {
        Ok(request) => request,
        Err((id, error)) => {
            return Some(RpcResponse::error(id.unwrap_or(RpcId::Null), error));
        }
    };

    if request.is_notification() {
        enqueue_and_await(client_id, request, ctx).await;
        return None;
    }

    enqueue_and_await(client_id, request, ctx).await
}

/// Enqueue a parsed request and wait for the worker pool's response via
/// the connection's registered [`crate::pending::PendingResponses`] slot.
/// Queue-full is synthesized into an immediate overload error without
/// ever touching the queue (spec §4.4 "caller is expected to synthesize
/// an internal error / overloaded response").
async fn enqueue_and_await(
    client_id: ClientId,
    request: RpcRequest,
    ctx: &Arc<ListenCtx>,
) -> Option<RpcResponse> {
    let id = request.id.clone();
    let is_notification = request.is_notification();
    let request_id = ctx.request_ids.next();

    let rx = if is_notification { None } else { Some(ctx.pending.register(request_id)) };

    let queued = QueuedRequest::new(
        request_id,
        client_id,
        request,
        DEFAULT_PRIORITY,
        DEFAULT_REQUEST_TIMEOUT_MS,
        Instant::now(),
    );

    match ctx.queue.enqueue(queued) {
        Ok(_) => {}
        Err(QueueError::Full) => {
            if let Some(id) = id {
                return Some(RpcResponse::error(
                    id,
                    RpcError::new(error_codes::INTERNAL_ERROR, "overloaded: queue is full"),
                ));
            }
            return None;
        }
    }

    let rx = rx?;
    match rx.await {
        Ok(response) => response,
        Err(_) => id.map(|id| {
            RpcResponse::error(id, RpcError::new(error_codes::INTERNAL_ERROR, "request timed out"))
        }),
    }
}

/// Write the full buffer, mapping a broken-pipe/connection-reset error
/// (the MSG_NOSIGNAL-equivalent failure mode on a stream whose peer is
/// gone) into the same `Err` path as any other I/O failure so the caller
/// tears the connection down uniformly (spec §4.3 "all writes use
/// MSG_NOSIGNAL").
async fn write_all_no_sigpipe(stream: &mut UnixStream, buf: &[u8]) -> Result<(), ConnectionError> {
    stream.write_all(buf).await.map_err(ConnectionError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use voxd_wire::RpcId;

    #[test]
    fn oversize_threshold_matches_spec_sixty_four_kib() {
        assert_eq!(JSON_OVERSIZE_THRESHOLD, 64 * 1024);
    }

    #[test]
    fn default_priority_is_normal() {
        assert_eq!(DEFAULT_PRIORITY, Priority::Normal);
    }

    #[tokio::test]
    async fn unparseable_request_yields_parse_error_response_without_touching_queue() {
        let ctx = test_ctx();
        let response = dispatch_rpc_bytes(ClientId(1), b"{not json", &ctx).await.unwrap();
        match response {
            RpcResponse::Error { id, error } => {
                assert_eq!(id, RpcId::Null);
                assert_eq!(error.code, error_codes::PARSE_ERROR);
            }
            RpcResponse::Success { .. } => panic!("expected error"),
        }
        assert_eq!(ctx.queue.len(), 0);
    }

    fn test_ctx() -> Arc<ListenCtx> {
        use std::sync::atomic::AtomicBool;
        use tokio::sync::Notify;
        use voxd_cache::{CacheConfig, RenderCache};
        use voxd_core::ClientRegistry;

        use voxd_core::RequestIdGen;

        use crate::pending::PendingResponses;
        use crate::queue::WorkQueue;

        let dir = tempfile::tempdir().unwrap();
        Arc::new(ListenCtx {
            registry: Arc::new(ClientRegistry::new()),
            queue: Arc::new(WorkQueue::new(4, 0, false)),
            cache: Arc::new(RenderCache::new(CacheConfig::new(dir.path().to_path_buf()))),
            pending: Arc::new(PendingResponses::new()),
            request_ids: Arc::new(RequestIdGen::default()),
            shutdown: Arc::new(Notify::new()),
            shutting_down: Arc::new(AtomicBool::new(false)),
            max_connections: 4,
            max_message_size: 1 << 20,
        })
    }
}
