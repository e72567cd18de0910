// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! JSON-RPC dispatcher (spec §4.6): a table-driven method registry plus
//! the cross-cutting methods that are always present.
//!
//! The dispatcher never blocks on I/O (spec §4.6) — it only builds a
//! response object from already-available data; any project-lock-gated
//! work happens in the handler the caller registers, before or after
//! calling into here.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use serde_json::{json, Value};

use voxd_wire::{error_codes, RpcError, RpcRequest, RpcResponse};

/// Metadata surfaced by `list_methods` (spec §4.6 "method + metadata").
#[derive(Debug, Clone)]
pub struct MethodInfo {
    pub description: String,
}

type HandlerFn = Arc<dyn Fn(Option<Value>) -> Result<Value, RpcError> + Send + Sync>;

/// Live counters folded into the `status` method's response. Populated by
/// the daemon from the queue, worker pool, and render cache (spec §9
/// supplement: queue depth / worker count / cache counts surfaced via
/// `status`).
#[derive(Debug, Clone, Default)]
pub struct StatusSnapshot {
    pub queue_depth: u64,
    pub queue_dropped: u64,
    pub queue_timed_out: u64,
    pub worker_count: usize,
    pub active_workers: usize,
    pub requests_processed: u64,
    pub cache_entries: usize,
    pub cache_total_size: u64,
}

pub type StatusProvider = Arc<dyn Fn() -> StatusSnapshot + Send + Sync>;

/// The table-driven method registry (spec §4.6 "Handler lookup is
/// table-driven: a registry maps method-name -> handler + metadata").
pub struct Dispatcher {
    handlers: HashMap<String, (HandlerFn, MethodInfo)>,
    started_at: Instant,
    pid: u32,
    hostname: String,
    status_provider: StatusProvider,
}

impl Dispatcher {
    pub fn new(pid: u32, hostname: String, status_provider: StatusProvider) -> Self {
        let mut dispatcher =
            Self { handlers: HashMap::new(), started_at: Instant::now(), pid, hostname, status_provider };
        dispatcher.register_builtins();
        dispatcher
    }

    /// Register (or override) a method. Used by the daemon to wire engine
    /// operations in on top of the always-present builtins.
    pub fn register(
        &mut self,
        method: impl Into<String>,
        description: impl Into<String>,
        handler: HandlerFn,
    ) {
        self.handlers.insert(method.into(), (handler, MethodInfo { description: description.into() }));
    }

    fn register_builtins(&mut self) {
        self.register("ping", "Liveness check", Arc::new(|_params| {
            Ok(json!({ "pong": true, "timestamp": epoch_seconds() }))
        }));

        self.register("version", "Daemon and protocol version", Arc::new(|_params| {
            Ok(json!({
                "version": env!("CARGO_PKG_VERSION"),
                "type": "voxd",
                "protocol": "2.0",
            }))
        }));

        // `methods_available` is filled in by `dispatch` (the handler table
        // isn't fully populated yet at registration time, and this method
        // is itself one of the entries being counted), so this closure
        // leaves a placeholder that `dispatch` overwrites.
        let status_provider = self.status_provider.clone();
        let started_at = self.started_at;
        let pid = self.pid;
        let hostname = self.hostname.clone();
        self.register(
            "status",
            "Daemon status and live counters",
            Arc::new(move |_params| {
                let snapshot = status_provider();
                Ok(json!({
                    "status": "running",
                    "pid": pid,
                    "current_time": epoch_seconds(),
                    "hostname": hostname,
                    "uptime_seconds": started_at.elapsed().as_secs(),
                    "methods_available": Value::Null,
                    "queue_depth": snapshot.queue_depth,
                    "queue_dropped": snapshot.queue_dropped,
                    "queue_timed_out": snapshot.queue_timed_out,
                    "worker_count": snapshot.worker_count,
                    "active_workers": snapshot.active_workers,
                    "requests_processed": snapshot.requests_processed,
                    "cache_entries": snapshot.cache_entries,
                    "cache_total_size": snapshot.cache_total_size,
                }))
            }),
        );

        self.register("echo", "Echo params back verbatim", Arc::new(|params| {
            Ok(params.unwrap_or(Value::Null))
        }));

        // list_methods is special-cased in `dispatch` since it needs a
        // view of the whole table, including itself.
    }

    /// Dispatch a single already-parsed request. Returns `None` for a
    /// notification (spec §4.6 "Notifications (no id) produce no
    /// response").
    pub fn dispatch(&self, request: RpcRequest) -> Option<RpcResponse> {
        let id = request.id.clone();

        // +1 for `list_methods` itself, which is dispatched specially below
        // and so is never a key in `self.handlers`.
        let methods_available = self.handlers.len() + 1;

        let result = if request.method == "list_methods" {
            Ok(self.list_methods())
        } else {
            match self.handlers.get(&request.method) {
                Some((handler, _)) => handler(request.params).map(|mut value| {
                    if request.method == "status" {
                        if let Some(obj) = value.as_object_mut() {
                            obj.insert("methods_available".into(), json!(methods_available));
                        }
                    }
                    value
                }),
                None => Err(RpcError::method_not_found(&request.method)),
            }
        };

        let id = match id {
            Some(id) => id,
            None => return None, // notification
        };

        Some(match result {
            Ok(value) => RpcResponse::success(id, value),
            Err(error) => RpcResponse::error(id, error),
        })
    }

    fn list_methods(&self) -> Value {
        let mut methods: Vec<Value> = self
            .handlers
            .iter()
            .map(|(name, (_, info))| json!({ "method": name, "description": info.description }))
            .collect();
        methods.push(json!({ "method": "list_methods", "description": "List available methods" }));
        methods.sort_by(|a, b| a["method"].as_str().cmp(&b["method"].as_str()));

        json!({ "count": methods.len(), "methods": methods })
    }
}

fn epoch_seconds() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Build the JSON-RPC error response for a request the connection layer
/// could not even parse far enough to reach the dispatcher (spec §4.6
/// "Missing/invalid -> response with error -32600 ... or -32700").
pub fn error_response_for_unparseable(id: Option<voxd_wire::RpcId>, error: RpcError) -> RpcResponse {
    RpcResponse::error(id.unwrap_or(voxd_wire::RpcId::Null), error)
}

/// `-32602` helper for handlers that reject malformed `params`.
pub fn invalid_params(message: impl Into<String>) -> RpcError {
    RpcError::new(error_codes::INVALID_PARAMS, message.into())
}
