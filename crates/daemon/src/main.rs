// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `voxd`: a headless daemon exposing the voxel editing engine over a
//! local stream socket (spec §1).
//!
//! `main` itself stays synchronous until after daemonizing (spec §4.9):
//! forking a process that already owns a `tokio` runtime loses every
//! worker thread in the child, so the runtime is built only once the
//! process has settled into its final (possibly backgrounded) form.

mod config;
mod dispatch;
mod lifecycle;
mod listener;
mod pending;
mod queue;
mod workers;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use voxd_cache::{CacheConfig, RenderCache};
use voxd_core::{ClientRegistry, NullEngine, ProjectLock, RequestIdGen, SystemClock};
use voxd_wire::{error_codes, RpcError, RpcResponse};

use clap::Parser;

use config::{Cli, ResolvedConfig};
use dispatch::{Dispatcher, StatusSnapshot};
use listener::{ListenCtx, ListenerConfig};
use pending::PendingResponses;
use queue::WorkQueue;
use workers::{Cleanup, Handler, WorkerPool};

fn main() -> ExitCode {
    let cli = Cli::parse();

    if cli.status || cli.stop || cli.reload {
        return run_control_command(&cli);
    }

    let resolved = match ResolvedConfig::resolve(&cli) {
        Ok(resolved) => resolved,
        Err(e) => {
            eprintln!("voxd: {e}");
            return ExitCode::FAILURE;
        }
    };

    init_logging(resolved.log_file.as_deref());

    if let Err(e) = lifecycle::check_not_already_running(&resolved.pid_file) {
        error!(error = %e, "refusing to start");
        return ExitCode::FAILURE;
    }

    if !resolved.foreground {
        let opts = lifecycle::daemonize::DaemonizeOptions {
            pid_file: &resolved.pid_file,
            working_dir: resolved.working_dir.as_deref(),
            user: resolved.user.as_deref(),
            group: resolved.group.as_deref(),
        };
        if let Err(e) = lifecycle::daemonize::daemonize(opts) {
            error!(error = %e, "failed to daemonize");
            return ExitCode::FAILURE;
        }
    }

    let pid_file_handle = match lifecycle::pidfile::create(&resolved.pid_file) {
        Ok(handle) => handle,
        Err(e) => {
            error!(error = %e, "failed to create pid file");
            return ExitCode::FAILURE;
        }
    };
    // Held only to keep the descriptor alive for the process lifetime;
    // the file's contents are what other processes (voxd-ctl) read.
    drop(pid_file_handle);

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "failed to start async runtime");
            lifecycle::pidfile::remove(&resolved.pid_file);
            return ExitCode::FAILURE;
        }
    };

    let exit = runtime.block_on(async_main(resolved.clone()));
    lifecycle::pidfile::remove(&resolved.pid_file);
    let _ = std::fs::remove_file(&resolved.socket);
    exit
}

fn run_control_command(cli: &Cli) -> ExitCode {
    let pid_file: PathBuf = cli.pid_file.clone().unwrap_or_else(|| PathBuf::from(config::DEFAULT_PID_FILE));

    if cli.status {
        let status = voxd_ctl::read_status(&pid_file);
        match status {
            voxd_ctl::DaemonStatus::Running(pid) => println!("running (pid {pid})"),
            voxd_ctl::DaemonStatus::Stale(pid) => println!("stopped (stale pid file, pid {pid})"),
            voxd_ctl::DaemonStatus::Absent => println!("stopped"),
        }
        return ExitCode::from(status.exit_code() as u8);
    }

    if cli.stop {
        return match voxd_ctl::stop(&pid_file) {
            Ok(_) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("voxd: {e}");
                ExitCode::FAILURE
            }
        };
    }

    if cli.reload {
        return match voxd_ctl::reload(&pid_file) {
            Ok(true) => ExitCode::SUCCESS,
            Ok(false) => {
                eprintln!("voxd: no running instance found");
                ExitCode::FAILURE
            }
            Err(e) => {
                eprintln!("voxd: {e}");
                ExitCode::FAILURE
            }
        };
    }

    ExitCode::SUCCESS
}

/// Install the `tracing` subscriber: `RUST_LOG`-driven filtering (default
/// `info`), writing to `log_file` if given, stderr otherwise.
fn init_logging(log_file: Option<&std::path::Path>) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match log_file {
        Some(path) => {
            let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| std::path::Path::new("."));
            let file_name = path.file_name().unwrap_or_else(|| std::ffi::OsStr::new("voxd.log"));
            let appender = tracing_appender::rolling::never(dir, file_name);
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            // Leaked deliberately: the guard must outlive every log write for
            // the remainder of the process, which `main` never returns from
            // before calling `std::process::exit` via its `ExitCode`.
            Box::leak(Box::new(guard));
            tracing_subscriber::fmt().with_env_filter(filter).with_writer(non_blocking).with_ansi(false).init();
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }
}

async fn async_main(resolved: ResolvedConfig) -> ExitCode {
    let signal_flags = match lifecycle::signals::install() {
        Ok(flags) => flags,
        Err(e) => {
            error!(error = %e, "failed to install signal handlers");
            return ExitCode::FAILURE;
        }
    };

    let listener_config = ListenerConfig {
        socket_path: resolved.socket.clone(),
        backlog: resolved.backlog,
        max_connections: resolved.max_connections,
        max_message_size: resolved.max_message_size,
    };
    let bound_listener = match listener::bind(&listener_config) {
        Ok(listener) => listener,
        Err(e) => {
            error!(error = %e, "failed to bind listener socket");
            return ExitCode::FAILURE;
        }
    };

    let cache_config = CacheConfig::new(
        resolved.working_dir.clone().unwrap_or_else(|| PathBuf::from("/tmp/voxd-renders")),
    )
    .with_env_overrides();
    let cache = Arc::new(RenderCache::new(cache_config));

    let queue = Arc::new(WorkQueue::new(
        resolved.queue_size as usize,
        resolved.overflow_size as usize,
        resolved.priority_queue,
    ));
    let pending = Arc::new(PendingResponses::new());
    let request_ids = Arc::new(RequestIdGen::default());
    let registry = Arc::new(ClientRegistry::new());

    let project_lock = Arc::new(ProjectLock::new(NullEngine));
    let clock = SystemClock;

    let queue_for_status = queue.clone();
    let cache_for_status = cache.clone();
    let worker_stats_handle: Arc<parking_lot::Mutex<Option<Arc<WorkerPool>>>> =
        Arc::new(parking_lot::Mutex::new(None));
    let worker_stats_for_status = worker_stats_handle.clone();
    let status_provider: dispatch::StatusProvider = Arc::new(move || {
        let queue_stats = queue_for_status.stats();
        let (worker_count, active_workers, requests_processed) = worker_stats_for_status
            .lock()
            .as_ref()
            .map(|pool| {
                let processed = pool.stats().iter().map(|s| s.requests_processed()).sum();
                (pool.worker_count(), pool.active_count(), processed)
            })
            .unwrap_or((0, 0, 0));
        StatusSnapshot {
            queue_depth: queue_for_status.len() as u64,
            queue_dropped: queue_stats.dropped,
            queue_timed_out: queue_stats.timed_out,
            worker_count,
            active_workers,
            requests_processed,
            cache_entries: cache_for_status.len(),
            cache_total_size: cache_for_status.total_size(),
        }
    });

    let pid = std::process::id();
    let hostname = hostname_string();
    let dispatcher = Arc::new(Dispatcher::new(pid, hostname, status_provider));

    let handler: Handler = {
        let dispatcher = dispatcher.clone();
        let project_lock = project_lock.clone();
        let clock = clock.clone();
        Arc::new(move |mut request: queue::QueuedRequest| {
            let dispatcher = dispatcher.clone();
            let project_lock = project_lock.clone();
            let clock = clock.clone();
            Box::pin(async move {
                request.status = voxd_core::RequestStatus::Processing;
                let rpc = request.rpc.clone();
                let response = match project_lock.acquire(&clock).await {
                    Ok(_guard) => dispatcher.dispatch(rpc),
                    Err(_) => rpc.id.map(|id| {
                        RpcResponse::error(id, RpcError::new(error_codes::INTERNAL_ERROR, "project busy"))
                    }),
                };
                request.status = if matches!(response, Some(RpcResponse::Error { .. })) {
                    voxd_core::RequestStatus::Failed
                } else {
                    voxd_core::RequestStatus::Completed
                };
                (request, response)
            })
        })
    };

    let cleanup: Cleanup = {
        let pending = pending.clone();
        Arc::new(move |request: queue::QueuedRequest, response: Option<RpcResponse>| {
            pending.complete(request.request_id, response);
        })
    };

    let shutdown_timeout = Duration::from_millis(resolved.shutdown_timeout_ms);
    let worker_pool = Arc::new(WorkerPool::spawn(
        queue.clone(),
        resolved.workers,
        shutdown_timeout,
        handler,
        cleanup,
    ));
    *worker_stats_handle.lock() = Some(worker_pool.clone());

    let cache_shutdown = Arc::new(Notify::new());
    let sweeper_shutdown = Arc::new(Notify::new());

    let listen_ctx = Arc::new(ListenCtx {
        registry,
        queue: queue.clone(),
        cache: cache.clone(),
        pending: pending.clone(),
        request_ids,
        shutdown: signal_flags.shutdown_notify.clone(),
        shutting_down: signal_flags.shutting_down.clone(),
        max_connections: resolved.max_connections,
        max_message_size: resolved.max_message_size,
    });

    let accept_task = tokio::spawn(listener::accept_loop(bound_listener, listen_ctx.clone()));
    let sweeper_task =
        tokio::spawn(queue::sweeper::run_timeout_sweeper(queue.clone(), pending.clone(), sweeper_shutdown.clone()));
    let janitor_task =
        tokio::spawn(voxd_cache::run_janitor(cache.clone(), clock.clone(), cache_shutdown.clone()));

    info!(pid, socket = %resolved.socket.display(), workers = resolved.workers, "voxd started");

    let mut reload_poll = tokio::time::interval(Duration::from_millis(250));
    loop {
        tokio::select! {
            _ = signal_flags.shutdown_notify.notified() => {
                if signal_flags.shutting_down.load(Ordering::SeqCst) {
                    break;
                }
            }
            _ = reload_poll.tick() => {
                if signal_flags.take_reload() {
                    info!("reload requested: re-reading log filter from RUST_LOG");
                    reload_log_filter();
                }
            }
        }
    }

    info!("shutting down");
    let _ = tokio::time::timeout(Duration::from_secs(2), accept_task).await;
    worker_pool.shutdown().await;
    sweeper_shutdown.notify_one();
    cache_shutdown.notify_one();
    let _ = tokio::time::timeout(Duration::from_secs(2), sweeper_task).await;
    let _ = tokio::time::timeout(Duration::from_secs(2), janitor_task).await;

    ExitCode::SUCCESS
}

fn hostname_string() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "voxd".to_string())
}

/// `SIGHUP` only re-evaluates `RUST_LOG` (spec §4.9 "reload"); the
/// listener socket, queue shape, and worker count are fixed for the
/// process lifetime and require a restart to change.
fn reload_log_filter() {
    warn!("full config reload is not supported; only the log filter is re-read on SIGHUP");
}
