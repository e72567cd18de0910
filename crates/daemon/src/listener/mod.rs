// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Listener (spec §4.2): owns the single local stream socket, accepts
//! connections, and hands each one to the connection handler (C3).

pub mod connection;

use std::os::unix::fs::PermissionsExt;
use std::os::unix::net::UnixListener as StdUnixListener;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use socket2::{Domain, Socket, Type};
use thiserror::Error;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use voxd_cache::RenderCache;
use voxd_core::{PeerCreds, Protocol, RequestIdGen, SharedClientRegistry};
use voxd_wire::{detect_protocol, Detection};

use crate::pending::PendingResponses;
use crate::queue::WorkQueue;

/// Socket permissions mandated by spec §4.2/§6: `chmod 0660`.
const SOCKET_MODE: u32 = 0o660;

/// How long the accept loop's poll blocks before re-checking the shutdown
/// flag (spec §4.2 "polls with a 1-second timeout").
const ACCEPT_POLL_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("failed to bind socket at {path}: {source}")]
    Bind { path: PathBuf, source: std::io::Error },
    #[error("failed to set socket permissions on {path}: {source}")]
    Chmod { path: PathBuf, source: std::io::Error },
}

pub struct ListenerConfig {
    pub socket_path: PathBuf,
    pub backlog: i32,
    pub max_connections: usize,
    pub max_message_size: u32,
}

/// Shared state handed to every accepted connection's dispatcher task.
pub struct ListenCtx {
    pub registry: SharedClientRegistry,
    pub queue: Arc<WorkQueue>,
    pub cache: Arc<RenderCache>,
    /// Reply channels for in-flight requests; see [`crate::pending`].
    pub pending: Arc<PendingResponses>,
    /// Generator for the daemon-internal [`voxd_core::RequestId`] every
    /// connection-originated request is tagged with before it is queued.
    pub request_ids: Arc<RequestIdGen>,
    pub shutdown: Arc<Notify>,
    pub shutting_down: Arc<AtomicBool>,
    pub max_connections: usize,
    pub max_message_size: u32,
}

/// Create the socket, unlinking a stale file first, bind, `chmod 0660`,
/// and listen with the configured backlog (spec §4.2).
pub fn bind(config: &ListenerConfig) -> Result<UnixListener, ListenerError> {
    if config.socket_path.exists() {
        if let Err(e) = std::fs::remove_file(&config.socket_path) {
            warn!(path = %config.socket_path.display(), error = %e, "failed to unlink stale socket file");
        }
    }

    let socket = Socket::new(Domain::UNIX, Type::STREAM, None)
        .map_err(|source| ListenerError::Bind { path: config.socket_path.clone(), source })?;
    let addr = socket2::SockAddr::unix(&config.socket_path)
        .map_err(|source| ListenerError::Bind { path: config.socket_path.clone(), source })?;
    socket
        .bind(&addr)
        .map_err(|source| ListenerError::Bind { path: config.socket_path.clone(), source })?;
    socket
        .listen(config.backlog)
        .map_err(|source| ListenerError::Bind { path: config.socket_path.clone(), source })?;
    socket
        .set_nonblocking(true)
        .map_err(|source| ListenerError::Bind { path: config.socket_path.clone(), source })?;

    std::fs::set_permissions(&config.socket_path, std::fs::Permissions::from_mode(SOCKET_MODE))
        .map_err(|source| ListenerError::Chmod { path: config.socket_path.clone(), source })?;

    let std_listener: StdUnixListener = socket.into();
    UnixListener::from_std(std_listener)
        .map_err(|source| ListenerError::Bind { path: config.socket_path.clone(), source })
}

/// Accept loop: poll with a 1-second timeout so the shutdown flag is
/// observed promptly even with no incoming connections (spec §4.2, §5
/// suspension point (a)).
pub async fn accept_loop(listener: UnixListener, ctx: Arc<ListenCtx>) {
    loop {
        if ctx.shutting_down.load(Ordering::Acquire) {
            info!("listener stopping: shutdown requested");
            return;
        }

        match tokio::time::timeout(ACCEPT_POLL_TIMEOUT, listener.accept()).await {
            Ok(Ok((stream, _addr))) => {
                tokio::spawn(handle_accepted(stream, ctx.clone()));
            }
            Ok(Err(e)) => error!(error = %e, "accept error"),
            Err(_timeout) => continue,
        }
    }
}

/// Run protocol detection (spec §4.1) for one freshly accepted connection,
/// then register it and hand it to the connection handler (C3). Each
/// accept gets its own short-lived task so a slow-to-send client can't
/// stall the accept loop while its first bytes are still in flight.
async fn handle_accepted(stream: UnixStream, ctx: Arc<ListenCtx>) {
    let peer = peer_credentials(&stream);
    let protocol = match detect_protocol_blocking(&stream).await {
        Some(protocol) => protocol,
        None => {
            debug!("connection closed before any bytes arrived");
            return;
        }
    };

    let client_id = match ctx.registry.register(peer, protocol, ctx.max_connections) {
        Some(id) => id,
        None => {
            debug!("rejecting connection: at max_connections");
            drop(stream);
            return;
        }
    };

    connection::run(client_id, protocol, stream, ctx).await;
}

/// Peek (non-consuming) until protocol detection can decide, or the peer
/// closes before sending anything (spec §4.1, §5 suspension point (b)).
async fn detect_protocol_blocking(stream: &UnixStream) -> Option<Protocol> {
    let mut buf = [0u8; 4];
    loop {
        match stream.try_peek_bytes(&mut buf) {
            PeekOutcome::Protocol(protocol) => return Some(protocol),
            PeekOutcome::Closed => return None,
            PeekOutcome::WouldBlock => {
                if stream.readable().await.is_err() {
                    return None;
                }
            }
        }
    }
}

/// Best-effort `SO_PEERCRED` lookup; zero credentials on platforms or
/// error paths where it is unavailable (spec §4.2 "optional — zero on
/// platforms that do not expose them").
fn peer_credentials(stream: &UnixStream) -> PeerCreds {
    match nix::sys::socket::getsockopt(stream, nix::sys::socket::sockopt::PeerCredentials) {
        Ok(cred) => PeerCreds { pid: cred.pid() as u32, uid: cred.uid(), gid: cred.gid() },
        Err(e) => {
            debug!(error = %e, "peer credentials unavailable");
            PeerCreds::default()
        }
    }
}

enum PeekOutcome {
    Protocol(Protocol),
    /// `recv` reported 0 bytes on a readable socket: an orderly shutdown,
    /// not "no data yet".
    Closed,
    /// The socket isn't readable yet; await `readable()` and retry.
    WouldBlock,
}

/// Small helper trait so the listener can attempt a non-consuming peek
/// (`MSG_PEEK`) without threading that logic through every call site —
/// tokio's `UnixStream` has no built-in peek, unlike `TcpStream` (spec
/// §4.1 "Peeking must not consume bytes from the kernel buffer").
trait TryPeekBytes {
    fn try_peek_bytes(&self, buf: &mut [u8]) -> PeekOutcome;
}

impl TryPeekBytes for UnixStream {
    #[allow(unsafe_code)]
    fn try_peek_bytes(&self, buf: &mut [u8]) -> PeekOutcome {
        match self.try_io(tokio::io::Interest::READABLE, || {
            use std::os::fd::AsRawFd;
            let n = unsafe { libc_peek(self.as_raw_fd(), buf.as_mut_ptr() as *mut _, buf.len()) };
            if n < 0 {
                Err(std::io::Error::last_os_error())
            } else {
                Ok(n as usize)
            }
        }) {
            Ok(0) => PeekOutcome::Closed,
            Ok(n) => match detect_protocol(&buf[..n]) {
                Detection::Protocol(protocol) => PeekOutcome::Protocol(protocol),
                Detection::NeedMoreData => PeekOutcome::WouldBlock,
            },
            Err(_) => PeekOutcome::WouldBlock,
        }
    }
}

/// Thin wrapper over `recv(2)` with `MSG_PEEK`, kept local rather than
/// pulling in a whole extra crate for one syscall.
#[allow(unsafe_code)]
unsafe fn libc_peek(fd: i32, buf: *mut libc::c_void, len: usize) -> isize {
    libc::recv(fd, buf, len, libc::MSG_PEEK)
}
