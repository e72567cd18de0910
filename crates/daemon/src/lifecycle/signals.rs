// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Signal handling (spec §4.9, §5 "Signals are handled by setting flags
//! only; no lock may be taken from a signal handler").
//!
//! `tokio::signal::unix` already gives us this shape for free: the
//! actual OS-level signal handler installed under the hood only wakes a
//! libc self-pipe, and the async task that observes it (spawned here) is
//! the "main loop polls them" side of the spec's design — no mutex is
//! ever touched on the signal-delivery path itself. `SIGPIPE` is the one
//! exception: it is ignored process-wide once at startup via a direct
//! `sigaction`, since "ignore" has no corresponding async stream to poll.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use nix::sys::signal::{self, SigHandler, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use tokio::signal::unix::{signal as unix_signal, SignalKind};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use super::LifecycleError;

/// Flags the main loop polls, set exclusively by the signal tasks
/// spawned in [`install`] (spec §9 "Signal-handler state -> atomic flags
/// + main-loop polling").
pub struct SignalFlags {
    pub shutting_down: Arc<AtomicBool>,
    pub reload_requested: Arc<AtomicBool>,
    /// Notified once when a shutdown signal arrives, so the supervisor's
    /// main loop can `select!` on it instead of busy-polling.
    pub shutdown_notify: Arc<Notify>,
}

impl SignalFlags {
    pub fn take_reload(&self) -> bool {
        self.reload_requested.swap(false, Ordering::SeqCst)
    }
}

/// Install SIGTERM/SIGINT (graceful stop), SIGHUP (reload), SIGPIPE
/// (ignore), and SIGCHLD (reap) handling, per spec §4.9.
pub fn install() -> Result<SignalFlags, LifecycleError> {
    ignore_sigpipe()?;

    let shutting_down = Arc::new(AtomicBool::new(false));
    let reload_requested = Arc::new(AtomicBool::new(false));
    let shutdown_notify = Arc::new(Notify::new());

    spawn_shutdown_watcher(SignalKind::terminate(), shutting_down.clone(), shutdown_notify.clone())?;
    spawn_shutdown_watcher(SignalKind::interrupt(), shutting_down.clone(), shutdown_notify.clone())?;
    spawn_reload_watcher(reload_requested.clone())?;
    spawn_sigchld_reaper()?;

    Ok(SignalFlags { shutting_down, reload_requested, shutdown_notify })
}

fn spawn_shutdown_watcher(
    kind: SignalKind,
    shutting_down: Arc<AtomicBool>,
    notify: Arc<Notify>,
) -> Result<(), LifecycleError> {
    let mut stream = unix_signal(kind).map_err(LifecycleError::SignalInstall)?;
    tokio::spawn(async move {
        if stream.recv().await.is_some() {
            info!("received shutdown signal");
            shutting_down.store(true, Ordering::SeqCst);
            notify.notify_waiters();
        }
    });
    Ok(())
}

fn spawn_reload_watcher(reload_requested: Arc<AtomicBool>) -> Result<(), LifecycleError> {
    let mut stream = unix_signal(SignalKind::hangup()).map_err(LifecycleError::SignalInstall)?;
    tokio::spawn(async move {
        while stream.recv().await.is_some() {
            info!("received SIGHUP: reload requested");
            reload_requested.store(true, Ordering::SeqCst);
        }
    });
    Ok(())
}

/// Reap terminated children so none linger as zombies (spec §4.9
/// "SIGCHLD (reap)"). The daemon itself spawns no children beyond the
/// double-fork during startup, but the handler is installed
/// unconditionally since a future engine adapter may shell out.
fn spawn_sigchld_reaper() -> Result<(), LifecycleError> {
    let mut stream =
        unix_signal(SignalKind::from_raw(libc::SIGCHLD)).map_err(LifecycleError::SignalInstall)?;
    tokio::spawn(async move {
        while stream.recv().await.is_some() {
            reap_all();
        }
    });
    Ok(())
}

fn reap_all() {
    loop {
        match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) => break,
            Ok(status) => debug!(?status, "reaped child process"),
            Err(_) => break,
        }
    }
}

fn ignore_sigpipe() -> Result<(), LifecycleError> {
    // SAFETY: installing SIG_IGN is always sound; it replaces the default
    // disposition and cannot run arbitrary code.
    #[allow(unsafe_code)]
    let result = unsafe { signal::signal(Signal::SIGPIPE, SigHandler::SigIgn) };
    if let Err(e) = result {
        warn!(error = %e, "failed to ignore SIGPIPE");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn sigterm_flips_shutting_down_and_notifies_waiters() {
        let flags = install().unwrap();

        let waiter = {
            let notify = flags.shutdown_notify.clone();
            tokio::spawn(async move { notify.notified().await })
        };
        tokio::task::yield_now().await;

        nix::sys::signal::raise(nix::sys::signal::Signal::SIGTERM).unwrap();

        tokio::time::timeout(Duration::from_secs(2), waiter)
            .await
            .expect("shutdown watcher should wake promptly")
            .unwrap();
        assert!(flags.shutting_down.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn sighup_sets_and_clears_reload_flag() {
        let flags = install().unwrap();
        nix::sys::signal::raise(nix::sys::signal::Signal::SIGHUP).unwrap();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while !flags.reload_requested.load(Ordering::SeqCst) && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(flags.take_reload());
        assert!(!flags.take_reload(), "take_reload should clear the flag");
    }
}
