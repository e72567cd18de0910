// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! voxd-ctl: the out-of-band control CLI surface (spec §4.10, C10).
//!
//! Everything here talks to a *running instance* only through its PID
//! file and `kill(2)` — there is no RPC round-trip, which is what lets
//! `status`/`stop`/`reload` work even when the daemon's request pipeline
//! (work queue, worker pool) is wedged. The daemon binary's own
//! lifecycle supervisor (C9) is what actually creates/removes the PID
//! file; this crate only reads it.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use thiserror::Error;

/// How long `stop` waits for a graceful exit before escalating to
/// `SIGKILL` (spec §4.10 "wait <= 30s; escalate to SIGKILL if still
/// alive").
pub const STOP_GRACE_PERIOD: Duration = Duration::from_secs(30);

const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum CtlError {
    #[error("i/o error on PID file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("PID file {0} does not contain a valid process id")]
    MalformedPid(PathBuf),
    #[error("failed to signal pid {pid}: {source}")]
    Signal {
        pid: i32,
        #[source]
        source: nix::Error,
    },
}

/// The liveness outcome of reading a PID file (spec §4.10 "status").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonStatus {
    /// No PID file present: nothing has ever claimed to be running.
    Absent,
    /// PID file exists and the process is alive.
    Running(i32),
    /// PID file exists but the process is gone (a stale PID file).
    Stale(i32),
}

impl DaemonStatus {
    /// The process exit code the control CLI reports for this status
    /// (spec §4.10 table: "PID exists and live -> 0, stale -> 1, absent -> 1").
    pub fn exit_code(self) -> i32 {
        match self {
            DaemonStatus::Running(_) => 0,
            DaemonStatus::Stale(_) | DaemonStatus::Absent => 1,
        }
    }
}

/// Read `path` and classify the daemon's liveness (spec §4.10 "status").
///
/// A malformed (non-numeric) PID file is treated the same as `Absent`
/// rather than an error — a corrupt PID file should not wedge `status`.
pub fn read_status(path: &Path) -> DaemonStatus {
    let Some(pid) = read_pid(path) else {
        return DaemonStatus::Absent;
    };
    if process_is_alive(pid) {
        DaemonStatus::Running(pid)
    } else {
        DaemonStatus::Stale(pid)
    }
}

/// Parse the decimal pid out of a PID file, if present and well-formed.
pub fn read_pid(path: &Path) -> Option<i32> {
    let content = fs::read_to_string(path).ok()?;
    content.trim().parse::<i32>().ok()
}

/// `kill(pid, 0)`: true iff a process with this pid exists and is
/// signalable by us (spec §4.9 "re-entry protection").
pub fn process_is_alive(pid: i32) -> bool {
    signal::kill(Pid::from_raw(pid), None).is_ok()
}

/// Send `SIGTERM`, wait up to [`STOP_GRACE_PERIOD`] for the process to
/// exit, escalate to `SIGKILL` if it is still alive, then remove the PID
/// file (spec §4.10 "stop").
///
/// Returns `Ok(true)` if a running daemon was found and stopped,
/// `Ok(false)` if the PID file was absent or already stale (nothing to
/// stop; the caller still gets exit code 0 per spec's "0 on clean stop").
pub fn stop(pid_file: &Path) -> Result<bool, CtlError> {
    let pid = match read_pid(pid_file) {
        Some(pid) => pid,
        None => return Ok(false),
    };

    if !process_is_alive(pid) {
        let _ = fs::remove_file(pid_file);
        return Ok(false);
    }

    send_signal(pid, Signal::SIGTERM)?;

    let deadline = Instant::now() + STOP_GRACE_PERIOD;
    while Instant::now() < deadline {
        if !process_is_alive(pid) {
            let _ = fs::remove_file(pid_file);
            return Ok(true);
        }
        std::thread::sleep(POLL_INTERVAL);
    }

    tracing::warn!(pid, "daemon did not exit within grace period, escalating to SIGKILL");
    send_signal(pid, Signal::SIGKILL)?;
    // Give the kernel a moment to reap it before declaring victory; a
    // SIGKILL is not interruptible so this should be immediate.
    std::thread::sleep(POLL_INTERVAL);
    let _ = fs::remove_file(pid_file);
    Ok(true)
}

/// Send `SIGHUP` to trigger a config reload (spec §4.10 "reload").
/// Returns `Ok(true)` if delivered, `Ok(false)` if no daemon is running.
pub fn reload(pid_file: &Path) -> Result<bool, CtlError> {
    let pid = match read_pid(pid_file) {
        Some(pid) => pid,
        None => return Ok(false),
    };
    if !process_is_alive(pid) {
        return Ok(false);
    }
    send_signal(pid, Signal::SIGHUP)?;
    Ok(true)
}

fn send_signal(pid: i32, signal: Signal) -> Result<(), CtlError> {
    signal::kill(Pid::from_raw(pid), signal)
        .map_err(|source| CtlError::Signal { pid, source })
}
