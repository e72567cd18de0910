// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Lifecycle supervisor (spec §4.9, C9): the state machine that owns
//! daemonizing, the PID file, signal handling, and graceful shutdown.
//!
//! `DaemonState` tracks the coarse lifecycle spec §3 describes
//! (`Stopped -> Starting -> Running -> Stopping`, with `Error` reachable
//! from any state on an unrecoverable fault). The daemon process itself
//! only ever occupies `Starting`/`Running`/`Stopping` during its own
//! lifetime; `Stopped` is the state observed from the outside (no PID
//! file, or a PID file whose process is gone) and `Error` is recorded in
//! logs rather than polled, since a process that hit it has already
//! exited.

pub mod daemonize;
pub mod pidfile;
pub mod signals;

use std::path::{Path, PathBuf};

use thiserror::Error;

pub use signals::SignalFlags;

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("pid file {0} already exists")]
    PidFileExists(PathBuf),
    #[error("another instance is already running (pid {0})")]
    AlreadyRunning(i32),
    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to install signal handler: {0}")]
    SignalInstall(#[source] std::io::Error),
    #[error("failed to daemonize: {0}")]
    Daemonize(#[source] std::io::Error),
    #[error("unknown user {0:?}")]
    UnknownUser(String),
    #[error("unknown group {0:?}")]
    UnknownGroup(String),
    #[error("failed to drop privileges: {0}")]
    PrivilegeDrop(#[source] nix::Error),
}

/// Coarse lifecycle state (spec §3 "Daemon lifecycle").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonState {
    Stopped,
    Starting,
    Running,
    Stopping,
    Error,
}

/// Refuse to start if a PID file names a still-live process (spec §4.9
/// "if PID file exists and the named process is alive, refuse to
/// start"). A PID file naming a dead process is stale and is removed so
/// startup can proceed.
pub fn check_not_already_running(pid_file: &Path) -> Result<(), LifecycleError> {
    match voxd_ctl::read_status(pid_file) {
        voxd_ctl::DaemonStatus::Running(pid) => Err(LifecycleError::AlreadyRunning(pid)),
        voxd_ctl::DaemonStatus::Stale(_) => {
            pidfile::remove(pid_file);
            Ok(())
        }
        voxd_ctl::DaemonStatus::Absent => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_pid_file_allows_startup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("voxd.pid");
        assert!(check_not_already_running(&path).is_ok());
    }

    #[test]
    fn live_pid_file_refuses_startup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("voxd.pid");
        std::fs::write(&path, format!("{}\n", std::process::id())).unwrap();
        assert!(matches!(
            check_not_already_running(&path),
            Err(LifecycleError::AlreadyRunning(_))
        ));
    }

    #[test]
    fn stale_pid_file_is_removed_and_startup_allowed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("voxd.pid");
        std::fs::write(&path, "2000000000\n").unwrap();
        assert!(check_not_already_running(&path).is_ok());
        assert!(!path.exists());
    }
}
