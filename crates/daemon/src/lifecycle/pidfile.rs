// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! PID file management (spec §4.9): `O_CREAT|O_EXCL|O_WRONLY`, mode
//! 0644, contents `"{pid}\n"`. Re-entry protection happens one layer up
//! in [`super::check_not_already_running`].

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

use super::LifecycleError;

const PID_FILE_MODE: u32 = 0o644;

/// Exclusively create the PID file and write this process's pid into it.
///
/// Fails with `LifecycleError::PidFileExists` if the file is already
/// present — callers are expected to have already resolved the
/// stale-vs-live question via [`super::check_not_already_running`] and
/// removed a confirmed-stale file before calling this.
pub fn create(path: &Path) -> Result<File, LifecycleError> {
    let mut file = OpenOptions::new()
        .create_new(true)
        .write(true)
        .mode(PID_FILE_MODE)
        .open(path)
        .map_err(|source| {
            if source.kind() == std::io::ErrorKind::AlreadyExists {
                LifecycleError::PidFileExists(path.to_path_buf())
            } else {
                LifecycleError::Io { path: path.to_path_buf(), source }
            }
        })?;
    writeln!(file, "{}", std::process::id())
        .map_err(|source| LifecycleError::Io { path: path.to_path_buf(), source })?;
    Ok(file)
}

/// Best-effort removal, used both on graceful shutdown and on startup
/// failure cleanup.
pub fn remove(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), error = %e, "failed to remove PID file");
        }
    }
}
