// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! CLI flags and config-file layering (spec §6, SPEC_FULL §8
//! "Configuration"): `clap`-derived flags override a `toml` config file,
//! which overrides the built-in defaults. Nothing overrides the flags.

use std::path::{Path, PathBuf};

use clap::Parser;
use serde::Deserialize;
use thiserror::Error;

use crate::queue::{DEFAULT_OVERFLOW_MAX_SIZE, DEFAULT_QUEUE_MAX_SIZE};
use crate::workers::{MAX_WORKERS, MIN_WORKERS};
use voxd_wire::DEFAULT_MAX_MESSAGE_SIZE;

pub const DEFAULT_SOCKET_PATH: &str = "/tmp/voxd.sock";
pub const DEFAULT_PID_FILE: &str = "/tmp/voxd.pid";
pub const DEFAULT_MAX_CONNECTIONS: usize = 256;
pub const DEFAULT_WORKER_COUNT: u32 = 4;
pub const DEFAULT_SHUTDOWN_TIMEOUT_MS: u64 = 10_000;
const MAX_QUEUE_SIZE: u32 = 65_536;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("--workers must be between {MIN_WORKERS} and {MAX_WORKERS}, got {0}")]
    WorkersOutOfRange(u32),
    #[error("--queue-size must be between 1 and {MAX_QUEUE_SIZE}, got {0}")]
    QueueSizeOutOfRange(u32),
}

/// `voxd`: a headless daemon exposing the voxel editing engine over a
/// local stream socket (spec §1, §6).
#[derive(Debug, Parser)]
#[command(name = "voxd", version, about)]
pub struct Cli {
    /// Run in the foreground instead of daemonizing (default: daemonize).
    #[arg(long, conflicts_with = "daemonize")]
    pub foreground: bool,

    /// Explicitly request daemonizing (the default; provided so scripts
    /// can be explicit about intent).
    #[arg(long)]
    pub daemonize: bool,

    /// Path to the PID file.
    #[arg(long)]
    pub pid_file: Option<PathBuf>,

    /// Path to the local stream socket.
    #[arg(long)]
    pub socket: Option<PathBuf>,

    /// Path to a TOML config file layered beneath CLI flags.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Redirect logs to this file instead of stderr.
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Working directory to `chdir` into at startup.
    #[arg(long)]
    pub working_dir: Option<PathBuf>,

    /// Drop privileges to this user after binding the socket.
    #[arg(long)]
    pub user: Option<String>,

    /// Drop privileges to this group after binding the socket.
    #[arg(long)]
    pub group: Option<String>,

    /// Number of worker tasks (1-64).
    #[arg(long)]
    pub workers: Option<u32>,

    /// Maximum number of queued requests (1-65536).
    #[arg(long = "queue-size")]
    pub queue_size: Option<u32>,

    /// Maximum number of simultaneously connected clients.
    #[arg(long)]
    pub max_connections: Option<usize>,

    /// Order the work queue by priority instead of plain FIFO.
    #[arg(long)]
    pub priority_queue: bool,

    /// Report whether an instance is running and exit (spec §4.10).
    #[arg(long)]
    pub status: bool,

    /// Stop a running instance and exit (spec §4.10).
    #[arg(long)]
    pub stop: bool,

    /// Ask a running instance to reload its config and exit (spec §4.10).
    #[arg(long)]
    pub reload: bool,
}

/// The on-disk config file layer (spec §6 `--config`). Every field is
/// optional so a partial file only overrides what it mentions.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub pid_file: Option<PathBuf>,
    pub socket: Option<PathBuf>,
    pub log_file: Option<PathBuf>,
    pub working_dir: Option<PathBuf>,
    pub user: Option<String>,
    pub group: Option<String>,
    pub workers: Option<u32>,
    pub queue_size: Option<u32>,
    pub max_connections: Option<usize>,
    pub priority_queue: Option<bool>,
    pub max_message_size: Option<u32>,
    pub backlog: Option<i32>,
    pub shutdown_timeout_ms: Option<u64>,
}

impl ConfigFile {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })
    }
}

/// Fully resolved daemon configuration: CLI flags over config-file values
/// over built-in defaults (spec §6, SPEC_FULL §8).
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub foreground: bool,
    pub pid_file: PathBuf,
    pub socket: PathBuf,
    pub log_file: Option<PathBuf>,
    pub working_dir: Option<PathBuf>,
    pub user: Option<String>,
    pub group: Option<String>,
    pub workers: u32,
    pub queue_size: u32,
    pub overflow_size: u32,
    pub max_connections: usize,
    pub priority_queue: bool,
    pub max_message_size: u32,
    pub backlog: i32,
    pub shutdown_timeout_ms: u64,
}

impl ResolvedConfig {
    pub fn resolve(cli: &Cli) -> Result<Self, ConfigError> {
        let file = match &cli.config {
            Some(path) => ConfigFile::load(path)?,
            None => ConfigFile::default(),
        };

        let workers = cli.workers.or(file.workers).unwrap_or(DEFAULT_WORKER_COUNT);
        if !(MIN_WORKERS..=MAX_WORKERS).contains(&workers) {
            return Err(ConfigError::WorkersOutOfRange(workers));
        }

        let queue_size = cli.queue_size.or(file.queue_size).unwrap_or(DEFAULT_QUEUE_MAX_SIZE);
        if queue_size == 0 || queue_size > MAX_QUEUE_SIZE {
            return Err(ConfigError::QueueSizeOutOfRange(queue_size));
        }

        Ok(Self {
            foreground: cli.foreground,
            pid_file: cli
                .pid_file
                .clone()
                .or(file.pid_file)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_PID_FILE)),
            socket: cli.socket.clone().or(file.socket).unwrap_or_else(|| PathBuf::from(DEFAULT_SOCKET_PATH)),
            log_file: cli.log_file.clone().or(file.log_file),
            working_dir: cli.working_dir.clone().or(file.working_dir),
            user: cli.user.clone().or(file.user),
            group: cli.group.clone().or(file.group),
            workers,
            queue_size,
            overflow_size: DEFAULT_OVERFLOW_MAX_SIZE,
            max_connections: cli.max_connections.or(file.max_connections).unwrap_or(DEFAULT_MAX_CONNECTIONS),
            priority_queue: cli.priority_queue || file.priority_queue.unwrap_or(false),
            max_message_size: file.max_message_size.unwrap_or(DEFAULT_MAX_MESSAGE_SIZE),
            backlog: file.backlog.unwrap_or(128),
            shutdown_timeout_ms: file.shutdown_timeout_ms.unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT_MS),
        })
    }
}
