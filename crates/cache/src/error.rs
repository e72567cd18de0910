// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("render record not found: {0}")]
    NotFound(PathBuf),

    #[error("path {path} escapes render directory {dir}")]
    PathEscapesDir { path: PathBuf, dir: PathBuf },

    #[error("path {0} contains a \"..\" component")]
    PathTraversal(PathBuf),

    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
