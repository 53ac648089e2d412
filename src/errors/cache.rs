// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use thiserror::Error;

/// Errors raised by the cache/resume store.
///
/// A corrupt persisted entry is reported here but downgraded to a cache miss
/// by the store; it never aborts a run.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cache entry for key {key} is corrupt: {reason}")]
    Corrupt { key: String, reason: String },

    #[error("cache entry serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}
