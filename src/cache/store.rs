// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::channel::Value;
use crate::errors::CacheError;

use super::key::CacheKey;

const ENTRY_FILE: &str = "entry.json";

/// The recorded result of one completed task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub exit_status: i32,
    /// Output values in declared output-port order.
    pub outputs: Vec<Value>,
    /// Preserved output artifacts (paths into the task work dir).
    pub artifacts: Vec<PathBuf>,
    pub created_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(exit_status: i32, outputs: Vec<Value>) -> Self {
        Self {
            exit_status,
            outputs,
            artifacts: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_artifacts(mut self, artifacts: Vec<PathBuf>) -> Self {
        self.artifacts = artifacts;
        self
    }
}

/// Persistent, content-addressed store of [`CacheEntry`] records.
///
/// Entries live at `<root>/<first two hex chars>/<rest>/entry.json`. Writes
/// are append-only: an existing entry is never overwritten, so concurrent
/// tasks racing on an identical key converge on the first committed result.
/// Distinct keys never contend - there is no store-wide lock to take.
#[derive(Debug, Clone)]
pub struct CacheStore {
    root: PathBuf,
}

impl CacheStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entry_dir(&self, key: &CacheKey) -> PathBuf {
        self.root.join(key.relative_path())
    }

    /// Look up a prior result.
    ///
    /// A missing entry returns `None`. An unreadable or schema-mismatched
    /// entry also returns `None` - corruption degrades to a recompute, it
    /// never fails a run.
    pub fn lookup(&self, key: &CacheKey) -> Option<CacheEntry> {
        let path = self.entry_dir(key).join(ENTRY_FILE);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "cache entry unreadable, treating as miss");
                return None;
            }
        };
        match serde_json::from_slice(&bytes) {
            Ok(entry) => Some(entry),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "cache entry corrupt, treating as miss");
                None
            }
        }
    }

    /// Record a result. First writer wins: if an entry is already committed
    /// for this key the write is skipped, which serializes racing
    /// identical-key writers without any store-wide locking.
    pub fn store(&self, key: &CacheKey, entry: &CacheEntry) -> Result<(), CacheError> {
        let dir = self.entry_dir(key);
        let final_path = dir.join(ENTRY_FILE);
        if final_path.exists() {
            tracing::debug!(key = %key, "cache entry already committed, skipping write");
            return Ok(());
        }
        fs::create_dir_all(&dir)?;

        // Stage then rename so a concurrent reader never observes a partial
        // entry; rename is atomic within the store filesystem.
        let staged = dir.join(format!(".{}.tmp", std::process::id()));
        fs::write(&staged, serde_json::to_vec_pretty(entry)?)?;
        match fs::rename(&staged, &final_path) {
            Ok(()) => Ok(()),
            Err(e) => {
                let _ = fs::remove_file(&staged);
                if final_path.exists() {
                    // Lost the race to an identical-key writer.
                    Ok(())
                } else {
                    Err(CacheError::Io(e))
                }
            }
        }
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.entry_dir(key).join(ENTRY_FILE).exists()
    }
}
