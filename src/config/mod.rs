// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Resolved run options.
//!
//! The core never parses configuration files; whatever front end loaded and
//! merged them hands over a [`RunConfig`] that only needs `Deserialize` with
//! sensible defaults.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::definition::Directives;
use crate::errors::ErrorStrategy;

/// Which executor backend runs a process's tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExecutorKind {
    #[default]
    Local,
    Grid,
    Cloud,
}

impl ExecutorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutorKind::Local => "local",
            ExecutorKind::Grid => "grid",
            ExecutorKind::Cloud => "cloud",
        }
    }
}

/// The resolved options recognized by the scheduling core.
///
/// # Fields
/// * `default_executor` - backend for processes without an override
/// * `process_executors` - per-process backend overrides
/// * `executor_slots` - concurrent in-flight task limit per backend
/// * `error_strategy` - run-level default failure policy
/// * `max_retries` - run-level retry bound under the `retry` strategy
/// * `cache_enabled` - whether completed tasks are recorded at all
/// * `resume` - whether prior recorded entries short-circuit execution
/// * `work_root` / `cache_root` - on-disk roots for work dirs and the store
/// * `poll_interval_ms` - executor polling cadence
/// * `default_timeout_seconds` - per-task timeout unless a directive overrides
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(default)]
    pub default_executor: ExecutorKind,
    #[serde(default)]
    pub process_executors: HashMap<String, ExecutorKind>,
    #[serde(default)]
    pub executor_slots: HashMap<ExecutorKind, usize>,
    #[serde(default)]
    pub error_strategy: ErrorStrategy,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_true")]
    pub cache_enabled: bool,
    #[serde(default)]
    pub resume: bool,
    #[serde(default = "default_work_root")]
    pub work_root: PathBuf,
    #[serde(default = "default_cache_root")]
    pub cache_root: PathBuf,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default)]
    pub default_timeout_seconds: Option<u64>,
}

fn default_max_retries() -> u32 {
    1
}

fn default_true() -> bool {
    true
}

fn default_work_root() -> PathBuf {
    PathBuf::from("work")
}

fn default_cache_root() -> PathBuf {
    PathBuf::from(".tideway/cache")
}

fn default_poll_interval_ms() -> u64 {
    50
}

/// Default concurrency when no slot limit is configured: the number of
/// available CPU cores, falling back to 4 if detection fails.
fn default_slots() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            default_executor: ExecutorKind::default(),
            process_executors: HashMap::new(),
            executor_slots: HashMap::new(),
            error_strategy: ErrorStrategy::default(),
            max_retries: default_max_retries(),
            cache_enabled: default_true(),
            resume: false,
            work_root: default_work_root(),
            cache_root: default_cache_root(),
            poll_interval_ms: default_poll_interval_ms(),
            default_timeout_seconds: None,
        }
    }
}

impl RunConfig {
    pub fn executor_for(&self, process: &str) -> ExecutorKind {
        self.process_executors
            .get(process)
            .copied()
            .unwrap_or(self.default_executor)
    }

    pub fn slots_for(&self, kind: ExecutorKind) -> usize {
        self.executor_slots
            .get(&kind)
            .copied()
            .unwrap_or_else(default_slots)
            .max(1)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    /// The failure policy for a process: its directive override, else the
    /// run default.
    pub fn strategy_for(&self, directives: &Directives) -> ErrorStrategy {
        directives.error_strategy.unwrap_or(self.error_strategy)
    }

    /// The retry bound for a process under the `retry` strategy.
    pub fn retries_for(&self, directives: &Directives) -> u32 {
        directives.max_retries.unwrap_or(self.max_retries).max(1)
    }

    /// The effective timeout for a process's tasks.
    pub fn timeout_for(&self, directives: &Directives) -> Option<Duration> {
        directives
            .timeout()
            .or_else(|| self.default_timeout_seconds.map(Duration::from_secs))
    }
}
