// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Policy applied when a task fails.
///
/// Resolved from the process directive when present, falling back to the
/// run-level default. `Terminate` is the default: a failing pipeline stops
/// loudly rather than silently dropping work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ErrorStrategy {
    /// Kill all in-flight tasks, discard unscheduled candidates, end the run
    /// in error.
    #[default]
    Terminate,
    /// Let already-running tasks complete, stop scheduling new ones, end the
    /// run in error.
    Finish,
    /// Treat the failure as a completion with empty outputs and continue.
    Ignore,
    /// Re-submit up to the configured attempt bound, then abort the run.
    Retry,
}

impl fmt::Display for ErrorStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorStrategy::Terminate => "terminate",
            ErrorStrategy::Finish => "finish",
            ErrorStrategy::Ignore => "ignore",
            ErrorStrategy::Retry => "retry",
        };
        write!(f, "{}", name)
    }
}

/// Errors raised while executing tasks.
///
/// These stay local to the failing task and are resolved by the
/// [`ErrorStrategy`]; only termination and exhausted retries escalate to the
/// scheduler.
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("submit failed for task {task_id}: {reason}")]
    SubmitFailed { task_id: u64, reason: String },

    #[error("executor '{backend}' error: {reason}")]
    Backend {
        backend: &'static str,
        reason: String,
    },

    #[error("unknown task handle '{0}'")]
    UnknownHandle(String),

    #[error("task {task_id} exceeded its timeout of {seconds}s")]
    Timeout { task_id: u64, seconds: u64 },

    #[error("output port '{port}' could not be resolved: {reason}")]
    OutputMissing { port: String, reason: String },

    #[error("no executor registered for kind '{0}'")]
    MissingExecutor(String),

    #[error("value channel '{0}' was bound twice at runtime")]
    AlreadyBound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_strategy_is_terminate() {
        assert_eq!(ErrorStrategy::default(), ErrorStrategy::Terminate);
    }

    #[test]
    fn strategy_deserializes_from_snake_case() {
        let strategy: ErrorStrategy = serde_json::from_str("\"retry\"").unwrap();
        assert_eq!(strategy, ErrorStrategy::Retry);
    }
}
