// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::backends::LocalExecutor;
use crate::cache::CacheStore;
use crate::config::{ExecutorKind, RunConfig};
use crate::errors::{CacheError, ExecutionError};
use crate::graph::OperatorGraph;
use crate::observability::messages::{RunCompleted, RunStarted, StructuredLog};
use crate::observability::EventLog;
use crate::resolver::spawn_resolvers;
use crate::traits::ExecutorSet;

use super::dispatch::{missing_executor_error, Dispatcher};

/// Terminal status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Success,
    /// A failure under the `finish` strategy ended the run in error after
    /// running tasks drained.
    Failed,
    /// The run was cancelled: `terminate` strategy, exhausted retries, or a
    /// fatal runtime error.
    Aborted,
}

impl RunStatus {
    pub fn exit_code(&self) -> i32 {
        match self {
            RunStatus::Success => 0,
            RunStatus::Failed => 1,
            RunStatus::Aborted => 2,
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunStatus::Success => "success",
            RunStatus::Failed => "failed",
            RunStatus::Aborted => "aborted",
        };
        write!(f, "{}", name)
    }
}

/// Summary of one failed task, as surfaced in the final report.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskFailure {
    pub task_id: u64,
    pub process: String,
    pub exit_status: Option<i32>,
    /// The last lines of captured error output (or the backend reason).
    pub stderr_tail: String,
}

/// What a finished run reports to the caller.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub status: RunStatus,
    pub failures: Vec<TaskFailure>,
    pub tasks_created: u64,
    pub cache_hits: u64,
}

impl RunReport {
    pub fn exit_code(&self) -> i32 {
        self.status.exit_code()
    }
}

/// Process-wide run state: the operator graph, the scheduler, and the
/// cache/resume store, composed for one execution.
///
/// Initialized once at startup; `run()` consumes the session and tears it
/// down when all channels are closed and all tasks are terminal, or when a
/// fatal error triggers full shutdown.
pub struct Session {
    graph: OperatorGraph,
    config: RunConfig,
    executors: ExecutorSet,
    store: CacheStore,
    events: EventLog,
    cancel: CancellationToken,
}

impl Session {
    /// Compose a session. Registers the local executor automatically when no
    /// implementation was supplied for `local`.
    pub fn new(
        graph: OperatorGraph,
        config: RunConfig,
        mut executors: ExecutorSet,
    ) -> Result<Self, CacheError> {
        let store = CacheStore::open(&config.cache_root)?;
        if executors.get(ExecutorKind::Local).is_none() {
            executors.insert(ExecutorKind::Local, Arc::new(LocalExecutor::new()));
        }
        Ok(Self {
            graph,
            config,
            executors,
            store,
            events: EventLog::new(),
            cancel: CancellationToken::new(),
        })
    }

    /// The append-only lifecycle event log; clone it before `run()` to tail
    /// or inspect events.
    pub fn events(&self) -> EventLog {
        self.events.clone()
    }

    /// A token observers may use to request cancellation from outside.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Execute the pipeline to completion.
    pub async fn run(self) -> Result<RunReport, ExecutionError> {
        // Every process must have a backend before anything starts.
        for node in &self.graph.processes {
            let kind = self.config.executor_for(&node.name);
            if self.executors.get(kind).is_none() {
                return Err(missing_executor_error(kind));
            }
        }

        RunStarted {
            processes: self.graph.process_count(),
            operators: self.graph.operator_count(),
        }
        .log();

        let (resolver_tx, resolver_rx) = mpsc::unbounded_channel();
        let (monitor_tx, monitor_rx) = mpsc::unbounded_channel();

        let operator_handles = self.graph.spawn_operators(&self.cancel);
        let resolver_handles = spawn_resolvers(&self.graph, resolver_tx, &self.cancel);

        let dispatcher = Dispatcher::new(
            self.config,
            self.executors,
            Arc::clone(self.graph.definitions()),
            self.graph.channels().clone(),
            self.graph.processes.clone(),
            self.store,
            self.events.clone(),
            self.cancel.clone(),
            monitor_tx,
        );
        let summary = dispatcher.run(resolver_rx, monitor_rx).await;

        // On a normal end the reactive tasks finish on their own once
        // channel closure cascades; cancelling early could cut off operators
        // still forwarding trailing values. Error paths cancel outright.
        if summary.aborted || !summary.failures.is_empty() {
            self.cancel.cancel();
        }
        for handle in operator_handles.into_iter().chain(resolver_handles) {
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    tracing::warn!(error = %e, "reactive task ended abnormally");
                }
            }
        }

        let status = if summary.aborted {
            RunStatus::Aborted
        } else if summary.failures.is_empty() {
            RunStatus::Success
        } else {
            RunStatus::Failed
        };

        RunCompleted {
            status: &status.to_string(),
            tasks: summary.tasks_created as usize,
            failures: summary.failures.len(),
        }
        .log();
        for failure in &summary.failures {
            tracing::error!(
                task_id = failure.task_id,
                process = %failure.process,
                exit_status = ?failure.exit_status,
                "task failed: {}",
                failure.stderr_tail
            );
        }

        Ok(RunReport {
            status,
            failures: summary.failures,
            tasks_created: summary.tasks_created,
            cache_hits: summary.cache_hits,
        })
    }
}
