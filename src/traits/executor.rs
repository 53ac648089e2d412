// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::config::ExecutorKind;
use crate::errors::ExecutionError;
use crate::task::TaskSpec;

/// An opaque, backend-scoped identifier for a submitted task.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TaskHandle(pub String);

impl fmt::Display for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The status a backend reports for a submitted task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollStatus {
    Running,
    Completed { exit_status: i32 },
    Failed { reason: String },
}

/// Captured standard streams of a finished task.
#[derive(Debug, Clone, Default)]
pub struct TaskStreams {
    pub stdout: String,
    pub stderr: String,
}

/// The backend-agnostic submit/poll/kill contract the scheduler consumes.
///
/// Implemented per backend: local fork/exec, an HPC grid submission CLI, a
/// cloud batch API. The scheduler never assumes synchronous completion - it
/// submits, then polls (or is cancelled and kills). Job-description
/// construction is entirely the implementation's concern; the core only
/// needs a stable handle and this status/result contract.
#[async_trait]
pub trait Executor: Send + Sync {
    fn name(&self) -> &'static str;

    /// Accept a task for execution and return its handle.
    async fn submit(&self, spec: &TaskSpec) -> Result<TaskHandle, ExecutionError>;

    /// Report the current status of a submitted task.
    async fn poll(&self, handle: &TaskHandle) -> Result<PollStatus, ExecutionError>;

    /// Cancel a submitted task. Must be safe to call on already-finished
    /// tasks.
    async fn kill(&self, handle: &TaskHandle) -> Result<(), ExecutionError>;

    /// Retrieve the captured streams of a finished task. Output-value
    /// extraction from them is the scheduler's concern.
    async fn fetch_outputs(
        &self,
        spec: &TaskSpec,
        handle: &TaskHandle,
    ) -> Result<TaskStreams, ExecutionError>;
}

/// Newtype registry mapping executor kinds to their implementations.
#[derive(Clone, Default)]
pub struct ExecutorSet(pub HashMap<ExecutorKind, Arc<dyn Executor>>);

impl ExecutorSet {
    pub fn new() -> Self {
        Self(HashMap::new())
    }

    pub fn insert(&mut self, kind: ExecutorKind, executor: Arc<dyn Executor>) {
        self.0.insert(kind, executor);
    }

    pub fn get(&self, kind: ExecutorKind) -> Option<&Arc<dyn Executor>> {
        self.0.get(&kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = ExecutorKind> + '_ {
        self.0.keys().copied()
    }
}

impl fmt::Debug for ExecutorSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutorSet")
            .field("kinds", &self.0.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl From<HashMap<ExecutorKind, Arc<dyn Executor>>> for ExecutorSet {
    fn from(map: HashMap<ExecutorKind, Arc<dyn Executor>>) -> Self {
        Self(map)
    }
}
