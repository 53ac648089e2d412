// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::errors::ExecutionError;
use crate::task::TaskSpec;
use crate::traits::{Executor, PollStatus, TaskHandle, TaskStreams};

/// What a stub handler decides for one submitted task.
#[derive(Debug, Clone)]
pub enum StubOutcome {
    /// Complete immediately with the given result.
    Complete {
        exit_status: i32,
        stdout: String,
        stderr: String,
    },
    /// Report `Running` on every poll until killed.
    Hang,
}

impl StubOutcome {
    pub fn success(stdout: impl Into<String>) -> Self {
        StubOutcome::Complete {
            exit_status: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failure(exit_status: i32, stderr: impl Into<String>) -> Self {
        StubOutcome::Complete {
            exit_status,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }
}

type StubHandler = Arc<dyn Fn(&TaskSpec) -> StubOutcome + Send + Sync>;

enum StubSlot {
    Done(StubOutcome),
    Hanging,
    Killed,
}

/// A programmable in-memory executor for scheduler tests.
///
/// The handler decides each task's fate from its spec; submission and kill
/// counts are recorded so tests can assert on dispatch behavior.
pub struct StubExecutor {
    handler: StubHandler,
    slots: Mutex<HashMap<String, StubSlot>>,
    counter: AtomicU64,
    submissions: AtomicUsize,
    kills: AtomicUsize,
}

impl StubExecutor {
    /// Every task succeeds, echoing its command as stdout.
    pub fn new() -> Self {
        Self::with_handler(|spec| StubOutcome::success(spec.command.clone()))
    }

    pub fn with_handler<F>(handler: F) -> Self
    where
        F: Fn(&TaskSpec) -> StubOutcome + Send + Sync + 'static,
    {
        Self {
            handler: Arc::new(handler),
            slots: Mutex::new(HashMap::new()),
            counter: AtomicU64::new(0),
            submissions: AtomicUsize::new(0),
            kills: AtomicUsize::new(0),
        }
    }

    pub fn submission_count(&self) -> usize {
        self.submissions.load(Ordering::SeqCst)
    }

    pub fn kill_count(&self) -> usize {
        self.kills.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Executor for StubExecutor {
    fn name(&self) -> &'static str {
        "stub"
    }

    async fn submit(&self, spec: &TaskSpec) -> Result<TaskHandle, ExecutionError> {
        self.submissions.fetch_add(1, Ordering::SeqCst);
        let outcome = (self.handler)(spec);
        let id = self.counter.fetch_add(1, Ordering::SeqCst);
        let handle = TaskHandle(format!("stub-{}", id));

        let slot = match outcome {
            StubOutcome::Hang => StubSlot::Hanging,
            done => StubSlot::Done(done),
        };
        self.slots
            .lock()
            .expect("stub lock poisoned")
            .insert(handle.0.clone(), slot);
        Ok(handle)
    }

    async fn poll(&self, handle: &TaskHandle) -> Result<PollStatus, ExecutionError> {
        let slots = self.slots.lock().expect("stub lock poisoned");
        match slots.get(&handle.0) {
            Some(StubSlot::Done(StubOutcome::Complete { exit_status, .. })) => {
                Ok(PollStatus::Completed {
                    exit_status: *exit_status,
                })
            }
            Some(StubSlot::Done(StubOutcome::Hang)) | Some(StubSlot::Hanging) => {
                Ok(PollStatus::Running)
            }
            Some(StubSlot::Killed) => Ok(PollStatus::Failed {
                reason: "killed".to_string(),
            }),
            None => Err(ExecutionError::UnknownHandle(handle.0.clone())),
        }
    }

    async fn kill(&self, handle: &TaskHandle) -> Result<(), ExecutionError> {
        self.kills.fetch_add(1, Ordering::SeqCst);
        let mut slots = self.slots.lock().expect("stub lock poisoned");
        if let Some(slot @ StubSlot::Hanging) = slots.get_mut(&handle.0) {
            *slot = StubSlot::Killed;
        }
        Ok(())
    }

    async fn fetch_outputs(
        &self,
        _spec: &TaskSpec,
        handle: &TaskHandle,
    ) -> Result<TaskStreams, ExecutionError> {
        let slots = self.slots.lock().expect("stub lock poisoned");
        match slots.get(&handle.0) {
            Some(StubSlot::Done(StubOutcome::Complete { stdout, stderr, .. })) => {
                Ok(TaskStreams {
                    stdout: stdout.clone(),
                    stderr: stderr.clone(),
                })
            }
            Some(_) => Ok(TaskStreams::default()),
            None => Err(ExecutionError::UnknownHandle(handle.0.clone())),
        }
    }
}

/// An executor whose every task exits non-zero, for failure-path tests.
pub struct FailingExecutor {
    inner: StubExecutor,
}

impl FailingExecutor {
    pub fn new(exit_status: i32) -> Self {
        Self {
            inner: StubExecutor::with_handler(move |_| {
                StubOutcome::failure(exit_status, "simulated task failure")
            }),
        }
    }

    pub fn submission_count(&self) -> usize {
        self.inner.submission_count()
    }
}

#[async_trait]
impl Executor for FailingExecutor {
    fn name(&self) -> &'static str {
        "failing"
    }

    async fn submit(&self, spec: &TaskSpec) -> Result<TaskHandle, ExecutionError> {
        self.inner.submit(spec).await
    }

    async fn poll(&self, handle: &TaskHandle) -> Result<PollStatus, ExecutionError> {
        self.inner.poll(handle).await
    }

    async fn kill(&self, handle: &TaskHandle) -> Result<(), ExecutionError> {
        self.inner.kill(handle).await
    }

    async fn fetch_outputs(
        &self,
        spec: &TaskSpec,
        handle: &TaskHandle,
    ) -> Result<TaskStreams, ExecutionError> {
        self.inner.fetch_outputs(spec, handle).await
    }
}

/// An executor that fails the first `fail_attempts` attempts of every task,
/// then succeeds, for retry tests.
pub struct FlakyExecutor {
    inner: StubExecutor,
}

impl FlakyExecutor {
    pub fn new(fail_attempts: u32) -> Self {
        Self {
            inner: StubExecutor::with_handler(move |spec| {
                if spec.attempt <= fail_attempts {
                    StubOutcome::failure(1, "flaky attempt")
                } else {
                    StubOutcome::success(spec.command.clone())
                }
            }),
        }
    }

    pub fn submission_count(&self) -> usize {
        self.inner.submission_count()
    }
}

#[async_trait]
impl Executor for FlakyExecutor {
    fn name(&self) -> &'static str {
        "flaky"
    }

    async fn submit(&self, spec: &TaskSpec) -> Result<TaskHandle, ExecutionError> {
        self.inner.submit(spec).await
    }

    async fn poll(&self, handle: &TaskHandle) -> Result<PollStatus, ExecutionError> {
        self.inner.poll(handle).await
    }

    async fn kill(&self, handle: &TaskHandle) -> Result<(), ExecutionError> {
        self.inner.kill(handle).await
    }

    async fn fetch_outputs(
        &self,
        spec: &TaskSpec,
        handle: &TaskHandle,
    ) -> Result<TaskStreams, ExecutionError> {
        self.inner.fetch_outputs(spec, handle).await
    }
}
