// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Local fork/exec backend.
//!
//! Runs each task as a child process on the coordinating host. The rendered
//! command is written to `.command.sh` inside the task's content-addressed
//! work dir, streams are captured to `.command.out` / `.command.err`, and
//! the exit status is recorded in `.exitcode` once observed.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::process::{Child, Command};

use crate::errors::ExecutionError;
use crate::task::TaskSpec;
use crate::traits::{Executor, PollStatus, TaskHandle, TaskStreams};

const SCRIPT_FILE: &str = ".command.sh";
const STDOUT_FILE: &str = ".command.out";
const STDERR_FILE: &str = ".command.err";
const EXITCODE_FILE: &str = ".exitcode";

enum Slot {
    Running { child: Child, work_dir: PathBuf },
    Done { exit_status: i32 },
}

/// Executor backend spawning tasks as local child processes.
pub struct LocalExecutor {
    slots: Mutex<HashMap<String, Slot>>,
    counter: AtomicU64,
}

impl LocalExecutor {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            counter: AtomicU64::new(0),
        }
    }

    fn backend_err(reason: impl Into<String>) -> ExecutionError {
        ExecutionError::Backend {
            backend: "local",
            reason: reason.into(),
        }
    }
}

impl Default for LocalExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Executor for LocalExecutor {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn submit(&self, spec: &TaskSpec) -> Result<TaskHandle, ExecutionError> {
        tokio::fs::create_dir_all(&spec.work_dir).await?;

        // Stage file inputs next to the script so commands can refer to them
        // by file name.
        for source in &spec.staged_inputs {
            let file_name = source
                .file_name()
                .ok_or_else(|| Self::backend_err(format!("unstageable input {}", source.display())))?;
            let target = spec.work_dir.join(file_name);
            if !target.exists() {
                tokio::fs::copy(source, &target).await?;
            }
        }

        let script = spec.work_dir.join(SCRIPT_FILE);
        tokio::fs::write(&script, format!("#!/usr/bin/env bash\nset -ue\n{}\n", spec.command))
            .await?;

        let stdout = std::fs::File::create(spec.work_dir.join(STDOUT_FILE))?;
        let stderr = std::fs::File::create(spec.work_dir.join(STDERR_FILE))?;

        let mut command = Command::new("bash");
        command
            .arg(SCRIPT_FILE)
            .current_dir(&spec.work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .kill_on_drop(true);
        for (key, value) in &spec.env {
            command.env(key, value);
        }

        let child = command
            .spawn()
            .map_err(|e| ExecutionError::SubmitFailed {
                task_id: spec.task_id,
                reason: e.to_string(),
            })?;

        let id = self.counter.fetch_add(1, Ordering::SeqCst);
        let handle = TaskHandle(format!("local-{}", id));
        tracing::debug!(handle = %handle, task_id = spec.task_id, "local task spawned");

        let mut slots = self.slots.lock().expect("local executor lock poisoned");
        slots.insert(
            handle.0.clone(),
            Slot::Running {
                child,
                work_dir: spec.work_dir.clone(),
            },
        );
        Ok(handle)
    }

    async fn poll(&self, handle: &TaskHandle) -> Result<PollStatus, ExecutionError> {
        let mut slots = self.slots.lock().expect("local executor lock poisoned");
        let slot = slots
            .get_mut(&handle.0)
            .ok_or_else(|| ExecutionError::UnknownHandle(handle.0.clone()))?;

        match slot {
            Slot::Done { exit_status } => Ok(PollStatus::Completed {
                exit_status: *exit_status,
            }),
            Slot::Running { child, work_dir } => match child.try_wait() {
                Ok(Some(status)) => {
                    // A signal-terminated child has no code; report the
                    // conventional 128+signal-style sentinel.
                    let exit_status = status.code().unwrap_or(137);
                    let _ = std::fs::write(
                        work_dir.join(EXITCODE_FILE),
                        format!("{}\n", exit_status),
                    );
                    *slot = Slot::Done { exit_status };
                    Ok(PollStatus::Completed { exit_status })
                }
                Ok(None) => Ok(PollStatus::Running),
                Err(e) => Ok(PollStatus::Failed {
                    reason: e.to_string(),
                }),
            },
        }
    }

    async fn kill(&self, handle: &TaskHandle) -> Result<(), ExecutionError> {
        let mut slots = self.slots.lock().expect("local executor lock poisoned");
        if let Some(Slot::Running { child, .. }) = slots.get_mut(&handle.0) {
            // The child may have exited between poll and kill; that is fine.
            if let Err(e) = child.start_kill() {
                tracing::debug!(handle = %handle, error = %e, "kill on finished child ignored");
            }
        }
        Ok(())
    }

    async fn fetch_outputs(
        &self,
        spec: &TaskSpec,
        _handle: &TaskHandle,
    ) -> Result<TaskStreams, ExecutionError> {
        let stdout = tokio::fs::read_to_string(spec.work_dir.join(STDOUT_FILE))
            .await
            .unwrap_or_default();
        let stderr = tokio::fs::read_to_string(spec.work_dir.join(STDERR_FILE))
            .await
            .unwrap_or_default();
        Ok(TaskStreams { stdout, stderr })
    }
}
