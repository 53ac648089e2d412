// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! One unit of work: a process definition instantiated for a specific input
//! tuple.
//!
//! Tasks are created by the resolver, owned exclusively by the scheduler
//! until terminal, and refer back to their process through an index into the
//! immutable definition table.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::cache::CacheKey;
use crate::channel::Value;
use crate::definition::{input_env, PortKind, ProcessDefinition};

/// Lifecycle states.
///
/// Legal transitions:
/// `Pending -> Submitted -> Running -> {Completed | Failed}`,
/// `Failed -> Retrying -> Submitted`, `Failed -> Aborted`,
/// and the cache-hit shortcut `Pending -> Completed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Submitted,
    Running,
    Completed,
    Failed,
    Retrying,
    Aborted,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Aborted)
    }

    pub fn can_transition_to(&self, next: TaskState) -> bool {
        use TaskState::*;
        matches!(
            (self, next),
            (Pending, Submitted)
                | (Pending, Completed) // cache hit
                | (Submitted, Running)
                | (Running, Completed)
                | (Running, Failed)
                | (Submitted, Failed) // submission itself failed
                | (Failed, Retrying)
                | (Failed, Completed) // ignore strategy
                | (Failed, Aborted)
                | (Retrying, Submitted)
        )
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskState::Pending => "pending",
            TaskState::Submitted => "submitted",
            TaskState::Running => "running",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
            TaskState::Retrying => "retrying",
            TaskState::Aborted => "aborted",
        };
        write!(f, "{}", name)
    }
}

/// A live task in the scheduler's table.
#[derive(Debug, Clone)]
pub struct Task {
    pub id: u64,
    pub def_index: usize,
    pub process: String,
    /// Per-process emission sequence, assigned by the resolver in input
    /// pairing order; drives in-order output publication.
    pub seq: u64,
    /// Resolved input tuple in declared port order.
    pub inputs: Vec<(String, Value)>,
    pub command: String,
    pub cache_key: CacheKey,
    pub work_dir: PathBuf,
    pub state: TaskState,
    pub attempt: u32,
    pub exit_status: Option<i32>,
}

impl Task {
    pub fn new(
        id: u64,
        def_index: usize,
        def: &ProcessDefinition,
        seq: u64,
        inputs: Vec<(String, Value)>,
        work_root: &Path,
    ) -> Self {
        let command = def.command.render(&inputs);
        let cache_key = CacheKey::for_task(
            &def.identity(),
            &command,
            &inputs,
            &def.directives.cache_signature(),
        );
        // Content-addressed work dir: rerunning an identical task lands in
        // the same directory.
        let work_dir = work_root.join(cache_key.relative_path());
        Self {
            id,
            def_index,
            process: def.name.clone(),
            seq,
            inputs,
            command,
            cache_key,
            work_dir,
            state: TaskState::Pending,
            attempt: 1,
            exit_status: None,
        }
    }

    /// Move to the next lifecycle state. Illegal transitions are logged and
    /// refused rather than corrupting the table; the scheduler's message
    /// ordering makes them unreachable in practice.
    pub fn advance(&mut self, next: TaskState) {
        if !self.state.can_transition_to(next) {
            tracing::error!(
                task_id = self.id,
                from = %self.state,
                to = %next,
                "illegal task state transition refused"
            );
            return;
        }
        tracing::debug!(task_id = self.id, from = %self.state, to = %next, "task transition");
        self.state = next;
    }

    /// Build the backend-facing description of this attempt.
    pub fn to_spec(&self, def: &ProcessDefinition) -> TaskSpec {
        let mut env = Vec::with_capacity(self.inputs.len());
        let mut staged = Vec::new();
        for (name, value) in &self.inputs {
            let kind = def
                .input(name)
                .map(|p| p.kind)
                .unwrap_or(PortKind::Value);
            env.push(input_env(kind, name, value));
            if kind == PortKind::FileRef {
                if let Value::Path(path) = value {
                    staged.push(path.clone());
                }
            }
        }
        TaskSpec {
            task_id: self.id,
            process: self.process.clone(),
            command: self.command.clone(),
            work_dir: self.work_dir.clone(),
            env,
            staged_inputs: staged,
            container: def.directives.container.clone(),
            cpus: def.directives.cpus,
            memory_mb: def.directives.memory_mb,
            attempt: self.attempt,
        }
    }
}

/// Everything a backend needs to launch one attempt of a task.
///
/// Backend-specific job-description construction (batch payloads, grid
/// submission scripts) happens entirely inside the executor from these
/// fields.
#[derive(Debug, Clone)]
pub struct TaskSpec {
    pub task_id: u64,
    pub process: String,
    pub command: String,
    pub work_dir: PathBuf,
    /// Resolved inputs as environment pairs, in declared port order.
    pub env: Vec<(String, String)>,
    /// Files to stage into the work dir before launch.
    pub staged_inputs: Vec<PathBuf>,
    pub container: Option<String>,
    pub cpus: Option<u32>,
    pub memory_mb: Option<u64>,
    pub attempt: u32,
}

impl TaskSpec {
    pub fn env_lookup(&self, name: &str) -> Option<&str> {
        self.env
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{CommandTemplate, InputPort, OutputPort};

    fn def() -> ProcessDefinition {
        ProcessDefinition::new("double", CommandTemplate::template("echo {x}"))
            .with_input(InputPort::new("x", PortKind::Value))
            .with_output(OutputPort::new("y", PortKind::Value))
    }

    fn task() -> Task {
        Task::new(
            1,
            0,
            &def(),
            0,
            vec![("x".to_string(), Value::Int(3))],
            Path::new("/tmp/work"),
        )
    }

    #[test]
    fn new_task_renders_command_and_key() {
        let t = task();
        assert_eq!(t.command, "echo 3");
        assert_eq!(t.state, TaskState::Pending);
        assert!(t.work_dir.starts_with("/tmp/work"));
        assert!(t.work_dir.ends_with(t.cache_key.relative_path()));
    }

    #[test]
    fn identical_inputs_share_a_work_dir() {
        let a = task();
        let b = task();
        assert_eq!(a.work_dir, b.work_dir);

        let c = Task::new(
            2,
            0,
            &def(),
            1,
            vec![("x".to_string(), Value::Int(4))],
            Path::new("/tmp/work"),
        );
        assert_ne!(a.work_dir, c.work_dir);
    }

    #[test]
    fn legal_lifecycle_walk() {
        let mut t = task();
        for state in [
            TaskState::Submitted,
            TaskState::Running,
            TaskState::Failed,
            TaskState::Retrying,
            TaskState::Submitted,
            TaskState::Running,
            TaskState::Completed,
        ] {
            t.advance(state);
            assert_eq!(t.state, state);
        }
        assert!(t.state.is_terminal());
    }

    #[test]
    fn illegal_transition_is_refused() {
        let mut t = task();
        t.advance(TaskState::Running); // Pending -> Running is not legal
        assert_eq!(t.state, TaskState::Pending);
    }

    #[test]
    fn cache_hit_shortcut_is_legal() {
        let mut t = task();
        t.advance(TaskState::Completed);
        assert_eq!(t.state, TaskState::Completed);
    }

    #[test]
    fn spec_carries_inputs_as_env() {
        let t = task();
        let spec = t.to_spec(&def());
        assert_eq!(spec.env_lookup("x"), Some("3"));
        assert_eq!(spec.command, "echo 3");
        assert_eq!(spec.attempt, 1);
    }
}
