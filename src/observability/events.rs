// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::task::TaskState;

/// One task lifecycle transition, as exposed to the reporting layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEvent {
    pub task_id: u64,
    pub process: String,
    pub state: TaskState,
    pub attempt: u32,
    pub exit_status: Option<i32>,
    pub timestamp: DateTime<Utc>,
}

impl TaskEvent {
    pub fn now(
        task_id: u64,
        process: impl Into<String>,
        state: TaskState,
        attempt: u32,
        exit_status: Option<i32>,
    ) -> Self {
        Self {
            task_id,
            process: process.into(),
            state,
            attempt,
            exit_status,
            timestamp: Utc::now(),
        }
    }
}

/// Append-only log of task lifecycle events.
///
/// Cheap to clone; every handle appends to the same log. Events are retained
/// for post-hoc reporting (`snapshot`) and optionally forwarded live to one
/// subscriber (`subscribe`).
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    inner: Arc<Mutex<EventLogInner>>,
}

#[derive(Debug, Default)]
struct EventLogInner {
    events: Vec<TaskEvent>,
    subscriber: Option<UnboundedSender<TaskEvent>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event, forwarding it to the live subscriber if one is
    /// attached.
    pub fn record(&self, event: TaskEvent) {
        tracing::debug!(
            task_id = event.task_id,
            process = %event.process,
            state = %event.state,
            attempt = event.attempt,
            exit_status = ?event.exit_status,
            "task event"
        );
        let mut inner = self.inner.lock().expect("event log lock poisoned");
        if let Some(tx) = &inner.subscriber {
            // A dropped receiver just means nobody is tailing anymore.
            let _ = tx.send(event.clone());
        }
        inner.events.push(event);
    }

    /// Attach a live subscriber. Replaces any previous one.
    pub fn subscribe(&self) -> UnboundedReceiver<TaskEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.lock().expect("event log lock poisoned").subscriber = Some(tx);
        rx
    }

    /// The full event history so far, in append order.
    pub fn snapshot(&self) -> Vec<TaskEvent> {
        self.inner.lock().expect("event log lock poisoned").events.clone()
    }

    /// Count events for a given process/state pair; handy in tests and
    /// report generation.
    pub fn count(&self, process: &str, state: TaskState) -> usize {
        self.inner
            .lock()
            .expect("event log lock poisoned")
            .events
            .iter()
            .filter(|e| e.process == process && e.state == state)
            .count()
    }
}
