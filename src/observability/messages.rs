// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Message types for run lifecycle and scheduling events.

use std::fmt::{Display, Formatter};
use tracing::Span;

/// Structured counterpart to `Display`: emits the message through `tracing`
/// with its fields attached, or opens a span carrying them.
pub trait StructuredLog {
    fn log(&self);
    fn span(&self, name: &str) -> Span;
}

/// A run started.
///
/// # Log Level
/// `info!` - Important operational event
pub struct RunStarted {
    pub processes: usize,
    pub operators: usize,
}

impl Display for RunStarted {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Starting run: {} processes, {} operators",
            self.processes, self.operators
        )
    }
}

impl StructuredLog for RunStarted {
    fn log(&self) {
        tracing::info!(
            processes = self.processes,
            operators = self.operators,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::info_span!(
            "run",
            span_name = name,
            processes = self.processes,
            operators = self.operators,
        )
    }
}

/// A run reached its terminal status.
///
/// # Log Level
/// `info!` - Important operational event
pub struct RunCompleted<'a> {
    pub status: &'a str,
    pub tasks: usize,
    pub failures: usize,
}

impl Display for RunCompleted<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Run completed with status {}: {} tasks, {} failures",
            self.status, self.tasks, self.failures
        )
    }
}

impl StructuredLog for RunCompleted<'_> {
    fn log(&self) {
        tracing::info!(
            status = self.status,
            tasks = self.tasks,
            failures = self.failures,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::info_span!(
            "run_completed",
            span_name = name,
            status = self.status,
            tasks = self.tasks,
            failures = self.failures,
        )
    }
}

/// A prior result satisfied a task without executor involvement.
///
/// # Log Level
/// `info!` - Important operational event
pub struct CacheHit<'a> {
    pub process: &'a str,
    pub task_id: u64,
    pub key: &'a str,
}

impl Display for CacheHit<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Cache hit for task {} of '{}' ({})",
            self.task_id, self.process, self.key
        )
    }
}

impl StructuredLog for CacheHit<'_> {
    fn log(&self) {
        tracing::info!(
            process = self.process,
            task_id = self.task_id,
            key = self.key,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::info_span!(
            "cache_hit",
            span_name = name,
            process = self.process,
            task_id = self.task_id,
        )
    }
}

/// The error strategy resolved a task failure.
///
/// # Log Level
/// `warn!` - Failure handled by policy
pub struct StrategyApplied<'a> {
    pub process: &'a str,
    pub task_id: u64,
    pub strategy: &'a str,
    pub attempt: u32,
}

impl Display for StrategyApplied<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Task {} of '{}' failed on attempt {}; applying '{}'",
            self.task_id, self.process, self.attempt, self.strategy
        )
    }
}

impl StructuredLog for StrategyApplied<'_> {
    fn log(&self) {
        tracing::warn!(
            process = self.process,
            task_id = self.task_id,
            strategy = self.strategy,
            attempt = self.attempt,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::warn_span!(
            "strategy_applied",
            span_name = name,
            process = self.process,
            task_id = self.task_id,
            strategy = self.strategy,
        )
    }
}
