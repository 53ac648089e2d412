// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! The scheduler/dispatcher and the run session composing the engine.
//!
//! The dispatcher is a single-owner event loop: resolver candidates and
//! monitor completions arrive as messages, every task state transition is
//! handled atomically inside the loop, and no other component touches the
//! task table. Admission is per-process FIFO with round-robin dispatch
//! across processes, bounded by one semaphore per executor kind.

mod dispatch;
mod session;

#[cfg(test)]
mod integration_tests;

pub use session::{RunReport, RunStatus, Session, TaskFailure};
