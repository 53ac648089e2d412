// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Executor backend implementations.
//!
//! Each backend implements the [`crate::traits::Executor`] contract and owns
//! all of its backend-specific job-description construction; the scheduling
//! core only sees handles and poll statuses.
//!
//! # Available Backends
//!
//! ## Local Backend
//! Fork/exec on the coordinating host via `tokio::process`:
//! - rendered command written to `.command.sh` in the task work dir
//! - streams captured to `.command.out` / `.command.err`
//! - exit status recorded in `.exitcode`
//! - **Use Case**: single-machine runs, development, CI
//!
//! ## Stub Backend (Test-Only)
//! Programmable in-memory executors for scheduler tests (only available in
//! test builds):
//! - **StubExecutor**: handler-driven results, submission/kill counters
//! - **FailingExecutor**: every task exits non-zero
//! - **FlakyExecutor**: fails the first N attempts, then succeeds
//! - **Note**: NOT available in production builds
//!
//! Grid and cloud backends live outside this crate; they implement the same
//! trait against their wire clients.

pub mod local;
#[cfg(test)]
pub mod stub;

pub use local::LocalExecutor;
