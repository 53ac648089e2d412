// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Observability: the task lifecycle event stream and structured logging.
//!
//! Message types follow a struct-based pattern with a `Display`
//! implementation and the [`messages::StructuredLog`] trait to:
//!
//! * Eliminate magic strings scattered throughout the codebase
//! * Keep log fields consistent across call sites
//! * Provide consistent, human-readable output
//!
//! The [`events::EventLog`] is the append-only lifecycle stream exposed to
//! the (external) CLI/reporting layer: every task state transition lands
//! there with its timestamp, and a subscriber can tail it live while the
//! full log stays available for post-hoc report generation.

pub mod events;
pub mod messages;

pub use events::{EventLog, TaskEvent};

/// Install a default `tracing` subscriber honoring `RUST_LOG`.
///
/// Intended for binaries and tests; embedding applications usually install
/// their own subscriber instead. Calling it twice is harmless.
pub fn init() {
    use tracing_subscriber::EnvFilter;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}
