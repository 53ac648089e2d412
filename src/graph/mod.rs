// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! The operator graph: channels wired through operators and process nodes.
//!
//! The graph is built once from a pipeline definition, validated (unknown
//! references, duplicate producers, cycles) before anything runs, and then
//! frozen. Spawning the graph starts one long-lived reactive task per
//! operator - the single place concurrency enters the otherwise declarative
//! wiring.

mod builder;
mod operator;
mod validation;

pub use builder::{GraphBuilder, OperatorGraph, ProcessNode};
pub use operator::{FilterFn, FlatMapFn, MapFn, OperatorKind};
