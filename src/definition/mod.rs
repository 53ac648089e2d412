// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Process and pipeline definitions.
//!
//! These are the immutable inputs handed over by the (external) front end:
//! a [`PipelineDefinition`] describing processes and operator wiring, built
//! and validated elsewhere. The core never mutates a definition after graph
//! construction; tasks refer back to their process through an index into the
//! definition table rather than an owning reference.

mod pipeline;
mod ports;
mod process;

pub use pipeline::{ChannelFlavor, ChannelSpec, OperatorSpec, PipelineDefinition, ProcessSpec};
pub use ports::{extract_output, input_env, InputPort, OutputPort, PortKind};
pub use process::{CommandTemplate, Directives, ProcessDefinition};
