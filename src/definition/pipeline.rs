// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use crate::channel::Value;

use super::process::ProcessDefinition;

/// Which channel flavor a declaration produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelFlavor {
    Queue,
    Value,
}

/// A channel declaration in a pipeline definition.
#[derive(Debug, Clone)]
pub struct ChannelSpec {
    pub name: String,
    pub flavor: ChannelFlavor,
}

impl ChannelSpec {
    pub fn queue(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            flavor: ChannelFlavor::Queue,
        }
    }

    pub fn value(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            flavor: ChannelFlavor::Value,
        }
    }
}

/// A structural operator wiring instruction.
///
/// Closure-bearing operators (`map`, `filter`, `flat_map`) cannot travel as
/// data; the front end registers those through the graph builder API
/// directly. The data form covers the structural combinators.
#[derive(Debug, Clone)]
pub enum OperatorSpec {
    /// Seed literal values onto a channel, then close it.
    Source { target: String, values: Vec<Value> },
    /// Zip N queue channels into `List` tuples.
    Combine { inputs: Vec<String>, output: String },
    /// Expand `List` values into individual elements.
    Flatten { input: String, output: String },
    /// Group consecutive values into `List`s of the given size.
    Buffer {
        input: String,
        output: String,
        size: usize,
    },
    /// Copy every value onto each listed output channel.
    Broadcast { input: String, outputs: Vec<String> },
}

/// A process registration: the definition plus its port-to-channel bindings.
#[derive(Debug, Clone)]
pub struct ProcessSpec {
    pub definition: ProcessDefinition,
    /// (port name, channel name) for every declared input port.
    pub inputs: Vec<(String, String)>,
    /// (port name, channel name) for every declared output port.
    pub outputs: Vec<(String, String)>,
}

/// The resolved pipeline object handed over by the excluded front end.
///
/// Treated as immutable input to operator-graph construction; name
/// uniqueness and the like were validated upstream, but the graph builder
/// still re-checks everything it relies on.
#[derive(Debug, Clone, Default)]
pub struct PipelineDefinition {
    pub channels: Vec<ChannelSpec>,
    pub operators: Vec<OperatorSpec>,
    pub processes: Vec<ProcessSpec>,
}

impl PipelineDefinition {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_channel(mut self, spec: ChannelSpec) -> Self {
        self.channels.push(spec);
        self
    }

    pub fn with_operator(mut self, spec: OperatorSpec) -> Self {
        self.operators.push(spec);
        self
    }

    pub fn with_process(mut self, spec: ProcessSpec) -> Self {
        self.processes.push(spec);
        self
    }
}
