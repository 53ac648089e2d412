// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::channel::{Channel, QueueChannel, Value, ValueChannel};
use crate::definition::{
    ChannelFlavor, OperatorSpec, PipelineDefinition, ProcessDefinition, ProcessSpec,
};
use crate::errors::GraphError;

use super::operator::{run_operator, Operator};
use super::validation::{validate_wiring, NodeWiring};
use super::{FilterFn, FlatMapFn, MapFn, OperatorKind};

/// A process registered into the graph: its definition-table index plus the
/// port-to-channel bindings.
#[derive(Debug, Clone)]
pub struct ProcessNode {
    pub def_index: usize,
    pub name: String,
    /// (port name, channel name), in declared input-port order.
    pub inputs: Vec<(String, String)>,
    /// (port name, channel name), in declared output-port order.
    pub outputs: Vec<(String, String)>,
}

/// Accumulates channels, operators, and process registrations, then
/// validates the whole wiring in one pass.
///
/// Registration never fails eagerly; `build()` reports every problem at once
/// so a broken pipeline definition surfaces completely on the first attempt.
pub struct GraphBuilder {
    channels: HashMap<String, Channel>,
    operators: Vec<Operator>,
    processes: Vec<ProcessNode>,
    definitions: Vec<ProcessDefinition>,
    binds: Vec<(String, Value)>,
    errors: Vec<GraphError>,
    next_operator: usize,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self {
            channels: HashMap::new(),
            operators: Vec::new(),
            processes: Vec::new(),
            definitions: Vec::new(),
            binds: Vec::new(),
            errors: Vec::new(),
            next_operator: 0,
        }
    }

    /// Build a graph skeleton from a resolved pipeline definition. Closure
    /// operators are added afterwards through the builder API.
    pub fn from_definition(def: &PipelineDefinition) -> Self {
        let mut builder = Self::new();
        for spec in &def.channels {
            match spec.flavor {
                ChannelFlavor::Queue => builder.queue_channel(&spec.name),
                ChannelFlavor::Value => builder.value_channel(&spec.name),
            };
        }
        for op in &def.operators {
            builder.register_operator_spec(op);
        }
        for process in &def.processes {
            builder.register_process_spec(process.clone());
        }
        builder
    }

    pub fn queue_channel(&mut self, name: &str) -> &mut Self {
        self.declare(name.to_string(), Channel::Queue(QueueChannel::new(name)))
    }

    pub fn value_channel(&mut self, name: &str) -> &mut Self {
        self.declare(name.to_string(), Channel::Value(ValueChannel::new(name)))
    }

    fn declare(&mut self, name: String, channel: Channel) -> &mut Self {
        if self.channels.contains_key(&name) {
            self.errors.push(GraphError::DuplicateChannel { channel: name });
        } else {
            self.channels.insert(name, channel);
        }
        self
    }

    /// Bind the single value of a value channel at graph-construction time.
    pub fn bind_value(&mut self, channel: &str, value: Value) -> &mut Self {
        self.binds.push((channel.to_string(), value));
        self
    }

    /// Seed a queue channel with literal values; the channel closes after
    /// the last one.
    pub fn source(&mut self, channel: &str, values: Vec<Value>) -> &mut Self {
        self.register_operator(OperatorKind::Source { values }, &[], &[channel])
    }

    pub fn map(&mut self, input: &str, output: &str, transform: MapFn) -> &mut Self {
        self.register_operator(OperatorKind::Map { transform }, &[input], &[output])
    }

    pub fn filter(&mut self, input: &str, output: &str, predicate: FilterFn) -> &mut Self {
        self.register_operator(OperatorKind::Filter { predicate }, &[input], &[output])
    }

    pub fn flat_map(&mut self, input: &str, output: &str, transform: FlatMapFn) -> &mut Self {
        self.register_operator(OperatorKind::FlatMap { transform }, &[input], &[output])
    }

    /// Register an operator wiring the given input channels to the given
    /// output channels.
    pub fn register_operator(
        &mut self,
        kind: OperatorKind,
        inputs: &[&str],
        outputs: &[&str],
    ) -> &mut Self {
        let id = format!("{}#{}", kind.name(), self.next_operator);
        self.next_operator += 1;
        self.operators.push(Operator {
            id,
            kind,
            inputs: inputs.iter().map(|s| s.to_string()).collect(),
            outputs: outputs.iter().map(|s| s.to_string()).collect(),
        });
        self
    }

    fn register_operator_spec(&mut self, spec: &OperatorSpec) {
        match spec {
            OperatorSpec::Source { target, values } => {
                self.source(target, values.clone());
            }
            OperatorSpec::Combine { inputs, output } => {
                let inputs: Vec<&str> = inputs.iter().map(String::as_str).collect();
                self.register_operator(OperatorKind::Combine, &inputs, &[output]);
            }
            OperatorSpec::Flatten { input, output } => {
                self.register_operator(OperatorKind::Flatten, &[input], &[output]);
            }
            OperatorSpec::Buffer {
                input,
                output,
                size,
            } => {
                self.register_operator(OperatorKind::Buffer { size: *size }, &[input], &[output]);
            }
            OperatorSpec::Broadcast { input, outputs } => {
                let outputs: Vec<&str> = outputs.iter().map(String::as_str).collect();
                self.register_operator(OperatorKind::Broadcast, &[input], &outputs);
            }
        }
    }

    /// Register a process with explicit (port, channel) bindings.
    pub fn register_process(
        &mut self,
        definition: ProcessDefinition,
        inputs: Vec<(&str, &str)>,
        outputs: Vec<(&str, &str)>,
    ) -> &mut Self {
        self.register_process_spec(ProcessSpec {
            definition,
            inputs: inputs
                .into_iter()
                .map(|(p, c)| (p.to_string(), c.to_string()))
                .collect(),
            outputs: outputs
                .into_iter()
                .map(|(p, c)| (p.to_string(), c.to_string()))
                .collect(),
        })
    }

    pub fn register_process_spec(&mut self, spec: ProcessSpec) -> &mut Self {
        let ProcessSpec {
            definition,
            inputs,
            outputs,
        } = spec;

        for (port, _) in &inputs {
            if definition.input(port).is_none() {
                self.errors.push(GraphError::UnknownPort {
                    process: definition.name.clone(),
                    port: port.clone(),
                });
            }
        }
        for (port, _) in &outputs {
            if definition.output(port).is_none() {
                self.errors.push(GraphError::UnknownPort {
                    process: definition.name.clone(),
                    port: port.clone(),
                });
            }
        }
        for port in &definition.inputs {
            if !inputs.iter().any(|(p, _)| p == &port.name) {
                self.errors.push(GraphError::UnboundPort {
                    process: definition.name.clone(),
                    port: port.name.clone(),
                });
            }
        }
        for port in &definition.outputs {
            if !outputs.iter().any(|(p, _)| p == &port.name) {
                self.errors.push(GraphError::UnboundPort {
                    process: definition.name.clone(),
                    port: port.name.clone(),
                });
            }
        }

        // Bindings are re-ordered to declared port order so the resolver and
        // the scheduler can line tuples up by position.
        let ordered_inputs = definition
            .inputs
            .iter()
            .filter_map(|p| {
                inputs
                    .iter()
                    .find(|(port, _)| port == &p.name)
                    .map(|(port, channel)| (port.clone(), channel.clone()))
            })
            .collect();
        let ordered_outputs = definition
            .outputs
            .iter()
            .filter_map(|p| {
                outputs
                    .iter()
                    .find(|(port, _)| port == &p.name)
                    .map(|(port, channel)| (port.clone(), channel.clone()))
            })
            .collect();

        let def_index = self.definitions.len();
        let name = definition.name.clone();
        self.definitions.push(definition);
        self.processes.push(ProcessNode {
            def_index,
            name,
            inputs: ordered_inputs,
            outputs: ordered_outputs,
        });
        self
    }

    /// Validate the accumulated wiring and freeze the graph.
    pub fn build(mut self) -> Result<OperatorGraph, Vec<GraphError>> {
        let channel_names: HashSet<String> = self.channels.keys().cloned().collect();

        for op in &self.operators {
            let arity_problem = match op.kind {
                OperatorKind::Source { .. } => {
                    if !op.inputs.is_empty() {
                        Some("sources take no input channels")
                    } else if op.outputs.is_empty() {
                        Some("sources need at least one output channel")
                    } else {
                        None
                    }
                }
                OperatorKind::Combine => {
                    if op.inputs.is_empty() || op.outputs.is_empty() {
                        Some("combine needs input channels and an output channel")
                    } else {
                        None
                    }
                }
                _ => {
                    if op.inputs.len() != 1 || op.outputs.is_empty() {
                        Some("expected exactly one input and at least one output")
                    } else {
                        None
                    }
                }
            };
            if let Some(reason) = arity_problem {
                self.errors.push(GraphError::MalformedWiring {
                    node: op.id.clone(),
                    reason: reason.to_string(),
                });
            }
        }
        for op in &self.operators {
            for channel in op.inputs.iter().chain(op.outputs.iter()) {
                if let Some(Channel::Value(_)) = self.channels.get(channel) {
                    self.errors.push(GraphError::ValueChannelOperator {
                        node: op.id.clone(),
                        channel: channel.clone(),
                    });
                }
            }
        }
        for (channel, _) in &self.binds {
            match self.channels.get(channel) {
                Some(Channel::Value(_)) => {}
                Some(_) => self.errors.push(GraphError::InvalidBind {
                    channel: channel.clone(),
                }),
                None => self.errors.push(GraphError::UnknownChannel {
                    node: format!("bind:{}", channel),
                    channel: channel.clone(),
                }),
            }
        }

        let bind_ids: Vec<String> = self
            .binds
            .iter()
            .map(|(channel, _)| format!("bind:{}", channel))
            .collect();
        let mut nodes: Vec<NodeWiring<'_>> = Vec::new();
        for op in &self.operators {
            nodes.push(NodeWiring {
                id: &op.id,
                consumes: op.inputs.iter().map(String::as_str).collect(),
                produces: op.outputs.iter().map(String::as_str).collect(),
            });
        }
        for process in &self.processes {
            nodes.push(NodeWiring {
                id: &process.name,
                consumes: process.inputs.iter().map(|(_, c)| c.as_str()).collect(),
                produces: process.outputs.iter().map(|(_, c)| c.as_str()).collect(),
            });
        }
        for (i, (channel, _)) in self.binds.iter().enumerate() {
            nodes.push(NodeWiring {
                id: &bind_ids[i],
                consumes: vec![],
                produces: vec![channel.as_str()],
            });
        }

        let mut errors = self.errors;
        if let Err(wiring_errors) = validate_wiring(&channel_names, &nodes) {
            errors.extend(wiring_errors);
        }
        if !errors.is_empty() {
            return Err(errors);
        }

        // Apply the build-time value binds; a double bind on the same
        // channel was already rejected as a duplicate producer.
        for (channel, value) in self.binds {
            if let Some(Channel::Value(ch)) = self.channels.get(&channel) {
                if let Err(e) = ch.bind(value) {
                    return Err(vec![GraphError::AlreadyBound { channel: e.channel }]);
                }
            }
        }

        Ok(OperatorGraph {
            channels: self.channels,
            operators: self.operators,
            processes: self.processes,
            definitions: Arc::new(self.definitions),
        })
    }
}

impl Default for GraphBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// The frozen, validated operator graph.
#[derive(Debug)]
pub struct OperatorGraph {
    channels: HashMap<String, Channel>,
    operators: Vec<Operator>,
    pub(crate) processes: Vec<ProcessNode>,
    pub(crate) definitions: Arc<Vec<ProcessDefinition>>,
}

impl OperatorGraph {
    pub fn channel(&self, name: &str) -> Option<&Channel> {
        self.channels.get(name)
    }

    pub(crate) fn channels(&self) -> &HashMap<String, Channel> {
        &self.channels
    }

    pub fn process_count(&self) -> usize {
        self.processes.len()
    }

    pub fn operator_count(&self) -> usize {
        self.operators.len()
    }

    pub fn definitions(&self) -> &Arc<Vec<ProcessDefinition>> {
        &self.definitions
    }

    /// Start one reactive forwarding task per operator.
    pub(crate) fn spawn_operators(&self, cancel: &CancellationToken) -> Vec<JoinHandle<()>> {
        self.operators
            .iter()
            .map(|op| {
                let inputs = op
                    .inputs
                    .iter()
                    .filter_map(|name| match self.channels.get(name) {
                        Some(Channel::Queue(ch)) => Some(ch.subscribe()),
                        _ => None,
                    })
                    .collect();
                let outputs = op
                    .outputs
                    .iter()
                    .filter_map(|name| match self.channels.get(name) {
                        Some(Channel::Queue(ch)) => Some(ch.clone()),
                        _ => None,
                    })
                    .collect();
                tokio::spawn(run_operator(
                    op.id.clone(),
                    op.kind.clone(),
                    inputs,
                    outputs,
                    cancel.clone(),
                ))
            })
            .collect()
    }
}
