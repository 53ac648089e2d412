// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! The dependency resolver: turns channel values into candidate tasks.
//!
//! One resolver task runs per registered process. Value-channel ports supply
//! their single bound value to every pairing; queue-channel ports zip
//! positionally (the Nth value of port A pairs with the Nth of port B);
//! `EachElement` ports are drained up front and cartesian-expanded per zip
//! tuple, with the last `each` port varying fastest. The instant a pairing
//! completes, exactly one candidate is emitted toward the scheduler.
//!
//! When any zip port closes with no completable pairing left, the resolver
//! reports exhaustion; closing the process's output channels then falls to
//! the scheduler once in-flight tasks have published.

use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::channel::{Channel, QueueSubscription, Value};
use crate::definition::PortKind;
use crate::graph::OperatorGraph;

/// What a resolver reports to the scheduler.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolverEvent {
    /// A complete input tuple became available; run one task for it.
    Candidate {
        process: usize,
        /// Emission sequence within the process, in pairing order.
        seq: u64,
        /// Resolved inputs in declared port order.
        inputs: Vec<(String, Value)>,
    },
    /// No further pairings can complete for this process.
    Exhausted { process: usize },
}

/// One input port as the resolver sees it.
pub(crate) struct ResolverPort {
    pub name: String,
    pub kind: PortKind,
    pub channel: Channel,
}

/// Start one resolver task per process in the graph.
pub(crate) fn spawn_resolvers(
    graph: &OperatorGraph,
    tx: UnboundedSender<ResolverEvent>,
    cancel: &CancellationToken,
) -> Vec<JoinHandle<()>> {
    graph
        .processes
        .iter()
        .enumerate()
        .map(|(index, node)| {
            let def = &graph.definitions()[node.def_index];
            let ports = node
                .inputs
                .iter()
                .filter_map(|(port, channel)| {
                    let kind = def.input(port)?.kind;
                    let channel = graph.channel(channel)?.clone();
                    Some(ResolverPort {
                        name: port.clone(),
                        kind,
                        channel,
                    })
                })
                .collect();
            tokio::spawn(resolve_process(
                index,
                def.name.clone(),
                ports,
                tx.clone(),
                cancel.clone(),
            ))
        })
        .collect()
}

enum PortSource {
    /// The single bound value, reused for every pairing.
    Fixed(Value),
    /// Fully drained element list, cartesian-expanded.
    Each(Vec<Value>),
    /// Positionally zipped stream.
    Zip(QueueSubscription),
}

pub(crate) async fn resolve_process(
    process: usize,
    name: String,
    ports: Vec<ResolverPort>,
    tx: UnboundedSender<ResolverEvent>,
    cancel: CancellationToken,
) {
    tracing::debug!(process = %name, ports = ports.len(), "resolver started");

    // Resolve every port to its source. Value channels suspend until bound;
    // each-ports drain to closure before any pairing starts.
    let mut names = Vec::with_capacity(ports.len());
    let mut sources = Vec::with_capacity(ports.len());
    for port in ports {
        names.push(port.name);
        let source = match (&port.channel, port.kind) {
            (Channel::Value(ch), PortKind::EachElement) => {
                let bound = tokio::select! {
                    _ = cancel.cancelled() => return,
                    value = ch.get() => value,
                };
                PortSource::Each(into_elements(bound))
            }
            (Channel::Value(ch), _) => {
                let bound = tokio::select! {
                    _ = cancel.cancelled() => return,
                    value = ch.get() => value,
                };
                PortSource::Fixed(bound)
            }
            (Channel::Queue(ch), PortKind::EachElement) => {
                let mut sub = ch.subscribe();
                let drained = tokio::select! {
                    _ = cancel.cancelled() => return,
                    values = sub.drain() => values,
                };
                PortSource::Each(drained)
            }
            (Channel::Queue(ch), _) => PortSource::Zip(ch.subscribe()),
        };
        sources.push(source);
    }

    let has_zip = sources.iter().any(|s| matches!(s, PortSource::Zip(_)));
    let mut seq = 0u64;

    if !has_zip {
        // A process with no queue-channel ports runs exactly once (times the
        // each-expansion, when declared).
        emit_combos(process, &names, &sources, &[], &mut seq, &tx);
    } else {
        'pairing: loop {
            let mut row: Vec<(usize, Value)> = Vec::new();
            for (index, source) in sources.iter_mut().enumerate() {
                if let PortSource::Zip(sub) = source {
                    let value = tokio::select! {
                        _ = cancel.cancelled() => return,
                        value = sub.next() => value,
                    };
                    match value {
                        Some(value) => row.push((index, value)),
                        // A closed zip port with no value at this index
                        // means no pending pairing can ever complete.
                        None => break 'pairing,
                    }
                }
            }
            emit_combos(process, &names, &sources, &row, &mut seq, &tx);
        }
    }

    tracing::debug!(process = %name, candidates = seq, "resolver exhausted");
    let _ = tx.send(ResolverEvent::Exhausted { process });
}

fn into_elements(value: Value) -> Vec<Value> {
    match value {
        Value::List(items) => items,
        other => vec![other],
    }
}

/// Emit one candidate per combination of each-port elements for the current
/// zip row. The last each-port's odometer digit turns fastest.
fn emit_combos(
    process: usize,
    names: &[String],
    sources: &[PortSource],
    zip_row: &[(usize, Value)],
    seq: &mut u64,
    tx: &UnboundedSender<ResolverEvent>,
) {
    let each_ports: Vec<(usize, &Vec<Value>)> = sources
        .iter()
        .enumerate()
        .filter_map(|(index, source)| match source {
            PortSource::Each(values) => Some((index, values)),
            _ => None,
        })
        .collect();
    if each_ports.iter().any(|(_, values)| values.is_empty()) {
        return;
    }

    let mut odometer = vec![0usize; each_ports.len()];
    loop {
        let mut inputs: Vec<(String, Value)> = Vec::with_capacity(names.len());
        for (index, name) in names.iter().enumerate() {
            let value = match &sources[index] {
                PortSource::Fixed(value) => value.clone(),
                PortSource::Each(values) => {
                    let position = each_ports
                        .iter()
                        .position(|(each_index, _)| *each_index == index)
                        .unwrap_or(0);
                    values[odometer[position]].clone()
                }
                PortSource::Zip(_) => zip_row
                    .iter()
                    .find(|(zip_index, _)| *zip_index == index)
                    .map(|(_, value)| value.clone())
                    .unwrap_or(Value::Null),
            };
            inputs.push((name.clone(), value));
        }

        let _ = tx.send(ResolverEvent::Candidate {
            process,
            seq: *seq,
            inputs,
        });
        *seq += 1;

        // Advance the odometer, last digit fastest.
        let mut digit = each_ports.len();
        loop {
            if digit == 0 {
                return;
            }
            digit -= 1;
            odometer[digit] += 1;
            if odometer[digit] < each_ports[digit].1.len() {
                break;
            }
            odometer[digit] = 0;
        }
    }
}
