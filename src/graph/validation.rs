// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Wiring validation for graph integrity.
//!
//! Checks run in a fixed order so later stages can rely on earlier ones:
//!
//! 1. node-id and channel-name uniqueness
//! 2. reference validation (every consumed/produced channel exists)
//! 3. single-producer enforcement per channel
//! 4. cycle detection (three-colors DFS with cycle-path extraction)
//!
//! Cycle detection is skipped when reference errors exist, since it needs a
//! structurally valid graph. Errors accumulate so a user sees everything
//! wrong with a wiring at once.

use std::collections::{HashMap, HashSet};

use crate::errors::GraphError;

/// One node's wiring, as seen by validation. Operators and process nodes
/// both reduce to this shape.
pub(crate) struct NodeWiring<'a> {
    pub id: &'a str,
    pub consumes: Vec<&'a str>,
    pub produces: Vec<&'a str>,
}

pub(crate) fn validate_wiring(
    channels: &HashSet<String>,
    nodes: &[NodeWiring<'_>],
) -> Result<(), Vec<GraphError>> {
    let mut errors = Vec::new();

    let mut seen_nodes = HashSet::new();
    for node in nodes {
        if !seen_nodes.insert(node.id) {
            errors.push(GraphError::DuplicateNode {
                node: node.id.to_string(),
            });
        }
    }

    let mut reference_errors = false;
    for node in nodes {
        for channel in node.consumes.iter().chain(node.produces.iter()) {
            if !channels.contains(*channel) {
                reference_errors = true;
                errors.push(GraphError::UnknownChannel {
                    node: node.id.to_string(),
                    channel: channel.to_string(),
                });
            }
        }
    }

    let mut producers: HashMap<&str, &str> = HashMap::new();
    for node in nodes {
        for channel in &node.produces {
            if let Some(first) = producers.insert(*channel, node.id) {
                if first != node.id {
                    errors.push(GraphError::DuplicateProducer {
                        channel: channel.to_string(),
                        first: first.to_string(),
                        second: node.id.to_string(),
                    });
                }
            }
        }
    }

    if !reference_errors {
        if let Some(cycle) = find_cycle(nodes, &producers) {
            errors.push(GraphError::CyclicWiring { cycle });
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Detect a cycle over the node graph induced by the channels: an edge runs
/// from a channel's producer to each of its consumers.
fn find_cycle(nodes: &[NodeWiring<'_>], producers: &HashMap<&str, &str>) -> Option<Vec<String>> {
    let mut edges: HashMap<&str, Vec<&str>> = HashMap::new();
    for node in nodes {
        edges.entry(node.id).or_default();
        for channel in &node.consumes {
            if let Some(producer) = producers.get(channel) {
                edges.entry(*producer).or_default().push(node.id);
            }
        }
    }

    let mut visited = HashSet::new();
    let mut rec_stack = HashSet::new();
    let mut path = Vec::new();

    for node in edges.keys() {
        if !visited.contains(*node) {
            if let Some(cycle) = dfs(node, &edges, &mut visited, &mut rec_stack, &mut path) {
                return Some(cycle);
            }
        }
    }
    None
}

/// Three-colors DFS: white = unvisited, gray = on the recursion stack,
/// black = fully explored. Meeting a gray node means a cycle, and the
/// current path yields the exact cycle for the error message.
fn dfs(
    node: &str,
    edges: &HashMap<&str, Vec<&str>>,
    visited: &mut HashSet<String>,
    rec_stack: &mut HashSet<String>,
    path: &mut Vec<String>,
) -> Option<Vec<String>> {
    visited.insert(node.to_string());
    rec_stack.insert(node.to_string());
    path.push(node.to_string());

    if let Some(neighbors) = edges.get(node) {
        for neighbor in neighbors {
            if !visited.contains(*neighbor) {
                if let Some(cycle) = dfs(neighbor, edges, visited, rec_stack, path) {
                    return Some(cycle);
                }
            } else if rec_stack.contains(*neighbor) {
                let start = path
                    .iter()
                    .position(|n| n == neighbor)
                    .unwrap_or(0);
                let mut cycle = path[start..].to_vec();
                cycle.push((*neighbor).to_string());
                return Some(cycle);
            }
        }
    }

    rec_stack.remove(node);
    path.pop();
    None
}
