// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::channel::{QueueChannel, QueueSubscription, Value};

pub type MapFn = Arc<dyn Fn(Value) -> Value + Send + Sync>;
pub type FilterFn = Arc<dyn Fn(&Value) -> bool + Send + Sync>;
pub type FlatMapFn = Arc<dyn Fn(Value) -> Vec<Value> + Send + Sync>;

/// The closed set of operator behaviors.
///
/// Every operator is a pure function from its input channels to its output
/// channels; the reactive task wrapping it owns all the concurrency.
#[derive(Clone)]
pub enum OperatorKind {
    /// Emit literal values, then close the output.
    Source { values: Vec<Value> },
    /// One value in, one transformed value out.
    Map { transform: MapFn },
    /// Pass through values matching the predicate.
    Filter { predicate: FilterFn },
    /// One value in, zero or more values out.
    FlatMap { transform: FlatMapFn },
    /// Zip all inputs positionally into `List` tuples.
    Combine,
    /// Expand `List` values into their elements.
    Flatten,
    /// Group consecutive values into `List`s of `size`.
    Buffer { size: usize },
    /// Copy every value to all outputs.
    Broadcast,
}

impl OperatorKind {
    pub fn name(&self) -> &'static str {
        match self {
            OperatorKind::Source { .. } => "source",
            OperatorKind::Map { .. } => "map",
            OperatorKind::Filter { .. } => "filter",
            OperatorKind::FlatMap { .. } => "flat_map",
            OperatorKind::Combine => "combine",
            OperatorKind::Flatten => "flatten",
            OperatorKind::Buffer { .. } => "buffer",
            OperatorKind::Broadcast => "broadcast",
        }
    }
}

impl fmt::Debug for OperatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OperatorKind::{}", self.name())
    }
}

/// One registered operator: behavior plus channel wiring.
#[derive(Debug, Clone)]
pub(crate) struct Operator {
    pub id: String,
    pub kind: OperatorKind,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
}

/// The reactive forwarding loop for one operator.
///
/// Reads from the input subscriptions, applies the operator function, and
/// forwards onto the outputs until the inputs close or the run is cancelled.
/// Output channels are closed on the way out so closure propagates
/// downstream.
pub(crate) async fn run_operator(
    id: String,
    kind: OperatorKind,
    mut inputs: Vec<QueueSubscription>,
    outputs: Vec<QueueChannel>,
    cancel: CancellationToken,
) {
    tracing::debug!(operator = %id, kind = kind.name(), "operator task started");

    match kind {
        OperatorKind::Source { values } => {
            for value in values {
                if cancel.is_cancelled() {
                    break;
                }
                send_all(&outputs, value);
            }
        }
        OperatorKind::Map { transform } => {
            while let Some(value) = next_or_cancel(&mut inputs[0], &cancel).await {
                send_all(&outputs, transform(value));
            }
        }
        OperatorKind::Filter { predicate } => {
            while let Some(value) = next_or_cancel(&mut inputs[0], &cancel).await {
                if predicate(&value) {
                    send_all(&outputs, value);
                }
            }
        }
        OperatorKind::FlatMap { transform } => {
            while let Some(value) = next_or_cancel(&mut inputs[0], &cancel).await {
                for out in transform(value) {
                    send_all(&outputs, out);
                }
            }
        }
        OperatorKind::Combine => loop {
            let mut tuple = Vec::with_capacity(inputs.len());
            let mut complete = true;
            for sub in inputs.iter_mut() {
                match next_or_cancel(sub, &cancel).await {
                    Some(value) => tuple.push(value),
                    None => {
                        complete = false;
                        break;
                    }
                }
            }
            if !complete {
                break;
            }
            send_all(&outputs, Value::List(tuple));
        },
        OperatorKind::Flatten => {
            while let Some(value) = next_or_cancel(&mut inputs[0], &cancel).await {
                match value {
                    Value::List(items) => {
                        for item in items {
                            send_all(&outputs, item);
                        }
                    }
                    other => send_all(&outputs, other),
                }
            }
        }
        OperatorKind::Buffer { size } => {
            let size = size.max(1);
            let mut pending = Vec::with_capacity(size);
            while let Some(value) = next_or_cancel(&mut inputs[0], &cancel).await {
                pending.push(value);
                if pending.len() == size {
                    send_all(&outputs, Value::List(std::mem::take(&mut pending)));
                }
            }
            if !pending.is_empty() {
                send_all(&outputs, Value::List(pending));
            }
        }
        OperatorKind::Broadcast => {
            while let Some(value) = next_or_cancel(&mut inputs[0], &cancel).await {
                send_all(&outputs, value);
            }
        }
    }

    for output in &outputs {
        output.close();
    }
    tracing::debug!(operator = %id, "operator task finished");
}

async fn next_or_cancel(
    sub: &mut QueueSubscription,
    cancel: &CancellationToken,
) -> Option<Value> {
    tokio::select! {
        _ = cancel.cancelled() => None,
        value = sub.next() => value,
    }
}

fn send_all(outputs: &[QueueChannel], value: Value) {
    match outputs.split_last() {
        Some((last, rest)) => {
            for output in rest {
                output.send(value.clone());
            }
            last.send(value);
        }
        None => {}
    }
}
