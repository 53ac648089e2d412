// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Dataflow channels connecting producers to consumers.
//!
//! Two flavors exist:
//!
//! * [`QueueChannel`] - an ordered log of values, consumed through
//!   per-subscriber cursors so every subscriber observes every value
//!   (broadcast-on-read). Closed explicitly by its producer.
//! * [`ValueChannel`] - a set-at-most-once cell, replayed to any number of
//!   subscribers. Never closes once bound; a second bind fails.
//!
//! Channels are the only shared mutable structures in the engine. State is
//! guarded by a `std::sync::Mutex` with short critical sections that are
//! never held across an await point; wakeups go through `tokio::sync::Notify`.

mod data;
mod queue;
mod value;

pub use data::Value;
pub use queue::{QueueChannel, QueueSubscription};
pub use value::{AlreadyBoundError, ValueChannel, ValueSubscription};

/// A channel of either flavor, as wired into the operator graph.
#[derive(Debug, Clone)]
pub enum Channel {
    Queue(QueueChannel),
    Value(ValueChannel),
}

impl Channel {
    pub fn name(&self) -> &str {
        match self {
            Channel::Queue(ch) => ch.name(),
            Channel::Value(ch) => ch.name(),
        }
    }

    pub fn is_queue(&self) -> bool {
        matches!(self, Channel::Queue(_))
    }

    /// Publish a value. Queue channels append; value channels bind once and
    /// report [`AlreadyBoundError`] on a second send.
    pub fn send(&self, value: Value) -> Result<(), AlreadyBoundError> {
        match self {
            Channel::Queue(ch) => {
                ch.send(value);
                Ok(())
            }
            Channel::Value(ch) => ch.bind(value),
        }
    }

    /// Mark a queue channel as complete. No-op for value channels, which
    /// never close.
    pub fn close(&self) {
        if let Channel::Queue(ch) = self {
            ch.close();
        }
    }

    pub fn subscribe(&self) -> Subscription {
        match self {
            Channel::Queue(ch) => Subscription::Queue(ch.subscribe()),
            Channel::Value(ch) => Subscription::Value(ch.subscribe()),
        }
    }
}

/// A consumer-side cursor over a channel.
///
/// `next()` suspends until a value is available. Queue subscriptions yield
/// `None` once the channel is closed and drained; value subscriptions replay
/// the bound value on every call and never yield `None`.
#[derive(Debug)]
pub enum Subscription {
    Queue(QueueSubscription),
    Value(ValueSubscription),
}

impl Subscription {
    pub async fn next(&mut self) -> Option<Value> {
        match self {
            Subscription::Queue(sub) => sub.next().await,
            Subscription::Value(sub) => Some(sub.next().await),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn channel_enum_dispatches_to_flavor() {
        let queue = Channel::Queue(QueueChannel::new("q"));
        let value = Channel::Value(ValueChannel::new("v"));

        assert!(queue.is_queue());
        assert!(!value.is_queue());

        queue.send(Value::Int(1)).unwrap();
        queue.close();
        let mut sub = queue.subscribe();
        assert_eq!(sub.next().await, Some(Value::Int(1)));
        assert_eq!(sub.next().await, None);

        value.send(Value::Str("once".into())).unwrap();
        assert!(value.send(Value::Str("twice".into())).is_err());
        let mut sub = value.subscribe();
        assert_eq!(sub.next().await, Some(Value::Str("once".into())));
        // Replayable: a second read observes the same value.
        assert_eq!(sub.next().await, Some(Value::Str("once".into())));
    }
}
