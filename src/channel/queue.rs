// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

use super::data::Value;

/// An ordered, multi-consumer dataflow queue.
///
/// Values are appended by a single producer (enforced by the graph builder)
/// and retained in a log; every subscriber walks the log through its own
/// cursor, so subscription order does not affect what a consumer observes as
/// long as the subscription predates closure. `close()` marks the end of the
/// stream and is idempotent.
#[derive(Debug, Clone)]
pub struct QueueChannel {
    name: Arc<str>,
    state: Arc<Mutex<QueueState>>,
    notify: Arc<Notify>,
}

#[derive(Debug, Default)]
struct QueueState {
    values: Vec<Value>,
    closed: bool,
}

impl QueueChannel {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into().into(),
            state: Arc::new(Mutex::new(QueueState::default())),
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Append a value and wake every waiting subscriber.
    ///
    /// Sends after `close()` indicate a mis-wired producer; the value is
    /// dropped and a warning logged rather than corrupting the closed log.
    pub fn send(&self, value: Value) {
        let mut state = self.state.lock().expect("queue channel lock poisoned");
        if state.closed {
            tracing::warn!(channel = %self.name, "send on closed queue channel dropped");
            return;
        }
        state.values.push(value);
        drop(state);
        self.notify.notify_waiters();
    }

    /// Mark the stream complete. Idempotent.
    pub fn close(&self) {
        let mut state = self.state.lock().expect("queue channel lock poisoned");
        if state.closed {
            return;
        }
        state.closed = true;
        drop(state);
        self.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().expect("queue channel lock poisoned").closed
    }

    pub fn len(&self) -> usize {
        self.state.lock().expect("queue channel lock poisoned").values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn subscribe(&self) -> QueueSubscription {
        QueueSubscription {
            channel: self.name.clone(),
            state: self.state.clone(),
            notify: self.notify.clone(),
            cursor: 0,
        }
    }
}

/// An independent read cursor over a [`QueueChannel`].
#[derive(Debug)]
pub struct QueueSubscription {
    channel: Arc<str>,
    state: Arc<Mutex<QueueState>>,
    notify: Arc<Notify>,
    cursor: usize,
}

impl QueueSubscription {
    /// The next value in log order, or `None` once the channel is closed and
    /// this cursor has drained it.
    pub async fn next(&mut self) -> Option<Value> {
        loop {
            // Register for wakeup before inspecting state so a send landing
            // between the check and the await cannot be missed.
            let notified = self.notify.notified();
            {
                let state = self.state.lock().expect("queue channel lock poisoned");
                if self.cursor < state.values.len() {
                    let value = state.values[self.cursor].clone();
                    self.cursor += 1;
                    return Some(value);
                }
                if state.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Read until closure, collecting everything from the current cursor on.
    pub async fn drain(&mut self) -> Vec<Value> {
        let mut collected = Vec::new();
        while let Some(value) = self.next().await {
            collected.push(value);
        }
        collected
    }

    pub fn channel_name(&self) -> &str {
        &self.channel
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_observe_all_values_in_order() {
        let ch = QueueChannel::new("numbers");
        let mut early = ch.subscribe();

        for i in 1..=3 {
            ch.send(Value::Int(i));
        }
        let mut late = ch.subscribe();
        ch.close();

        assert_eq!(early.drain().await, vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
        assert_eq!(late.drain().await, vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
    }

    #[tokio::test]
    async fn next_suspends_until_send() {
        let ch = QueueChannel::new("slow");
        let mut sub = ch.subscribe();

        let producer = ch.clone();
        let writer = tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            producer.send(Value::Int(7));
            producer.close();
        });

        assert_eq!(sub.next().await, Some(Value::Int(7)));
        assert_eq!(sub.next().await, None);
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn close_is_idempotent_and_ends_iteration() {
        let ch = QueueChannel::new("done");
        ch.close();
        ch.close();
        assert!(ch.is_closed());

        let mut sub = ch.subscribe();
        assert_eq!(sub.next().await, None);
    }

    #[tokio::test]
    async fn send_after_close_is_dropped() {
        let ch = QueueChannel::new("stale");
        ch.send(Value::Int(1));
        ch.close();
        ch.send(Value::Int(2));

        let mut sub = ch.subscribe();
        assert_eq!(sub.drain().await, vec![Value::Int(1)]);
    }
}
