// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use std::fmt;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

use super::data::Value;

/// A second `send` was attempted on a value channel.
///
/// This is a programming error in the pipeline definition: value channels
/// hold exactly one value for their whole lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlreadyBoundError {
    pub channel: String,
}

impl fmt::Display for AlreadyBoundError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "value channel '{}' is already bound", self.channel)
    }
}

impl std::error::Error for AlreadyBoundError {}

/// A broadcast cell holding at most one value.
///
/// Unlike a queue channel this never closes: once bound, any number of
/// subscribers - including ones registered long after the bind - observe the
/// same value, replayed on every read.
#[derive(Debug, Clone)]
pub struct ValueChannel {
    name: Arc<str>,
    state: Arc<Mutex<Option<Value>>>,
    notify: Arc<Notify>,
}

impl ValueChannel {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into().into(),
            state: Arc::new(Mutex::new(None)),
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Bind the single value. Fails if a value is already present.
    pub fn bind(&self, value: Value) -> Result<(), AlreadyBoundError> {
        let mut state = self.state.lock().expect("value channel lock poisoned");
        if state.is_some() {
            return Err(AlreadyBoundError {
                channel: self.name.to_string(),
            });
        }
        *state = Some(value);
        drop(state);
        self.notify.notify_waiters();
        Ok(())
    }

    pub fn is_bound(&self) -> bool {
        self.state.lock().expect("value channel lock poisoned").is_some()
    }

    pub fn try_get(&self) -> Option<Value> {
        self.state.lock().expect("value channel lock poisoned").clone()
    }

    /// The bound value, suspending until the bind happens.
    pub async fn get(&self) -> Value {
        loop {
            let notified = self.notify.notified();
            if let Some(value) = self.try_get() {
                return value;
            }
            notified.await;
        }
    }

    pub fn subscribe(&self) -> ValueSubscription {
        ValueSubscription {
            channel: self.clone(),
        }
    }
}

/// A replaying reader over a [`ValueChannel`].
#[derive(Debug)]
pub struct ValueSubscription {
    channel: ValueChannel,
}

impl ValueSubscription {
    /// The bound value; suspends until bound, then replays forever.
    pub async fn next(&mut self) -> Value {
        self.channel.get().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_bind_fails() {
        let ch = ValueChannel::new("params");
        ch.bind(Value::Int(1)).unwrap();

        let err = ch.bind(Value::Int(2)).unwrap_err();
        assert_eq!(err.channel, "params");
        // The original binding is untouched.
        assert_eq!(ch.try_get(), Some(Value::Int(1)));
    }

    #[tokio::test]
    async fn late_subscribers_observe_the_bound_value() {
        let ch = ValueChannel::new("genome");
        ch.bind(Value::Str("ref.fa".into())).unwrap();

        let mut first = ch.subscribe();
        let mut second = ch.subscribe();
        assert_eq!(first.next().await, Value::Str("ref.fa".into()));
        assert_eq!(second.next().await, Value::Str("ref.fa".into()));
        assert_eq!(second.next().await, Value::Str("ref.fa".into()));
    }

    #[tokio::test]
    async fn get_suspends_until_bound() {
        let ch = ValueChannel::new("deferred");
        let reader = ch.clone();
        let handle = tokio::spawn(async move { reader.get().await });

        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        ch.bind(Value::Bool(true)).unwrap();

        assert_eq!(handle.await.unwrap(), Value::Bool(true));
    }
}
