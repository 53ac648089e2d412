// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use super::ports::{InputPort, OutputPort};
use crate::channel::Value;
use crate::errors::ErrorStrategy;

/// Generates the command text for one task from its resolved input tuple.
///
/// A pure function of the tuple: no ambient capture, so rendering the same
/// inputs always yields the same text and the rendered form can participate
/// in the cache key.
#[derive(Clone)]
pub enum CommandTemplate {
    /// `{port}` placeholders substituted with rendered input values.
    Template(String),
    /// An arbitrary generator for command shapes a template cannot express.
    Generator(Arc<dyn Fn(&[(String, Value)]) -> String + Send + Sync>),
}

impl CommandTemplate {
    pub fn template(text: impl Into<String>) -> Self {
        CommandTemplate::Template(text.into())
    }

    pub fn generator<F>(f: F) -> Self
    where
        F: Fn(&[(String, Value)]) -> String + Send + Sync + 'static,
    {
        CommandTemplate::Generator(Arc::new(f))
    }

    /// Render the command for a resolved input tuple.
    pub fn render(&self, inputs: &[(String, Value)]) -> String {
        match self {
            CommandTemplate::Template(text) => {
                let mut rendered = text.clone();
                for (name, value) in inputs {
                    rendered = rendered.replace(&format!("{{{}}}", name), &value.render());
                }
                rendered
            }
            CommandTemplate::Generator(f) => f(inputs),
        }
    }
}

impl fmt::Debug for CommandTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandTemplate::Template(text) => f.debug_tuple("Template").field(text).finish(),
            CommandTemplate::Generator(_) => f.debug_tuple("Generator").field(&"<fn>").finish(),
        }
    }
}

/// Per-process execution directives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Directives {
    #[serde(default)]
    pub cpus: Option<u32>,
    #[serde(default)]
    pub memory_mb: Option<u64>,
    /// Container image the task runs in, when the backend supports one.
    #[serde(default)]
    pub container: Option<String>,
    /// Overrides the run-level error strategy for this process.
    #[serde(default)]
    pub error_strategy: Option<ErrorStrategy>,
    /// Overrides the run-level retry bound for this process.
    #[serde(default)]
    pub max_retries: Option<u32>,
    /// Whether completed tasks of this process are recorded in the cache.
    #[serde(default = "default_cache")]
    pub cache: bool,
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
    /// Exit statuses treated as success.
    #[serde(default = "default_exit_codes")]
    pub acceptable_exit_codes: Vec<i32>,
}

fn default_cache() -> bool {
    true
}

fn default_exit_codes() -> Vec<i32> {
    vec![0]
}

impl Default for Directives {
    fn default() -> Self {
        Self {
            cpus: None,
            memory_mb: None,
            container: None,
            error_strategy: None,
            max_retries: None,
            cache: default_cache(),
            timeout_seconds: None,
            acceptable_exit_codes: default_exit_codes(),
        }
    }
}

impl Directives {
    pub fn accepts_exit(&self, status: i32) -> bool {
        self.acceptable_exit_codes.contains(&status)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_seconds.map(Duration::from_secs)
    }

    /// The directive fields that participate in the cache key: the ones that
    /// can change what a task produces or what counts as success.
    pub fn cache_signature(&self) -> String {
        format!(
            "container={};exit_codes={:?}",
            self.container.as_deref().unwrap_or(""),
            self.acceptable_exit_codes
        )
    }
}

/// An immutable template for one pipeline step.
///
/// Owned by the definition table; never mutated after graph construction.
#[derive(Debug, Clone)]
pub struct ProcessDefinition {
    pub name: String,
    pub inputs: Vec<InputPort>,
    pub outputs: Vec<OutputPort>,
    pub command: CommandTemplate,
    pub directives: Directives,
}

impl ProcessDefinition {
    pub fn new(name: impl Into<String>, command: CommandTemplate) -> Self {
        Self {
            name: name.into(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            command,
            directives: Directives::default(),
        }
    }

    pub fn with_input(mut self, port: InputPort) -> Self {
        self.inputs.push(port);
        self
    }

    pub fn with_output(mut self, port: OutputPort) -> Self {
        self.outputs.push(port);
        self
    }

    pub fn with_directives(mut self, directives: Directives) -> Self {
        self.directives = directives;
        self
    }

    pub fn input(&self, name: &str) -> Option<&InputPort> {
        self.inputs.iter().find(|p| p.name == name)
    }

    pub fn output(&self, name: &str) -> Option<&OutputPort> {
        self.outputs.iter().find(|p| p.name == name)
    }

    /// The identity string hashed into cache keys: the name plus the full
    /// port signature, so renaming or re-typing a port invalidates prior
    /// entries.
    pub fn identity(&self) -> String {
        let ins: Vec<String> = self
            .inputs
            .iter()
            .map(|p| format!("{}:{:?}", p.name, p.kind))
            .collect();
        let outs: Vec<String> = self
            .outputs
            .iter()
            .map(|p| format!("{}:{:?}", p.name, p.kind))
            .collect();
        format!("{}({})->({})", self.name, ins.join(","), outs.join(","))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::PortKind;

    #[test]
    fn template_substitutes_ports() {
        let cmd = CommandTemplate::template("echo {x} > {out}");
        let inputs = vec![
            ("x".to_string(), Value::Int(3)),
            ("out".to_string(), Value::Str("result.txt".into())),
        ];
        assert_eq!(cmd.render(&inputs), "echo 3 > result.txt");
    }

    #[test]
    fn generator_is_a_pure_function_of_the_tuple() {
        let cmd = CommandTemplate::generator(|inputs| {
            format!("process --count {}", inputs.len())
        });
        assert_eq!(cmd.render(&[]), "process --count 0");
    }

    #[test]
    fn identity_covers_the_port_signature() {
        let a = ProcessDefinition::new("align", CommandTemplate::template("run"))
            .with_input(InputPort::new("reads", PortKind::FileRef));
        let b = ProcessDefinition::new("align", CommandTemplate::template("run"))
            .with_input(InputPort::new("reads", PortKind::Value));
        assert_ne!(a.identity(), b.identity());
    }

    #[test]
    fn directives_defaults() {
        let d = Directives::default();
        assert!(d.cache);
        assert!(d.accepts_exit(0));
        assert!(!d.accepts_exit(1));
        assert_eq!(d.timeout(), None);
    }
}
