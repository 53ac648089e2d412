// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::channel::Value;
use crate::errors::ExecutionError;

/// How a port moves data between a channel and a task.
///
/// A closed set: every kind has exactly one input-resolution and one
/// output-extraction rule, selected by match rather than open-ended name
/// dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortKind {
    /// Input: bound into the task environment. Output: parsed from captured
    /// stdout.
    Value,
    /// Input: exported as an environment variable. Output: read from the
    /// task's `.command.env` file.
    Environment,
    /// Input: staged into the work dir. Output: a file the task produced,
    /// checked for existence.
    FileRef,
    /// A path passed through verbatim, with no staging or existence check.
    PathRef,
    /// A list value carried as JSON.
    Tuple,
    /// Input only: the resolver cartesian-expands over each element of the
    /// incoming values instead of zipping them positionally.
    EachElement,
}

/// A named input port with its consumption mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputPort {
    pub name: String,
    pub kind: PortKind,
}

/// A named output port with its extraction mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputPort {
    pub name: String,
    pub kind: PortKind,
}

impl InputPort {
    pub fn new(name: impl Into<String>, kind: PortKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

impl OutputPort {
    pub fn new(name: impl Into<String>, kind: PortKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// Resolve one input binding into the environment pair handed to the
/// executor.
///
/// `FileRef` inputs additionally report the path that must be staged into the
/// work dir before launch.
pub fn input_env(kind: PortKind, name: &str, value: &Value) -> (String, String) {
    let rendered = match kind {
        PortKind::Tuple => {
            // Tuples cross the process boundary as JSON so list structure
            // survives shell quoting.
            String::from_utf8(value.canonical_bytes()).unwrap_or_default()
        }
        _ => value.render(),
    };
    (name.to_string(), rendered)
}

/// Extract one declared output value after a task completes.
///
/// `stdout` is the captured standard output; `work_dir` is the task's
/// content-addressed working directory.
pub fn extract_output(
    kind: PortKind,
    name: &str,
    stdout: &str,
    work_dir: &Path,
) -> Result<Value, ExecutionError> {
    match kind {
        PortKind::Value => Ok(Value::parse_scalar(stdout)),
        PortKind::Environment => {
            let env_file = work_dir.join(".command.env");
            let content = std::fs::read_to_string(&env_file).map_err(|e| {
                ExecutionError::OutputMissing {
                    port: name.to_string(),
                    reason: format!("cannot read {}: {}", env_file.display(), e),
                }
            })?;
            content
                .lines()
                .filter_map(|line| line.split_once('='))
                .find(|(key, _)| key.trim() == name)
                .map(|(_, val)| Value::parse_scalar(val))
                .ok_or_else(|| ExecutionError::OutputMissing {
                    port: name.to_string(),
                    reason: format!("no '{}' entry in {}", name, env_file.display()),
                })
        }
        PortKind::FileRef => {
            let path = work_dir.join(name);
            if path.exists() {
                Ok(Value::Path(path))
            } else {
                Err(ExecutionError::OutputMissing {
                    port: name.to_string(),
                    reason: format!("declared output file {} was not produced", path.display()),
                })
            }
        }
        PortKind::PathRef => Ok(Value::Path(work_dir.join(name))),
        PortKind::Tuple => {
            serde_json::from_str::<Value>(stdout.trim()).map_err(|e| {
                ExecutionError::OutputMissing {
                    port: name.to_string(),
                    reason: format!("stdout is not a JSON tuple: {}", e),
                }
            })
        }
        PortKind::EachElement => {
            // Meaningful on the input side only; as an output, each stdout
            // line becomes one element.
            Ok(Value::List(
                stdout.lines().map(Value::parse_scalar).collect(),
            ))
        }
    }
}
