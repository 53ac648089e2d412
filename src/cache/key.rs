// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::channel::Value;

/// A BLAKE3 digest (256 bits) identifying a task's reproducible identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey([u8; 32]);

impl CacheKey {
    /// Derive the key for one task.
    ///
    /// Fields are hashed with a length prefix so adjacent fields can never
    /// alias each other (`"ab" + "c"` vs `"a" + "bc"`); any single-bit
    /// difference in identity, command, inputs, or directives changes the
    /// key.
    pub fn for_task(
        identity: &str,
        command: &str,
        inputs: &[(String, Value)],
        directive_signature: &str,
    ) -> Self {
        let mut hasher = blake3::Hasher::new();
        update_field(&mut hasher, identity.as_bytes());
        update_field(&mut hasher, command.as_bytes());
        for (name, value) in inputs {
            update_field(&mut hasher, name.as_bytes());
            update_field(&mut hasher, &value.canonical_bytes());
        }
        update_field(&mut hasher, directive_signature.as_bytes());
        Self(*hasher.finalize().as_bytes())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// The on-disk location relative to a store root: a 2-hex-character
    /// prefix directory bounding fan-out, then the remainder.
    pub fn relative_path(&self) -> PathBuf {
        let hex = self.to_hex();
        PathBuf::from(&hex[..2]).join(&hex[2..])
    }
}

fn update_field(hasher: &mut blake3::Hasher, bytes: &[u8]) {
    hasher.update(&(bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}
