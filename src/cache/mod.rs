// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Content-addressed memoization of prior task outputs.
//!
//! A [`CacheKey`] is a BLAKE3 digest over everything that determines a
//! task's result: process identity, rendered command text, the ordered input
//! tuple, and the caching-relevant directives. The [`CacheStore`] persists
//! one entry per key under a two-level prefix tree so re-running an
//! unmodified pipeline is a pure read path with no executor involvement.

mod key;
mod store;

pub use key::CacheKey;
pub use store::{CacheEntry, CacheStore};
