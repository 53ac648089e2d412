// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

mod cache;
mod execution;
mod graph;

pub use cache::CacheError;
pub use execution::{ErrorStrategy, ExecutionError};
pub use graph::GraphError;
