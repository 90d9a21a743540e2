//! History tree configuration.

use super::node::{HtNode, NodeKind};
use crate::error::{Result, StateError};
use std::path::PathBuf;

/// Default node size (64 KiB).
pub const DEFAULT_BLOCK_SIZE: usize = 64 * 1024;

/// Default maximum number of children of a core node.
pub const DEFAULT_MAX_CHILDREN: usize = 50;

/// Default number of closed nodes kept in the read cache.
pub const DEFAULT_CACHE_CAPACITY: usize = 256;

/// Provider version that disables the version check on reopen.
pub const IGNORE_PROVIDER_VERSION: i32 = -42;

/// Smallest interval payload a core node must be able to hold.
const MIN_NODE_PAYLOAD: usize = 128;

/// Configuration of an on-disk history tree.
///
/// `block_size` and `max_children` only apply when a new file is created;
/// a reopened file uses the geometry recorded in its header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HtConfig {
    /// Path of the history file.
    pub path: PathBuf,
    /// Size of every node on disk, in bytes.
    pub block_size: usize,
    /// Maximum number of children of a core node.
    pub max_children: usize,
    /// Version of the analysis building the file.
    pub provider_version: i32,
    /// Number of closed nodes cached in memory for queries.
    pub cache_capacity: usize,
}

impl HtConfig {
    /// Creates a configuration with default geometry.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            block_size: DEFAULT_BLOCK_SIZE,
            max_children: DEFAULT_MAX_CHILDREN,
            provider_version: 0,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
        }
    }

    /// Sets the node size.
    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    /// Sets the core node fan-out.
    pub fn with_max_children(mut self, max_children: usize) -> Self {
        self.max_children = max_children;
        self
    }

    /// Sets the provider version.
    pub fn with_provider_version(mut self, provider_version: i32) -> Self {
        self.provider_version = provider_version;
        self
    }

    /// Sets the node cache capacity. Zero disables caching.
    pub fn with_cache_capacity(mut self, cache_capacity: usize) -> Self {
        self.cache_capacity = cache_capacity;
        self
    }

    /// Checks that the geometry can hold a useful tree.
    ///
    /// # Errors
    ///
    /// Returns `StateError::InvalidConfig` if a core node could not hold at
    /// least two children and a minimal interval payload.
    pub fn validate(&self) -> Result<()> {
        if self.max_children < 2 {
            return Err(StateError::InvalidConfig(format!(
                "max_children must be at least 2, got {}",
                self.max_children
            )));
        }
        if self.block_size > u32::MAX as usize {
            return Err(StateError::InvalidConfig(format!(
                "block size {} does not fit in 32 bits",
                self.block_size
            )));
        }
        let capacity = HtNode::payload_capacity(NodeKind::Core, self.block_size, self.max_children);
        if capacity < MIN_NODE_PAYLOAD {
            return Err(StateError::InvalidConfig(format!(
                "block size {} too small for {} children",
                self.block_size, self.max_children
            )));
        }
        Ok(())
    }
}
