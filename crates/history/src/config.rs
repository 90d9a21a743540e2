//! Store configuration, fixed at creation time.

use crate::backend::history_tree::HtConfig;
use crate::error::{Result, StateError};
use crate::interval::Timestamp;
use std::path::PathBuf;

/// Storage backend used by a state system.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum BackendKind {
    /// Per-quark interval lists kept in memory.
    #[default]
    InMemory,
    /// On-disk history tree.
    HistoryTree(HtConfig),
    /// Accepts writes and answers no queries.
    Null,
}

/// Configuration of a state system.
///
/// # Examples
/// ```rust,ignore
/// use alopex_history::StoreConfig;
///
/// let config = StoreConfig::history_tree("kernel", "/tmp/kernel.ht")
///     .with_start_time(1_000)
///     .with_block_size(16 * 1024);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Identifier of the store, used in log fields.
    pub ssid: String,
    /// First timestamp covered by the store.
    pub start_time: Timestamp,
    /// Backend receiving closed intervals.
    pub backend: BackendKind,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            ssid: String::from("default"),
            start_time: 0,
            backend: BackendKind::default(),
        }
    }
}

impl StoreConfig {
    /// In-memory store.
    pub fn in_memory(ssid: impl Into<String>) -> Self {
        Self {
            ssid: ssid.into(),
            ..Self::default()
        }
    }

    /// On-disk store backed by the history tree file at `path`.
    pub fn history_tree(ssid: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            ssid: ssid.into(),
            backend: BackendKind::HistoryTree(HtConfig::new(path)),
            ..Self::default()
        }
    }

    /// Store that discards every interval.
    pub fn null(ssid: impl Into<String>) -> Self {
        Self {
            ssid: ssid.into(),
            backend: BackendKind::Null,
            ..Self::default()
        }
    }

    /// Sets the start time.
    pub fn with_start_time(mut self, start_time: Timestamp) -> Self {
        self.start_time = start_time;
        self
    }

    /// Sets the history tree node size. Ignored by other backends.
    pub fn with_block_size(mut self, block_size: usize) -> Self {
        if let BackendKind::HistoryTree(ht) = &mut self.backend {
            ht.block_size = block_size;
        }
        self
    }

    /// Sets the history tree fan-out. Ignored by other backends.
    pub fn with_max_children(mut self, max_children: usize) -> Self {
        if let BackendKind::HistoryTree(ht) = &mut self.backend {
            ht.max_children = max_children;
        }
        self
    }

    /// Sets the provider version recorded in (and required from) the history
    /// file. Ignored by other backends.
    pub fn with_provider_version(mut self, provider_version: i32) -> Self {
        if let BackendKind::HistoryTree(ht) = &mut self.backend {
            ht.provider_version = provider_version;
        }
        self
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `StateError::InvalidConfig` if the ssid is empty or the
    /// history tree geometry is unusable.
    pub fn validate(&self) -> Result<()> {
        if self.ssid.is_empty() {
            return Err(StateError::InvalidConfig("ssid must not be empty".into()));
        }
        if let BackendKind::HistoryTree(ht) = &self.backend {
            ht.validate()?;
        }
        Ok(())
    }
}
