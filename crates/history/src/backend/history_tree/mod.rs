//! On-disk history tree backend.
//!
//! The history file is a sequence of fixed-size blocks:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Header block (4096 bytes)                                   │
//! │  - magic, versions, geometry, root, time range               │
//! │  - attribute tree location, CRC, closed marker               │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Node 0 (block_size bytes)                                   │
//! │  Node 1                                                      │
//! │  ...                                                         │
//! │  Node n-1                                                    │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Attribute tree (written at close)                           │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Node `seq` lives at `4096 + seq * block_size`. Intervals are inserted in
//! the order they close, each one into the deepest node of the latest
//! branch that starts no later than the interval: short intervals end up in
//! leaves, long-lived ones higher in the tree. A full node is closed at the
//! largest end time seen so far and replaced by a sibling; when the root has
//! no free child slot a new root is added above it. Written blocks are never
//! rewritten.

mod config;
mod header;
mod node;
mod tree;

pub use config::{
    HtConfig, DEFAULT_BLOCK_SIZE, DEFAULT_CACHE_CAPACITY, DEFAULT_MAX_CHILDREN,
    IGNORE_PROVIDER_VERSION,
};
pub use header::{TreeHeader, HEADER_SIZE, HT_MAGIC, HT_VERSION};
pub use node::{ChildRef, HtNode, NodeKind, LATEST_STORABLE_TIME, OPEN_END};
pub use tree::HistoryTree;

use super::StateHistoryBackend;
use crate::attribute::AttributeTree;
use crate::cancel::CancellationToken;
use crate::condition::{QuarkRangeCondition, TimeRangeCondition};
use crate::error::Result;
use crate::interval::{Interval, Quark, Timestamp};
use crate::value::StateValue;

/// Storage backend writing to a history tree file.
#[derive(Debug)]
pub struct HistoryTreeBackend {
    ssid: String,
    tree: HistoryTree,
}

impl HistoryTreeBackend {
    /// Creates a new history file.
    pub fn create(ssid: impl Into<String>, config: HtConfig, start_time: Timestamp) -> Result<Self> {
        Ok(Self {
            ssid: ssid.into(),
            tree: HistoryTree::create(config, start_time)?,
        })
    }

    /// Reopens a closed history file, returning the backend and the
    /// attribute tree stored with it.
    pub fn open_existing(ssid: impl Into<String>, config: HtConfig) -> Result<(Self, AttributeTree)> {
        let (tree, attributes) = HistoryTree::open(config)?;
        Ok((
            Self {
                ssid: ssid.into(),
                tree,
            },
            attributes,
        ))
    }

    /// The underlying tree.
    pub fn tree(&self) -> &HistoryTree {
        &self.tree
    }
}

impl StateHistoryBackend for HistoryTreeBackend {
    fn ssid(&self) -> &str {
        &self.ssid
    }

    fn start_time(&self) -> Timestamp {
        self.tree.start_time()
    }

    fn end_time(&self) -> Timestamp {
        self.tree.end_time()
    }

    fn latest_storable_time(&self) -> Timestamp {
        LATEST_STORABLE_TIME
    }

    fn insert_past_state(
        &self,
        start: Timestamp,
        end: Timestamp,
        quark: Quark,
        value: StateValue,
    ) -> Result<()> {
        self.tree.insert(Interval::new(start, end, quark, value)?)
    }

    fn finished_building(&self, end_time: Timestamp, attributes: &AttributeTree) -> Result<()> {
        self.tree.close(end_time, attributes)
    }

    fn query_at(&self, quark: Quark, t: Timestamp) -> Result<Option<Interval>> {
        self.tree.query_at(quark, t)
    }

    fn query_full_state(&self, t: Timestamp) -> Result<Vec<Interval>> {
        self.tree.query_full_state(t)
    }

    fn query_2d(
        &self,
        quarks: &QuarkRangeCondition,
        times: &TimeRangeCondition,
        cancel: &CancellationToken,
    ) -> Result<Vec<Interval>> {
        self.tree.query_2d(quarks, times, cancel)
    }

    fn remove_files(&self) -> Result<()> {
        self.tree.remove_file()
    }

    fn dispose(&self) {
        self.tree.dispose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_backend_roundtrip() {
        let dir = TempDir::new().unwrap();
        let config = HtConfig::new(dir.path().join("backend.ht"));

        let backend = HistoryTreeBackend::create("kernel", config.clone(), 0).unwrap();
        backend.insert_past_state(0, 9, 0, StateValue::from("A")).unwrap();
        backend.insert_past_state(10, 19, 0, StateValue::from("B")).unwrap();
        let mut attributes = AttributeTree::new();
        attributes.quark_for("Threads/1").unwrap();
        backend.finished_building(19, &attributes).unwrap();

        let (reopened, restored) = HistoryTreeBackend::open_existing("kernel", config).unwrap();
        assert_eq!(reopened.ssid(), "kernel");
        assert_eq!(restored.len(), 2);
        let at = |t| reopened.query_at(0, t).unwrap().map(Interval::into_value);
        assert_eq!(at(5), Some(StateValue::from("A")));
        assert_eq!(at(10), Some(StateValue::from("B")));

        let range = reopened
            .query(0, &TimeRangeCondition::continuous(0, 19))
            .unwrap();
        assert_eq!(range.len(), 2);

        reopened.remove_files().unwrap();
        assert!(!dir.path().join("backend.ht").exists());
    }
}
