//! History tree nodes.
//!
//! Every node occupies exactly one block of `block_size` bytes:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  Node header (33 bytes)                                      │
//! │  - kind: u8 (1 = core, 2 = leaf)                             │
//! │  - start: i64, end: i64                                      │
//! │  - sequence number: u32                                      │
//! │  - parent sequence number: i32 (-1 for the root)             │
//! │  - interval count: u32                                       │
//! │  - CRC32 of the whole block with this field zeroed           │
//! ├──────────────────────────────────────────────────────────────┤
//! │  Core nodes only                                             │
//! │  - child count: u32                                          │
//! │  - max_children slots of (seq: u32, start: i64, end: i64)    │
//! ├──────────────────────────────────────────────────────────────┤
//! │  Intervals, sorted by (end, start)                           │
//! ├──────────────────────────────────────────────────────────────┤
//! │  Zero padding up to block_size                               │
//! └──────────────────────────────────────────────────────────────┘
//! ```

use crate::codec::{self, Encode};
use crate::condition::{QuarkRangeCondition, TimeRangeCondition};
use crate::error::{Result, StateError};
use crate::interval::{Interval, Quark, Timestamp};
use std::cmp::Ordering;
use std::io::Cursor;

/// Size of the common node header.
pub const NODE_HEADER_SIZE: usize = 33;

/// Size of one child slot in a core node.
pub const CHILD_ENTRY_SIZE: usize = 20;

const CRC_OFFSET: usize = 29;

/// End time of a node or child that has not been closed yet.
pub const OPEN_END: Timestamp = Timestamp::MAX;

/// Largest time an interval or a close may reach. [`OPEN_END`] is reserved.
pub const LATEST_STORABLE_TIME: Timestamp = OPEN_END - 1;

/// Kind of a history tree node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum NodeKind {
    /// Node with children. May also hold intervals.
    Core = 1,
    /// Node without children.
    Leaf = 2,
}

impl NodeKind {
    /// Creates a NodeKind from its on-disk byte.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Core),
            2 => Some(Self::Leaf),
            _ => None,
        }
    }
}

/// Reference from a core node to one of its children.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildRef {
    /// Sequence number of the child.
    pub seq: u32,
    /// Start time of the child.
    pub start: Timestamp,
    /// End time of the child, [`OPEN_END`] while it is still open.
    pub end: Timestamp,
}

/// One node of the history tree, in memory.
#[derive(Debug, Clone)]
pub struct HtNode {
    kind: NodeKind,
    seq: u32,
    parent: Option<u32>,
    start: Timestamp,
    end: Timestamp,
    closed: bool,
    intervals: Vec<Interval>,
    used: usize,
    children: Vec<ChildRef>,
    block_size: usize,
    max_children: usize,
}

impl HtNode {
    /// Creates an empty open node.
    pub fn new(
        kind: NodeKind,
        seq: u32,
        parent: Option<u32>,
        start: Timestamp,
        block_size: usize,
        max_children: usize,
    ) -> Self {
        Self {
            kind,
            seq,
            parent,
            start,
            end: OPEN_END,
            closed: false,
            intervals: Vec::new(),
            used: 0,
            children: Vec::new(),
            block_size,
            max_children,
        }
    }

    /// Bytes available for intervals in an empty node of this kind.
    pub fn payload_capacity(kind: NodeKind, block_size: usize, max_children: usize) -> usize {
        block_size.saturating_sub(Self::header_size_for(kind, max_children))
    }

    fn header_size_for(kind: NodeKind, max_children: usize) -> usize {
        match kind {
            NodeKind::Core => NODE_HEADER_SIZE + 4 + max_children * CHILD_ENTRY_SIZE,
            NodeKind::Leaf => NODE_HEADER_SIZE,
        }
    }

    /// Node kind.
    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    /// Sequence number, which also determines the node's file offset.
    pub fn seq(&self) -> u32 {
        self.seq
    }

    /// Sequence number of the parent, `None` for the root.
    pub fn parent(&self) -> Option<u32> {
        self.parent
    }

    /// Start time.
    pub fn start(&self) -> Timestamp {
        self.start
    }

    /// End time, [`OPEN_END`] while the node is open.
    pub fn end(&self) -> Timestamp {
        self.end
    }

    /// Returns true once the node has been closed.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Intervals stored in this node, sorted by (end, start).
    pub fn intervals(&self) -> &[Interval] {
        &self.intervals
    }

    /// Child references, in creation order.
    pub fn children(&self) -> &[ChildRef] {
        &self.children
    }

    /// Bytes still available for intervals.
    pub fn free_space(&self) -> usize {
        Self::payload_capacity(self.kind, self.block_size, self.max_children) - self.used
    }

    /// Returns true if a core node cannot take another child.
    pub fn is_full_of_children(&self) -> bool {
        self.children.len() >= self.max_children
    }

    pub(crate) fn set_parent(&mut self, parent: u32) {
        self.parent = Some(parent);
    }

    /// Adds an interval, keeping the (end, start) order.
    ///
    /// # Errors
    ///
    /// Returns `StateError::IntervalTooLarge` if it does not fit and
    /// `StateError::StoreClosed` if the node is closed.
    pub(crate) fn add_interval(&mut self, interval: Interval) -> Result<()> {
        if self.closed {
            return Err(StateError::StoreClosed);
        }
        let size = interval.size_on_disk();
        if size > self.free_space() {
            return Err(StateError::IntervalTooLarge {
                size,
                capacity: self.free_space(),
            });
        }
        let idx = self
            .intervals
            .partition_point(|existing| existing.node_order(&interval) != Ordering::Greater);
        self.intervals.insert(idx, interval);
        self.used += size;
        Ok(())
    }

    /// Registers a new open child.
    pub(crate) fn add_child(&mut self, seq: u32, start: Timestamp) -> Result<()> {
        if self.kind != NodeKind::Core || self.is_full_of_children() {
            return Err(StateError::StoreCorrupted(format!(
                "node {} cannot take another child",
                self.seq
            )));
        }
        self.children.push(ChildRef {
            seq,
            start,
            end: OPEN_END,
        });
        Ok(())
    }

    /// Records the end time of a child that was just closed.
    pub(crate) fn close_child(&mut self, seq: u32, end: Timestamp) {
        if let Some(child) = self.children.iter_mut().rev().find(|c| c.seq == seq) {
            child.end = end;
        }
    }

    /// Closes the node at `end`. A node that never received data may start
    /// after `end`; its range then collapses to its start time. Children
    /// must be closed first, the node always covers their ranges.
    pub(crate) fn close(&mut self, end: Timestamp) {
        let children_end = self
            .children
            .iter()
            .map(|c| c.end)
            .max()
            .unwrap_or(Timestamp::MIN);
        self.end = end.max(self.start).max(children_end);
        self.closed = true;
    }

    /// The interval of `quark` covering `t`, if stored in this node.
    pub fn find(&self, quark: Quark, t: Timestamp) -> Option<&Interval> {
        let first = self.intervals.partition_point(|i| i.end() < t);
        self.intervals[first..]
            .iter()
            .find(|i| i.quark() == quark && i.start() <= t)
    }

    /// Appends every interval of this node covering `t`.
    pub fn collect_covering(&self, t: Timestamp, out: &mut Vec<Interval>) {
        let first = self.intervals.partition_point(|i| i.end() < t);
        out.extend(
            self.intervals[first..]
                .iter()
                .filter(|i| i.start() <= t)
                .cloned(),
        );
    }

    /// Appends every interval matching both conditions.
    pub fn collect_matching(
        &self,
        quarks: &QuarkRangeCondition,
        times: &TimeRangeCondition,
        out: &mut Vec<Interval>,
    ) {
        let first = self.intervals.partition_point(|i| i.end() < times.min());
        out.extend(
            self.intervals[first..]
                .iter()
                .filter(|i| quarks.test(i.quark()) && i.intersects(times))
                .cloned(),
        );
    }

    /// The child whose time range contains `t`. When a collapsed empty child
    /// shares its start with the next one, the later child wins.
    pub fn child_containing(&self, t: Timestamp) -> Option<u32> {
        self.children
            .iter()
            .rev()
            .find(|c| c.start <= t && t <= c.end)
            .map(|c| c.seq)
    }

    /// Serializes the node into one block.
    ///
    /// # Errors
    ///
    /// Returns `StateError::EncodingInvariantViolation` if the encoded
    /// content does not match the space accounted for.
    pub fn to_block(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.block_size);
        buf.push(self.kind as u8);
        buf.extend_from_slice(&self.start.to_le_bytes());
        buf.extend_from_slice(&self.end.to_le_bytes());
        buf.extend_from_slice(&self.seq.to_le_bytes());
        let parent = self.parent.map_or(-1, |p| p as i32);
        buf.extend_from_slice(&parent.to_le_bytes());
        buf.extend_from_slice(&(self.intervals.len() as u32).to_le_bytes());
        buf.extend_from_slice(&[0u8; 4]);

        if self.kind == NodeKind::Core {
            buf.extend_from_slice(&(self.children.len() as u32).to_le_bytes());
            for slot in 0..self.max_children {
                match self.children.get(slot) {
                    Some(child) => {
                        buf.extend_from_slice(&child.seq.to_le_bytes());
                        buf.extend_from_slice(&child.start.to_le_bytes());
                        buf.extend_from_slice(&child.end.to_le_bytes());
                    }
                    None => buf.extend_from_slice(&[0u8; CHILD_ENTRY_SIZE]),
                }
            }
        }

        for interval in &self.intervals {
            codec::encode_checked(interval, &mut buf)?;
        }
        let expected = Self::header_size_for(self.kind, self.max_children) + self.used;
        if buf.len() != expected || buf.len() > self.block_size {
            return Err(StateError::EncodingInvariantViolation {
                declared: expected,
                actual: buf.len(),
            });
        }
        buf.resize(self.block_size, 0);

        let crc = block_crc(&buf);
        buf[CRC_OFFSET..CRC_OFFSET + 4].copy_from_slice(&crc.to_le_bytes());
        Ok(buf)
    }

    /// Decodes and validates a block read from disk.
    ///
    /// # Errors
    ///
    /// Returns `StateError::ChecksumMismatch` if the block is damaged and
    /// `StateError::StoreCorrupted` if its content is inconsistent.
    pub fn from_block(
        block: &[u8],
        expected_seq: u32,
        block_size: usize,
        max_children: usize,
    ) -> Result<Self> {
        if block.len() != block_size {
            return Err(corrupted(expected_seq, "short block"));
        }
        let mut stored = [0u8; 4];
        stored.copy_from_slice(&block[CRC_OFFSET..CRC_OFFSET + 4]);
        let expected = u32::from_le_bytes(stored);
        let actual = block_crc(block);
        if expected != actual {
            return Err(StateError::ChecksumMismatch { expected, actual });
        }

        Self::decode(block, expected_seq, block_size, max_children).map_err(|err| match err {
            StateError::IoError(_) => corrupted(expected_seq, "truncated content"),
            other => other,
        })
    }

    fn decode(block: &[u8], expected_seq: u32, block_size: usize, max_children: usize) -> Result<Self> {
        let kind = NodeKind::from_u8(block[0]).ok_or_else(|| corrupted(expected_seq, "unknown node kind"))?;
        let mut cursor = Cursor::new(&block[1..CRC_OFFSET]);
        let start = codec::read_i64(&mut cursor)?;
        let end = codec::read_i64(&mut cursor)?;
        let seq = codec::read_u32(&mut cursor)?;
        let parent = codec::read_i32(&mut cursor)?;
        let count = codec::read_u32(&mut cursor)? as usize;

        if seq != expected_seq {
            return Err(corrupted(expected_seq, "sequence number mismatch"));
        }
        if start > end {
            return Err(corrupted(seq, "node ends before it starts"));
        }
        let parent = match parent {
            -1 => None,
            p if p >= 0 => Some(p as u32),
            _ => return Err(corrupted(seq, "invalid parent")),
        };

        let mut node = Self::new(kind, seq, parent, start, block_size, max_children);
        node.end = end;
        node.closed = true;

        let mut cursor = Cursor::new(&block[NODE_HEADER_SIZE..]);
        if kind == NodeKind::Core {
            let child_count = codec::read_u32(&mut cursor)? as usize;
            if child_count > max_children {
                return Err(corrupted(seq, "too many children"));
            }
            for _ in 0..child_count {
                let child = ChildRef {
                    seq: codec::read_u32(&mut cursor)?,
                    start: codec::read_i64(&mut cursor)?,
                    end: codec::read_i64(&mut cursor)?,
                };
                if child.start < start || child.end > end || child.start > child.end {
                    return Err(corrupted(seq, "child outside node range"));
                }
                node.children.push(child);
            }
            cursor.set_position(((max_children * CHILD_ENTRY_SIZE) + 4) as u64);
        }

        for _ in 0..count {
            let interval = Interval::read_from(&mut cursor)?;
            if interval.start() < start || interval.end() > end {
                return Err(corrupted(seq, "interval outside node range"));
            }
            node.used += interval.size_on_disk();
            node.intervals.push(interval);
        }
        Ok(node)
    }
}

fn block_crc(block: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&block[..CRC_OFFSET]);
    hasher.update(&block[CRC_OFFSET + 4..]);
    hasher.finalize()
}

fn corrupted(seq: u32, reason: &str) -> StateError {
    StateError::StoreCorrupted(format!("node {}: {}", seq, reason))
}
