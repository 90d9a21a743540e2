//! The history tree: construction, persistence and traversal.

use super::config::{HtConfig, IGNORE_PROVIDER_VERSION};
use super::header::{TreeHeader, CLOSED_MARKER, CLOSED_MARKER_OFFSET, HEADER_SIZE};
use super::node::{HtNode, NodeKind, LATEST_STORABLE_TIME};
use crate::attribute::AttributeTree;
use crate::cancel::CancellationToken;
use crate::codec::Encode;
use crate::condition::{QuarkRangeCondition, TimeRangeCondition};
use crate::error::{Result, StateError};
use crate::interval::{Interval, Quark, Timestamp};
use std::collections::{HashMap, VecDeque};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, info, warn};

/// Mutable part of the tree, guarded by one lock.
#[derive(Debug)]
struct TreeState {
    /// Open nodes from the root down to the current leaf.
    branch: Vec<HtNode>,
    root_seq: u32,
    node_count: u32,
    end_time: Timestamp,
    /// Write handle; `None` once closed or when reopened.
    writer: Option<File>,
}

impl TreeState {
    fn next_seq(&mut self) -> Result<u32> {
        let seq = self.node_count;
        self.node_count = seq
            .checked_add(1)
            .ok_or_else(|| StateError::InvalidConfig("history tree node count exhausted".into()))?;
        Ok(seq)
    }
}

/// Closed nodes recently read from disk or evicted from the branch.
#[derive(Debug)]
struct NodeCache {
    capacity: usize,
    nodes: HashMap<u32, Arc<HtNode>>,
    order: VecDeque<u32>,
}

impl NodeCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            nodes: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    fn get(&self, seq: u32) -> Option<Arc<HtNode>> {
        self.nodes.get(&seq).cloned()
    }

    fn insert(&mut self, node: Arc<HtNode>) {
        if self.capacity == 0 || self.nodes.contains_key(&node.seq()) {
            return;
        }
        while self.nodes.len() >= self.capacity {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.nodes.remove(&oldest);
                }
                None => break,
            }
        }
        self.order.push_back(node.seq());
        self.nodes.insert(node.seq(), node);
    }

    fn clear(&mut self) {
        self.nodes.clear();
        self.order.clear();
    }
}

/// On-disk, time-ordered tree of fixed-size nodes.
///
/// One writer inserts intervals in the order they close; any number of
/// readers may query concurrently. Nodes of the latest branch live in memory
/// until they are closed, written to their block and dropped from the
/// branch, all under the same write lock, so a node not found in the branch
/// is always readable from the file.
#[derive(Debug)]
pub struct HistoryTree {
    config: HtConfig,
    start_time: Timestamp,
    state: RwLock<TreeState>,
    cache: Mutex<NodeCache>,
    /// Shared by every reader; positional reads leave no cursor behind.
    reader: File,
}

impl HistoryTree {
    /// Creates a new history file, truncating any existing one.
    ///
    /// # Errors
    ///
    /// Returns `StateError::InvalidConfig` for unusable geometry, or an I/O
    /// error if the file cannot be created.
    pub fn create(config: HtConfig, start_time: Timestamp) -> Result<Self> {
        config.validate()?;
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&config.path)?;
        file.write_all(&vec![0u8; HEADER_SIZE as usize])?;
        let reader = File::open(&config.path)?;

        let root = HtNode::new(
            NodeKind::Leaf,
            0,
            None,
            start_time,
            config.block_size,
            config.max_children,
        );
        debug!(
            path = %config.path.display(),
            block_size = config.block_size,
            max_children = config.max_children,
            start_time,
            "Created history tree"
        );

        Ok(Self {
            cache: Mutex::new(NodeCache::new(config.cache_capacity)),
            reader,
            config,
            start_time,
            state: RwLock::new(TreeState {
                branch: vec![root],
                root_seq: 0,
                node_count: 1,
                end_time: start_time,
                writer: Some(file),
            }),
        })
    }

    /// Reopens a closed history file and reads back its attribute tree.
    ///
    /// The geometry stored in the file takes precedence over the one in
    /// `config`.
    ///
    /// # Errors
    ///
    /// Every error for which [`StateError::requires_rebuild`] is true means
    /// the file cannot be trusted.
    pub fn open(config: HtConfig) -> Result<(Self, AttributeTree)> {
        let mut file = File::open(&config.path)?;
        let file_len = file.metadata()?.len();
        if file_len < HEADER_SIZE {
            return Err(StateError::StoreCorrupted(format!(
                "history file is only {} bytes",
                file_len
            )));
        }

        let header = TreeHeader::read_from(&mut file)?;
        if config.provider_version != IGNORE_PROVIDER_VERSION
            && header.provider_version != config.provider_version
        {
            return Err(StateError::ProviderVersionMismatch {
                expected: config.provider_version,
                actual: header.provider_version,
            });
        }

        let config = HtConfig {
            block_size: header.block_size as usize,
            max_children: header.max_children as usize,
            ..config
        };
        if config.validate().is_err() {
            return Err(StateError::StoreCorrupted(format!(
                "invalid geometry: block size {}, max children {}",
                header.block_size, header.max_children
            )));
        }

        let nodes_end = HEADER_SIZE + header.node_count as u64 * header.block_size as u64;
        let attributes_end = header.attribute_offset + header.attribute_len as u64;
        if header.node_count == 0
            || header.root_seq >= header.node_count
            || header.attribute_offset < nodes_end
            || attributes_end > file_len
            || header.start_time > header.end_time
        {
            return Err(StateError::StoreCorrupted(
                "header points outside of the file".into(),
            ));
        }

        file.seek(SeekFrom::Start(header.attribute_offset))?;
        let attributes = AttributeTree::read_from(&mut file, header.attribute_len as usize)?;

        info!(
            path = %config.path.display(),
            nodes = header.node_count,
            attributes = attributes.len(),
            start_time = header.start_time,
            end_time = header.end_time,
            "Opened history tree"
        );

        let tree = Self {
            cache: Mutex::new(NodeCache::new(config.cache_capacity)),
            reader: file,
            config,
            start_time: header.start_time,
            state: RwLock::new(TreeState {
                branch: Vec::new(),
                root_seq: header.root_seq,
                node_count: header.node_count,
                end_time: header.end_time,
                writer: None,
            }),
        };
        Ok((tree, attributes))
    }

    /// Path of the history file.
    pub fn path(&self) -> &Path {
        &self.config.path
    }

    /// Effective configuration.
    pub fn config(&self) -> &HtConfig {
        &self.config
    }

    /// Start time of the tree.
    pub fn start_time(&self) -> Timestamp {
        self.start_time
    }

    /// Largest end time inserted so far, or the close time.
    pub fn end_time(&self) -> Timestamp {
        self.read_state().end_time
    }

    /// Number of nodes allocated so far.
    pub fn node_count(&self) -> u32 {
        self.read_state().node_count
    }

    /// Number of nodes in the latest branch. Zero for a reopened tree.
    pub fn depth(&self) -> usize {
        self.read_state().branch.len()
    }

    /// Returns true once the tree no longer accepts intervals.
    pub fn is_closed(&self) -> bool {
        self.read_state().writer.is_none()
    }

    fn read_state(&self) -> std::sync::RwLockReadGuard<'_, TreeState> {
        self.state.read().unwrap_or_else(|err| err.into_inner())
    }

    fn node_offset(&self, seq: u32) -> u64 {
        HEADER_SIZE + seq as u64 * self.config.block_size as u64
    }

    /// Inserts a closed interval into the deepest latest-branch node that
    /// starts no later than the interval, splitting full nodes as needed.
    ///
    /// # Errors
    ///
    /// - `StateError::IntervalTooLarge` if the interval cannot fit in an
    ///   empty core node
    /// - `StateError::TimeRangeOutOfBounds` if it starts before the tree or
    ///   ends after [`LATEST_STORABLE_TIME`]
    /// - `StateError::StoreClosed` once the tree is closed
    pub fn insert(&self, interval: Interval) -> Result<()> {
        let size = interval.size_on_disk();
        let capacity =
            HtNode::payload_capacity(NodeKind::Core, self.config.block_size, self.config.max_children);
        if size > capacity {
            return Err(StateError::IntervalTooLarge { size, capacity });
        }

        let mut state = self.state.write().unwrap_or_else(|err| err.into_inner());
        if state.writer.is_none() {
            return Err(StateError::StoreClosed);
        }
        if interval.start() < self.start_time {
            return Err(StateError::TimeRangeOutOfBounds {
                time: interval.start(),
                start: self.start_time,
                end: state.end_time,
            });
        }
        self.check_storable(interval.end())?;

        let mut depth = state.branch.len() - 1;
        loop {
            let node = &state.branch[depth];
            if interval.start() < node.start() {
                // The root always starts at the tree start, so this stops there.
                depth -= 1;
                continue;
            }
            if size > node.free_space() {
                self.add_sibling_node(&mut state, depth)?;
                depth = state.branch.len() - 1;
                continue;
            }
            break;
        }

        state.end_time = state.end_time.max(interval.end());
        state.branch[depth].add_interval(interval)
    }

    /// Replaces the node at `depth` and everything below it with fresh
    /// nodes, or grows a new root when no ancestor has a free child slot.
    fn add_sibling_node(&self, state: &mut TreeState, depth: usize) -> Result<()> {
        if depth == 0 {
            return self.add_new_root(state);
        }
        if state.branch[depth - 1].is_full_of_children() {
            return self.add_sibling_node(state, depth - 1);
        }

        let split = state.end_time;
        let branch_len = state.branch.len();
        self.write_branch_from(state, depth, split)?;
        self.evict_branch_from(state, depth);
        self.extend_branch(state, branch_len, self.after_split(split)?)?;
        debug!(
            path = %self.config.path.display(),
            depth,
            split,
            nodes = state.node_count,
            "Split history tree branch"
        );
        Ok(())
    }

    fn add_new_root(&self, state: &mut TreeState) -> Result<()> {
        let split = state.end_time;
        let branch_len = state.branch.len();
        let root_seq = state.next_seq()?;
        state.branch[0].set_parent(root_seq);

        self.write_branch_from(state, 0, split)?;
        let old_root = &state.branch[0];
        let (old_seq, old_start, old_end) = (old_root.seq(), old_root.start(), old_root.end());
        self.evict_branch_from(state, 0);

        let mut root = HtNode::new(
            NodeKind::Core,
            root_seq,
            None,
            self.start_time,
            self.config.block_size,
            self.config.max_children,
        );
        root.add_child(old_seq, old_start)?;
        root.close_child(old_seq, old_end);
        state.branch.push(root);
        state.root_seq = root_seq;
        self.extend_branch(state, branch_len + 1, self.after_split(split)?)?;

        debug!(
            path = %self.config.path.display(),
            root = root_seq,
            depth = state.branch.len(),
            "Added history tree root"
        );
        Ok(())
    }

    /// Start time of the nodes replacing a branch closed at `split`.
    fn after_split(&self, split: Timestamp) -> Result<Timestamp> {
        split.checked_add(1).ok_or(StateError::TimeRangeOutOfBounds {
            time: split,
            start: self.start_time,
            end: LATEST_STORABLE_TIME,
        })
    }

    fn check_storable(&self, t: Timestamp) -> Result<()> {
        if t > LATEST_STORABLE_TIME {
            return Err(StateError::TimeRangeOutOfBounds {
                time: t,
                start: self.start_time,
                end: LATEST_STORABLE_TIME,
            });
        }
        Ok(())
    }

    /// Closes and writes the branch nodes at `depth` and below, deepest
    /// first so every parent records its child's final range.
    fn write_branch_from(&self, state: &mut TreeState, depth: usize, end: Timestamp) -> Result<()> {
        let writer = state.writer.as_mut().ok_or(StateError::StoreClosed)?;
        for i in (depth..state.branch.len()).rev() {
            state.branch[i].close(end);
            let (seq, node_end) = (state.branch[i].seq(), state.branch[i].end());
            if i > 0 {
                state.branch[i - 1].close_child(seq, node_end);
            }
            let block = state.branch[i].to_block()?;
            writer.seek(SeekFrom::Start(self.node_offset(seq)))?;
            writer.write_all(&block)?;
        }
        Ok(())
    }

    /// Moves written branch nodes at `depth` and below into the cache.
    fn evict_branch_from(&self, state: &mut TreeState, depth: usize) {
        let mut cache = self.cache.lock().unwrap_or_else(|err| err.into_inner());
        for node in state.branch.drain(depth..) {
            cache.insert(Arc::new(node));
        }
    }

    /// Appends fresh nodes starting at `start` until the branch has
    /// `target_len` nodes, the last one being a leaf.
    fn extend_branch(&self, state: &mut TreeState, target_len: usize, start: Timestamp) -> Result<()> {
        while state.branch.len() < target_len {
            let seq = state.next_seq()?;
            let depth = state.branch.len();
            let kind = if depth + 1 == target_len {
                NodeKind::Leaf
            } else {
                NodeKind::Core
            };
            let parent = &mut state.branch[depth - 1];
            parent.add_child(seq, start)?;
            let node = HtNode::new(
                kind,
                seq,
                Some(parent.seq()),
                start,
                self.config.block_size,
                self.config.max_children,
            );
            state.branch.push(node);
        }
        Ok(())
    }

    /// Closes every open node at `end_time` (or the largest inserted end
    /// time if later), then writes the attribute tree and the header. The
    /// closed marker is written and synced last. Closing twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `StateError::TimeRangeOutOfBounds` if `end_time` is after
    /// [`LATEST_STORABLE_TIME`], or an error if writing the file fails.
    pub fn close(&self, end_time: Timestamp, attributes: &AttributeTree) -> Result<()> {
        let mut guard = self.state.write().unwrap_or_else(|err| err.into_inner());
        let state = &mut *guard;
        if state.writer.is_none() {
            return Ok(());
        }
        self.check_storable(end_time)?;
        let end = end_time.max(state.end_time);
        state.end_time = end;

        // The closed branch stays in memory and keeps serving queries.
        self.write_branch_from(state, 0, end)?;

        let attribute_offset = self.node_offset(state.node_count);
        let writer = state.writer.as_mut().ok_or(StateError::StoreClosed)?;
        writer.seek(SeekFrom::Start(attribute_offset))?;
        let attribute_len = attributes.write_to(writer)?;
        let attribute_len = u32::try_from(attribute_len).map_err(|_| {
            StateError::InvalidConfig(format!("attribute tree of {} bytes is too large", attribute_len))
        })?;

        let header = TreeHeader {
            provider_version: self.config.provider_version,
            block_size: self.config.block_size as u32,
            max_children: self.config.max_children as u32,
            node_count: state.node_count,
            root_seq: state.root_seq,
            start_time: self.start_time,
            end_time: end,
            attribute_offset,
            attribute_len,
        };
        writer.seek(SeekFrom::Start(0))?;
        header.write_to(writer)?;
        writer.sync_all()?;
        writer.seek(SeekFrom::Start(CLOSED_MARKER_OFFSET))?;
        writer.write_all(&[CLOSED_MARKER])?;
        writer.sync_all()?;
        state.writer = None;

        info!(
            path = %self.config.path.display(),
            nodes = header.node_count,
            attributes = attributes.len(),
            end_time = end,
            "Closed history tree"
        );
        Ok(())
    }

    /// Reads a closed node from the cache or the file.
    fn read_node(&self, seq: u32) -> Result<Arc<HtNode>> {
        if let Some(node) = self.cache.lock().unwrap_or_else(|err| err.into_inner()).get(seq) {
            return Ok(node);
        }

        let node_count = self.read_state().node_count;
        if seq >= node_count {
            return Err(StateError::StoreCorrupted(format!(
                "node {} referenced but only {} nodes exist",
                seq, node_count
            )));
        }

        let block_size = self.config.block_size;
        let offset = self.node_offset(seq);
        let mut block = vec![0u8; block_size];
        self.reader.read_exact_at(&mut block, offset).map_err(|err| match err.kind() {
            io::ErrorKind::UnexpectedEof => StateError::StoreCorrupted(format!(
                "node {} at offset {} lies outside the file",
                seq, offset
            )),
            _ => err.into(),
        })?;

        let node = HtNode::from_block(&block, seq, block_size, self.config.max_children)
            .map_err(|err| {
                warn!(path = %self.config.path.display(), seq, error = %err, "Unreadable history tree node");
                err
            })?;
        let node = Arc::new(node);
        self.cache
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .insert(Arc::clone(&node));
        Ok(node)
    }

    /// Runs `f` on node `seq`, taken from the latest branch if it is still
    /// open, otherwise from the cache or the file.
    fn with_node<R>(&self, seq: u32, f: impl FnOnce(&HtNode) -> R) -> Result<R> {
        {
            let state = self.read_state();
            if let Some(node) = state.branch.iter().find(|n| n.seq() == seq) {
                return Ok(f(node));
            }
        }
        let node = self.read_node(seq)?;
        Ok(f(&node))
    }

    fn root_seq(&self) -> u32 {
        self.read_state().root_seq
    }

    /// The stored interval of `quark` covering `t`.
    ///
    /// Descends the single path of nodes whose range contains `t` and stops
    /// at the first match.
    pub fn query_at(&self, quark: Quark, t: Timestamp) -> Result<Option<Interval>> {
        let mut next = Some(self.root_seq());
        while let Some(seq) = next {
            let (found, child) = self.with_node(seq, |node| {
                (node.find(quark, t).cloned(), node.child_containing(t))
            })?;
            if found.is_some() {
                return Ok(found);
            }
            next = child;
        }
        Ok(None)
    }

    /// Every stored interval covering `t`.
    pub fn query_full_state(&self, t: Timestamp) -> Result<Vec<Interval>> {
        let mut result = Vec::new();
        let mut next = Some(self.root_seq());
        while let Some(seq) = next {
            next = self.with_node(seq, |node| {
                node.collect_covering(t, &mut result);
                node.child_containing(t)
            })?;
        }
        Ok(result)
    }

    /// Every stored interval matching both conditions.
    ///
    /// Breadth-first traversal; each node narrows the time condition to its
    /// own range and skips children the narrowed condition cannot reach.
    pub fn query_2d(
        &self,
        quarks: &QuarkRangeCondition,
        times: &TimeRangeCondition,
        cancel: &CancellationToken,
    ) -> Result<Vec<Interval>> {
        let mut result = Vec::new();
        let mut queue = VecDeque::from([(self.root_seq(), times.clone())]);
        while let Some((seq, condition)) = queue.pop_front() {
            cancel.check()?;
            self.with_node(seq, |node| {
                let Some(sub) = condition.sub_condition(node.start(), node.end()) else {
                    return;
                };
                node.collect_matching(quarks, &sub, &mut result);
                for child in node.children() {
                    if let Some(child_condition) = sub.sub_condition(child.start, child.end) {
                        queue.push_back((child.seq, child_condition));
                    }
                }
            })?;
        }
        Ok(result)
    }

    /// Drops the write handle and the cache. A tree that was still being
    /// built is deleted, since it could never be reopened.
    pub fn dispose(&self) {
        let mut state = self.state.write().unwrap_or_else(|err| err.into_inner());
        let unfinished = state.writer.take().is_some();
        state.branch.clear();
        drop(state);
        self.cache.lock().unwrap_or_else(|err| err.into_inner()).clear();

        if unfinished {
            if let Err(err) = self.remove_file() {
                warn!(path = %self.config.path.display(), error = %err, "Failed to remove unfinished history file");
            }
        }
    }

    /// Deletes the history file. A missing file is not an error.
    pub fn remove_file(&self) -> Result<()> {
        match fs::remove_file(&self.config.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::StateValue;
    use tempfile::TempDir;

    const QUARKS: i32 = 5;

    fn small_config(dir: &TempDir) -> HtConfig {
        HtConfig::new(dir.path().join("test.ht"))
            .with_block_size(1024)
            .with_max_children(3)
    }

    /// Quark `t % QUARKS` changes value at every timestamp `t` in `1..=last`.
    /// Returns the intervals in the order they close.
    fn generate(last: Timestamp) -> Vec<Interval> {
        let mut starts = vec![0; QUARKS as usize];
        let mut intervals = Vec::new();
        for t in 1..=last {
            let quark = (t % QUARKS as i64) as i32;
            let start = starts[quark as usize];
            intervals.push(Interval::new(start, t - 1, quark, StateValue::Long(start)).unwrap());
            starts[quark as usize] = t;
        }
        for (quark, start) in starts.into_iter().enumerate() {
            intervals.push(Interval::new(start, last, quark as i32, StateValue::Long(start)).unwrap());
        }
        intervals
    }

    fn build(config: HtConfig, last: Timestamp) -> (HistoryTree, Vec<Interval>) {
        let tree = HistoryTree::create(config, 0).unwrap();
        let intervals = generate(last);
        for interval in &intervals {
            tree.insert(interval.clone()).unwrap();
        }
        (tree, intervals)
    }

    fn expected_at(intervals: &[Interval], quark: Quark, t: Timestamp) -> Option<Interval> {
        intervals
            .iter()
            .find(|i| i.quark() == quark && i.contains(t))
            .cloned()
    }

    #[test]
    fn test_tree_grows_in_depth() {
        let dir = TempDir::new().unwrap();
        let (tree, _) = build(small_config(&dir), 2_000);
        assert!(tree.depth() >= 3, "depth {}", tree.depth());
        assert!(tree.node_count() > 10);
        assert_eq!(tree.end_time(), 2_000);
    }

    #[test]
    fn test_point_queries_while_building() {
        let dir = TempDir::new().unwrap();
        let (tree, intervals) = build(small_config(&dir), 1_500);
        for t in (0..=1_500).step_by(37) {
            for quark in 0..QUARKS {
                assert_eq!(
                    tree.query_at(quark, t).unwrap(),
                    expected_at(&intervals, quark, t),
                    "quark {} at {}",
                    quark,
                    t
                );
            }
        }
    }

    #[test]
    fn test_full_state_and_2d() {
        let dir = TempDir::new().unwrap();
        let (tree, intervals) = build(small_config(&dir), 800);

        let mut full = tree.query_full_state(400).unwrap();
        full.sort_by_key(|i| i.quark());
        let quarks: Vec<_> = full.iter().map(|i| i.quark()).collect();
        assert_eq!(quarks, (0..QUARKS).collect::<Vec<_>>());

        let times = TimeRangeCondition::continuous(100, 200);
        let quarks = QuarkRangeCondition::discrete([1, 3]).unwrap();
        let mut found = tree
            .query_2d(&quarks, &times, &CancellationToken::new())
            .unwrap();
        let mut expected: Vec<_> = intervals
            .iter()
            .filter(|i| quarks.test(i.quark()) && i.intersects(&times))
            .cloned()
            .collect();
        found.sort_by_key(|i| (i.quark(), i.start()));
        expected.sort_by_key(|i| (i.quark(), i.start()));
        assert_eq!(found, expected);
    }

    #[test]
    fn test_close_and_reopen() {
        let dir = TempDir::new().unwrap();
        let config = small_config(&dir).with_provider_version(7);
        let (tree, intervals) = build(config.clone(), 1_000);
        let mut attributes = AttributeTree::new();
        attributes.quark_for("a/b").unwrap();
        tree.close(1_000, &attributes).unwrap();
        assert!(tree.is_closed());
        assert!(matches!(
            tree.insert(Interval::new(1_001, 1_002, 0, StateValue::Null).unwrap()),
            Err(StateError::StoreClosed)
        ));

        let (reopened, restored) = HistoryTree::open(config).unwrap();
        assert_eq!(restored.quark_for_optional("a/b"), Some(1));
        assert_eq!(reopened.end_time(), 1_000);
        assert_eq!(reopened.node_count(), tree.node_count());
        for t in (0..=1_000).step_by(13) {
            for quark in 0..QUARKS {
                assert_eq!(
                    reopened.query_at(quark, t).unwrap(),
                    expected_at(&intervals, quark, t)
                );
            }
        }
    }

    #[test]
    fn test_close_raises_end_time() {
        let dir = TempDir::new().unwrap();
        let (tree, _) = build(small_config(&dir), 100);
        tree.close(50, &AttributeTree::new()).unwrap();
        assert_eq!(tree.end_time(), 100);
        tree.close(200, &AttributeTree::new()).unwrap();
        assert_eq!(tree.end_time(), 100);
    }

    #[test]
    fn test_reopen_unclosed_file() {
        let dir = TempDir::new().unwrap();
        let config = small_config(&dir);
        let (_tree, _) = build(config.clone(), 300);
        let err = HistoryTree::open(config).unwrap_err();
        assert!(err.requires_rebuild(), "{err}");
    }

    #[test]
    fn test_reopen_wrong_provider_version() {
        let dir = TempDir::new().unwrap();
        let config = small_config(&dir).with_provider_version(1);
        let (tree, _) = build(config.clone(), 100);
        tree.close(100, &AttributeTree::new()).unwrap();

        let err = HistoryTree::open(config.clone().with_provider_version(2)).unwrap_err();
        assert!(matches!(
            err,
            StateError::ProviderVersionMismatch { expected: 2, actual: 1 }
        ));
        assert!(HistoryTree::open(config.with_provider_version(IGNORE_PROVIDER_VERSION)).is_ok());
    }

    #[test]
    fn test_corrupted_node_detected() {
        let dir = TempDir::new().unwrap();
        let config = small_config(&dir).with_cache_capacity(0);
        let (tree, _) = build(config.clone(), 500);
        tree.close(500, &AttributeTree::new()).unwrap();
        drop(tree);

        let mut bytes = fs::read(&config.path).unwrap();
        let offset = HEADER_SIZE as usize + 100;
        bytes[offset] ^= 0xFF;
        fs::write(&config.path, bytes).unwrap();

        let (reopened, _) = HistoryTree::open(config).unwrap();
        let err = (0..=500)
            .find_map(|t| reopened.query_at(0, t).err())
            .expect("damaged node 0 must be detected");
        assert!(err.requires_rebuild());
    }

    #[test]
    fn test_interval_too_large() {
        let dir = TempDir::new().unwrap();
        let tree = HistoryTree::create(small_config(&dir), 0).unwrap();
        let huge = Interval::new(0, 1, 0, StateValue::from("x".repeat(2_000))).unwrap();
        assert!(matches!(
            tree.insert(huge),
            Err(StateError::IntervalTooLarge { .. })
        ));
    }

    #[test]
    fn test_interval_before_start() {
        let dir = TempDir::new().unwrap();
        let tree = HistoryTree::create(small_config(&dir), 10).unwrap();
        let early = Interval::new(5, 20, 0, StateValue::Null).unwrap();
        assert!(matches!(
            tree.insert(early),
            Err(StateError::TimeRangeOutOfBounds { time: 5, .. })
        ));
    }

    #[test]
    fn test_open_end_is_not_storable() {
        let dir = TempDir::new().unwrap();
        let tree = HistoryTree::create(small_config(&dir), 0).unwrap();
        let forever = Interval::new(0, Timestamp::MAX, 0, StateValue::Null).unwrap();
        assert!(matches!(
            tree.insert(forever),
            Err(StateError::TimeRangeOutOfBounds { time: Timestamp::MAX, .. })
        ));
        assert_eq!(tree.end_time(), 0);
    }

    #[test]
    fn test_close_at_latest_storable_time() {
        let dir = TempDir::new().unwrap();
        let config = HtConfig::new(dir.path().join("latest.ht"))
            .with_block_size(512)
            .with_max_children(2);
        let tree = HistoryTree::create(config.clone(), 0).unwrap();
        let quarks = 200;
        for quark in 0..quarks {
            let first = Interval::new(0, quark as i64, quark, StateValue::Int(quark)).unwrap();
            tree.insert(first).unwrap();
        }
        // Every node split from here on happens at the latest storable time.
        for quark in 0..quarks {
            let last = Interval::new(quark as i64 + 1, LATEST_STORABLE_TIME, quark, StateValue::Null).unwrap();
            tree.insert(last).unwrap();
        }

        assert!(matches!(
            tree.close(Timestamp::MAX, &AttributeTree::new()),
            Err(StateError::TimeRangeOutOfBounds { time: Timestamp::MAX, .. })
        ));
        assert!(!tree.is_closed());
        tree.close(LATEST_STORABLE_TIME, &AttributeTree::new()).unwrap();

        let (reopened, _) = HistoryTree::open(config).unwrap();
        assert_eq!(reopened.end_time(), LATEST_STORABLE_TIME);
        for quark in (0..quarks).step_by(17) {
            let last = reopened.query_at(quark, LATEST_STORABLE_TIME).unwrap().unwrap();
            assert_eq!(last.start(), quark as i64 + 1);
            let first = reopened.query_at(quark, 0).unwrap().unwrap();
            assert_eq!(first.value(), &StateValue::Int(quark));
        }
    }

    #[test]
    fn test_reads_share_one_handle() {
        let dir = TempDir::new().unwrap();
        let config = small_config(&dir).with_cache_capacity(0);
        let (tree, intervals) = build(config.clone(), 600);
        tree.close(600, &AttributeTree::new()).unwrap();
        let tree = Arc::new(tree);

        let readers: Vec<_> = (0..QUARKS)
            .map(|quark| {
                let tree = Arc::clone(&tree);
                let intervals = intervals.clone();
                std::thread::spawn(move || {
                    for t in (0..=600).rev().step_by(7) {
                        assert_eq!(tree.query_at(quark, t).unwrap(), expected_at(&intervals, quark, t));
                    }
                })
            })
            .collect();
        for reader in readers {
            reader.join().unwrap();
        }
    }

    #[test]
    fn test_truncated_file_reports_corruption() {
        let dir = TempDir::new().unwrap();
        let config = small_config(&dir).with_cache_capacity(0);
        let (tree, _) = build(config.clone(), 300);
        tree.close(300, &AttributeTree::new()).unwrap();
        let (reopened, _) = HistoryTree::open(config.clone()).unwrap();

        let file = OpenOptions::new().write(true).open(&config.path).unwrap();
        file.set_len(HEADER_SIZE + config.block_size as u64 / 2).unwrap();
        let err = (0..=300)
            .find_map(|t| reopened.query_at(0, t).err())
            .expect("missing node must be detected");
        assert!(matches!(err, StateError::StoreCorrupted(_)), "{err}");
    }

    #[test]
    fn test_dispose_unfinished_removes_file() {
        let dir = TempDir::new().unwrap();
        let config = small_config(&dir);
        let (tree, _) = build(config.clone(), 100);
        assert!(config.path.exists());
        tree.dispose();
        assert!(!config.path.exists());
    }
}
