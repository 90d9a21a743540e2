//! Attribute namespace: bidirectional mapping between hierarchical paths and
//! quarks.
//!
//! Paths are sequences of segments, written as `CPUs/0/Current_thread` in
//! their string form. Quarks are handed out densely in allocation order,
//! starting at 0, and are never reused or renumbered. The namespace only
//! grows.
//!
//! The tree is persisted after the node section of a history file so a
//! reopened store reproduces the same numbering.

use crate::codec;
use crate::error::{Result, StateError};
use crate::interval::Quark;
use std::collections::HashMap;
use std::io::{Read, Write};

/// Quark of the (unnamed) root of the namespace.
pub const ROOT_QUARK: Quark = -1;

/// Separator between segments in the string form of a path.
pub const PATH_SEPARATOR: char = '/';

/// Pattern segment matching every direct child.
pub const WILDCARD: &str = "*";

/// Pattern segment moving to the parent attribute.
pub const PARENT: &str = "..";

/// Longest accepted segment name when reading a persisted tree.
const MAX_NAME_LEN: usize = 64 * 1024;

#[derive(Debug, Clone, Default)]
struct AttributeNode {
    name: String,
    parent: Quark,
    children: Vec<Quark>,
    by_name: HashMap<String, Quark>,
}

impl AttributeNode {
    fn new(name: String, parent: Quark) -> Self {
        Self {
            name,
            parent,
            children: Vec::new(),
            by_name: HashMap::new(),
        }
    }
}

/// Splits the string form of a path into its segments.
///
/// # Errors
///
/// Returns `StateError::InvalidAttributePath` if the path is empty or
/// contains an empty segment (`"a//b"`, `"/a"`, `"a/"`).
pub fn split_path(path: &str) -> Result<Vec<&str>> {
    let segments: Vec<&str> = path.split(PATH_SEPARATOR).collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(StateError::InvalidAttributePath(path.to_string()));
    }
    Ok(segments)
}

/// Path-to-quark mapping for one store.
#[derive(Debug, Clone)]
pub struct AttributeTree {
    root: AttributeNode,
    nodes: Vec<AttributeNode>,
}

impl Default for AttributeTree {
    fn default() -> Self {
        Self::new()
    }
}

impl AttributeTree {
    /// Creates an empty namespace.
    pub fn new() -> Self {
        Self {
            root: AttributeNode::new(String::new(), ROOT_QUARK),
            nodes: Vec::new(),
        }
    }

    /// Number of allocated quarks.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if no quark has been allocated.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Returns true if `quark` has been allocated.
    pub fn contains(&self, quark: Quark) -> bool {
        quark >= 0 && (quark as usize) < self.nodes.len()
    }

    fn node(&self, quark: Quark) -> Result<&AttributeNode> {
        if quark == ROOT_QUARK {
            return Ok(&self.root);
        }
        usize::try_from(quark)
            .ok()
            .and_then(|idx| self.nodes.get(idx))
            .ok_or(StateError::UnknownQuark(quark))
    }

    fn node_mut(&mut self, quark: Quark) -> Result<&mut AttributeNode> {
        if quark == ROOT_QUARK {
            return Ok(&mut self.root);
        }
        usize::try_from(quark)
            .ok()
            .and_then(|idx| self.nodes.get_mut(idx))
            .ok_or(StateError::UnknownQuark(quark))
    }

    /// Returns the quark for `path`, allocating it (and any missing parent)
    /// if needed.
    pub fn quark_for(&mut self, path: &str) -> Result<Quark> {
        let segments = split_path(path)?;
        self.quark_relative_and_add(ROOT_QUARK, &segments)
    }

    /// Returns the quark for `path` without allocating anything.
    ///
    /// Malformed paths are reported as not found.
    pub fn quark_for_optional(&self, path: &str) -> Option<Quark> {
        let segments = split_path(path).ok()?;
        self.quark_relative(ROOT_QUARK, &segments)
    }

    /// Looks up `segments` below `start` without allocating.
    pub fn quark_relative<S: AsRef<str>>(&self, start: Quark, segments: &[S]) -> Option<Quark> {
        let mut current = start;
        for segment in segments {
            current = *self.node(current).ok()?.by_name.get(segment.as_ref())?;
        }
        Some(current)
    }

    /// Looks up `segments` below `start`, allocating missing attributes.
    ///
    /// # Errors
    ///
    /// Returns `StateError::InvalidAttributePath` for an empty segment list or
    /// an empty segment, and `StateError::UnknownQuark` if `start` does not
    /// exist.
    pub fn quark_relative_and_add<S: AsRef<str>>(
        &mut self,
        start: Quark,
        segments: &[S],
    ) -> Result<Quark> {
        if segments.is_empty() || segments.iter().any(|s| s.as_ref().is_empty()) {
            let joined: Vec<&str> = segments.iter().map(|s| s.as_ref()).collect();
            return Err(StateError::InvalidAttributePath(joined.join("/")));
        }
        self.node(start)?;

        let mut current = start;
        for segment in segments {
            let name = segment.as_ref();
            current = match self.node(current)?.by_name.get(name) {
                Some(&child) => child,
                None => self.add_child(current, name)?,
            };
        }
        Ok(current)
    }

    fn add_child(&mut self, parent: Quark, name: &str) -> Result<Quark> {
        let quark = Quark::try_from(self.nodes.len())
            .map_err(|_| StateError::InvalidConfig("attribute namespace exhausted".into()))?;
        let parent_node = self.node_mut(parent)?;
        parent_node.children.push(quark);
        parent_node.by_name.insert(name.to_string(), quark);
        self.nodes.push(AttributeNode::new(name.to_string(), parent));
        Ok(quark)
    }

    /// Last segment of the attribute's path.
    pub fn name_of(&self, quark: Quark) -> Result<&str> {
        Ok(&self.node(quark)?.name)
    }

    /// Parent of `quark`; [`ROOT_QUARK`] for top-level attributes and the root.
    pub fn parent_of(&self, quark: Quark) -> Result<Quark> {
        Ok(self.node(quark)?.parent)
    }

    /// Full path of `quark`, segment by segment.
    pub fn path_segments(&self, quark: Quark) -> Result<Vec<String>> {
        let mut segments = Vec::new();
        let mut current = quark;
        while current != ROOT_QUARK {
            let node = self.node(current)?;
            segments.push(node.name.clone());
            current = node.parent;
        }
        segments.reverse();
        Ok(segments)
    }

    /// Full path of `quark` in string form.
    pub fn path_for(&self, quark: Quark) -> Result<String> {
        let separator = PATH_SEPARATOR.to_string();
        Ok(self.path_segments(quark)?.join(&separator))
    }

    /// Sub-attributes of `quark` in allocation order. With `recursive`, the
    /// whole subtree is returned depth-first.
    pub fn children_of(&self, quark: Quark, recursive: bool) -> Result<Vec<Quark>> {
        let node = self.node(quark)?;
        if !recursive {
            return Ok(node.children.clone());
        }

        let mut result = Vec::new();
        let mut stack: Vec<Quark> = node.children.iter().rev().copied().collect();
        while let Some(current) = stack.pop() {
            result.push(current);
            stack.extend(self.node(current)?.children.iter().rev().copied());
        }
        Ok(result)
    }

    /// Resolves a pattern below `start`. Each segment is a literal name,
    /// [`WILDCARD`] or [`PARENT`]. Missing literals simply match nothing.
    pub fn quarks_matching<S: AsRef<str>>(&self, start: Quark, pattern: &[S]) -> Vec<Quark> {
        let mut current = vec![start];
        for segment in pattern {
            let mut next = Vec::new();
            for quark in current {
                let Ok(node) = self.node(quark) else {
                    continue;
                };
                match segment.as_ref() {
                    WILDCARD => next.extend_from_slice(&node.children),
                    PARENT => next.push(node.parent),
                    name => next.extend(node.by_name.get(name).copied()),
                }
            }
            current = next;
        }

        let mut seen = std::collections::HashSet::new();
        current.retain(|q| seen.insert(*q));
        current
    }

    /// Serializes the tree.
    ///
    /// Format: count (u32 LE), then for every quark in order its parent
    /// (varint) and name (varint length + UTF-8), then a CRC32 of everything
    /// before it.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<usize> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(self.nodes.len() as u32).to_le_bytes());
        for node in &self.nodes {
            codec::write_varint(&mut buf, node.parent as i64)?;
            codec::write_bytes(&mut buf, node.name.as_bytes())?;
        }
        let crc = crc32fast::hash(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());
        writer.write_all(&buf)?;
        Ok(buf.len())
    }

    /// Reads a tree written by [`AttributeTree::write_to`].
    ///
    /// # Errors
    ///
    /// Returns `StateError::ChecksumMismatch` or `StateError::StoreCorrupted`
    /// if the section is damaged.
    pub fn read_from<R: Read>(reader: &mut R, len: usize) -> Result<Self> {
        if len < 8 {
            return Err(StateError::StoreCorrupted(format!(
                "attribute section too short: {} bytes",
                len
            )));
        }
        let mut buf = vec![0u8; len];
        reader.read_exact(&mut buf)?;

        let (body, crc_bytes) = buf.split_at(len - 4);
        let expected = u32::from_le_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);
        let actual = crc32fast::hash(body);
        if expected != actual {
            return Err(StateError::ChecksumMismatch { expected, actual });
        }

        let mut cursor = std::io::Cursor::new(body);
        let count = codec::read_u32(&mut cursor)? as usize;

        let mut tree = Self::new();
        for quark in 0..count {
            let parent = codec::read_varint(&mut cursor)?;
            let name = String::from_utf8(codec::read_bytes(&mut cursor, MAX_NAME_LEN)?)
                .map_err(|e| StateError::StoreCorrupted(format!("Invalid UTF-8 in attribute name: {}", e)))?;
            let parent = Quark::try_from(parent)
                .ok()
                .filter(|p| *p == ROOT_QUARK || (*p >= 0 && (*p as usize) < quark))
                .ok_or_else(|| {
                    StateError::StoreCorrupted(format!("attribute {} has invalid parent {}", quark, parent))
                })?;
            tree.add_child(parent, &name)?;
        }
        Ok(tree)
    }
}
