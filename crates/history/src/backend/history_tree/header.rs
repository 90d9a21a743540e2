//! History file header.
//!
//! ```text
//! Offset  Size    Field
//! ------  ----    -----
//! 0x00    4       magic "ASHT"
//! 0x04    2       format version (u16)
//! 0x06    4       provider version (i32)
//! 0x0A    4       block size (u32)
//! 0x0E    4       max children (u32)
//! 0x12    4       node count (u32)
//! 0x16    4       root sequence number (u32)
//! 0x1A    8       start time (i64)
//! 0x22    8       end time (i64)
//! 0x2A    8       attribute tree offset (u64)
//! 0x32    4       attribute tree length (u32)
//! 0x36    4       CRC32 of bytes 0x00..0x36
//! 0x3A    1       closed marker
//! ```
//!
//! The rest of the 4096-byte header block is zero. The closed marker is
//! written and synced after everything else, so a file abandoned half-way
//! through closing is never mistaken for a valid history.

use crate::codec;
use crate::error::{Result, StateError};
use crate::interval::Timestamp;
use std::io::{Cursor, Read, Write};

/// Magic bytes at the start of every history file.
pub const HT_MAGIC: [u8; 4] = *b"ASHT";

/// Current history file format version.
pub const HT_VERSION: u16 = 1;

/// Size of the header block. Nodes start right after it.
pub const HEADER_SIZE: u64 = 4096;

/// Number of bytes covered by the header checksum.
const CHECKSUMMED_LEN: usize = 0x36;

/// Offset of the closed marker byte.
pub const CLOSED_MARKER_OFFSET: u64 = 0x3A;

/// Value of the closed marker once the file is complete.
pub const CLOSED_MARKER: u8 = 0xC1;

/// Metadata stored at the start of a history file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeHeader {
    /// Version of the analysis that built the file.
    pub provider_version: i32,
    /// Size of every node.
    pub block_size: u32,
    /// Maximum number of children of a core node.
    pub max_children: u32,
    /// Number of nodes in the file.
    pub node_count: u32,
    /// Sequence number of the root node.
    pub root_seq: u32,
    /// Start time of the tree.
    pub start_time: Timestamp,
    /// End time of the tree.
    pub end_time: Timestamp,
    /// Offset of the serialized attribute tree.
    pub attribute_offset: u64,
    /// Length of the serialized attribute tree.
    pub attribute_len: u32,
}

impl TreeHeader {
    fn checksummed_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(CHECKSUMMED_LEN);
        buf.extend_from_slice(&HT_MAGIC);
        buf.extend_from_slice(&HT_VERSION.to_le_bytes());
        buf.extend_from_slice(&self.provider_version.to_le_bytes());
        buf.extend_from_slice(&self.block_size.to_le_bytes());
        buf.extend_from_slice(&self.max_children.to_le_bytes());
        buf.extend_from_slice(&self.node_count.to_le_bytes());
        buf.extend_from_slice(&self.root_seq.to_le_bytes());
        buf.extend_from_slice(&self.start_time.to_le_bytes());
        buf.extend_from_slice(&self.end_time.to_le_bytes());
        buf.extend_from_slice(&self.attribute_offset.to_le_bytes());
        buf.extend_from_slice(&self.attribute_len.to_le_bytes());
        buf
    }

    /// Writes the header fields and checksum, without the closed marker.
    ///
    /// # Errors
    ///
    /// Returns an error if writing fails.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        let buf = self.checksummed_bytes();
        writer.write_all(&buf)?;
        writer.write_all(&crc32fast::hash(&buf).to_le_bytes())?;
        Ok(())
    }

    /// Reads and validates a header, including the closed marker.
    ///
    /// # Errors
    ///
    /// - `StateError::InvalidMagic` if this is not a history file
    /// - `StateError::UnsupportedVersion` for any other format version
    /// - `StateError::StoreCorrupted` if the file was never closed
    /// - `StateError::ChecksumMismatch` if the header is damaged
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let mut buf = [0u8; CLOSED_MARKER_OFFSET as usize + 1];
        reader.read_exact(&mut buf)?;

        let mut magic = [0u8; 4];
        magic.copy_from_slice(&buf[0..4]);
        if magic != HT_MAGIC {
            return Err(StateError::InvalidMagic(magic));
        }

        let mut cursor = Cursor::new(&buf[4..CHECKSUMMED_LEN + 4]);
        let version = codec::read_u16(&mut cursor)?;
        if version != HT_VERSION {
            return Err(StateError::UnsupportedVersion(version));
        }

        if buf[CLOSED_MARKER_OFFSET as usize] != CLOSED_MARKER {
            return Err(StateError::StoreCorrupted(
                "history file was not closed".into(),
            ));
        }

        let header = Self {
            provider_version: codec::read_i32(&mut cursor)?,
            block_size: codec::read_u32(&mut cursor)?,
            max_children: codec::read_u32(&mut cursor)?,
            node_count: codec::read_u32(&mut cursor)?,
            root_seq: codec::read_u32(&mut cursor)?,
            start_time: codec::read_i64(&mut cursor)?,
            end_time: codec::read_i64(&mut cursor)?,
            attribute_offset: codec::read_u64(&mut cursor)?,
            attribute_len: codec::read_u32(&mut cursor)?,
        };
        let expected = codec::read_u32(&mut cursor)?;
        let actual = crc32fast::hash(&buf[..CHECKSUMMED_LEN]);
        if expected != actual {
            return Err(StateError::ChecksumMismatch { expected, actual });
        }

        Ok(header)
    }
}
