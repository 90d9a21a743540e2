//! Low-level binary codec shared by intervals, state values and tree nodes.
//!
//! Integers that are usually small (quarks, int/long state values, string
//! lengths) use a biased variable-length encoding:
//!
//! ```text
//! ┌──────────────┬─────────────────────────────────────┐
//! │ count: u8    │ count bytes of (value + OFFSET), LE │
//! └──────────────┴─────────────────────────────────────┘
//! count ∈ {0, 1, 2, 4, 8}
//! ```
//!
//! The bias makes `-2, -1, 0, 1, ...` map to the smallest unsigned values, so
//! the most common state values encode in one or two bytes. Fixed fields
//! such as interval start/end times are written as plain 8-byte
//! little-endian integers.

use crate::error::{Result, StateError};
use std::io::{Read, Write};

/// Bias added to every varint before encoding.
pub const VARINT_OFFSET: u64 = 2;

/// Maximum encoded length of a varint (header + 8 payload bytes).
pub const VARINT_MAX_LEN: usize = 9;

fn biased(value: i64) -> u64 {
    (value as u64).wrapping_add(VARINT_OFFSET)
}

fn payload_len(biased: u64) -> usize {
    match biased {
        0 => 0,
        1..=0xFF => 1,
        0x100..=0xFFFF => 2,
        0x1_0000..=0xFFFF_FFFF => 4,
        _ => 8,
    }
}

/// Returns the number of bytes [`write_varint`] produces for `value`.
pub fn encoded_len(value: i64) -> usize {
    1 + payload_len(biased(value))
}

/// Writes `value` using the biased varint encoding.
pub fn write_varint<W: Write>(writer: &mut W, value: i64) -> Result<()> {
    let biased = biased(value);
    let len = payload_len(biased);
    writer.write_all(&[len as u8])?;
    writer.write_all(&biased.to_le_bytes()[..len])?;
    Ok(())
}

/// Reads a value written by [`write_varint`].
///
/// # Errors
///
/// Returns `StateError::StoreCorrupted` if the byte-count header is not one
/// of the encodings the writer produces.
pub fn read_varint<R: Read>(reader: &mut R) -> Result<i64> {
    let mut header = [0u8; 1];
    reader.read_exact(&mut header)?;
    let len = header[0] as usize;
    if !matches!(len, 0 | 1 | 2 | 4 | 8) {
        return Err(StateError::StoreCorrupted(format!(
            "invalid varint byte count {}",
            len
        )));
    }

    let mut bytes = [0u8; 8];
    reader.read_exact(&mut bytes[..len])?;
    let biased = u64::from_le_bytes(bytes);
    Ok(biased.wrapping_sub(VARINT_OFFSET) as i64)
}

/// Writes an `i64` as 8 little-endian bytes.
pub fn write_i64<W: Write>(writer: &mut W, value: i64) -> Result<()> {
    writer.write_all(&value.to_le_bytes())?;
    Ok(())
}

/// Reads an `i64` written by [`write_i64`].
pub fn read_i64<R: Read>(reader: &mut R) -> Result<i64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    Ok(i64::from_le_bytes(buf))
}

/// Reads a little-endian `u16`.
pub fn read_u16<R: Read>(reader: &mut R) -> Result<u16> {
    let mut buf = [0u8; 2];
    reader.read_exact(&mut buf)?;
    Ok(u16::from_le_bytes(buf))
}

/// Reads a little-endian `u32`.
pub fn read_u32<R: Read>(reader: &mut R) -> Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

/// Reads a little-endian `i32`.
pub fn read_i32<R: Read>(reader: &mut R) -> Result<i32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(i32::from_le_bytes(buf))
}

/// Reads a little-endian `u64`.
pub fn read_u64<R: Read>(reader: &mut R) -> Result<u64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

/// Writes a varint length prefix followed by the raw bytes.
pub fn write_bytes<W: Write>(writer: &mut W, bytes: &[u8]) -> Result<()> {
    write_varint(writer, bytes.len() as i64)?;
    writer.write_all(bytes)?;
    Ok(())
}

/// Reads a byte string written by [`write_bytes`].
///
/// `limit` bounds the accepted length so a corrupted prefix cannot trigger
/// a huge allocation.
pub fn read_bytes<R: Read>(reader: &mut R, limit: usize) -> Result<Vec<u8>> {
    let len = read_varint(reader)?;
    if len < 0 || len as u64 > limit as u64 {
        return Err(StateError::StoreCorrupted(format!(
            "byte string length {} exceeds limit {}",
            len, limit
        )));
    }
    let mut bytes = vec![0u8; len as usize];
    reader.read_exact(&mut bytes)?;
    Ok(bytes)
}

/// Encoded size of a byte string written by [`write_bytes`].
pub fn bytes_len(bytes: &[u8]) -> usize {
    encoded_len(bytes.len() as i64) + bytes.len()
}

/// A record whose encoded size is known before it is written.
pub trait Encode {
    /// Exact number of bytes [`Encode::encode`] will append.
    fn size_on_disk(&self) -> usize;

    /// Appends the encoded record to `writer`.
    fn encode<W: Write>(&self, writer: &mut W) -> Result<()>;
}

/// Appends `record` to `buf` and checks the byte count against
/// [`Encode::size_on_disk`].
///
/// # Errors
///
/// Returns `StateError::EncodingInvariantViolation` when the sizes differ.
/// The buffer is truncated back to its previous length in that case so the
/// caller never keeps a half-written record.
pub fn encode_checked<E: Encode>(record: &E, buf: &mut Vec<u8>) -> Result<()> {
    let declared = record.size_on_disk();
    let before = buf.len();
    record.encode(buf)?;
    let actual = buf.len() - before;
    if actual != declared {
        buf.truncate(before);
        return Err(StateError::EncodingInvariantViolation { declared, actual });
    }
    Ok(())
}
