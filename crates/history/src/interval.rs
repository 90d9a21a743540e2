//! Intervals: immutable facts of the form "attribute Q held value V during
//! `[start, end]`".
//!
//! ## Binary Layout
//!
//! ```text
//! Offset  Size    Field
//! ------  ----    -----
//! 0x00    8       start (i64 LE)
//! 0x08    8       end (i64 LE)
//! 0x10    1..9    quark (varint)
//! ...     1..N    value (tagged, see `value` module)
//! ```

use crate::codec::{self, Encode};
use crate::condition::TimeRangeCondition;
use crate::error::{Result, StateError};
use crate::value::StateValue;
use std::cmp::Ordering;
use std::fmt;
use std::io::{Read, Write};

/// Timestamp type (trace time units, typically nanoseconds).
pub type Timestamp = i64;

/// Dense integer identifier of an attribute path.
pub type Quark = i32;

/// An attribute held `value` from `start` to `end`, both inclusive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interval {
    start: Timestamp,
    end: Timestamp,
    quark: Quark,
    value: StateValue,
}

impl Interval {
    /// Creates a new interval.
    ///
    /// # Errors
    ///
    /// Returns `StateError::InvalidInterval` if `start > end`.
    pub fn new(start: Timestamp, end: Timestamp, quark: Quark, value: StateValue) -> Result<Self> {
        if start > end {
            return Err(StateError::InvalidInterval { start, end });
        }
        Ok(Self {
            start,
            end,
            quark,
            value,
        })
    }

    /// Start time (inclusive).
    pub fn start(&self) -> Timestamp {
        self.start
    }

    /// End time (inclusive).
    pub fn end(&self) -> Timestamp {
        self.end
    }

    /// Attribute this interval belongs to.
    pub fn quark(&self) -> Quark {
        self.quark
    }

    /// Value held during the interval.
    pub fn value(&self) -> &StateValue {
        &self.value
    }

    /// Consumes the interval and returns its value.
    pub fn into_value(self) -> StateValue {
        self.value
    }

    /// Returns true if `t` lies within `[start, end]`.
    pub fn contains(&self, t: Timestamp) -> bool {
        self.start <= t && t <= self.end
    }

    /// Returns true if the interval intersects the time condition.
    pub fn intersects(&self, condition: &TimeRangeCondition) -> bool {
        condition.intersects(self.start, self.end)
    }

    /// Reads an interval written by [`Encode::encode`].
    ///
    /// # Errors
    ///
    /// Returns `StateError::StoreCorrupted` if the decoded fields are not a
    /// valid interval.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let start = codec::read_i64(reader)?;
        let end = codec::read_i64(reader)?;
        let raw_quark = codec::read_varint(reader)?;
        let quark = Quark::try_from(raw_quark)
            .ok()
            .filter(|q| *q >= 0)
            .ok_or_else(|| StateError::StoreCorrupted(format!("invalid quark {}", raw_quark)))?;
        let value = StateValue::read_from(reader)?;

        if start > end {
            return Err(StateError::StoreCorrupted(format!(
                "interval start {} after end {}",
                start, end
            )));
        }
        Ok(Self {
            start,
            end,
            quark,
            value,
        })
    }

    /// Ordering used inside tree nodes: by end time, then start time.
    pub(crate) fn node_order(&self, other: &Self) -> Ordering {
        self.end
            .cmp(&other.end)
            .then_with(|| self.start.cmp(&other.start))
    }
}

impl Encode for Interval {
    fn size_on_disk(&self) -> usize {
        16 + codec::encoded_len(self.quark as i64) + self.value.size_on_disk()
    }

    fn encode<W: Write>(&self, writer: &mut W) -> Result<()> {
        codec::write_i64(writer, self.start)?;
        codec::write_i64(writer, self.end)?;
        codec::write_varint(writer, self.quark as i64)?;
        self.value.encode(writer)
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {}], attribute = {}, value = {}",
            self.start, self.end, self.quark, self.value
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::encode_checked;
    use std::io::Cursor;

    #[test]
    fn test_new_rejects_reversed_bounds() {
        let result = Interval::new(10, 5, 0, StateValue::Null);
        assert!(matches!(result, Err(StateError::InvalidInterval { start: 10, end: 5 })));
        assert!(Interval::new(5, 5, 0, StateValue::Null).is_ok());
    }

    #[test]
    fn test_roundtrip_and_size() {
        let interval = Interval::new(-5, 1_000_000, 12, StateValue::from("running")).unwrap();
        let mut buf = Vec::new();
        encode_checked(&interval, &mut buf).unwrap();
        assert_eq!(buf.len(), interval.size_on_disk());

        let decoded = Interval::read_from(&mut Cursor::new(buf)).unwrap();
        assert_eq!(decoded, interval);
    }

    #[test]
    fn test_contains_is_inclusive() {
        let interval = Interval::new(0, 9, 1, StateValue::Int(1)).unwrap();
        assert!(interval.contains(0));
        assert!(interval.contains(9));
        assert!(!interval.contains(10));
        assert!(!interval.contains(-1));
    }

    #[test]
    fn test_intersects_condition() {
        let interval = Interval::new(10, 19, 1, StateValue::Null).unwrap();
        assert!(interval.intersects(&TimeRangeCondition::continuous(15, 30)));
        assert!(!interval.intersects(&TimeRangeCondition::continuous(20, 30)));
        assert!(interval.intersects(&TimeRangeCondition::discrete([3, 19, 40]).unwrap()));
        assert!(!interval.intersects(&TimeRangeCondition::discrete([3, 9, 40]).unwrap()));
    }

    #[test]
    fn test_corrupted_bounds() {
        let mut buf = Vec::new();
        codec::write_i64(&mut buf, 10).unwrap();
        codec::write_i64(&mut buf, 5).unwrap();
        codec::write_varint(&mut buf, 0).unwrap();
        StateValue::Null.encode(&mut buf).unwrap();
        let result = Interval::read_from(&mut Cursor::new(buf));
        assert!(matches!(result, Err(StateError::StoreCorrupted(_))));
    }

    #[test]
    fn test_node_order() {
        let a = Interval::new(0, 5, 0, StateValue::Null).unwrap();
        let b = Interval::new(3, 5, 1, StateValue::Null).unwrap();
        let c = Interval::new(0, 6, 2, StateValue::Null).unwrap();
        assert_eq!(a.node_order(&b), Ordering::Less);
        assert_eq!(b.node_order(&c), Ordering::Less);
    }
}
