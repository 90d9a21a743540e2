//! Error and Result types for state history operations.

use crate::interval::{Quark, Timestamp};
use std::io;
use thiserror::Error;

/// A convenience `Result` type for state history operations.
pub type Result<T> = std::result::Result<T, StateError>;

/// The error type for state history operations.
#[derive(Debug, Error)]
pub enum StateError {
    /// No attribute exists at the requested path.
    #[error("Attribute not found: {0}")]
    AttributeNotFound(String),

    /// Attribute path contains an empty segment or no segment at all.
    #[error("Invalid attribute path: {0:?}")]
    InvalidAttributePath(String),

    /// Quark was never allocated by the attribute tree.
    #[error("Unknown quark: {0}")]
    UnknownQuark(Quark),

    /// Query time lies outside the range covered by the store.
    #[error("Time {time} outside of store range [{start}, {end}]")]
    TimeRangeOutOfBounds {
        /// Requested timestamp.
        time: Timestamp,
        /// Start of the store.
        start: Timestamp,
        /// Current end of the store.
        end: Timestamp,
    },

    /// Writer supplied a timestamp older than the latest accepted one.
    #[error("Ordering violation: update at {time} is older than latest time {latest}")]
    OrderingViolation {
        /// Rejected timestamp.
        time: Timestamp,
        /// Latest timestamp accepted so far.
        latest: Timestamp,
    },

    /// A record wrote a different number of bytes than it declared.
    #[error("Encoding invariant violated: declared {declared} bytes, wrote {actual}")]
    EncodingInvariantViolation {
        /// Size returned by `size_on_disk`.
        declared: usize,
        /// Bytes actually produced by the encoder.
        actual: usize,
    },

    /// Persisted store is inconsistent and must be rebuilt from source events.
    #[error("Store corrupted: {0}")]
    StoreCorrupted(String),

    /// Invalid magic bytes in the history file header.
    #[error("Invalid magic bytes: expected ASHT, got {0:?}")]
    InvalidMagic([u8; 4]),

    /// Unsupported history file format version.
    #[error("Unsupported version: {0}")]
    UnsupportedVersion(u16),

    /// History file was built by a different version of the state provider.
    #[error("Provider version mismatch: expected {expected}, file has {actual}")]
    ProviderVersionMismatch {
        /// Version requested by the caller.
        expected: i32,
        /// Version stored in the file.
        actual: i32,
    },

    /// Checksum does not match the stored value.
    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// Stored CRC32 checksum.
        expected: u32,
        /// Computed CRC32 checksum.
        actual: u32,
    },

    /// Interval has its end before its start.
    #[error("Invalid interval: start {start} is after end {end}")]
    InvalidInterval {
        /// Interval start.
        start: Timestamp,
        /// Interval end.
        end: Timestamp,
    },

    /// Inserted interval overlaps an interval already stored for the quark.
    #[error("Interval [{start}, {end}] overlaps stored data for quark {quark} ending at {previous_end}")]
    IntervalOverlap {
        /// Attribute of the rejected interval.
        quark: Quark,
        /// Start of the rejected interval.
        start: Timestamp,
        /// End of the rejected interval.
        end: Timestamp,
        /// End of the last interval stored for that quark.
        previous_end: Timestamp,
    },

    /// Encoded interval cannot fit even in an empty node.
    #[error("Interval of {size} bytes does not fit in a node with {capacity} bytes of payload")]
    IntervalTooLarge {
        /// Encoded size of the interval.
        size: usize,
        /// Payload capacity of an empty node.
        capacity: usize,
    },

    /// Quark already holds values of another type.
    #[error("State value type mismatch on quark {quark}: expected {expected}, got {actual}")]
    StateValueTypeMismatch {
        /// Attribute being modified.
        quark: Quark,
        /// Type already stored on the attribute.
        expected: &'static str,
        /// Type of the rejected value.
        actual: &'static str,
    },

    /// Stack attribute reached its maximum depth.
    #[error("Stack limit reached on quark {0}")]
    StackOverflow(Quark),

    /// Write attempted on a store that is no longer building.
    #[error("Store is closed for writing")]
    StoreClosed,

    /// Store resources were released.
    #[error("State system has been disposed")]
    Disposed,

    /// Operation was abandoned through its cancellation token.
    #[error("Operation cancelled")]
    Cancelled,

    /// Configuration cannot produce a usable store.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
}

impl StateError {
    /// Returns true if the persisted store cannot be trusted and must be
    /// rebuilt from the source events.
    pub fn requires_rebuild(&self) -> bool {
        matches!(
            self,
            Self::StoreCorrupted(_)
                | Self::InvalidMagic(_)
                | Self::UnsupportedVersion(_)
                | Self::ProviderVersionMismatch { .. }
                | Self::ChecksumMismatch { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requires_rebuild() {
        assert!(StateError::StoreCorrupted("bad offset".into()).requires_rebuild());
        assert!(StateError::InvalidMagic(*b"XXXX").requires_rebuild());
        assert!(StateError::ChecksumMismatch { expected: 1, actual: 2 }.requires_rebuild());
        assert!(!StateError::AttributeNotFound("a/b".into()).requires_rebuild());
        assert!(!StateError::TimeRangeOutOfBounds { time: -1, start: 0, end: 10 }.requires_rebuild());
    }

    #[test]
    fn test_display() {
        let err = StateError::OrderingViolation { time: 5, latest: 10 };
        assert_eq!(
            err.to_string(),
            "Ordering violation: update at 5 is older than latest time 10"
        );
    }
}
