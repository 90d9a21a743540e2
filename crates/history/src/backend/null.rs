//! Backend that discards every interval.
//!
//! Useful when only the ongoing state matters, for example to count state
//! changes without paying for storage.

use super::StateHistoryBackend;
use crate::attribute::AttributeTree;
use crate::cancel::CancellationToken;
use crate::condition::{QuarkRangeCondition, TimeRangeCondition};
use crate::error::Result;
use crate::interval::{Interval, Quark, Timestamp};
use crate::value::StateValue;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Accepts writes, answers no queries.
#[derive(Debug)]
pub struct NullBackend {
    ssid: String,
    start_time: Timestamp,
    end_time: AtomicI64,
    inserted: AtomicU64,
}

impl NullBackend {
    /// Creates a backend starting at `start_time`.
    pub fn new(ssid: impl Into<String>, start_time: Timestamp) -> Self {
        Self {
            ssid: ssid.into(),
            start_time,
            end_time: AtomicI64::new(start_time),
            inserted: AtomicU64::new(0),
        }
    }

    /// Number of intervals received and dropped.
    pub fn inserted_count(&self) -> u64 {
        self.inserted.load(Ordering::Relaxed)
    }
}

impl StateHistoryBackend for NullBackend {
    fn ssid(&self) -> &str {
        &self.ssid
    }

    fn start_time(&self) -> Timestamp {
        self.start_time
    }

    fn end_time(&self) -> Timestamp {
        self.end_time.load(Ordering::Acquire)
    }

    fn insert_past_state(
        &self,
        start: Timestamp,
        end: Timestamp,
        quark: Quark,
        value: StateValue,
    ) -> Result<()> {
        Interval::new(start, end, quark, value)?;
        self.inserted.fetch_add(1, Ordering::Relaxed);
        self.end_time.fetch_max(end, Ordering::AcqRel);
        Ok(())
    }

    fn finished_building(&self, end_time: Timestamp, _attributes: &AttributeTree) -> Result<()> {
        self.end_time.fetch_max(end_time, Ordering::AcqRel);
        Ok(())
    }

    fn query_at(&self, _quark: Quark, _t: Timestamp) -> Result<Option<Interval>> {
        Ok(None)
    }

    fn query_full_state(&self, _t: Timestamp) -> Result<Vec<Interval>> {
        Ok(Vec::new())
    }

    fn query_2d(
        &self,
        _quarks: &QuarkRangeCondition,
        _times: &TimeRangeCondition,
        _cancel: &CancellationToken,
    ) -> Result<Vec<Interval>> {
        Ok(Vec::new())
    }

    fn remove_files(&self) -> Result<()> {
        Ok(())
    }

    fn dispose(&self) {}
}
