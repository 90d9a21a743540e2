//! In-memory backend: one sorted interval list per quark.

use super::StateHistoryBackend;
use crate::attribute::AttributeTree;
use crate::cancel::CancellationToken;
use crate::condition::{QuarkRangeCondition, TimeRangeCondition};
use crate::error::{Result, StateError};
use crate::interval::{Interval, Quark, Timestamp};
use crate::value::StateValue;
use std::sync::RwLock;
use tracing::debug;

#[derive(Debug, Default)]
struct Lists {
    per_quark: Vec<Vec<Interval>>,
    end_time: Timestamp,
    interval_count: usize,
    closed: bool,
}

impl Lists {
    fn list(&self, quark: Quark) -> &[Interval] {
        usize::try_from(quark)
            .ok()
            .and_then(|idx| self.per_quark.get(idx))
            .map_or(&[], Vec::as_slice)
    }
}

/// Keeps every interval in memory, bounded only by available RAM.
///
/// Intervals of a quark are stored in insertion order, which is also end
/// time order since they never overlap.
#[derive(Debug)]
pub struct InMemoryBackend {
    ssid: String,
    start_time: Timestamp,
    lists: RwLock<Lists>,
}

impl InMemoryBackend {
    /// Creates an empty backend starting at `start_time`.
    pub fn new(ssid: impl Into<String>, start_time: Timestamp) -> Self {
        Self {
            ssid: ssid.into(),
            start_time,
            lists: RwLock::new(Lists {
                end_time: start_time,
                ..Lists::default()
            }),
        }
    }

    /// Number of stored intervals.
    pub fn interval_count(&self) -> usize {
        self.lists
            .read()
            .unwrap_or_else(|err| err.into_inner())
            .interval_count
    }
}

/// Index of the first interval of `list` ending at or after `t`.
fn first_ending_at_or_after(list: &[Interval], t: Timestamp) -> usize {
    list.partition_point(|interval| interval.end() < t)
}

impl StateHistoryBackend for InMemoryBackend {
    fn ssid(&self) -> &str {
        &self.ssid
    }

    fn start_time(&self) -> Timestamp {
        self.start_time
    }

    fn end_time(&self) -> Timestamp {
        self.lists
            .read()
            .unwrap_or_else(|err| err.into_inner())
            .end_time
    }

    fn insert_past_state(
        &self,
        start: Timestamp,
        end: Timestamp,
        quark: Quark,
        value: StateValue,
    ) -> Result<()> {
        let interval = Interval::new(start, end, quark, value)?;
        let idx = usize::try_from(quark).map_err(|_| StateError::UnknownQuark(quark))?;

        let mut lists = self.lists.write().unwrap_or_else(|err| err.into_inner());
        if lists.closed {
            return Err(StateError::StoreClosed);
        }
        if lists.per_quark.len() <= idx {
            lists.per_quark.resize_with(idx + 1, Vec::new);
        }
        if let Some(previous) = lists.per_quark[idx].last() {
            if previous.end() >= start {
                return Err(StateError::IntervalOverlap {
                    quark,
                    start,
                    end,
                    previous_end: previous.end(),
                });
            }
        }

        lists.per_quark[idx].push(interval);
        lists.interval_count += 1;
        lists.end_time = lists.end_time.max(end);
        Ok(())
    }

    fn finished_building(&self, end_time: Timestamp, _attributes: &AttributeTree) -> Result<()> {
        let mut lists = self.lists.write().unwrap_or_else(|err| err.into_inner());
        lists.end_time = lists.end_time.max(end_time);
        lists.closed = true;
        debug!(
            ssid = %self.ssid,
            intervals = lists.interval_count,
            end_time = lists.end_time,
            "In-memory history closed"
        );
        Ok(())
    }

    fn query_at(&self, quark: Quark, t: Timestamp) -> Result<Option<Interval>> {
        let lists = self.lists.read().unwrap_or_else(|err| err.into_inner());
        let list = lists.list(quark);
        let idx = first_ending_at_or_after(list, t);
        Ok(list.get(idx).filter(|interval| interval.contains(t)).cloned())
    }

    fn query_full_state(&self, t: Timestamp) -> Result<Vec<Interval>> {
        let lists = self.lists.read().unwrap_or_else(|err| err.into_inner());
        let result = lists
            .per_quark
            .iter()
            .filter_map(|list| {
                let idx = first_ending_at_or_after(list, t);
                list.get(idx).filter(|interval| interval.contains(t)).cloned()
            })
            .collect();
        Ok(result)
    }

    fn query_2d(
        &self,
        quarks: &QuarkRangeCondition,
        times: &TimeRangeCondition,
        cancel: &CancellationToken,
    ) -> Result<Vec<Interval>> {
        let lists = self.lists.read().unwrap_or_else(|err| err.into_inner());
        let max_quark = lists.per_quark.len() as Quark - 1;
        let Some(quarks) = quarks.sub_condition(0, max_quark) else {
            return Ok(Vec::new());
        };

        let mut result = Vec::new();
        for quark in quarks.min()..=quarks.max() {
            if !quarks.test(quark) {
                continue;
            }
            cancel.check()?;
            let list = lists.list(quark);
            let first = first_ending_at_or_after(list, times.min());
            result.extend(
                list[first..]
                    .iter()
                    .take_while(|interval| interval.start() <= times.max())
                    .filter(|interval| interval.intersects(times))
                    .cloned(),
            );
        }
        Ok(result)
    }

    fn remove_files(&self) -> Result<()> {
        Ok(())
    }

    fn dispose(&self) {
        let mut lists = self.lists.write().unwrap_or_else(|err| err.into_inner());
        lists.per_quark.clear();
        lists.interval_count = 0;
    }
}
