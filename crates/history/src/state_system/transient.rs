//! Transient state: the still-open interval of every quark.
//!
//! Each quark has an ongoing value and the time it started. A state change
//! closes the ongoing interval, hands it to the backend and opens a new one.
//! The backend insert happens under the same write lock that moves the
//! ongoing start forward, so a reader never sees a time that is neither
//! ongoing nor stored.

use crate::backend::{Backend, StateHistoryBackend};
use crate::condition::TimeRangeCondition;
use crate::error::{Result, StateError};
use crate::interval::{Interval, Quark, Timestamp};
use crate::value::StateValue;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::RwLock;

#[derive(Debug, Default)]
struct Ongoing {
    values: Vec<StateValue>,
    starts: Vec<Timestamp>,
    types: Vec<Option<&'static str>>,
}

impl Ongoing {
    fn index(&self, quark: Quark) -> Result<usize> {
        usize::try_from(quark)
            .ok()
            .filter(|idx| *idx < self.values.len())
            .ok_or(StateError::UnknownQuark(quark))
    }
}

/// Open intervals of a store that is still being built.
#[derive(Debug)]
pub struct TransientState {
    start_time: Timestamp,
    inner: RwLock<Ongoing>,
    latest_time: AtomicI64,
    active: AtomicBool,
}

impl TransientState {
    /// Creates an active, empty transient state.
    pub fn new(start_time: Timestamp) -> Self {
        Self {
            start_time,
            inner: RwLock::new(Ongoing::default()),
            latest_time: AtomicI64::new(start_time),
            active: AtomicBool::new(true),
        }
    }

    /// Returns true while the store accepts state changes.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Stops accepting changes without closing intervals.
    pub fn set_inactive(&self) {
        self.active.store(false, Ordering::Release);
    }

    /// Latest timestamp passed to a state change.
    pub fn latest_time(&self) -> Timestamp {
        self.latest_time.load(Ordering::Acquire)
    }

    /// Number of tracked quarks.
    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(|err| err.into_inner()).values.len()
    }

    /// Returns true if no quark is tracked.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Tracks a newly allocated quark: null since the store start.
    pub fn add_empty_entry(&self) {
        let mut inner = self.inner.write().unwrap_or_else(|err| err.into_inner());
        inner.values.push(StateValue::Null);
        inner.starts.push(self.start_time);
        inner.types.push(None);
    }

    /// Ongoing value of `quark`.
    pub fn ongoing_value(&self, quark: Quark) -> Result<StateValue> {
        let inner = self.inner.read().unwrap_or_else(|err| err.into_inner());
        let idx = inner.index(quark)?;
        Ok(inner.values[idx].clone())
    }

    /// Start time of the ongoing interval of `quark`.
    pub fn ongoing_start(&self, quark: Quark) -> Result<Timestamp> {
        let inner = self.inner.read().unwrap_or_else(|err| err.into_inner());
        let idx = inner.index(quark)?;
        Ok(inner.starts[idx])
    }

    /// Replaces the ongoing value without closing an interval.
    pub fn change_ongoing_value(&self, quark: Quark, value: StateValue) -> Result<()> {
        let mut inner = self.inner.write().unwrap_or_else(|err| err.into_inner());
        let idx = inner.index(quark)?;
        inner.values[idx] = value;
        Ok(())
    }

    fn ongoing_interval(&self, inner: &Ongoing, idx: usize) -> Option<Interval> {
        Interval::new(
            inner.starts[idx],
            self.latest_time().max(inner.starts[idx]),
            idx as Quark,
            inner.values[idx].clone(),
        )
        .ok()
    }

    /// The ongoing interval of `quark` if it covers `t`.
    ///
    /// The interval is reported as ending at the latest time.
    pub fn interval_at(&self, t: Timestamp, quark: Quark) -> Option<Interval> {
        if !self.is_active() {
            return None;
        }
        let inner = self.inner.read().unwrap_or_else(|err| err.into_inner());
        let idx = inner.index(quark).ok()?;
        if t < inner.starts[idx] {
            return None;
        }
        self.ongoing_interval(&inner, idx)
    }

    /// Fills `state[quark]` with the ongoing interval of every quark covering
    /// `t`.
    pub fn fill_full_state(&self, t: Timestamp, state: &mut [Option<Interval>]) {
        if !self.is_active() {
            return;
        }
        let inner = self.inner.read().unwrap_or_else(|err| err.into_inner());
        for (idx, slot) in state.iter_mut().enumerate().take(inner.values.len()) {
            if t >= inner.starts[idx] {
                *slot = self.ongoing_interval(&inner, idx);
            }
        }
    }

    /// Ongoing intervals of `quarks` intersecting `times`.
    pub fn query_2d(&self, quarks: &[Quark], times: &TimeRangeCondition) -> Vec<Interval> {
        if !self.is_active() {
            return Vec::new();
        }
        let inner = self.inner.read().unwrap_or_else(|err| err.into_inner());
        quarks
            .iter()
            .filter_map(|quark| inner.index(*quark).ok())
            .filter_map(|idx| self.ongoing_interval(&inner, idx))
            .filter(|interval| interval.intersects(times))
            .collect()
    }

    /// Applies a state change at `t`.
    ///
    /// # Errors
    ///
    /// - `StateError::StoreClosed` once the transient state is inactive
    /// - `StateError::OrderingViolation` if `t` is older than the latest time
    /// - `StateError::StateValueTypeMismatch` if the quark already holds
    ///   another non-null type
    /// - any error from the backend insert, in which case nothing changes
    pub fn process_state_change(
        &self,
        t: Timestamp,
        value: StateValue,
        quark: Quark,
        backend: &Backend,
    ) -> Result<()> {
        if !self.is_active() {
            return Err(StateError::StoreClosed);
        }
        let mut inner = self.inner.write().unwrap_or_else(|err| err.into_inner());
        let latest = self.latest_time();
        if t < latest {
            return Err(StateError::OrderingViolation { time: t, latest });
        }
        let idx = inner.index(quark)?;

        let value_type = (!value.is_null()).then(|| value.type_name());
        if let (Some(expected), Some(actual)) = (inner.types[idx], value_type) {
            if expected != actual {
                return Err(StateError::StateValueTypeMismatch {
                    quark,
                    expected,
                    actual,
                });
            }
        }

        if inner.values[idx] != value {
            if inner.starts[idx] < t {
                backend.insert_past_state(inner.starts[idx], t - 1, quark, inner.values[idx].clone())?;
                inner.starts[idx] = t;
            }
            inner.values[idx] = value;
        }
        if inner.types[idx].is_none() {
            inner.types[idx] = value_type;
        }
        self.latest_time.store(t, Ordering::Release);
        Ok(())
    }

    /// Closes every ongoing interval at `end_time` and deactivates.
    ///
    /// Quarks whose ongoing interval starts after `end_time` are dropped.
    pub fn close(&self, end_time: Timestamp, backend: &Backend) -> Result<()> {
        if !self.is_active() {
            return Ok(());
        }
        let mut inner = self.inner.write().unwrap_or_else(|err| err.into_inner());
        for idx in 0..inner.values.len() {
            let start = inner.starts[idx];
            if start > end_time {
                continue;
            }
            let value = std::mem::take(&mut inner.values[idx]);
            backend.insert_past_state(start, end_time, idx as Quark, value)?;
        }
        inner.values.clear();
        inner.starts.clear();
        self.latest_time.fetch_max(end_time, Ordering::AcqRel);
        self.set_inactive();
        Ok(())
    }
}
