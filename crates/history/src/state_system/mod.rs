//! The state system: attribute namespace, transient state and backend behind
//! one build-and-query API.
//!
//! ```text
//!   writer thread                       reader threads
//!        │                                    │
//!   modify_attribute(t, v, q)          query_at / query_range / query_2d
//!        │                                    │
//!        ▼                                    ▼
//! ┌──────────────────┐  closed interval  ┌──────────────────┐
//! │  TransientState  │ ────────────────► │     Backend      │
//! │  (open intervals)│                   │ (closed history) │
//! └──────────────────┘                   └──────────────────┘
//! ```
//!
//! A store is `Building` until [`StateSystem::close_history`] closes every
//! open interval and hands the attribute tree to the backend. Queries are
//! answered in both states: while building, an open interval is reported as
//! ending at the current end time.

mod transient;

pub use transient::TransientState;

use crate::attribute::{AttributeTree, ROOT_QUARK};
use crate::backend::{
    Backend, HistoryTreeBackend, InMemoryBackend, NullBackend, StateHistoryBackend,
};
use crate::cancel::CancellationToken;
use crate::condition::{QuarkRangeCondition, TimeRangeCondition};
use crate::config::{BackendKind, StoreConfig};
use crate::error::{Result, StateError};
use crate::interval::{Interval, Quark, Timestamp};
use crate::value::StateValue;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, RwLock, RwLockReadGuard};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Maximum depth of a stack attribute.
pub const MAX_STACK_DEPTH: i32 = 100_000;

/// Poll interval of [`StateSystem::wait_until_built_cancellable`].
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Attribute-indexed interval history store.
///
/// Every method takes `&self`: one writer thread drives the build while any
/// number of threads query concurrently.
///
/// # Examples
/// ```rust,ignore
/// use alopex_history::{StateSystem, StoreConfig};
///
/// let ss = StateSystem::new(StoreConfig::in_memory("kernel"))?;
/// let quark = ss.quark_for("CPUs/0/Current_thread")?;
/// ss.modify_attribute(10, 42, quark)?;
/// ss.close_history(100)?;
///
/// let interval = ss.query_at(quark, 50)?.expect("covered");
/// assert_eq!(interval.start(), 10);
/// ```
#[derive(Debug)]
pub struct StateSystem {
    ssid: String,
    start_time: Timestamp,
    attributes: RwLock<AttributeTree>,
    transient: TransientState,
    backend: Backend,
    freshly_built: bool,
    built: Mutex<bool>,
    built_signal: Condvar,
    build_cancelled: AtomicBool,
    disposed: AtomicBool,
}

impl StateSystem {
    /// Creates a new, empty store in the `Building` state.
    ///
    /// # Errors
    ///
    /// Returns `StateError::InvalidConfig` for an unusable configuration and
    /// an I/O error if the history file cannot be created.
    pub fn new(config: StoreConfig) -> Result<Self> {
        config.validate()?;
        let StoreConfig {
            ssid,
            start_time,
            backend,
        } = config;

        let backend: Backend = match backend {
            BackendKind::InMemory => InMemoryBackend::new(ssid.clone(), start_time).into(),
            BackendKind::HistoryTree(ht) => {
                HistoryTreeBackend::create(ssid.clone(), ht, start_time)?.into()
            }
            BackendKind::Null => NullBackend::new(ssid.clone(), start_time).into(),
        };
        info!(ssid = %ssid, backend = backend.kind(), start_time, "created state system");
        Ok(Self::from_backend(backend))
    }

    /// Wraps an already constructed backend in a new `Building` store.
    pub fn from_backend(backend: impl Into<Backend>) -> Self {
        let backend = backend.into();
        let start_time = backend.start_time();
        Self {
            ssid: backend.ssid().to_string(),
            start_time,
            attributes: RwLock::new(AttributeTree::new()),
            transient: TransientState::new(start_time),
            backend,
            freshly_built: true,
            built: Mutex::new(false),
            built_signal: Condvar::new(),
            build_cancelled: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
        }
    }

    /// Reopens a closed history file. The store is read-only.
    ///
    /// # Errors
    ///
    /// Returns `StateError::InvalidConfig` for backends that cannot be
    /// reopened, and an error for which [`StateError::requires_rebuild`] is
    /// true if the file cannot be trusted.
    pub fn open_existing(config: StoreConfig) -> Result<Self> {
        config.validate()?;
        let BackendKind::HistoryTree(ht) = config.backend else {
            return Err(StateError::InvalidConfig(
                "only history tree stores can be reopened".into(),
            ));
        };

        let (backend, attributes) = HistoryTreeBackend::open_existing(config.ssid.clone(), ht)?;
        let start_time = backend.start_time();
        let transient = TransientState::new(start_time);
        transient.set_inactive();

        info!(
            ssid = %config.ssid,
            attributes = attributes.len(),
            end_time = backend.end_time(),
            "reopened state system"
        );
        Ok(Self {
            ssid: config.ssid,
            start_time,
            attributes: RwLock::new(attributes),
            transient,
            backend: backend.into(),
            freshly_built: false,
            built: Mutex::new(true),
            built_signal: Condvar::new(),
            build_cancelled: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
        })
    }

    /// Reopens the history file if it exists and can be trusted, otherwise
    /// creates a new store in its place.
    ///
    /// Check [`StateSystem::is_freshly_built`] to know whether the store must
    /// be fed again.
    pub fn open_or_create(config: StoreConfig) -> Result<Self> {
        let path = match &config.backend {
            BackendKind::HistoryTree(ht) => ht.path.clone(),
            _ => return Self::new(config),
        };
        if !path.exists() {
            return Self::new(config);
        }

        match Self::open_existing(config.clone()) {
            Ok(ss) => Ok(ss),
            Err(err) if err.requires_rebuild() => {
                warn!(
                    ssid = %config.ssid,
                    path = %path.display(),
                    error = %err,
                    "history file unusable, rebuilding"
                );
                Self::new(config)
            }
            Err(err) => Err(err),
        }
    }

    // ------------------------------------------------------------------
    // Metadata
    // ------------------------------------------------------------------

    /// Identifier of the store.
    pub fn ssid(&self) -> &str {
        &self.ssid
    }

    /// First timestamp covered by the store.
    pub fn start_time(&self) -> Timestamp {
        self.start_time
    }

    /// Latest timestamp the store has data for. Frozen once closed.
    pub fn current_end_time(&self) -> Timestamp {
        self.backend.end_time().max(self.transient.latest_time())
    }

    /// Returns true if the store was built in this process, false if it was
    /// reopened from a history file.
    pub fn is_freshly_built(&self) -> bool {
        self.freshly_built
    }

    /// Returns true once [`StateSystem::close_history`] has completed.
    pub fn is_built(&self) -> bool {
        *self.built.lock().unwrap_or_else(|err| err.into_inner())
    }

    /// Returns true if the build was abandoned by [`StateSystem::dispose`].
    pub fn is_build_cancelled(&self) -> bool {
        self.build_cancelled.load(Ordering::Acquire)
    }

    /// Returns true once the store has been disposed.
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Storage backend of the store.
    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    fn check_not_disposed(&self) -> Result<()> {
        if self.is_disposed() {
            return Err(StateError::Disposed);
        }
        Ok(())
    }

    fn read_attributes(&self) -> RwLockReadGuard<'_, AttributeTree> {
        self.attributes.read().unwrap_or_else(|err| err.into_inner())
    }

    fn check_quark(&self, quark: Quark) -> Result<()> {
        if !self.read_attributes().contains(quark) {
            return Err(StateError::UnknownQuark(quark));
        }
        Ok(())
    }

    fn check_storable(&self, t: Timestamp) -> Result<()> {
        let latest = self.backend.latest_storable_time();
        if t > latest {
            return Err(StateError::TimeRangeOutOfBounds {
                time: t,
                start: self.start_time,
                end: latest,
            });
        }
        Ok(())
    }

    fn check_time(&self, t: Timestamp) -> Result<()> {
        let end = self.current_end_time();
        if t < self.start_time || t > end {
            return Err(StateError::TimeRangeOutOfBounds {
                time: t,
                start: self.start_time,
                end,
            });
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Attribute namespace
    // ------------------------------------------------------------------

    fn allocate<F>(&self, add: F) -> Result<Quark>
    where
        F: FnOnce(&mut AttributeTree) -> Result<Quark>,
    {
        self.check_not_disposed()?;
        if !self.transient.is_active() {
            return Err(StateError::StoreClosed);
        }
        let mut attributes = self.attributes.write().unwrap_or_else(|err| err.into_inner());
        let quark = add(&mut attributes)?;
        while self.transient.len() < attributes.len() {
            self.transient.add_empty_entry();
        }
        Ok(quark)
    }

    /// Quark of `path`, allocating it and any missing parent.
    ///
    /// # Errors
    ///
    /// Returns `StateError::InvalidAttributePath` for a malformed path and
    /// `StateError::StoreClosed` if the attribute is new and the store no
    /// longer builds.
    pub fn quark_for(&self, path: &str) -> Result<Quark> {
        if let Some(quark) = self.quark_for_optional(path) {
            return Ok(quark);
        }
        self.allocate(|attributes| attributes.quark_for(path))
    }

    /// Quark of `path` if it exists.
    pub fn quark_for_optional(&self, path: &str) -> Option<Quark> {
        self.read_attributes().quark_for_optional(path)
    }

    /// Quark of an existing `path`.
    ///
    /// # Errors
    ///
    /// Returns `StateError::AttributeNotFound` if no such attribute exists.
    pub fn quark_absolute(&self, path: &str) -> Result<Quark> {
        self.quark_for_optional(path)
            .ok_or_else(|| StateError::AttributeNotFound(path.to_string()))
    }

    /// Quark of `segments` below `start` if it exists.
    pub fn opt_quark_relative<S: AsRef<str>>(&self, start: Quark, segments: &[S]) -> Option<Quark> {
        self.read_attributes().quark_relative(start, segments)
    }

    /// Quark of existing `segments` below `start`.
    ///
    /// # Errors
    ///
    /// Returns `StateError::AttributeNotFound` if no such attribute exists.
    pub fn quark_relative<S: AsRef<str>>(&self, start: Quark, segments: &[S]) -> Result<Quark> {
        self.opt_quark_relative(start, segments).ok_or_else(|| {
            let relative: Vec<&str> = segments.iter().map(|s| s.as_ref()).collect();
            StateError::AttributeNotFound(relative.join("/"))
        })
    }

    /// Quark of `segments` below `start`, allocating what is missing.
    pub fn quark_relative_and_add<S: AsRef<str>>(&self, start: Quark, segments: &[S]) -> Result<Quark> {
        if let Some(quark) = self.opt_quark_relative(start, segments) {
            return Ok(quark);
        }
        self.allocate(|attributes| attributes.quark_relative_and_add(start, segments))
    }

    /// Number of allocated attributes.
    pub fn attribute_count(&self) -> usize {
        self.read_attributes().len()
    }

    /// Full path of `quark`.
    pub fn path_for(&self, quark: Quark) -> Result<String> {
        self.read_attributes().path_for(quark)
    }

    /// Path segments of `quark`.
    pub fn path_segments(&self, quark: Quark) -> Result<Vec<String>> {
        self.read_attributes().path_segments(quark)
    }

    /// Last path segment of `quark`.
    pub fn name_of(&self, quark: Quark) -> Result<String> {
        self.read_attributes().name_of(quark).map(str::to_string)
    }

    /// Parent of `quark`, [`ROOT_QUARK`] for top-level attributes.
    pub fn parent_of(&self, quark: Quark) -> Result<Quark> {
        self.read_attributes().parent_of(quark)
    }

    /// Sub-attributes of `quark`; the whole subtree with `recursive`.
    pub fn children_of(&self, quark: Quark, recursive: bool) -> Result<Vec<Quark>> {
        self.read_attributes().children_of(quark, recursive)
    }

    /// Quarks matching `pattern` below `start`. A segment may be a name,
    /// `*` for every child or `..` for the parent.
    pub fn quarks_matching<S: AsRef<str>>(&self, start: Quark, pattern: &[S]) -> Vec<Quark> {
        self.read_attributes().quarks_matching(start, pattern)
    }

    /// Quarks matching a `/`-separated absolute pattern such as
    /// `"Threads/*/Status"`.
    pub fn quarks(&self, pattern: &str) -> Vec<Quark> {
        let segments: Vec<&str> = pattern.split('/').filter(|s| !s.is_empty()).collect();
        self.quarks_matching(ROOT_QUARK, &segments)
    }

    // ------------------------------------------------------------------
    // Building
    // ------------------------------------------------------------------

    /// Sets `quark` to `value` from `t` on, closing its previous interval at
    /// `t - 1`.
    ///
    /// # Errors
    ///
    /// - `StateError::OrderingViolation` if `t` is older than the latest
    ///   change; the store stays readable up to that change
    /// - `StateError::TimeRangeOutOfBounds` if `t` is before the store start
    ///   or after the latest time the backend can store
    /// - `StateError::StateValueTypeMismatch` if the quark holds another type
    /// - `StateError::StoreClosed` once the history is closed
    pub fn modify_attribute(
        &self,
        t: Timestamp,
        value: impl Into<StateValue>,
        quark: Quark,
    ) -> Result<()> {
        self.check_not_disposed()?;
        if t < self.start_time {
            return Err(StateError::TimeRangeOutOfBounds {
                time: t,
                start: self.start_time,
                end: self.current_end_time(),
            });
        }
        self.check_storable(t)?;

        let result = self
            .transient
            .process_state_change(t, value.into(), quark, &self.backend);
        if let Err(StateError::OrderingViolation { time, latest }) = &result {
            warn!(ssid = %self.ssid, quark, time, latest, "rejected out-of-order state change");
        }
        result
    }

    /// Pushes `value` on the stack attribute `quark`.
    ///
    /// The quark holds the stack depth and level `n` lives in child `"n"`.
    ///
    /// # Errors
    ///
    /// Returns `StateError::StackOverflow` at [`MAX_STACK_DEPTH`] and
    /// `StateError::StateValueTypeMismatch` if the quark does not hold a
    /// depth.
    pub fn push_attribute(
        &self,
        t: Timestamp,
        value: impl Into<StateValue>,
        quark: Quark,
    ) -> Result<()> {
        let depth = self.stack_depth(quark)?;
        if depth >= MAX_STACK_DEPTH {
            return Err(StateError::StackOverflow(quark));
        }
        let depth = depth + 1;
        let level = self.quark_relative_and_add(quark, &[depth.to_string()])?;
        self.modify_attribute(t, StateValue::Int(depth), quark)?;
        self.modify_attribute(t, value, level)
    }

    /// Pops the top of the stack attribute `quark`, returning the popped
    /// value or `None` if the stack is empty.
    pub fn pop_attribute(&self, t: Timestamp, quark: Quark) -> Result<Option<StateValue>> {
        let depth = self.stack_depth(quark)?;
        if depth == 0 {
            return Ok(None);
        }
        let level = self.quark_relative(quark, &[depth.to_string()])?;
        let popped = self.transient.ongoing_value(level)?;

        let remaining = match depth - 1 {
            0 => StateValue::Null,
            d => StateValue::Int(d),
        };
        self.modify_attribute(t, remaining, quark)?;
        self.remove_attribute(t, level)?;
        Ok(Some(popped))
    }

    fn stack_depth(&self, quark: Quark) -> Result<i32> {
        match self.transient.ongoing_value(quark)? {
            StateValue::Null => Ok(0),
            StateValue::Int(depth) => Ok(depth),
            other => Err(StateError::StateValueTypeMismatch {
                quark,
                expected: "int",
                actual: other.type_name(),
            }),
        }
    }

    /// Sets `quark` and every attribute below it to null from `t` on.
    pub fn remove_attribute(&self, t: Timestamp, quark: Quark) -> Result<()> {
        for child in self.children_of(quark, true)? {
            self.modify_attribute(t, StateValue::Null, child)?;
        }
        self.modify_attribute(t, StateValue::Null, quark)
    }

    /// Value of the open interval of `quark`.
    pub fn query_ongoing(&self, quark: Quark) -> Result<StateValue> {
        self.check_not_disposed()?;
        self.transient.ongoing_value(quark)
    }

    /// Start time of the open interval of `quark`.
    pub fn ongoing_start_time(&self, quark: Quark) -> Result<Timestamp> {
        self.check_not_disposed()?;
        self.transient.ongoing_start(quark)
    }

    /// Replaces the value of the open interval of `quark` without closing
    /// it. The interval keeps its start time.
    pub fn update_ongoing_state(&self, value: impl Into<StateValue>, quark: Quark) -> Result<()> {
        self.check_not_disposed()?;
        if !self.transient.is_active() {
            return Err(StateError::StoreClosed);
        }
        self.transient.change_ongoing_value(quark, value.into())
    }

    /// Closes every open interval at `end_time` and finishes the backend.
    ///
    /// An `end_time` before the current end time is raised to it. Closing an
    /// already closed store does nothing.
    ///
    /// # Errors
    ///
    /// Returns `StateError::TimeRangeOutOfBounds` if `end_time` is after the
    /// latest time the backend can store. The store keeps building.
    pub fn close_history(&self, end_time: Timestamp) -> Result<()> {
        self.check_not_disposed()?;
        if !self.transient.is_active() {
            return Ok(());
        }

        let end_time = end_time.max(self.current_end_time());
        self.check_storable(end_time)?;
        self.transient.close(end_time, &self.backend)?;
        {
            let attributes = self.read_attributes();
            self.backend.finished_building(end_time, &attributes)?;
        }

        let mut built = self.built.lock().unwrap_or_else(|err| err.into_inner());
        *built = true;
        self.built_signal.notify_all();
        drop(built);

        info!(
            ssid = %self.ssid,
            end_time,
            attributes = self.attribute_count(),
            "closed state history"
        );
        Ok(())
    }

    // ------------------------------------------------------------------
    // Waiting
    // ------------------------------------------------------------------

    /// Blocks until the history is closed. Returns false if the store was
    /// disposed first.
    pub fn wait_until_built(&self) -> bool {
        let mut built = self.built.lock().unwrap_or_else(|err| err.into_inner());
        while !*built && !self.is_disposed() {
            built = self
                .built_signal
                .wait(built)
                .unwrap_or_else(|err| err.into_inner());
        }
        *built
    }

    /// Like [`StateSystem::wait_until_built`], giving up after `timeout`.
    pub fn wait_until_built_timeout(&self, timeout: Duration) -> bool {
        let built = self.built.lock().unwrap_or_else(|err| err.into_inner());
        let (built, _) = self
            .built_signal
            .wait_timeout_while(built, timeout, |built| !*built && !self.is_disposed())
            .unwrap_or_else(|err| err.into_inner());
        *built
    }

    /// Like [`StateSystem::wait_until_built`], returning
    /// `StateError::Cancelled` as soon as `cancel` is set.
    pub fn wait_until_built_cancellable(&self, cancel: &CancellationToken) -> Result<bool> {
        let mut built = self.built.lock().unwrap_or_else(|err| err.into_inner());
        loop {
            if *built || self.is_disposed() {
                return Ok(*built);
            }
            cancel.check()?;
            built = match self.built_signal.wait_timeout(built, WAIT_POLL_INTERVAL) {
                Ok((guard, _)) => guard,
                Err(err) => err.into_inner().0,
            };
        }
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Interval of `quark` covering `t`.
    ///
    /// Returns `None` only when the backend keeps no history.
    ///
    /// # Errors
    ///
    /// Returns `StateError::TimeRangeOutOfBounds` if `t` is outside
    /// `[start_time, current_end_time]` and `StateError::UnknownQuark` for an
    /// unallocated quark.
    pub fn query_at(&self, quark: Quark, t: Timestamp) -> Result<Option<Interval>> {
        self.check_not_disposed()?;
        self.check_quark(quark)?;
        self.check_time(t)?;
        if let Some(interval) = self.transient.interval_at(t, quark) {
            return Ok(Some(interval));
        }
        self.backend.query_at(quark, t)
    }

    /// Value of `quark` at `t`, null when nothing is known.
    pub fn query_value(&self, quark: Quark, t: Timestamp) -> Result<StateValue> {
        Ok(self
            .query_at(quark, t)?
            .map(Interval::into_value)
            .unwrap_or_default())
    }

    /// Intervals of `quark` intersecting `[t0, t1]`, sorted by start time.
    ///
    /// # Errors
    ///
    /// Returns `StateError::TimeRangeOutOfBounds` if the range starts outside
    /// `[start_time, current_end_time]`.
    pub fn query_range(&self, quark: Quark, t0: Timestamp, t1: Timestamp) -> Result<Vec<Interval>> {
        self.query_2d(&[quark], t0, t1)
    }

    /// First interval of `quark` within `[t0, t1]` whose value is not null.
    ///
    /// The range is clamped to the store; an empty result means the quark
    /// stays null over the whole range.
    pub fn query_until_non_null(
        &self,
        quark: Quark,
        t0: Timestamp,
        t1: Timestamp,
    ) -> Result<Option<Interval>> {
        self.check_not_disposed()?;
        self.check_quark(quark)?;
        let mut t = t0.min(t1).max(self.start_time);
        let end = t0.max(t1).min(self.current_end_time());

        while t <= end {
            let Some(interval) = self.query_at(quark, t)? else {
                return Ok(None);
            };
            if !interval.value().is_null() {
                return Ok(Some(interval));
            }
            match interval.end().checked_add(1) {
                Some(next) => t = next,
                None => break,
            }
        }
        Ok(None)
    }

    /// State of every attribute at `t`, indexed by quark.
    ///
    /// An entry is `None` only when the backend keeps no history.
    pub fn query_full_state(&self, t: Timestamp) -> Result<Vec<Option<Interval>>> {
        self.check_not_disposed()?;
        self.check_time(t)?;

        let mut state = vec![None; self.attribute_count()];
        self.transient.fill_full_state(t, &mut state);
        if state.iter().any(Option::is_none) {
            for interval in self.backend.query_full_state(t)? {
                if let Some(slot) = usize::try_from(interval.quark())
                    .ok()
                    .and_then(|idx| state.get_mut(idx))
                {
                    if slot.is_none() {
                        *slot = Some(interval);
                    }
                }
            }
        }
        Ok(state)
    }

    /// Intervals of `quarks` intersecting `[start, end]`.
    pub fn query_2d(&self, quarks: &[Quark], start: Timestamp, end: Timestamp) -> Result<Vec<Interval>> {
        self.query_2d_cancellable(
            quarks,
            &TimeRangeCondition::continuous(start, end),
            &CancellationToken::new(),
        )
    }

    /// Intervals of `quarks` covering at least one of `times`.
    pub fn query_2d_at_times(&self, quarks: &[Quark], times: &[Timestamp]) -> Result<Vec<Interval>> {
        let Some(times) = TimeRangeCondition::discrete(times.iter().copied()) else {
            return Ok(Vec::new());
        };
        self.query_2d_cancellable(quarks, &times, &CancellationToken::new())
    }

    /// Intervals of `quarks` intersecting `times`, sorted by quark then start
    /// time. The backend traversal stops with `StateError::Cancelled` once
    /// `cancel` is set.
    pub fn query_2d_cancellable(
        &self,
        quarks: &[Quark],
        times: &TimeRangeCondition,
        cancel: &CancellationToken,
    ) -> Result<Vec<Interval>> {
        self.check_not_disposed()?;
        let Some(quark_condition) = QuarkRangeCondition::discrete(quarks.iter().copied()) else {
            return Ok(Vec::new());
        };
        for quark in quarks {
            self.check_quark(*quark)?;
        }
        self.check_time(times.min())?;

        // Transient first: an interval closed in between shows up twice
        // rather than not at all.
        let ongoing = self.transient.query_2d(quarks, times);
        let mut result = self.backend.query_2d(&quark_condition, times, cancel)?;
        result.extend(ongoing);
        result.sort_by_key(|interval| (interval.quark(), interval.start()));
        result.dedup_by_key(|interval| (interval.quark(), interval.start()));
        Ok(result)
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Releases the backend. A store still building is abandoned and its
    /// unfinished file removed; waiters are woken.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        if self.transient.is_active() {
            self.transient.set_inactive();
            self.build_cancelled.store(true, Ordering::Release);
        }
        self.backend.dispose();

        let _built = self.built.lock().unwrap_or_else(|err| err.into_inner());
        self.built_signal.notify_all();
        debug!(ssid = %self.ssid, cancelled = self.is_build_cancelled(), "disposed state system");
    }

    /// Deletes the files of the backend.
    pub fn remove_files(&self) -> Result<()> {
        self.backend.remove_files()
    }
}
