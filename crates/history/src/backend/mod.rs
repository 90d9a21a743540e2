//! Storage backends for closed intervals.
//!
//! A backend receives every interval once it is closed by the transient
//! state and answers the historical part of every query. The variant is
//! chosen when the store is created:
//!
//! - [`InMemoryBackend`]: per-quark sorted lists
//! - [`HistoryTreeBackend`]: on-disk history tree, can be reopened
//! - [`NullBackend`]: discards everything
//!
//! All methods take `&self` so a single backend can serve the writer thread
//! and any number of reader threads at once.

pub mod history_tree;
mod in_memory;
mod null;

pub use history_tree::HistoryTreeBackend;
pub use in_memory::InMemoryBackend;
pub use null::NullBackend;

use crate::attribute::AttributeTree;
use crate::cancel::CancellationToken;
use crate::condition::{QuarkRangeCondition, TimeRangeCondition};
use crate::error::Result;
use crate::interval::{Interval, Quark, Timestamp};
use crate::value::StateValue;

/// Operations every storage backend provides.
pub trait StateHistoryBackend: Send + Sync {
    /// Identifier of the owning store.
    fn ssid(&self) -> &str;

    /// First timestamp covered by the backend.
    fn start_time(&self) -> Timestamp;

    /// Largest end time of any stored interval, or the close time once
    /// building has finished.
    fn end_time(&self) -> Timestamp;

    /// Largest timestamp the backend can store.
    fn latest_storable_time(&self) -> Timestamp {
        Timestamp::MAX
    }

    /// Appends one closed interval.
    ///
    /// # Errors
    ///
    /// Returns `StateError::InvalidInterval` if `start > end`,
    /// `StateError::IntervalOverlap` if it overlaps stored data for the same
    /// quark (backends that can check it), and `StateError::StoreClosed` after
    /// [`StateHistoryBackend::finished_building`].
    fn insert_past_state(
        &self,
        start: Timestamp,
        end: Timestamp,
        quark: Quark,
        value: StateValue,
    ) -> Result<()>;

    /// Flushes buffered data and persists `attributes` next to it. The
    /// backend is read-only afterwards.
    fn finished_building(&self, end_time: Timestamp, attributes: &AttributeTree) -> Result<()>;

    /// The stored interval of `quark` covering `t`, if any.
    fn query_at(&self, quark: Quark, t: Timestamp) -> Result<Option<Interval>>;

    /// Every stored interval covering `t`, for all quarks.
    fn query_full_state(&self, t: Timestamp) -> Result<Vec<Interval>>;

    /// Every stored interval whose quark matches `quarks` and whose time
    /// range intersects `times`.
    ///
    /// The traversal checks `cancel` between steps and returns
    /// `StateError::Cancelled` once it is set.
    fn query_2d(
        &self,
        quarks: &QuarkRangeCondition,
        times: &TimeRangeCondition,
        cancel: &CancellationToken,
    ) -> Result<Vec<Interval>>;

    /// Every stored interval of `quark` intersecting `times`.
    fn query(&self, quark: Quark, times: &TimeRangeCondition) -> Result<Vec<Interval>> {
        self.query_2d(
            &QuarkRangeCondition::singleton(quark),
            times,
            &CancellationToken::new(),
        )
    }

    /// Deletes persisted files, if the backend has any.
    fn remove_files(&self) -> Result<()>;

    /// Releases resources. Further queries may fail.
    fn dispose(&self);
}

/// Backend selected at store creation.
#[derive(Debug)]
pub enum Backend {
    /// In-memory lists.
    InMemory(InMemoryBackend),
    /// On-disk history tree.
    HistoryTree(HistoryTreeBackend),
    /// Discarding backend.
    Null(NullBackend),
}

impl Backend {
    fn inner(&self) -> &dyn StateHistoryBackend {
        match self {
            Self::InMemory(backend) => backend,
            Self::HistoryTree(backend) => backend,
            Self::Null(backend) => backend,
        }
    }

    /// Short name of the variant, used in log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InMemory(_) => "in-memory",
            Self::HistoryTree(_) => "history-tree",
            Self::Null(_) => "null",
        }
    }
}

impl StateHistoryBackend for Backend {
    fn ssid(&self) -> &str {
        self.inner().ssid()
    }

    fn start_time(&self) -> Timestamp {
        self.inner().start_time()
    }

    fn end_time(&self) -> Timestamp {
        self.inner().end_time()
    }

    fn latest_storable_time(&self) -> Timestamp {
        self.inner().latest_storable_time()
    }

    fn insert_past_state(
        &self,
        start: Timestamp,
        end: Timestamp,
        quark: Quark,
        value: StateValue,
    ) -> Result<()> {
        self.inner().insert_past_state(start, end, quark, value)
    }

    fn finished_building(&self, end_time: Timestamp, attributes: &AttributeTree) -> Result<()> {
        self.inner().finished_building(end_time, attributes)
    }

    fn query_at(&self, quark: Quark, t: Timestamp) -> Result<Option<Interval>> {
        self.inner().query_at(quark, t)
    }

    fn query_full_state(&self, t: Timestamp) -> Result<Vec<Interval>> {
        self.inner().query_full_state(t)
    }

    fn query_2d(
        &self,
        quarks: &QuarkRangeCondition,
        times: &TimeRangeCondition,
        cancel: &CancellationToken,
    ) -> Result<Vec<Interval>> {
        self.inner().query_2d(quarks, times, cancel)
    }

    fn remove_files(&self) -> Result<()> {
        self.inner().remove_files()
    }

    fn dispose(&self) {
        self.inner().dispose()
    }
}

impl From<InMemoryBackend> for Backend {
    fn from(backend: InMemoryBackend) -> Self {
        Self::InMemory(backend)
    }
}

impl From<HistoryTreeBackend> for Backend {
    fn from(backend: HistoryTreeBackend) -> Self {
        Self::HistoryTree(backend)
    }
}

impl From<NullBackend> for Backend {
    fn from(backend: NullBackend) -> Self {
        Self::Null(backend)
    }
}
