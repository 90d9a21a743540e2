//! Alopex History - attribute-indexed interval history store
//!
//! This crate records how the attributes of a traced system change over time
//! and answers "what was the state at time T" style queries, both while the
//! history is being built and after it has been persisted.
//!
//! # Components
//!
//! - [`AttributeTree`]: hierarchical attribute paths mapped to dense quarks
//! - [`StateValue`] / [`Interval`]: the stored facts and their binary codec
//! - [`RangeCondition`]: continuous or discrete predicates used to prune queries
//! - [`Backend`]: in-memory lists, the on-disk [`HistoryTree`], or nothing
//! - [`StateSystem`]: the build and query API on top of them
//!
//! # Example
//!
//! ```rust,ignore
//! use alopex_history::{StateSystem, StoreConfig};
//!
//! let ss = StateSystem::new(StoreConfig::history_tree("kernel", "/tmp/kernel.ht"))?;
//! let status = ss.quark_for("Threads/42/Status")?;
//!
//! ss.modify_attribute(1_000, "running", status)?;
//! ss.modify_attribute(2_500, "blocked", status)?;
//! ss.close_history(3_000)?;
//!
//! let interval = ss.query_at(status, 2_000)?.expect("covered");
//! assert_eq!((interval.start(), interval.end()), (1_000, 2_499));
//!
//! // Later, possibly in another process
//! let ss = StateSystem::open_or_create(StoreConfig::history_tree("kernel", "/tmp/kernel.ht"))?;
//! assert!(!ss.is_freshly_built());
//! ```

#![deny(missing_docs)]

pub mod attribute;
pub mod backend;
pub mod cancel;
pub mod codec;
pub mod condition;
pub mod config;
pub mod error;
pub mod interval;
pub mod state_system;
pub mod value;

pub use attribute::{AttributeTree, ROOT_QUARK};
pub use backend::history_tree::{HistoryTree, HtConfig};
pub use backend::{Backend, HistoryTreeBackend, InMemoryBackend, NullBackend, StateHistoryBackend};
pub use cancel::CancellationToken;
pub use condition::{DiscreteSet, QuarkRangeCondition, RangeCondition, TimeRangeCondition};
pub use config::{BackendKind, StoreConfig};
pub use error::{Result, StateError};
pub use interval::{Interval, Quark, Timestamp};
pub use state_system::{StateSystem, MAX_STACK_DEPTH};
pub use value::StateValue;
