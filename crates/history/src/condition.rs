//! Range conditions used to prune history traversal.
//!
//! A [`RangeCondition`] describes the set of values a query is interested
//! in, either as a continuous `[low, high]` range or as an explicit set of
//! discrete values. Tree traversal narrows the condition to each node's
//! time range with [`RangeCondition::sub_condition`] and skips the node
//! entirely when nothing remains.

use crate::interval::{Quark, Timestamp};
use std::fmt;
use std::sync::Arc;

/// Predicate over an ordered value domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RangeCondition<T> {
    /// Every value in `[low, high]`.
    Continuous {
        /// Lower bound (inclusive).
        low: T,
        /// Upper bound (inclusive).
        high: T,
    },
    /// An explicit set of values. Built with [`RangeCondition::discrete`].
    Discrete(DiscreteSet<T>),
}

/// Non-empty, sorted set of values without duplicates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscreteSet<T>(Arc<[T]>);

impl<T> DiscreteSet<T> {
    /// The values in ascending order.
    pub fn as_slice(&self) -> &[T] {
        &self.0
    }

    /// Number of values, at least one.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always false.
    pub fn is_empty(&self) -> bool {
        false
    }
}

/// Condition over timestamps.
pub type TimeRangeCondition = RangeCondition<Timestamp>;

/// Condition over attribute quarks.
pub type QuarkRangeCondition = RangeCondition<Quark>;

impl<T: Copy + Ord> RangeCondition<T> {
    /// Creates a continuous condition. The bounds may be given in any order.
    pub fn continuous(a: T, b: T) -> Self {
        Self::Continuous {
            low: a.min(b),
            high: a.max(b),
        }
    }

    /// Creates a condition matching exactly one value.
    pub fn singleton(value: T) -> Self {
        Self::Continuous {
            low: value,
            high: value,
        }
    }

    /// Creates a discrete condition from an arbitrary collection of values.
    ///
    /// Returns `None` if `values` is empty.
    pub fn discrete<I: IntoIterator<Item = T>>(values: I) -> Option<Self> {
        let mut values: Vec<T> = values.into_iter().collect();
        if values.is_empty() {
            return None;
        }
        values.sort_unstable();
        values.dedup();
        Some(Self::Discrete(DiscreteSet(values.into())))
    }

    /// Smallest value accepted by the condition.
    pub fn min(&self) -> T {
        match self {
            Self::Continuous { low, .. } => *low,
            Self::Discrete(set) => set.0[0],
        }
    }

    /// Largest value accepted by the condition.
    pub fn max(&self) -> T {
        match self {
            Self::Continuous { high, .. } => *high,
            Self::Discrete(set) => set.0[set.len() - 1],
        }
    }

    /// Returns true if `value` is accepted.
    pub fn test(&self, value: T) -> bool {
        match self {
            Self::Continuous { low, high } => *low <= value && value <= *high,
            Self::Discrete(set) => set.0.binary_search(&value).is_ok(),
        }
    }

    /// Returns true if any accepted value lies in `[low, high]`.
    pub fn intersects(&self, low: T, high: T) -> bool {
        match self {
            Self::Continuous {
                low: own_low,
                high: own_high,
            } => *own_low <= high && low <= *own_high,
            Self::Discrete(DiscreteSet(values)) => {
                let idx = values.partition_point(|v| *v < low);
                idx < values.len() && values[idx] <= high
            }
        }
    }

    /// Restricts the condition to `[from, to]`.
    ///
    /// Returns `None` when no accepted value remains in that window.
    pub fn sub_condition(&self, from: T, to: T) -> Option<Self> {
        match self {
            Self::Continuous { low, high } => {
                let low = (*low).max(from);
                let high = (*high).min(to);
                (low <= high).then_some(Self::Continuous { low, high })
            }
            Self::Discrete(DiscreteSet(values)) => {
                let first = values.partition_point(|v| *v < from);
                let last = values.partition_point(|v| *v <= to);
                if first >= last {
                    None
                } else if first == 0 && last == values.len() {
                    Some(Self::Discrete(DiscreteSet(Arc::clone(values))))
                } else {
                    Some(Self::Discrete(DiscreteSet(values[first..last].into())))
                }
            }
        }
    }
}

impl<T: fmt::Display> fmt::Display for RangeCondition<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Continuous { low, high } => write!(f, "[{}, {}]", low, high),
            Self::Discrete(set) => {
                write!(f, "{{")?;
                for (i, v) in set.as_slice().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", v)?;
                }
                write!(f, "}}")
            }
        }
    }
}
