use itertools::Itertools;

use crate::{
    error::{PdrtaError, Result},
    pdrta::StateId,
    tail::{TailId, TailStore},
    Delay, Show, INFINITY,
};

/// A time guard `[begin, end)` of one (state, symbol) pair. It routes every tail whose delay lies
/// within its bounds to the same target state. An `end` of [`INFINITY`] means the interval is
/// unbounded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Interval {
    begin: Delay,
    end: Delay,
    target: Option<StateId>,
    tails: Vec<TailId>,
}

impl Interval {
    /// Creates an empty interval without target.
    pub fn new(begin: Delay, end: Delay) -> Self {
        debug_assert!(begin < end, "interval [{begin}, {end}) is empty");
        Self {
            begin,
            end,
            target: None,
            tails: vec![],
        }
    }

    /// The interval covering the whole delay axis `[0, inf)`.
    pub fn full() -> Self {
        Self::new(0, INFINITY)
    }

    /// Inclusive lower bound.
    pub fn begin(&self) -> Delay {
        self.begin
    }

    /// Exclusive upper bound, [`INFINITY`] if unbounded.
    pub fn end(&self) -> Delay {
        self.end
    }

    /// The state that tails routed through this interval move to.
    pub fn target(&self) -> Option<StateId> {
        self.target
    }

    /// Ids of all tails currently routed through this interval.
    pub fn tails(&self) -> &[TailId] {
        &self.tails
    }

    /// Number of tails routed through this interval.
    pub fn tail_count(&self) -> usize {
        self.tails.len()
    }

    /// Whether no tail is routed through this interval.
    pub fn is_empty(&self) -> bool {
        self.tails.is_empty()
    }

    /// Whether the given delay lies within `[begin, end)`.
    pub fn contains(&self, delay: Delay) -> bool {
        self.begin <= delay && delay < self.end
    }

    /// The observed delays of all tails, in ascending order.
    pub fn delays(&self, store: &TailStore) -> Vec<Delay> {
        self.tails.iter().map(|t| store[*t].delay()).sorted().collect()
    }

    /// An interval is degenerate if it carries tails that all share the same delay. A density
    /// fitted to it has to be a point mass.
    pub fn is_degenerate(&self, store: &TailStore) -> bool {
        self.tails
            .iter()
            .map(|t| store[*t].delay())
            .all_equal_value()
            .is_ok()
    }

    /// The distinct observed delays at which the interval could be split such that both sides
    /// receive at least one tail.
    pub fn split_points(&self, store: &TailStore) -> Vec<Delay> {
        crate::math::distinct_sorted(self.tails.iter().map(|t| store[*t].delay()))
            .into_iter()
            .skip(1)
            .collect()
    }

    pub(crate) fn set_target(&mut self, target: Option<StateId>) {
        self.target = target;
    }

    pub(crate) fn extend_tails<I: IntoIterator<Item = TailId>>(&mut self, tails: I) {
        self.tails.extend(tails);
    }

    /// Shrinks `self` to `[begin, at)` and returns the upper part `[at, end)`. Tails are
    /// distributed by their delay, both parts lose the target.
    pub(crate) fn split_off(&mut self, at: Delay, store: &TailStore) -> Interval {
        debug_assert!(self.begin < at && at < self.end);
        let (lower, upper): (Vec<_>, Vec<_>) = self
            .tails
            .drain(..)
            .partition(|t| store[*t].delay() < at);
        let upper = Interval {
            begin: at,
            end: self.end,
            target: None,
            tails: upper,
        };
        self.end = at;
        self.tails = lower;
        self.target = None;
        upper
    }
}

impl Show for Interval {
    fn show(&self) -> String {
        if self.end == INFINITY {
            format!("[{}, inf)", self.begin)
        } else {
            format!("[{}, {})", self.begin, self.end)
        }
    }
}

/// Returns the position of the interval containing `delay` within an ordered partition.
pub fn find_interval(intervals: &[Interval], delay: Delay) -> Option<usize> {
    let position = intervals.partition_point(|i| i.end <= delay);
    (position < intervals.len() && intervals[position].contains(delay)).then_some(position)
}

/// Checks that `intervals` are sorted, pairwise disjoint and cover `[0, inf)` without gaps.
pub fn check_partition(intervals: &[Interval]) -> Result<()> {
    let Some(first) = intervals.first() else {
        return Err(PdrtaError::invariant("symbol has no interval"));
    };
    if first.begin != 0 {
        return Err(PdrtaError::invariant(format!(
            "partition starts at {} instead of 0",
            first.begin
        )));
    }
    for (left, right) in intervals.iter().tuple_windows() {
        if left.begin >= left.end {
            return Err(PdrtaError::invariant(format!(
                "interval {} is empty",
                left.show()
            )));
        }
        if left.end != right.begin {
            return Err(PdrtaError::invariant(format!(
                "intervals {} and {} overlap or leave a gap",
                left.show(),
                right.show()
            )));
        }
    }
    match intervals.last() {
        Some(last) if last.end == INFINITY => Ok(()),
        Some(last) => Err(PdrtaError::invariant(format!(
            "partition ends with {} instead of infinity",
            last.show()
        ))),
        None => unreachable!("partition is non-empty"),
    }
}
