//! The two operations of the search: splitting an interval of a red state, and merging a blue
//! state into a red one. Both keep every tail in exactly one interval. Merges fold the blue
//! subtree into the red part of the automaton pair by pair, using a FIFO worklist.

use std::collections::VecDeque;

use itertools::Itertools;
use tracing::{debug, trace};

use crate::{
    alphabet::SymbolIndex,
    coloring::StateColoring,
    error::{PdrtaError, Result},
    interval::find_interval,
    math::Set,
    pdrta::{Pdrta, StateId},
    statistic::{PairAccumulator, StateStatistic},
    tail::Head,
    Delay, Show,
};

impl Pdrta {
    /// Splits the interval of `symbol` in the red state `state` that contains `at` into
    /// `[begin, at)` and `[at, end)`. The old target and everything below it is deleted, each side
    /// gets a fresh target whose subtree is rebuilt from the successors of the side's tails.
    /// Both fresh targets become blue. Returns the ids of the lower and upper target.
    pub fn split(
        &mut self,
        state: StateId,
        symbol: SymbolIndex,
        at: Delay,
        coloring: &mut StateColoring,
    ) -> Result<(StateId, StateId)> {
        if !coloring.is_red(state) {
            return Err(PdrtaError::illegal(format!(
                "cannot split state {state}, it is not red"
            )));
        }
        let q = self.try_state(state)?;
        let position = find_interval(q.intervals(symbol), at).ok_or_else(|| {
            PdrtaError::illegal(format!("state {state} has no interval for symbol {symbol}"))
        })?;
        let interval = &q.intervals(symbol)[position];
        if interval.begin() == at {
            return Err(PdrtaError::illegal(format!(
                "{at} is the lower bound of {}",
                interval.show()
            )));
        }
        if let Some(target) = interval.target() {
            if coloring.is_red(target) {
                return Err(PdrtaError::illegal(format!(
                    "interval {} of state {state} leads to red state {target}",
                    interval.show()
                )));
            }
        }
        let targets =
            self.split_interval(state, symbol, position, at, &coloring.red_set(), true)?;
        let (Some(lower), Some(upper)) = targets else {
            return Err(PdrtaError::invariant(format!(
                "split of state {state} did not create both targets"
            )));
        };
        coloring.refresh(self);
        debug!("split state {state} on symbol {symbol} at {at}, new targets {lower} and {upper}");
        Ok((lower, upper))
    }

    /// Splits the interval at `position` without looking at colors. States in `protected` must
    /// not be part of the deleted subtree. With `fresh_for_empty` unset, a side without tails
    /// keeps no target.
    pub(crate) fn split_interval(
        &mut self,
        state: StateId,
        symbol: SymbolIndex,
        position: usize,
        at: Delay,
        protected: &Set<StateId>,
        fresh_for_empty: bool,
    ) -> Result<(Option<StateId>, Option<StateId>)> {
        let old_target = self
            .try_state(state)?
            .intervals(symbol)
            .get(position)
            .ok_or_else(|| PdrtaError::invariant(format!("state {state} lacks interval {position}")))?
            .target();
        if let Some(target) = old_target {
            for q in self.subtree(target, protected)? {
                self.remove_state(q)?;
            }
        }
        self.divide_interval(state, symbol, position, at)?;

        let mut targets = [None, None];
        for (side, target) in targets.iter_mut().enumerate() {
            let heads = self.try_state(state)?.intervals(symbol)[position + side]
                .tails()
                .iter()
                .map(|t| self.tails()[*t].successor())
                .collect_vec();
            if heads.is_empty() && !fresh_for_empty {
                continue;
            }
            let fresh = self.add_state();
            if let Some(intervals) = self.state_mut(state)?.intervals_mut(symbol) {
                intervals[position + side].set_target(Some(fresh));
            }
            self.populate(fresh, heads)?;
            *target = Some(fresh);
        }
        trace!("split interval {position} of state {state} on symbol {symbol} at {at}");
        Ok((targets[0], targets[1]))
    }

    /// Merges the blue state `blue` into the red state `red`. The red interval leading to `blue` is
    /// redirected to `red`, and the subtree of `blue` is folded into the automaton. If `stats` is
    /// given, every folded pair is compared before it is pooled.
    pub fn merge(
        &mut self,
        red: StateId,
        blue: StateId,
        coloring: &mut StateColoring,
        stats: Option<&mut PairAccumulator>,
    ) -> Result<()> {
        if !coloring.is_red(red) {
            return Err(PdrtaError::illegal(format!("merge target {red} is not red")));
        }
        if !coloring.is_blue(blue) {
            return Err(PdrtaError::illegal(format!("merged state {blue} is not blue")));
        }
        let (parent, symbol, position) = coloring
            .red()
            .filter_map(|p| self.state(p))
            .find_map(|p| {
                p.all_intervals()
                    .find(|(_, _, i)| i.target() == Some(blue))
                    .map(|(symbol, position, _)| (p.id(), symbol, position))
            })
            .ok_or_else(|| PdrtaError::invariant(format!("blue state {blue} has no red parent")))?;
        if let Some(intervals) = self.state_mut(parent)?.intervals_mut(symbol) {
            intervals[position].set_target(Some(red));
        }
        let protected = coloring.red_set();
        self.fold(red, blue, &protected, stats)?;
        coloring.refresh(self);
        debug!("merged state {blue} into {red}");
        Ok(())
    }

    /// Folds `y` into `x`, queueing the induced pairs of targets until none remain. States of the
    /// `y` side are removed once they are pooled.
    pub(crate) fn fold(
        &mut self,
        x: StateId,
        y: StateId,
        protected: &Set<StateId>,
        mut stats: Option<&mut PairAccumulator>,
    ) -> Result<()> {
        let mut queue = VecDeque::from([(x, y, true)]);
        while let Some((x, y, counted)) = queue.pop_front() {
            if x == y {
                return Err(PdrtaError::invariant(format!("state {x} is folded into itself")));
            }
            if protected.contains(&y) {
                return Err(PdrtaError::invariant(format!("red state {y} would be folded away")));
            }
            trace!("folding {y} into {x}");
            let descend = match stats.as_deref_mut() {
                Some(acc) if counted => acc.record(
                    &StateStatistic::of_state(self, x),
                    &StateStatistic::of_state(self, y),
                ),
                _ => false,
            };

            for symbol in self.alphabet().universe() {
                let borders = self
                    .try_state(x)?
                    .intervals(symbol)
                    .iter()
                    .skip(1)
                    .map(|i| i.begin())
                    .collect_vec();
                for border in borders {
                    let intervals = self.try_state(y)?.intervals(symbol);
                    let position = find_interval(intervals, border).ok_or_else(|| {
                        PdrtaError::invariant(format!("state {y} does not cover {border}"))
                    })?;
                    if intervals[position].begin() < border {
                        self.split_interval(y, symbol, position, border, protected, false)?;
                    }
                }
            }

            let folded = self.remove_state(y)?;
            self.state_mut(x)?.ends_mut().extend_from_slice(folded.ends());
            for symbol in self.alphabet().universe() {
                for interval in folded.intervals(symbol) {
                    let target = {
                        let intervals = self
                            .state_mut(x)?
                            .intervals_mut(symbol)
                            .ok_or_else(|| PdrtaError::invariant(format!("state {x} lacks symbol {symbol}")))?;
                        let Some(mine) = intervals
                            .iter_mut()
                            .find(|i| i.begin() == interval.begin() && i.end() == interval.end())
                        else {
                            return Err(PdrtaError::invariant(format!(
                                "interval {} of state {y} has no counterpart in {x}",
                                interval.show()
                            )));
                        };
                        mine.extend_tails(interval.tails().iter().copied());
                        match (mine.target(), interval.target()) {
                            (_, None) => None,
                            (None, Some(theirs)) => {
                                mine.set_target(Some(theirs));
                                None
                            }
                            (Some(ours), Some(theirs)) => Some((ours, theirs)),
                        }
                    };
                    if let Some((ours, theirs)) = target {
                        queue.push_back((ours, theirs, descend));
                    }
                }
            }
        }
        Ok(())
    }
}

/// Returns the successors of those `heads` that are tails of `symbol` with a delay in
/// `[begin, end)`.
pub(crate) fn successors_in(
    pdrta: &Pdrta,
    heads: &[Head],
    symbol: SymbolIndex,
    begin: Delay,
    end: Delay,
) -> Vec<Head> {
    heads
        .iter()
        .filter_map(|h| match h {
            Head::Tail(t) => Some(pdrta.tails()[*t]),
            Head::End(_) => None,
        })
        .filter(|t| t.symbol() == symbol && begin <= t.delay() && t.delay() < end)
        .map(|t| t.successor())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        statistic::{Descent, TestSettings},
        word::TimedSample,
        INFINITY,
    };

    fn bimodal() -> TimedSample {
        TimedSample::from_symbolic([
            vec![("a", 1), ("b", 1)],
            vec![("a", 2), ("b", 1)],
            vec![("a", 10), ("c", 1)],
            vec![("a", 11), ("c", 1), ("c", 5)],
            vec![("b", 3), ("a", 1), ("b", 1)],
        ])
    }

    #[test_log::test]
    fn split_rebuilds_both_sides() {
        let mut pdrta = Pdrta::from_sample(&bimodal(), 1).unwrap();
        let mut coloring = StateColoring::new(&pdrta);
        let root = pdrta.root();
        let old = pdrta.run([(0, 1)]).unwrap();

        let (lower, upper) = pdrta.split(root, 0, 10, &mut coloring).unwrap();
        assert!(pdrta.check_consistency().is_ok());
        assert!(coloring.check(&pdrta).is_ok());
        assert!(pdrta.state(old).is_none());
        assert!(coloring.is_blue(lower) && coloring.is_blue(upper));
        assert_eq!(pdrta.tail_count(), bimodal().event_count());

        let intervals = pdrta.state(root).unwrap().intervals(0);
        assert_eq!(
            intervals.iter().map(|i| (i.begin(), i.end())).collect_vec(),
            vec![(0, 10), (10, INFINITY)]
        );
        assert_eq!(pdrta.run([(0, 2)]), Some(lower));
        assert_eq!(pdrta.run([(0, 10)]), Some(upper));
        assert!(pdrta.run([(0, 1), (1, 1)]).is_some());
        assert!(pdrta.run([(0, 1), (2, 1)]).is_none());
        assert!(pdrta.run([(0, 11), (2, 1), (2, 5)]).is_some());
    }

    #[test]
    fn split_preconditions() {
        let mut pdrta = Pdrta::from_sample(&bimodal(), 1).unwrap();
        let mut coloring = StateColoring::new(&pdrta);
        let a = pdrta.run([(0, 1)]).unwrap();
        assert!(matches!(
            pdrta.split(a, 1, 1, &mut coloring),
            Err(PdrtaError::IllegalOperation(_))
        ));
        assert!(matches!(
            pdrta.split(pdrta.root(), 0, 0, &mut coloring),
            Err(PdrtaError::IllegalOperation(_))
        ));
        coloring.promote(a, &pdrta).unwrap();
        assert!(matches!(
            pdrta.split(pdrta.root(), 0, 5, &mut coloring),
            Err(PdrtaError::IllegalOperation(_))
        ));
    }

    #[test]
    fn split_with_empty_side_creates_fresh_state() {
        let mut pdrta = Pdrta::from_sample(&bimodal(), 1).unwrap();
        let mut coloring = StateColoring::new(&pdrta);
        let size = pdrta.size();
        let (lower, upper) = pdrta.split(pdrta.root(), 1, 100, &mut coloring).unwrap();
        assert_ne!(lower, upper);
        assert_eq!(pdrta.state(upper).unwrap().visits(), 0);
        assert_eq!(pdrta.size(), size + 1);
        assert!(pdrta.check_consistency().is_ok());
    }

    #[test_log::test]
    fn merge_folds_subtree() {
        let sample = TimedSample::from_symbolic([
            vec![("a", 1), ("a", 1), ("b", 2)],
            vec![("a", 1), ("b", 2)],
            vec![("b", 2)],
        ]);
        let mut pdrta = Pdrta::from_sample(&sample, 1).unwrap();
        let mut coloring = StateColoring::new(&pdrta);
        let root = pdrta.root();
        let a = pdrta.run([(0, 1)]).unwrap();

        pdrta.merge(root, a, &mut coloring, None).unwrap();
        assert!(pdrta.check_consistency().is_ok());
        assert!(coloring.check(&pdrta).is_ok());
        assert_eq!(pdrta.run([(0, 1)]), Some(root));
        assert_eq!(pdrta.run([(0, 1), (0, 1), (0, 4)]), Some(root));
        // root, b
        assert_eq!(pdrta.size(), 2);
        let b = pdrta.run([(1, 2)]).unwrap();
        assert_eq!(pdrta.state(b).unwrap().ends().len(), 3);
        assert_eq!(pdrta.tail_count(), sample.event_count());
    }

    #[test]
    fn merge_aligns_blue_side_to_red_intervals() {
        let sample = TimedSample::from_symbolic([
            vec![("a", 1), ("a", 1)],
            vec![("a", 1), ("a", 8)],
            vec![("a", 9), ("b", 1)],
            vec![("a", 9)],
        ]);
        let mut pdrta = Pdrta::from_sample(&sample, 1).unwrap();
        let mut coloring = StateColoring::new(&pdrta);
        let root = pdrta.root();
        let (lower, upper) = pdrta.split(root, 0, 5, &mut coloring).unwrap();
        coloring.promote(upper, &pdrta).unwrap();

        pdrta.merge(root, lower, &mut coloring, None).unwrap();
        assert!(pdrta.check_consistency().is_ok());
        // the tail (a, 8) after the loop was routed into the upper interval
        assert_eq!(pdrta.run([(0, 1), (0, 8)]), Some(upper));
        assert_eq!(pdrta.run([(0, 1), (0, 1)]), Some(root));
        assert_eq!(pdrta.state(upper).unwrap().ends().len(), 2);
    }

    #[test]
    fn merge_preconditions_and_stats() {
        let sample = TimedSample::from_symbolic([vec![("a", 1)], vec![("b", 1)], vec![]]);
        let mut pdrta = Pdrta::from_sample(&sample, 1).unwrap();
        let mut coloring = StateColoring::new(&pdrta);
        let a = pdrta.run([(0, 1)]).unwrap();
        let b = pdrta.run([(1, 1)]).unwrap();
        assert!(matches!(
            pdrta.merge(a, b, &mut coloring, None),
            Err(PdrtaError::IllegalOperation(_))
        ));
        assert!(matches!(
            pdrta.merge(pdrta.root(), pdrta.root(), &mut coloring, None),
            Err(PdrtaError::IllegalOperation(_))
        ));

        let mut acc = PairAccumulator::new(TestSettings::default(), Descent::Always);
        pdrta.merge(pdrta.root(), a, &mut coloring, Some(&mut acc)).unwrap();
        assert_eq!(acc.pairs(), 1);
        assert_eq!(acc.value().p_value(), None);
    }
}
