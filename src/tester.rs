//! Scoring of candidate operations. Every tester answers the same question: how likely is it that
//! the states an operation would identify (for a merge) or separate (for a split) behave alike?
//!
//! The [`TesterKind::Naive`] tester applies the operation to a copy of the automaton and collects
//! statistics while folding. The analytic testers never touch the automaton; they replay the fold
//! on lightweight virtual states that only record which heads were pooled into them. Both visit the
//! same pairs in the same order, so they produce the same statistic.

use std::collections::VecDeque;

use tracing::trace;

use crate::{
    alphabet::SymbolIndex,
    coloring::StateColoring,
    error::{PdrtaError, Result},
    interval::find_interval,
    math::Map,
    operations::successors_in,
    pdrta::{Pdrta, StateId},
    statistic::{
        Descent, LikelihoodValue, PairAccumulator, SplitDescent, StateStatistic, Statistic,
        TestSettings,
    },
    tail::Head,
    Delay, INFINITY,
};

/// The strategy used to score candidates.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum TesterKind {
    /// Applies the operation to a clone of the automaton and collects statistics while folding.
    Naive,
    /// Replays the fold on virtual states without modifying the automaton.
    #[default]
    Analytic,
    /// Like [`TesterKind::Analytic`], but combines the sub-tests with Fisher's method.
    Fisher,
}

/// An operation the learner may apply.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Candidate {
    /// Merge the blue state into the red one.
    Merge {
        /// The red state that remains.
        red: StateId,
        /// The blue state that is folded away.
        blue: StateId,
    },
    /// Split an interval of a red state at the given delay.
    Split {
        /// The red state owning the interval.
        state: StateId,
        /// The symbol of the interval.
        symbol: SymbolIndex,
        /// The first delay of the upper part.
        at: Delay,
    },
}

impl Candidate {
    /// Whether the candidate is a merge.
    pub fn is_merge(&self) -> bool {
        matches!(self, Candidate::Merge { .. })
    }
}

/// Scores candidates according to a [`TesterKind`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OperationTester {
    kind: TesterKind,
    settings: TestSettings,
    split_descent: SplitDescent,
}

impl OperationTester {
    /// Creates a tester. The statistic of `settings` is overwritten according to `kind`.
    pub fn new(kind: TesterKind, mut settings: TestSettings, split_descent: SplitDescent) -> Self {
        settings.statistic = match kind {
            TesterKind::Fisher => Statistic::Fisher,
            _ => Statistic::LikelihoodRatio,
        };
        Self {
            kind,
            settings,
            split_descent,
        }
    }

    /// The strategy in use.
    pub fn kind(&self) -> TesterKind {
        self.kind
    }

    /// Settings of the statistical comparisons.
    pub fn settings(&self) -> &TestSettings {
        &self.settings
    }

    /// Scores a candidate, see [`Self::test_merge`] and [`Self::test_split`].
    pub fn score(
        &self,
        pdrta: &Pdrta,
        coloring: &StateColoring,
        candidate: Candidate,
    ) -> Result<Option<f64>> {
        match candidate {
            Candidate::Merge { red, blue } => self.test_merge(pdrta, coloring, red, blue),
            Candidate::Split { state, symbol, at } => {
                self.test_split(pdrta, coloring, state, symbol, at)
            }
        }
    }

    /// The p-value of the hypothesis that `blue` behaves like `red`. `None` if the transition into
    /// `blue` carries fewer than `2 * min_data` tails or no sub-test had enough data.
    pub fn test_merge(
        &self,
        pdrta: &Pdrta,
        coloring: &StateColoring,
        red: StateId,
        blue: StateId,
    ) -> Result<Option<f64>> {
        if !coloring.is_red(red) || !coloring.is_blue(blue) {
            return Err(PdrtaError::illegal(format!(
                "cannot test merging {blue} into {red}"
            )));
        }
        let (parent, symbol, position) = coloring
            .red()
            .filter_map(|p| pdrta.state(p))
            .find_map(|p| {
                p.all_intervals()
                    .find(|(_, _, i)| i.target() == Some(blue))
                    .map(|(symbol, position, _)| (p.id(), symbol, position))
            })
            .ok_or_else(|| PdrtaError::invariant(format!("blue state {blue} has no red parent")))?;
        let support = pdrta.try_state(parent)?.intervals(symbol)[position].tail_count();
        if support < 2 * self.settings.min_data {
            return Ok(None);
        }

        let mut acc = PairAccumulator::new(self.settings, Descent::Always);
        match self.kind {
            TesterKind::Naive => {
                let mut trial = pdrta.clone();
                let mut trial_coloring = coloring.clone();
                trial.merge(red, blue, &mut trial_coloring, Some(&mut acc))?;
            }
            TesterKind::Analytic | TesterKind::Fisher => {
                let mut fold = VirtualFold::new(pdrta);
                let parent = fold.real(parent);
                let red_node = fold.real(red);
                fold.nodes[parent].children.insert((symbol, position), red_node);
                let heads = pdrta.try_state(blue)?.heads();
                fold.run(red_node, heads, &mut acc)?;
            }
        }
        trace!(
            "merge {blue} into {red}: ratio {:.4}, {} parameters over {} pairs",
            acc.value().ratio(),
            acc.value().parameters(),
            acc.pairs()
        );
        Ok(acc.value().p_value())
    }

    /// The p-value of the hypothesis that the tails of the interval containing `at` behave alike on
    /// both sides of `at`. `None` if the interval carries fewer than `2 * min_data` tails or no
    /// sub-test had enough data.
    pub fn test_split(
        &self,
        pdrta: &Pdrta,
        coloring: &StateColoring,
        state: StateId,
        symbol: SymbolIndex,
        at: Delay,
    ) -> Result<Option<f64>> {
        if !coloring.is_red(state) {
            return Err(PdrtaError::illegal(format!(
                "cannot test splitting state {state}, it is not red"
            )));
        }
        let intervals = pdrta.try_state(state)?.intervals(symbol);
        let interval = find_interval(intervals, at)
            .map(|i| &intervals[i])
            .ok_or_else(|| PdrtaError::illegal(format!("state {state} has no symbol {symbol}")))?;
        if interval.begin() == at {
            return Err(PdrtaError::illegal(format!("cannot split at lower bound {at}")));
        }
        if interval.target().is_some_and(|t| coloring.is_red(t)) {
            return Err(PdrtaError::illegal(format!(
                "interval of state {state} leads to a red state"
            )));
        }
        if interval.tail_count() < 2 * self.settings.min_data {
            return Ok(None);
        }

        let mut acc = PairAccumulator::new(self.settings, Descent::Split(self.split_descent));
        match self.kind {
            TesterKind::Naive => {
                let mut trial = pdrta.clone();
                let mut trial_coloring = coloring.clone();
                let (lower, upper) = trial.split(state, symbol, at, &mut trial_coloring)?;
                trial.fold(lower, upper, &trial_coloring.red_set(), Some(&mut acc))?;
            }
            TesterKind::Analytic | TesterKind::Fisher => {
                let heads = pdrta.try_state(state)?.heads();
                let lower = successors_in(pdrta, &heads, symbol, interval.begin(), at);
                let upper = successors_in(pdrta, &heads, symbol, at, interval.end());
                let mut fold = VirtualFold::new(pdrta);
                let start = fold.fresh(lower);
                fold.run(start, upper, &mut acc)?;
            }
        }
        trace!(
            "split {state} on {symbol} at {at}: ratio {:.4}, {} parameters over {} pairs",
            acc.value().ratio(),
            acc.value().parameters(),
            acc.pairs()
        );
        Ok(acc.value().p_value())
    }

    /// Applies the candidate to a copy of the automaton and returns the accumulated statistic
    /// instead of its p-value.
    pub fn statistic(
        &self,
        pdrta: &Pdrta,
        coloring: &StateColoring,
        candidate: Candidate,
    ) -> Result<LikelihoodValue> {
        let descent = match candidate {
            Candidate::Merge { .. } => Descent::Always,
            Candidate::Split { .. } => Descent::Split(self.split_descent),
        };
        let mut acc = PairAccumulator::new(self.settings, descent);
        let mut trial = pdrta.clone();
        let mut trial_coloring = coloring.clone();
        match candidate {
            Candidate::Merge { red, blue } => {
                trial.merge(red, blue, &mut trial_coloring, Some(&mut acc))?
            }
            Candidate::Split { state, symbol, at } => {
                let (lower, upper) = trial.split(state, symbol, at, &mut trial_coloring)?;
                trial.fold(lower, upper, &trial_coloring.red_set(), Some(&mut acc))?;
            }
        }
        Ok(acc.value())
    }
}

/// A state as seen by the virtual fold: an optional real state plus the heads pooled into it.
#[derive(Debug, Default)]
struct VirtualNode {
    base: Option<StateId>,
    extra: Vec<Head>,
    children: Map<(SymbolIndex, usize), usize>,
}

/// Replays a fold without modifying the automaton.
struct VirtualFold<'a> {
    pdrta: &'a Pdrta,
    nodes: Vec<VirtualNode>,
    real: Map<StateId, usize>,
}

impl<'a> VirtualFold<'a> {
    fn new(pdrta: &'a Pdrta) -> Self {
        Self {
            pdrta,
            nodes: vec![],
            real: Map::default(),
        }
    }

    fn real(&mut self, state: StateId) -> usize {
        if let Some(node) = self.real.get(&state) {
            return *node;
        }
        let node = self.nodes.len();
        self.nodes.push(VirtualNode {
            base: Some(state),
            ..Default::default()
        });
        self.real.insert(state, node);
        node
    }

    fn fresh(&mut self, heads: Vec<Head>) -> usize {
        self.nodes.push(VirtualNode {
            base: None,
            extra: heads,
            children: Map::default(),
        });
        self.nodes.len() - 1
    }

    fn statistic(&self, node: usize) -> StateStatistic {
        let node = &self.nodes[node];
        let mut stat = match node.base {
            Some(q) => StateStatistic::of_state(self.pdrta, q),
            None => StateStatistic::empty(
                self.pdrta.alphabet_size(),
                self.pdrta.histogram_borders(),
            ),
        };
        stat.absorb(&StateStatistic::from_heads(self.pdrta, &node.extra));
        stat
    }

    fn bounds(&self, node: usize, symbol: SymbolIndex) -> Vec<(Delay, Delay)> {
        match self.nodes[node].base.and_then(|q| self.pdrta.state(q)) {
            Some(q) => q
                .intervals(symbol)
                .iter()
                .map(|i| (i.begin(), i.end()))
                .collect(),
            None => vec![(0, INFINITY)],
        }
    }

    /// The node reached from `node` through the given interval, `None` if it has no target yet.
    fn child(&mut self, node: usize, symbol: SymbolIndex, position: usize) -> Result<Option<usize>> {
        if let Some(child) = self.nodes[node].children.get(&(symbol, position)) {
            return Ok(Some(*child));
        }
        let child = match self.nodes[node].base {
            Some(q) => {
                let target = self
                    .pdrta
                    .try_state(q)?
                    .intervals(symbol)
                    .get(position)
                    .and_then(|i| i.target());
                target.map(|t| self.real(t))
            }
            None => {
                let heads = successors_in(self.pdrta, &self.nodes[node].extra, symbol, 0, INFINITY);
                (!heads.is_empty()).then(|| self.fresh(heads))
            }
        };
        if let Some(child) = child {
            self.nodes[node].children.insert((symbol, position), child);
        }
        Ok(child)
    }

    /// Pools `heads` into `start` and everything they induce, visiting pairs in the order a real
    /// fold would.
    fn run(&mut self, start: usize, heads: Vec<Head>, acc: &mut PairAccumulator) -> Result<()> {
        let mut queue = VecDeque::from([(start, heads, true)]);
        while let Some((node, heads, counted)) = queue.pop_front() {
            let descend = counted
                && acc.record(
                    &self.statistic(node),
                    &StateStatistic::from_heads(self.pdrta, &heads),
                );
            for symbol in self.pdrta.alphabet().universe() {
                for (position, (begin, end)) in self.bounds(node, symbol).into_iter().enumerate() {
                    let successors = successors_in(self.pdrta, &heads, symbol, begin, end);
                    if successors.is_empty() {
                        continue;
                    }
                    match self.child(node, symbol, position)? {
                        Some(child) => queue.push_back((child, successors, descend)),
                        None => {
                            let adopted = self.fresh(successors);
                            self.nodes[node].children.insert((symbol, position), adopted);
                        }
                    }
                }
            }
            self.nodes[node].extra.extend(heads);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{statistic::HistogramBins, word::TimedSample};

    fn testers(min_data: usize) -> [OperationTester; 2] {
        let settings = TestSettings {
            min_data,
            ..Default::default()
        };
        [
            OperationTester::new(TesterKind::Naive, settings, SplitDescent::Both),
            OperationTester::new(TesterKind::Analytic, settings, SplitDescent::Both),
        ]
    }

    /// `count` words `a^k` whose lengths follow a geometric distribution with ratio `1 / 2`,
    /// followed by words that continue differently after the first `a` if `skew` is set.
    fn corpus(count: usize, skew: usize) -> TimedSample {
        let mut words = vec![];
        for k in 0..8usize {
            for _ in 0..(count >> (k + 1)) {
                words.push(vec![("a", 1); k]);
            }
        }
        for i in 0..skew {
            let mut word = vec![("a", 1), ("b", 2 + (i % 3) as u64)];
            word.extend(std::iter::repeat(("a", 1)).take(i % 4));
            words.push(word);
        }
        TimedSample::from_symbolic(words)
    }

    fn agree(sample: &TimedSample, min_data: usize) -> Option<f64> {
        let pdrta = Pdrta::from_sample(sample, min_data).unwrap();
        let coloring = StateColoring::new(&pdrta);
        let blue = coloring.blue().next().unwrap();
        let [naive, analytic] = testers(min_data);
        let p = naive
            .test_merge(&pdrta, &coloring, pdrta.root(), blue)
            .unwrap();
        let q = analytic
            .test_merge(&pdrta, &coloring, pdrta.root(), blue)
            .unwrap();
        match (p, q) {
            (Some(p), Some(q)) => assert!((p - q).abs() < 1e-9, "naive {p} analytic {q}"),
            (p, q) => assert_eq!(p, q),
        }
        // the analytic tester never modifies the automaton
        assert!(pdrta.check_consistency().is_ok());
        p
    }

    #[test_log::test]
    fn naive_and_analytic_agree_on_merges() {
        let identical = agree(&corpus(512, 0), 5).unwrap();
        assert!(identical > 0.05);
        let slight = agree(&corpus(512, 6), 5).unwrap();
        assert!(slight > 0.0);
        let gross = agree(&corpus(256, 200), 5).unwrap();
        assert!(gross < 0.05);
    }

    #[test_log::test]
    fn naive_and_analytic_agree_on_splits() {
        let mut words = vec![];
        for i in 0..60u64 {
            words.push(vec![("a", 1 + i % 3), ("b", 1)]);
            words.push(vec![("a", 50 + i % 5), ("c", 1), ("c", 2)]);
        }
        let sample = TimedSample::from_symbolic(words);
        let pdrta = Pdrta::from_sample(&sample, 5).unwrap();
        let coloring = StateColoring::new(&pdrta);
        for tester in testers(5) {
            let p = tester
                .test_split(&pdrta, &coloring, pdrta.root(), 0, 50)
                .unwrap()
                .unwrap();
            assert!(p < 1e-6);
        }
        let [naive, analytic] = testers(5);
        for at in [2, 3, 50, 52, 54] {
            let p = naive.test_split(&pdrta, &coloring, pdrta.root(), 0, at).unwrap();
            let q = analytic.test_split(&pdrta, &coloring, pdrta.root(), 0, at).unwrap();
            match (p, q) {
                (Some(p), Some(q)) => assert!((p - q).abs() < 1e-9),
                (p, q) => assert_eq!(p, q),
            }
        }
    }

    #[test]
    fn splitting_a_homogeneous_interval_is_not_significant() {
        let words = (0..80u64).map(|i| {
            if i % 2 == 0 {
                vec![("a", 1 + i % 4), ("b", 1)]
            } else {
                vec![("a", 1 + i % 4)]
            }
        });
        let sample = TimedSample::from_symbolic(words);
        let pdrta = Pdrta::from_sample(&sample, 5).unwrap();
        let coloring = StateColoring::new(&pdrta);
        for tester in testers(5) {
            let p = tester
                .test_split(&pdrta, &coloring, pdrta.root(), 0, 3)
                .unwrap()
                .unwrap();
            assert!(p > 0.5);
        }
    }

    #[test]
    fn insufficient_data() {
        let sample = TimedSample::from_symbolic([vec![("a", 1)], vec![("a", 2)], vec![]]);
        let pdrta = Pdrta::from_sample(&sample, 2).unwrap();
        let coloring = StateColoring::new(&pdrta);
        let blue = coloring.blue().next().unwrap();
        for tester in testers(2) {
            assert_eq!(
                tester.test_merge(&pdrta, &coloring, pdrta.root(), blue),
                Ok(None)
            );
            assert_eq!(
                tester.test_split(&pdrta, &coloring, pdrta.root(), 0, 2),
                Ok(None)
            );
        }
        let [naive, _] = testers(2);
        assert!(naive
            .test_merge(&pdrta, &coloring, blue, pdrta.root())
            .is_err());
    }

    #[test]
    fn analytic_statistic_matches_likelihood_difference() {
        // the root sees `a` with delay 1 and ends; its child only ends, so merging the child into
        // the root compares the symbol histograms of both states and nothing else
        let mut words = vec![];
        for _ in 0..30 {
            words.push(vec![("a", 1)]);
        }
        for _ in 0..20 {
            words.push(vec![]);
        }
        let sample = TimedSample::from_symbolic(words);
        let bins = HistogramBins::Fixed(vec![]);
        let pdrta = Pdrta::from_sample_with_bins(&sample, 5, &bins).unwrap();
        let coloring = StateColoring::new(&pdrta);
        let blue = coloring.blue().next().unwrap();
        let [naive, _] = testers(5);
        let value = naive
            .statistic(&pdrta, &coloring, Candidate::Merge { red: pdrta.root(), blue })
            .unwrap();

        let before = pdrta.log_likelihood();
        let mut merged = pdrta.clone();
        let mut merged_coloring = coloring.clone();
        merged
            .merge(pdrta.root(), blue, &mut merged_coloring, None)
            .unwrap();
        let after = merged.log_likelihood();
        assert!((value.ratio() - 2.0 * (before - after)).abs() < 1e-9);
        assert_eq!(value.parameters(), 1);
    }

    #[test]
    fn fisher_tester_scores() {
        let sample = corpus(512, 0);
        let pdrta = Pdrta::from_sample(&sample, 5).unwrap();
        let coloring = StateColoring::new(&pdrta);
        let blue = coloring.blue().next().unwrap();
        let fisher = OperationTester::new(
            TesterKind::Fisher,
            TestSettings {
                min_data: 5,
                ..Default::default()
            },
            SplitDescent::Both,
        );
        assert_eq!(fisher.settings().statistic, Statistic::Fisher);
        let p = fisher
            .score(&pdrta, &coloring, Candidate::Merge { red: pdrta.root(), blue })
            .unwrap()
            .unwrap();
        assert!(p > 0.05);
    }
}
