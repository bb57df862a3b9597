use std::collections::{BTreeMap, VecDeque};

use itertools::Itertools;
use tracing::trace;

use crate::{
    alphabet::{SymbolIndex, TimedAlphabet},
    error::{PdrtaError, Result},
    interval::{check_partition, find_interval, Interval},
    math::{Map, Set},
    statistic::{HistogramBins, StateStatistic},
    tail::{Head, Tail, TailId, TailStore, WordId},
    word::TimedSample,
    Delay, Show,
};

/// Identifier of a state. Ids are never reused within one automaton.
pub type StateId = usize;

/// A state of a [`Pdrta`]. For every symbol it keeps an ordered partition of the delay axis into
/// [`Interval`]s, and it remembers which training words end in it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PdrtaState {
    id: StateId,
    intervals: Vec<Vec<Interval>>,
    ends: Vec<WordId>,
}

impl PdrtaState {
    fn new(id: StateId, alphabet_size: usize) -> Self {
        Self {
            id,
            intervals: (0..alphabet_size).map(|_| vec![Interval::full()]).collect(),
            ends: vec![],
        }
    }

    /// The id of the state.
    pub fn id(&self) -> StateId {
        self.id
    }

    /// The ordered intervals of the given symbol. Empty if the symbol is unknown.
    pub fn intervals(&self, symbol: SymbolIndex) -> &[Interval] {
        self.intervals.get(symbol).map(Vec::as_slice).unwrap_or(&[])
    }

    pub(crate) fn intervals_mut(&mut self, symbol: SymbolIndex) -> Option<&mut Vec<Interval>> {
        self.intervals.get_mut(symbol)
    }

    /// Returns the interval of `symbol` that contains `delay`.
    pub fn interval(&self, symbol: SymbolIndex, delay: Delay) -> Option<&Interval> {
        let intervals = self.intervals(symbol);
        find_interval(intervals, delay).map(|i| &intervals[i])
    }

    /// Follows the transition for `symbol` after waiting `delay`.
    pub fn successor(&self, symbol: SymbolIndex, delay: Delay) -> Option<StateId> {
        self.interval(symbol, delay).and_then(Interval::target)
    }

    /// The training words that end in this state.
    pub fn ends(&self) -> &[WordId] {
        &self.ends
    }

    pub(crate) fn ends_mut(&mut self) -> &mut Vec<WordId> {
        &mut self.ends
    }

    /// A state is final if at least one training word ends in it.
    pub fn is_final(&self) -> bool {
        !self.ends.is_empty()
    }

    /// Number of tails leaving the state.
    pub fn tail_count(&self) -> usize {
        self.intervals.iter().flatten().map(Interval::tail_count).sum()
    }

    /// Number of words that passed through or ended in the state.
    pub fn visits(&self) -> usize {
        self.tail_count() + self.ends.len()
    }

    /// Iterates over `(symbol, position, interval)` for every interval of the state.
    pub fn all_intervals(&self) -> impl Iterator<Item = (SymbolIndex, usize, &Interval)> + '_ {
        self.intervals.iter().enumerate().flat_map(|(symbol, intervals)| {
            intervals
                .iter()
                .enumerate()
                .map(move |(position, interval)| (symbol, position, interval))
        })
    }

    /// Iterates over the targets of all intervals, in symbol and interval order.
    pub fn targets(&self) -> impl Iterator<Item = StateId> + '_ {
        self.all_intervals().filter_map(|(_, _, i)| i.target())
    }

    /// Everything that arrived in the state: all outgoing tails, followed by the words ending here.
    pub fn heads(&self) -> Vec<Head> {
        self.intervals
            .iter()
            .flatten()
            .flat_map(|i| i.tails().iter().map(|t| Head::Tail(*t)))
            .chain(self.ends.iter().map(|w| Head::End(*w)))
            .collect()
    }
}

/// One interval of the automaton as seen from the outside.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransitionSummary {
    /// The state the interval belongs to.
    pub source: StateId,
    /// The symbol the interval belongs to.
    pub symbol: SymbolIndex,
    /// Inclusive lower bound of the guard.
    pub begin: Delay,
    /// Exclusive upper bound of the guard, [`crate::INFINITY`] if unbounded.
    pub end: Delay,
    /// The target state, `None` for an undefined transition.
    pub target: Option<StateId>,
    /// All delays observed on the interval, ascending.
    pub delays: Vec<Delay>,
    /// Whether all observed delays coincide, so that any density fitted to them is a point mass.
    pub degenerate: bool,
}

/// A probabilistic deterministic real-time automaton. Every state has, for every symbol, a
/// partition of the delay axis into intervals, each leading to at most one target. The automaton
/// owns the tails of its training sample and keeps every tail in exactly one interval, so the
/// observations that support a transition can always be recovered.
///
/// # Example
/// ```
/// use pdrta::prelude::*;
///
/// let sample = TimedSample::from_symbolic([vec![("a", 1), ("b", 2)], vec![("a", 1), ("b", 2)]]);
/// let pta = Pdrta::from_sample(&sample, 1).unwrap();
/// assert_eq!(pta.size(), 3);
/// assert!(pta.check_consistency().is_ok());
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Pdrta {
    alphabet: TimedAlphabet,
    tails: TailStore,
    states: BTreeMap<StateId, PdrtaState>,
    root: StateId,
    next_id: StateId,
    min_data: usize,
    borders: Vec<Delay>,
}

impl Pdrta {
    /// Builds the prefix-tree acceptor of the given sample, using the default time histogram.
    pub fn from_sample(sample: &TimedSample, min_data: usize) -> Result<Self> {
        Self::from_sample_with_bins(sample, min_data, &HistogramBins::default())
    }

    /// Builds the prefix-tree acceptor of the given sample. There is one state per distinct
    /// sequence of symbols, and every symbol of every state has the single interval `[0, inf)`.
    pub fn from_sample_with_bins(
        sample: &TimedSample,
        min_data: usize,
        bins: &HistogramBins,
    ) -> Result<Self> {
        if sample.is_empty() {
            return Err(PdrtaError::EmptyInput);
        }
        sample.validate()?;
        let tails = TailStore::from_sample(sample);
        let mut pdrta = Self {
            alphabet: sample.alphabet().clone(),
            states: BTreeMap::new(),
            root: 0,
            next_id: 0,
            min_data,
            borders: bins.borders(sample),
            tails,
        };
        pdrta.root = pdrta.add_state();
        let heads = pdrta.tails.initial_heads();
        pdrta.populate(pdrta.root, heads)?;
        trace!(
            "built prefix tree with {} states for {} words",
            pdrta.size(),
            sample.len()
        );
        Ok(pdrta)
    }

    /// The alphabet the automaton reads.
    pub fn alphabet(&self) -> &TimedAlphabet {
        &self.alphabet
    }

    /// Number of symbols.
    pub fn alphabet_size(&self) -> usize {
        self.alphabet.size()
    }

    /// Minimal number of observations a statistical test needs.
    pub fn min_data(&self) -> usize {
        self.min_data
    }

    /// The initial state.
    pub fn root(&self) -> StateId {
        self.root
    }

    /// Number of states.
    pub fn size(&self) -> usize {
        self.states.len()
    }

    /// The state with the given id.
    pub fn state(&self, id: StateId) -> Option<&PdrtaState> {
        self.states.get(&id)
    }

    /// Like [`Self::state`] but fails with [`PdrtaError::UnknownState`].
    pub fn try_state(&self, id: StateId) -> Result<&PdrtaState> {
        self.states.get(&id).ok_or(PdrtaError::UnknownState(id))
    }

    pub(crate) fn state_mut(&mut self, id: StateId) -> Result<&mut PdrtaState> {
        self.states.get_mut(&id).ok_or(PdrtaError::UnknownState(id))
    }

    /// Iterates over all states in ascending id order.
    pub fn states(&self) -> impl Iterator<Item = &PdrtaState> + '_ {
        self.states.values()
    }

    /// Ids of all states in ascending order.
    pub fn state_ids(&self) -> impl Iterator<Item = StateId> + '_ {
        self.states.keys().copied()
    }

    /// Whether a state with the given id exists.
    pub fn contains(&self, id: StateId) -> bool {
        self.states.contains_key(&id)
    }

    /// The tail with the given id.
    pub fn tail(&self, id: TailId) -> Option<&Tail> {
        self.tails.get(id)
    }

    /// The arena of all tails.
    pub fn tails(&self) -> &TailStore {
        &self.tails
    }

    /// Borders of the time histogram used by the statistical tests.
    pub fn histogram_borders(&self) -> &[Delay] {
        &self.borders
    }

    /// Follows a sequence of `(symbol, delay)` pairs from the root.
    pub fn run<I: IntoIterator<Item = (SymbolIndex, Delay)>>(&self, events: I) -> Option<StateId> {
        events.into_iter().try_fold(self.root, |q, (symbol, delay)| {
            self.state(q)?.successor(symbol, delay)
        })
    }

    /// Finds the unique interval that leads to `target`, as `(source, symbol, position)`.
    /// States are searched in ascending id order.
    pub fn parent_of(&self, target: StateId) -> Option<(StateId, SymbolIndex, usize)> {
        self.states.values().find_map(|q| {
            q.all_intervals()
                .find(|(_, _, i)| i.target() == Some(target))
                .map(|(symbol, position, _)| (q.id, symbol, position))
        })
    }

    pub(crate) fn add_state(&mut self) -> StateId {
        let id = self.next_id;
        self.next_id += 1;
        self.states
            .insert(id, PdrtaState::new(id, self.alphabet.size()));
        id
    }

    pub(crate) fn remove_state(&mut self, id: StateId) -> Result<PdrtaState> {
        self.states.remove(&id).ok_or(PdrtaError::UnknownState(id))
    }

    /// Cuts the interval at `position` into `[begin, at)` and `[at, end)`, distributing its tails.
    pub(crate) fn divide_interval(
        &mut self,
        state: StateId,
        symbol: SymbolIndex,
        position: usize,
        at: Delay,
    ) -> Result<()> {
        let Pdrta { states, tails, .. } = self;
        let intervals = states
            .get_mut(&state)
            .ok_or(PdrtaError::UnknownState(state))?
            .intervals
            .get_mut(symbol)
            .ok_or_else(|| PdrtaError::invariant(format!("state {state} lacks symbol {symbol}")))?;
        let interval = intervals
            .get_mut(position)
            .ok_or_else(|| PdrtaError::invariant(format!("state {state} lacks interval {position}")))?;
        if !(interval.begin() < at && at < interval.end()) {
            return Err(PdrtaError::illegal(format!(
                "{at} does not lie strictly inside {}",
                interval.show()
            )));
        }
        let upper = interval.split_off(at, tails);
        intervals.insert(position + 1, upper);
        Ok(())
    }

    /// Grows the prefix tree below the fresh state `state` from the heads that arrive in it.
    pub(crate) fn populate(&mut self, state: StateId, heads: Vec<Head>) -> Result<()> {
        let mut queue = VecDeque::from([(state, heads)]);
        while let Some((q, heads)) = queue.pop_front() {
            let mut buckets = vec![vec![]; self.alphabet.size()];
            for head in heads {
                match head {
                    Head::End(word) => self.state_mut(q)?.ends.push(word),
                    Head::Tail(tail) => buckets[self.tails[tail].symbol()].push(tail),
                }
            }
            for (symbol, bucket) in buckets.into_iter().enumerate() {
                if bucket.is_empty() {
                    continue;
                }
                let successors = bucket.iter().map(|t| self.tails[*t].successor()).collect_vec();
                let child = self.add_state();
                let interval = self
                    .state_mut(q)?
                    .intervals
                    .get_mut(symbol)
                    .and_then(|intervals| intervals.first_mut())
                    .ok_or_else(|| PdrtaError::invariant(format!("state {q} lacks symbol {symbol}")))?;
                interval.extend_tails(bucket);
                interval.set_target(Some(child));
                queue.push_back((child, successors));
            }
        }
        Ok(())
    }

    /// Collects `state` and everything reachable from it. Fails if one of these states is
    /// contained in `protected`, which is used to make sure no red state is ever deleted.
    pub(crate) fn subtree(&self, state: StateId, protected: &Set<StateId>) -> Result<Vec<StateId>> {
        let mut seen = Set::default();
        let mut queue = VecDeque::from([state]);
        let mut out = vec![];
        while let Some(q) = queue.pop_front() {
            if !seen.insert(q) {
                continue;
            }
            if protected.contains(&q) {
                return Err(PdrtaError::invariant(format!(
                    "subtree of {state} contains protected state {q}"
                )));
            }
            out.push(q);
            queue.extend(self.try_state(q)?.targets());
        }
        Ok(out)
    }

    /// Returns all states reachable from the root.
    pub fn reachable(&self) -> Vec<StateId> {
        let mut seen = Set::default();
        let mut queue = VecDeque::from([self.root]);
        let mut out = vec![];
        while let Some(q) = queue.pop_front() {
            if !seen.insert(q) {
                continue;
            }
            out.push(q);
            if let Some(state) = self.state(q) {
                queue.extend(state.targets());
            }
        }
        out.sort_unstable();
        out
    }

    /// Number of tails held by states reachable from the root. Equals the number of events in
    /// the training sample for every consistent automaton.
    pub fn tail_count(&self) -> usize {
        self.reachable()
            .into_iter()
            .filter_map(|q| self.state(q))
            .map(PdrtaState::tail_count)
            .sum()
    }

    /// Verifies the structural invariants: every (state, symbol) has a sorted, gapless
    /// partition of `[0, inf)`, every tail lies in an interval of its symbol whose bounds contain
    /// its delay, every non-empty interval has an existing target that receives the successors of
    /// its tails, and every tail and every word end is held exactly once.
    pub fn check_consistency(&self) -> Result<()> {
        let mut location: Map<Head, StateId> = Map::default();
        let mut place = |head: Head, q: StateId| {
            if location.insert(head, q).is_some() {
                Err(PdrtaError::invariant(format!("{head:?} is held twice")))
            } else {
                Ok(())
            }
        };
        for q in self.states.values() {
            if q.intervals.len() != self.alphabet.size() {
                return Err(PdrtaError::invariant(format!(
                    "state {} has {} symbols instead of {}",
                    q.id,
                    q.intervals.len(),
                    self.alphabet.size()
                )));
            }
            for (symbol, intervals) in q.intervals.iter().enumerate() {
                check_partition(intervals)
                    .map_err(|e| PdrtaError::invariant(format!("state {}, symbol {symbol}: {e}", q.id)))?;
                for interval in intervals {
                    for t in interval.tails() {
                        let tail = self.tails.get(*t).ok_or_else(|| {
                            PdrtaError::invariant(format!("unknown tail {t} in state {}", q.id))
                        })?;
                        if tail.symbol() != symbol || !interval.contains(tail.delay()) {
                            return Err(PdrtaError::invariant(format!(
                                "tail {t} ({}, {}) misplaced in state {} symbol {symbol} {}",
                                tail.symbol(),
                                tail.delay(),
                                q.id,
                                interval.show()
                            )));
                        }
                        place(Head::Tail(*t), q.id)?;
                    }
                    match interval.target() {
                        Some(target) if !self.states.contains_key(&target) => {
                            return Err(PdrtaError::invariant(format!(
                                "state {} points to missing state {target}",
                                q.id
                            )))
                        }
                        None if !interval.is_empty() => {
                            return Err(PdrtaError::invariant(format!(
                                "non-empty interval {} of state {} has no target",
                                interval.show(),
                                q.id
                            )))
                        }
                        _ => {}
                    }
                }
            }
            for word in &q.ends {
                place(Head::End(*word), q.id)?;
            }
        }
        if location.len() != self.tails.len() + self.tails.word_count() {
            return Err(PdrtaError::invariant(format!(
                "{} of {} tails and word ends are held",
                location.len(),
                self.tails.len() + self.tails.word_count()
            )));
        }
        for word in 0..self.tails.word_count() {
            let head = self.tails.initial_head(word);
            if location.get(&head) != Some(&self.root) {
                return Err(PdrtaError::invariant(format!(
                    "word {word} does not start in the root"
                )));
            }
        }
        for q in self.states.values() {
            for (_, _, interval) in q.all_intervals() {
                let Some(target) = interval.target() else {
                    continue;
                };
                for t in interval.tails() {
                    let successor = self.tails[*t].successor();
                    if location.get(&successor) != Some(&target) {
                        return Err(PdrtaError::invariant(format!(
                            "successor of tail {t} is not held by state {target}"
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// Exports every interval that has a target.
    pub fn transitions(&self) -> Vec<TransitionSummary> {
        self.states
            .values()
            .flat_map(|q| {
                q.all_intervals()
                    .filter(|(_, _, i)| i.target().is_some())
                    .map(|(symbol, _, interval)| TransitionSummary {
                        source: q.id,
                        symbol,
                        begin: interval.begin(),
                        end: interval.end(),
                        target: interval.target(),
                        delays: interval.delays(&self.tails),
                        degenerate: interval.is_degenerate(&self.tails),
                    })
            })
            .collect()
    }

    /// The un-pooled log-likelihood of the training sample: the sum over all states of the
    /// log-likelihood of their symbol and time histograms.
    pub fn log_likelihood(&self) -> f64 {
        self.states
            .keys()
            .map(|q| StateStatistic::of_state(self, *q).log_likelihood())
            .sum()
    }

    /// Renders the states as a table with one column per symbol. Every cell lists the intervals
    /// of the symbol together with target and number of tails.
    pub fn build_table<SD>(&self, state_decorator: SD) -> String
    where
        SD: Fn(&PdrtaState) -> String,
    {
        let mut builder = tabled::builder::Builder::default();
        builder.push_record(
            std::iter::once("State".to_string())
                .chain(self.alphabet.symbols().map(|(_, s)| s.to_string()))
                .chain(std::iter::once("End".to_string())),
        );
        for q in self.states.values() {
            let mut row = vec![state_decorator(q)];
            for symbol in self.alphabet.universe() {
                let cell = q
                    .intervals(symbol)
                    .iter()
                    .filter(|i| i.target().is_some() || !i.is_empty())
                    .map(|i| {
                        format!(
                            "{} -> {} ({})",
                            i.show(),
                            i.target().map_or("-".to_string(), |t| format!("q{t}")),
                            i.tail_count()
                        )
                    })
                    .join("\n");
                row.push(if cell.is_empty() { "-".to_string() } else { cell });
            }
            row.push(q.ends.len().to_string());
            builder.push_record(row);
        }
        builder
            .build()
            .with(tabled::settings::Style::rounded())
            .to_string()
    }
}

impl Show for Pdrta {
    fn show(&self) -> String {
        self.build_table(|q| {
            if q.id == self.root {
                format!("-> q{}", q.id)
            } else {
                format!("q{}", q.id)
            }
        })
    }
}
