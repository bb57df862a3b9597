//! The red/blue search that turns a prefix-tree acceptor into a small [`Pdrta`].
//!
//! Every iteration scores, for each blue state, a merge into every red state and every split of
//! the red interval leading to it. Blue states without an acceptable candidate are promoted to
//! red; if every blue state has one, the best candidate overall is applied. The search converges
//! once no blue state is left.

use std::cmp::Ordering;

use itertools::Itertools;
use tracing::{debug, info, trace, warn};

use crate::{
    coloring::StateColoring,
    config::LearnerConfig,
    error::{PdrtaError, Result},
    math::Set,
    pdrta::{Pdrta, StateId},
    tester::{Candidate, OperationTester},
    word::TimedSample,
};

/// Whether the search still has work to do.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LearnerState {
    /// Blue states remain.
    Searching,
    /// Every state is red.
    Converged,
}

/// What happened during a search.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LearnReport {
    /// Number of iterations that evaluated candidates.
    pub iterations: usize,
    /// Number of applied merges.
    pub merges: usize,
    /// Number of applied splits.
    pub splits: usize,
    /// Number of blue states that were promoted to red.
    pub promotions: usize,
    /// Number of candidates dropped because scoring or applying them failed.
    pub rejected: usize,
}

#[derive(Clone, Copy, Debug)]
struct Scored {
    candidate: Candidate,
    p_value: f64,
    support: usize,
    blue: StateId,
}

impl Scored {
    /// `p` for merges and `1 - p` for splits.
    fn evidence(&self) -> f64 {
        if self.candidate.is_merge() {
            self.p_value
        } else {
            1.0 - self.p_value
        }
    }
}

/// Orders candidates from best to worst: by evidence, merges before splits, larger support, lower
/// blue id and finally lower red id or split time. Among candidates of the same kind the p-values
/// are compared directly, so tiny p-values of splits stay distinguishable.
fn rank(a: &Scored, b: &Scored) -> Ordering {
    let evidence = match (a.candidate.is_merge(), b.candidate.is_merge()) {
        (true, true) => b.p_value.total_cmp(&a.p_value),
        (false, false) => a.p_value.total_cmp(&b.p_value),
        _ => b.evidence().total_cmp(&a.evidence()),
    };
    evidence
        .then_with(|| b.candidate.is_merge().cmp(&a.candidate.is_merge()))
        .then_with(|| b.support.cmp(&a.support))
        .then_with(|| a.blue.cmp(&b.blue))
        .then_with(|| a.candidate.cmp(&b.candidate))
}

/// Learns a [`Pdrta`] from a [`TimedSample`].
///
/// # Example
/// ```
/// use pdrta::prelude::*;
///
/// let sample = TimedSample::from_symbolic([vec![("a", 1), ("b", 2)], vec![("a", 1), ("b", 2)]]);
/// let learner = Learner::new(LearnerConfig::default()).unwrap();
/// let (pdrta, report) = learner.learn_with_report(&sample).unwrap();
/// assert_eq!(pdrta.size(), 3);
/// assert_eq!(report.merges, 0);
/// ```
#[derive(Clone, Debug)]
pub struct Learner {
    config: LearnerConfig,
    tester: OperationTester,
}

impl Learner {
    /// Creates a learner, failing if the configuration is invalid.
    pub fn new(config: LearnerConfig) -> Result<Self> {
        config.validate()?;
        let tester =
            OperationTester::new(config.tester, config.test_settings(), config.split_descent);
        Ok(Self { config, tester })
    }

    /// The configuration in use.
    pub fn config(&self) -> &LearnerConfig {
        &self.config
    }

    /// The tester scoring the candidates.
    pub fn tester(&self) -> &OperationTester {
        &self.tester
    }

    /// Builds the prefix-tree acceptor of `sample` and runs the search to convergence.
    pub fn learn(&self, sample: &TimedSample) -> Result<Pdrta> {
        self.learn_with_report(sample).map(|(pdrta, _)| pdrta)
    }

    /// Like [`Self::learn`], but also returns what the search did.
    pub fn learn_with_report(&self, sample: &TimedSample) -> Result<(Pdrta, LearnReport)> {
        let pta = Pdrta::from_sample_with_bins(
            sample,
            self.config.min_data,
            &self.config.histogram_bins,
        )?;
        self.search(pta).run()
    }

    /// Starts a search on the given automaton, with its root red and the root's targets blue.
    pub fn search(&self, pdrta: Pdrta) -> Search<'_> {
        let coloring = StateColoring::new(&pdrta);
        Search {
            learner: self,
            pdrta,
            coloring,
            state: LearnerState::Searching,
            report: LearnReport::default(),
            banned: Set::default(),
        }
    }
}

/// A search in progress. It can be driven one iteration at a time with [`Search::step`], which
/// lets callers stop between iterations.
#[derive(Debug)]
pub struct Search<'a> {
    learner: &'a Learner,
    pdrta: Pdrta,
    coloring: StateColoring,
    state: LearnerState,
    report: LearnReport,
    banned: Set<Candidate>,
}

impl<'a> Search<'a> {
    /// The current state of the search.
    pub fn state(&self) -> LearnerState {
        self.state
    }

    /// The current hypothesis.
    pub fn pdrta(&self) -> &Pdrta {
        &self.pdrta
    }

    /// The current coloring.
    pub fn coloring(&self) -> &StateColoring {
        &self.coloring
    }

    /// What happened so far.
    pub fn report(&self) -> LearnReport {
        self.report
    }

    /// Hands out the hypothesis and the report, dropping the coloring.
    pub fn into_parts(self) -> (Pdrta, LearnReport) {
        (self.pdrta, self.report)
    }

    /// Runs iterations until the search converges.
    pub fn run(mut self) -> Result<(Pdrta, LearnReport)> {
        while self.step()? == LearnerState::Searching {}
        info!(
            "converged after {} iterations with {} states ({} merges, {} splits, {} promotions)",
            self.report.iterations,
            self.pdrta.size(),
            self.report.merges,
            self.report.splits,
            self.report.promotions
        );
        Ok(self.into_parts())
    }

    /// Performs one iteration. Blue states without an acceptable candidate are promoted, and the
    /// states this exposes are scored right away, until either some blue state has an acceptable
    /// candidate or no blue state is left. If nothing had to be promoted, the best candidate over
    /// all blue states is applied.
    pub fn step(&mut self) -> Result<LearnerState> {
        if self.coloring.frontier_is_empty() {
            self.state = LearnerState::Converged;
            return Ok(self.state);
        }
        if let Some(max) = self.learner.config.max_iterations {
            if self.report.iterations >= max {
                return Err(PdrtaError::IterationLimit(max));
            }
        }
        self.report.iterations += 1;

        let mut promoted = false;
        while !self.coloring.frontier_is_empty() {
            let blues = self.coloring.blue().collect_vec();
            debug!(
                "iteration {}: {} red, {} blue, {} states",
                self.report.iterations,
                self.coloring.red().count(),
                blues.len(),
                self.pdrta.size()
            );
            let mut stuck = vec![];
            let mut best: Option<Scored> = None;
            for blue in blues {
                let candidates = match self.candidates(blue) {
                    Ok(candidates) => candidates,
                    Err(e) => {
                        warn!("skipping blue state {blue}: {e}");
                        self.report.rejected += 1;
                        continue;
                    }
                };
                let accepted = candidates
                    .into_iter()
                    .filter_map(|(candidate, support)| self.evaluate(candidate, support, blue))
                    .collect_vec();
                match accepted.into_iter().min_by(rank) {
                    None => stuck.push(blue),
                    Some(candidate) => {
                        if best.map_or(true, |b| rank(&candidate, &b) == Ordering::Less) {
                            best = Some(candidate);
                        }
                    }
                }
            }

            if stuck.is_empty() {
                match best {
                    Some(best) if !promoted => self.apply(best),
                    Some(_) => {}
                    None => {
                        return Err(PdrtaError::invariant(
                            "no blue state could be scored or promoted",
                        ))
                    }
                }
                break;
            }
            for blue in stuck {
                self.coloring.promote(blue, &self.pdrta)?;
                self.report.promotions += 1;
                debug!("promoted state {blue}");
            }
            promoted = true;
            if best.is_some() {
                break;
            }
        }
        Ok(self.state)
    }

    /// All candidates for `blue` together with the number of tails on the transition into it.
    fn candidates(&self, blue: StateId) -> Result<Vec<(Candidate, usize)>> {
        let (parent, symbol, position) = self
            .coloring
            .red()
            .filter_map(|p| self.pdrta.state(p))
            .find_map(|p| {
                p.all_intervals()
                    .find(|(_, _, i)| i.target() == Some(blue))
                    .map(|(symbol, position, _)| (p.id(), symbol, position))
            })
            .ok_or_else(|| PdrtaError::invariant(format!("blue state {blue} has no red parent")))?;
        let interval = &self.pdrta.try_state(parent)?.intervals(symbol)[position];
        let support = interval.tail_count();
        let merges = self
            .coloring
            .red()
            .map(|red| Candidate::Merge { red, blue });
        let splits = interval
            .split_points(self.pdrta.tails())
            .into_iter()
            .map(|at| Candidate::Split {
                state: parent,
                symbol,
                at,
            });
        Ok(merges
            .chain(splits)
            .filter(|c| !self.banned.contains(c))
            .map(|c| (c, support))
            .collect())
    }

    /// Scores a candidate and returns it if it is accepted at the configured significance level.
    fn evaluate(&mut self, candidate: Candidate, support: usize, blue: StateId) -> Option<Scored> {
        let alpha = self.learner.config.alpha;
        let p_value = match self
            .learner
            .tester
            .score(&self.pdrta, &self.coloring, candidate)
        {
            Ok(Some(p)) => p,
            Ok(None) => {
                trace!("{candidate:?}: not enough data");
                return None;
            }
            Err(e) => {
                warn!("rejecting {candidate:?}, scoring failed: {e}");
                self.report.rejected += 1;
                return None;
            }
        };
        let accepted = if candidate.is_merge() {
            p_value > alpha
        } else {
            p_value < alpha
        };
        trace!("{candidate:?}: p = {p_value:.6}, accepted: {accepted}");
        accepted.then_some(Scored {
            candidate,
            p_value,
            support,
            blue,
        })
    }

    /// Applies a candidate to a copy of the hypothesis and commits the copy if the operation
    /// succeeded and left the automaton consistent. Otherwise the candidate is dropped for the rest
    /// of the search.
    fn apply(&mut self, best: Scored) {
        let mut trial = self.pdrta.clone();
        let mut trial_coloring = self.coloring.clone();
        let outcome = match best.candidate {
            Candidate::Merge { red, blue } => trial.merge(red, blue, &mut trial_coloring, None),
            Candidate::Split { state, symbol, at } => trial
                .split(state, symbol, at, &mut trial_coloring)
                .map(|_| ()),
        }
        .and_then(|_| {
            if self.learner.config.check_invariants {
                trial.check_consistency()?;
                trial_coloring.check(&trial)?;
            }
            Ok(())
        });
        match outcome {
            Ok(()) => {
                debug!(
                    "applied {:?} with p = {:.6}, {} states left",
                    best.candidate,
                    best.p_value,
                    trial.size()
                );
                if best.candidate.is_merge() {
                    self.report.merges += 1;
                } else {
                    self.report.splits += 1;
                }
                self.pdrta = trial;
                self.coloring = trial_coloring;
            }
            Err(e) => {
                warn!("dropping {:?}, applying it failed: {e}", best.candidate);
                self.report.rejected += 1;
                self.banned.insert(best.candidate);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        statistic::{HistogramBins, SplitDescent},
        tester::TesterKind,
        INFINITY,
    };

    fn learner(config: LearnerConfig) -> Learner {
        Learner::new(config).unwrap()
    }

    #[test_log::test]
    fn identical_words_stay_a_path() {
        let sample = TimedSample::from_symbolic([vec![("a", 1), ("b", 2)], vec![("a", 1), ("b", 2)]]);
        let (pdrta, report) = learner(LearnerConfig::default())
            .learn_with_report(&sample)
            .unwrap();
        assert_eq!(pdrta.size(), 3);
        assert_eq!(report.merges + report.splits, 0);
        for state in pdrta.states() {
            for symbol in pdrta.alphabet().universe() {
                assert_eq!(state.intervals(symbol).len(), 1);
            }
        }
        let end = pdrta.run([(0, 1), (1, 2)]).unwrap();
        assert!(pdrta.state(end).unwrap().is_final());
    }

    fn bimodal() -> TimedSample {
        let mut words = vec![];
        for i in 0..180u64 {
            words.push(vec![("a", 1 + i % 3), ("b", 1)]);
        }
        for i in 0..20u64 {
            words.push(vec![("a", 100 + i % 3), ("c", 1)]);
        }
        TimedSample::from_symbolic(words)
    }

    #[test_log::test]
    fn bimodal_delays_are_split() {
        let config = LearnerConfig::default().with_min_data(5);
        let (pdrta, report) = learner(config).learn_with_report(&bimodal()).unwrap();
        assert!(pdrta.check_consistency().is_ok());
        assert_eq!(report.splits, 1);
        let root = pdrta.state(pdrta.root()).unwrap();
        assert_eq!(
            root.intervals(0)
                .iter()
                .map(|i| (i.begin(), i.end()))
                .collect_vec(),
            vec![(0, 100), (100, INFINITY)]
        );
        assert!(pdrta.run([(0, 2), (1, 1)]).is_some());
        assert!(pdrta.run([(0, 2), (2, 1)]).is_none());
        assert!(pdrta.run([(0, 101), (2, 1)]).is_some());
        assert!(pdrta.run([(0, 101), (1, 1)]).is_none());
    }

    #[test]
    fn testers_take_the_same_decisions() {
        let naive = learner(
            LearnerConfig::default()
                .with_min_data(5)
                .with_tester(TesterKind::Naive),
        )
        .learn(&bimodal())
        .unwrap();
        let analytic = learner(LearnerConfig::default().with_min_data(5))
            .learn(&bimodal())
            .unwrap();
        assert_eq!(naive, analytic);
    }

    #[test]
    fn single_word_is_never_generalized() {
        let sample = TimedSample::from_symbolic([vec![("a", 1), ("b", 2), ("c", 3)]]);
        let (pdrta, report) = learner(LearnerConfig::default().with_min_data(1))
            .learn_with_report(&sample)
            .unwrap();
        assert_eq!(pdrta.size(), 4);
        assert_eq!(report.merges, 0);
        assert_eq!(report.splits, 0);
        assert_eq!(report.promotions, 3);
        assert_eq!(report.iterations, 1);
        assert_eq!(report.rejected, 0);
    }

    #[test]
    fn search_can_be_stepped_and_capped() {
        let sample = TimedSample::from_symbolic([vec![("a", 1), ("b", 2), ("c", 3)]]);
        let learner = learner(LearnerConfig::default());
        let mut search = learner.search(Pdrta::from_sample(&sample, 10).unwrap());
        assert_eq!(search.step(), Ok(LearnerState::Searching));
        assert_eq!(search.coloring().red().count(), 4);
        assert!(search.coloring().check(search.pdrta()).is_ok());
        assert_eq!(search.step(), Ok(LearnerState::Converged));
        assert_eq!(search.report().iterations, 1);

        let capped = Learner::new(LearnerConfig::default().with_max_iterations(1)).unwrap();
        assert_eq!(
            capped.learn(&alternating()),
            Err(PdrtaError::IterationLimit(1))
        );
        assert_eq!(
            learner.learn(&TimedSample::default()),
            Err(PdrtaError::EmptyInput)
        );
    }

    #[test_log::test]
    fn blue_state_without_red_parent_is_skipped() {
        let learner = learner(LearnerConfig::default());
        let siblings = TimedSample::from_symbolic([vec![("a", 1)], vec![("b", 1)]]);
        let mut search = learner.search(Pdrta::from_sample(&siblings, 10).unwrap());
        // state 2 is a grandchild of the root here, so it has no red parent yet
        let chain = TimedSample::from_symbolic([vec![("a", 1), ("b", 1)]]);
        search.pdrta = Pdrta::from_sample(&chain, 10).unwrap();
        assert_eq!(search.coloring().blue().collect_vec(), vec![1, 2]);

        assert_eq!(search.step(), Ok(LearnerState::Searching));
        assert_eq!(search.report().rejected, 1);
        assert_eq!(search.report().promotions, 2);
        assert_eq!(search.step(), Ok(LearnerState::Converged));
    }

    /// `(ab)^k` repeated `2^(7 - k)` times, so every `ab` is followed by another one with
    /// probability one half.
    fn alternating() -> TimedSample {
        let mut words = vec![];
        for k in 0..8usize {
            for _ in 0..(1 << (7 - k)) {
                let mut word = vec![];
                for _ in 0..k {
                    word.push(("a", 2));
                    word.push(("b", 3));
                }
                words.push(word);
            }
        }
        TimedSample::from_symbolic(words)
    }

    #[test_log::test]
    fn alternating_language_has_two_states() {
        let (pdrta, report) = learner(LearnerConfig::default())
            .learn_with_report(&alternating())
            .unwrap();
        assert_eq!(pdrta.size(), 2);
        assert_eq!(report.merges, 1);
        let a = pdrta.run([(0, 2)]).unwrap();
        assert_eq!(pdrta.run([(0, 2), (1, 3)]), Some(pdrta.root()));
        assert!(pdrta.state(pdrta.root()).unwrap().is_final());
        assert!(!pdrta.state(a).unwrap().is_final());
        assert_eq!(pdrta.tail_count(), alternating().event_count());
    }

    #[test]
    fn all_strategies_learn_the_alternating_language() {
        for config in [
            LearnerConfig::default().with_tester(TesterKind::Naive),
            LearnerConfig::default().with_tester(TesterKind::Fisher),
            LearnerConfig::default().with_advanced_pooling(true),
            LearnerConfig::default()
                .with_split_descent(SplitDescent::Shallow)
                .with_histogram_bins(HistogramBins::Fixed(vec![3])),
        ] {
            assert_eq!(learner(config).learn(&alternating()).unwrap().size(), 2);
        }
    }

    #[test]
    fn ranking() {
        let merge = |red, p| Scored {
            candidate: Candidate::Merge { red, blue: 5 },
            p_value: p,
            support: 10,
            blue: 5,
        };
        let split = |at, p| Scored {
            candidate: Candidate::Split {
                state: 0,
                symbol: 0,
                at,
            },
            p_value: p,
            support: 10,
            blue: 5,
        };
        assert_eq!(rank(&merge(0, 0.9), &merge(1, 0.5)), Ordering::Less);
        assert_eq!(rank(&merge(1, 0.5), &merge(0, 0.5)), Ordering::Greater);
        assert_eq!(rank(&split(3, 1e-30), &split(2, 1e-20)), Ordering::Less);
        assert_eq!(rank(&split(3, 1e-30), &split(2, 1e-30)), Ordering::Greater);
        assert_eq!(rank(&merge(0, 0.9), &split(2, 0.2)), Ordering::Less);
        assert_eq!(rank(&merge(0, 0.5), &split(2, 0.5)), Ordering::Less);
    }
}
