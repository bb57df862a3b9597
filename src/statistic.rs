//! Statistics used to decide whether two states behave alike.
//!
//! Every state is summarized by two histograms: how often each symbol (or the end of a word) is
//! observed in it, and how the delays of its outgoing events distribute over a fixed set of time
//! bins. Two such summaries are compared with a likelihood-ratio test. Sub-tests of many state
//! pairs are accumulated in a [`LikelihoodValue`] and finally referred to a chi-squared
//! distribution.

use std::ops::{Add, AddAssign};

use itertools::Itertools;
use statrs::distribution::{ChiSquared, ContinuousCDF};

use crate::{
    math::{quantile_borders, x_ln_x_over},
    pdrta::{Pdrta, StateId},
    tail::Head,
    word::TimedSample,
    Delay,
};

/// Reported instead of a p-value when a test cannot be carried out for lack of data.
pub const NO_EVIDENCE: f64 = -1.0;

/// Fisher's method transforms p-values with a logarithm, so they are kept away from 0 and 1.
const FISHER_P_MIN: f64 = 1e-300;
const FISHER_P_MAX: f64 = 1.0 - 1e-16;

/// Survival function of the chi-squared distribution with `df` degrees of freedom.
pub fn chi_squared_survival(statistic: f64, df: f64) -> f64 {
    if statistic.is_nan() {
        return 1.0;
    }
    if statistic <= 0.0 {
        return 1.0;
    }
    if statistic.is_infinite() {
        return 0.0;
    }
    match ChiSquared::new(df) {
        Ok(dist) => dist.sf(statistic).clamp(0.0, 1.0),
        Err(_) => 1.0,
    }
}

/// Accumulates a test statistic together with its degrees of freedom. The accumulator is closed
/// under addition, so sub-tests over many state pairs can be summed before the final p-value is
/// computed.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct LikelihoodValue {
    ratio: f64,
    parameters: i64,
}

impl LikelihoodValue {
    /// Creates a new value.
    pub fn new(ratio: f64, parameters: i64) -> Self {
        Self { ratio, parameters }
    }

    /// The accumulated statistic (`-2 ln` of the likelihood ratio, or Fisher's sum).
    pub fn ratio(&self) -> f64 {
        self.ratio
    }

    /// The accumulated degrees of freedom.
    pub fn parameters(&self) -> i64 {
        self.parameters
    }

    /// The p-value of the accumulated statistic, `None` if there are no degrees of freedom.
    pub fn p_value(&self) -> Option<f64> {
        (self.parameters > 0).then(|| chi_squared_survival(self.ratio, self.parameters as f64))
    }

    /// Like [`Self::p_value`], but reports missing evidence as [`NO_EVIDENCE`].
    pub fn p_value_or_sentinel(&self) -> f64 {
        self.p_value().unwrap_or(NO_EVIDENCE)
    }
}

impl Add for LikelihoodValue {
    type Output = LikelihoodValue;

    fn add(self, rhs: Self) -> Self::Output {
        LikelihoodValue {
            ratio: self.ratio + rhs.ratio,
            parameters: self.parameters + rhs.parameters,
        }
    }
}

impl AddAssign for LikelihoodValue {
    fn add_assign(&mut self, rhs: Self) {
        self.ratio += rhs.ratio;
        self.parameters += rhs.parameters;
    }
}

impl std::iter::Sum for LikelihoodValue {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(LikelihoodValue::default(), Add::add)
    }
}

/// How the borders of the time histograms are chosen.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HistogramBins {
    /// Explicit borders, each border is the first delay of a new bin.
    Fixed(Vec<Delay>),
    /// The given number of equal-frequency bins over all delays of the training sample.
    Quantiles(usize),
}

impl Default for HistogramBins {
    fn default() -> Self {
        HistogramBins::Quantiles(4)
    }
}

impl HistogramBins {
    /// Computes the strictly increasing, positive borders for the given sample.
    pub fn borders(&self, sample: &TimedSample) -> Vec<Delay> {
        match self {
            HistogramBins::Fixed(borders) => borders
                .iter()
                .copied()
                .filter(|b| *b > 0)
                .sorted()
                .dedup()
                .collect(),
            HistogramBins::Quantiles(bins) => {
                quantile_borders(&sample.delays().collect_vec(), *bins)
            }
        }
    }
}

/// Which statistic a single sub-test contributes to the accumulated [`LikelihoodValue`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Statistic {
    /// The likelihood-ratio statistic and its degrees of freedom are summed directly.
    #[default]
    LikelihoodRatio,
    /// Every sub-test is turned into a p-value first and combined with Fisher's method.
    Fisher,
}

/// Parameters shared by all statistical comparisons.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TestSettings {
    /// Minimal number of observations a histogram (or bucket) needs to take part in a test.
    pub min_data: usize,
    /// Whether sparse buckets are re-binned into groups instead of being concatenated into one.
    pub advanced_pooling: bool,
    /// The statistic used to accumulate sub-tests.
    pub statistic: Statistic,
}

impl Default for TestSettings {
    fn default() -> Self {
        Self {
            min_data: 10,
            advanced_pooling: false,
            statistic: Statistic::LikelihoodRatio,
        }
    }
}

/// Determines when the test of a split keeps descending into the successors of a compared pair.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum SplitDescent {
    /// Descend only if both states of the pair have at least `min_data` observations.
    #[default]
    Both,
    /// Descend if at least one of the states has `min_data` observations.
    Either,
    /// Only compare the two states created by the split.
    Shallow,
}

impl SplitDescent {
    /// Whether the successors of a pair with the given number of observations are compared.
    pub fn descends(&self, left: usize, right: usize, min_data: usize) -> bool {
        match self {
            SplitDescent::Both => left >= min_data && right >= min_data,
            SplitDescent::Either => left >= min_data || right >= min_data,
            SplitDescent::Shallow => false,
        }
    }
}

/// Which pairs of a fold contribute to the accumulated statistic.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Descent {
    /// Every pair that is folded contributes, as needed for merges.
    Always,
    /// Pairs contribute as long as the given policy allows descending.
    Split(SplitDescent),
}

/// Summary of a state: counts per symbol plus one trailing count for words ending in the state,
/// and counts of outgoing delays per time bin.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StateStatistic {
    symbols: Vec<u64>,
    times: Vec<u64>,
}

impl StateStatistic {
    /// An empty summary for `alphabet_size` symbols and the given time borders.
    pub fn empty(alphabet_size: usize, borders: &[Delay]) -> Self {
        Self {
            symbols: vec![0; alphabet_size + 1],
            times: vec![0; borders.len() + 1],
        }
    }

    /// Summarizes everything that arrived in the given heads.
    pub fn from_heads<'a, I: IntoIterator<Item = &'a Head>>(pdrta: &Pdrta, heads: I) -> Self {
        let mut stat = Self::empty(pdrta.alphabet_size(), pdrta.histogram_borders());
        for head in heads {
            stat.record(pdrta, *head);
        }
        stat
    }

    /// Summarizes the current content of a state.
    pub fn of_state(pdrta: &Pdrta, state: StateId) -> Self {
        let mut stat = Self::empty(pdrta.alphabet_size(), pdrta.histogram_borders());
        if let Some(q) = pdrta.state(state) {
            for head in q.heads() {
                stat.record(pdrta, head);
            }
        }
        stat
    }

    fn record(&mut self, pdrta: &Pdrta, head: Head) {
        match head {
            Head::End(_) => {
                if let Some(end) = self.symbols.last_mut() {
                    *end += 1;
                }
            }
            Head::Tail(t) => {
                let tail = &pdrta.tails()[t];
                self.symbols[tail.symbol()] += 1;
                let bin = pdrta
                    .histogram_borders()
                    .partition_point(|border| *border <= tail.delay());
                self.times[bin] += 1;
            }
        }
    }

    /// Adds the counts of `other` to `self`.
    pub fn absorb(&mut self, other: &StateStatistic) {
        for (mine, theirs) in self.symbols.iter_mut().zip(&other.symbols) {
            *mine += theirs;
        }
        for (mine, theirs) in self.times.iter_mut().zip(&other.times) {
            *mine += theirs;
        }
    }

    /// Counts per symbol, the last entry counts the words that end in the state.
    pub fn symbol_counts(&self) -> &[u64] {
        &self.symbols
    }

    /// Counts of outgoing delays per time bin.
    pub fn time_counts(&self) -> &[u64] {
        &self.times
    }

    /// Number of words that end in the state.
    pub fn ends(&self) -> u64 {
        self.symbols.last().copied().unwrap_or(0)
    }

    /// Total number of heads that arrived, i.e. outgoing events plus ends.
    pub fn visits(&self) -> usize {
        self.symbols.iter().sum::<u64>() as usize
    }

    /// Number of outgoing events.
    pub fn outgoing(&self) -> usize {
        self.times.iter().sum::<u64>() as usize
    }

    /// Un-pooled log-likelihood of both histograms under their maximum-likelihood estimates.
    pub fn log_likelihood(&self) -> f64 {
        fn ll(counts: &[u64]) -> f64 {
            let total = counts.iter().sum::<u64>() as f64;
            counts.iter().map(|c| x_ln_x_over(*c as f64, total)).sum()
        }
        ll(&self.symbols) + ll(&self.times)
    }

    /// Number of free parameters of both histograms, counting only categories that occur.
    pub fn parameters(&self) -> i64 {
        fn params(counts: &[u64]) -> i64 {
            (counts.iter().filter(|c| **c > 0).count() as i64 - 1).max(0)
        }
        params(&self.symbols) + params(&self.times)
    }
}

/// Groups the buckets of two histograms. Buckets in which both histograms have fewer than
/// `min_data` observations are pooled, buckets nobody observed are dropped.
fn pool(x: &[u64], y: &[u64], min_data: u64, advanced: bool) -> Vec<(u64, u64)> {
    let mut kept = vec![];
    if !advanced {
        let mut pooled = (0, 0);
        for (a, b) in x.iter().zip(y) {
            if *a < min_data && *b < min_data {
                pooled = (pooled.0 + a, pooled.1 + b);
            } else {
                kept.push((*a, *b));
            }
        }
        if pooled.0 + pooled.1 >= min_data {
            kept.push(pooled);
        }
    } else {
        let mut group = (0, 0);
        let mut last_group = None;
        for (a, b) in x.iter().zip(y) {
            if *a < min_data && *b < min_data {
                group = (group.0 + a, group.1 + b);
                if group.0 + group.1 >= min_data {
                    last_group = Some(kept.len());
                    kept.push(group);
                    group = (0, 0);
                }
            } else {
                kept.push((*a, *b));
            }
        }
        if let Some(i) = last_group {
            let (a, b): &mut (u64, u64) = &mut kept[i];
            *a += group.0;
            *b += group.1;
        }
    }
    kept.retain(|(a, b)| a + b > 0);
    kept
}

/// Likelihood-ratio test of two histograms. Returns `None` if one of them has fewer than
/// `min_data` observations or fewer than two buckets remain after pooling.
pub fn compare_histograms(x: &[u64], y: &[u64], settings: &TestSettings) -> Option<LikelihoodValue> {
    let min_data = settings.min_data as u64;
    if x.iter().sum::<u64>() < min_data || y.iter().sum::<u64>() < min_data {
        return None;
    }
    let buckets = pool(x, y, min_data, settings.advanced_pooling);
    if buckets.len() < 2 {
        return None;
    }
    let total_x = buckets.iter().map(|(a, _)| *a).sum::<u64>() as f64;
    let total_y = buckets.iter().map(|(_, b)| *b).sum::<u64>() as f64;
    if total_x == 0.0 || total_y == 0.0 {
        return None;
    }
    let total = total_x + total_y;
    let ratio: f64 = buckets
        .iter()
        .map(|(a, b)| {
            let (a, b) = (*a as f64, *b as f64);
            x_ln_x_over(a, total_x) + x_ln_x_over(b, total_y) - x_ln_x_over(a + b, total)
        })
        .sum();
    Some(LikelihoodValue::new(
        (2.0 * ratio).max(0.0),
        buckets.len() as i64 - 1,
    ))
}

/// Compares the symbol and the time histograms of two states and returns their contribution
/// to the accumulated statistic.
pub fn compare_states(
    x: &StateStatistic,
    y: &StateStatistic,
    settings: &TestSettings,
) -> LikelihoodValue {
    [
        compare_histograms(&x.symbols, &y.symbols, settings),
        compare_histograms(&x.times, &y.times, settings),
    ]
    .into_iter()
    .flatten()
    .map(|value| match settings.statistic {
        Statistic::LikelihoodRatio => value,
        Statistic::Fisher => fisher_term(value.p_value().unwrap_or(1.0)),
    })
    .sum()
}

/// Transforms a single p-value into its contribution to Fisher's combined statistic.
pub fn fisher_term(p_value: f64) -> LikelihoodValue {
    let p = p_value.clamp(FISHER_P_MIN, FISHER_P_MAX);
    LikelihoodValue::new(-2.0 * p.ln(), 2)
}

/// Combines independent p-values with Fisher's method.
pub fn fisher_combine<I: IntoIterator<Item = f64>>(p_values: I) -> Option<f64> {
    p_values
        .into_iter()
        .map(fisher_term)
        .sum::<LikelihoodValue>()
        .p_value()
}

/// Collects the contributions of the state pairs visited while folding one state into another.
#[derive(Clone, Debug)]
pub struct PairAccumulator {
    settings: TestSettings,
    descent: Descent,
    value: LikelihoodValue,
    pairs: usize,
}

impl PairAccumulator {
    /// Creates an empty accumulator.
    pub fn new(settings: TestSettings, descent: Descent) -> Self {
        Self {
            settings,
            descent,
            value: LikelihoodValue::default(),
            pairs: 0,
        }
    }

    /// Records the comparison of a pair and reports whether the successors of the pair should
    /// contribute as well.
    pub fn record(&mut self, x: &StateStatistic, y: &StateStatistic) -> bool {
        self.value += compare_states(x, y, &self.settings);
        self.pairs += 1;
        match self.descent {
            Descent::Always => true,
            Descent::Split(policy) => {
                policy.descends(x.visits(), y.visits(), self.settings.min_data)
            }
        }
    }

    /// The accumulated statistic.
    pub fn value(&self) -> LikelihoodValue {
        self.value
    }

    /// Number of pairs that were compared.
    pub fn pairs(&self) -> usize {
        self.pairs
    }
}
