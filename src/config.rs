use crate::{
    error::{PdrtaError, Result},
    statistic::{HistogramBins, SplitDescent, Statistic, TestSettings},
    tester::TesterKind,
};

/// Parameters of the [`crate::Learner`].
///
/// # Example
/// ```
/// use pdrta::prelude::*;
///
/// let config = LearnerConfig::default()
///     .with_alpha(0.01)
///     .with_min_data(5)
///     .with_tester(TesterKind::Naive);
/// assert!(config.validate().is_ok());
/// assert!(config.with_alpha(1.5).validate().is_err());
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct LearnerConfig {
    /// Significance level. Merges are accepted above it, splits below it.
    pub alpha: f64,
    /// Minimal number of observations a statistical test needs.
    pub min_data: usize,
    /// How candidates are scored.
    pub tester: TesterKind,
    /// Re-bin sparse histogram buckets in groups instead of concatenating them.
    pub advanced_pooling: bool,
    /// When the test of a split stops descending.
    pub split_descent: SplitDescent,
    /// Borders of the time histograms.
    pub histogram_bins: HistogramBins,
    /// Abort with [`PdrtaError::IterationLimit`] after this many iterations.
    pub max_iterations: Option<usize>,
    /// Verify the structural invariants after every applied operation.
    pub check_invariants: bool,
}

impl Default for LearnerConfig {
    fn default() -> Self {
        Self {
            alpha: 0.05,
            min_data: 10,
            tester: TesterKind::default(),
            advanced_pooling: false,
            split_descent: SplitDescent::default(),
            histogram_bins: HistogramBins::default(),
            max_iterations: None,
            check_invariants: true,
        }
    }
}

impl LearnerConfig {
    /// Sets the significance level.
    pub fn with_alpha(mut self, alpha: f64) -> Self {
        self.alpha = alpha;
        self
    }

    /// Sets the minimal number of observations per test.
    pub fn with_min_data(mut self, min_data: usize) -> Self {
        self.min_data = min_data;
        self
    }

    /// Sets the tester.
    pub fn with_tester(mut self, tester: TesterKind) -> Self {
        self.tester = tester;
        self
    }

    /// Enables or disables advanced pooling.
    pub fn with_advanced_pooling(mut self, advanced_pooling: bool) -> Self {
        self.advanced_pooling = advanced_pooling;
        self
    }

    /// Sets the descent policy of split tests.
    pub fn with_split_descent(mut self, split_descent: SplitDescent) -> Self {
        self.split_descent = split_descent;
        self
    }

    /// Sets the time histogram borders.
    pub fn with_histogram_bins(mut self, histogram_bins: HistogramBins) -> Self {
        self.histogram_bins = histogram_bins;
        self
    }

    /// Limits the number of iterations.
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = Some(max_iterations);
        self
    }

    /// Enables or disables the invariant check after every operation.
    pub fn with_invariant_checks(mut self, check_invariants: bool) -> Self {
        self.check_invariants = check_invariants;
        self
    }

    /// The settings handed to the statistical tests.
    pub fn test_settings(&self) -> TestSettings {
        TestSettings {
            min_data: self.min_data,
            advanced_pooling: self.advanced_pooling,
            statistic: match self.tester {
                TesterKind::Fisher => Statistic::Fisher,
                _ => Statistic::LikelihoodRatio,
            },
        }
    }

    /// Checks that all values are usable.
    pub fn validate(&self) -> Result<()> {
        if !(self.alpha > 0.0 && self.alpha < 1.0) {
            return Err(PdrtaError::InvalidConfig {
                field: "alpha",
                message: format!("{} is not within (0, 1)", self.alpha),
            });
        }
        if self.min_data == 0 {
            return Err(PdrtaError::InvalidConfig {
                field: "min_data",
                message: "must be positive".into(),
            });
        }
        if let HistogramBins::Quantiles(0) = self.histogram_bins {
            return Err(PdrtaError::InvalidConfig {
                field: "histogram_bins",
                message: "at least one bin is needed".into(),
            });
        }
        if self.max_iterations == Some(0) {
            return Err(PdrtaError::InvalidConfig {
                field: "max_iterations",
                message: "must be positive".into(),
            });
        }
        Ok(())
    }
}
