//! Library for learning probabilistic deterministic real-time automata (PDRTA) from timed
//! sequences.
//!
//! A timed sequence is a word of events, where every event consists of a symbol and the delay
//! that passed since the previous event. A PDRTA reads such words: every state has, for every
//! symbol, a partition of the delay axis into intervals (time guards), and every interval leads to
//! at most one target state. Each transition keeps the training observations routed through it,
//! so probabilities of symbols, delays and word ends can be estimated per state.
//!
//! Learning starts from the prefix-tree acceptor of the training sample (see
//! [`Pdrta::from_sample`]) and runs a red/blue state-merging search (see [`Learner`]). The
//! search repeatedly tests whether a blue state behaves like an already identified red state,
//! in which case the two are merged, or whether the delays leading into a blue state fall into
//! clusters with different futures, in which case the interval is split. Both decisions are made
//! with likelihood-ratio tests referred to a chi-squared distribution, optionally combined with
//! Fisher's method.
//!
//! The most important types are
//! - [`TimedSample`] and [`TimedWord`], the training input,
//! - [`Pdrta`], the automaton, together with its operations [`Pdrta::split`] and [`Pdrta::merge`],
//! - [`tester::OperationTester`], which scores candidate operations,
//! - [`Learner`] and [`LearnerConfig`], which drive the search.
#![warn(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

/// The prelude is supposed to make using this package easier. Including everything, i.e.
/// `use pdrta::prelude::*;` should be enough to use the package.
pub mod prelude {
    pub use super::{
        alphabet::{SymbolIndex, TimedAlphabet},
        coloring::{StateColor, StateColoring},
        config::LearnerConfig,
        error::{PdrtaError, Result},
        interval::Interval,
        learner::{LearnReport, Learner, LearnerState, Search},
        pdrta::{Pdrta, PdrtaState, StateId, TransitionSummary},
        statistic::{HistogramBins, LikelihoodValue, SplitDescent, Statistic, TestSettings},
        tail::{Head, Tail, TailId, WordId},
        tester::{Candidate, OperationTester, TesterKind},
        word::{TimedEvent, TimedSample, TimedWord},
        Delay, Show, INFINITY,
    };
}

/// This module contains some definitions of mathematical objects which are used throughout the crate and
/// do not really fit to the top level.
pub mod math;

/// Errors of all fallible operations.
pub mod error;
pub use error::PdrtaError;

/// Module that contains definitions for dealing with alphabets.
pub mod alphabet;

/// Timed words and samples of them, the input of the learner.
pub mod word;
pub use word::{TimedSample, TimedWord};

/// The arena of tails, which tracks where every training event currently sits.
pub mod tail;

/// Time guards of transitions.
pub mod interval;

/// The automaton itself.
pub mod pdrta;
pub use pdrta::Pdrta;

/// Red, blue and white states of the search.
pub mod coloring;

pub mod statistic;

pub mod operations;

pub mod tester;

/// Configuration of the learner.
pub mod config;
pub use config::LearnerConfig;

pub mod learner;
pub use learner::Learner;

/// Graphviz output.
pub mod dot;

/// Generation of random words from a learned automaton.
#[cfg(feature = "random")]
pub mod random;

/// Delays are non-negative integers.
pub type Delay = u64;

/// Represents the unbounded upper end of the delay axis. It can not be observed as a delay.
pub const INFINITY: Delay = Delay::MAX;

/// Helper trait which can be used to display things like states, transitions, words and
/// automata in a human readable way. This is mainly used for debugging purposes.
pub trait Show {
    /// Returns a human readable representation of `self`, for a state index that should be
    /// for example q0, q1, q2, ... and for an interval it should be [0, 5).
    /// Just use something that makes sense. This is mainly used for debugging purposes.
    fn show(&self) -> String;
}

impl Show for usize {
    fn show(&self) -> String {
        self.to_string()
    }
}

impl Show for Option<usize> {
    fn show(&self) -> String {
        match self {
            None => "-".to_string(),
            Some(x) => x.show(),
        }
    }
}

impl Show for String {
    fn show(&self) -> String {
        self.clone()
    }
}
