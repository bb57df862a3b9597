use thiserror::Error;

use crate::{pdrta::StateId, Delay};

/// Convenience alias used by every fallible operation of this crate.
pub type Result<T, E = PdrtaError> = std::result::Result<T, E>;

/// Errors that can occur while building, transforming or learning a [`crate::Pdrta`].
///
/// Insufficient data for a statistical test is deliberately not part of this enum, the
/// testers report it as `None`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PdrtaError {
    /// The training sample does not contain a single word.
    #[error("cannot build an automaton from an empty sample")]
    EmptyInput,
    /// An event refers to a symbol index that is not part of the alphabet.
    #[error("symbol index {index} is outside of the alphabet of size {size}")]
    InvalidSymbol {
        /// The offending symbol index.
        index: usize,
        /// The number of symbols in the alphabet.
        size: usize,
    },
    /// An event carries a delay that collides with the representation of infinity.
    #[error("delay {0} is reserved and cannot be observed")]
    InvalidDelay(Delay),
    /// A state id does not belong to the automaton.
    #[error("state {0} does not exist")]
    UnknownState(StateId),
    /// An operation was requested whose coloring or interval precondition does not hold.
    #[error("illegal operation: {0}")]
    IllegalOperation(String),
    /// A structural invariant (coverage, ordering, targets, tail placement) is broken.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),
    /// The learner configuration is not usable.
    #[error("invalid value for {field}: {message}")]
    InvalidConfig {
        /// Name of the rejected field of [`crate::LearnerConfig`].
        field: &'static str,
        /// Why the value was rejected.
        message: String,
    },
    /// The learner did not converge within the configured number of iterations.
    #[error("learner did not converge within {0} iterations")]
    IterationLimit(usize),
}

impl PdrtaError {
    pub(crate) fn illegal(message: impl Into<String>) -> Self {
        Self::IllegalOperation(message.into())
    }

    pub(crate) fn invariant(message: impl Into<String>) -> Self {
        Self::InvariantViolation(message.into())
    }

    /// Whether the error signals broken or misused structure, as opposed to bad input or
    /// configuration. The learner drops candidates failing with such an error.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            PdrtaError::IllegalOperation(_)
                | PdrtaError::InvariantViolation(_)
                | PdrtaError::UnknownState(_)
        )
    }
}
