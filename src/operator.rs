use thiserror::Error;

#[non_exhaustive]
#[derive(Error, Debug)]
pub enum SamplerError {
    #[error("Logp function returned unrecoverable error")]
    LogpFailure(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Logp function returned recoverable error")]
    RecoverableLogp(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Numerical instability during trajectory: {reason}")]
    NumericalInstability { reason: String },
    #[error("Trajectory exceeded the maximum of {limit} events")]
    TooManyEvents { limit: u64 },
    #[error("Coordinate {index} with value {value} lies outside of [{lower}, {upper}]")]
    OutOfBounds {
        index: usize,
        value: f64,
        lower: f64,
        upper: f64,
    },
    #[error("Invalid operator state: {0}")]
    InvalidOperatorState(&'static str),
    #[error("Dimension mismatch: expected {expected}, found {found}")]
    DimensionMismatch { expected: usize, found: usize },
    #[error("Invalid settings: {0}")]
    InvalidSettings(String),
}

impl SamplerError {
    /// Recoverable errors reject the current step, all others stop the chain.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            SamplerError::RecoverableLogp(_)
                | SamplerError::NumericalInstability { .. }
                | SamplerError::TooManyEvents { .. }
        )
    }

    pub(crate) fn instability(reason: impl Into<String>) -> Self {
        SamplerError::NumericalInstability {
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SamplerError>;

/// Errors that happen when we evaluate the logp and gradient function
pub trait LogpError: std::error::Error {
    /// Unrecoverable errors during logp computation stop sampling,
    /// recoverable errors reject the current step.
    fn is_recoverable(&self) -> bool;
}

impl SamplerError {
    pub(crate) fn from_logp<E: LogpError + Send + Sync + 'static>(err: E) -> Self {
        if err.is_recoverable() {
            SamplerError::RecoverableLogp(Box::new(err))
        } else {
            SamplerError::LogpFailure(Box::new(err))
        }
    }
}

/// What an operator does with a recoverable failure inside a trajectory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InstabilityHandler {
    /// Restore the starting position and report a rejected step.
    #[default]
    Reject,
    /// Restore the starting position and return the error.
    Fail,
}

/// Information about a single proposal, returned by [`Operator::propose_step`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepOutcome {
    /// Whether the proposed position was written to the parameter.
    pub accepted: bool,
    /// Log of the Metropolis-Hastings ratio. Zero for rejection-free operators.
    pub log_acceptance: f64,
    /// Number of events (bounces, reflections, collisions) in the trajectory.
    pub events: u64,
    /// The trajectory was abandoned because of a recoverable failure.
    pub diverging: bool,
}

impl StepOutcome {
    pub(crate) fn diverging(events: u64) -> Self {
        StepOutcome {
            accepted: false,
            log_acceptance: f64::NEG_INFINITY,
            events,
            diverging: true,
        }
    }

    /// Probability with which the proposal was accepted.
    pub fn acceptance_probability(&self) -> f64 {
        self.log_acceptance.min(0.).exp()
    }
}

/// A Markov chain transition kernel that updates the parameter in place.
pub trait Operator {
    /// Propose and accept or reject a new position.
    ///
    /// `position` is the current state of the chain. It is overwritten with
    /// the new state if the proposal is accepted, and is left untouched
    /// otherwise. Recoverable failures are reported as rejected steps
    /// unless the operator is configured to fail on them.
    fn propose_step<R: rand::Rng + ?Sized>(
        &mut self,
        rng: &mut R,
        position: &mut [f64],
    ) -> Result<StepOutcome>;

    fn operator_name(&self) -> String;

    /// Number of proposals made so far.
    fn step_count(&self) -> u64;

    fn dim(&self) -> usize;
}

pub(crate) fn check_dim(expected: usize, found: usize) -> Result<()> {
    if expected != found {
        return Err(SamplerError::DimensionMismatch { expected, found });
    }
    Ok(())
}

/// Turn a recoverable failure into a rejected step, after the caller has
/// restored the starting position.
pub(crate) fn handle_failure(
    name: &str,
    handler: InstabilityHandler,
    err: SamplerError,
    events: u64,
) -> Result<StepOutcome> {
    if err.is_recoverable() && handler == InstabilityHandler::Reject {
        log::warn!("{}: rejecting step after recoverable failure: {}", name, err);
        Ok(StepOutcome::diverging(events))
    } else {
        Err(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[derive(Debug, Error)]
    #[error("bad logp")]
    struct BadLogp(bool);

    impl LogpError for BadLogp {
        fn is_recoverable(&self) -> bool {
            self.0
        }
    }

    #[test]
    fn recoverable_classification() {
        assert!(SamplerError::from_logp(BadLogp(true)).is_recoverable());
        assert!(!SamplerError::from_logp(BadLogp(false)).is_recoverable());
        assert!(SamplerError::TooManyEvents { limit: 3 }.is_recoverable());
        assert!(!SamplerError::InvalidOperatorState("x").is_recoverable());
    }

    #[test]
    fn failures_become_rejections() {
        let outcome = handle_failure(
            "test",
            InstabilityHandler::Reject,
            SamplerError::instability("nan"),
            4,
        )
        .unwrap();
        assert_eq!(outcome.accepted, false);
        assert_eq!(outcome.events, 4);
        assert_eq!(outcome.acceptance_probability(), 0.);

        let err = handle_failure(
            "test",
            InstabilityHandler::Fail,
            SamplerError::instability("nan"),
            4,
        );
        assert!(err.is_err());

        let err = handle_failure(
            "test",
            InstabilityHandler::Reject,
            SamplerError::InvalidSettings("x".into()),
            0,
        );
        assert!(err.is_err());
    }
}
