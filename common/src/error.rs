use thiserror::Error;

/// Convenience alias used throughout the workspace
pub type Result<T> = std::result::Result<T, RfError>;

/// Everything that can go wrong while configuring or fitting a model
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RfError {
    /// Mismatched shapes, duplicate names or unknown kinds.
    /// Raised at setup, before any optimization work begins.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A split required by the fit is missing or disagrees with the train split
    #[error("validation error: {0}")]
    Validation(String),

    /// Non positive-definite covariance, overflow or a diverging objective.
    /// Carries the objective trace recorded up to the failing iteration.
    #[error("numerical error{}: {reason}", fmt_iteration(.iteration))]
    Numerical {
        /// What went wrong
        reason: String,
        /// The iteration at which the fit was aborted, if inside a fit
        iteration: Option<usize>,
        /// Objective values recorded before the failure
        trace: Vec<f64>,
    },
}

fn fmt_iteration(iteration: &Option<usize>) -> String {
    match iteration {
        Some(i) => format!(" at iteration {}", i),
        None => String::new(),
    }
}

impl RfError {
    /// A numerical error raised outside of an iterative fit
    pub fn numerical<S: Into<String>>(reason: S) -> Self {
        RfError::Numerical {
            reason: reason.into(),
            iteration: None,
            trace: vec![],
        }
    }

    /// Attach the iteration index and partial trace to a numerical error.
    /// Other variants pass through untouched.
    pub fn at_iteration(self, iteration: usize, trace: &[f64]) -> Self {
        match self {
            RfError::Numerical { reason, .. } => RfError::Numerical {
                reason,
                iteration: Some(iteration),
                trace: trace.to_vec(),
            },
            other => other,
        }
    }
}

/// How an iterative fit terminated. All variants come with the best parameters found so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvergenceStatus {
    /// The cost change or gradient norm dropped below its tolerance
    Converged,
    /// The iteration budget ran out first
    MaxIterReached,
    /// The caller's wall-clock budget ran out at an iteration boundary
    Cancelled,
}
