use std::{str::FromStr, time::Duration};

use common::{Distribution, Metric, Nonlinearity, RfError};

/// How subunit outputs are combined before the output nonlinearity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pooling {
    /// Sum of the subunit outputs
    Sum,
    /// Average of the subunit outputs
    Mean,
}

impl FromStr for Pooling {
    type Err = RfError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sum" => Ok(Pooling::Sum),
            "mean" => Ok(Pooling::Mean),
            _ => Err(RfError::Configuration(format!("unknown pooling `{}`", s))),
        }
    }
}

/// How the parameters are initialized
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InitMethod {
    /// Normally distributed coefficients with the given standard deviation
    Random {
        /// Standard deviation of the coefficients
        scale: f64,
    },
    /// Ridge-stabilized least squares with an intercept column
    Mle,
    /// Response-weighted average of the design rows
    Sta,
}

impl FromStr for InitMethod {
    type Err = RfError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "random" => Ok(InitMethod::Random { scale: 0.01 }),
            "mle" => Ok(InitMethod::Mle),
            "sta" => Ok(InitMethod::Sta),
            _ => Err(RfError::Configuration(format!("unknown initialization `{}`", s))),
        }
    }
}

/// Which of the recorded parameter sets `fit` keeps
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnModel {
    /// The parameters of the last iteration, or the ones before the dev cost started rising
    Last,
    /// Lowest train cost
    BestTrain,
    /// Lowest dev cost, requires a dev split
    BestDev,
}

impl FromStr for ReturnModel {
    type Err = RfError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "last" => Ok(ReturnModel::Last),
            "best_train_cost" => Ok(ReturnModel::BestTrain),
            "best_dev_cost" => Ok(ReturnModel::BestDev),
            _ => Err(RfError::Configuration(format!("unknown return model `{}`", s))),
        }
    }
}

/// Model-level configuration
#[derive(Debug, Clone)]
pub struct ModelConfig {
    /// Response distribution
    pub distribution: Distribution,
    /// Maps the pooled output to the rate / mean
    pub output_nonlinearity: Nonlinearity,
    /// Multiply the rate by a fitted scale, e.g. a maximum firing rate
    pub fit_rate_scale: bool,
    /// Subunit pooling rule
    pub pooling: Pooling,
    /// Seed for initialization and mini-batch sampling
    pub seed: Option<u64>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            distribution: Distribution::Poisson,
            output_nonlinearity: Nonlinearity::Softplus,
            fit_rate_scale: false,
            pooling: Pooling::Sum,
            seed: Some(2046),
        }
    }
}

/// Parameters of a gradient fit
#[derive(Debug, Clone)]
pub struct FitConfig {
    /// Iteration budget
    pub num_iters: usize,
    /// Adam step size
    pub step_size: f64,
    /// Weight of the penalty
    pub beta: f64,
    /// Elastic-net mixing: 0 for the pure roughness penalty, 1 for pure L1 on the coefficients
    pub alpha: f64,
    /// Metric recorded on every split
    pub metric: Metric,
    /// Costs and metrics are recorded every this many iterations
    pub checkpoint: usize,
    /// Checkpoints a stopping criterion must hold for, 0 disables early stopping
    pub tolerance: usize,
    /// Iterations before any stopping criterion is checked
    pub min_iters: usize,
    /// Stop once the dev cost has been rising for `tolerance` checkpoints; requires a dev split
    pub early_stopping: bool,
    /// Log progress every this many checkpoints, 0 for silence
    pub verbose_interval: usize,
    /// Rows per Adam step, `None` for full batches
    pub batch_size: Option<usize>,
    /// Which recorded parameters to keep
    pub return_model: ReturnModel,
    /// Wall-clock budget, checked at iteration boundaries
    pub max_duration: Option<Duration>,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            num_iters: 1000,
            step_size: 1e-3,
            beta: 0.01,
            alpha: 0.0,
            metric: Metric::Corrcoef,
            checkpoint: 1,
            tolerance: 10,
            min_iters: 300,
            early_stopping: false,
            verbose_interval: 0,
            batch_size: None,
            return_model: ReturnModel::Last,
            max_duration: None,
        }
    }
}
