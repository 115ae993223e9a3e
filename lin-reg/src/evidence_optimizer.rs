use std::{sync::Arc, time::Duration};

use common::{ConvergenceStatus, Result, RfError};
use nalgebra::{DMatrix, DVector};
use optimizers::{Lbfgs, Objective, RandomSearch};

use crate::{
    evidence::{log_evidence, Evidence, SufficientStats},
    PriorCovariance,
};

/// Parameters of the evidence optimization
#[derive(Debug, Clone)]
pub struct EvidenceConfig {
    /// Iteration budget of one ascent
    pub max_iters: usize,
    /// Relative evidence improvement below which the ascent has converged
    pub tolerance: f64,
    /// Wall-clock budget of one ascent
    pub max_duration: Option<Duration>,
    /// Keep the noise variance at this value instead of optimizing it
    pub fix_noise: Option<f64>,
    /// Random starting points evaluated by `fit_with_restarts`
    pub num_candidates: usize,
    /// Seed for the random starting points
    pub seed: Option<u64>,
}

impl Default for EvidenceConfig {
    fn default() -> Self {
        Self {
            max_iters: 100,
            tolerance: 1e-8,
            max_duration: None,
            fix_noise: None,
            num_candidates: 32,
            seed: None,
        }
    }
}

/// Negative log evidence as a function of `[ln noise_var, theta...]`,
/// or of `theta` alone when the noise variance is fixed
#[derive(Debug, Clone)]
pub struct EvidenceObjective {
    stats: SufficientStats,
    prior: PriorCovariance,
    fix_noise: Option<f64>,
}

impl EvidenceObjective {
    /// Create the objective
    pub fn new(stats: SufficientStats, prior: PriorCovariance, fix_noise: Option<f64>) -> Self {
        Self { stats, prior, fix_noise }
    }

    /// Split an optimizer parameter vector into the noise variance and the prior hyperparameters
    pub fn unpack(&self, params: &DVector<f64>) -> Result<(f64, DVector<f64>)> {
        let offset = if self.fix_noise.is_some() { 0 } else { 1 };
        if params.len() != offset + self.prior.n_hyper() {
            return Err(RfError::Configuration(format!(
                "expected {} evidence parameters, got {}",
                offset + self.prior.n_hyper(),
                params.len()
            )));
        }
        let noise_var = match self.fix_noise {
            Some(v) => v,
            None => params[0].exp(),
        };
        Ok((noise_var, params.rows(offset, self.prior.n_hyper()).into_owned()))
    }

    /// Evaluate the evidence at an optimizer parameter vector
    pub fn evidence(&self, params: &DVector<f64>, with_gradient: bool) -> Result<Evidence> {
        let (noise_var, theta) = self.unpack(params)?;
        log_evidence(&self.stats, &self.prior, &theta, noise_var, with_gradient)
    }
}

impl Objective for EvidenceObjective {
    fn dim(&self) -> usize {
        self.prior.n_hyper() + if self.fix_noise.is_some() { 0 } else { 1 }
    }

    fn value(&self, params: &DVector<f64>) -> Result<f64> {
        Ok(-self.evidence(params, false)?.log_evidence)
    }

    fn value_and_gradient(&self, params: &DVector<f64>) -> Result<(f64, DVector<f64>)> {
        let ev = self.evidence(params, true)?;
        let gradient = ev
            .gradient
            .ok_or_else(|| RfError::numerical("evidence gradient was not computed"))?;
        let gradient = match self.fix_noise {
            Some(_) => gradient.rows(1, gradient.len() - 1).into_owned(),
            None => gradient,
        };
        Ok((-ev.log_evidence, -gradient))
    }
}

/// Result of an evidence optimization
#[derive(Debug, Clone)]
pub struct EvidenceFit {
    /// Optimized parameters in the optimizer layout
    pub params: DVector<f64>,
    /// Optimized noise variance
    pub noise_var: f64,
    /// Optimized prior hyperparameters
    pub theta: DVector<f64>,
    /// Posterior mean of the coefficients
    pub mean: DVector<f64>,
    /// Posterior covariance of the coefficients
    pub covariance: DMatrix<f64>,
    /// Log evidence at the optimum
    pub log_evidence: f64,
    /// Log evidence at the start and after every iteration, non-decreasing
    pub trace: Vec<f64>,
    /// Why the ascent stopped
    pub status: ConvergenceStatus,
    /// Iterations performed
    pub iterations: usize,
}

impl EvidenceFit {
    /// Per-coefficient posterior standard deviations
    pub fn posterior_std(&self) -> DVector<f64> {
        self.covariance.diagonal().map(|v| v.max(0.0).sqrt())
    }
}

/// Maximizes the log evidence over the hyperparameters
#[derive(Debug, Clone)]
pub struct EvidenceOptimizer {
    config: EvidenceConfig,
}

impl EvidenceOptimizer {
    /// Create a new optimizer
    pub fn new(config: EvidenceConfig) -> Self {
        Self { config }
    }

    /// The optimizer configuration
    #[inline(always)]
    pub fn config(&self) -> &EvidenceConfig {
        &self.config
    }

    /// Override the iteration budget
    pub fn set_max_iters(&mut self, max_iters: usize) {
        self.config.max_iters = max_iters;
    }

    /// Ascend the evidence from `p0`.
    /// Hitting the iteration cap is reported through the status, not as an error.
    pub fn optimize(&self, objective: &EvidenceObjective, p0: DVector<f64>) -> Result<EvidenceFit> {
        let lbfgs = Lbfgs {
            max_iters: self.config.max_iters,
            tolerance: self.config.tolerance,
            max_duration: self.config.max_duration,
            ..Default::default()
        };
        let min = lbfgs.minimize(objective, p0).map_err(negate_trace)?;
        let ev = objective.evidence(&min.params, false)?;
        let (noise_var, theta) = objective.unpack(&min.params)?;
        let trace: Vec<f64> = min.trace.iter().map(|v| -v).collect();

        match min.status {
            ConvergenceStatus::Converged => info!(
                "evidence converged after {} iterations, log evidence: {}",
                min.iterations, ev.log_evidence
            ),
            ConvergenceStatus::MaxIterReached => warn!(
                "evidence ascent hit its cap of {} iterations, log evidence: {}",
                self.config.max_iters, ev.log_evidence
            ),
            ConvergenceStatus::Cancelled => warn!(
                "evidence ascent cancelled after {} iterations, log evidence: {}",
                min.iterations, ev.log_evidence
            ),
        }

        Ok(EvidenceFit {
            params: min.params,
            noise_var,
            theta,
            mean: ev.mean,
            covariance: ev.covariance,
            log_evidence: ev.log_evidence,
            trace,
            status: min.status,
            iterations: min.iterations,
        })
    }

    /// Evaluate random starting points in parallel and ascend from the best one
    pub fn optimize_with_restarts(&self, objective: EvidenceObjective, p0: DVector<f64>) -> Result<EvidenceFit> {
        let mut ranges = vec![];
        if objective.fix_noise.is_none() {
            ranges.push((p0[0] - 2.0, p0[0] + 2.0));
        }
        ranges.extend(objective.prior.hyper_ranges());

        let objective = Arc::new(objective);
        let mut search = RandomSearch::new(ranges, self.config.seed, self.config.num_candidates);
        search.step(objective.clone());

        let p0_value = objective.value(&p0).unwrap_or(f64::INFINITY);
        let start = if search.best_value() < p0_value {
            debug!(
                "restart beats the initial point: {} < {}",
                search.best_value(),
                p0_value
            );
            DVector::from_column_slice(search.elite_params())
        } else {
            p0
        };
        self.optimize(&objective, start)
    }
}

/// Traces inside numerical errors are recorded as negative log evidence by the minimizer
fn negate_trace(err: RfError) -> RfError {
    match err {
        RfError::Numerical { reason, iteration, trace } => RfError::Numerical {
            reason,
            iteration,
            trace: trace.iter().map(|v| -v).collect(),
        },
        other => other,
    }
}
