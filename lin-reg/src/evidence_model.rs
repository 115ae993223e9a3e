use common::{Result, RfError};
use nalgebra::{DMatrix, DVector};

use crate::{
    evidence::SufficientStats, EvidenceConfig, EvidenceFit, EvidenceObjective, EvidenceOptimizer,
    PriorCovariance, PriorFamily,
};

/// A linear-Gaussian receptive field model whose prior hyperparameters are chosen
/// by maximizing the evidence
#[derive(Debug, Clone)]
pub struct EvidenceModel {
    prior: PriorCovariance,
    stats: SufficientStats,
    optimizer: EvidenceOptimizer,
    fitted: Option<EvidenceFit>,
}

impl EvidenceModel {
    /// Create a new model
    ///
    /// # Arguments:
    /// x: Design matrix, one column per coefficient of the prior grid
    /// y: Response
    /// prior: Prior family and grid
    /// config: Optimization parameters
    pub fn new(x: &DMatrix<f64>, y: &DVector<f64>, prior: PriorCovariance, config: EvidenceConfig) -> Result<Self> {
        if prior.dim() != x.ncols() {
            return Err(RfError::Configuration(format!(
                "prior grid {:?} has {} coefficients, design has {} columns",
                prior.dims(),
                prior.dim(),
                x.ncols()
            )));
        }
        let stats = SufficientStats::new(x, y)?;
        info!(
            "evidence model: {:?} prior, {} samples, {} coefficients",
            prior.family(),
            stats.n,
            stats.dim()
        );

        Ok(Self {
            prior,
            stats,
            optimizer: EvidenceOptimizer::new(config),
            fitted: None,
        })
    }

    /// Isotropic prior
    pub fn ridge(x: &DMatrix<f64>, y: &DVector<f64>) -> Result<Self> {
        Self::new(x, y, PriorCovariance::ridge(x.ncols())?, EvidenceConfig::default())
    }

    /// One relevance hyperparameter per coefficient
    pub fn ard(x: &DMatrix<f64>, y: &DVector<f64>) -> Result<Self> {
        Self::new(x, y, PriorCovariance::ard(x.ncols())?, EvidenceConfig::default())
    }

    /// Smoothness prior over a coefficient grid of shape `dims`
    pub fn asd(x: &DMatrix<f64>, y: &DVector<f64>, dims: &[usize]) -> Result<Self> {
        Self::new(x, y, PriorCovariance::asd(dims)?, EvidenceConfig::default())
    }

    /// Locality prior over a coefficient grid of shape `dims`
    pub fn ald(x: &DMatrix<f64>, y: &DVector<f64>, dims: &[usize]) -> Result<Self> {
        Self::new(x, y, PriorCovariance::ald(dims)?, EvidenceConfig::default())
    }

    /// The prior
    #[inline(always)]
    pub fn prior(&self) -> &PriorCovariance {
        &self.prior
    }

    /// The last fit, if any
    #[inline(always)]
    pub fn fitted(&self) -> Option<&EvidenceFit> {
        self.fitted.as_ref()
    }

    fn objective(&self) -> EvidenceObjective {
        EvidenceObjective::new(
            self.stats.clone(),
            self.prior.clone(),
            self.optimizer.config().fix_noise,
        )
    }

    /// A data-driven starting point: noise variance at half the response power
    /// and the prior's neutral hyperparameters
    pub fn default_params(&self) -> DVector<f64> {
        let theta = self.prior.default_theta();
        if self.optimizer.config().fix_noise.is_some() {
            return theta;
        }
        let power = (self.stats.yty / self.stats.n.max(1) as f64).max(1e-12);
        let mut params = DVector::zeros(1 + theta.len());
        params[0] = (0.5 * power).ln();
        params.rows_mut(1, theta.len()).copy_from(&theta);
        params
    }

    /// Maximize the evidence starting at `p0`, laid out as `[ln noise_var, theta...]`
    /// (just `theta` when the noise variance is fixed)
    pub fn fit(&mut self, p0: DVector<f64>, num_iters: usize) -> Result<&EvidenceFit> {
        let mut optimizer = self.optimizer.clone();
        optimizer.set_max_iters(num_iters);
        let fit = optimizer.optimize(&self.objective(), p0)?;
        Ok(self.fitted.insert(fit))
    }

    /// Like `fit`, but first evaluates random starting points in parallel
    /// and starts from the best of them and `p0`
    pub fn fit_with_restarts(&mut self, p0: DVector<f64>, num_iters: usize) -> Result<&EvidenceFit> {
        let mut optimizer = self.optimizer.clone();
        optimizer.set_max_iters(num_iters);
        let fit = optimizer.optimize_with_restarts(self.objective(), p0)?;
        Ok(self.fitted.insert(fit))
    }

    /// Posterior-mean prediction for a design matrix
    pub fn predict(&self, x: &DMatrix<f64>) -> Result<DVector<f64>> {
        let fit = self
            .fitted
            .as_ref()
            .ok_or_else(|| RfError::Validation("model has not been fitted".to_string()))?;
        if x.ncols() != fit.mean.len() {
            return Err(RfError::Configuration(format!(
                "design has {} columns, model has {} coefficients",
                x.ncols(),
                fit.mean.len()
            )));
        }
        Ok(x * &fit.mean)
    }

    /// ALD envelope centers and widths per axis, in grid units
    pub fn localization(&self) -> Option<(Vec<f64>, Vec<f64>)> {
        let fit = self.fitted.as_ref()?;
        if self.prior.family() != PriorFamily::Ald {
            return None;
        }
        let axes = self.prior.dims().len();
        let centers = (0..axes).map(|a| fit.theta[1 + axes + a]).collect();
        let widths = (0..axes).map(|a| fit.theta[1 + 2 * axes + a].exp()).collect();
        Some((centers, widths))
    }
}
