use common::{metrics, Distribution, Metric, Result, RfError};
use design_matrix::DesignMatrix;
use lin_reg::LinReg;
use nalgebra::{DMatrix, DVector};

use crate::{likelihood::Link, GLM};

/// Diagnostics of a fitted model on one split
#[derive(Debug, Clone, PartialEq)]
pub struct Scores {
    /// Model deviance
    pub deviance: f64,
    /// Pearson correlation of the expected and observed response
    pub correlation: f64,
    /// Mean squared error of the expected response
    pub mse: f64,
    /// Coefficient of determination
    pub r2: f64,
    /// Full log likelihood
    pub log_likelihood: f64,
    /// Number of scored samples
    pub n: usize,
}

/// One subunit's filter of one channel
#[derive(Debug, Clone)]
pub struct Filter {
    /// Subunit index
    pub subunit: usize,
    /// Channel name
    pub channel: String,
    /// Filter shape, time lags first
    pub dims: Vec<usize>,
    /// Basis coefficients
    pub coef: DVector<f64>,
    /// Filter values, flattened in C order
    pub values: DVector<f64>,
}

impl<R> GLM<R>
where
    R: LinReg,
{
    fn fitted_parts(&self) -> Result<(&Link, &DVector<f64>)> {
        match (self.link.as_ref(), self.params.as_ref()) {
            (Some(link), Some(params)) => Ok((link, params)),
            _ => Err(RfError::Validation("model has not been initialized".to_string())),
        }
    }

    fn check_design(&self, link: &Link, design: &DesignMatrix) -> Result<()> {
        if design.ncols() != link.layout.n_coef {
            return Err(RfError::Configuration(format!(
                "design of split `{}` has {} columns, the model has {} coefficients per subunit",
                design.split,
                design.ncols(),
                link.layout.n_coef
            )));
        }
        Ok(())
    }

    /// Predicted rate / mean of every design row
    fn rate(&self, design: &DesignMatrix) -> Result<(&Link, DVector<f64>)> {
        let (link, params) = self.fitted_parts()?;
        self.check_design(link, design)?;
        Ok((link, link.forward(&design.matrix, params).rate))
    }

    /// Expected response per design row: the expected count per bin for Poisson
    /// responses, the mean otherwise
    pub fn predict(&self, design: &DesignMatrix) -> Result<Vec<f64>> {
        let (link, rate) = self.rate(design)?;
        Ok(link.expected(&rate).as_slice().to_vec())
    }

    /// Build a split's design matrix and predict on it
    pub fn predict_split(&self, split: &str) -> Result<Vec<f64>> {
        let design = self.builder.build(split)?;
        self.predict(&design)
    }

    /// Score a design matrix against its raw, untrimmed response
    pub fn evaluate(&self, design: &DesignMatrix, y: &[f64]) -> Result<Scores> {
        let (link, rate) = self.rate(design)?;
        let y = design.trim_response(y)?;
        let expected = link.expected(&rate);
        let distribution = link.distribution;

        Ok(Scores {
            deviance: distribution.deviance(&y, rate.as_slice(), link.dt),
            correlation: metrics::corrcoef(&y, expected.as_slice()),
            mse: metrics::mse(&y, expected.as_slice()),
            r2: metrics::r2(&y, expected.as_slice()),
            log_likelihood: distribution.log_likelihood(&y, rate.as_slice(), link.dt),
            n: y.len(),
        })
    }

    /// Score a split against its raw response with one metric
    pub fn score(&self, split: &str, y: &[f64], metric: Metric) -> Result<f64> {
        let design = self.builder.build(split)?;
        let (link, rate) = self.rate(&design)?;
        let y = design.trim_response(y)?;
        let edf = self.edf(&design);
        Ok(metric.compute(&y, link.expected(&rate).as_slice(), edf))
    }

    /// Effective degrees of freedom of all subunits under the fitted penalty weight
    fn edf(&self, design: &DesignMatrix) -> f64 {
        let subunits = self.link.as_ref().map_or(1, |l| l.layout.num_subunits);
        self.builder.effective_df(design, self.beta).iter().sum::<f64>() * subunits as f64
    }

    /// Every subunit's filter of every channel, reconstructed through the channel's basis
    pub fn filters(&self) -> Result<Vec<Filter>> {
        let (link, params) = self.fitted_parts()?;
        let layout = link.layout;
        let mut filters = Vec::with_capacity(layout.num_subunits * self.builder.channels().len());
        for s in 0..layout.num_subunits {
            let mut start = layout.weights_start(s);
            for channel in self.builder.channels() {
                let coef = params.rows(start, channel.n_coef()).into_owned();
                start += channel.n_coef();
                filters.push(Filter {
                    subunit: s,
                    channel: channel.name().to_string(),
                    dims: channel.spec().dims.clone(),
                    values: channel.basis().reconstruct(&coef),
                    coef,
                });
            }
        }
        Ok(filters)
    }

    /// Pointwise standard errors of every filter of a Gaussian model, in filter space.
    ///
    /// Uses the coefficient covariance `(X^T X + 2 beta P)^-1 * RSS / (N - edf)` of the train
    /// split, shared by all subunits.
    pub fn filter_std_errors(&self) -> Result<Vec<Filter>> {
        let (link, params) = self.fitted_parts()?;
        if link.distribution != Distribution::Gaussian {
            return Err(RfError::Configuration(format!(
                "standard errors are only available for Gaussian responses, the model is {:?}",
                link.distribution
            )));
        }
        let y = self
            .train_response
            .as_ref()
            .ok_or_else(|| RfError::Validation("no train response has been seen".to_string()))?;
        let design = self.builder.build(design_matrix::TRAIN)?;
        self.check_design(link, &design)?;

        let rate = link.forward(&design.matrix, params).rate;
        let rss: f64 = y.iter().zip(rate.iter()).map(|(y, r)| (y - r).powi(2)).sum();
        let n = y.len() as f64;
        let edf = self.edf(&design);
        if n <= edf {
            warn!(
                "standard errors from {} samples with {:.1} effective degrees of freedom are unreliable",
                n, edf
            );
        }
        let sigma2 = rss / (n - edf).max(1.0);

        let system = design.matrix.tr_mul(&design.matrix) + self.builder.penalty() * (2.0 * self.beta);
        let cov = invert_spd(system)? * sigma2;

        let mut filters = self.filters()?;
        let mut start = 0;
        let mut offsets = Vec::with_capacity(self.builder.channels().len());
        for channel in self.builder.channels() {
            offsets.push(start);
            start += channel.n_coef();
        }
        for filter in filters.iter_mut() {
            let (i, channel) = self
                .builder
                .channels()
                .iter()
                .enumerate()
                .find(|(_, c)| c.name() == filter.channel)
                .ok_or_else(|| RfError::Configuration(format!("unknown channel `{}`", filter.channel)))?;
            let k = channel.n_coef();
            let block = cov.view((offsets[i], offsets[i]), (k, k));
            let basis = channel.basis().basis();
            let var = basis * block * basis.transpose();
            filter.values = var.diagonal().map(|v| v.max(0.0).sqrt());
        }
        Ok(filters)
    }
}

fn invert_spd(m: DMatrix<f64>) -> Result<DMatrix<f64>> {
    match m.clone().cholesky() {
        Some(chol) => Ok(chol.inverse()),
        None => m
            .try_inverse()
            .ok_or_else(|| RfError::numerical("coefficient covariance is singular")),
    }
}
