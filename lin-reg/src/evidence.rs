//! Closed-form marginal likelihood of the linear-Gaussian model
//! `w ~ N(0, Sigma(theta))`, `y | w ~ N(Xw, noise_var I)`.

use std::f64::consts::PI;

use common::{Result, RfError};
use nalgebra::{DMatrix, DVector};

use crate::PriorCovariance;

/// Jitter relative to the largest prior variance, before escalation
const JITTER_START: f64 = 1e-10;
/// Factor applied to the jitter on every failed factorization
const JITTER_GROWTH: f64 = 10.0;
/// Bounded number of jitter escalations
pub const MAX_JITTER_TRIES: usize = 8;

/// The data enters the evidence only through these
#[derive(Debug, Clone)]
pub struct SufficientStats {
    /// `X^T X`
    pub xtx: DMatrix<f64>,
    /// `X^T y`
    pub xty: DVector<f64>,
    /// `y^T y`
    pub yty: f64,
    /// Number of samples
    pub n: usize,
}

impl SufficientStats {
    /// Accumulate the statistics of a design matrix and response
    pub fn new(x: &DMatrix<f64>, y: &DVector<f64>) -> Result<Self> {
        if x.nrows() != y.len() {
            return Err(RfError::Configuration(format!(
                "design has {} rows, response has {} samples",
                x.nrows(),
                y.len()
            )));
        }
        Ok(Self {
            xtx: x.tr_mul(x),
            xty: x.tr_mul(y),
            yty: y.dot(y),
            n: y.len(),
        })
    }

    /// Number of coefficients
    #[inline(always)]
    pub fn dim(&self) -> usize {
        self.xty.len()
    }
}

/// Evidence terms and the Gaussian posterior at one hyperparameter setting
#[derive(Debug, Clone)]
pub struct Evidence {
    /// `ln p(y | theta, noise_var)`
    pub log_evidence: f64,
    /// `-y^T C^-1 y / 2` with `C = noise_var I + X Sigma X^T`
    pub data_fit: f64,
    /// `-ln|I + Sigma X^T X / noise_var| / 2`
    pub complexity: f64,
    /// `-n ln(2 pi noise_var) / 2`
    pub normalization: f64,
    /// Posterior mean of the coefficients
    pub mean: DVector<f64>,
    /// Posterior covariance of the coefficients
    pub covariance: DMatrix<f64>,
    /// Jitter that was added to the prior covariance
    pub jitter: f64,
    /// Gradient w.r.t. `[ln noise_var, theta...]`, when requested
    pub gradient: Option<DVector<f64>>,
}

/// Cholesky factor of `Sigma + jitter I`, escalating the jitter a bounded number of times
fn jittered_cholesky(sigma: &DMatrix<f64>) -> Result<(DMatrix<f64>, f64)> {
    let scale = sigma.diagonal().max().max(f64::MIN_POSITIVE);
    let n = sigma.nrows();
    let mut jitter = JITTER_START * scale;
    for attempt in 0..=MAX_JITTER_TRIES {
        let jittered = sigma + DMatrix::from_diagonal_element(n, n, jitter);
        if let Some(chol) = jittered.cholesky() {
            if attempt > 0 {
                debug!("prior covariance needed {} jitter escalations, jitter: {:e}", attempt, jitter);
            }
            return Ok((chol.l(), jitter));
        }
        jitter *= JITTER_GROWTH;
    }
    Err(RfError::numerical(format!(
        "prior covariance not positive definite after {} jitter escalations",
        MAX_JITTER_TRIES
    )))
}

/// Evaluate the log evidence and posterior, and optionally the gradient
///
/// # Arguments:
/// stats: Sufficient statistics of the data
/// prior: Prior family and grid
/// theta: Prior hyperparameters
/// noise_var: Observation noise variance
/// with_gradient: Also compute the gradient w.r.t. `[ln noise_var, theta...]`
pub fn log_evidence(
    stats: &SufficientStats,
    prior: &PriorCovariance,
    theta: &DVector<f64>,
    noise_var: f64,
    with_gradient: bool,
) -> Result<Evidence> {
    if prior.dim() != stats.dim() {
        return Err(RfError::Configuration(format!(
            "prior has {} coefficients, design has {}",
            prior.dim(),
            stats.dim()
        )));
    }
    if !(noise_var.is_finite() && noise_var > 0.0) {
        return Err(RfError::numerical(format!("noise variance {} is not positive", noise_var)));
    }

    let sigma = prior.covariance(theta)?;
    let (l, jitter) = jittered_cholesky(&sigma)?;
    let d = stats.dim();
    let n = stats.n as f64;

    // M = I + L^T G L / noise_var is symmetric positive definite whenever L is finite
    let gl = &stats.xtx * &l;
    let ltgl = l.tr_mul(&gl);
    let m = DMatrix::<f64>::identity(d, d) + &ltgl / noise_var;
    let chol_m = m
        .cholesky()
        .ok_or_else(|| RfError::numerical("posterior precision is not positive definite"))?;
    let log_det_m = 2.0 * chol_m.l().diagonal().iter().map(|v| v.ln()).sum::<f64>();
    let m_inv = chol_m.inverse();

    let b = l.tr_mul(&stats.xty);
    let m_inv_b = &m_inv * &b;

    let data_fit = -0.5 * (stats.yty - b.dot(&m_inv_b) / noise_var) / noise_var;
    let complexity = -0.5 * log_det_m;
    let normalization = -0.5 * n * (2.0 * PI * noise_var).ln();
    let log_evidence = data_fit + complexity + normalization;
    if !log_evidence.is_finite() {
        return Err(RfError::numerical("log evidence is not finite"));
    }

    let mean = &l * m_inv_b / noise_var;
    let covariance = &l * &m_inv * l.transpose();

    let gradient = if with_gradient {
        let g = &stats.xtx;
        let alpha = (&stats.xty - g * &mean) / noise_var;
        let k = (g - g * &covariance * g / noise_var) / noise_var;
        let a = &alpha * alpha.transpose() - k;
        let prior_grad = prior.contract_gradient(theta, &a)? * 0.5;

        let rss = stats.yty - 2.0 * mean.dot(&stats.xty) + mean.dot(&(g * &mean));
        let tr = m_inv.component_mul(&ltgl).sum();
        let noise_grad = 0.5 * (rss / noise_var - n + tr / noise_var);

        let mut grad = DVector::zeros(1 + prior_grad.len());
        grad[0] = noise_grad;
        grad.rows_mut(1, prior_grad.len()).copy_from(&prior_grad);
        Some(grad)
    } else {
        None
    };

    Ok(Evidence {
        log_evidence,
        data_fit,
        complexity,
        normalization,
        mean,
        covariance,
        jitter,
        gradient,
    })
}

#[cfg(test)]
mod tests {
    use common::sampling::{rng_from_seed, standard_normal};
    use optimizers::finite_diff::central_gradient;

    use super::*;
    use crate::{LinReg, TikhonovRegularization};

    fn synthetic(n: usize, d: usize, seed: u64) -> (DMatrix<f64>, DVector<f64>) {
        let mut rng = rng_from_seed(Some(seed));
        let x = DMatrix::from_fn(n, d, |_, _| standard_normal(&mut rng));
        let w = DVector::from_fn(d, |i, _| (-(i as f64 - d as f64 / 2.0).powi(2) / 4.0).exp());
        let noise = DVector::from_fn(n, |_, _| 0.3 * standard_normal(&mut rng));
        let y = &x * w + noise;
        (x, y)
    }

    /// Direct evaluation through the n x n marginal covariance
    fn brute_force(x: &DMatrix<f64>, y: &DVector<f64>, sigma: &DMatrix<f64>, noise_var: f64) -> f64 {
        let n = y.len();
        let c = DMatrix::from_diagonal_element(n, n, noise_var) + x * sigma * x.transpose();
        let chol = c.cholesky().unwrap();
        let log_det = 2.0 * chol.l().diagonal().iter().map(|v| v.ln()).sum::<f64>();
        let quad = y.dot(&chol.solve(y));
        -0.5 * (n as f64 * (2.0 * PI).ln() + log_det + quad)
    }

    #[test]
    fn matches_marginal_density() {
        let _ = pretty_env_logger::try_init();

        let (x, y) = synthetic(30, 6, 0);
        let stats = SufficientStats::new(&x, &y).unwrap();
        let prior = PriorCovariance::asd(&[6]).unwrap();
        let theta = DVector::from_vec(vec![0.2, 0.4]);
        let ev = log_evidence(&stats, &prior, &theta, 0.25, false).unwrap();
        let sigma = prior.covariance(&theta).unwrap();
        let goal = brute_force(&x, &y, &sigma, 0.25);
        assert!((ev.log_evidence - goal).abs() < 1e-6, "{} vs {}", ev.log_evidence, goal);
        assert!((ev.data_fit + ev.complexity + ev.normalization - ev.log_evidence).abs() < 1e-12);
        assert!(ev.complexity <= 0.0);
    }

    #[test]
    fn ridge_posterior_mean_is_closed_form_ridge() {
        let (x, y) = synthetic(50, 8, 1);
        let stats = SufficientStats::new(&x, &y).unwrap();
        let prior = PriorCovariance::ridge(8).unwrap();
        let (rho, noise_var) = (0.5f64, 0.2);
        let ev = log_evidence(&stats, &prior, &DVector::from_vec(vec![rho]), noise_var, false).unwrap();

        let ridge = TikhonovRegularization::new(noise_var / rho.exp());
        let goal = ridge.fit_readout(&x, &DMatrix::from_column_slice(50, 1, y.as_slice())).unwrap();
        assert!((ev.mean - goal.column(0)).norm() < 1e-6);
    }

    #[test]
    fn gradient_matches_finite_differences() {
        let (x, y) = synthetic(40, 5, 2);
        let stats = SufficientStats::new(&x, &y).unwrap();
        let cases = vec![
            (PriorCovariance::ridge(5).unwrap(), vec![-0.3, 0.2]),
            (PriorCovariance::ard(5).unwrap(), vec![-0.3, 0.2, 0.1, -0.5, 0.0, 0.4]),
            (PriorCovariance::asd(&[5]).unwrap(), vec![-1.0, 0.1, 0.5]),
            (PriorCovariance::ald(&[5]).unwrap(), vec![-1.0, 0.1, 0.5, 2.2, 0.6]),
        ];
        for (prior, params) in cases {
            let params = DVector::from_vec(params);
            let f = |p: &DVector<f64>| -> Result<f64> {
                let theta = p.rows(1, p.len() - 1).into_owned();
                Ok(log_evidence(&stats, &prior, &theta, p[0].exp(), false)?.log_evidence)
            };
            let numeric = central_gradient(f, &params).unwrap();
            let theta = params.rows(1, params.len() - 1).into_owned();
            let analytic = log_evidence(&stats, &prior, &theta, params[0].exp(), true)
                .unwrap()
                .gradient
                .unwrap();
            assert!(
                (&analytic - &numeric).norm() < 1e-4 * (1.0 + numeric.norm()),
                "{:?}: {} vs {}",
                prior.family(),
                analytic,
                numeric
            );
        }
    }

    #[test]
    fn singular_prior_is_jittered() {
        let (x, y) = synthetic(20, 4, 3);
        let stats = SufficientStats::new(&x, &y).unwrap();
        // A huge length scale makes Sigma numerically rank one
        let prior = PriorCovariance::asd(&[4]).unwrap();
        let ev = log_evidence(&stats, &prior, &DVector::from_vec(vec![0.0, 8.0]), 0.1, false).unwrap();
        assert!(ev.jitter > 0.0);
        assert!(ev.log_evidence.is_finite());
    }

    #[test]
    fn shape_and_noise_errors() {
        let (x, y) = synthetic(20, 4, 4);
        let stats = SufficientStats::new(&x, &y).unwrap();
        let prior = PriorCovariance::ridge(3).unwrap();
        assert!(matches!(
            log_evidence(&stats, &prior, &DVector::zeros(1), 0.1, false),
            Err(RfError::Configuration(_))
        ));
        let prior = PriorCovariance::ridge(4).unwrap();
        assert!(matches!(
            log_evidence(&stats, &prior, &DVector::zeros(1), 0.0, false),
            Err(RfError::Numerical { .. })
        ));
        assert!(matches!(
            log_evidence(&stats, &prior, &DVector::from_vec(vec![1e4]), 0.1, false),
            Err(RfError::Numerical { .. })
        ));
        assert!(matches!(
            SufficientStats::new(&x, &DVector::zeros(19)),
            Err(RfError::Configuration(_))
        ));
    }
}
