use std::str::FromStr;

use common::{Result, RfError};
use nalgebra::{DMatrix, DVector};

/// The supported prior families over filter coefficients
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriorFamily {
    /// Isotropic prior, one log-variance
    Ridge,
    /// Automatic relevance determination, one log-variance per group
    Ard,
    /// Automatic smoothness determination, squared-exponential kernel over the coefficient grid
    Asd,
    /// Automatic locality determination, ASD smoothness times a Gaussian envelope per axis
    Ald,
}

impl FromStr for PriorFamily {
    type Err = RfError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "ridge" => Ok(PriorFamily::Ridge),
            "ard" => Ok(PriorFamily::Ard),
            "asd" => Ok(PriorFamily::Asd),
            "ald" => Ok(PriorFamily::Ald),
            other => Err(RfError::Configuration(format!("unknown prior family `{}`", other))),
        }
    }
}

/// Hyperparameterized prior covariance over a coefficient grid.
///
/// The hyperparameter layout per family:
/// - Ridge: `[rho]`, `Sigma = e^rho I`
/// - ARD: `[rho_g...]`, `Sigma = diag(e^rho_g)` with `g` the group of each coefficient
/// - ASD: `[rho, ln delta_a...]`, `Sigma_ij = e^rho exp(-sum_a (x_ia - x_ja)^2 / (2 delta_a^2))`
/// - ALD: `[rho, ln delta_a..., nu_a..., ln omega_a...]`,
///   `Sigma_ij = e^rho s_i s_j exp(-sum_a (x_ia - x_ja)^2 / (2 delta_a^2))` with
///   `s_i = exp(-sum_a (x_ia - nu_a)^2 / (4 omega_a^2))`
///
/// Grid coordinates are coefficient indices along each axis, C-order flattened.
#[derive(Debug, Clone)]
pub struct PriorCovariance {
    family: PriorFamily,
    dims: Vec<usize>,
    coords: Vec<Vec<f64>>,
    groups: Vec<usize>,
    n_groups: usize,
}

impl PriorCovariance {
    /// Isotropic prior over `n` coefficients
    pub fn ridge(n: usize) -> Result<Self> {
        Self::new(PriorFamily::Ridge, &[n])
    }

    /// One relevance hyperparameter per coefficient
    pub fn ard(n: usize) -> Result<Self> {
        Self::new(PriorFamily::Ard, &[n])
    }

    /// One relevance hyperparameter per declared group.
    /// Group labels must cover `0..n_groups` without gaps.
    pub fn ard_grouped(groups: Vec<usize>) -> Result<Self> {
        let mut prior = Self::new(PriorFamily::Ard, &[groups.len()])?;
        let n_groups = groups.iter().max().map(|g| g + 1).unwrap_or(0);
        for g in 0..n_groups {
            if !groups.contains(&g) {
                return Err(RfError::Configuration(format!("ARD group {} has no coefficients", g)));
            }
        }
        prior.groups = groups;
        prior.n_groups = n_groups;
        Ok(prior)
    }

    /// Smoothness prior over a coefficient grid of shape `dims`
    pub fn asd(dims: &[usize]) -> Result<Self> {
        Self::new(PriorFamily::Asd, dims)
    }

    /// Locality prior over a coefficient grid of shape `dims`
    pub fn ald(dims: &[usize]) -> Result<Self> {
        Self::new(PriorFamily::Ald, dims)
    }

    /// Prior of the given family over a coefficient grid of shape `dims`
    pub fn new(family: PriorFamily, dims: &[usize]) -> Result<Self> {
        if dims.is_empty() || dims.iter().any(|d| *d == 0) {
            return Err(RfError::Configuration(format!(
                "prior grid dims must be non-empty and positive, got {:?}",
                dims
            )));
        }
        let n: usize = dims.iter().product();
        let coords = (0..n).map(|i| unravel(i, dims)).collect();

        Ok(Self {
            family,
            dims: dims.to_vec(),
            coords,
            groups: (0..n).collect(),
            n_groups: n,
        })
    }

    /// The prior family
    #[inline(always)]
    pub fn family(&self) -> PriorFamily {
        self.family
    }

    /// Shape of the coefficient grid
    #[inline(always)]
    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    /// Number of coefficients
    #[inline(always)]
    pub fn dim(&self) -> usize {
        self.coords.len()
    }

    fn n_axes(&self) -> usize {
        self.dims.len()
    }

    /// Number of hyperparameters
    pub fn n_hyper(&self) -> usize {
        match self.family {
            PriorFamily::Ridge => 1,
            PriorFamily::Ard => self.n_groups,
            PriorFamily::Asd => 1 + self.n_axes(),
            PriorFamily::Ald => 1 + 3 * self.n_axes(),
        }
    }

    /// A neutral starting point: unit prior variance, length scales of one grid step,
    /// envelopes centered on the grid and spanning half of it
    pub fn default_theta(&self) -> DVector<f64> {
        let axes = self.n_axes();
        match self.family {
            PriorFamily::Ridge => DVector::zeros(1),
            PriorFamily::Ard => DVector::zeros(self.n_groups),
            PriorFamily::Asd => DVector::zeros(1 + axes),
            PriorFamily::Ald => {
                let mut theta = DVector::zeros(1 + 3 * axes);
                for (a, d) in self.dims.iter().enumerate() {
                    theta[1 + axes + a] = (*d as f64 - 1.0) / 2.0;
                    theta[1 + 2 * axes + a] = (*d as f64 / 4.0).max(0.5).ln();
                }
                theta
            }
        }
    }

    /// Box from which random restarts draw hyperparameters
    pub fn hyper_ranges(&self) -> Vec<(f64, f64)> {
        let mut ranges = match self.family {
            PriorFamily::Ard => vec![(-4.0, 4.0); self.n_groups],
            _ => vec![(-4.0, 4.0)],
        };
        if matches!(self.family, PriorFamily::Asd | PriorFamily::Ald) {
            ranges.extend(self.dims.iter().map(|d| (0.5f64.ln(), (*d as f64).max(1.0).ln())));
        }
        if self.family == PriorFamily::Ald {
            ranges.extend(self.dims.iter().map(|d| (0.0, (*d as f64 - 1.0).max(0.0))));
            ranges.extend(self.dims.iter().map(|d| (0.0, (*d as f64).max(1.0).ln())));
        }
        ranges
    }

    fn check_theta(&self, theta: &DVector<f64>) -> Result<()> {
        if theta.len() != self.n_hyper() {
            return Err(RfError::Configuration(format!(
                "{:?} prior takes {} hyperparameters, got {}",
                self.family,
                self.n_hyper(),
                theta.len()
            )));
        }
        Ok(())
    }

    /// The covariance matrix `Sigma(theta)`
    pub fn covariance(&self, theta: &DVector<f64>) -> Result<DMatrix<f64>> {
        self.check_theta(theta)?;
        let n = self.dim();
        let cov = match self.family {
            PriorFamily::Ridge => DMatrix::from_diagonal_element(n, n, theta[0].exp()),
            PriorFamily::Ard => {
                DMatrix::from_diagonal(&DVector::from_fn(n, |i, _| theta[self.groups[i]].exp()))
            }
            PriorFamily::Asd | PriorFamily::Ald => {
                let envelope = self.envelope(theta);
                let scale = theta[0].exp();
                DMatrix::from_fn(n, n, |i, j| scale * (envelope[i] * envelope[j]) * self.smoothness(theta, i, j))
            }
        };
        if cov.iter().any(|v| !v.is_finite()) {
            return Err(RfError::numerical(format!("prior covariance is not finite at {}", theta.transpose())));
        }
        Ok(cov)
    }

    /// Contract every partial derivative of `Sigma` with a symmetric matrix:
    /// entry `k` is `sum_ij A_ij dSigma_ij / dtheta_k`.
    /// This is all the evidence gradient needs and avoids materializing the derivative matrices.
    pub fn contract_gradient(&self, theta: &DVector<f64>, a: &DMatrix<f64>) -> Result<DVector<f64>> {
        let cov = self.covariance(theta)?;
        let n = self.dim();
        let axes = self.n_axes();
        let mut grad = DVector::zeros(self.n_hyper());

        match self.family {
            PriorFamily::Ridge => grad[0] = theta[0].exp() * a.trace(),
            PriorFamily::Ard => {
                for i in 0..n {
                    grad[self.groups[i]] += cov[(i, i)] * a[(i, i)];
                }
            }
            PriorFamily::Asd | PriorFamily::Ald => {
                let ald = self.family == PriorFamily::Ald;
                for i in 0..n {
                    for j in 0..n {
                        let w = a[(i, j)] * cov[(i, j)];
                        if w == 0.0 {
                            continue;
                        }
                        grad[0] += w;
                        for ax in 0..axes {
                            let delta = theta[1 + ax].exp();
                            let d = self.coords[i][ax] - self.coords[j][ax];
                            grad[1 + ax] += w * d * d / (delta * delta);
                            if ald {
                                let nu = theta[1 + axes + ax];
                                let omega2 = (2.0 * theta[1 + 2 * axes + ax]).exp();
                                let di = self.coords[i][ax] - nu;
                                let dj = self.coords[j][ax] - nu;
                                grad[1 + axes + ax] += w * (di + dj) / (2.0 * omega2);
                                grad[1 + 2 * axes + ax] += w * (di * di + dj * dj) / (2.0 * omega2);
                            }
                        }
                    }
                }
            }
        }
        Ok(grad)
    }

    /// ALD localization factors `s_i`, ones for the other families
    fn envelope(&self, theta: &DVector<f64>) -> Vec<f64> {
        if self.family != PriorFamily::Ald {
            return vec![1.0; self.dim()];
        }
        let axes = self.n_axes();
        self.coords
            .iter()
            .map(|x| {
                let e: f64 = (0..axes)
                    .map(|a| {
                        let nu = theta[1 + axes + a];
                        let omega2 = (2.0 * theta[1 + 2 * axes + a]).exp();
                        (x[a] - nu).powi(2) / (4.0 * omega2)
                    })
                    .sum();
                (-e).exp()
            })
            .collect()
    }

    fn smoothness(&self, theta: &DVector<f64>, i: usize, j: usize) -> f64 {
        let e: f64 = (0..self.n_axes())
            .map(|a| {
                let delta2 = (2.0 * theta[1 + a]).exp();
                (self.coords[i][a] - self.coords[j][a]).powi(2) / (2.0 * delta2)
            })
            .sum();
        (-e).exp()
    }
}

/// Grid coordinates of flat index `i` in a C-order array of shape `dims`
fn unravel(mut i: usize, dims: &[usize]) -> Vec<f64> {
    let mut coord = vec![0.0; dims.len()];
    for (a, d) in dims.iter().enumerate().rev() {
        coord[a] = (i % d) as f64;
        i /= d;
    }
    coord
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numerical_contraction(prior: &PriorCovariance, theta: &DVector<f64>, a: &DMatrix<f64>) -> DVector<f64> {
        let h = 1e-6;
        DVector::from_fn(theta.len(), |k, _| {
            let mut up = theta.clone();
            let mut down = theta.clone();
            up[k] += h;
            down[k] -= h;
            let diff = (prior.covariance(&up).unwrap() - prior.covariance(&down).unwrap()) / (2.0 * h);
            diff.component_mul(a).sum()
        })
    }

    fn symmetric(n: usize) -> DMatrix<f64> {
        let m = DMatrix::from_fn(n, n, |i, j| ((i * 7 + j * 3) % 5) as f64 - 2.0);
        &m + m.transpose()
    }

    #[test]
    fn unravel_c_order() {
        assert_eq!(unravel(0, &[2, 3]), vec![0.0, 0.0]);
        assert_eq!(unravel(2, &[2, 3]), vec![0.0, 2.0]);
        assert_eq!(unravel(4, &[2, 3]), vec![1.0, 1.0]);
    }

    #[test]
    fn hyperparameter_counts() {
        assert_eq!(PriorCovariance::ridge(10).unwrap().n_hyper(), 1);
        assert_eq!(PriorCovariance::ard(10).unwrap().n_hyper(), 10);
        assert_eq!(PriorCovariance::ard_grouped(vec![0, 0, 1, 1, 2]).unwrap().n_hyper(), 3);
        assert_eq!(PriorCovariance::asd(&[4, 5]).unwrap().n_hyper(), 3);
        assert_eq!(PriorCovariance::ald(&[4, 5]).unwrap().n_hyper(), 7);
        for prior in [
            PriorCovariance::asd(&[4, 5]).unwrap(),
            PriorCovariance::ald(&[4, 5]).unwrap(),
            PriorCovariance::ard(3).unwrap(),
        ] {
            assert_eq!(prior.default_theta().len(), prior.n_hyper());
            assert_eq!(prior.hyper_ranges().len(), prior.n_hyper());
        }
    }

    #[test]
    fn invalid_configuration() {
        assert!(matches!(PriorCovariance::asd(&[]), Err(RfError::Configuration(_))));
        assert!(matches!(PriorCovariance::ard_grouped(vec![0, 2]), Err(RfError::Configuration(_))));
        let prior = PriorCovariance::ridge(3).unwrap();
        assert!(matches!(
            prior.covariance(&DVector::zeros(2)),
            Err(RfError::Configuration(_))
        ));
        assert!("gauss".parse::<PriorFamily>().is_err());
        assert_eq!("ALD".parse::<PriorFamily>().unwrap(), PriorFamily::Ald);
    }

    #[test]
    fn ridge_and_ard_are_diagonal() {
        let ridge = PriorCovariance::ridge(4).unwrap();
        let cov = ridge.covariance(&DVector::from_vec(vec![2f64.ln()])).unwrap();
        assert!((cov - DMatrix::from_diagonal_element(4, 4, 2.0)).norm() < 1e-12);

        let ard = PriorCovariance::ard_grouped(vec![0, 1, 0]).unwrap();
        let cov = ard.covariance(&DVector::from_vec(vec![0.0, 1.0])).unwrap();
        assert_eq!(cov[(0, 0)], 1.0);
        assert_eq!(cov[(1, 1)], 1f64.exp());
        assert_eq!(cov[(2, 2)], 1.0);
        assert_eq!(cov[(0, 2)], 0.0);
    }

    #[test]
    fn asd_correlates_neighbours() {
        let prior = PriorCovariance::asd(&[6]).unwrap();
        let cov = prior.covariance(&DVector::from_vec(vec![0.0, 2f64.ln()])).unwrap();
        assert_eq!(cov[(2, 2)], 1.0);
        assert!(cov[(2, 3)] > cov[(2, 5)]);
        assert!((cov[(2, 3)] - (-1.0f64 / 8.0).exp()).abs() < 1e-12);
        assert_eq!(cov, cov.transpose());
    }

    #[test]
    fn ald_localizes_variance() {
        let prior = PriorCovariance::ald(&[11]).unwrap();
        let theta = DVector::from_vec(vec![0.0, 0.0, 3.0, 1f64.ln()]);
        let cov = prior.covariance(&theta).unwrap();
        assert!((cov[(3, 3)] - 1.0).abs() < 1e-12);
        assert!(cov[(10, 10)] < 1e-10);
        // diagonal follows exp(-(x - nu)^2 / (2 omega^2))
        assert!((cov[(4, 4)] - (-0.5f64).exp()).abs() < 1e-12);
    }

    #[test]
    fn contraction_matches_finite_differences() {
        let cases = vec![
            (PriorCovariance::ridge(5).unwrap(), DVector::from_vec(vec![0.3])),
            (
                PriorCovariance::ard_grouped(vec![0, 1, 1, 2, 0]).unwrap(),
                DVector::from_vec(vec![0.1, -0.4, 0.7]),
            ),
            (PriorCovariance::asd(&[5]).unwrap(), DVector::from_vec(vec![0.2, 0.5])),
            (
                PriorCovariance::ald(&[5]).unwrap(),
                DVector::from_vec(vec![-0.1, 0.3, 1.7, 0.4]),
            ),
            (
                PriorCovariance::ald(&[2, 3]).unwrap(),
                DVector::from_vec(vec![0.0, 0.2, -0.1, 0.6, 1.2, 0.1, 0.3]),
            ),
        ];
        for (prior, theta) in cases {
            let a = symmetric(prior.dim());
            let analytic = prior.contract_gradient(&theta, &a).unwrap();
            let numeric = numerical_contraction(&prior, &theta, &a);
            assert!(
                (&analytic - &numeric).norm() < 1e-5 * (1.0 + numeric.norm()),
                "{:?}: {} vs {}",
                prior.family(),
                analytic,
                numeric
            );
        }
    }
}
