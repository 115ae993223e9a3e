use common::{Result, RfError};
use nalgebra::DMatrix;

use super::LinReg;

/// Tikhonov regularization aka ridge regression
/// It is particularly useful to mitigate the problem of multicollinearity in
/// linear regression
#[derive(Debug, Clone)]
pub struct TikhonovRegularization {
    /// Ridge parameter
    pub regularization_coeff: f64,
    /// Quadratic penalty replacing the identity, e.g. a roughness penalty
    pub penalty: Option<DMatrix<f64>>,
}

impl TikhonovRegularization {
    /// Plain ridge regression
    pub fn new(regularization_coeff: f64) -> Self {
        Self {
            regularization_coeff,
            penalty: None,
        }
    }

    /// Ridge regression against a general quadratic penalty `w^T P w`
    pub fn with_penalty(regularization_coeff: f64, penalty: DMatrix<f64>) -> Self {
        Self {
            regularization_coeff,
            penalty: Some(penalty),
        }
    }

    /// The regularized normal matrix `X^T X + coeff * P`
    pub fn normal_matrix(&self, design: &DMatrix<f64>) -> Result<DMatrix<f64>> {
        let n = design.ncols();
        let reg_m = match &self.penalty {
            Some(p) if p.shape() != (n, n) => {
                return Err(RfError::Configuration(format!(
                    "penalty has shape {:?}, design has {} columns",
                    p.shape(),
                    n
                )))
            }
            Some(p) => p * self.regularization_coeff,
            None => DMatrix::from_diagonal_element(n, n, self.regularization_coeff),
        };
        Ok(design.tr_mul(design) + reg_m)
    }
}

impl LinReg for TikhonovRegularization {
    fn fit_readout(&self, design: &DMatrix<f64>, targets: &DMatrix<f64>) -> Result<DMatrix<f64>> {
        if design.nrows() != targets.nrows() {
            return Err(RfError::Configuration(format!(
                "design has {} rows, targets have {}",
                design.nrows(),
                targets.nrows()
            )));
        }
        let p0 = self.normal_matrix(design)?;
        let p2 = design.tr_mul(targets);

        match p0.clone().cholesky() {
            Some(chol) => Ok(chol.solve(&p2)),
            None => p0
                .lu()
                .solve(&p2)
                .ok_or_else(|| RfError::numerical("regularized normal matrix is singular")),
        }
    }
}
