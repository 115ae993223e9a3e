use common::{Result, RfError};
use nalgebra::{DMatrix, DVector};

use crate::{spline::least_squares_coefficients, BasisKind, SplineBasis};

/// Tensor product of per-axis bases for a multi-dimensional filter.
///
/// Filters are flattened in C order with the time-lag axis first, so the full basis is
/// `B_0 kron B_1 kron ...` and the penalty is the Kronecker sum of the per-axis penalties,
/// each scaled by its smoothness weight.
#[derive(Debug, Clone, PartialEq)]
pub struct TensorBasis {
    dims: Vec<usize>,
    axes: Vec<SplineBasis>,
    basis: DMatrix<f64>,
    penalty: DMatrix<f64>,
}

impl TensorBasis {
    /// Build the tensor basis
    ///
    /// # Arguments:
    /// dims: Filter shape, time lags first
    /// df: Basis functions per axis. `None` keeps every coefficient (identity on all axes)
    /// kind: Basis kind used on every reduced axis
    /// lam: Per-axis smoothness weights; empty means 1 on every axis, a single value is broadcast
    pub fn build(dims: &[usize], df: Option<&[usize]>, kind: BasisKind, lam: &[f64]) -> Result<Self> {
        if dims.is_empty() {
            return Err(RfError::Configuration("filter dims must not be empty".to_string()));
        }
        let lam: Vec<f64> = match lam.len() {
            0 => vec![1.0; dims.len()],
            1 => vec![lam[0]; dims.len()],
            l if l == dims.len() => lam.to_vec(),
            l => {
                return Err(RfError::Configuration(format!(
                    "got {} smoothness weights for a filter with {} axes",
                    l,
                    dims.len()
                )))
            }
        };

        let axes = match df {
            None => dims
                .iter()
                .map(|n| SplineBasis::build(*n, *n, BasisKind::Identity))
                .collect::<Result<Vec<_>>>()?,
            Some(df) => {
                if df.len() != dims.len() {
                    return Err(RfError::Configuration(format!(
                        "df has rank {} but dims has rank {}",
                        df.len(),
                        dims.len()
                    )));
                }
                dims.iter()
                    .zip(df)
                    .map(|(n, df)| SplineBasis::build(*n, *df, kind))
                    .collect::<Result<Vec<_>>>()?
            }
        };

        let mut basis = axes[0].basis().clone();
        for axis in &axes[1..] {
            basis = basis.kronecker(axis.basis());
        }

        let n_coef: usize = axes.iter().map(|a| a.df()).product();
        let mut penalty = DMatrix::zeros(n_coef, n_coef);
        for (i, axis) in axes.iter().enumerate() {
            let before: usize = axes[..i].iter().map(|a| a.df()).product();
            let after: usize = axes[i + 1..].iter().map(|a| a.df()).product();
            let term = DMatrix::<f64>::identity(before, before)
                .kronecker(axis.penalty())
                .kronecker(&DMatrix::<f64>::identity(after, after));
            penalty += term * lam[i];
        }

        Ok(Self {
            dims: dims.to_vec(),
            axes,
            basis,
            penalty,
        })
    }

    /// The filter shape
    #[inline(always)]
    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    /// Number of coefficients along each axis
    pub fn coef_dims(&self) -> Vec<usize> {
        self.axes.iter().map(|a| a.df()).collect()
    }

    /// The per-axis bases
    #[inline(always)]
    pub fn axes(&self) -> &[SplineBasis] {
        &self.axes
    }

    /// Flattened filter length
    #[inline(always)]
    pub fn len(&self) -> usize {
        self.basis.nrows()
    }

    /// Total number of coefficients
    #[inline(always)]
    pub fn n_coef(&self) -> usize {
        self.basis.ncols()
    }

    /// The full basis matrix
    #[inline(always)]
    pub fn basis(&self) -> &DMatrix<f64> {
        &self.basis
    }

    /// The full penalty matrix, smoothness weights applied
    #[inline(always)]
    pub fn penalty(&self) -> &DMatrix<f64> {
        &self.penalty
    }

    /// Whether this basis leaves the filter unreduced
    pub fn is_identity(&self) -> bool {
        self.axes.iter().all(|a| a.kind() == BasisKind::Identity)
    }

    /// Least-squares coefficients of a flattened filter
    pub fn project(&self, raw: &DVector<f64>) -> Result<DVector<f64>> {
        least_squares_coefficients(&self.basis, raw)
    }

    /// Apply `B^T` to every lag-window row of a design matrix
    pub fn project_rows(&self, rows: &DMatrix<f64>) -> DMatrix<f64> {
        if self.is_identity() {
            return rows.clone();
        }
        rows * &self.basis
    }

    /// Flattened filter from coefficients
    pub fn reconstruct(&self, coef: &DVector<f64>) -> DVector<f64> {
        &self.basis * coef
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scenario_a_coefficient_counts() {
        let _ = pretty_env_logger::try_init();

        let stimulus = TensorBasis::build(&[5, 20, 15], Some(&[4, 9, 7]), BasisKind::Cr, &[]).unwrap();
        assert_eq!(stimulus.len(), 5 * 20 * 15);
        assert_eq!(stimulus.n_coef(), 4 * 9 * 7);
        assert_eq!(stimulus.penalty().shape(), (252, 252));

        let history = TensorBasis::build(&[20], Some(&[8]), BasisKind::Cr, &[]).unwrap();
        assert_eq!(stimulus.n_coef() + history.n_coef(), 260);
    }

    #[test]
    fn rank_mismatch() {
        assert!(matches!(
            TensorBasis::build(&[5, 20], Some(&[4]), BasisKind::Cr, &[]),
            Err(RfError::Configuration(_))
        ));
        assert!(matches!(
            TensorBasis::build(&[5, 20], None, BasisKind::Cr, &[1.0, 2.0, 3.0]),
            Err(RfError::Configuration(_))
        ));
    }

    #[test]
    fn no_df_means_identity() {
        let basis = TensorBasis::build(&[3, 4], None, BasisKind::Cr, &[]).unwrap();
        assert!(basis.is_identity());
        assert_eq!(basis.basis(), &DMatrix::identity(12, 12));
        let x = DVector::from_fn(12, |i, _| i as f64 * 0.25 - 1.0);
        assert_eq!(basis.reconstruct(&basis.project(&x).unwrap()), x);
    }

    #[test]
    fn penalty_is_kronecker_sum() {
        let basis = TensorBasis::build(&[6, 5], Some(&[4, 3]), BasisKind::Cr, &[2.0, 0.5]).unwrap();
        let p0 = basis.axes()[0].penalty();
        let p1 = basis.axes()[1].penalty();
        let goal = p0.kronecker(&DMatrix::<f64>::identity(3, 3)) * 2.0
            + DMatrix::<f64>::identity(4, 4).kronecker(p1) * 0.5;
        assert!((basis.penalty() - goal).norm() < 1e-12);
    }

    #[test]
    fn separable_filter_round_trip() {
        let basis = TensorBasis::build(&[8, 6], Some(&[8, 6]), BasisKind::Cr, &[]).unwrap();
        let t = DVector::from_fn(8, |i, _| (-(i as f64 - 3.0).powi(2) / 4.0).exp());
        let s = DVector::from_fn(6, |i, _| i as f64 - 2.5);
        let filter = t.kronecker(&s);
        let back = basis.reconstruct(&basis.project(&filter).unwrap());
        assert!((back - filter).norm() < 1e-8);
    }
}
