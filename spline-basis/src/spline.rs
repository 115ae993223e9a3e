use common::{Result, RfError};
use nalgebra::{DMatrix, DVector};

use crate::BasisKind;

/// B-spline order (cubic)
const BS_ORDER: usize = 4;

/// A smooth low-rank basis for one filter axis.
///
/// Maps a filter of length `n` onto `df` coefficients through the basis matrix `B` (`n x df`)
/// and carries the roughness penalty `P` (`df x df`) used for smoothness regularization.
/// Immutable after construction.
#[derive(Debug, Clone, PartialEq)]
pub struct SplineBasis {
    kind: BasisKind,
    basis: DMatrix<f64>,
    penalty: DMatrix<f64>,
    knots: Vec<f64>,
}

impl SplineBasis {
    /// Build the basis for an axis of length `n` with `df` coefficients
    ///
    /// # Arguments:
    /// n: Length of the filter axis
    /// df: Number of basis functions
    /// kind: Which basis to construct
    pub fn build(n: usize, df: usize, kind: BasisKind) -> Result<Self> {
        if n == 0 {
            return Err(RfError::Configuration("filter axis of length 0".to_string()));
        }
        if df > n {
            return Err(RfError::Configuration(format!(
                "df ({}) must not exceed the axis length ({})",
                df, n
            )));
        }
        let axis: Vec<f64> = (0..n).map(|i| i as f64).collect();

        let (basis, penalty, knots) = match kind {
            BasisKind::Identity => {
                if df != n {
                    return Err(RfError::Configuration(format!(
                        "an identity basis keeps all {} coefficients, got df = {}",
                        n, df
                    )));
                }
                let d = difference_matrix(n, 2);
                (DMatrix::identity(n, n), d.tr_mul(&d), axis)
            }
            BasisKind::Cr => {
                if df < 2 {
                    return Err(RfError::Configuration(format!(
                        "a cubic regression spline needs df >= 2, got {}",
                        df
                    )));
                }
                cr_basis(&axis, df)?
            }
            BasisKind::Bs => {
                if df < BS_ORDER {
                    return Err(RfError::Configuration(format!(
                        "a cubic B-spline needs df >= {}, got {}",
                        BS_ORDER, df
                    )));
                }
                bs_basis(&axis, df)
            }
        };
        debug!("built {:?} basis: n = {}, df = {}", kind, n, df);

        Ok(Self {
            kind,
            basis,
            penalty,
            knots,
        })
    }

    /// The kind of this basis
    #[inline(always)]
    pub fn kind(&self) -> BasisKind {
        self.kind
    }

    /// Length of the filter axis
    #[inline(always)]
    pub fn len(&self) -> usize {
        self.basis.nrows()
    }

    /// Number of basis coefficients
    #[inline(always)]
    pub fn df(&self) -> usize {
        self.basis.ncols()
    }

    /// The basis matrix `B`, `n x df`
    #[inline(always)]
    pub fn basis(&self) -> &DMatrix<f64> {
        &self.basis
    }

    /// The roughness penalty `P`, `df x df`
    #[inline(always)]
    pub fn penalty(&self) -> &DMatrix<f64> {
        &self.penalty
    }

    /// Knot locations on the axis index grid
    #[inline(always)]
    pub fn knots(&self) -> &[f64] {
        &self.knots
    }

    /// Least-squares coefficients of `raw` in this basis, so that
    /// `reconstruct(project(raw))` is the orthogonal projection of `raw` onto the column space of `B`
    pub fn project(&self, raw: &DVector<f64>) -> Result<DVector<f64>> {
        least_squares_coefficients(&self.basis, raw)
    }

    /// Apply `B^T` to every row of `rows`, i.e. `rows * B`
    pub fn project_rows(&self, rows: &DMatrix<f64>) -> DMatrix<f64> {
        rows * &self.basis
    }

    /// Filter values from basis coefficients, `B * coef`
    pub fn reconstruct(&self, coef: &DVector<f64>) -> DVector<f64> {
        &self.basis * coef
    }
}

/// Solve the normal equations `B^T B c = B^T x`
pub(crate) fn least_squares_coefficients(
    basis: &DMatrix<f64>,
    raw: &DVector<f64>,
) -> Result<DVector<f64>> {
    if raw.len() != basis.nrows() {
        return Err(RfError::Configuration(format!(
            "expected a vector of length {}, got {}",
            basis.nrows(),
            raw.len()
        )));
    }
    let gram = basis.tr_mul(basis);
    let rhs = basis.tr_mul(raw);
    match gram.cholesky() {
        Some(chol) => Ok(chol.solve(&rhs)),
        None => Err(RfError::numerical("basis gram matrix is not positive definite")),
    }
}

/// Difference operator of the given order, `(n - order) x n`.
/// Returns an empty matrix when the axis is too short.
pub(crate) fn difference_matrix(n: usize, order: usize) -> DMatrix<f64> {
    if n <= order {
        return DMatrix::zeros(0, n);
    }
    let mut d = DMatrix::identity(n, n);
    for _ in 0..order {
        let rows = d.nrows() - 1;
        d = DMatrix::from_fn(rows, n, |i, j| d[(i + 1, j)] - d[(i, j)]);
    }
    d
}

/// Sample quantiles with linear interpolation between order statistics
fn quantiles(sorted: &[f64], num: usize) -> Vec<f64> {
    let last = (sorted.len() - 1) as f64;
    (0..num)
        .map(|j| {
            let pos = last * j as f64 / (num - 1) as f64;
            let lo = pos.floor() as usize;
            let hi = pos.ceil() as usize;
            let frac = pos - lo as f64;
            sorted[lo] + frac * (sorted[hi] - sorted[lo])
        })
        .collect()
}

/// Cubic regression spline, parameterized by its values at the knots.
/// Penalty is the integrated squared second derivative.
fn cr_basis(x: &[f64], df: usize) -> Result<(DMatrix<f64>, DMatrix<f64>, Vec<f64>)> {
    let knots = quantiles(x, df);
    let h: Vec<f64> = knots.windows(2).map(|w| w[1] - w[0]).collect();
    if h.iter().any(|h| *h <= 0.0) {
        return Err(RfError::Configuration("spline knots must be distinct".to_string()));
    }

    // second derivatives at the knots, zero at both ends
    let mut f = DMatrix::zeros(df, df);
    let mut penalty = DMatrix::zeros(df, df);
    if df > 2 {
        let m = df - 2;
        let mut d = DMatrix::zeros(m, df);
        let mut b = DMatrix::zeros(m, m);
        for i in 0..m {
            d[(i, i)] = 1.0 / h[i];
            d[(i, i + 1)] = -1.0 / h[i] - 1.0 / h[i + 1];
            d[(i, i + 2)] = 1.0 / h[i + 1];
            b[(i, i)] = (h[i] + h[i + 1]) / 3.0;
            if i + 1 < m {
                b[(i, i + 1)] = h[i + 1] / 6.0;
                b[(i + 1, i)] = h[i + 1] / 6.0;
            }
        }
        let chol = b
            .cholesky()
            .ok_or_else(|| RfError::numerical("spline band matrix is not positive definite"))?;
        let f_inner = chol.solve(&d);
        penalty = d.tr_mul(&f_inner);
        f.view_mut((1, 0), (m, df)).copy_from(&f_inner);
    }

    let mut basis = DMatrix::zeros(x.len(), df);
    for (row, &xi) in x.iter().enumerate() {
        let j = knots[1..df - 1].iter().take_while(|k| xi > **k).count();
        let hj = h[j];
        let right = knots[j + 1] - xi;
        let left = xi - knots[j];
        let am = right / hj;
        let ap = left / hj;
        let cm = (right.powi(3) / hj - hj * right) / 6.0;
        let cp = (left.powi(3) / hj - hj * left) / 6.0;
        for col in 0..df {
            basis[(row, col)] = cm * f[(j, col)] + cp * f[(j + 1, col)];
        }
        basis[(row, j)] += am;
        basis[(row, j + 1)] += ap;
    }

    Ok((basis, penalty, knots))
}

/// Cubic B-spline basis on equally spaced knots, extended by three knots on either side.
/// Penalty is the second-order difference penalty on the coefficients.
fn bs_basis(x: &[f64], df: usize) -> (DMatrix<f64>, DMatrix<f64>, Vec<f64>) {
    let x_min = x[0];
    let x_max = x[x.len() - 1];
    let segments = df - (BS_ORDER - 1);
    let dx = (x_max - x_min) / segments as f64;
    let knots: Vec<f64> = (0..segments + 2 * BS_ORDER - 1)
        .map(|i| x_min + (i as f64 - (BS_ORDER - 1) as f64) * dx)
        .collect();

    let mut basis = DMatrix::zeros(x.len(), df);
    for (row, &xi) in x.iter().enumerate() {
        // the last interval inside the data range is closed on the right
        let segment = (((xi - x_min) / dx).floor() as usize).min(segments - 1);
        let mut b = vec![0.0; knots.len() - 1];
        b[BS_ORDER - 1 + segment] = 1.0;
        for k in 2..=BS_ORDER {
            b = (0..knots.len() - k)
                .map(|j| {
                    let d1 = knots[j + k - 1] - knots[j];
                    let d2 = knots[j + k] - knots[j + 1];
                    let left = if d1 > 0.0 { (xi - knots[j]) / d1 * b[j] } else { 0.0 };
                    let right = if d2 > 0.0 { (knots[j + k] - xi) / d2 * b[j + 1] } else { 0.0 };
                    left + right
                })
                .collect();
        }
        for col in 0..df {
            basis[(row, col)] = b[col];
        }
    }

    let d = difference_matrix(df, 2);
    (basis, d.tr_mul(&d), knots)
}

#[cfg(test)]
mod tests {
    use round::round;

    use super::*;

    fn in_column_space(basis: &DMatrix<f64>, v: &DVector<f64>) -> bool {
        let coef = least_squares_coefficients(basis, v).unwrap();
        (basis * coef - v).norm() < 1e-8
    }

    #[test]
    fn df_bounds() {
        assert!(matches!(
            SplineBasis::build(5, 6, BasisKind::Cr),
            Err(RfError::Configuration(_))
        ));
        assert!(matches!(
            SplineBasis::build(5, 1, BasisKind::Cr),
            Err(RfError::Configuration(_))
        ));
        assert!(matches!(
            SplineBasis::build(10, 3, BasisKind::Bs),
            Err(RfError::Configuration(_))
        ));
        assert!(matches!(
            SplineBasis::build(10, 9, BasisKind::Identity),
            Err(RfError::Configuration(_))
        ));
    }

    #[test]
    fn identity_round_trip_is_exact() {
        let _ = pretty_env_logger::try_init();

        let basis = SplineBasis::build(6, 6, BasisKind::Identity).unwrap();
        let x = DVector::from_vec(vec![0.3, -1.0, 2.0, 0.0, 5.5, 1.0]);
        let coef = basis.project(&x).unwrap();
        assert_eq!(basis.reconstruct(&coef), x);
        assert_eq!(basis.project_rows(&DMatrix::from_row_slice(1, 6, x.as_slice())).row(0), x.transpose());
    }

    #[test]
    fn identity_penalty_is_second_difference() {
        let basis = SplineBasis::build(4, 4, BasisKind::Identity).unwrap();
        let goal = DMatrix::from_row_slice(
            4,
            4,
            &[1.0, -2.0, 1.0, 0.0, -2.0, 5.0, -4.0, 1.0, 1.0, -4.0, 5.0, -2.0, 0.0, 1.0, -2.0, 1.0],
        );
        assert_eq!(basis.penalty(), &goal);
        // single sample axes carry no penalty
        let single = SplineBasis::build(1, 1, BasisKind::Identity).unwrap();
        assert_eq!(single.penalty(), &DMatrix::zeros(1, 1));
    }

    #[test]
    fn cr_is_cardinal_at_knots() {
        let basis = SplineBasis::build(21, 5, BasisKind::Cr).unwrap();
        assert_eq!(basis.knots(), &[0.0, 5.0, 10.0, 15.0, 20.0]);
        for (j, k) in basis.knots().iter().enumerate() {
            let row = basis.basis().row(*k as usize);
            for col in 0..5 {
                let goal = if col == j { 1.0 } else { 0.0 };
                assert_eq!(round(row[col], 9), goal);
            }
        }
    }

    #[test]
    fn cr_with_full_df_is_identity() {
        let basis = SplineBasis::build(7, 7, BasisKind::Cr).unwrap();
        let mut b = basis.basis().clone();
        b.iter_mut().for_each(|v| *v = round(*v, 9));
        assert_eq!(b, DMatrix::identity(7, 7));
    }

    #[test]
    fn cr_reproduces_lines_without_penalty() {
        let basis = SplineBasis::build(30, 6, BasisKind::Cr).unwrap();
        let line = DVector::from_fn(30, |i, _| 0.5 * i as f64 - 3.0);
        assert!(in_column_space(basis.basis(), &line));

        let coef = basis.project(&line).unwrap();
        let roughness = (coef.transpose() * basis.penalty() * &coef)[(0, 0)];
        assert!(roughness.abs() < 1e-9);
    }

    #[test]
    fn bs_partition_of_unity() {
        let basis = SplineBasis::build(25, 8, BasisKind::Bs).unwrap();
        for row in basis.basis().row_iter() {
            assert_eq!(round(row.sum(), 9), 1.0);
        }
        let line = DVector::from_fn(25, |i, _| i as f64);
        assert!(in_column_space(basis.basis(), &line));
    }

    #[test]
    fn projection_is_idempotent() {
        for kind in [BasisKind::Cr, BasisKind::Bs] {
            let basis = SplineBasis::build(40, 9, kind).unwrap();
            let x = DVector::from_fn(40, |i, _| ((i as f64) * 0.7).sin() + 0.1 * i as f64);
            let once = basis.reconstruct(&basis.project(&x).unwrap());
            let twice = basis.reconstruct(&basis.project(&once).unwrap());
            assert!(in_column_space(basis.basis(), &once));
            assert!((once - twice).norm() < 1e-8);
        }
    }

    #[test]
    fn parse_kinds() {
        assert_eq!("cr".parse::<BasisKind>().unwrap(), BasisKind::Cr);
        assert!("cc".parse::<BasisKind>().is_err());
    }
}
