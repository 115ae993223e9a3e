//! Prediction quality metrics

use std::str::FromStr;

use crate::RfError;

/// The metrics a model prediction can be scored with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    /// Pearson correlation
    Corrcoef,
    /// Mean squared error
    Mse,
    /// Coefficient of determination
    R2,
    /// R2 adjusted for the effective degrees of freedom
    R2Adj,
    /// Generalized cross validation score
    Gcv,
}

impl Metric {
    /// Score `y_pred` against `y`, `edf` being the effective degrees of freedom of the model
    pub fn compute(&self, y: &[f64], y_pred: &[f64], edf: f64) -> f64 {
        match self {
            Metric::Corrcoef => corrcoef(y, y_pred),
            Metric::Mse => mse(y, y_pred),
            Metric::R2 => r2(y, y_pred),
            Metric::R2Adj => r2adj(y, y_pred, edf),
            Metric::Gcv => gcv(y, y_pred, edf),
        }
    }

    /// Whether larger values indicate a better fit
    pub fn higher_is_better(&self) -> bool {
        !matches!(self, Metric::Mse | Metric::Gcv)
    }
}

impl FromStr for Metric {
    type Err = RfError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "corrcoef" => Ok(Metric::Corrcoef),
            "mse" => Ok(Metric::Mse),
            "r2" => Ok(Metric::R2),
            "r2adj" => Ok(Metric::R2Adj),
            "gcv" => Ok(Metric::Gcv),
            _ => Err(RfError::Configuration(format!("unknown metric `{}`", s))),
        }
    }
}

fn mean(v: &[f64]) -> f64 {
    v.iter().sum::<f64>() / v.len() as f64
}

/// Pearson correlation coefficient, 0 if either input is constant
pub fn corrcoef(a: &[f64], b: &[f64]) -> f64 {
    let (ma, mb) = (mean(a), mean(b));
    let mut cov = 0.0;
    let mut va = 0.0;
    let mut vb = 0.0;
    for (x, y) in a.iter().zip(b) {
        cov += (x - ma) * (y - mb);
        va += (x - ma).powi(2);
        vb += (y - mb).powi(2);
    }
    if va == 0.0 || vb == 0.0 {
        return 0.0;
    }
    cov / (va * vb).sqrt()
}

/// Mean squared error
pub fn mse(y: &[f64], y_pred: &[f64]) -> f64 {
    y.iter().zip(y_pred).map(|(a, b)| (a - b).powi(2)).sum::<f64>() / y.len() as f64
}

/// Coefficient of determination
pub fn r2(y: &[f64], y_pred: &[f64]) -> f64 {
    let m = mean(y);
    let ss_res: f64 = y.iter().zip(y_pred).map(|(a, b)| (a - b).powi(2)).sum();
    let ss_tot: f64 = y.iter().map(|a| (a - m).powi(2)).sum();
    1.0 - ss_res / ss_tot
}

/// R2 adjusted for `p` effective parameters
pub fn r2adj(y: &[f64], y_pred: &[f64], p: f64) -> f64 {
    let n = y.len() as f64;
    1.0 - (1.0 - r2(y, y_pred)) * (n - 1.0) / (n - p - 1.0)
}

/// Generalized cross validation score `n * RSS / (n - edf)^2`
pub fn gcv(y: &[f64], y_pred: &[f64], edf: f64) -> f64 {
    let n = y.len() as f64;
    let denom = n - edf;
    if denom <= 1.0 {
        return f64::INFINITY;
    }
    let rss: f64 = y.iter().zip(y_pred).map(|(a, b)| (a - b).powi(2)).sum();
    n * rss / (denom * denom)
}

#[cfg(test)]
mod tests {
    use round::round;

    use super::*;

    #[test]
    fn perfect_prediction() {
        let y = [1.0, 2.0, 4.0, 3.0];
        assert_eq!(round(corrcoef(&y, &y), 9), 1.0);
        assert_eq!(mse(&y, &y), 0.0);
        assert_eq!(r2(&y, &y), 1.0);
        assert_eq!(gcv(&y, &y, 1.0), 0.0);
    }

    #[test]
    fn anticorrelated() {
        let y = [1.0, 2.0, 3.0];
        let y_pred = [3.0, 2.0, 1.0];
        assert_eq!(round(corrcoef(&y, &y_pred), 9), -1.0);
        assert_eq!(round(mse(&y, &y_pred), 9), round(8.0 / 3.0, 9));
    }

    #[test]
    fn constant_prediction_has_zero_correlation() {
        assert_eq!(corrcoef(&[1.0, 2.0], &[0.5, 0.5]), 0.0);
    }

    #[test]
    fn metric_direction() {
        assert!(Metric::Corrcoef.higher_is_better());
        assert!(!"mse".parse::<Metric>().unwrap().higher_is_better());
    }
}
