use std::str::FromStr;

use statrs::function::factorial::ln_factorial;

use crate::{Nonlinearity, RfError, RATE_FLOOR};

/// The response distributions a model can be fitted under
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Distribution {
    /// Squared error
    Gaussian,
    /// Spike counts with expected count `rate * dt`
    Poisson,
    /// Binary responses
    Bernoulli,
}

impl Distribution {
    /// Check that the output nonlinearity can only produce valid parameters for this distribution
    pub fn check_output(&self, output: Nonlinearity) -> crate::Result<()> {
        match self {
            Distribution::Gaussian => Ok(()),
            Distribution::Poisson if output.is_nonnegative() => Ok(()),
            Distribution::Bernoulli if output.is_probability() => Ok(()),
            _ => Err(RfError::Configuration(format!(
                "output nonlinearity {:?} does not map into the parameter range of a {:?} response",
                output, self
            ))),
        }
    }

    /// Per-sample negative log likelihood, up to constants
    #[inline]
    pub fn loss(&self, y: f64, r: f64, dt: f64) -> f64 {
        match self {
            Distribution::Gaussian => 0.5 * (y - r).powi(2),
            Distribution::Poisson => r * dt - y * r.max(RATE_FLOOR).ln(),
            Distribution::Bernoulli => {
                let p = clamp_probability(r);
                -(y * p.ln() + (1.0 - y) * (1.0 - p).ln())
            }
        }
    }

    /// Derivative of `loss` with respect to the linear predictor `eta`, where `r = output(eta)`
    #[inline]
    pub fn dloss_deta(&self, y: f64, r: f64, eta: f64, output: Nonlinearity, dt: f64) -> f64 {
        match (self, output) {
            // canonical links collapse to residuals
            (Distribution::Poisson, Nonlinearity::Exponential) => r * dt - y,
            (Distribution::Bernoulli, Nonlinearity::Sigmoid) => r - y,
            _ => self.dloss_drate(y, r, dt) * output.derivative(eta),
        }
    }

    /// Derivative of `loss` with respect to the rate / mean `r`
    #[inline]
    pub fn dloss_drate(&self, y: f64, r: f64, dt: f64) -> f64 {
        match self {
            Distribution::Gaussian => r - y,
            Distribution::Poisson => {
                if r <= RATE_FLOOR {
                    dt
                } else {
                    dt - y / r
                }
            }
            Distribution::Bernoulli => {
                let p = clamp_probability(r);
                (p - y) / (p * (1.0 - p))
            }
        }
    }

    /// Model deviance of `preds` for the observed `ys`
    pub fn deviance(&self, ys: &[f64], preds: &[f64], dt: f64) -> f64 {
        ys.iter()
            .zip(preds)
            .map(|(y, r)| match self {
                Distribution::Gaussian => (y - r).powi(2),
                Distribution::Poisson => {
                    let mu = (r * dt).max(RATE_FLOOR);
                    let ylogy = if *y > 0.0 { y * (y / mu).ln() } else { 0.0 };
                    2.0 * (ylogy - (y - mu))
                }
                Distribution::Bernoulli => 2.0 * self.loss(*y, *r, dt),
            })
            .sum()
    }

    /// Full log likelihood, constants included.
    /// The Gaussian case plugs in the maximum likelihood noise variance.
    pub fn log_likelihood(&self, ys: &[f64], preds: &[f64], dt: f64) -> f64 {
        let n = ys.len() as f64;
        match self {
            Distribution::Gaussian => {
                let rss: f64 = ys.iter().zip(preds).map(|(y, r)| (y - r).powi(2)).sum();
                let var = (rss / n).max(RATE_FLOOR);
                -0.5 * n * ((2.0 * std::f64::consts::PI * var).ln() + 1.0)
            }
            Distribution::Poisson => ys
                .iter()
                .zip(preds)
                .map(|(y, r)| {
                    let mu = (r * dt).max(RATE_FLOOR);
                    y * mu.ln() - mu - ln_factorial(y.round().max(0.0) as u64)
                })
                .sum(),
            Distribution::Bernoulli => -ys.iter().zip(preds).map(|(y, r)| self.loss(*y, *r, dt)).sum::<f64>(),
        }
    }
}

impl FromStr for Distribution {
    type Err = RfError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gaussian" => Ok(Distribution::Gaussian),
            "poisson" => Ok(Distribution::Poisson),
            "bernoulli" | "binomial" => Ok(Distribution::Bernoulli),
            _ => Err(RfError::Configuration(format!("unknown distribution `{}`", s))),
        }
    }
}

#[inline]
fn clamp_probability(p: f64) -> f64 {
    p.clamp(RATE_FLOOR, 1.0 - 1e-15)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_incompatible_output() {
        assert!(Distribution::Poisson.check_output(Nonlinearity::Identity).is_err());
        assert!(Distribution::Poisson.check_output(Nonlinearity::Softplus).is_ok());
        assert!(Distribution::Bernoulli.check_output(Nonlinearity::Exponential).is_err());
        assert!(Distribution::Gaussian.check_output(Nonlinearity::Tanh).is_ok());
    }

    #[test]
    fn dloss_deta_matches_finite_differences() {
        let h = 1e-6;
        let cases = [
            (Distribution::Gaussian, Nonlinearity::Identity, 0.3),
            (Distribution::Gaussian, Nonlinearity::Softplus, 1.2),
            (Distribution::Poisson, Nonlinearity::Exponential, 2.0),
            (Distribution::Poisson, Nonlinearity::Softplus, 3.0),
            (Distribution::Bernoulli, Nonlinearity::Sigmoid, 1.0),
        ];
        for (distr, out, y) in cases {
            for eta in [-1.0, 0.2, 1.5] {
                let f = |e: f64| distr.loss(y, out.apply(e), 0.5);
                let fd = (f(eta + h) - f(eta - h)) / (2.0 * h);
                let an = distr.dloss_deta(y, out.apply(eta), eta, out, 0.5);
                assert!((fd - an).abs() < 1e-5, "{:?}/{:?}: {} vs {}", distr, out, fd, an);
            }
        }
    }

    #[test]
    fn perfect_poisson_fit_has_zero_deviance() {
        let ys = [0.0, 2.0, 5.0];
        let preds = [1e-30, 2.0, 5.0];
        assert!(Distribution::Poisson.deviance(&ys, &preds, 1.0).abs() < 1e-12);
    }

    #[test]
    fn poisson_log_likelihood_matches_pmf() {
        use statrs::distribution::{Discrete, Poisson};

        let ys = [0.0, 1.0, 4.0, 9.0];
        let preds = [0.5, 2.0, 3.0, 12.0];
        let expected: f64 = ys
            .iter()
            .zip(&preds)
            .map(|(y, r)| Poisson::new(r * 0.5).unwrap().ln_pmf(*y as u64))
            .sum();
        let ll = Distribution::Poisson.log_likelihood(&ys, &preds, 0.5);
        assert!((ll - expected).abs() < 1e-9, "{} vs {}", ll, expected);
    }
}
