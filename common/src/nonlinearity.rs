use std::str::FromStr;

use crate::RfError;

/// The possible nonlinearities applied to filter outputs and to the pooled model output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Nonlinearity {
    /// The identity function
    Identity,
    /// ln(1 + e^x), shifted up by a tiny constant so rates never hit zero
    Softplus,
    /// e^x
    Exponential,
    /// The logistic function
    Sigmoid,
    /// The hyperbolic tangent
    Tanh,
    /// The rectified linear unit, floored at a tiny positive value
    Relu,
    /// Rectifier with a slope of 0.01 for negative inputs
    LeakyRelu,
}

const SOFTPLUS_OFFSET: f64 = 1e-7;
const RELU_FLOOR: f64 = 1e-7;
const LEAKY_SLOPE: f64 = 0.01;

impl Nonlinearity {
    /// Apply the nonlinearity to a single value
    #[inline]
    pub fn apply(&self, x: f64) -> f64 {
        match self {
            Nonlinearity::Identity => x,
            Nonlinearity::Softplus => softplus(x) + SOFTPLUS_OFFSET,
            Nonlinearity::Exponential => x.exp(),
            Nonlinearity::Sigmoid => sigmoid(x),
            Nonlinearity::Tanh => x.tanh(),
            Nonlinearity::Relu => {
                if x > 0.0 {
                    x
                } else {
                    RELU_FLOOR
                }
            }
            Nonlinearity::LeakyRelu => {
                if x > 0.0 {
                    x
                } else {
                    x * LEAKY_SLOPE
                }
            }
        }
    }

    /// First derivative at `x`
    #[inline]
    pub fn derivative(&self, x: f64) -> f64 {
        match self {
            Nonlinearity::Identity => 1.0,
            Nonlinearity::Softplus => sigmoid(x),
            Nonlinearity::Exponential => x.exp(),
            Nonlinearity::Sigmoid => {
                let s = sigmoid(x);
                s * (1.0 - s)
            }
            Nonlinearity::Tanh => 1.0 - x.tanh().powi(2),
            Nonlinearity::Relu => {
                if x > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            Nonlinearity::LeakyRelu => {
                if x > 0.0 {
                    1.0
                } else {
                    LEAKY_SLOPE
                }
            }
        }
    }

    /// A preimage of `y`, clamped into the range of the nonlinearity
    pub fn inverse(&self, y: f64) -> f64 {
        match self {
            Nonlinearity::Identity => y,
            Nonlinearity::Softplus => {
                let y = (y - SOFTPLUS_OFFSET).max(1e-6);
                // ln(e^y - 1)
                y + (-(-y).exp_m1()).ln()
            }
            Nonlinearity::Exponential => y.max(1e-12).ln(),
            Nonlinearity::Sigmoid => {
                let p = y.clamp(1e-6, 1.0 - 1e-6);
                (p / (1.0 - p)).ln()
            }
            Nonlinearity::Tanh => y.clamp(-0.999, 0.999).atanh(),
            Nonlinearity::Relu => y.max(RELU_FLOOR),
            Nonlinearity::LeakyRelu => {
                if y > 0.0 {
                    y
                } else {
                    y / LEAKY_SLOPE
                }
            }
        }
    }

    /// Perform the nonlinearity over all elements
    pub fn activate(&self, vals: &mut [f64]) {
        if let Nonlinearity::Identity = self {
            return;
        }
        for v in vals {
            *v = self.apply(*v);
        }
    }

    /// Whether every output is >= 0, as required for Poisson rates
    pub fn is_nonnegative(&self) -> bool {
        matches!(
            self,
            Nonlinearity::Softplus | Nonlinearity::Exponential | Nonlinearity::Sigmoid | Nonlinearity::Relu
        )
    }

    /// Whether every output lies in (0, 1), as required for Bernoulli probabilities
    pub fn is_probability(&self) -> bool {
        matches!(self, Nonlinearity::Sigmoid)
    }
}

impl FromStr for Nonlinearity {
    type Err = RfError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" | "identity" => Ok(Nonlinearity::Identity),
            "softplus" => Ok(Nonlinearity::Softplus),
            "exponential" | "exp" => Ok(Nonlinearity::Exponential),
            "sigmoid" => Ok(Nonlinearity::Sigmoid),
            "tanh" => Ok(Nonlinearity::Tanh),
            "relu" => Ok(Nonlinearity::Relu),
            "leaky_relu" => Ok(Nonlinearity::LeakyRelu),
            _ => Err(RfError::Configuration(format!("unknown nonlinearity `{}`", s))),
        }
    }
}

#[inline]
fn softplus(x: f64) -> f64 {
    // ln(1 + e^x) without overflow for large x
    x.max(0.0) + (-x.abs()).exp().ln_1p()
}

#[inline]
fn sigmoid(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

#[cfg(test)]
mod tests {
    use round::round;

    use super::*;

    const ALL: [Nonlinearity; 7] = [
        Nonlinearity::Identity,
        Nonlinearity::Softplus,
        Nonlinearity::Exponential,
        Nonlinearity::Sigmoid,
        Nonlinearity::Tanh,
        Nonlinearity::Relu,
        Nonlinearity::LeakyRelu,
    ];

    #[test]
    fn derivatives_match_finite_differences() {
        let h = 1e-6;
        for nl in ALL {
            for x in [-3.0, -0.7, 0.4, 2.5] {
                let fd = (nl.apply(x + h) - nl.apply(x - h)) / (2.0 * h);
                assert!(
                    (fd - nl.derivative(x)).abs() < 1e-5,
                    "{:?} at {}: fd {} vs {}",
                    nl,
                    x,
                    fd,
                    nl.derivative(x)
                );
            }
        }
    }

    #[test]
    fn softplus_is_stable_for_large_inputs() {
        assert!(Nonlinearity::Softplus.apply(800.0).is_finite());
        assert_eq!(round(Nonlinearity::Softplus.apply(0.0), 6), round(2f64.ln(), 6));
        assert!(Nonlinearity::Softplus.apply(-800.0) > 0.0);
    }

    #[test]
    fn ranges() {
        for nl in ALL.iter().filter(|nl| nl.is_nonnegative()) {
            for x in [-50.0, -1.0, 0.0, 1.0, 10.0] {
                assert!(nl.apply(x) >= 0.0);
            }
        }
        assert!(Nonlinearity::Sigmoid.is_probability());
        assert!(!Nonlinearity::Exponential.is_probability());
    }

    #[test]
    fn activate_in_place() {
        let mut vals = [-1.0, 2.0];
        Nonlinearity::LeakyRelu.activate(&mut vals);
        assert_eq!(vals, [-0.01, 2.0]);
    }

    #[test]
    fn inverse_round_trips_inside_the_range() {
        for nl in ALL {
            for x in [-1.5, 0.3, 2.0] {
                if nl == Nonlinearity::Relu && x <= 0.0 {
                    continue;
                }
                let back = nl.apply(nl.inverse(nl.apply(x)));
                assert!((back - nl.apply(x)).abs() < 1e-6, "{:?} at {}", nl, x);
            }
        }
    }

    #[test]
    fn parse_kinds() {
        assert_eq!("softplus".parse::<Nonlinearity>().unwrap(), Nonlinearity::Softplus);
        assert!(matches!("softmax".parse::<Nonlinearity>(), Err(RfError::Configuration(_))));
    }
}
