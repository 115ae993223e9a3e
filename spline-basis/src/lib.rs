#[macro_use]
extern crate log;

use std::str::FromStr;

use common::RfError;

mod spline;
mod tensor;

pub use spline::SplineBasis;
pub use tensor::TensorBasis;

/// The kinds of smoothing bases a filter axis can be expressed in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BasisKind {
    /// No reduction, the basis is the identity
    Identity,
    /// Cubic regression spline, cardinal at knots placed at quantiles of the axis
    Cr,
    /// Cubic B-spline with equally spaced knots and a difference penalty
    Bs,
}

impl FromStr for BasisKind {
    type Err = RfError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" | "identity" => Ok(BasisKind::Identity),
            "cr" => Ok(BasisKind::Cr),
            "bs" => Ok(BasisKind::Bs),
            _ => Err(RfError::Configuration(format!("unknown basis kind `{}`", s))),
        }
    }
}
