//! This crate provides common funcionality shared by the receptive field estimators

#![warn(missing_docs)]

mod distribution;
mod error;
pub mod metrics;
mod nonlinearity;
pub mod sampling;

pub use distribution::Distribution;
pub use error::{ConvergenceStatus, Result, RfError};
pub use metrics::Metric;
pub use nonlinearity::Nonlinearity;

/// Lower bound applied to rates and probabilities before taking logarithms
pub const RATE_FLOOR: f64 = 1e-20;
