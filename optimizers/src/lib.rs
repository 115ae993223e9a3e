//! Optimization primitives shared by the evidence and likelihood fits

#[macro_use]
extern crate log;

use common::Result;
use nalgebra::DVector;

mod adam;
mod lbfgs;
pub mod finite_diff;
pub mod random_search;

pub use adam::Adam;
pub use lbfgs::{Lbfgs, LineSearch, Minimum, DEFAULT_LBFGS_MEM};
pub use random_search::RandomSearch;

/// A scalar cost over a parameter vector, to be minimized.
///
/// This is the gradient capability the optimizers consume: implementors with closed-form
/// derivatives override `value_and_gradient`, everybody else gets central differences.
pub trait Objective {
    /// Dimensionality of the parameter vector
    fn dim(&self) -> usize;

    /// Evaluate the cost
    fn value(&self, params: &DVector<f64>) -> Result<f64>;

    /// Evaluate the cost and its gradient
    fn value_and_gradient(&self, params: &DVector<f64>) -> Result<(f64, DVector<f64>)> {
        let value = self.value(params)?;
        let gradient = finite_diff::central_gradient(|p| self.value(p), params)?;
        Ok((value, gradient))
    }
}
