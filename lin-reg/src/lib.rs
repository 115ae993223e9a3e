//! Linear regression with quadratic penalties, and the evidence machinery that picks
//! the penalty from the data

#[macro_use]
extern crate log;

use common::Result;
use nalgebra::DMatrix;

pub mod evidence;
mod evidence_model;
mod evidence_optimizer;
mod prior;
mod tikhonov_regularization;

pub use evidence::{log_evidence, Evidence, SufficientStats};
pub use evidence_model::EvidenceModel;
pub use evidence_optimizer::{EvidenceConfig, EvidenceFit, EvidenceObjective, EvidenceOptimizer};
pub use prior::{PriorCovariance, PriorFamily};
pub use tikhonov_regularization::TikhonovRegularization;

/// Generic way of performing linear regression and fitting the weights
pub trait LinReg: Clone {
    /// Fit a weight matrix, mapping inputs to targets
    ///
    /// # Parameters
    /// design: Input data, one row per sample
    /// targets: Target data having O columns as the output dimensionality
    fn fit_readout(&self, design: &DMatrix<f64>, targets: &DMatrix<f64>) -> Result<DMatrix<f64>>;
}
