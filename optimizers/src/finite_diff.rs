//! Finite-difference gradients for objectives without closed-form derivatives

use std::cell::RefCell;

use common::{Result, RfError};
use finitediff::FiniteDiff;
use nalgebra::DVector;

/// Central-difference gradient of `f` at `params`.
///
/// `f` may fail; the first error it raises is returned instead of a gradient.
pub fn central_gradient<F>(f: F, params: &DVector<f64>) -> Result<DVector<f64>>
where
    F: Fn(&DVector<f64>) -> Result<f64>,
{
    let failure: RefCell<Option<RfError>> = RefCell::new(None);
    let cost = |x: &Vec<f64>| -> f64 {
        match f(&DVector::from_column_slice(x)) {
            Ok(value) => value,
            Err(e) => {
                let mut slot = failure.borrow_mut();
                if slot.is_none() {
                    *slot = Some(e);
                }
                f64::NAN
            }
        }
    };
    let gradient = params.as_slice().to_vec().central_diff(&cost);
    if let Some(err) = failure.take() {
        return Err(err);
    }
    if let Some(i) = gradient.iter().position(|g| !g.is_finite()) {
        return Err(RfError::numerical(format!(
            "finite-difference gradient is not finite in coordinate {}",
            i
        )));
    }
    Ok(DVector::from_vec(gradient))
}
