//! Generalized linear receptive field models fitted by gradient descent on a
//! smoothness-penalized likelihood

#[macro_use]
extern crate log;

mod config;
mod likelihood;
mod model;
mod predict;

pub use config::{FitConfig, InitMethod, ModelConfig, Pooling, ReturnModel};
pub use likelihood::Layout;
pub use model::{FitHistory, GLM};
pub use predict::{Filter, Scores};
