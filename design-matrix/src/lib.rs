#[macro_use]
extern crate log;

use common::{Nonlinearity, Result, RfError};
use nalgebra::DMatrix;
use spline_basis::BasisKind;

mod builder;

pub use builder::{Channel, DesignMatrixBuilder};

/// Name of the split used for fitting
pub const TRAIN: &str = "train";
/// Name of the validation split
pub const DEV: &str = "dev";

/// Configuration of one named input channel
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelSpec {
    /// Filter shape, time lags first, then any spatial axes
    pub dims: Vec<usize>,
    /// Basis functions per axis, `None` for no reduction
    pub df: Option<Vec<usize>>,
    /// Basis kind used on reduced axes
    pub smooth: BasisKind,
    /// Number of samples the predictor is delayed relative to the response
    pub shift: usize,
    /// Per-axis smoothness weights of the roughness penalty
    pub lam: Vec<f64>,
    /// Whether the first axis is built from time lags of the array.
    /// Instantaneous channels take each row of the array as it is.
    pub lag: bool,
    /// Leading samples to drop instead of the full history; missing history is zero-padded
    pub burn_in: Option<usize>,
    /// Applied to the channel's filter output before pooling
    pub filter_nonlinearity: Nonlinearity,
}

impl Default for ChannelSpec {
    fn default() -> Self {
        Self {
            dims: vec![1],
            df: None,
            smooth: BasisKind::Cr,
            shift: 0,
            lam: vec![],
            lag: true,
            burn_in: None,
            filter_nonlinearity: Nonlinearity::Identity,
        }
    }
}

impl ChannelSpec {
    /// A channel with the given filter shape and no basis reduction
    pub fn new(dims: Vec<usize>) -> Self {
        Self {
            dims,
            ..Default::default()
        }
    }

    /// Number of time lags in the filter
    #[inline(always)]
    pub fn history_len(&self) -> usize {
        self.dims[0]
    }

    /// Number of values per time sample, i.e. the product of the spatial axes
    #[inline(always)]
    pub fn pixels(&self) -> usize {
        self.dims[1..].iter().product()
    }

    /// Number of columns the raw array must have
    #[inline(always)]
    pub fn width(&self) -> usize {
        if self.lag {
            self.pixels()
        } else {
            self.dims.iter().product()
        }
    }

    /// Leading response samples dropped for this channel.
    /// Lagged channels default to the samples lacking a full history, instantaneous ones to none.
    pub fn burn_in(&self) -> usize {
        match self.burn_in {
            Some(burn_in) => burn_in,
            None if self.lag => self.shift + self.history_len() - 1,
            None => 0,
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.dims.is_empty() || self.dims.iter().any(|d| *d == 0) {
            return Err(RfError::Configuration(format!(
                "filter dims must be non-empty and positive, got {:?}",
                self.dims
            )));
        }
        if !self.lag && self.shift != 0 {
            return Err(RfError::Configuration(format!(
                "an instantaneous channel cannot be shifted, got shift {}",
                self.shift
            )));
        }
        Ok(())
    }
}

/// The columns of one channel inside a design matrix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnBlock {
    /// Channel name
    pub name: String,
    /// First column of the channel
    pub start: usize,
    /// Number of coefficient columns
    pub len: usize,
}

impl ColumnBlock {
    /// The column range of the channel
    #[inline(always)]
    pub fn range(&self) -> std::ops::Range<usize> {
        self.start..self.start + self.len
    }
}

/// Predictor matrix of one split: every channel's lagged, basis-projected columns side by side
#[derive(Debug, Clone)]
pub struct DesignMatrix {
    /// Split the matrix was built for
    pub split: String,
    /// One row per retained response sample
    pub matrix: DMatrix<f64>,
    /// Column blocks in registration order
    pub blocks: Vec<ColumnBlock>,
    /// Leading samples dropped from the response
    pub burn_in: usize,
    /// Number of samples in the raw channel arrays
    pub n_samples: usize,
}

impl DesignMatrix {
    /// Number of rows
    #[inline(always)]
    pub fn nrows(&self) -> usize {
        self.matrix.nrows()
    }

    /// Number of coefficient columns
    #[inline(always)]
    pub fn ncols(&self) -> usize {
        self.matrix.ncols()
    }

    /// The column block of a channel
    pub fn block(&self, name: &str) -> Option<&ColumnBlock> {
        self.blocks.iter().find(|b| b.name == name)
    }

    /// Drop the burn-in samples from a raw response so its rows align with the design matrix
    pub fn trim_response(&self, y: &[f64]) -> Result<Vec<f64>> {
        if y.len() != self.n_samples {
            return Err(RfError::Configuration(format!(
                "response of split `{}` has {} samples, the channel arrays have {}",
                self.split,
                y.len(),
                self.n_samples
            )));
        }
        Ok(y[self.burn_in..].to_vec())
    }
}
