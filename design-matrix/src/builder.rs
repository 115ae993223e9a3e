use std::collections::BTreeMap;

use common::{Result, RfError};
use nalgebra::{DMatrix, DVector};
use spline_basis::TensorBasis;

use crate::{ChannelSpec, ColumnBlock, DesignMatrix};

/// A registered channel together with its basis
#[derive(Debug, Clone)]
pub struct Channel {
    name: String,
    spec: ChannelSpec,
    basis: TensorBasis,
}

impl Channel {
    /// The channel name
    #[inline(always)]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The channel configuration
    #[inline(always)]
    pub fn spec(&self) -> &ChannelSpec {
        &self.spec
    }

    /// The basis the channel's filter is expressed in
    #[inline(always)]
    pub fn basis(&self) -> &TensorBasis {
        &self.basis
    }

    /// Number of coefficients of the channel's filter
    #[inline(always)]
    pub fn n_coef(&self) -> usize {
        self.basis.n_coef()
    }
}

/// Turns raw stimulus, history and coupling arrays into design matrices.
///
/// Channels are kept in registration order, which fixes the column order of every split.
#[derive(Debug, Clone, Default)]
pub struct DesignMatrixBuilder {
    channels: Vec<Channel>,
    splits: BTreeMap<String, BTreeMap<String, DMatrix<f64>>>,
}

impl DesignMatrixBuilder {
    /// Create an empty builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Add the raw array of a channel to a split, registering the channel on first use
    ///
    /// # Arguments:
    /// split: Name of the split, e.g. "train" or "dev"
    /// name: Channel name, unique within a split and configured identically across splits
    /// array: `T x prod(dims[1..])` matrix, one row per time sample
    /// spec: The channel configuration
    pub fn add(&mut self, split: &str, name: &str, array: DMatrix<f64>, spec: ChannelSpec) -> Result<()> {
        match self.channel(name) {
            Some(channel) => {
                if channel.spec != spec {
                    return Err(RfError::Configuration(format!(
                        "channel `{}` was registered as {:?}, got {:?}",
                        name, channel.spec, spec
                    )));
                }
                self.insert(split, name, array)
            }
            None => {
                spec.validate()?;
                let basis = TensorBasis::build(&spec.dims, spec.df.as_deref(), spec.smooth, &spec.lam)?;
                check_columns(name, &spec, &array)?;
                self.insert(split, name, array)?;
                debug!("registered channel `{}` with {} coefficients", name, basis.n_coef());
                self.channels.push(Channel {
                    name: name.to_string(),
                    spec,
                    basis,
                });
                Ok(())
            }
        }
    }

    /// Add the raw array of an already registered channel to another split
    pub fn add_split(&mut self, split: &str, name: &str, array: DMatrix<f64>) -> Result<()> {
        if self.channel(name).is_none() {
            return Err(RfError::Configuration(format!("channel `{}` is not registered", name)));
        }
        self.insert(split, name, array)
    }

    fn insert(&mut self, split: &str, name: &str, array: DMatrix<f64>) -> Result<()> {
        if let Some(channel) = self.channel(name) {
            check_columns(name, &channel.spec, &array)?;
        }
        let arrays = self.splits.entry(split.to_string()).or_default();
        if arrays.contains_key(name) {
            return Err(RfError::Configuration(format!(
                "channel `{}` was already added to split `{}`",
                name, split
            )));
        }
        arrays.insert(name.to_string(), array);
        Ok(())
    }

    /// The registered channels in column order
    #[inline(always)]
    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    /// Look up a channel by name
    pub fn channel(&self, name: &str) -> Option<&Channel> {
        self.channels.iter().find(|c| c.name == name)
    }

    /// Whether any array was added to the split
    pub fn has_split(&self, split: &str) -> bool {
        self.splits.contains_key(split)
    }

    /// Number of raw samples of a split
    pub fn n_samples(&self, split: &str) -> Option<usize> {
        self.splits.get(split).and_then(|a| a.values().next()).map(|a| a.nrows())
    }

    /// Rows dropped from the start of every split so each channel has a full history
    pub fn burn_in(&self) -> usize {
        self.channels.iter().map(|c| c.spec.burn_in()).max().unwrap_or(0)
    }

    /// Total number of coefficients across channels
    pub fn n_coef(&self) -> usize {
        self.channels.iter().map(|c| c.n_coef()).sum()
    }

    /// Block diagonal roughness penalty over all channel coefficients
    pub fn penalty(&self) -> DMatrix<f64> {
        let n = self.n_coef();
        let mut penalty = DMatrix::zeros(n, n);
        let mut start = 0;
        for c in &self.channels {
            let k = c.n_coef();
            penalty.view_mut((start, start), (k, k)).copy_from(c.basis.penalty());
            start += k;
        }
        penalty
    }

    /// Build the design matrix of a split
    pub fn build(&self, split: &str) -> Result<DesignMatrix> {
        let arrays = self
            .splits
            .get(split)
            .ok_or_else(|| RfError::Validation(format!("split `{}` has no channels", split)))?;
        if self.channels.is_empty() {
            return Err(RfError::Configuration("no channels registered".to_string()));
        }

        let mut n_samples = None;
        for c in &self.channels {
            let array = arrays.get(&c.name).ok_or_else(|| {
                RfError::Configuration(format!("channel `{}` is missing from split `{}`", c.name, split))
            })?;
            match n_samples {
                None => n_samples = Some(array.nrows()),
                Some(n) if n != array.nrows() => {
                    return Err(RfError::Configuration(format!(
                        "channel `{}` has {} samples in split `{}`, expected {}",
                        c.name,
                        array.nrows(),
                        split,
                        n
                    )))
                }
                _ => {}
            }
        }
        let n_samples = n_samples.unwrap_or(0);
        let burn_in = self.burn_in();
        if n_samples <= burn_in {
            return Err(RfError::Configuration(format!(
                "split `{}` has {} samples, not more than the burn-in of {}",
                split, n_samples, burn_in
            )));
        }
        let n_rows = n_samples - burn_in;

        let mut matrix = DMatrix::zeros(n_rows, self.n_coef());
        let mut blocks = Vec::with_capacity(self.channels.len());
        let mut start = 0;
        for c in &self.channels {
            let lagged = construct_lagged(&arrays[&c.name], &c.spec, burn_in);
            let projected = c.basis.project_rows(&lagged);
            matrix.view_mut((0, start), (n_rows, c.n_coef())).copy_from(&projected);
            blocks.push(ColumnBlock {
                name: c.name.clone(),
                start,
                len: c.n_coef(),
            });
            start += c.n_coef();
        }
        debug!(
            "design matrix of split `{}`: dims of matrix: ({}, {}), burn_in: {}",
            split,
            matrix.nrows(),
            matrix.ncols(),
            burn_in
        );

        Ok(DesignMatrix {
            split: split.to_string(),
            matrix,
            blocks,
            burn_in,
            n_samples,
        })
    }

    /// Effective degrees of freedom of each channel, `tr((X^T X + beta P)^-1 X^T X)` restricted
    /// to the channel's columns. Falls back to the coefficient count when the system is singular.
    pub fn effective_df(&self, design: &DesignMatrix, beta: f64) -> Vec<f64> {
        let xtx = design.matrix.tr_mul(&design.matrix);
        let system = &xtx + self.penalty() * beta;
        match system.cholesky() {
            Some(chol) => {
                let hat = chol.solve(&xtx);
                design
                    .blocks
                    .iter()
                    .map(|b| b.range().map(|i| hat[(i, i)]).sum())
                    .collect()
            }
            None => {
                warn!("singular penalized gram matrix, reporting coefficient counts as edf");
                design.blocks.iter().map(|b| b.len as f64).collect()
            }
        }
    }

    /// Reconstruct a channel's filter from its slice of a coefficient vector
    pub fn reconstruct(&self, name: &str, coef: &DVector<f64>) -> Result<DVector<f64>> {
        let channel = self
            .channel(name)
            .ok_or_else(|| RfError::Configuration(format!("channel `{}` is not registered", name)))?;
        if coef.len() != channel.n_coef() {
            return Err(RfError::Configuration(format!(
                "channel `{}` has {} coefficients, got {}",
                name,
                channel.n_coef(),
                coef.len()
            )));
        }
        Ok(channel.basis.reconstruct(coef))
    }
}

fn check_columns(name: &str, spec: &ChannelSpec, array: &DMatrix<f64>) -> Result<()> {
    if array.ncols() != spec.width() {
        return Err(RfError::Configuration(format!(
            "channel `{}` expects {} values per sample, the array has {} columns",
            name,
            spec.width(),
            array.ncols()
        )));
    }
    Ok(())
}

/// Construct the lagged predictor columns of one channel
///
/// Row `r` corresponds to response time `t = r + burn_in` and holds the samples
/// `t - shift - n + 1 ..= t - shift` (oldest first), each contributing all of its pixels.
/// Samples before the start of the array are zero.
/// Instantaneous channels copy row `t` of the array.
fn construct_lagged(array: &DMatrix<f64>, spec: &ChannelSpec, burn_in: usize) -> DMatrix<f64> {
    let n_rows = array.nrows() - burn_in;
    if !spec.lag {
        return array.rows(burn_in, n_rows).into_owned();
    }
    let n_lags = spec.history_len();
    let pixels = spec.pixels();

    DMatrix::from_fn(n_rows, n_lags * pixels, |r, col| {
        let lag = col / pixels;
        let pixel = col % pixels;
        let t = r + burn_in + lag;
        match t.checked_sub(spec.shift + n_lags - 1) {
            Some(i) => array[(i, pixel)],
            None => 0.0,
        }
    })
}
