use common::{Distribution, Nonlinearity, Result, RfError};
use nalgebra::{DMatrix, DVector};
use optimizers::Objective;

use crate::Pooling;

/// How the parameter vector is laid out: every subunit's coefficients, one intercept
/// per subunit and channel, the global intercept, then the optional rate scale
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    /// Coefficients per subunit
    pub n_coef: usize,
    /// Number of subunits
    pub num_subunits: usize,
    /// Number of channels
    pub n_channels: usize,
    /// Whether the rate is multiplied by a fitted scale
    pub rate_scale: bool,
}

impl Layout {
    /// Total number of parameters
    #[inline(always)]
    pub fn len(&self) -> usize {
        self.global_intercept() + 1 + usize::from(self.rate_scale)
    }

    /// Index of the first coefficient of subunit `s`
    #[inline(always)]
    pub fn weights_start(&self, s: usize) -> usize {
        s * self.n_coef
    }

    /// Index of the intercept of channel `c` in subunit `s`
    #[inline(always)]
    pub fn intercept(&self, s: usize, c: usize) -> usize {
        self.num_subunits * self.n_coef + s * self.n_channels + c
    }

    /// Index of the global intercept
    #[inline(always)]
    pub fn global_intercept(&self) -> usize {
        self.num_subunits * (self.n_coef + self.n_channels)
    }

    /// Index of the rate scale, if fitted
    #[inline(always)]
    pub fn rate_scale(&self) -> Option<usize> {
        self.rate_scale.then(|| self.global_intercept() + 1)
    }
}

/// Columns and filter nonlinearity of one channel
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct ChannelBlock {
    pub(crate) start: usize,
    pub(crate) len: usize,
    pub(crate) nonlinearity: Nonlinearity,
}

/// Intermediate values of one forward pass
pub(crate) struct Forward {
    /// Filter outputs before the filter nonlinearity, indexed by `s * n_channels + c`
    pub(crate) activations: Vec<DVector<f64>>,
    /// Linear predictor fed to the output nonlinearity
    pub(crate) eta: DVector<f64>,
    /// Output nonlinearity of `eta`, before the rate scale
    pub(crate) output: DVector<f64>,
    /// Predicted rate / mean
    pub(crate) rate: DVector<f64>,
    /// Rate scale in effect, 1 when not fitted
    pub(crate) scale: f64,
}

/// The shared pieces of the generative model
#[derive(Debug, Clone)]
pub(crate) struct Link {
    pub(crate) layout: Layout,
    pub(crate) blocks: Vec<ChannelBlock>,
    pub(crate) distribution: Distribution,
    pub(crate) output_nonlinearity: Nonlinearity,
    pub(crate) pooling: Pooling,
    pub(crate) dt: f64,
}

impl Link {
    /// Weight of each subunit in the pooled output
    #[inline(always)]
    pub(crate) fn pool_weight(&self) -> f64 {
        match self.pooling {
            Pooling::Sum => 1.0,
            Pooling::Mean => 1.0 / self.layout.num_subunits as f64,
        }
    }

    /// Whether the rate is affine in the coefficients
    pub(crate) fn is_linear(&self) -> bool {
        self.output_nonlinearity == Nonlinearity::Identity
            && !self.layout.rate_scale
            && self.blocks.iter().all(|b| b.nonlinearity == Nonlinearity::Identity)
    }

    pub(crate) fn forward(&self, x: &DMatrix<f64>, params: &DVector<f64>) -> Forward {
        let layout = self.layout;
        let pool = self.pool_weight();
        let mut eta = DVector::from_element(x.nrows(), params[layout.global_intercept()]);
        let mut activations = Vec::with_capacity(layout.num_subunits * self.blocks.len());
        for s in 0..layout.num_subunits {
            for (c, block) in self.blocks.iter().enumerate() {
                let w = params.rows(layout.weights_start(s) + block.start, block.len);
                let mut a = x.columns(block.start, block.len) * w;
                a.add_scalar_mut(params[layout.intercept(s, c)]);
                let mut out = a.clone();
                block.nonlinearity.activate(out.as_mut_slice());
                eta.axpy(pool, &out, 1.0);
                activations.push(a);
            }
        }
        let mut output = eta.clone();
        self.output_nonlinearity.activate(output.as_mut_slice());
        let scale = layout.rate_scale().map_or(1.0, |i| params[i]);
        let rate = &output * scale;
        Forward {
            activations,
            eta,
            output,
            rate,
            scale,
        }
    }

    /// Expected response per bin: `rate * dt` for counts, the rate itself otherwise
    pub(crate) fn expected(&self, rate: &DVector<f64>) -> DVector<f64> {
        match self.distribution {
            Distribution::Poisson => rate * self.dt,
            _ => rate.clone(),
        }
    }

    /// Summed distribution loss of a forward pass
    pub(crate) fn loss(&self, y: &[f64], forward: &Forward) -> f64 {
        y.iter()
            .zip(forward.rate.iter())
            .map(|(y, r)| self.distribution.loss(*y, *r, self.dt))
            .sum()
    }

    /// Gradient of the summed loss w.r.t. every parameter
    pub(crate) fn loss_gradient(&self, x: &DMatrix<f64>, y: &[f64], forward: &Forward) -> DVector<f64> {
        let layout = self.layout;
        let pool = self.pool_weight();
        let mut grad = DVector::zeros(layout.len());

        let dloss_deta = match layout.rate_scale() {
            Some(i) => {
                let dloss_drate = DVector::from_fn(y.len(), |t, _| {
                    self.distribution.dloss_drate(y[t], forward.rate[t], self.dt)
                });
                grad[i] = dloss_drate.dot(&forward.output);
                DVector::from_fn(y.len(), |t, _| {
                    dloss_drate[t] * forward.scale * self.output_nonlinearity.derivative(forward.eta[t])
                })
            }
            None => DVector::from_fn(y.len(), |t, _| {
                self.distribution.dloss_deta(
                    y[t],
                    forward.rate[t],
                    forward.eta[t],
                    self.output_nonlinearity,
                    self.dt,
                )
            }),
        };

        for s in 0..layout.num_subunits {
            for (c, block) in self.blocks.iter().enumerate() {
                let a = &forward.activations[s * self.blocks.len() + c];
                let delta = DVector::from_fn(a.len(), |t, _| {
                    dloss_deta[t] * pool * block.nonlinearity.derivative(a[t])
                });
                let gw = x.columns(block.start, block.len).tr_mul(&delta);
                grad.rows_mut(layout.weights_start(s) + block.start, block.len)
                    .copy_from(&gw);
                grad[layout.intercept(s, c)] = delta.sum();
            }
        }
        grad[layout.global_intercept()] = dloss_deta.sum();
        grad
    }
}

/// Elastic-net penalized negative log likelihood of one split:
/// `sum_t loss(y_t, r_t) + beta * ((1 - alpha) * sum_s w_s^T P w_s + alpha * sum_s |w_s|_1)`
pub struct Likelihood<'a> {
    pub(crate) link: Link,
    pub(crate) x: &'a DMatrix<f64>,
    pub(crate) y: &'a [f64],
    pub(crate) penalty: &'a DMatrix<f64>,
    pub(crate) beta: f64,
    pub(crate) alpha: f64,
}

impl<'a> Likelihood<'a> {
    /// Penalty of the coefficients and its (sub)gradient, zero at the kink of the L1 term
    fn penalty_term(&self, params: &DVector<f64>) -> (f64, DVector<f64>) {
        let layout = self.link.layout;
        let mut grad = DVector::zeros(layout.len());
        if self.beta == 0.0 {
            return (0.0, grad);
        }
        let l2 = self.beta * (1.0 - self.alpha);
        let l1 = self.beta * self.alpha;
        let mut value = 0.0;
        for s in 0..layout.num_subunits {
            let w = params.rows(layout.weights_start(s), layout.n_coef);
            let pw = self.penalty * w;
            value += l2 * w.dot(&pw) + l1 * w.lp_norm(1);
            let sign = w.map(|v| if v == 0.0 { 0.0 } else { v.signum() });
            grad.rows_mut(layout.weights_start(s), layout.n_coef)
                .copy_from(&(pw * (2.0 * l2) + sign * l1));
        }
        (value, grad)
    }

    /// Unpenalized loss
    pub fn loss(&self, params: &DVector<f64>) -> f64 {
        let forward = self.link.forward(self.x, params);
        self.link.loss(self.y, &forward)
    }

    /// Penalized cost together with the predicted rate
    pub(crate) fn evaluate(&self, params: &DVector<f64>) -> (f64, DVector<f64>) {
        let forward = self.link.forward(self.x, params);
        let cost = self.link.loss(self.y, &forward) + self.penalty_term(params).0;
        (cost, forward.rate)
    }

    /// Penalized cost and gradient on a subset of rows, rescaled to the full split
    pub fn batch_cost_and_gradient(&self, params: &DVector<f64>, rows: &[usize]) -> (f64, DVector<f64>) {
        let xb = self.x.select_rows(rows);
        let yb: Vec<f64> = rows.iter().map(|r| self.y[*r]).collect();
        let scale = self.y.len() as f64 / rows.len().max(1) as f64;

        let forward = self.link.forward(&xb, params);
        let loss = self.link.loss(&yb, &forward) * scale;
        let grad = self.link.loss_gradient(&xb, &yb, &forward) * scale;
        let (pen, pen_grad) = self.penalty_term(params);
        (loss + pen, grad + pen_grad)
    }
}

impl<'a> Objective for Likelihood<'a> {
    fn dim(&self) -> usize {
        self.link.layout.len()
    }

    fn value(&self, params: &DVector<f64>) -> Result<f64> {
        let value = self.loss(params) + self.penalty_term(params).0;
        if !value.is_finite() {
            return Err(RfError::numerical(format!("penalized loss evaluated to {}", value)));
        }
        Ok(value)
    }

    fn value_and_gradient(&self, params: &DVector<f64>) -> Result<(f64, DVector<f64>)> {
        let forward = self.link.forward(self.x, params);
        let (pen, pen_grad) = self.penalty_term(params);
        let value = self.link.loss(self.y, &forward) + pen;
        if !value.is_finite() {
            return Err(RfError::numerical(format!("penalized loss evaluated to {}", value)));
        }
        let grad = self.link.loss_gradient(self.x, self.y, &forward) + pen_grad;
        Ok((value, grad))
    }
}
