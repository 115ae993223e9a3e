use std::{
    collections::{BTreeMap, VecDeque},
    time::{Duration, Instant},
};

use common::{
    sampling::{rng_from_seed, standard_normal},
    ConvergenceStatus, Distribution, Result, RfError,
};
use design_matrix::{ChannelSpec, DesignMatrix, DesignMatrixBuilder, DEV, TRAIN};
use lin_reg::{LinReg, TikhonovRegularization};
use nalgebra::{DMatrix, DVector};
use optimizers::{Adam, Objective};
use rand::Rng;

use crate::{
    likelihood::{ChannelBlock, Layout, Likelihood, Link},
    FitConfig, InitMethod, ModelConfig, Pooling, ReturnModel,
};

/// Train cost changes below this count as a plateau
const PLATEAU_TOL: f64 = 1e-5;
/// Relative scale of the noise that separates subunits seeded from the same estimate
const SUBUNIT_NOISE: f64 = 1e-2;

/// Objective values recorded during a fit
#[derive(Debug, Clone, Default)]
pub struct FitHistory {
    /// Iteration index of every checkpoint
    pub checkpoints: Vec<usize>,
    /// Penalized train cost at every checkpoint
    pub cost_train: Vec<f64>,
    /// Unpenalized dev cost at every checkpoint, empty without a dev split
    pub cost_dev: Vec<f64>,
    /// Train metric at every checkpoint
    pub metric_train: Vec<f64>,
    /// Dev metric at every checkpoint
    pub metric_dev: Vec<f64>,
    /// Iterations performed
    pub iterations: usize,
    /// Iteration whose parameters were kept
    pub best_iteration: usize,
    /// Why the fit stopped
    pub status: Option<ConvergenceStatus>,
    /// Wall-clock time of the fit
    pub elapsed: Duration,
}

/// A generalized linear model with spline-reduced filters, optional subunits
/// and a smoothness penalty, fitted by gradient descent on the penalized likelihood
#[derive(Debug, Clone)]
pub struct GLM<R> {
    pub(crate) config: ModelConfig,
    regressor: R,
    pub(crate) builder: DesignMatrixBuilder,
    pub(crate) link: Option<Link>,
    pub(crate) params: Option<DVector<f64>>,
    pub(crate) train_response: Option<Vec<f64>>,
    pub(crate) beta: f64,
    history: Option<FitHistory>,
}

impl GLM<TikhonovRegularization> {
    /// A model whose `Mle` initialization uses a lightly stabilized least squares fit
    pub fn with_config(config: ModelConfig) -> Result<Self> {
        Self::new(config, TikhonovRegularization::new(1e-6))
    }
}

impl<R> GLM<R>
where
    R: LinReg,
{
    /// Create a new model
    ///
    /// # Arguments:
    /// config: Distribution, nonlinearities, pooling and seed
    /// regressor: The linear regression used by the `Mle` initialization
    pub fn new(config: ModelConfig, regressor: R) -> Result<Self> {
        config.distribution.check_output(config.output_nonlinearity)?;
        if config.fit_rate_scale && config.distribution == Distribution::Bernoulli {
            return Err(RfError::Configuration(
                "a fitted rate scale cannot keep Bernoulli probabilities inside (0, 1)".to_string(),
            ));
        }

        Ok(Self {
            config,
            regressor,
            builder: DesignMatrixBuilder::new(),
            link: None,
            params: None,
            train_response: None,
            beta: 0.0,
            history: None,
        })
    }

    /// The model configuration
    #[inline(always)]
    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// The design matrix builder holding every channel and split
    #[inline(always)]
    pub fn builder(&self) -> &DesignMatrixBuilder {
        &self.builder
    }

    /// Register a channel's raw array for a split
    ///
    /// # Arguments:
    /// split: "train", "dev" or any other name
    /// name: Channel name, unique within a split and consistent across splits
    /// array: `T x prod(dims[1..])` raw samples
    /// spec: Filter shape, basis reduction and shift of the channel
    pub fn add_design_matrix(&mut self, split: &str, name: &str, array: DMatrix<f64>, spec: ChannelSpec) -> Result<()> {
        if self.params.is_some() && self.builder.channel(name).is_none() {
            return Err(RfError::Configuration(format!(
                "cannot register channel `{}` after initialization",
                name
            )));
        }
        self.builder.add(split, name, array, spec)
    }

    /// Add another split's array for an already registered channel
    pub fn add_split(&mut self, split: &str, name: &str, array: DMatrix<f64>) -> Result<()> {
        self.builder.add_split(split, name, array)
    }

    /// The parameter layout, once initialized
    pub fn layout(&self) -> Option<Layout> {
        self.link.as_ref().map(|l| l.layout)
    }

    /// The current parameter vector, once initialized
    #[inline(always)]
    pub fn params(&self) -> Option<&DVector<f64>> {
        self.params.as_ref()
    }

    /// The history of the last fit
    #[inline(always)]
    pub fn history(&self) -> Option<&FitHistory> {
        self.history.as_ref()
    }

    /// Allocate and seed the parameters
    ///
    /// # Arguments:
    /// num_subunits: Number of parallel filters per channel
    /// dt: Bin width of the response
    /// method: How to seed the coefficients
    /// y: Raw train response, required by the data-driven methods
    pub fn initialize(&mut self, num_subunits: usize, dt: f64, method: InitMethod, y: Option<&[f64]>) -> Result<()> {
        if num_subunits == 0 {
            return Err(RfError::Configuration("need at least one subunit".to_string()));
        }
        if !(dt.is_finite() && dt > 0.0) {
            return Err(RfError::Configuration(format!("bin width must be positive, got {}", dt)));
        }
        if self.builder.channels().is_empty() {
            return Err(RfError::Configuration("no channels registered".to_string()));
        }

        let layout = Layout {
            n_coef: self.builder.n_coef(),
            num_subunits,
            n_channels: self.builder.channels().len(),
            rate_scale: self.config.fit_rate_scale,
        };
        let mut start = 0;
        let mut blocks = Vec::with_capacity(layout.n_channels);
        for channel in self.builder.channels() {
            blocks.push(ChannelBlock {
                start,
                len: channel.n_coef(),
                nonlinearity: channel.spec().filter_nonlinearity,
            });
            start += channel.n_coef();
        }
        let link = Link {
            layout,
            blocks,
            distribution: self.config.distribution,
            output_nonlinearity: self.config.output_nonlinearity,
            pooling: self.config.pooling,
            dt,
        };
        let train = match y {
            Some(y) => {
                let design = self.builder.build(TRAIN)?;
                let y = design.trim_response(y)?;
                Some((design, y))
            }
            None => None,
        };

        let mut rng = rng_from_seed(self.config.seed);
        let mut params = DVector::zeros(layout.len());
        if let Some(i) = layout.rate_scale() {
            params[i] = 1.0;
        }
        let (estimate, linear_intercept) = match method {
            InitMethod::Random { scale } => {
                for s in 0..num_subunits {
                    for i in 0..layout.n_coef {
                        params[layout.weights_start(s) + i] = scale * standard_normal(&mut rng);
                    }
                }
                (None, None)
            }
            InitMethod::Mle | InitMethod::Sta => {
                let (design, y) = train.as_ref().ok_or_else(|| {
                    RfError::Configuration(format!("{:?} initialization needs the train response", method))
                })?;
                let (w, b) = if method == InitMethod::Mle {
                    self.least_squares(&design.matrix, y)?
                } else {
                    sta(&design.matrix, y)
                };
                (Some(w), Some(b))
            }
        };

        if let Some(w) = estimate {
            // subunits share the estimate so the pooled output starts at it
            let share = match self.config.pooling {
                Pooling::Sum => 1.0 / num_subunits as f64,
                Pooling::Mean => 1.0,
            };
            let noise = SUBUNIT_NOISE * (w.norm() / (w.len() as f64).sqrt()).max(1e-3);
            for s in 0..num_subunits {
                for i in 0..layout.n_coef {
                    let jitter = if s > 0 { noise * standard_normal(&mut rng) } else { 0.0 };
                    params[layout.weights_start(s) + i] = w[i] * share + jitter;
                }
            }
        }

        let intercept = match (&train, linear_intercept) {
            (Some(_), Some(b)) if link.is_linear() => b,
            (Some((design, y)), _) => self.initial_intercept(&link, &params, &design.matrix, y),
            (None, _) => 0.0,
        };
        params[layout.global_intercept()] = intercept;

        info!(
            "initialized {} parameters with {:?}: {} subunits x {} coefficients",
            layout.len(),
            method,
            num_subunits,
            layout.n_coef
        );
        self.link = Some(link);
        self.params = Some(params);
        self.train_response = train.map(|(_, y)| y);
        self.history = None;
        Ok(())
    }

    /// Least squares with a leading intercept column, through the regressor
    fn least_squares(&self, x: &DMatrix<f64>, y: &[f64]) -> Result<(DVector<f64>, f64)> {
        let mut design = DMatrix::from_element(x.nrows(), x.ncols() + 1, 1.0);
        design.view_mut((0, 1), (x.nrows(), x.ncols())).copy_from(x);
        let targets = DMatrix::from_column_slice(y.len(), 1, y);
        let coef = self.regressor.fit_readout(&design, &targets)?;
        let w = coef.view((1, 0), (x.ncols(), 1)).column(0).into_owned();
        Ok((w, coef[(0, 0)]))
    }

    /// Global intercept that puts the mean predicted rate at the mean observed rate
    fn initial_intercept(&self, link: &Link, params: &DVector<f64>, x: &DMatrix<f64>, y: &[f64]) -> f64 {
        let mut mean = y.iter().sum::<f64>() / y.len().max(1) as f64;
        if self.config.distribution == Distribution::Poisson {
            mean /= link.dt;
        }
        let forward = link.forward(x, params);
        let pooled_mean = forward.eta.mean() - params[link.layout.global_intercept()];
        self.config.output_nonlinearity.inverse(mean) - pooled_mean
    }

    /// Fit the parameters by Adam on the penalized negative log likelihood.
    /// Costs, metrics and stopping rules are evaluated at checkpoints only.
    ///
    /// # Arguments:
    /// y: Raw responses keyed by split, "train" required, "dev" optional
    /// fit: Iteration budget, step size, penalty and stopping rules
    pub fn fit(&mut self, y: &BTreeMap<&str, &[f64]>, fit: &FitConfig) -> Result<&FitHistory> {
        let (link, mut params) = match (self.link.clone(), self.params.clone()) {
            (Some(link), Some(params)) => (link, params),
            _ => {
                return Err(RfError::Configuration(
                    "model must be initialized before fitting".to_string(),
                ))
            }
        };
        if !(fit.step_size.is_finite() && fit.step_size > 0.0) {
            return Err(RfError::Configuration(format!("step size must be positive, got {}", fit.step_size)));
        }
        if !(fit.beta.is_finite() && fit.beta >= 0.0) {
            return Err(RfError::Configuration(format!("penalty weight must be >= 0, got {}", fit.beta)));
        }
        if !(0.0..=1.0).contains(&fit.alpha) {
            return Err(RfError::Configuration(format!(
                "elastic-net mixing must lie in [0, 1], got {}",
                fit.alpha
            )));
        }
        if fit.checkpoint == 0 {
            return Err(RfError::Configuration("checkpoint interval must be positive".to_string()));
        }

        let y_train = y
            .get(TRAIN)
            .ok_or_else(|| RfError::Configuration("no response for the train split".to_string()))?;
        let train = self.builder.build(TRAIN)?;
        let y_train = train.trim_response(y_train)?;
        let dev = self.dev_split(y)?;
        if dev.is_none() && (fit.early_stopping || fit.return_model == ReturnModel::BestDev) {
            return Err(RfError::Validation(
                "early stopping and best-dev selection need a dev response".to_string(),
            ));
        }

        let penalty = self.builder.penalty();
        let edf = self.builder.effective_df(&train, fit.beta).iter().sum::<f64>() * link.layout.num_subunits as f64;
        let objective = Likelihood {
            link: link.clone(),
            x: &train.matrix,
            y: &y_train,
            penalty: &penalty,
            beta: fit.beta,
            alpha: fit.alpha,
        };

        let mut adam = Adam::new(objective.dim(), fit.step_size);
        let mut rng = rng_from_seed(self.config.seed);
        let mut history = FitHistory::default();
        let mut best: Option<(f64, DVector<f64>, usize)> = None;
        let mut recent: VecDeque<(usize, DVector<f64>)> = VecDeque::with_capacity(fit.tolerance + 1);
        let mut status = ConvergenceStatus::MaxIterReached;
        let mut dev_stopped = false;
        let n_rows = train.nrows();
        let start = Instant::now();

        info!(
            "fitting {} parameters on {} rows{}, beta: {}, alpha: {}, step size: {}, checkpoint: {}",
            objective.dim(),
            n_rows,
            if dev.is_some() { " with a dev split" } else { "" },
            fit.beta,
            fit.alpha,
            fit.step_size,
            fit.checkpoint
        );

        for i in 0..fit.num_iters {
            if let Some(budget) = fit.max_duration {
                if start.elapsed() > budget {
                    status = ConvergenceStatus::Cancelled;
                    break;
                }
            }

            let grad = match fit.batch_size {
                Some(b) if b > 0 && b < n_rows => {
                    let rows: Vec<usize> = (0..b).map(|_| rng.gen_range(0..n_rows)).collect();
                    objective.batch_cost_and_gradient(&params, &rows).1
                }
                _ => {
                    objective
                        .value_and_gradient(&params)
                        .map_err(|e| e.at_iteration(i, &history.cost_train))?
                        .1
                }
            };
            if grad.iter().any(|g| !g.is_finite()) {
                return Err(RfError::numerical("gradient is not finite").at_iteration(i, &history.cost_train));
            }
            adam.step(&mut params, &grad);
            history.iterations = i + 1;

            if i % fit.checkpoint != 0 {
                continue;
            }

            let (cost_train, rate_train) = objective.evaluate(&params);
            if !cost_train.is_finite() {
                return Err(RfError::numerical(format!("train cost evaluated to {}", cost_train))
                    .at_iteration(i, &history.cost_train));
            }
            history.checkpoints.push(i);
            history.cost_train.push(cost_train);
            history
                .metric_train
                .push(fit.metric.compute(&y_train, link.expected(&rate_train).as_slice(), edf));
            if let Some((design, y_dev)) = &dev {
                let forward = link.forward(&design.matrix, &params);
                history.cost_dev.push(link.loss(y_dev, &forward));
                history
                    .metric_dev
                    .push(fit.metric.compute(y_dev, link.expected(&forward.rate).as_slice(), edf));
            }

            let score = match fit.return_model {
                ReturnModel::Last => None,
                ReturnModel::BestTrain => Some(cost_train),
                ReturnModel::BestDev => history.cost_dev.last().copied(),
            };
            if let Some(score) = score {
                if best.as_ref().map_or(true, |(b, _, _)| score < *b) {
                    best = Some((score, params.clone(), i));
                }
            }
            if fit.tolerance > 0 {
                recent.push_back((i, params.clone()));
                if recent.len() > fit.tolerance + 1 {
                    let _ = recent.pop_front();
                }
            }

            let n_checkpoints = history.checkpoints.len();
            if fit.verbose_interval > 0 && (n_checkpoints - 1) % fit.verbose_interval == 0 {
                info!(
                    "iter: {}, elapsed: {:.3}s, cost (train): {:.5}, cost (dev): {:.5}, {:?} (train): {:.5}, {:?} (dev): {:.5}",
                    i,
                    start.elapsed().as_secs_f64(),
                    cost_train,
                    history.cost_dev.last().copied().unwrap_or(f64::NAN),
                    fit.metric,
                    history.metric_train.last().copied().unwrap_or(f64::NAN),
                    fit.metric,
                    history.metric_dev.last().copied().unwrap_or(f64::NAN),
                );
            }

            if fit.tolerance > 0 && i + 1 >= fit.min_iters {
                if fit.early_stopping && rising(&history.cost_dev, fit.tolerance) {
                    info!(
                        "stop at {} steps: cost (dev) has been monotonically increasing for {} checkpoints",
                        i, fit.tolerance
                    );
                    dev_stopped = true;
                    status = ConvergenceStatus::Converged;
                    break;
                }
                if plateau(&history.cost_train, fit.tolerance) {
                    info!(
                        "stop at {} steps: cost (train) has been changing less than {:e} for {} checkpoints",
                        i, PLATEAU_TOL, fit.tolerance
                    );
                    status = ConvergenceStatus::Converged;
                    break;
                }
            }
        }

        history.elapsed = start.elapsed();
        history.status = Some(status);
        match status {
            ConvergenceStatus::MaxIterReached => warn!(
                "fit stopped at its cap of {} iterations after {:.3}s",
                fit.num_iters,
                history.elapsed.as_secs_f64()
            ),
            ConvergenceStatus::Cancelled => warn!(
                "fit cancelled after {} iterations and {:.3}s",
                history.iterations,
                history.elapsed.as_secs_f64()
            ),
            ConvergenceStatus::Converged => {}
        }

        let last_iteration = history.iterations.saturating_sub(1);
        let (chosen, best_iteration) = match (fit.return_model, best) {
            (ReturnModel::Last, _) if dev_stopped => match recent.pop_front() {
                Some((iteration, p)) => (p, iteration),
                None => (params, last_iteration),
            },
            (ReturnModel::Last, _) | (_, None) => (params, last_iteration),
            (_, Some((_, p, i))) => (p, i),
        };
        history.best_iteration = best_iteration;

        self.params = Some(chosen);
        self.beta = fit.beta;
        self.train_response = Some(y_train);
        Ok(self.history.insert(history))
    }

    /// Build the dev design and trim the dev response, if a dev response was given
    fn dev_split(&self, y: &BTreeMap<&str, &[f64]>) -> Result<Option<(DesignMatrix, Vec<f64>)>> {
        let y_dev = match y.get(DEV) {
            Some(y_dev) => y_dev,
            None => return Ok(None),
        };
        if !self.builder.has_split(DEV) {
            return Err(RfError::Validation(
                "a dev response was given but no dev arrays were added".to_string(),
            ));
        }
        let design = self.builder.build(DEV)?;
        let y_dev = design.trim_response(y_dev).map_err(|e| match e {
            RfError::Configuration(msg) => RfError::Validation(msg),
            other => other,
        })?;
        Ok(Some((design, y_dev)))
    }
}

/// Response-weighted average of the design rows, scaled to the least-squares gain
fn sta(x: &DMatrix<f64>, y: &[f64]) -> (DVector<f64>, f64) {
    let n = y.len().max(1) as f64;
    let mean = y.iter().sum::<f64>() / n;
    let centered = DVector::from_iterator(y.len(), y.iter().map(|v| v - mean));
    let sta = x.tr_mul(&centered) / n;
    let projected = x * &sta;
    let power = projected.norm_squared();
    let gain = if power > 0.0 { projected.dot(&centered) / power } else { 0.0 };
    let w = sta * gain;
    let intercept = mean - (x * &w).mean();
    (w, intercept)
}

/// The last `tolerance + 1` values strictly increase
fn rising(costs: &[f64], tolerance: usize) -> bool {
    costs.len() > tolerance && costs[costs.len() - tolerance - 1..].windows(2).all(|w| w[1] > w[0])
}

/// The last `tolerance` changes are all below the plateau threshold
fn plateau(costs: &[f64], tolerance: usize) -> bool {
    costs.len() > tolerance
        && costs[costs.len() - tolerance - 1..]
            .windows(2)
            .all(|w| (w[1] - w[0]).abs() < PLATEAU_TOL)
}

#[cfg(test)]
mod tests {
    use common::Nonlinearity;

    use super::*;

    fn white_noise(t: usize, seed: u64) -> DMatrix<f64> {
        let mut rng = rng_from_seed(Some(seed));
        DMatrix::from_fn(t, 1, |_, _| standard_normal(&mut rng))
    }

    fn linear_model() -> (GLM<TikhonovRegularization>, Vec<f64>) {
        let x = white_noise(400, 0);
        let kernel = [0.1, 0.5, 1.0, -0.3];
        let y: Vec<f64> = (0..400)
            .map(|t| {
                (0..4)
                    .map(|l| if t + l >= 3 { kernel[l] * x[(t + l - 3, 0)] } else { 0.0 })
                    .sum::<f64>()
                    + 0.5
            })
            .collect();
        let config = ModelConfig {
            distribution: Distribution::Gaussian,
            output_nonlinearity: Nonlinearity::Identity,
            ..Default::default()
        };
        let mut model = GLM::with_config(config).unwrap();
        model
            .add_design_matrix(TRAIN, "stimulus", x, ChannelSpec::new(vec![4]))
            .unwrap();
        (model, y)
    }

    #[test]
    fn stopping_rules() {
        assert!(rising(&[1.0, 0.5, 0.6, 0.7], 2));
        assert!(!rising(&[1.0, 0.5, 0.6, 0.6], 2));
        assert!(!rising(&[0.6, 0.7], 2));
        assert!(plateau(&[5.0, 1.0, 1.0 + 1e-6, 1.0], 2));
        assert!(!plateau(&[5.0, 1.0, 1.1, 1.1], 2));
    }

    #[test]
    fn output_range_is_checked() {
        let config = ModelConfig {
            distribution: Distribution::Poisson,
            output_nonlinearity: Nonlinearity::Identity,
            ..Default::default()
        };
        assert!(matches!(GLM::with_config(config), Err(RfError::Configuration(_))));
    }

    #[test]
    fn mle_init_recovers_linear_kernel() {
        let _ = pretty_env_logger::try_init();

        let (mut model, y) = linear_model();
        model.initialize(1, 1.0, InitMethod::Mle, Some(&y)).unwrap();
        let params = model.params().unwrap();
        let layout = model.layout().unwrap();
        assert_eq!(layout.len(), 4 + 1 + 1);
        for (i, k) in [0.1, 0.5, 1.0, -0.3].iter().enumerate() {
            assert!((params[i] - k).abs() < 1e-3, "{}", params);
        }
        assert!((params[layout.global_intercept()] - 0.5).abs() < 1e-3);
    }

    #[test]
    fn sta_init_points_along_the_kernel() {
        let (mut model, y) = linear_model();
        model.initialize(2, 1.0, InitMethod::Sta, Some(&y)).unwrap();
        let params = model.params().unwrap();
        // two summed subunits each carry half of the estimate
        assert!((params[2] - 0.5).abs() < 0.15, "{}", params);
        assert!(params[1] > params[0]);
        assert!(params[3] < 0.0);
    }

    #[test]
    fn initialization_errors() {
        let (mut model, _) = linear_model();
        assert!(matches!(
            model.initialize(0, 1.0, InitMethod::Mle, None),
            Err(RfError::Configuration(_))
        ));
        assert!(matches!(
            model.initialize(1, 1.0, InitMethod::Mle, None),
            Err(RfError::Configuration(_))
        ));
        assert!(matches!(
            model.initialize(1, 1.0, InitMethod::Mle, Some(&[1.0, 2.0])),
            Err(RfError::Configuration(_))
        ));
        let y = BTreeMap::from([(TRAIN, [0.0; 400].as_slice())]);
        assert!(matches!(
            model.fit(&y, &FitConfig::default()),
            Err(RfError::Configuration(_))
        ));
    }

    #[test]
    fn gaussian_fit_decreases_cost() {
        let (mut model, y) = linear_model();
        model.initialize(1, 1.0, InitMethod::Random { scale: 0.01 }, Some(&y)).unwrap();
        let responses = BTreeMap::from([(TRAIN, y.as_slice())]);
        let history = model
            .fit(
                &responses,
                &FitConfig {
                    num_iters: 300,
                    step_size: 0.05,
                    beta: 0.0,
                    tolerance: 0,
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(history.iterations, 300);
        assert_eq!(history.status, Some(ConvergenceStatus::MaxIterReached));
        assert!(history.cost_train.last().unwrap() < &history.cost_train[0]);
        assert!(history.metric_train.last().unwrap() > &0.95);
    }

    #[test]
    fn plateau_stops_early() {
        let (mut model, y) = linear_model();
        model.initialize(1, 1.0, InitMethod::Mle, Some(&y)).unwrap();
        let responses = BTreeMap::from([(TRAIN, y.as_slice())]);
        let history = model
            .fit(
                &responses,
                &FitConfig {
                    num_iters: 500,
                    step_size: 1e-6,
                    beta: 0.0,
                    tolerance: 5,
                    min_iters: 10,
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(history.status, Some(ConvergenceStatus::Converged));
        assert!(history.iterations < 500);
    }

    #[test]
    fn mini_batches_and_best_train_selection() {
        let (mut model, y) = linear_model();
        model.initialize(1, 1.0, InitMethod::Random { scale: 0.01 }, Some(&y)).unwrap();
        let responses = BTreeMap::from([(TRAIN, y.as_slice())]);
        let history = model
            .fit(
                &responses,
                &FitConfig {
                    num_iters: 200,
                    step_size: 0.05,
                    beta: 0.0,
                    tolerance: 0,
                    batch_size: Some(64),
                    return_model: ReturnModel::BestTrain,
                    ..Default::default()
                },
            )
            .unwrap();
        let best = history.best_iteration;
        let min = history.cost_train.iter().cloned().fold(f64::INFINITY, f64::min);
        assert_eq!(history.checkpoints[best], best);
        assert_eq!(history.cost_train[best], min);
    }

    #[test]
    fn costs_are_recorded_at_checkpoints() {
        let (mut model, y) = linear_model();
        model.initialize(1, 1.0, InitMethod::Random { scale: 0.01 }, Some(&y)).unwrap();
        let responses = BTreeMap::from([(TRAIN, y.as_slice())]);
        let history = model
            .fit(
                &responses,
                &FitConfig {
                    num_iters: 95,
                    step_size: 0.05,
                    beta: 0.0,
                    checkpoint: 10,
                    tolerance: 0,
                    return_model: ReturnModel::BestTrain,
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(history.iterations, 95);
        assert_eq!(history.checkpoints, (0..95).step_by(10).collect::<Vec<_>>());
        assert_eq!(history.cost_train.len(), 10);
        assert_eq!(history.metric_train.len(), 10);
        assert!(history.cost_dev.is_empty());
        assert!(history.checkpoints.contains(&history.best_iteration));
    }

    #[test]
    fn invalid_fit_settings() {
        let (mut model, y) = linear_model();
        model.initialize(1, 1.0, InitMethod::Mle, Some(&y)).unwrap();
        let responses = BTreeMap::from([(TRAIN, y.as_slice())]);
        for config in [
            FitConfig {
                alpha: 1.5,
                ..Default::default()
            },
            FitConfig {
                alpha: -0.1,
                ..Default::default()
            },
            FitConfig {
                checkpoint: 0,
                ..Default::default()
            },
        ] {
            assert!(matches!(model.fit(&responses, &config), Err(RfError::Configuration(_))));
        }
        assert!(model.history().is_none());
    }

    #[test]
    fn lasso_shrinks_coefficients() {
        let (mut model, y) = linear_model();
        model.initialize(1, 1.0, InitMethod::Mle, Some(&y)).unwrap();
        let unpenalized = model.params().unwrap().rows(0, 4).lp_norm(1);
        let responses = BTreeMap::from([(TRAIN, y.as_slice())]);
        model
            .fit(
                &responses,
                &FitConfig {
                    num_iters: 300,
                    step_size: 0.01,
                    beta: 20.0,
                    alpha: 1.0,
                    tolerance: 0,
                    ..Default::default()
                },
            )
            .unwrap();
        let shrunk = model.params().unwrap().rows(0, 4).lp_norm(1);
        assert!(shrunk < unpenalized - 0.1, "{} vs {}", shrunk, unpenalized);
    }

    #[test]
    fn rate_scale_is_fitted() {
        let x = white_noise(600, 4);
        let mut rng = rng_from_seed(Some(5));
        let y: Vec<f64> = (0..600)
            .map(|t| 5.0 * Nonlinearity::Sigmoid.apply(2.0 * x[(t, 0)]) + 0.05 * standard_normal(&mut rng))
            .collect();
        let config = ModelConfig {
            distribution: Distribution::Gaussian,
            output_nonlinearity: Nonlinearity::Sigmoid,
            fit_rate_scale: true,
            ..Default::default()
        };
        let mut model = GLM::with_config(config).unwrap();
        model
            .add_design_matrix(TRAIN, "stimulus", x, ChannelSpec::new(vec![1]))
            .unwrap();
        model.initialize(1, 1.0, InitMethod::Random { scale: 0.1 }, None).unwrap();
        let layout = model.layout().unwrap();
        let scale = layout.rate_scale().unwrap();
        assert_eq!(layout.len(), 1 + 1 + 1 + 1);
        assert_eq!(model.params().unwrap()[scale], 1.0);

        let responses = BTreeMap::from([(TRAIN, y.as_slice())]);
        model
            .fit(
                &responses,
                &FitConfig {
                    num_iters: 4000,
                    step_size: 0.02,
                    beta: 0.0,
                    tolerance: 0,
                    ..Default::default()
                },
            )
            .unwrap();
        let r = model.params().unwrap()[scale];
        assert!((r - 5.0).abs() < 0.5, "rate scale: {}", r);
    }

    #[test]
    fn bernoulli_rejects_rate_scale() {
        let config = ModelConfig {
            distribution: Distribution::Bernoulli,
            output_nonlinearity: Nonlinearity::Sigmoid,
            fit_rate_scale: true,
            ..Default::default()
        };
        assert!(matches!(GLM::with_config(config), Err(RfError::Configuration(_))));
    }

    #[test]
    fn diverging_step_is_numerical_error() {
        let x = white_noise(200, 3).map(|v| v * 50.0);
        let y: Vec<f64> = (0..200).map(|t| (t % 4) as f64).collect();
        let config = ModelConfig {
            distribution: Distribution::Poisson,
            output_nonlinearity: Nonlinearity::Exponential,
            ..Default::default()
        };
        let mut model = GLM::with_config(config).unwrap();
        model
            .add_design_matrix(TRAIN, "stimulus", x, ChannelSpec::new(vec![3]))
            .unwrap();
        model.initialize(1, 1.0, InitMethod::Random { scale: 1.0 }, None).unwrap();
        let responses = BTreeMap::from([(TRAIN, y.as_slice())]);
        let err = model
            .fit(
                &responses,
                &FitConfig {
                    num_iters: 50,
                    step_size: 100.0,
                    beta: 0.0,
                    tolerance: 0,
                    ..Default::default()
                },
            )
            .unwrap_err();
        match err {
            RfError::Numerical { iteration, .. } => assert!(iteration.is_some()),
            other => panic!("expected a numerical error, got {:?}", other),
        }
    }
}
