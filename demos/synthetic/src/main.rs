#[macro_use]
extern crate log;

use std::{collections::BTreeMap, error::Error, time::Instant};

use common::{
    metrics::corrcoef,
    sampling::{poisson, rng_from_seed, standard_normal},
    Distribution, Metric, Nonlinearity,
};
use design_matrix::{ChannelSpec, DesignMatrixBuilder, DEV, TRAIN};
use dialoguer::{theme::ColorfulTheme, Select};
use glm::{FitConfig, InitMethod, ModelConfig, ReturnModel, GLM};
use lin_reg::{EvidenceModel, PriorCovariance};
use nalgebra::{DMatrix, DVector};
use rf_plot::{plot, plot_filters, plot_traces, FilterLine, PlotGather};

const TRAIN_LEN: usize = 3000;
const DEV_LEN: usize = 1000;
const N_LAGS: usize = 30;
const DT: f64 = 0.01;
const SEED: Option<u64> = Some(0);
const DIMS: (u32, u32) = (1600, 800);

/// A smooth biphasic temporal kernel, newest lag last
fn true_kernel() -> DVector<f64> {
    DVector::from_fn(N_LAGS, |i, _| {
        let t = (N_LAGS - 1 - i) as f64;
        (-(t - 5.0).powi(2) / 8.0).exp() - 0.5 * (-(t - 12.0).powi(2) / 18.0).exp()
    })
}

fn white_noise(t: usize, seed: u64) -> DMatrix<f64> {
    let mut rng = rng_from_seed(Some(seed));
    DMatrix::from_fn(t, 1, |_, _| standard_normal(&mut rng))
}

/// Filter the stimulus with the kernel, zero before a full history is available
fn drive(stimulus: &DMatrix<f64>, kernel: &DVector<f64>) -> Vec<f64> {
    (0..stimulus.nrows())
        .map(|t| {
            if t + 1 < N_LAGS {
                return 0.0;
            }
            (0..N_LAGS).map(|l| kernel[l] * stimulus[(t + 1 - N_LAGS + l, 0)]).sum()
        })
        .collect()
}

fn main() -> Result<(), Box<dyn Error>> {
    pretty_env_logger::init();
    std::fs::create_dir_all("img")?;

    let kernel = true_kernel();
    let stim_train = white_noise(TRAIN_LEN, 1);
    let stim_dev = white_noise(DEV_LEN, 2);
    info!("generated {} train and {} dev samples", TRAIN_LEN, DEV_LEN);

    let models = vec!["Ridge", "ARD", "ASD", "ALD", "GLM (Poisson)"];
    let e = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("Select receptive field model")
        .items(&models)
        .default(2)
        .interact()?;
    match e {
        0..=3 => {
            let prior = match e {
                0 => PriorCovariance::ridge(N_LAGS)?,
                1 => PriorCovariance::ard(N_LAGS)?,
                2 => PriorCovariance::asd(&[N_LAGS])?,
                _ => PriorCovariance::ald(&[N_LAGS])?,
            };
            run_evidence(prior, &kernel, &stim_train, &stim_dev, models[e])
        }
        _ => run_glm(&kernel, &stim_train, &stim_dev),
    }
}

fn run_evidence(
    prior: PriorCovariance,
    kernel: &DVector<f64>,
    stim_train: &DMatrix<f64>,
    stim_dev: &DMatrix<f64>,
    name: &str,
) -> Result<(), Box<dyn Error>> {
    let mut rng = rng_from_seed(SEED);
    let mut respond = |stim: &DMatrix<f64>| -> Vec<f64> {
        drive(stim, kernel)
            .iter()
            .map(|d| d + 0.5 * standard_normal(&mut rng))
            .collect()
    };
    let y_train = respond(stim_train);
    let y_dev = respond(stim_dev);

    let mut builder = DesignMatrixBuilder::new();
    builder.add(TRAIN, "stimulus", stim_train.clone(), ChannelSpec::new(vec![N_LAGS]))?;
    builder.add_split(DEV, "stimulus", stim_dev.clone())?;
    let train = builder.build(TRAIN)?;
    let dev = builder.build(DEV)?;
    let y_train = train.trim_response(&y_train)?;
    let y_dev = dev.trim_response(&y_dev)?;

    let mut model = EvidenceModel::new(
        &train.matrix,
        &DVector::from_column_slice(&y_train),
        prior,
        Default::default(),
    )?;
    let p0 = model.default_params();
    let t0 = Instant::now();
    let fit = model.fit_with_restarts(p0, 200)?.clone();
    info!(
        "{} fit in {}ms: log evidence: {:.3}, noise variance: {:.4}, status: {:?}",
        name,
        t0.elapsed().as_millis(),
        fit.log_evidence,
        fit.noise_var,
        fit.status
    );
    info!(
        "correlation to the true kernel: {:.4}",
        corrcoef(fit.mean.as_slice(), kernel.as_slice())
    );
    if let Some((centers, widths)) = model.localization() {
        info!("localization: centers {:?}, widths {:?}", centers, widths);
    }

    let pred_train = model.predict(&train.matrix)?;
    let pred_dev = model.predict(&dev.matrix)?;
    info!(
        "dev {:?}: {:.4}",
        Metric::Corrcoef,
        corrcoef(&y_dev, pred_dev.as_slice())
    );

    let slug = name.to_lowercase();
    let estimate = FilterLine {
        std_errors: Some(fit.posterior_std().as_slice().to_vec()),
        ..FilterLine::new(name, fit.mean.as_slice().to_vec())
    };
    plot_filters(
        &[FilterLine::new("true", kernel.as_slice().to_vec()), estimate],
        "temporal filter",
        &format!("img/synthetic_{}_filter.png", slug),
        DIMS,
    )?;
    plot_traces(
        &[("log evidence", fit.trace.as_slice())],
        "evidence ascent",
        &format!("img/synthetic_{}_evidence.png", slug),
        DIMS,
    )?;
    let gather = PlotGather::from_splits(&y_train, pred_train.as_slice(), &y_dev, pred_dev.as_slice());
    plot(&gather, &format!("img/synthetic_{}_response.png", slug), DIMS)?;
    Ok(())
}

fn run_glm(kernel: &DVector<f64>, stim_train: &DMatrix<f64>, stim_dev: &DMatrix<f64>) -> Result<(), Box<dyn Error>> {
    let mut rng = rng_from_seed(SEED);
    let mut spikes = |stim: &DMatrix<f64>| -> Vec<f64> {
        drive(stim, kernel)
            .iter()
            .map(|d| poisson(&mut rng, Nonlinearity::Softplus.apply(2.0 + 2.0 * d) * 20.0 * DT))
            .collect()
    };
    let y_train = spikes(stim_train);
    let y_dev = spikes(stim_dev);
    info!(
        "{} train spikes, {} dev spikes",
        y_train.iter().sum::<f64>(),
        y_dev.iter().sum::<f64>()
    );

    let config = ModelConfig {
        distribution: Distribution::Poisson,
        output_nonlinearity: Nonlinearity::Softplus,
        seed: SEED,
        ..Default::default()
    };
    let mut model = GLM::with_config(config)?;
    let spec = ChannelSpec {
        df: Some(vec![10]),
        ..ChannelSpec::new(vec![N_LAGS])
    };
    model.add_design_matrix(TRAIN, "stimulus", stim_train.clone(), spec)?;
    model.add_split(DEV, "stimulus", stim_dev.clone())?;
    model.initialize(1, DT, InitMethod::Sta, Some(&y_train))?;

    let responses = BTreeMap::from([(TRAIN, y_train.as_slice()), (DEV, y_dev.as_slice())]);
    let history = model
        .fit(
            &responses,
            &FitConfig {
                num_iters: 1500,
                step_size: 1e-2,
                beta: 1.0,
                checkpoint: 5,
                verbose_interval: 20,
                early_stopping: true,
                return_model: ReturnModel::BestDev,
                ..Default::default()
            },
        )?
        .clone();
    info!(
        "stopped after {} iterations ({:?}), kept iteration {}",
        history.iterations, history.status, history.best_iteration
    );

    let dev_design = model.builder().build(DEV)?;
    let scores = model.evaluate(&dev_design, &y_dev)?;
    info!("dev scores: {:?}", scores);

    let filter = &model.filters()?[0];
    // the filter is only identified up to the gain of the output nonlinearity
    let gain = filter.values.norm() / kernel.norm();
    plot_filters(
        &[
            FilterLine::new("true", kernel.as_slice().to_vec()),
            FilterLine::new("glm", (filter.values.clone() / gain).as_slice().to_vec()),
        ],
        "temporal filter (normalized)",
        "img/synthetic_glm_filter.png",
        DIMS,
    )?;
    plot_traces(
        &[("train", history.cost_train.as_slice()), ("dev", history.cost_dev.as_slice())],
        "penalized negative log likelihood",
        "img/synthetic_glm_cost.png",
        DIMS,
    )?;

    let train_design = model.builder().build(TRAIN)?;
    let gather = PlotGather::from_splits(
        &train_design.trim_response(&y_train)?,
        &model.predict(&train_design)?,
        &dev_design.trim_response(&y_dev)?,
        &model.predict(&dev_design)?,
    );
    plot(&gather, "img/synthetic_glm_response.png", DIMS)?;
    Ok(())
}
