use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use argmin::{
    core::{
        observers::{Observe, ObserverMode},
        CostFunction, Error, Executor, Gradient, IterState, Solver, State, TerminationReason, TerminationStatus,
        KV,
    },
    solver::{
        linesearch::{HagerZhangLineSearch, MoreThuenteLineSearch},
        quasinewton::LBFGS,
    },
};
use common::{ConvergenceStatus, Result, RfError};
use nalgebra::DVector;

use crate::Objective;

type Param = DVector<f64>;
type Iterate = IterState<Param, Param, (), (), (), f64>;

/// Gradient norm below which a point counts as stationary
const GRADIENT_TOL: f64 = 1e-10;
/// Number of curvature pairs kept by default
pub const DEFAULT_LBFGS_MEM: usize = 7;

/// Line search driving each quasi-Newton step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineSearch {
    /// More-Thuente, strong Wolfe conditions
    MoreThuente,
    /// Hager-Zhang, approximate Wolfe conditions
    HagerZhang,
}

/// Limited-memory BFGS minimization of an [`Objective`], run through argmin.
///
/// The problem is rescaled so the first trial step has unit length, which keeps
/// the line search inside the domain of log-parameterized costs.
#[derive(Debug, Clone)]
pub struct Lbfgs {
    /// Iteration budget
    pub max_iters: usize,
    /// Cost change, relative to the starting cost, below which the run counts as converged
    pub tolerance: f64,
    /// Curvature pairs kept between iterations
    pub memory: usize,
    /// Line search used for every step
    pub line_search: LineSearch,
    /// Wall-clock budget of the run
    pub max_duration: Option<Duration>,
}

impl Default for Lbfgs {
    fn default() -> Self {
        Self {
            max_iters: 100,
            tolerance: 1e-7,
            memory: DEFAULT_LBFGS_MEM,
            line_search: LineSearch::MoreThuente,
            max_duration: None,
        }
    }
}

/// The outcome of a minimization run
#[derive(Debug, Clone)]
pub struct Minimum {
    /// Best parameters found
    pub params: DVector<f64>,
    /// Objective value at `params`
    pub value: f64,
    /// Best objective value at the start and after every iteration
    pub trace: Vec<f64>,
    /// Why the run stopped
    pub status: ConvergenceStatus,
    /// Number of iterations performed
    pub iterations: usize,
}

/// Exposes an [`Objective`] to argmin in coordinates `z`, with `params = origin + scale * z`
struct ArgminObjective<'a, O: ?Sized> {
    objective: &'a O,
    origin: DVector<f64>,
    scale: f64,
}

impl<'a, O> ArgminObjective<'a, O>
where
    O: Objective + ?Sized,
{
    #[inline(always)]
    fn params(&self, z: &DVector<f64>) -> DVector<f64> {
        &self.origin + z * self.scale
    }
}

impl<'a, O> CostFunction for ArgminObjective<'a, O>
where
    O: Objective + ?Sized,
{
    type Param = Param;
    type Output = f64;

    fn cost(&self, z: &Self::Param) -> std::result::Result<Self::Output, Error> {
        let value = self.objective.value(&self.params(z))?;
        if !value.is_finite() {
            return Err(RfError::numerical(format!("objective evaluated to {}", value)).into());
        }
        Ok(value)
    }
}

impl<'a, O> Gradient for ArgminObjective<'a, O>
where
    O: Objective + ?Sized,
{
    type Param = Param;
    type Gradient = Param;

    fn gradient(&self, z: &Self::Param) -> std::result::Result<Self::Gradient, Error> {
        let (_, gradient) = self.objective.value_and_gradient(&self.params(z))?;
        if gradient.iter().any(|g| !g.is_finite()) {
            return Err(RfError::numerical("gradient is not finite").into());
        }
        Ok(gradient * self.scale)
    }
}

/// Best cost and coordinates seen so far
#[derive(Debug, Default)]
struct Record {
    trace: Vec<f64>,
    best: Option<DVector<f64>>,
}

/// Records the running minimum after every iteration
struct TraceObserver(Arc<Mutex<Record>>);

impl Observe<Iterate> for TraceObserver {
    fn observe_iter(&mut self, state: &Iterate, _kv: &KV) -> std::result::Result<(), Error> {
        if let Ok(mut record) = self.0.lock() {
            let cost = state.get_cost();
            let last = record.trace.last().copied().unwrap_or(f64::INFINITY);
            if cost < last {
                record.best = state.get_param().cloned();
                record.trace.push(cost);
            } else {
                record.trace.push(last);
            }
        }
        Ok(())
    }
}

impl Lbfgs {
    /// Minimize `objective` starting at `x0`
    pub fn minimize<O>(&self, objective: &O, x0: DVector<f64>) -> Result<Minimum>
    where
        O: Objective + ?Sized,
    {
        let (f0, g0) = objective
            .value_and_gradient(&x0)
            .map_err(|e| e.at_iteration(0, &[]))?;
        if !f0.is_finite() || g0.iter().any(|v| !v.is_finite()) {
            return Err(RfError::numerical("objective is not finite at the starting point").at_iteration(0, &[]));
        }
        if self.max_iters == 0 {
            return Ok(Minimum {
                params: x0,
                value: f0,
                trace: vec![f0],
                status: ConvergenceStatus::MaxIterReached,
                iterations: 0,
            });
        }

        let problem = ArgminObjective {
            objective,
            origin: x0.clone(),
            scale: 1.0 / g0.norm().max(1.0).sqrt(),
        };
        let z0 = DVector::zeros(x0.len());
        let record = Arc::new(Mutex::new(Record {
            trace: vec![f0],
            best: None,
        }));
        let tolerance = self.tolerance * f0.abs().max(1.0);

        let outcome = match self.line_search {
            LineSearch::MoreThuente => self.run(&problem, MoreThuenteLineSearch::new(), z0, tolerance, &record),
            LineSearch::HagerZhang => self.run(&problem, HagerZhangLineSearch::new(), z0, tolerance, &record),
        };
        let (trace, best) = match record.lock() {
            Ok(mut record) => (std::mem::take(&mut record.trace), record.best.take()),
            Err(_) => (vec![f0], None),
        };
        let iterations = trace.len() - 1;

        match outcome {
            Ok(state) => {
                let status = convergence_status(state.get_termination_status());
                let (params, value) = match state.get_best_param() {
                    Some(z) if state.get_best_cost() <= f0 => (problem.params(z), state.get_best_cost()),
                    _ => (x0, f0),
                };
                debug!(
                    "lbfgs: {:?} after {} iterations, value: {}",
                    state.get_termination_status(),
                    iterations,
                    value
                );
                Ok(Minimum {
                    params,
                    value,
                    trace,
                    status,
                    iterations,
                })
            }
            Err(err) => match err.downcast::<RfError>() {
                Ok(e) => Err(e.at_iteration(iterations, &trace)),
                Err(other) => match best {
                    Some(z) if iterations > 0 => {
                        debug!("lbfgs: solver stopped after {} iterations: {}", iterations, other);
                        let value = trace[iterations];
                        Ok(Minimum {
                            params: problem.params(&z),
                            value,
                            trace,
                            status: ConvergenceStatus::Converged,
                            iterations,
                        })
                    }
                    _ => Err(RfError::numerical(other.to_string()).at_iteration(iterations, &trace)),
                },
            },
        }
    }

    fn run<'a, O, L>(
        &self,
        problem: &ArgminObjective<'a, O>,
        line_search: L,
        z0: DVector<f64>,
        tolerance: f64,
        record: &Arc<Mutex<Record>>,
    ) -> std::result::Result<Iterate, Error>
    where
        O: Objective + ?Sized,
        LBFGS<L, Param, Param, f64>: Solver<ArgminObjective<'a, O>, Iterate>,
    {
        let solver = LBFGS::new(line_search, self.memory)
            .with_tolerance_grad(GRADIENT_TOL)?
            .with_tolerance_cost(tolerance)?;
        let problem = ArgminObjective {
            objective: problem.objective,
            origin: problem.origin.clone(),
            scale: problem.scale,
        };
        let max_iters = self.max_iters as u64;
        let mut executor = Executor::new(problem, solver)
            .configure(|state| state.param(z0).max_iters(max_iters))
            .add_observer(TraceObserver(record.clone()), ObserverMode::Always);
        if let Some(budget) = self.max_duration {
            executor = executor.timeout(budget);
        }
        Ok(executor.run()?.state().clone())
    }
}

fn convergence_status(status: &TerminationStatus) -> ConvergenceStatus {
    match status {
        TerminationStatus::NotTerminated | TerminationStatus::Terminated(TerminationReason::MaxItersReached) => {
            ConvergenceStatus::MaxIterReached
        }
        TerminationStatus::Terminated(TerminationReason::Timeout) => ConvergenceStatus::Cancelled,
        TerminationStatus::Terminated(_) => ConvergenceStatus::Converged,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// The Rosenbrock function with a closed-form gradient
    struct Rosenbrock;

    impl Objective for Rosenbrock {
        fn dim(&self) -> usize {
            2
        }

        fn value(&self, p: &DVector<f64>) -> Result<f64> {
            Ok((1.0 - p[0]).powi(2) + 100.0 * (p[1] - p[0].powi(2)).powi(2))
        }

        fn value_and_gradient(&self, p: &DVector<f64>) -> Result<(f64, DVector<f64>)> {
            let g = DVector::from_vec(vec![
                -2.0 * (1.0 - p[0]) - 400.0 * p[0] * (p[1] - p[0].powi(2)),
                200.0 * (p[1] - p[0].powi(2)),
            ]);
            Ok((self.value(p)?, g))
        }
    }

    /// A shifted bowl, gradient from finite differences
    struct Bowl;

    impl Objective for Bowl {
        fn dim(&self) -> usize {
            3
        }

        fn value(&self, p: &DVector<f64>) -> Result<f64> {
            Ok((p[0] - 1.0).powi(2) + 4.0 * (p[1] + 2.0).powi(2) + (p[2] - 0.5).powi(2) + 3.0)
        }
    }

    /// Undefined for negative inputs
    struct LogBarrier;

    impl Objective for LogBarrier {
        fn dim(&self) -> usize {
            1
        }

        fn value(&self, p: &DVector<f64>) -> Result<f64> {
            if p[0] <= 0.0 {
                return Err(RfError::numerical("log of a non-positive value"));
            }
            Ok(p[0] - p[0].ln())
        }
    }

    #[test]
    fn rosenbrock() {
        let _ = pretty_env_logger::try_init();

        for line_search in [LineSearch::MoreThuente, LineSearch::HagerZhang] {
            let opt = Lbfgs {
                max_iters: 500,
                tolerance: 1e-14,
                line_search,
                ..Default::default()
            };
            let min = opt.minimize(&Rosenbrock, DVector::from_vec(vec![-1.2, 1.0])).unwrap();
            assert!((min.params[0] - 1.0).abs() < 1e-3, "{:?}: {}", line_search, min.params);
            assert!((min.params[1] - 1.0).abs() < 1e-3, "{:?}: {}", line_search, min.params);
            assert_eq!(min.status, ConvergenceStatus::Converged);
        }
    }

    #[test]
    fn trace_is_monotonic() {
        let min = Lbfgs::default().minimize(&Rosenbrock, DVector::from_vec(vec![-1.2, 1.0])).unwrap();
        assert_eq!(min.trace.len(), min.iterations + 1);
        for w in min.trace.windows(2) {
            assert!(w[1] <= w[0]);
        }
    }

    #[test]
    fn finite_difference_gradient() {
        let min = Lbfgs::default().minimize(&Bowl, DVector::zeros(3)).unwrap();
        assert!((min.value - 3.0).abs() < 1e-6);
        assert!((min.params[1] + 2.0).abs() < 1e-3);
    }

    #[test]
    fn iteration_cap_keeps_best_params() {
        let opt = Lbfgs {
            max_iters: 2,
            tolerance: 0.0,
            ..Default::default()
        };
        let min = opt.minimize(&Rosenbrock, DVector::from_vec(vec![-1.2, 1.0])).unwrap();
        assert_eq!(min.status, ConvergenceStatus::MaxIterReached);
        assert_eq!(min.iterations, 2);
        assert!(min.value < min.trace[0]);
    }

    #[test]
    fn zero_budget_returns_the_start() {
        let opt = Lbfgs {
            max_iters: 0,
            ..Default::default()
        };
        let x0 = DVector::from_vec(vec![0.5, 0.5, 0.5]);
        let min = opt.minimize(&Bowl, x0.clone()).unwrap();
        assert_eq!(min.params, x0);
        assert_eq!(min.trace, vec![min.value]);
        assert_eq!(min.status, ConvergenceStatus::MaxIterReached);
    }

    #[test]
    fn invalid_start_is_numerical_error() {
        let err = Lbfgs::default()
            .minimize(&LogBarrier, DVector::from_vec(vec![-1.0]))
            .unwrap_err();
        assert_eq!(
            err,
            RfError::Numerical {
                reason: "log of a non-positive value".to_string(),
                iteration: Some(0),
                trace: vec![],
            }
        );
    }

    #[test]
    fn exhausted_time_budget_cancels() {
        let opt = Lbfgs {
            max_iters: 10_000,
            tolerance: 0.0,
            max_duration: Some(Duration::from_nanos(1)),
            ..Default::default()
        };
        let min = opt.minimize(&Rosenbrock, DVector::from_vec(vec![-1.2, 1.0])).unwrap();
        assert_eq!(min.status, ConvergenceStatus::Cancelled);
        assert!(min.iterations < 10_000);
    }
}
