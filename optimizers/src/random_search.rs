//! The random search algorithm, used to pick starting points for the local optimizers

use std::{cmp::max, sync::Arc};

use crossbeam::channel::unbounded;
use nalgebra::DVector;
use nanorand::{Rng, WyRand};
use num::Float;
use threadpool::ThreadPool;

use crate::Objective;

/// Minimization using random search over a box of parameter ranges.
/// Candidates are evaluated in parallel; failing evaluations count as infinitely bad.
pub struct RandomSearch {
    ranges: Vec<(f64, f64)>,
    best_value: f64,
    best_params: Vec<f64>,
    rng: WyRand,
    num_candidates: usize,
    candidates: Vec<Vec<f64>>,
    values: Vec<f64>,
}

impl RandomSearch {
    /// Create a new random search based optimizer
    ///
    /// # Arguments:
    /// ranges: Inclusive (min, max) range of every parameter
    /// seed: Optional seed for reproducible candidates
    /// num_candidates: Candidates evaluated per step
    pub fn new(ranges: Vec<(f64, f64)>, seed: Option<u64>, num_candidates: usize) -> Self {
        let rng = if let Some(seed) = seed {
            WyRand::new_seed(seed)
        } else {
            WyRand::new()
        };
        let dim = ranges.len();

        Self {
            ranges,
            best_value: f64::INFINITY,
            best_params: vec![0.0; dim],
            rng,
            num_candidates,
            candidates: vec![],
            values: vec![],
        }
    }

    /// Perform a single optimization step
    pub fn step<O>(&mut self, objective: Arc<O>)
    where
        O: Objective + Send + Sync + 'static,
    {
        let pool = ThreadPool::new(max(num_cpus::get().saturating_sub(2), 1));

        self.candidates = self.gen_candidates(self.num_candidates);
        self.values = vec![f64::INFINITY; self.num_candidates];

        let (ch_eval_s, ch_eval_r) = unbounded();
        for (i, c) in self.candidates.iter().enumerate() {
            let ch_eval_s = ch_eval_s.clone();
            let o = objective.clone();
            let params = DVector::from_column_slice(c);
            pool.execute(move || {
                let value = match o.value(&params) {
                    Ok(v) if v.is_finite() => v,
                    Ok(_) | Err(_) => f64::INFINITY,
                };
                // The receiver outlives every job
                let _ = ch_eval_s.send((i, value));
            });
        }
        drop(ch_eval_s);
        while let Ok((i, value)) = ch_eval_r.recv() {
            self.values[i] = value;
        }

        for (i, v) in self.values.iter().enumerate() {
            if *v < self.best_value {
                self.best_value = *v;
                self.best_params = self.candidates[i].clone();
            }
        }
        debug!("random search: best value so far {}", self.best_value);
    }

    /// The best evaluated parameters
    #[inline(always)]
    pub fn elite_params(&self) -> &[f64] {
        &self.best_params
    }

    /// The objective value of the `elite_params`
    #[inline(always)]
    pub fn best_value(&self) -> f64 {
        self.best_value
    }

    /// All the candidates of the last step
    #[inline(always)]
    pub fn candidates(&self) -> &Vec<Vec<f64>> {
        &self.candidates
    }

    /// Objective values of the last step's candidates
    #[inline(always)]
    pub fn values(&self) -> &Vec<f64> {
        &self.values
    }

    /// The last step's candidates with finite values, best first
    pub fn ranked(&self) -> Vec<(Vec<f64>, f64)> {
        let mut ranked: Vec<(Vec<f64>, f64)> = self
            .candidates
            .iter()
            .cloned()
            .zip(self.values.iter().copied())
            .filter(|(_, v)| v.is_finite())
            .collect();
        ranked.sort_by(|a, b| a.1.total_cmp(&b.1));
        ranked
    }

    /// Generate random candidates inside the ranges
    fn gen_candidates(&mut self, n: usize) -> Vec<Vec<f64>> {
        (0..n)
            .map(|_| {
                self.ranges
                    .iter()
                    .map(|(min, max)| scale(0.0, 1.0, *min, *max, self.rng.generate::<f64>()))
                    .collect()
            })
            .collect()
    }
}

#[inline(always)]
pub(crate) fn scale<F: Float>(from_min: F, from_max: F, to_min: F, to_max: F, value: F) -> F {
    to_min + ((value - from_min) * (to_max - to_min)) / (from_max - from_min)
}

#[cfg(test)]
mod tests {
    use common::{Result, RfError};

    use super::*;

    struct Shifted;

    impl Objective for Shifted {
        fn dim(&self) -> usize {
            2
        }

        fn value(&self, p: &DVector<f64>) -> Result<f64> {
            if p[0] > 4.5 {
                return Err(RfError::numerical("out of domain"));
            }
            Ok((p[0] - 1.0).powi(2) + (p[1] + 1.0).powi(2))
        }
    }

    #[test]
    fn random_search_shifted_bowl() {
        let _ = pretty_env_logger::try_init();

        let mut opt = RandomSearch::new(vec![(-5.0, 5.0), (-5.0, 5.0)], Some(0), 200);
        let objective = Arc::new(Shifted);
        for _ in 0..5 {
            opt.step(objective.clone());
        }
        let best = opt.elite_params();
        assert!((best[0] - 1.0).abs() < 1.0, "{:?}", best);
        assert!((best[1] + 1.0).abs() < 1.0, "{:?}", best);
        assert!(opt.best_value() < 1.0);
    }

    #[test]
    fn candidates_stay_in_range() {
        let mut opt = RandomSearch::new(vec![(2.0, 3.0), (-0.5, 0.5)], Some(1), 50);
        opt.step(Arc::new(Shifted));
        for c in opt.candidates() {
            assert!((2.0..=3.0).contains(&c[0]));
            assert!((-0.5..=0.5).contains(&c[1]));
        }
    }

    #[test]
    fn failures_are_ranked_out() {
        let mut opt = RandomSearch::new(vec![(4.0, 5.0), (0.0, 1.0)], Some(2), 100);
        opt.step(Arc::new(Shifted));
        let ranked = opt.ranked();
        assert!(ranked.len() < 100);
        assert!(ranked.iter().all(|(c, _)| c[0] <= 4.5));
        for w in ranked.windows(2) {
            assert!(w[0].1 <= w[1].1);
        }
    }

    #[test]
    fn scale_maps_unit_interval() {
        assert_eq!(scale(0.0, 1.0, -2.0, 2.0, 0.5), 0.0);
        assert_eq!(scale(0.0, 1.0, -2.0, 2.0, 1.0), 2.0);
    }
}
