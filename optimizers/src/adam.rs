use nalgebra::DVector;

/// The Adam first-order optimizer
#[derive(Debug, Clone)]
pub struct Adam {
    step_size: f64,
    beta1: f64,
    beta2: f64,
    eps: f64,
    m: DVector<f64>,
    v: DVector<f64>,
    t: i32,
}

impl Adam {
    /// Create a new optimizer for `dim` parameters with the default moment decay rates
    pub fn new(dim: usize, step_size: f64) -> Self {
        Self {
            step_size,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
            m: DVector::zeros(dim),
            v: DVector::zeros(dim),
            t: 0,
        }
    }

    /// Number of updates performed so far
    #[inline(always)]
    pub fn num_steps(&self) -> usize {
        self.t as usize
    }

    /// Perform a single descent step on `params`
    pub fn step(&mut self, params: &mut DVector<f64>, gradient: &DVector<f64>) {
        self.t += 1;
        let b1 = self.beta1;
        let b2 = self.beta2;
        self.m.zip_apply(gradient, |m, g| *m = b1 * *m + (1.0 - b1) * g);
        self.v.zip_apply(gradient, |v, g| *v = b2 * *v + (1.0 - b2) * g * g);

        let m_corr = 1.0 - b1.powi(self.t);
        let v_corr = 1.0 - b2.powi(self.t);
        for i in 0..params.len() {
            let m_hat = self.m[i] / m_corr;
            let v_hat = self.v[i] / v_corr;
            params[i] -= self.step_size * m_hat / (v_hat.sqrt() + self.eps);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_step_moves_by_step_size() {
        let mut adam = Adam::new(2, 0.1);
        let mut params = DVector::from_vec(vec![1.0, -1.0]);
        adam.step(&mut params, &DVector::from_vec(vec![4.0, -0.5]));
        assert!((params[0] - 0.9).abs() < 1e-6);
        assert!((params[1] + 0.9).abs() < 1e-6);
        assert_eq!(adam.num_steps(), 1);
    }

    #[test]
    fn minimizes_a_bowl() {
        let mut adam = Adam::new(2, 0.05);
        let mut params = DVector::from_vec(vec![3.0, -2.0]);
        for _ in 0..2000 {
            let g = DVector::from_vec(vec![2.0 * (params[0] - 1.0), 20.0 * (params[1] + 0.5)]);
            adam.step(&mut params, &g);
        }
        assert!((params[0] - 1.0).abs() < 5e-2);
        assert!((params[1] + 0.5).abs() < 5e-2);
    }
}
