//! Seeded random draws, with `WyRand` as the uniform source behind `statrs` distributions

use nanorand::{Rng as _, WyRand};
use rand::{distributions::Distribution, RngCore};
use statrs::distribution::{Bernoulli, Normal, Poisson};

/// A seedable `WyRand` usable wherever `rand` expects a generator
#[derive(Clone)]
pub struct SeededRng(WyRand);

impl RngCore for SeededRng {
    #[inline(always)]
    fn next_u32(&mut self) -> u32 {
        self.0.generate::<u32>()
    }

    #[inline(always)]
    fn next_u64(&mut self) -> u64 {
        self.0.generate::<u64>()
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        nanorand::Rng::fill_bytes(&mut self.0, dest)
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
        self.fill_bytes(dest);
        Ok(())
    }
}

/// Construct the generator from an optional seed
pub fn rng_from_seed(seed: Option<u64>) -> SeededRng {
    match seed {
        Some(seed) => SeededRng(WyRand::new_seed(seed)),
        None => SeededRng(WyRand::new()),
    }
}

/// A draw from N(mean, sd^2); degenerate parameters yield `mean`
pub fn normal(rng: &mut SeededRng, mean: f64, sd: f64) -> f64 {
    match Normal::new(mean, sd) {
        Ok(dist) => dist.sample(rng),
        Err(_) => mean,
    }
}

/// A draw from N(0, 1)
#[inline(always)]
pub fn standard_normal(rng: &mut SeededRng) -> f64 {
    normal(rng, 0.0, 1.0)
}

/// A Poisson draw with mean `lambda`, zero for non-positive means
pub fn poisson(rng: &mut SeededRng, lambda: f64) -> f64 {
    match Poisson::new(lambda) {
        Ok(dist) => Distribution::<f64>::sample(&dist, rng),
        Err(_) => 0.0,
    }
}

/// A 0/1 draw with success probability `p`, clamped into [0, 1]
pub fn bernoulli(rng: &mut SeededRng, p: f64) -> f64 {
    match Bernoulli::new(p.clamp(0.0, 1.0)) {
        Ok(dist) => Distribution::<f64>::sample(&dist, rng),
        Err(_) => 0.0,
    }
}
