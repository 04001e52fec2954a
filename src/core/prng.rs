// Minimal PRNG state with `rand_distr` sampling on top.
//
// This is NOT cryptographically secure.
// It drives loading-matrix synthesis and spike sampling, and makes both
// reproducible from a single seed.

use rand_core::{impls, Error, RngCore};
use rand_distr::{Bernoulli, Distribution, Poisson, StandardNormal};

#[derive(Debug, Clone)]
pub struct Prng {
    state: u64,
}

impl Prng {
    pub fn new(seed: u64) -> Self {
        // Avoid a zero state.
        let seed = if seed == 0 { 0x9E3779B97F4A7C15 } else { seed };
        Self { state: seed }
    }

    #[inline]
    pub fn next_u64(&mut self) -> u64 {
        // xorshift64*
        // Marsaglia / Vigna family. Simple, fast, decent for simulation noise.
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545F4914F6CDD1D)
    }

    #[inline]
    pub fn next_f64_01(&mut self) -> f64 {
        // Top 53 bits -> [0,1).
        let x = self.next_u64() >> 11;
        (x as f64) * (1.0 / (1u64 << 53) as f64)
    }

    /// True with probability `p` (clamped to [0, 1]). NaN is never true.
    pub fn bernoulli(&mut self, p: f64) -> bool {
        Bernoulli::new(p.clamp(0.0, 1.0))
            .map(|d| d.sample(self))
            .unwrap_or(false)
    }

    /// Standard normal deviate.
    pub fn next_gaussian(&mut self) -> f64 {
        StandardNormal.sample(self)
    }

    /// Poisson deviate with mean `lambda`. Non-positive or non-finite means yield 0.
    pub fn poisson(&mut self, lambda: f64) -> u64 {
        if !(lambda > 0.0) || !lambda.is_finite() {
            return 0;
        }
        Poisson::new(lambda)
            .map(|d| {
                let k: f64 = d.sample(self);
                k as u64
            })
            .unwrap_or(0)
    }
}

impl RngCore for Prng {
    fn next_u32(&mut self) -> u32 {
        (Prng::next_u64(self) >> 32) as u32
    }

    fn next_u64(&mut self) -> u64 {
        Prng::next_u64(self)
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        impls::fill_bytes_via_next(self, dest)
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), Error> {
        self.fill_bytes(dest);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_stream() {
        let mut a = Prng::new(42);
        let mut b = Prng::new(42);
        for _ in 0..100 {
            assert_eq!(a.next_u64(), b.next_u64());
        }
        let ga: Vec<f64> = (0..10).map(|_| a.next_gaussian()).collect();
        let gb: Vec<f64> = (0..10).map(|_| b.next_gaussian()).collect();
        assert_eq!(ga, gb);
        assert_eq!(a.poisson(3.0), b.poisson(3.0));
    }

    #[test]
    fn zero_seed_is_usable() {
        let mut rng = Prng::new(0);
        assert_ne!(rng.next_u64(), 0);
    }

    #[test]
    fn uniform_stays_in_unit_interval() {
        let mut rng = Prng::new(7);
        for _ in 0..10_000 {
            let u = rng.next_f64_01();
            assert!((0.0..1.0).contains(&u));
        }
    }

    #[test]
    fn bernoulli_edges() {
        let mut rng = Prng::new(9);
        for _ in 0..100 {
            assert!(!rng.bernoulli(0.0));
            assert!(rng.bernoulli(1.0));
            assert!(rng.bernoulli(2.0));
            assert!(!rng.bernoulli(f64::NAN));
        }
    }

    #[test]
    fn poisson_degenerate_means() {
        let mut rng = Prng::new(5);
        assert_eq!(rng.poisson(0.0), 0);
        assert_eq!(rng.poisson(-1.0), 0);
        assert_eq!(rng.poisson(f64::NAN), 0);
        assert_eq!(rng.poisson(f64::INFINITY), 0);
    }

    #[test]
    fn fill_bytes_covers_odd_lengths() {
        let mut rng = Prng::new(3);
        let mut buf = [0u8; 13];
        rng.fill_bytes(&mut buf);
        assert!(buf.iter().any(|&b| b != 0));
    }
}
