use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Largest value a [`NoiseSource`] draw is allowed to take.
pub const MAX_UNIT: f64 = 0.999_999_999;

/// Source of uniform draws in `[0, 1)` for measurement jitter and the
/// latency / power-loss stand-ins.
pub trait NoiseSource: Send {
    fn next_unit(&mut self) -> f64;

    /// Uniform draw from `[low, high)`.
    fn uniform(&mut self, low: f64, high: f64) -> f64 {
        low + sanitize_unit(self.next_unit()) * (high - low)
    }

    /// Symmetric jitter in `[-amplitude, amplitude)`.
    fn jitter(&mut self, amplitude: f64) -> f64 {
        (sanitize_unit(self.next_unit()) - 0.5) * 2.0 * amplitude
    }
}

pub(crate) fn sanitize_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.5
    } else {
        value.clamp(0.0, MAX_UNIT)
    }
}

/// Pseudo-random noise backed by `StdRng`.
#[derive(Debug, Clone)]
pub struct SeededNoise {
    rng: StdRng,
}

impl SeededNoise {
    pub fn from_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn from_entropy() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }
}

impl Default for SeededNoise {
    fn default() -> Self {
        Self::from_entropy()
    }
}

impl NoiseSource for SeededNoise {
    fn next_unit(&mut self) -> f64 {
        self.rng.gen::<f64>()
    }
}

/// Returns the same draw every time. `ConstantNoise::centered()` removes all
/// jitter and lands latency / loss draws on the middle of their ranges.
#[derive(Debug, Clone, Copy)]
pub struct ConstantNoise(pub f64);

impl ConstantNoise {
    pub fn centered() -> Self {
        Self(0.5)
    }
}

impl NoiseSource for ConstantNoise {
    fn next_unit(&mut self) -> f64 {
        self.0
    }
}

impl<N: NoiseSource + ?Sized> NoiseSource for Box<N> {
    fn next_unit(&mut self) -> f64 {
        (**self).next_unit()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn centered_noise_has_no_jitter() {
        let mut n = ConstantNoise::centered();
        assert_eq!(n.jitter(2.5), 0.0);
        assert_eq!(n.uniform(45.0, 55.0), 50.0);
    }

    #[test]
    fn out_of_range_draws_are_sanitized() {
        let mut hi = ConstantNoise(7.0);
        assert!(hi.uniform(45.0, 55.0) < 55.0);
        let mut lo = ConstantNoise(-1.0);
        assert_eq!(lo.uniform(2.0, 7.0), 2.0);
        let mut nan = ConstantNoise(f64::NAN);
        assert_eq!(nan.jitter(1.0), 0.0);
    }

    #[test]
    fn seeded_noise_is_reproducible() {
        let mut a = SeededNoise::from_seed(7);
        let mut b = SeededNoise::from_seed(7);
        for _ in 0..16 {
            let x = a.next_unit();
            assert_eq!(x, b.next_unit());
            assert!((0.0..1.0).contains(&x));
        }
    }
}
