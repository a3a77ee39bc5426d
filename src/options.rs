use crate::error::{BlockOptError, Result};
use log::LevelFilter;

const DEFAULT_SAMPLES: usize = 6;
const DEFAULT_DELTA_MAX: f64 = 100.0;
const DEFAULT_DELTA_TOL: f64 = 1e-12;
const DEFAULT_EPSILON_TOL: f64 = 1e-5;
const DEFAULT_MAX_ITERATIONS: usize = 2000;
const DEFAULT_RNG_SEED: u64 = 0xB5F0_D00D_1234_5678;

/// Driving parameters of a simulation.
///
/// Every setter validates its input and leaves the options untouched when it
/// returns an error. Values are never clamped.
#[derive(Debug, Clone, PartialEq)]
pub struct DriverOptions {
    samples: usize,
    delta_max: f64,
    delta_tol: f64,
    epsilon_tol: f64,
    max_iterations: usize,
    log_level: LevelFilter,
    rng_seed: u64,
}

impl Default for DriverOptions {
    fn default() -> Self {
        Self {
            samples: DEFAULT_SAMPLES,
            delta_max: DEFAULT_DELTA_MAX,
            delta_tol: DEFAULT_DELTA_TOL,
            epsilon_tol: DEFAULT_EPSILON_TOL,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            log_level: LevelFilter::Info,
            rng_seed: DEFAULT_RNG_SEED,
        }
    }
}

fn positive(name: &'static str, value: f64) -> Result<f64> {
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(BlockOptError::InvalidParameter { name, value })
    }
}

impl DriverOptions {
    /// Number of Hessian samples `s = 2w` drawn at each new iterate (default 6).
    pub fn samples(&self) -> usize {
        self.samples
    }

    /// Half the sample count.
    pub fn half_samples(&self) -> usize {
        self.samples / 2
    }

    /// Maximum trust-region radius (default 100).
    pub fn delta_max(&self) -> f64 {
        self.delta_max
    }

    /// Relative pseudoinverse tolerance used by the block QN update (default 1e-12).
    pub fn delta_tol(&self) -> f64 {
        self.delta_tol
    }

    /// Absolute convergence tolerance on `‖∇f(x_k)‖₂` (default 1e-5).
    pub fn epsilon_tol(&self) -> f64 {
        self.epsilon_tol
    }

    /// Iteration budget (default 2000).
    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    /// Most verbose level a run emits through the `log` facade (default `Info`).
    pub fn log_level(&self) -> LevelFilter {
        self.log_level
    }

    /// Seed of the random source used to draw sample directions.
    pub fn rng_seed(&self) -> u64 {
        self.rng_seed
    }

    /// Set the sample count to a positive even `s = 2w`.
    pub fn set_samples(&mut self, samples: usize) -> Result<()> {
        if samples == 0 || samples % 2 != 0 {
            return Err(BlockOptError::InvalidSamples(samples));
        }
        self.samples = samples;
        Ok(())
    }

    pub fn set_delta_max(&mut self, delta_max: f64) -> Result<()> {
        self.delta_max = positive("delta_max", delta_max)?;
        Ok(())
    }

    pub fn set_delta_tol(&mut self, delta_tol: f64) -> Result<()> {
        self.delta_tol = positive("delta_tol", delta_tol)?;
        Ok(())
    }

    pub fn set_epsilon_tol(&mut self, epsilon_tol: f64) -> Result<()> {
        self.epsilon_tol = positive("epsilon_tol", epsilon_tol)?;
        Ok(())
    }

    pub fn set_max_iterations(&mut self, max_iterations: usize) -> Result<()> {
        if max_iterations == 0 {
            return Err(BlockOptError::InvalidMaxIterations);
        }
        self.max_iterations = max_iterations;
        Ok(())
    }

    pub fn set_log_level(&mut self, log_level: LevelFilter) {
        self.log_level = log_level;
    }

    pub fn set_rng_seed(&mut self, seed: u64) {
        self.rng_seed = seed;
    }

    /// Check the options against a problem of dimension `n`.
    pub(crate) fn validate_for(&self, n: usize) -> Result<()> {
        if self.samples > n {
            return Err(BlockOptError::SamplesExceedDimension {
                samples: self.samples,
                dimension: n,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let o = DriverOptions::default();
        assert_eq!(o.samples(), 6);
        assert_eq!(o.half_samples(), 3);
        assert_eq!(o.delta_max(), 100.0);
        assert_eq!(o.delta_tol(), 1e-12);
        assert_eq!(o.epsilon_tol(), 1e-5);
        assert_eq!(o.max_iterations(), 2000);
        assert_eq!(o.log_level(), LevelFilter::Info);
    }

    #[test]
    fn odd_or_zero_samples_are_rejected() {
        let mut o = DriverOptions::default();
        assert!(matches!(o.set_samples(5), Err(BlockOptError::InvalidSamples(5))));
        assert!(matches!(o.set_samples(0), Err(BlockOptError::InvalidSamples(0))));
        assert_eq!(o.samples(), 6);
        o.set_samples(10).unwrap();
        assert_eq!(o.samples(), 10);
    }

    #[test]
    fn non_positive_tolerances_are_rejected_not_clamped() {
        let mut o = DriverOptions::default();
        for bad in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            assert!(o.set_delta_max(bad).is_err());
            assert!(o.set_delta_tol(bad).is_err());
            assert!(o.set_epsilon_tol(bad).is_err());
        }
        assert_eq!(o, DriverOptions::default());
        let err = o.set_epsilon_tol(-2.0).unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("epsilon_tol"));
    }

    #[test]
    fn zero_iterations_are_rejected() {
        let mut o = DriverOptions::default();
        assert!(matches!(
            o.set_max_iterations(0),
            Err(BlockOptError::InvalidMaxIterations)
        ));
        o.set_max_iterations(10_000).unwrap();
        assert_eq!(o.max_iterations(), 10_000);
    }

    #[test]
    fn sample_count_must_fit_the_dimension() {
        let o = DriverOptions::default();
        assert!(o.validate_for(6).is_ok());
        assert!(matches!(
            o.validate_for(4),
            Err(BlockOptError::SamplesExceedDimension {
                samples: 6,
                dimension: 4
            })
        ));
    }
}
