//! Run configuration.
//!
//! Every field has an enumerated or range-checked set of legal values, and a
//! [`Config`] is validated when it is built. [`Reconstruction::new`]
//! re-validates, so a config mutated through its public fields is still
//! checked before any computation.
//!
//! [`Reconstruction::new`]: crate::controller::Reconstruction::new

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::field::ComplexField;
use crate::grid::{self, Grid, GridError};

/// Configuration validation failures.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Grid(#[from] GridError),

    #[error("max_iterations must be at least 1, got {0}")]
    MaxIterations(usize),

    #[error("tolerance must be finite and positive, got {0}")]
    Tolerance(f64),

    #[error("GP minimisation needs at least one step per iteration")]
    GpSteps,

    #[error("Invalid PT schedule: {0}")]
    PtSchedule(String),

    #[error("seed phase noise must be finite and non-negative, got {0}")]
    PhaseNoise(f64),
}

/// Which reconstructor drives the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Algorithm {
    /// Generalized projections.
    #[default]
    Gp,
    /// Ptychographic sequential update.
    Pt,
}

/// Initial field strategy.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum SeedKind {
    /// Square root of the delay marginal, zero (or noisy) phase.
    #[default]
    Autocorrelation,
    /// Transform-limited Gaussian fitted to the delay marginal's width.
    Gaussian,
    /// Caller-supplied field.
    Custom(ComplexField),
}

/// Options for the randomised part of seeding.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeedOptions {
    /// Half-width (radians) of the uniform random phase added to the
    /// autocorrelation seed. Zero disables it.
    pub phase_noise: f64,
    /// Seed for the phase noise generator.
    pub rng_seed: u64,
}

impl Default for SeedOptions {
    fn default() -> Self {
        Self {
            phase_noise: 0.0,
            rng_seed: 0x5eed,
        }
    }
}

/// How the GP step solves the time-domain minimisation
/// $\min_E \sum_{t,\tau} |E'_{\text{sig}}(t,\tau) - E(t)E(t-\tau)|^2$.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum GpStrategy {
    /// Steepest descent over the whole field, each step with an exact line
    /// search along the gradient.
    Gradient { steps: usize },
    /// Gauss-Newton sweeps solving each sample in closed form with every
    /// other sample held fixed.
    Coordinate { sweeps: usize },
}

impl Default for GpStrategy {
    fn default() -> Self {
        Self::Gradient { steps: 3 }
    }
}

/// PT step size $\beta(n) = \max(\text{floor}, \text{initial} \cdot \text{decay}^n)$.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PtSchedule {
    pub initial: f64,
    pub decay: f64,
    pub floor: f64,
}

impl Default for PtSchedule {
    fn default() -> Self {
        Self {
            initial: 0.5,
            decay: 0.99,
            floor: 0.1,
        }
    }
}

impl PtSchedule {
    /// Step size for the zero-based outer iteration `iteration`.
    pub fn step_size(&self, iteration: usize) -> f64 {
        let exponent = i32::try_from(iteration).unwrap_or(i32::MAX);
        (self.initial * self.decay.powi(exponent)).max(self.floor)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let ok = |v: f64, lo: f64, hi: f64| v.is_finite() && v > lo && v <= hi;
        if !ok(self.initial, 0.0, 2.0) {
            return Err(ConfigError::PtSchedule(format!(
                "initial step {} must lie in (0, 2]",
                self.initial
            )));
        }
        if !ok(self.decay, 0.0, 1.0) {
            return Err(ConfigError::PtSchedule(format!(
                "decay {} must lie in (0, 1]",
                self.decay
            )));
        }
        if !ok(self.floor, 0.0, self.initial) {
            return Err(ConfigError::PtSchedule(format!(
                "floor {} must lie in (0, initial]",
                self.floor
            )));
        }
        Ok(())
    }
}

/// Immutable settings for one reconstruction run.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Samples per axis, `N`. Even and at least 16.
    pub grid_size: usize,
    /// Time (and delay) step.
    pub time_step: f64,
    pub algorithm: Algorithm,
    pub seed: SeedKind,
    pub max_iterations: usize,
    /// Run converges once the G error is at or below this value.
    pub tolerance: f64,
    pub gp_strategy: GpStrategy,
    pub pt_schedule: PtSchedule,
    pub seed_options: SeedOptions,
}

impl Config {
    /// Build and validate a config with unit time step and default tuning.
    pub fn new(
        grid_size: usize,
        algorithm: Algorithm,
        seed: SeedKind,
        max_iterations: usize,
        tolerance: f64,
    ) -> Result<Self, ConfigError> {
        let config = Self {
            grid_size,
            time_step: 1.0,
            algorithm,
            seed,
            max_iterations,
            tolerance,
            gp_strategy: GpStrategy::default(),
            pt_schedule: PtSchedule::default(),
            seed_options: SeedOptions::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn with_time_step(mut self, time_step: f64) -> Result<Self, ConfigError> {
        self.time_step = time_step;
        self.validate()?;
        Ok(self)
    }

    pub fn with_gp_strategy(mut self, strategy: GpStrategy) -> Result<Self, ConfigError> {
        self.gp_strategy = strategy;
        self.validate()?;
        Ok(self)
    }

    pub fn with_pt_schedule(mut self, schedule: PtSchedule) -> Result<Self, ConfigError> {
        self.pt_schedule = schedule;
        self.validate()?;
        Ok(self)
    }

    pub fn with_seed_options(mut self, options: SeedOptions) -> Result<Self, ConfigError> {
        self.seed_options = options;
        self.validate()?;
        Ok(self)
    }

    /// Check every field against its legal range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        grid::validate_size(self.grid_size)?;
        // Builds nothing; only checks the step.
        Grid::new(self.grid_size, self.time_step)?;
        if self.max_iterations < 1 {
            return Err(ConfigError::MaxIterations(self.max_iterations));
        }
        if !(self.tolerance.is_finite() && self.tolerance > 0.0) {
            return Err(ConfigError::Tolerance(self.tolerance));
        }
        match self.gp_strategy {
            GpStrategy::Gradient { steps: 0 } | GpStrategy::Coordinate { sweeps: 0 } => {
                return Err(ConfigError::GpSteps)
            }
            _ => {}
        }
        self.pt_schedule.validate()?;
        let noise = self.seed_options.phase_noise;
        if !(noise.is_finite() && noise >= 0.0) {
            return Err(ConfigError::PhaseNoise(noise));
        }
        Ok(())
    }

    /// The grid this config describes.
    pub fn grid(&self) -> Result<Grid, GridError> {
        Grid::new(self.grid_size, self.time_step)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_valid_config() {
        let c = Config::new(64, Algorithm::Pt, SeedKind::Gaussian, 100, 1e-4).unwrap();
        assert_eq!(c.grid().unwrap().size(), 64);
    }

    #[test]
    fn test_odd_grid_is_invalid_grid_error() {
        let err = Config::new(17, Algorithm::Gp, SeedKind::Gaussian, 10, 1e-3).unwrap_err();
        assert_eq!(err, ConfigError::Grid(GridError::OddSize(17)));
    }

    #[test]
    fn test_rejects_bad_limits() {
        assert_eq!(
            Config::new(16, Algorithm::Gp, SeedKind::Gaussian, 0, 1e-3).unwrap_err(),
            ConfigError::MaxIterations(0)
        );
        assert!(matches!(
            Config::new(16, Algorithm::Gp, SeedKind::Gaussian, 1, 0.0),
            Err(ConfigError::Tolerance(_))
        ));
        assert!(matches!(
            Config::new(16, Algorithm::Gp, SeedKind::Gaussian, 1, f64::NAN),
            Err(ConfigError::Tolerance(_))
        ));
        let base = Config::new(16, Algorithm::Gp, SeedKind::Gaussian, 1, 1e-3).unwrap();
        assert_eq!(
            base.clone().with_gp_strategy(GpStrategy::Coordinate { sweeps: 0 }),
            Err(ConfigError::GpSteps)
        );
        assert!(matches!(
            base.clone().with_time_step(-1.0),
            Err(ConfigError::Grid(GridError::InvalidStep(_)))
        ));
        assert!(matches!(
            base.with_pt_schedule(PtSchedule { initial: 0.5, decay: 0.9, floor: 0.6 }),
            Err(ConfigError::PtSchedule(_))
        ));
    }

    #[test]
    fn test_pt_schedule_decreases_to_floor() {
        let s = PtSchedule::default();
        assert_abs_diff_eq!(s.step_size(0), 0.5);
        assert!(s.step_size(10) < s.step_size(0));
        assert_abs_diff_eq!(s.step_size(10_000), 0.1);
    }
}
