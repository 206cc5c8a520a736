//! Initial field estimates.
//!
//! The delay marginal of an SHG-FROG trace (the trace summed over frequency)
//! is the intensity autocorrelation of the pulse. Both generated seeds are
//! derived from it:
//!
//! - [`SeedKind::Autocorrelation`]: amplitude $\sqrt{A(\tau_j)}$ placed on the
//!   time axis, flat phase plus optional seeded random phase.
//! - [`SeedKind::Gaussian`]: a transform-limited Gaussian whose intensity RMS
//!   width is $\sigma_A / \sqrt{2}$, since the autocorrelation of a pulse is
//!   $\sqrt{2}$ times as wide as its intensity.

use num_complex::Complex64;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;

use crate::config::{SeedKind, SeedOptions};
use crate::field::ComplexField;
use crate::grid::Grid;
use crate::trace::MeasuredTrace;

/// Narrowest generated Gaussian seed, in time steps.
const MIN_SEED_WIDTH: f64 = 0.5;

/// Seeding failures. Raised before the first iteration.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SeedError {
    #[error("Cannot seed from a degenerate (all-zero) trace")]
    DegenerateTrace,

    #[error("Seed field has {found} samples but the grid has {expected}")]
    LengthMismatch { expected: usize, found: usize },

    #[error("Custom seed field contains non-finite samples")]
    NonFinite,

    #[error("Custom seed field is zero")]
    ZeroField,
}

/// Produce the initial field for a run. Generated seeds have unit energy;
/// a custom seed is returned as supplied.
pub fn initial_field(
    trace: &MeasuredTrace,
    kind: &SeedKind,
    options: &SeedOptions,
    grid: &Grid,
) -> Result<ComplexField, SeedError> {
    if trace.size() != grid.size() {
        return Err(SeedError::LengthMismatch {
            expected: grid.size(),
            found: trace.size(),
        });
    }
    if trace.is_degenerate() {
        return Err(SeedError::DegenerateTrace);
    }

    match kind {
        SeedKind::Autocorrelation => autocorrelation_seed(trace, options),
        SeedKind::Gaussian => gaussian_seed(trace, grid),
        SeedKind::Custom(field) => {
            validate_custom(field, grid)?;
            Ok(field.clone())
        }
    }
}

fn autocorrelation_seed(trace: &MeasuredTrace, options: &SeedOptions) -> Result<ComplexField, SeedError> {
    let marginal = trace.delay_marginal();
    let mut rng = StdRng::seed_from_u64(options.rng_seed);
    let noise = options.phase_noise;
    let field = ComplexField::new(
        marginal
            .iter()
            .map(|&a| {
                let phase = if noise > 0.0 { rng.gen_range(-noise..=noise) } else { 0.0 };
                Complex64::from_polar(a.max(0.0).sqrt(), phase)
            })
            .collect(),
    );
    field.normalised().ok_or(SeedError::DegenerateTrace)
}

fn gaussian_seed(trace: &MeasuredTrace, grid: &Grid) -> Result<ComplexField, SeedError> {
    let marginal = trace.delay_marginal();
    let delays = grid.delay_axis();
    let total: f64 = marginal.iter().sum();
    if !(total.is_finite() && total > 0.0) {
        return Err(SeedError::DegenerateTrace);
    }
    let mean = marginal.iter().zip(&delays).map(|(w, t)| w * t).sum::<f64>() / total;
    let variance = marginal
        .iter()
        .zip(&delays)
        .map(|(w, t)| w * (t - mean) * (t - mean))
        .sum::<f64>()
        / total;

    let width = (variance / 2.0).sqrt().max(MIN_SEED_WIDTH * grid.dt());
    log::debug!("Gaussian seed: autocorrelation RMS {:.4}, pulse RMS {width:.4}", variance.sqrt());
    grid.gaussian_field(width, 0.0)
        .normalised()
        .ok_or(SeedError::DegenerateTrace)
}

fn validate_custom(field: &ComplexField, grid: &Grid) -> Result<(), SeedError> {
    if field.len() != grid.size() {
        return Err(SeedError::LengthMismatch {
            expected: grid.size(),
            found: field.len(),
        });
    }
    if !field.is_finite() {
        return Err(SeedError::NonFinite);
    }
    if field.energy() == 0.0 {
        return Err(SeedError::ZeroField);
    }
    Ok(())
}
