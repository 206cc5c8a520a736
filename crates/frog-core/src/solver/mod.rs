//! Reconstructor abstraction and implementations.
//!
//! The [`Reconstructor`] trait is one outer iteration of an iterative phase
//! retrieval. Generalized projections ([`gp`]) and the ptychographic update
//! ([`pt`]) both implement it; the [`controller`](crate::controller) decides
//! when to call it and what to do with the result.

pub mod gp;
pub mod pt;

use frog_compute::ComputeError;
use ndarray::{Array2, ArrayView1, ArrayView2};
use num_complex::Complex64;
use thiserror::Error;

use crate::config::{Algorithm, Config};
use crate::fft::Spectral;
use crate::field::ComplexField;
use crate::forward::ForwardModel;
use crate::metric::{self, ErrorEstimate};
use crate::trace::MeasuredTrace;

pub use gp::GeneralizedProjections;
pub use pt::Ptychographic;

/// Errors that can occur inside a reconstruction step.
///
/// Numerical failure is not an error: a step that produces non-finite values
/// returns them, and the controller turns that into a diverged run.
#[derive(Debug, Error)]
pub enum SolverError {
    #[error("Dimension mismatch: expected {expected} samples, found {found}")]
    DimensionMismatch { expected: usize, found: usize },

    #[error("Compute backend error: {0}")]
    Compute(#[from] ComputeError),
}

/// The measured data a reconstructor fits, prepared once per run.
///
/// The trace is rescaled to total power `N`, which is what a unit-energy
/// field produces, so the magnitude projection and the energy normalisation
/// agree on scale.
#[derive(Debug, Clone)]
pub struct RetrievalTarget {
    trace: MeasuredTrace,
    amplitude: Array2<f64>,
}

impl RetrievalTarget {
    pub fn new(trace: &MeasuredTrace) -> Self {
        let trace = trace.scaled_to(trace.size() as f64);
        let amplitude = trace.amplitudes();
        Self { trace, amplitude }
    }

    pub fn size(&self) -> usize {
        self.trace.size()
    }

    /// The rescaled trace.
    pub fn trace(&self) -> &MeasuredTrace {
        &self.trace
    }

    /// $\sqrt{M}$, rows = delay, columns = frequency.
    pub fn amplitude(&self) -> ArrayView2<'_, f64> {
        self.amplitude.view()
    }

    /// G error of a trial spectrogram against this target.
    pub fn error(&self, trial: ArrayView2<'_, f64>) -> ErrorEstimate {
        metric::g_error(trial, self.trace.view())
    }
}

/// Result of one outer iteration.
#[derive(Debug, Clone)]
pub struct StepOutput {
    /// Updated, energy-normalised field. May be non-finite after numerical
    /// failure.
    pub field: ComplexField,
    /// G error of `field`.
    pub error: ErrorEstimate,
}

/// One outer iteration of an iterative retrieval.
///
/// Implementations must be deterministic: the same field, target and
/// iteration index always give the same output.
pub trait Reconstructor: Send {
    /// Run one outer iteration from `field`. `iteration` is the zero-based
    /// index of the iteration being run.
    fn step(
        &mut self,
        field: &ComplexField,
        target: &RetrievalTarget,
        iteration: usize,
    ) -> Result<StepOutput, SolverError>;

    /// Human-readable name of the method.
    fn name(&self) -> &str;
}

/// Build the reconstructor selected by `config`.
pub fn reconstructor_for(config: &Config, model: ForwardModel) -> Box<dyn Reconstructor> {
    match config.algorithm {
        Algorithm::Gp => Box::new(GeneralizedProjections::new(model, config.gp_strategy)),
        Algorithm::Pt => Box::new(Ptychographic::new(model, config.pt_schedule)),
    }
}

/// Replace the spectral magnitude of one time-domain signal row with
/// `amplitude`, keeping the phase of the current transform. Where the
/// current transform vanishes the phase is taken as zero.
pub fn project_row(spectral: &Spectral, amplitude: ArrayView1<'_, f64>, row: &mut [Complex64]) {
    spectral.forward_centred(row);
    for (c, &a) in row.iter_mut().zip(amplitude.iter()) {
        let mag = c.norm();
        *c = if mag > 0.0 {
            *c * (a / mag)
        } else {
            Complex64::new(a, 0.0)
        };
    }
    spectral.inverse_centred(row);
}

pub(crate) fn check_sizes(
    model: &ForwardModel,
    field: &ComplexField,
    target: &RetrievalTarget,
) -> Result<(), SolverError> {
    let expected = model.grid().size();
    for found in [field.len(), target.size()] {
        if found != expected {
            return Err(SolverError::DimensionMismatch { expected, found });
        }
    }
    Ok(())
}

/// Normalise, simulate and score a freshly updated field.
pub(crate) fn finish_step(
    model: &ForwardModel,
    updated: ComplexField,
    target: &RetrievalTarget,
) -> Result<StepOutput, SolverError> {
    let field = match updated.normalised() {
        Some(field) => field,
        None => updated,
    };
    let trial = model.simulate(&field)?;
    let error = target.error(trial.view());
    Ok(StepOutput { field, error })
}
