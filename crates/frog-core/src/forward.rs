//! SHG-FROG forward model.
//!
//! For each delay row $\tau_j$ the signal field is the field gated by a
//! delayed copy of itself,
//!
//! $$
//! E_{\text{sig}}(t_k, \tau_j) = E(t_k)\,E(t_k - \tau_j),
//! $$
//!
//! with the gate taken as zero outside the time window. Each row is Fourier
//! transformed over $t$ and its squared magnitude becomes one row of the
//! simulated spectrogram:
//!
//! $$
//! I_{\text{FROG}}(\omega, \tau) = \left| \sum_k E_{\text{sig}}(t_k, \tau)\, e^{-i\omega t_k} \right|^2
//! $$
//!
//! Rows are independent, so they are scheduled through the
//! [`ComputeBackend`]; the result does not depend on the backend.

use std::sync::Arc;

use frog_compute::ComputeBackend;
use ndarray::Array2;
use num_complex::Complex64;

use crate::fft::Spectral;
use crate::field::ComplexField;
use crate::grid::Grid;
use crate::solver::SolverError;
use crate::trace::TrialSpectrogram;

/// Simulates spectrograms from candidate fields on a fixed grid.
///
/// Holds only immutable state, so one model can serve concurrent calls for
/// different fields.
#[derive(Clone)]
pub struct ForwardModel {
    grid: Grid,
    spectral: Spectral,
    backend: Arc<dyn ComputeBackend>,
}

impl ForwardModel {
    pub fn new(grid: Grid, backend: Arc<dyn ComputeBackend>) -> Self {
        Self {
            grid,
            spectral: Spectral::new(grid.size()),
            backend,
        }
    }

    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    pub fn spectral(&self) -> &Spectral {
        &self.spectral
    }

    pub fn backend(&self) -> &dyn ComputeBackend {
        self.backend.as_ref()
    }

    /// Time-domain signal field, rows = delay, columns = time.
    pub fn signal_field(&self, field: &ComplexField) -> Result<Array2<Complex64>, SolverError> {
        self.check_len(field)?;
        let n = self.grid.size();
        let samples = field.as_slice();
        let out = self.backend.map_rows(n, n, &|j, row: &mut [Complex64]| {
            signal_row(&self.grid, samples, j, row);
        })?;
        Ok(out)
    }

    /// Frequency-domain signal field on the centred frequency axis,
    /// rows = delay, columns = frequency. Phase is kept.
    pub fn signal_spectrum(&self, field: &ComplexField) -> Result<Array2<Complex64>, SolverError> {
        self.check_len(field)?;
        let n = self.grid.size();
        let samples = field.as_slice();
        let out = self.backend.map_rows(n, n, &|j, row: &mut [Complex64]| {
            signal_row(&self.grid, samples, j, row);
            self.spectral.forward_centred(row);
        })?;
        Ok(out)
    }

    /// Simulated spectrogram $|E_{\text{sig}}(\omega, \tau)|^2$.
    pub fn simulate(&self, field: &ComplexField) -> Result<TrialSpectrogram, SolverError> {
        Ok(self.signal_spectrum(field)?.mapv(|c| c.norm_sqr()))
    }

    fn check_len(&self, field: &ComplexField) -> Result<(), SolverError> {
        if field.len() != self.grid.size() {
            return Err(SolverError::DimensionMismatch {
                expected: self.grid.size(),
                found: field.len(),
            });
        }
        Ok(())
    }
}

/// Fill `out` with the time-domain signal of delay row `row`.
pub fn signal_row(grid: &Grid, field: &[Complex64], row: usize, out: &mut [Complex64]) {
    for (k, v) in out.iter_mut().enumerate() {
        *v = match grid.gate_index(k, row) {
            Some(m) => field[k] * field[m],
            None => Complex64::new(0.0, 0.0),
        };
    }
}
