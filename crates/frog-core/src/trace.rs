//! Measured FROG traces.
//!
//! A [`MeasuredTrace`] is a validated, non-negative `N x N` intensity matrix
//! (rows = delay, columns = frequency) on a [`Grid`]. Raw acquisitions rarely
//! arrive in that shape; [`prepare_trace`] resamples them onto the grid.

use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::grid::{self, Grid, GridError};

/// Failures while validating or preparing a trace.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TraceError {
    #[error("Trace must be square, got {rows} x {cols}")]
    NotSquare { rows: usize, cols: usize },

    #[error(transparent)]
    InvalidGrid(#[from] GridError),

    #[error("Trace entry ({row}, {col}) is {value}; entries must be finite and non-negative")]
    InvalidEntry { row: usize, col: usize, value: f64 },

    #[error("Raw trace is empty ({rows} x {cols})")]
    EmptyRaw { rows: usize, cols: usize },

    #[error("Acquisition {name} step {value} must be finite and positive")]
    InvalidStep { name: &'static str, value: f64 },
}

/// A spectrogram simulated from a candidate field. Same layout as
/// [`MeasuredTrace`]; regenerated every iteration.
pub type TrialSpectrogram = Array2<f64>;

/// A validated measured trace. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct MeasuredTrace {
    data: Array2<f64>,
}

impl MeasuredTrace {
    /// Validate and wrap a delay x frequency intensity matrix.
    pub fn new(data: Array2<f64>) -> Result<Self, TraceError> {
        let (rows, cols) = data.dim();
        if rows != cols {
            return Err(TraceError::NotSquare { rows, cols });
        }
        grid::validate_size(rows)?;
        if let Some(((row, col), &value)) = data
            .indexed_iter()
            .find(|(_, v)| !(v.is_finite() && **v >= 0.0))
        {
            return Err(TraceError::InvalidEntry { row, col, value });
        }
        Ok(Self { data })
    }

    pub fn size(&self) -> usize {
        self.data.nrows()
    }

    pub fn view(&self) -> ArrayView2<'_, f64> {
        self.data.view()
    }

    pub fn into_inner(self) -> Array2<f64> {
        self.data
    }

    /// Sum of every entry.
    pub fn total(&self) -> f64 {
        self.data.sum()
    }

    /// True when every entry is zero.
    pub fn is_degenerate(&self) -> bool {
        self.data.iter().all(|&v| v == 0.0)
    }

    /// Copy rescaled so that its entries sum to `total`. A degenerate trace
    /// is returned unchanged.
    pub fn scaled_to(&self, total: f64) -> Self {
        let current = self.total();
        if current <= 0.0 {
            return self.clone();
        }
        Self {
            data: &self.data * (total / current),
        }
    }

    /// Sum over frequency for each delay row: the intensity autocorrelation.
    pub fn delay_marginal(&self) -> Vec<f64> {
        self.data.rows().into_iter().map(|r| r.sum()).collect()
    }

    /// Element-wise square root: the measured spectral amplitudes.
    pub fn amplitudes(&self) -> Array2<f64> {
        self.data.mapv(f64::sqrt)
    }
}

/// Orientation of a raw acquisition array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TraceLayout {
    /// Rows are delays, columns are frequencies.
    #[default]
    DelayMajor,
    /// Rows are frequencies, columns are delays (one spectrum per column).
    FrequencyMajor,
}

/// Sampling metadata of a raw acquisition.
///
/// Both axes are assumed uniform, with zero delay and zero frequency at index
/// `len / 2` of each raw axis (the grid's own convention).
/// `delay_step` shares units with [`Grid::dt`]; `frequency_step` with
/// [`Grid::df`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionGrid {
    pub delay_step: f64,
    pub frequency_step: f64,
    #[serde(default)]
    pub layout: TraceLayout,
    /// Constant background subtracted before resampling.
    #[serde(default)]
    pub background: f64,
}

/// Resample a raw acquisition onto the `N x N` delay/frequency grid.
///
/// The raw array is reoriented to delay-major, the background is subtracted,
/// values are bilinearly interpolated at each grid point (zero outside the raw
/// span) and negatives are clipped to zero.
pub fn prepare_trace(
    raw: ArrayView2<'_, f64>,
    acquisition: &AcquisitionGrid,
    grid: &Grid,
) -> Result<MeasuredTrace, TraceError> {
    for (name, value) in [
        ("delay", acquisition.delay_step),
        ("frequency", acquisition.frequency_step),
    ] {
        if !(value.is_finite() && value > 0.0) {
            return Err(TraceError::InvalidStep { name, value });
        }
    }
    let oriented = match acquisition.layout {
        TraceLayout::DelayMajor => raw,
        TraceLayout::FrequencyMajor => raw.reversed_axes(),
    };
    let (rows, cols) = oriented.dim();
    if rows == 0 || cols == 0 {
        return Err(TraceError::EmptyRaw { rows, cols });
    }

    let row_centre = (rows / 2) as f64;
    let col_centre = (cols / 2) as f64;
    let delays = grid.delay_axis();
    let freqs = grid.frequency_axis();
    let n = grid.size();

    let sample = |r: usize, c: usize| -> f64 {
        let v = oriented[[r, c]];
        if v.is_finite() {
            v - acquisition.background
        } else {
            0.0
        }
    };

    let mut data = Array2::<f64>::zeros((n, n));
    for (j, &tau) in delays.iter().enumerate() {
        let u = row_centre + tau / acquisition.delay_step;
        for (k, &f) in freqs.iter().enumerate() {
            let v = col_centre + f / acquisition.frequency_step;
            data[[j, k]] = bilinear(u, v, rows, cols, &sample).max(0.0);
        }
    }
    MeasuredTrace::new(data)
}

/// Bilinear interpolation at fractional position `(u, v)`; zero outside.
fn bilinear(u: f64, v: f64, rows: usize, cols: usize, sample: &dyn Fn(usize, usize) -> f64) -> f64 {
    let max_u = (rows - 1) as f64;
    let max_v = (cols - 1) as f64;
    if !(0.0..=max_u).contains(&u) || !(0.0..=max_v).contains(&v) {
        return 0.0;
    }
    let r0 = u.floor() as usize;
    let c0 = v.floor() as usize;
    let r1 = (r0 + 1).min(rows - 1);
    let c1 = (c0 + 1).min(cols - 1);
    let fu = u - r0 as f64;
    let fv = v - c0 as f64;
    let top = sample(r0, c0) * (1.0 - fv) + sample(r0, c1) * fv;
    let bottom = sample(r1, c0) * (1.0 - fv) + sample(r1, c1) * fv;
    top * (1.0 - fu) + bottom * fu
}
