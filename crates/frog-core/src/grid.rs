//! Discrete sampling shared by every stage of a retrieval.
//!
//! A [`Grid`] of `N` samples with time step `dt` defines three axes:
//!
//! - time: $t_k = (k - N/2)\,\Delta t$
//! - delay: $\tau_j = (j - N/2)\,\Delta t$ (the delay step equals `dt`)
//! - frequency: $f_k = (k - N/2)\,\Delta f$ with $\Delta f = 1/(N\,\Delta t)$
//!
//! Row `j` of a trace is the spectrum recorded at delay $\tau_j$; column `k`
//! is frequency $f_k$.

use num_complex::Complex64;
use thiserror::Error;

use crate::field::ComplexField;

/// Smallest grid the forward model and delay indexing support.
pub const MIN_GRID_SIZE: usize = 16;

/// Grid validation failures.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GridError {
    #[error("Invalid grid: size {0} is odd (transform and delay indexing need an even size)")]
    OddSize(usize),

    #[error("Invalid grid: size {size} is below the minimum of {min}")]
    TooSmall { size: usize, min: usize },

    #[error("Invalid grid: time step {0} must be finite and positive")]
    InvalidStep(f64),
}

/// Validate a sample count without building a grid.
pub fn validate_size(n: usize) -> Result<(), GridError> {
    // Parity first: an odd size is reported as odd whatever its magnitude.
    if n % 2 != 0 {
        return Err(GridError::OddSize(n));
    }
    if n < MIN_GRID_SIZE {
        return Err(GridError::TooSmall {
            size: n,
            min: MIN_GRID_SIZE,
        });
    }
    Ok(())
}

/// Immutable description of the discrete time/frequency/delay sampling.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Grid {
    n: usize,
    dt: f64,
}

impl Grid {
    /// Create a grid of `n` samples spaced by `dt`.
    pub fn new(n: usize, dt: f64) -> Result<Self, GridError> {
        validate_size(n)?;
        if !(dt.is_finite() && dt > 0.0) {
            return Err(GridError::InvalidStep(dt));
        }
        Ok(Self { n, dt })
    }

    /// Number of samples along every axis.
    pub fn size(&self) -> usize {
        self.n
    }

    /// Time step (also the delay step).
    pub fn dt(&self) -> f64 {
        self.dt
    }

    /// Frequency step $\Delta f = 1/(N\,\Delta t)$.
    pub fn df(&self) -> f64 {
        1.0 / (self.n as f64 * self.dt)
    }

    /// Index of the zero-time / zero-delay / zero-frequency sample.
    pub fn centre(&self) -> usize {
        self.n / 2
    }

    pub fn time_axis(&self) -> Vec<f64> {
        self.axis(self.dt)
    }

    pub fn delay_axis(&self) -> Vec<f64> {
        self.axis(self.dt)
    }

    pub fn frequency_axis(&self) -> Vec<f64> {
        self.axis(self.df())
    }

    /// Integer sample shift of delay row `row`: $\tau_j / \Delta t = j - N/2$.
    pub fn delay_shift(&self, row: usize) -> isize {
        row as isize - self.centre() as isize
    }

    /// Index of the gate sample $E(t_k - \tau_j)$ for time index `k` in delay
    /// row `row`, or `None` when it falls outside the window.
    pub fn gate_index(&self, k: usize, row: usize) -> Option<usize> {
        let m = k as isize - self.delay_shift(row);
        if m >= 0 && (m as usize) < self.n {
            Some(m as usize)
        } else {
            None
        }
    }

    /// The all-zero field on this grid.
    pub fn zero_field(&self) -> ComplexField {
        ComplexField::zeros(self.n)
    }

    /// A Gaussian pulse centred at $t = 0$.
    ///
    /// `rms_width` is the RMS width of the intensity $|E|^2$ in time units;
    /// `chirp` is the quadratic phase coefficient $b$ in $\phi(t) = b t^2$.
    pub fn gaussian_field(&self, rms_width: f64, chirp: f64) -> ComplexField {
        let w2 = rms_width * rms_width;
        ComplexField::from_fn(self.n, |k| {
            let t = (k as f64 - self.centre() as f64) * self.dt;
            let envelope = (-t * t / (4.0 * w2)).exp();
            Complex64::from_polar(envelope, chirp * t * t)
        })
    }

    fn axis(&self, step: f64) -> Vec<f64> {
        let c = self.centre() as f64;
        (0..self.n).map(|k| (k as f64 - c) * step).collect()
    }
}
