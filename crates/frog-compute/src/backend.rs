//! Compute backend trait and device abstraction.
//!
//! The [`ComputeBackend`] trait abstracts over execution strategies so that
//! the forward model and projection code in `frog-core` remain
//! scheduling-agnostic.

use ndarray::Array2;
use num_complex::Complex64;
use thiserror::Error;

/// Errors originating from compute backends.
#[derive(Debug, Error)]
pub enum ComputeError {
    #[error("Shape error: {0}")]
    Shape(String),
}

/// Describes the capabilities of a compute backend.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub name: String,
    pub backend_type: BackendType,
    pub worker_threads: usize,
}

/// The type of compute backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendType {
    Cpu,
    Serial,
}

/// A row kernel: receives the row index and the row buffer (zero-initialised)
/// and fills it in place.
pub type RowFn<'a> = dyn Fn(usize, &mut [Complex64]) + Send + Sync + 'a;

/// Abstraction over compute backends.
///
/// The hot paths of a retrieval iteration (building the signal field and
/// transforming it row by row) are embarrassingly parallel across delays.
/// Implementations decide how those rows are scheduled.
pub trait ComputeBackend: Send + Sync {
    /// Return information about the device.
    fn device_info(&self) -> DeviceInfo;

    /// Build a `rows x cols` complex matrix by running `row_fn` once per row.
    ///
    /// `row_fn` must depend only on its row index and captured immutable
    /// state; rows may be filled concurrently and in any order.
    fn map_rows(
        &self,
        rows: usize,
        cols: usize,
        row_fn: &RowFn<'_>,
    ) -> Result<Array2<Complex64>, ComputeError>;
}

/// Allocate the flat buffer shared by every backend implementation.
pub(crate) fn zeroed(rows: usize, cols: usize) -> Result<Vec<Complex64>, ComputeError> {
    let len = rows
        .checked_mul(cols)
        .ok_or_else(|| ComputeError::Shape(format!("{rows} x {cols} overflows usize")))?;
    Ok(vec![Complex64::new(0.0, 0.0); len])
}
