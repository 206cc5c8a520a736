//! Single-threaded backend. Useful for debugging and for callers that already
//! run several retrievals in parallel.

use ndarray::Array2;
use num_complex::Complex64;

use crate::backend::{zeroed, BackendType, ComputeBackend, ComputeError, DeviceInfo, RowFn};

/// Runs every row in index order on the calling thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct SerialBackend;

impl ComputeBackend for SerialBackend {
    fn device_info(&self) -> DeviceInfo {
        DeviceInfo {
            name: "Serial".into(),
            backend_type: BackendType::Serial,
            worker_threads: 1,
        }
    }

    fn map_rows(
        &self,
        rows: usize,
        cols: usize,
        row_fn: &RowFn<'_>,
    ) -> Result<Array2<Complex64>, ComputeError> {
        let mut data = zeroed(rows, cols)?;
        if cols > 0 {
            for (i, row) in data.chunks_mut(cols).enumerate() {
                row_fn(i, row);
            }
        }
        Array2::from_shape_vec((rows, cols), data).map_err(|e| ComputeError::Shape(e.to_string()))
    }
}
