//! CPU compute backend using Rayon for shared-memory parallelism.

use ndarray::Array2;
use num_complex::Complex64;
use rayon::prelude::*;

use crate::backend::{zeroed, BackendType, ComputeBackend, ComputeError, DeviceInfo, RowFn};

/// CPU backend that parallelises rows across threads via Rayon.
pub struct CpuBackend {
    num_threads: usize,
}

impl CpuBackend {
    /// Create a new CPU backend using the global Rayon pool.
    pub fn new() -> Self {
        Self {
            num_threads: rayon::current_num_threads(),
        }
    }
}

impl Default for CpuBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl ComputeBackend for CpuBackend {
    fn device_info(&self) -> DeviceInfo {
        DeviceInfo {
            name: format!("CPU ({} threads)", self.num_threads),
            backend_type: BackendType::Cpu,
            worker_threads: self.num_threads,
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
            data.par_chunks_mut(cols)
                .enumerate()
                .for_each(|(i, row)| row_fn(i, row));
        }
        Array2::from_shape_vec((rows, cols), data).map_err(|e| ComputeError::Shape(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serial::SerialBackend;

    fn kernel(i: usize, row: &mut [Complex64]) {
        for (j, v) in row.iter_mut().enumerate() {
            *v = Complex64::new((i * 31 + j) as f64, (i as f64).sin() * j as f64);
        }
    }

    #[test]
    fn test_cpu_matches_serial() {
        let cpu = CpuBackend::new().map_rows(37, 16, &kernel).unwrap();
        let serial = SerialBackend.map_rows(37, 16, &kernel).unwrap();
        assert_eq!(cpu, serial);
    }

    #[test]
    fn test_empty_columns() {
        let out = CpuBackend::new().map_rows(4, 0, &kernel).unwrap();
        assert_eq!(out.dim(), (4, 0));
    }
}
