//! # FROG Compute
//!
//! Compute backend abstraction for the FROG retrieval engine. This crate
//! provides a [`ComputeBackend`](backend::ComputeBackend) trait that isolates
//! the numerics in `frog-core` from how per-delay row work is scheduled.
//!
//! ## Available backends
//!
//! | Backend | Feature flag | Status |
//! |---------|-------------|--------|
//! | CPU (Rayon) | `cpu` (default) | Implemented |
//! | Serial | always | Implemented |
//!
//! Every backend must produce bit-identical output: rows are independent, so
//! scheduling order never changes a result.

pub mod backend;
pub mod serial;

#[cfg(feature = "cpu")]
pub mod cpu;

pub use backend::{BackendType, ComputeBackend, ComputeError, DeviceInfo, RowFn};
pub use serial::SerialBackend;

#[cfg(feature = "cpu")]
pub use cpu::CpuBackend;

/// The default backend for this build: Rayon when the `cpu` feature is on,
/// otherwise the serial backend.
pub fn default_backend() -> std::sync::Arc<dyn ComputeBackend> {
    #[cfg(feature = "cpu")]
    {
        std::sync::Arc::new(CpuBackend::new())
    }
    #[cfg(not(feature = "cpu"))]
    {
        std::sync::Arc::new(SerialBackend)
    }
}
