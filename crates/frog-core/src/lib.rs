//! # FROG Core
//!
//! The numerical backbone of the FROG retrieval toolkit. This crate
//! reconstructs the complex time-domain field of an ultrafast pulse from a
//! measured SHG-FROG trace (intensity indexed by delay and frequency).
//!
//! ## Architecture
//!
//! Both retrieval methods implement the [`solver::Reconstructor`] trait, which
//! performs exactly one outer iteration. The [`controller`] owns the loop,
//! the convergence/abort/iteration-cap logic and progress reporting.
//!
//! ## Modules
//!
//! - [`grid`]: Discrete time/frequency/delay sampling.
//! - [`field`]: The complex pulse field and derived pulse profiles.
//! - [`trace`]: Validated measured traces and raw-trace preparation.
//! - [`fft`]: Planned, centred FFTs along the time axis.
//! - [`forward`]: SHG signal field and simulated spectrogram.
//! - [`seed`]: Initial field estimates.
//! - [`metric`]: G error and ambiguity-aware field comparison.
//! - [`solver`]: Generalized projections and ptychographic reconstructors.
//! - [`config`]: Typed, eagerly validated run configuration.
//! - [`controller`]: Reconstruction state machine and background runs.
//! - [`types`]: State, status and result containers.

pub mod config;
pub mod controller;
pub mod fft;
pub mod field;
pub mod forward;
pub mod grid;
pub mod metric;
pub mod seed;
pub mod solver;
pub mod trace;
pub mod types;

pub use config::{Algorithm, Config, ConfigError, GpStrategy, PtSchedule, SeedKind, SeedOptions};
pub use controller::{
    spawn, start, CancelToken, ProgressFn, Reconstruction, RetrievalError, RetrievalHandle,
};
pub use field::ComplexField;
pub use grid::{Grid, GridError};
pub use trace::{MeasuredTrace, TraceError};
pub use types::{Progress, ReconstructionState, RetrievalResult, Status};
