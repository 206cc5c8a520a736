//! Reconstruction state machine.
//!
//! [`Reconstruction`] owns one run: seed, target, reconstructor and
//! [`ReconstructionState`]. Each [`step`](Reconstruction::step) runs one
//! outer iteration, records its error and applies the transition rules in
//! this order:
//!
//! 1. non-finite error or field: `Diverged`, previous field kept
//! 2. `g <= tolerance`: `Converged`
//! 3. iteration cap reached: `MaxIterationsReached`
//!
//! Cancellation is checked only between iterations, so an iteration in
//! progress always completes. [`start`] runs the same loop on a background
//! thread and publishes a copy of the state after every iteration.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use frog_compute::ComputeBackend;
use parking_lot::Mutex;
use thiserror::Error;

use crate::config::{Config, ConfigError};
use crate::field;
use crate::forward::ForwardModel;
use crate::grid::Grid;
use crate::seed::{self, SeedError};
use crate::solver::{self, Reconstructor, RetrievalTarget, SolverError};
use crate::trace::{MeasuredTrace, TraceError};
use crate::types::{Progress, ReconstructionState, RetrievalResult, Status};

/// Errors that prevent a run from starting or continuing.
#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Trace(#[from] TraceError),

    #[error(transparent)]
    Seed(#[from] SeedError),

    #[error(transparent)]
    Solver(#[from] SolverError),

    #[error("Trace is {field} x {field} but the configured grid has {grid} samples")]
    DimensionMismatch { field: usize, grid: usize },

    #[error("Retrieval worker thread panicked")]
    WorkerPanicked,
}

/// Progress callback used by background runs.
pub type ProgressFn = Box<dyn FnMut(Progress) + Send>;

/// Cooperative cancellation flag, optionally with a wall-clock deadline.
///
/// Clones share the flag. A passed deadline reads as a cancellation.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token that also cancels once `timeout` has elapsed from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            flag: Arc::default(),
            deadline: Instant::now().checked_add(timeout),
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst) || self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}

/// A single reconstruction run, driven synchronously.
pub struct Reconstruction {
    config: Config,
    model: ForwardModel,
    target: RetrievalTarget,
    solver: Box<dyn Reconstructor>,
    state: ReconstructionState,
}

impl Reconstruction {
    /// Validate the inputs and seed a run on the default compute backend.
    pub fn new(config: Config, trace: &MeasuredTrace) -> Result<Self, RetrievalError> {
        Self::with_backend(config, trace, frog_compute::default_backend())
    }

    pub fn with_backend(
        config: Config,
        trace: &MeasuredTrace,
        backend: Arc<dyn ComputeBackend>,
    ) -> Result<Self, RetrievalError> {
        config.validate()?;
        let grid = config.grid().map_err(ConfigError::from)?;
        if trace.size() != grid.size() {
            return Err(RetrievalError::DimensionMismatch {
                field: trace.size(),
                grid: grid.size(),
            });
        }

        let seed = seed::initial_field(trace, &config.seed, &config.seed_options, &grid)?;
        let model = ForwardModel::new(grid, backend);
        let target = RetrievalTarget::new(trace);
        let seed_error = target.error(model.simulate(&seed)?.view()).g;
        let solver = solver::reconstructor_for(&config, model.clone());

        log::info!(
            "{} retrieval on {n}x{n} grid (dt = {}), seed g = {seed_error:.4e}, backend {}",
            solver.name(),
            grid.dt(),
            model.backend().device_info().name,
            n = grid.size(),
        );

        Ok(Self {
            config,
            model,
            target,
            solver,
            state: ReconstructionState::new(seed, seed_error),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn grid(&self) -> &Grid {
        self.model.grid()
    }

    pub fn model(&self) -> &ForwardModel {
        &self.model
    }

    pub fn state(&self) -> &ReconstructionState {
        &self.state
    }

    /// Copy of the current state.
    pub fn snapshot(&self) -> ReconstructionState {
        self.state.clone()
    }

    pub fn status(&self) -> Status {
        self.state.status
    }

    /// Mark a running reconstruction as aborted. No effect once terminal.
    pub fn abort(&mut self) {
        if self.state.status == Status::Running {
            self.state.status = Status::Aborted;
            log::info!("Retrieval aborted after {} iterations", self.state.iteration);
        }
    }

    /// Run one outer iteration. A terminal run is left untouched.
    pub fn step(&mut self) -> Result<Status, RetrievalError> {
        if self.state.status.is_terminal() {
            return Ok(self.state.status);
        }

        let out = self.solver.step(&self.state.field, &self.target, self.state.iteration)?;
        let state = &mut self.state;
        state.iteration += 1;
        let g = out.error.g;
        state.errors.push(g);

        if !(g.is_finite() && out.field.is_finite()) {
            state.status = Status::Diverged;
            log::warn!("Retrieval diverged at iteration {} (g = {g})", state.iteration);
            return Ok(state.status);
        }

        state.field = out.field;
        if g < state.best_error || !state.best_error.is_finite() {
            state.best_error = g;
            state.best_field = state.field.clone();
        }
        if g <= self.config.tolerance {
            state.status = Status::Converged;
        } else if state.iteration >= self.config.max_iterations {
            state.status = Status::MaxIterationsReached;
        }

        log::debug!("iteration {}: g = {g:.6e} ({})", state.iteration, state.status);
        if state.status.is_terminal() {
            log::info!(
                "Retrieval {} after {} iterations, g = {g:.4e}",
                state.status,
                state.iteration
            );
        }
        Ok(state.status)
    }

    /// Iterate until a terminal status, checking `cancel` before every step
    /// and reporting each completed iteration to `progress`.
    pub fn run(
        &mut self,
        cancel: &CancelToken,
        mut progress: impl FnMut(Progress),
    ) -> Result<Status, RetrievalError> {
        self.run_observed(cancel, |state| progress(Progress::from(state)))
    }

    fn run_observed(
        &mut self,
        cancel: &CancelToken,
        mut observe: impl FnMut(&ReconstructionState),
    ) -> Result<Status, RetrievalError> {
        while !self.state.status.is_terminal() {
            if cancel.is_cancelled() {
                self.abort();
                break;
            }
            self.step()?;
            observe(&self.state);
        }
        Ok(self.state.status)
    }

    /// Consume the run and assemble its result.
    pub fn into_result(self) -> RetrievalResult {
        let grid = *self.model.grid();
        let state = self.state;
        let spectrum = state.field.spectrum(self.model.spectral());
        RetrievalResult {
            duration_fwhm: field::fwhm(&state.field.intensity(), grid.dt()),
            bandwidth_fwhm: field::fwhm(&spectrum.intensity(), grid.df()),
            spectrum,
            field: state.field,
            best_field: state.best_field,
            best_error: state.best_error,
            errors: state.errors,
            status: state.status,
            iterations: state.iteration,
        }
    }
}

/// Handle to a reconstruction running on a background thread.
pub struct RetrievalHandle {
    cancel: CancelToken,
    shared: Arc<Mutex<ReconstructionState>>,
    worker: JoinHandle<Result<RetrievalResult, RetrievalError>>,
}

impl RetrievalHandle {
    /// Request cancellation. Takes effect at the next iteration boundary.
    pub fn abort(&self) {
        self.cancel.cancel();
    }

    /// Copy of the state as of the last completed iteration.
    pub fn status(&self) -> ReconstructionState {
        self.shared.lock().clone()
    }

    pub fn is_finished(&self) -> bool {
        self.worker.is_finished()
    }

    /// Wait for the run to end and take its result.
    pub fn join(self) -> Result<RetrievalResult, RetrievalError> {
        self.worker.join().map_err(|_| RetrievalError::WorkerPanicked)?
    }
}

/// Validate, seed and launch a background reconstruction on the default
/// compute backend.
///
/// Input and seeding errors are returned here; the run never starts.
pub fn start(
    config: Config,
    trace: &MeasuredTrace,
    progress: Option<ProgressFn>,
) -> Result<RetrievalHandle, RetrievalError> {
    let reconstruction = Reconstruction::new(config, trace)?;
    Ok(spawn(reconstruction, progress, CancelToken::new()))
}

/// Run an already seeded reconstruction on a background thread, cancelled
/// through `cancel` (which may carry a timeout).
///
/// If a step fails, the published state ends as [`Status::Aborted`] and
/// [`RetrievalHandle::join`] returns the error.
pub fn spawn(
    mut reconstruction: Reconstruction,
    mut progress: Option<ProgressFn>,
    cancel: CancelToken,
) -> RetrievalHandle {
    let shared = Arc::new(Mutex::new(reconstruction.snapshot()));

    let worker = {
        let shared = Arc::clone(&shared);
        let cancel = cancel.clone();
        thread::spawn(move || -> Result<RetrievalResult, RetrievalError> {
            let outcome = reconstruction.run_observed(&cancel, |state| {
                *shared.lock() = state.clone();
                if let Some(report) = progress.as_mut() {
                    report(Progress::from(state));
                }
            });
            if outcome.is_err() {
                // The error itself is returned by `join`; pollers see a
                // terminal status.
                reconstruction.abort();
            }
            *shared.lock() = reconstruction.snapshot();
            outcome?;
            Ok(reconstruction.into_result())
        })
    };

    RetrievalHandle {
        cancel,
        shared,
        worker,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Algorithm, SeedKind};
    use frog_compute::{ComputeError, SerialBackend};
    use std::sync::atomic::AtomicUsize;
    use ndarray::Array2;

    fn reference_trace(n: usize) -> MeasuredTrace {
        let grid = Grid::new(n, 1.0).unwrap();
        let model = ForwardModel::new(grid, Arc::new(SerialBackend));
        let field = grid.gaussian_field(2.0, 0.1).normalised().unwrap();
        MeasuredTrace::new(model.simulate(&field).unwrap()).unwrap()
    }

    fn config(n: usize, max_iterations: usize) -> Config {
        Config::new(n, Algorithm::Gp, SeedKind::Autocorrelation, max_iterations, 1e-12).unwrap()
    }

    #[test]
    fn test_iteration_cap() {
        let trace = reference_trace(16);
        let mut r = Reconstruction::new(config(16, 3), &trace).unwrap();
        let status = r.run(&CancelToken::new(), |_| {}).unwrap();
        assert_eq!(status, Status::MaxIterationsReached);
        assert_eq!(r.state().iteration, 3);
        assert_eq!(r.state().errors.len(), 3);
        // Terminal runs ignore further steps.
        assert_eq!(r.step().unwrap(), Status::MaxIterationsReached);
        assert_eq!(r.state().iteration, 3);
    }

    #[test]
    fn test_abort_before_first_step_returns_seed() {
        let trace = reference_trace(16);
        let mut r = Reconstruction::new(config(16, 50), &trace).unwrap();
        let seed = r.state().field.clone();
        let cancel = CancelToken::new();
        cancel.cancel();
        let mut calls = 0;
        assert_eq!(r.run(&cancel, |_| calls += 1).unwrap(), Status::Aborted);
        assert_eq!(calls, 0);
        let result = r.into_result();
        assert_eq!(result.field, seed);
        assert!(result.errors.is_empty());
        assert_eq!(result.iterations, 0);
    }

    #[test]
    fn test_expired_deadline_aborts() {
        let token = CancelToken::with_timeout(Duration::ZERO);
        assert!(token.is_cancelled());
        assert!(!CancelToken::with_timeout(Duration::from_secs(3600)).is_cancelled());
    }

    #[test]
    fn test_progress_reported_once_per_iteration() {
        let trace = reference_trace(16);
        let mut r = Reconstruction::new(config(16, 4), &trace).unwrap();
        let mut seen = Vec::new();
        r.run(&CancelToken::new(), |p| seen.push(p)).unwrap();
        let iterations: Vec<usize> = seen.iter().map(|p| p.iteration).collect();
        assert_eq!(iterations, vec![1, 2, 3, 4]);
        assert_eq!(seen.last().unwrap().status, Status::MaxIterationsReached);
        assert!(seen[..3].iter().all(|p| p.status == Status::Running));
        assert_eq!(seen[2].g, r.state().errors[2]);
    }

    #[test]
    fn test_size_mismatch_is_rejected() {
        let trace = reference_trace(32);
        let err = Reconstruction::new(config(16, 4), &trace).err().unwrap();
        assert!(matches!(err, RetrievalError::DimensionMismatch { field: 32, grid: 16 }));
    }

    #[test]
    fn test_degenerate_trace_never_starts() {
        let trace = MeasuredTrace::new(Array2::zeros((16, 16))).unwrap();
        let err = start(config(16, 4), &trace, None).err().unwrap();
        assert!(matches!(err, RetrievalError::Seed(SeedError::DegenerateTrace)));
    }

    #[test]
    fn test_best_field_tracks_lowest_error() {
        let trace = reference_trace(16);
        let mut r = Reconstruction::new(config(16, 10), &trace).unwrap();
        r.run(&CancelToken::new(), |_| {}).unwrap();
        let state = r.state();
        let min = state.errors.iter().cloned().fold(f64::INFINITY, f64::min);
        assert!(state.best_error <= min);
    }

    /// Serial backend that fails every call after the first `ok` calls.
    struct FailingBackend {
        ok: usize,
        calls: AtomicUsize,
    }

    impl ComputeBackend for FailingBackend {
        fn device_info(&self) -> frog_compute::DeviceInfo {
            SerialBackend.device_info()
        }

        fn map_rows(
            &self,
            rows: usize,
            cols: usize,
            row_fn: &frog_compute::RowFn<'_>,
        ) -> Result<Array2<num_complex::Complex64>, ComputeError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) < self.ok {
                SerialBackend.map_rows(rows, cols, row_fn)
            } else {
                Err(ComputeError::Shape("backend failure".into()))
            }
        }
    }

    #[test]
    fn test_failed_background_step_publishes_terminal_status() {
        let trace = reference_trace(16);
        // One call seeds the run; the first step fails.
        let backend = Arc::new(FailingBackend { ok: 1, calls: AtomicUsize::new(0) });
        let r = Reconstruction::with_backend(config(16, 5), &trace, backend).unwrap();
        let handle = spawn(r, None, CancelToken::new());
        while !handle.is_finished() {
            thread::yield_now();
        }
        let state = handle.status();
        assert_eq!(state.status, Status::Aborted);
        assert_eq!(state.iteration, 0);
        assert!(matches!(handle.join(), Err(RetrievalError::Solver(SolverError::Compute(_)))));
    }

    #[test]
    fn test_background_run_completes() {
        let trace = reference_trace(16);
        let handle = start(config(16, 5), &trace, None).unwrap();
        let result = handle.join().unwrap();
        assert_eq!(result.status, Status::MaxIterationsReached);
        assert_eq!(result.errors.len(), 5);
    }
}
