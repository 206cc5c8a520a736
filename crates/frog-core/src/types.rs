//! Run state, progress and result containers.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::field::ComplexField;

/// Lifecycle of a reconstruction. Every status other than `Running` is
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Running,
    Converged,
    MaxIterationsReached,
    Aborted,
    /// A step produced a non-finite error or field. The last finite field is
    /// kept.
    Diverged,
}

impl Status {
    pub fn is_terminal(self) -> bool {
        self != Status::Running
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Status::Running => "running",
            Status::Converged => "converged",
            Status::MaxIterationsReached => "max iterations reached",
            Status::Aborted => "aborted",
            Status::Diverged => "diverged",
        };
        f.write_str(s)
    }
}

/// Mutable state of one run. Handed out only as copies.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconstructionState {
    /// Current estimate: the seed until the first step, afterwards the last
    /// accepted field.
    pub field: ComplexField,
    /// Completed outer iterations.
    pub iteration: usize,
    /// G error after each completed iteration, in order.
    pub errors: Vec<f64>,
    pub status: Status,
    /// Lowest-error field seen so far, including the seed.
    pub best_field: ComplexField,
    pub best_error: f64,
}

impl ReconstructionState {
    pub fn new(seed: ComplexField, seed_error: f64) -> Self {
        Self {
            best_field: seed.clone(),
            best_error: seed_error,
            field: seed,
            iteration: 0,
            errors: Vec::new(),
            status: Status::Running,
        }
    }

    /// Error of the most recent iteration.
    pub fn last_error(&self) -> Option<f64> {
        self.errors.last().copied()
    }
}

/// Per-iteration progress report.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Progress {
    /// Completed iterations, starting at 1.
    pub iteration: usize,
    pub g: f64,
    pub status: Status,
}

impl From<&ReconstructionState> for Progress {
    fn from(state: &ReconstructionState) -> Self {
        Self {
            iteration: state.iteration,
            g: state.last_error().unwrap_or(f64::NAN),
            status: state.status,
        }
    }
}

/// Final output of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalResult {
    pub field: ComplexField,
    /// `field` on the centred frequency axis.
    pub spectrum: ComplexField,
    pub best_field: ComplexField,
    pub best_error: f64,
    pub errors: Vec<f64>,
    pub status: Status,
    pub iterations: usize,
    /// FWHM of $|E(t)|^2$ in time units.
    pub duration_fwhm: Option<f64>,
    /// FWHM of $|E(f)|^2$ in frequency units.
    pub bandwidth_fwhm: Option<f64>,
}

impl RetrievalResult {
    pub fn final_error(&self) -> Option<f64> {
        self.errors.last().copied()
    }
}
