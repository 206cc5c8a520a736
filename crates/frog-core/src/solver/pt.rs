//! Ptychographic reconstruction.
//!
//! Delays are visited in increasing order. For delay row $j$ the current
//! field is split into an object $E(t)$ and a frozen gate
//! $G(t) = E(t - \tau_j)$; the exit wave $\psi = E G$ is projected onto the
//! measured row and the object is moved along the residual:
//!
//! $$
//! E(t) \leftarrow E(t) + \beta \frac{G^*(t)}{\max |G|^2} \left(\psi'(t) - \psi(t)\right)
//! $$
//!
//! The update is applied before the next delay is visited, so every row
//! sees the corrections of the rows before it. The step size $\beta$ follows
//! a [`PtSchedule`].

use num_complex::Complex64;

use super::{check_sizes, finish_step, project_row, Reconstructor, RetrievalTarget, SolverError, StepOutput};
use crate::config::PtSchedule;
use crate::field::ComplexField;
use crate::forward::ForwardModel;

pub struct Ptychographic {
    model: ForwardModel,
    schedule: PtSchedule,
}

impl Ptychographic {
    pub fn new(model: ForwardModel, schedule: PtSchedule) -> Self {
        Self { model, schedule }
    }

    pub fn schedule(&self) -> PtSchedule {
        self.schedule
    }

    /// One full sweep over the delays at step size `beta`, without
    /// normalisation.
    pub fn sweep(&self, field: &ComplexField, target: &RetrievalTarget, beta: f64) -> ComplexField {
        let grid = self.model.grid();
        let spectral = self.model.spectral();
        let amplitude = target.amplitude();
        let n = grid.size();

        let mut e = field.as_slice().to_vec();
        let mut gate = vec![Complex64::new(0.0, 0.0); n];
        let mut psi = vec![Complex64::new(0.0, 0.0); n];
        let mut corrected = vec![Complex64::new(0.0, 0.0); n];

        for j in 0..n {
            // Gate samples, frozen for this row.
            for (k, g) in gate.iter_mut().enumerate() {
                *g = match grid.gate_index(k, j) {
                    Some(m) => e[m],
                    None => Complex64::new(0.0, 0.0),
                };
            }
            let gate_max = gate.iter().map(|g| g.norm_sqr()).fold(0.0, f64::max);
            if gate_max <= 0.0 {
                continue;
            }

            for ((p, &x), &g) in psi.iter_mut().zip(&e).zip(&gate) {
                *p = x * g;
            }
            corrected.copy_from_slice(&psi);
            project_row(spectral, amplitude.row(j), &mut corrected);

            let weight = beta / gate_max;
            for k in 0..n {
                e[k] += gate[k].conj() * (corrected[k] - psi[k]) * weight;
            }
        }
        ComplexField::new(e)
    }
}

impl Reconstructor for Ptychographic {
    fn step(
        &mut self,
        field: &ComplexField,
        target: &RetrievalTarget,
        iteration: usize,
    ) -> Result<StepOutput, SolverError> {
        check_sizes(&self.model, field, target)?;
        let beta = self.schedule.step_size(iteration);
        let updated = self.sweep(field, target, beta);
        finish_step(&self.model, updated, target)
    }

    fn name(&self) -> &str {
        "Ptychographic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::Grid;
    use crate::metric::field_distance;
    use crate::trace::MeasuredTrace;
    use approx::assert_abs_diff_eq;
    use frog_compute::SerialBackend;
    use std::sync::Arc;

    fn setup(reference: ComplexField, grid: Grid) -> (ForwardModel, RetrievalTarget) {
        let model = ForwardModel::new(grid, Arc::new(SerialBackend));
        let trace = MeasuredTrace::new(model.simulate(&reference).unwrap()).unwrap();
        (model, RetrievalTarget::new(&trace))
    }

    #[test]
    fn test_true_field_is_fixed_point() {
        let grid = Grid::new(32, 1.0).unwrap();
        let truth = grid.gaussian_field(3.0, 0.05).normalised().unwrap();
        let (model, target) = setup(truth.clone(), grid);
        let mut pt = Ptychographic::new(model, PtSchedule::default());
        let out = pt.step(&truth, &target, 0).unwrap();
        assert!(out.error.g < 1e-3, "g = {}", out.error.g);
        assert!(field_distance(&truth, &out.field) < 1e-3);
    }

    #[test]
    fn test_sweep_is_sequential() {
        // A sweep at step size zero leaves the field untouched; any positive
        // step changes it even though only single rows are projected.
        let grid = Grid::new(16, 1.0).unwrap();
        let truth = grid.gaussian_field(1.5, 0.2).normalised().unwrap();
        let (model, target) = setup(truth, grid);
        let pt = Ptychographic::new(model, PtSchedule::default());
        let start = grid.gaussian_field(2.5, 0.0).normalised().unwrap();
        assert_eq!(pt.sweep(&start, &target, 0.0), start);
        assert_ne!(pt.sweep(&start, &target, 0.5), start);
    }

    #[test]
    fn test_iterations_reduce_error() {
        let grid = Grid::new(32, 1.0).unwrap();
        let truth = grid.gaussian_field(2.5, 0.0).normalised().unwrap();
        let (model, target) = setup(truth, grid);
        let mut pt = Ptychographic::new(model.clone(), PtSchedule::default());
        let mut field = grid.gaussian_field(4.0, 0.0).normalised().unwrap();
        let initial = target.error(model.simulate(&field).unwrap().view()).g;
        for n in 0..20 {
            field = pt.step(&field, &target, n).unwrap().field;
        }
        let g = target.error(model.simulate(&field).unwrap().view()).g;
        assert!(g < 0.8 * initial, "g went from {initial} to {g}");
        assert_abs_diff_eq!(field.energy(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_step_is_deterministic() {
        let grid = Grid::new(16, 1.0).unwrap();
        let truth = grid.gaussian_field(1.5, 0.2).normalised().unwrap();
        let (model, target) = setup(truth, grid);
        let start = grid.gaussian_field(2.0, 0.05).normalised().unwrap();
        let a = Ptychographic::new(model.clone(), PtSchedule::default())
            .step(&start, &target, 3)
            .unwrap();
        let b = Ptychographic::new(model, PtSchedule::default())
            .step(&start, &target, 3)
            .unwrap();
        assert_eq!(a.field, b.field);
        assert_eq!(a.error, b.error);
    }
}
