//! Generalized projections.
//!
//! One iteration alternates two projections:
//!
//! 1. **Data constraint.** Each delay row of the signal field is transformed,
//!    its magnitude replaced by $\sqrt{M}$ with the phase kept, and
//!    transformed back, giving $E'_{\text{sig}}(t, \tau)$.
//! 2. **Form constraint.** The field is moved towards the minimiser of
//!
//!    $$
//!    Z(E) = \sum_{t,\tau} \left| E'_{\text{sig}}(t,\tau) - E(t)\,E(t-\tau) \right|^2
//!    $$
//!
//!    using the configured [`GpStrategy`].
//!
//! The result is normalised to unit energy.
//!
//! # Gradient strategy
//!
//! Along a search line $E + \alpha d$ every residual is quadratic in
//! $\alpha$, so $Z(\alpha)$ is a quartic and its stationary points are the
//! real roots of a cubic. Each descent step takes the root with the lowest
//! $Z$, so $Z$ never increases.

use ndarray::Array2;
use num_complex::Complex64;

use super::{check_sizes, finish_step, project_row, Reconstructor, RetrievalTarget, SolverError, StepOutput};
use crate::config::GpStrategy;
use crate::field::ComplexField;
use crate::forward::{signal_row, ForwardModel};
use crate::grid::Grid;

/// Generalized-projections reconstructor.
pub struct GeneralizedProjections {
    model: ForwardModel,
    strategy: GpStrategy,
}

impl GeneralizedProjections {
    pub fn new(model: ForwardModel, strategy: GpStrategy) -> Self {
        Self { model, strategy }
    }

    pub fn strategy(&self) -> GpStrategy {
        self.strategy
    }

    /// Magnitude-projected time-domain signal field, rows = delay.
    pub fn project(
        &self,
        field: &ComplexField,
        target: &RetrievalTarget,
    ) -> Result<Array2<Complex64>, SolverError> {
        check_sizes(&self.model, field, target)?;
        let grid = *self.model.grid();
        let spectral = self.model.spectral();
        let samples = field.as_slice();
        let amplitude = target.amplitude();
        let n = grid.size();
        let projected = self.model.backend().map_rows(n, n, &|j, row: &mut [Complex64]| {
            signal_row(&grid, samples, j, row);
            project_row(spectral, amplitude.row(j), row);
        })?;
        Ok(projected)
    }
}

impl Reconstructor for GeneralizedProjections {
    fn step(
        &mut self,
        field: &ComplexField,
        target: &RetrievalTarget,
        _iteration: usize,
    ) -> Result<StepOutput, SolverError> {
        let projected = self.project(field, target)?;
        let grid = self.model.grid();
        let mut e = field.as_slice().to_vec();
        match self.strategy {
            GpStrategy::Gradient { steps } => {
                for _ in 0..steps {
                    if !descend(grid, &projected, &mut e) {
                        break;
                    }
                }
            }
            GpStrategy::Coordinate { sweeps } => {
                for _ in 0..sweeps {
                    coordinate_sweep(grid, &projected, &mut e);
                }
            }
        }
        finish_step(&self.model, ComplexField::new(e), target)
    }

    fn name(&self) -> &str {
        "Generalized projections"
    }
}

/// $Z$ and its Wirtinger gradient $\partial Z / \partial E^*$.
pub fn objective_gradient(
    grid: &Grid,
    target: &Array2<Complex64>,
    e: &[Complex64],
) -> (f64, Vec<Complex64>) {
    let n = e.len();
    let mut z = 0.0;
    let mut grad = vec![Complex64::new(0.0, 0.0); n];
    for j in 0..n {
        for k in 0..n {
            let Some(m) = grid.gate_index(k, j) else {
                continue;
            };
            let r = e[k] * e[m] - target[[j, k]];
            z += r.norm_sqr();
            grad[k] += r * e[m].conj();
            grad[m] += r * e[k].conj();
        }
    }
    (z, grad)
}

/// One steepest-descent step with exact line search. Returns `false` when no
/// step lowers $Z$.
fn descend(grid: &Grid, target: &Array2<Complex64>, e: &mut [Complex64]) -> bool {
    let (_, grad) = objective_gradient(grid, target, e);
    let d: Vec<Complex64> = grad.iter().map(|g| -g).collect();
    let gnorm: f64 = d.iter().map(|c| c.norm_sqr()).sum();
    if !(gnorm.is_finite() && gnorm > 0.0) {
        return false;
    }

    let quartic = line_quartic(grid, target, e, &d);
    let Some(alpha) = quartic.best_step() else {
        log::trace!("GP line search found no descent (gradient norm {gnorm:.3e})");
        return false;
    };
    for (x, dx) in e.iter_mut().zip(&d) {
        *x += dx * alpha;
    }
    true
}

/// $Z(E + \alpha d) = c_0 + c_1\alpha + c_2\alpha^2 + c_3\alpha^3 + c_4\alpha^4$.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Quartic([f64; 5]);

impl Quartic {
    fn eval(&self, x: f64) -> f64 {
        self.0.iter().rev().fold(0.0, |acc, &c| acc * x + c)
    }

    /// Positive stationary point with the lowest value, if it improves on
    /// $\alpha = 0$.
    fn best_step(&self) -> Option<f64> {
        let [_, c1, c2, c3, c4] = self.0;
        let z0 = self.eval(0.0);
        real_cubic_roots(4.0 * c4, 3.0 * c3, 2.0 * c2, c1)
            .into_iter()
            .filter(|&a| a > 0.0 && a.is_finite())
            .map(|a| (a, self.eval(a)))
            .filter(|&(_, z)| z < z0)
            .min_by(|x, y| x.1.total_cmp(&y.1))
            .map(|(a, _)| a)
    }
}

fn line_quartic(grid: &Grid, target: &Array2<Complex64>, e: &[Complex64], d: &[Complex64]) -> Quartic {
    let n = e.len();
    let mut c = [0.0; 5];
    for j in 0..n {
        for k in 0..n {
            let Some(m) = grid.gate_index(k, j) else {
                continue;
            };
            let a0 = e[k] * e[m] - target[[j, k]];
            let a1 = d[k] * e[m] + e[k] * d[m];
            let a2 = d[k] * d[m];
            c[0] += a0.norm_sqr();
            c[1] += 2.0 * (a0 * a1.conj()).re;
            c[2] += a1.norm_sqr() + 2.0 * (a0 * a2.conj()).re;
            c[3] += 2.0 * (a1 * a2.conj()).re;
            c[4] += a2.norm_sqr();
        }
    }
    Quartic(c)
}

/// Real roots of $a x^3 + b x^2 + c x + d$, degrading to lower order when
/// the leading coefficients vanish.
fn real_cubic_roots(a: f64, b: f64, c: f64, d: f64) -> Vec<f64> {
    let scale = a.abs() + b.abs() + c.abs() + d.abs();
    if scale == 0.0 || !scale.is_finite() {
        return Vec::new();
    }
    let tiny = 1e-14 * scale;
    if a.abs() <= tiny {
        if b.abs() <= tiny {
            if c.abs() <= tiny {
                return Vec::new();
            }
            return vec![-d / c];
        }
        let disc = c * c - 4.0 * b * d;
        if disc < 0.0 {
            return Vec::new();
        }
        let sq = disc.sqrt();
        return vec![(-c + sq) / (2.0 * b), (-c - sq) / (2.0 * b)];
    }

    // Depressed cubic y^3 + p y + q with x = y - B/3.
    let (bn, cn, dn) = (b / a, c / a, d / a);
    let shift = bn / 3.0;
    let p = cn - bn * bn / 3.0;
    let q = 2.0 * bn * bn * bn / 27.0 - bn * cn / 3.0 + dn;
    let disc = (q / 2.0).powi(2) + (p / 3.0).powi(3);

    if disc > 0.0 {
        let sq = disc.sqrt();
        let y = (-q / 2.0 + sq).cbrt() + (-q / 2.0 - sq).cbrt();
        vec![y - shift]
    } else if p == 0.0 {
        vec![-shift]
    } else {
        let r = 2.0 * (-p / 3.0).sqrt();
        let arg = ((3.0 * q) / (2.0 * p) * (-3.0 / p).sqrt()).clamp(-1.0, 1.0);
        let theta = arg.acos() / 3.0;
        (0..3)
            .map(|k| r * (theta - 2.0 * std::f64::consts::PI * k as f64 / 3.0).cos() - shift)
            .collect()
    }
}

/// One Gauss-Seidel sweep: each sample is replaced by the least-squares
/// solution of its own terms with every other sample fixed. The zero-delay
/// term $E_p^2$ is linearised about the current value.
fn coordinate_sweep(grid: &Grid, target: &Array2<Complex64>, e: &mut [Complex64]) {
    let n = e.len();
    for p in 0..n {
        let mut num = Complex64::new(0.0, 0.0);
        let mut den = 0.0;
        for j in 0..n {
            let s = grid.delay_shift(j);
            if s == 0 {
                let a = e[p] * 2.0;
                let t = target[[j, p]] + e[p] * e[p];
                num += a.conj() * t;
                den += a.norm_sqr();
                continue;
            }
            // p as the gated sample: E_p E_{p-s}.
            if let Some(m) = grid.gate_index(p, j) {
                num += e[m].conj() * target[[j, p]];
                den += e[m].norm_sqr();
            }
            // p as the gate: E_{p+s} E_p.
            let k = p as isize + s;
            if (0..n as isize).contains(&k) {
                let k = k as usize;
                num += e[k].conj() * target[[j, k]];
                den += e[k].norm_sqr();
            }
        }
        if den > 0.0 {
            e[p] = num / den;
        }
    }
}
