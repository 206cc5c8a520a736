//! Reconstruction quality measures.
//!
//! The FROG G error compares a trial spectrogram with the measured trace after
//! removing any uniform intensity mismatch:
//!
//! $$
//! \mu = \frac{\sum T M}{\sum T^2}, \qquad
//! G = \frac{\operatorname{rms}(\mu T - M)}{\operatorname{rms}(M)}
//! $$
//!
//! [`field_distance`] compares two fields modulo the trivial SHG-FROG
//! ambiguities.

use std::f64::consts::TAU;

use ndarray::{ArrayView2, Zip};
use num_complex::Complex64;

use crate::fft::Spectral;
use crate::field::ComplexField;

/// Sub-sample shift search: grid spacing, then golden-section iterations.
const FRACTIONAL_STEP: f64 = 0.1;
const REFINE_ITERATIONS: usize = 40;

/// G error together with the optimal intensity scale that produced it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ErrorEstimate {
    pub g: f64,
    pub scale: f64,
}

/// G error between a trial spectrogram and a measured trace of equal shape.
///
/// `g` is zero exactly when `trial` is a non-negative multiple of `measured`;
/// it is non-finite when `trial` contains non-finite values.
///
/// # Panics
///
/// Panics if `trial` and `measured` differ in shape.
pub fn g_error(trial: ArrayView2<'_, f64>, measured: ArrayView2<'_, f64>) -> ErrorEstimate {
    assert_eq!(trial.dim(), measured.dim(), "trial and measured traces must share a shape");

    let (mut tm, mut tt, mut mm) = (0.0_f64, 0.0_f64, 0.0_f64);
    Zip::from(&trial).and(&measured).for_each(|&t, &m| {
        tm += t * m;
        tt += t * t;
        mm += m * m;
    });

    let scale = if tt > 0.0 { tm / tt } else if tt == 0.0 { 0.0 } else { f64::NAN };

    let mut residual = 0.0_f64;
    Zip::from(&trial).and(&measured).for_each(|&t, &m| {
        let d = scale * t - m;
        residual += d * d;
    });

    // Both RMS values share the same 1/count factor, so it cancels.
    let g = if mm > 0.0 {
        (residual / mm).sqrt()
    } else if residual == 0.0 {
        0.0
    } else {
        f64::INFINITY
    };
    ErrorEstimate { g, scale }
}

/// Normalised distance between two fields, minimised over a constant phase,
/// a time shift and time reversal with conjugation.
///
/// Integer shifts are searched with zero fill at the window edges; the best
/// shift is then refined to a fraction of a sample by a linear spectral phase
/// (a circular shift, exact for pulses that vanish at the window edges).
///
/// Both fields are normalised to unit energy first, so the result is zero for
/// identical pulses and at most 2. Returns infinity if either field has no
/// energy.
///
/// # Panics
///
/// Panics if `a` and `b` differ in length.
pub fn field_distance(a: &ComplexField, b: &ComplexField) -> f64 {
    assert_eq!(a.len(), b.len(), "fields must share a grid");
    let (a, b) = match (a.normalised(), b.normalised()) {
        (Some(a), Some(b)) => (a, b),
        _ => return f64::INFINITY,
    };
    let spectral = Spectral::new(a.len());
    let mut a_spec = a.as_slice().to_vec();
    spectral.forward(&mut a_spec);

    let half = (a.len() / 2) as isize;
    let mut best = f64::INFINITY;
    for candidate in [b.clone(), b.reversed_conjugate()] {
        for shift in -half..half {
            let c = candidate.shifted(shift);
            let overlap: Complex64 = a
                .as_slice()
                .iter()
                .zip(c.as_slice())
                .map(|(x, y)| y.conj() * x)
                .sum();
            let d2 = 1.0 + c.energy() - 2.0 * overlap.norm();
            best = best.min(d2.max(0.0).sqrt());
        }
        let correlation = CrossSpectrum::new(&spectral, &a_spec, &candidate);
        best = best.min(correlation.best_distance());
    }
    best
}

/// $P_k = A_k B_k^* / N$, so that the overlap of `a` with `b` circularly
/// shifted by `s` samples is $\sum_k P_k e^{2\pi i k s / N}$.
struct CrossSpectrum {
    products: Vec<Complex64>,
}

impl CrossSpectrum {
    fn new(spectral: &Spectral, a_spec: &[Complex64], b: &ComplexField) -> Self {
        let n = a_spec.len() as f64;
        let mut b_spec = b.as_slice().to_vec();
        spectral.forward(&mut b_spec);
        let products = a_spec
            .iter()
            .zip(&b_spec)
            .map(|(x, y)| x * y.conj() / n)
            .collect();
        Self { products }
    }

    fn overlap(&self, shift: f64) -> f64 {
        let n = self.products.len();
        let half = n / 2;
        self.products
            .iter()
            .enumerate()
            .map(|(k, p)| {
                // Signed frequency index, Nyquist taken as negative.
                let freq = if k < half { k as f64 } else { k as f64 - n as f64 };
                p * Complex64::from_polar(1.0, TAU * freq * shift / n as f64)
            })
            .sum::<Complex64>()
            .norm()
    }

    /// Distance at the shift maximising the overlap. A circular shift keeps
    /// unit energy, so $d^2 = 2 - 2|\text{overlap}|$.
    fn best_distance(&self) -> f64 {
        let n = self.products.len() as isize;
        let half = n / 2;
        let coarse = (-half..half)
            .map(|s| s as f64)
            .max_by(|x, y| self.overlap(*x).total_cmp(&self.overlap(*y)))
            .unwrap_or(0.0);

        let steps = (1.0 / FRACTIONAL_STEP).round() as isize;
        let fine = (-steps..=steps)
            .map(|i| coarse + i as f64 * FRACTIONAL_STEP)
            .max_by(|x, y| self.overlap(*x).total_cmp(&self.overlap(*y)))
            .unwrap_or(coarse);

        // Golden-section search for the peak inside one fine step.
        let ratio = (5.0_f64.sqrt() - 1.0) / 2.0;
        let (mut lo, mut hi) = (fine - FRACTIONAL_STEP, fine + FRACTIONAL_STEP);
        for _ in 0..REFINE_ITERATIONS {
            let x1 = hi - ratio * (hi - lo);
            let x2 = lo + ratio * (hi - lo);
            if self.overlap(x1) < self.overlap(x2) {
                lo = x1;
            } else {
                hi = x2;
            }
        }
        let peak = self.overlap(fine).max(self.overlap(0.5 * (lo + hi)));
        (2.0 - 2.0 * peak).max(0.0).sqrt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::Grid;
    use approx::assert_abs_diff_eq;
    use ndarray::Array2;

    fn sample_trace() -> Array2<f64> {
        Array2::from_shape_fn((16, 16), |(i, j)| {
            let x = i as f64 - 8.0;
            let y = j as f64 - 8.0;
            (-(x * x + 0.5 * y * y) / 10.0).exp()
        })
    }

    #[test]
    fn test_identical_traces_give_zero() {
        let m = sample_trace();
        let e = g_error(m.view(), m.view());
        assert_abs_diff_eq!(e.g, 0.0, epsilon = 1e-14);
        assert_abs_diff_eq!(e.scale, 1.0, epsilon = 1e-14);
    }

    #[test]
    fn test_positive_multiple_gives_zero() {
        let m = sample_trace();
        let t = &m * 0.037;
        let e = g_error(t.view(), m.view());
        assert_abs_diff_eq!(e.g, 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(e.scale, 1.0 / 0.037, epsilon = 1e-9);
    }

    #[test]
    fn test_zero_trial_gives_unit_error() {
        let m = sample_trace();
        let t = Array2::<f64>::zeros((16, 16));
        let e = g_error(t.view(), m.view());
        assert_abs_diff_eq!(e.g, 1.0, epsilon = 1e-14);
        assert_eq!(e.scale, 0.0);
    }

    #[test]
    fn test_shape_mismatch_is_positive() {
        let m = sample_trace();
        let t = m.t().to_owned();
        assert!(g_error(t.view(), m.view()).g > 1e-3);
    }

    #[test]
    #[should_panic(expected = "share a shape")]
    fn test_g_error_panics_on_shape_mismatch() {
        let m = sample_trace();
        g_error(Array2::<f64>::zeros((16, 8)).view(), m.view());
    }

    #[test]
    #[should_panic(expected = "share a grid")]
    fn test_field_distance_panics_on_length_mismatch() {
        field_distance(&ComplexField::zeros(16), &ComplexField::zeros(32));
    }

    #[test]
    fn test_nan_trial_is_not_finite() {
        let m = sample_trace();
        let mut t = m.clone();
        t[[2, 2]] = f64::NAN;
        assert!(!g_error(t.view(), m.view()).g.is_finite());
    }

    #[test]
    fn test_field_distance_ignores_trivial_ambiguities() {
        let grid = Grid::new(32, 1.0).unwrap();
        let e = grid.gaussian_field(2.0, 0.08).shifted(-1);
        let phased = e.scaled(Complex64::from_polar(3.0, 0.7));
        assert_abs_diff_eq!(field_distance(&e, &phased), 0.0, epsilon = 1e-4);
        assert_abs_diff_eq!(field_distance(&e, &e.reversed_conjugate()), 0.0, epsilon = 1e-4);
        assert_abs_diff_eq!(field_distance(&e, &e.shifted(3)), 0.0, epsilon = 1e-4);
    }

    #[test]
    fn test_field_distance_ignores_sub_sample_shift() {
        let grid = Grid::new(64, 1.0).unwrap();
        let pulse = |offset: f64| {
            ComplexField::from_fn(64, |k| {
                let t = k as f64 - 32.0 - offset;
                Complex64::from_polar((-t * t / 25.0).exp(), 0.08 * t * t)
            })
        };
        let reference = pulse(0.0);
        let moved = pulse(0.4).scaled(Complex64::from_polar(1.0, -1.2));
        assert_abs_diff_eq!(field_distance(&reference, &moved), 0.0, epsilon = 1e-3);
        assert_abs_diff_eq!(
            field_distance(&reference, &pulse(-2.7).reversed_conjugate()),
            0.0,
            epsilon = 1e-3
        );
        // The chirp itself is still visible at every shift.
        assert!(field_distance(&reference, &grid.gaussian_field(2.5, 0.0)) > 0.1);
    }

    #[test]
    fn test_field_distance_sees_chirp() {
        let grid = Grid::new(32, 1.0).unwrap();
        let tl = grid.gaussian_field(2.0, 0.0);
        let chirped = grid.gaussian_field(2.0, 0.3);
        assert!(field_distance(&tl, &chirped) > 0.1);
    }
}
