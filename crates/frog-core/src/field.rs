//! The complex pulse field $E(t)$ and profiles derived from it.

use std::f64::consts::PI;
use std::ops::Index;

use ndarray::Array1;
use num_complex::Complex64;

use crate::fft::Spectral;

/// Ordered samples of the analytic field on a grid's time axis.
///
/// Fields handed out by the controller are always copies; nothing outside the
/// active reconstructor holds a mutable reference to the working estimate.
#[derive(Debug, Clone, PartialEq)]
pub struct ComplexField {
    samples: Vec<Complex64>,
}

impl ComplexField {
    pub fn new(samples: Vec<Complex64>) -> Self {
        Self { samples }
    }

    pub fn zeros(n: usize) -> Self {
        Self {
            samples: vec![Complex64::new(0.0, 0.0); n],
        }
    }

    pub fn from_fn(n: usize, f: impl FnMut(usize) -> Complex64) -> Self {
        Self {
            samples: (0..n).map(f).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn as_slice(&self) -> &[Complex64] {
        &self.samples
    }

    pub fn into_vec(self) -> Vec<Complex64> {
        self.samples
    }

    pub fn to_array(&self) -> Array1<Complex64> {
        Array1::from_vec(self.samples.clone())
    }

    /// Total energy $\sum_k |E_k|^2$.
    pub fn energy(&self) -> f64 {
        self.samples.iter().map(|c| c.norm_sqr()).sum()
    }

    pub fn is_finite(&self) -> bool {
        self.samples.iter().all(|c| c.re.is_finite() && c.im.is_finite())
    }

    /// Copy rescaled to unit energy, or `None` for a zero or non-finite field.
    pub fn normalised(&self) -> Option<Self> {
        let energy = self.energy();
        if !(energy.is_finite() && energy > 0.0) {
            return None;
        }
        let scale = energy.sqrt().recip();
        Some(Self {
            samples: self.samples.iter().map(|c| c * scale).collect(),
        })
    }

    /// Multiply every sample by a constant.
    pub fn scaled(&self, factor: Complex64) -> Self {
        Self {
            samples: self.samples.iter().map(|c| c * factor).collect(),
        }
    }

    /// Time reversal with phase conjugation, $E(t) \to E^*(-t)$, about the
    /// centre sample.
    pub fn reversed_conjugate(&self) -> Self {
        let n = self.len();
        Self::from_fn(n, |k| {
            let mirror = (n - k) % n;
            self.samples[mirror].conj()
        })
    }

    /// Shift by `shift` samples towards later times, zero-filling the edge.
    pub fn shifted(&self, shift: isize) -> Self {
        let n = self.len() as isize;
        Self::from_fn(self.len(), |k| {
            let src = k as isize - shift;
            if (0..n).contains(&src) {
                self.samples[src as usize]
            } else {
                Complex64::new(0.0, 0.0)
            }
        })
    }

    pub fn intensity(&self) -> Vec<f64> {
        self.samples.iter().map(|c| c.norm_sqr()).collect()
    }

    /// Wrapped phase in $(-\pi, \pi]$.
    pub fn phase(&self) -> Vec<f64> {
        self.samples.iter().map(|c| c.arg()).collect()
    }

    pub fn unwrapped_phase(&self) -> Vec<f64> {
        unwrap_phase(&self.phase())
    }

    /// The field on the centred frequency axis.
    pub fn spectrum(&self, spectral: &Spectral) -> ComplexField {
        ComplexField::new(spectral.spectrum_of(&self.samples))
    }
}

impl Index<usize> for ComplexField {
    type Output = Complex64;

    fn index(&self, index: usize) -> &Complex64 {
        &self.samples[index]
    }
}

impl From<Vec<Complex64>> for ComplexField {
    fn from(samples: Vec<Complex64>) -> Self {
        Self::new(samples)
    }
}

/// Remove $2\pi$ jumps between consecutive samples.
pub fn unwrap_phase(wrapped: &[f64]) -> Vec<f64> {
    let mut out = Vec::with_capacity(wrapped.len());
    let mut offset = 0.0;
    let mut prev: Option<f64> = None;
    for &p in wrapped {
        if let Some(q) = prev {
            let jump = p - q;
            offset -= 2.0 * PI * (jump / (2.0 * PI)).round();
        }
        out.push(p + offset);
        prev = Some(p);
    }
    out
}

/// Full width at half maximum of a sampled profile, with linear interpolation
/// between samples. Returns `None` when the profile is empty, non-positive, or
/// does not fall below half maximum on both sides of its peak.
pub fn fwhm(profile: &[f64], step: f64) -> Option<f64> {
    let (peak_idx, peak) = profile
        .iter()
        .copied()
        .enumerate()
        .fold(None, |best: Option<(usize, f64)>, (i, v)| match best {
            Some((_, b)) if b >= v => best,
            _ => Some((i, v)),
        })?;
    if !(peak > 0.0 && peak.is_finite()) {
        return None;
    }
    let half = peak / 2.0;

    let mut left = None;
    for i in (0..peak_idx).rev() {
        if profile[i] < half {
            let frac = (half - profile[i]) / (profile[i + 1] - profile[i]);
            left = Some(i as f64 + frac);
            break;
        }
    }
    let mut right = None;
    for i in peak_idx + 1..profile.len() {
        if profile[i] < half {
            let frac = (profile[i - 1] - half) / (profile[i - 1] - profile[i]);
            right = Some((i - 1) as f64 + frac);
            break;
        }
    }
    Some((right? - left?) * step)
}
