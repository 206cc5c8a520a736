//! Planned FFTs along the time axis, wrapping `rustfft`.
//!
//! Convention matches numpy:
//! - Forward FFT: unnormalised
//! - Inverse FFT: normalised by 1/N
//!
//! The `*_centred` variants put zero frequency at index N/2 so that column
//! `k` of a spectrum lines up with [`Grid::frequency_axis`](crate::grid::Grid::frequency_axis).

use std::fmt;
use std::sync::Arc;

use num_complex::Complex64;
use rustfft::{Fft, FftPlanner};

/// Forward and inverse transforms of one fixed length, planned once and shared
/// across threads.
#[derive(Clone)]
pub struct Spectral {
    n: usize,
    forward: Arc<dyn Fft<f64>>,
    inverse: Arc<dyn Fft<f64>>,
}

impl fmt::Debug for Spectral {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Spectral").field("n", &self.n).finish()
    }
}

impl Spectral {
    pub fn new(n: usize) -> Self {
        let mut planner = FftPlanner::new();
        Self {
            n,
            forward: planner.plan_fft_forward(n),
            inverse: planner.plan_fft_inverse(n),
        }
    }

    pub fn len(&self) -> usize {
        self.n
    }

    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    /// Unnormalised forward transform in place.
    pub fn forward(&self, buf: &mut [Complex64]) {
        debug_assert_eq!(buf.len(), self.n);
        self.forward.process(buf);
    }

    /// Inverse transform in place, normalised by 1/N.
    pub fn inverse(&self, buf: &mut [Complex64]) {
        debug_assert_eq!(buf.len(), self.n);
        self.inverse.process(buf);
        let norm = 1.0 / self.n as f64;
        for v in buf.iter_mut() {
            *v *= norm;
        }
    }

    /// Forward transform followed by an fftshift.
    pub fn forward_centred(&self, buf: &mut [Complex64]) {
        self.forward(buf);
        fftshift(buf);
    }

    /// ifftshift followed by the inverse transform; undoes [`forward_centred`](Self::forward_centred).
    pub fn inverse_centred(&self, buf: &mut [Complex64]) {
        ifftshift(buf);
        self.inverse(buf);
    }

    /// Spectrum of a field sampled on a centred time axis, returned on the
    /// centred frequency axis. Unlike [`forward_centred`](Self::forward_centred)
    /// this also moves $t = 0$ to index 0 first, so the spectral phase carries
    /// no spurious linear term.
    pub fn spectrum_of(&self, samples: &[Complex64]) -> Vec<Complex64> {
        let mut buf = samples.to_vec();
        ifftshift(&mut buf);
        self.forward(&mut buf);
        fftshift(&mut buf);
        buf
    }
}

/// Move index 0 to the centre. Only even lengths are used in this crate, for
/// which fftshift and ifftshift coincide.
pub fn fftshift(buf: &mut [Complex64]) {
    let half = buf.len() / 2;
    buf.rotate_right(half);
}

pub fn ifftshift(buf: &mut [Complex64]) {
    let half = buf.len() / 2;
    buf.rotate_left(half);
}
