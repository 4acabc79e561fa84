// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Zero-padded FFT convolution helpers.
//!
//! A length-`L` causal convolution is realised by padding both operands to
//! `2L`, multiplying their spectra, and keeping the first `L` samples of the
//! inverse transform. With `2L` points the circular wrap-around only touches
//! samples at index `L` and beyond, so the retained prefix equals the direct
//! sum `Σ_{k≤t} kernel[k] · signal[t-k]`.

use super::{PureResult, TensorError};
use num_complex::Complex32;
use rustfft::{Fft, FftPlanner};
use std::sync::{Arc, Mutex};

/// Shared FFT planner. rustfft caches plans per size internally, so repeated
/// chunks of one length reuse the same twiddles.
pub struct SpectralConvolver {
    planner: Mutex<FftPlanner<f32>>,
}

impl core::fmt::Debug for SpectralConvolver {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("SpectralConvolver")
    }
}

impl Default for SpectralConvolver {
    fn default() -> Self {
        Self::new()
    }
}

impl SpectralConvolver {
    pub fn new() -> Self {
        Self {
            planner: Mutex::new(FftPlanner::new()),
        }
    }

    /// Plans transforms for causal convolutions of `len` samples.
    pub fn plan(&self, len: usize) -> PureResult<SpectralPlan> {
        if len == 0 {
            return Err(TensorError::EmptyInput("spectral_plan"));
        }
        let padded = len * 2;
        let mut planner = self
            .planner
            .lock()
            .map_err(|_| TensorError::BackendFailure {
                backend: "rustfft",
                message: "planner lock poisoned".to_string(),
            })?;
        Ok(SpectralPlan {
            len,
            padded,
            forward: planner.plan_fft_forward(padded),
            inverse: planner.plan_fft_inverse(padded),
        })
    }
}

/// Forward/inverse transform pair for one chunk length. Cheap to clone and
/// safe to share across rayon workers.
#[derive(Clone)]
pub struct SpectralPlan {
    len: usize,
    padded: usize,
    forward: Arc<dyn Fft<f32>>,
    inverse: Arc<dyn Fft<f32>>,
}

impl core::fmt::Debug for SpectralPlan {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "SpectralPlan(len={},padded={})", self.len, self.padded)
    }
}

impl SpectralPlan {
    /// Number of samples kept from each convolution.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Transform size (`2 * len`).
    pub fn padded_len(&self) -> usize {
        self.padded
    }

    /// Zero-pads exactly `len` samples to `2 * len` and returns their spectrum.
    pub fn spectrum<I>(&self, samples: I) -> PureResult<Vec<Complex32>>
    where
        I: IntoIterator<Item = Complex32>,
    {
        let mut buffer = Vec::with_capacity(self.padded);
        buffer.extend(samples.into_iter().take(self.len + 1));
        if buffer.len() != self.len {
            return Err(TensorError::DataLength {
                expected: self.len,
                got: buffer.len(),
            });
        }
        buffer.resize(self.padded, Complex32::new(0.0, 0.0));
        self.forward.process(&mut buffer);
        Ok(buffer)
    }

    /// Causal convolution of a real signal with a kernel given by its
    /// [`SpectralPlan::spectrum`]. Returns the first `len` complex samples.
    pub fn causal_convolve(
        &self,
        signal: &[f32],
        kernel_spectrum: &[Complex32],
    ) -> PureResult<Vec<Complex32>> {
        if kernel_spectrum.len() != self.padded {
            return Err(TensorError::DataLength {
                expected: self.padded,
                got: kernel_spectrum.len(),
            });
        }
        let mut buffer = self.spectrum(signal.iter().map(|&re| Complex32::new(re, 0.0)))?;
        for (value, kernel) in buffer.iter_mut().zip(kernel_spectrum.iter()) {
            *value *= *kernel;
        }
        self.inverse.process(&mut buffer);
        // rustfft leaves the inverse unnormalised.
        let scale = 1.0 / self.padded as f32;
        buffer.truncate(self.len);
        for value in buffer.iter_mut() {
            *value *= scale;
        }
        Ok(buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn direct(signal: &[f32], kernel: &[Complex32]) -> Vec<Complex32> {
        (0..signal.len())
            .map(|t| {
                (0..=t).fold(Complex32::new(0.0, 0.0), |acc, k| {
                    acc + kernel[k] * signal[t - k]
                })
            })
            .collect()
    }

    #[test]
    fn matches_direct_causal_sum() {
        let convolver = SpectralConvolver::new();
        for len in [1usize, 2, 5, 8, 13] {
            let plan = convolver.plan(len).unwrap();
            let signal: Vec<f32> = (0..len).map(|i| ((i as f32) * 0.7).sin()).collect();
            let kernel: Vec<Complex32> = (0..len)
                .map(|i| Complex32::from_polar(0.8f32.powi(i as i32), 0.3 * i as f32))
                .collect();
            let spectrum = plan.spectrum(kernel.iter().copied()).unwrap();
            let fast = plan.causal_convolve(&signal, &spectrum).unwrap();
            let slow = direct(&signal, &kernel);
            assert_eq!(fast.len(), len);
            for (a, b) in fast.iter().zip(slow.iter()) {
                assert!((a - b).norm() < 1e-4, "len {len}: {a} vs {b}");
            }
        }
    }

    #[test]
    fn impulse_returns_kernel_prefix() {
        let plan = SpectralConvolver::new().plan(4).unwrap();
        let kernel = [1.0, 0.5, 0.25, 0.125].map(|re| Complex32::new(re, 0.0));
        let spectrum = plan.spectrum(kernel).unwrap();
        let out = plan.causal_convolve(&[1.0, 0.0, 0.0, 0.0], &spectrum).unwrap();
        for (a, b) in out.iter().zip(kernel.iter()) {
            assert!((a - b).norm() < 1e-6);
        }
    }

    #[test]
    fn rejects_bad_lengths() {
        let convolver = SpectralConvolver::new();
        assert!(convolver.plan(0).is_err());
        let plan = convolver.plan(3).unwrap();
        assert!(plan.spectrum([Complex32::new(1.0, 0.0)]).is_err());
        assert!(plan.causal_convolve(&[1.0, 2.0, 3.0], &[]).is_err());
    }
}
