// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Pure Rust tensor primitives for the spiral convolution stack.
//!
//! Everything here is written in safe Rust and keeps the dependency surface
//! small: dense row-major matrices for position-wise layers, time-major
//! sequence buffers for chunked recurrences, complex buffers for carried
//! state, and an FFT-backed causal convolver.

pub mod complex;
pub mod fft;
pub mod sequence;

pub use self::complex::ComplexTensor;
pub use self::fft::{SpectralConvolver, SpectralPlan};
pub use self::sequence::SequenceTensor;
pub use num_complex::Complex32;

use rand::distributions::{Distribution, Uniform};
use rand::rngs::StdRng;
use rand_distr::StandardNormal;
use rayon::prelude::*;
use spiral_config::determinism;

/// Result alias used throughout the pure module.
pub type PureResult<T> = Result<T, TensorError>;

/// Errors emitted by tensor, sequence, and spectral utilities.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum TensorError {
    /// A tensor constructor received an invalid shape.
    #[error("invalid tensor dimensions ({rows} x {cols}); both axes must be non-zero")]
    InvalidDimensions { rows: usize, cols: usize },
    /// Data provided to a constructor does not match the tensor shape.
    #[error("data length mismatch: expected {expected}, got {got}")]
    DataLength { expected: usize, got: usize },
    /// An operator was asked to combine tensors of incompatible shapes.
    #[error("shape mismatch: left={left:?}, right={right:?} cannot be combined")]
    ShapeMismatch {
        left: (usize, usize),
        right: (usize, usize),
    },
    /// Computation received an empty input which would otherwise trigger a panic.
    #[error("{0} must not be empty for this computation")]
    EmptyInput(&'static str),
    /// Attempted to load a parameter that was missing from the state dict.
    #[error("missing parameter '{name}' while loading module state")]
    MissingParameter { name: String },
    /// Numeric guard detected a non-finite value.
    #[error("non-finite value detected for {label}: {value}")]
    NonFiniteValue { label: &'static str, value: f32 },
    /// Generic configuration violation.
    #[error("invalid value: {label}")]
    InvalidValue { label: &'static str },
    /// A serialised configuration could not be read or parsed.
    #[error("configuration error: {message}")]
    Config { message: String },
    /// The spectral backend failed.
    #[error("{backend} backend failure: {message}")]
    BackendFailure {
        backend: &'static str,
        message: String,
    },
}

/// A dense row-major 2D tensor.
#[derive(Clone, Debug, PartialEq)]
pub struct Tensor {
    data: Vec<f32>,
    rows: usize,
    cols: usize,
}

impl Tensor {
    fn seedable_rng(seed: Option<u64>, label: &str) -> StdRng {
        determinism::rng_from_optional(seed, label)
    }

    fn guard_dims(rows: usize, cols: usize) -> PureResult<()> {
        if rows == 0 || cols == 0 {
            return Err(TensorError::InvalidDimensions { rows, cols });
        }
        Ok(())
    }

    /// Create a tensor filled with zeros.
    pub fn zeros(rows: usize, cols: usize) -> PureResult<Self> {
        Self::guard_dims(rows, cols)?;
        Ok(Self {
            data: vec![0.0; rows * cols],
            rows,
            cols,
        })
    }

    /// Create a tensor from raw data. The vector must hold `rows * cols` elements.
    pub fn from_vec(rows: usize, cols: usize, data: Vec<f32>) -> PureResult<Self> {
        Self::guard_dims(rows, cols)?;
        let expected = rows * cols;
        if expected != data.len() {
            return Err(TensorError::DataLength {
                expected,
                got: data.len(),
            });
        }
        Ok(Self { data, rows, cols })
    }

    /// Construct a tensor by applying a generator function to each coordinate.
    pub fn from_fn<F>(rows: usize, cols: usize, mut f: F) -> PureResult<Self>
    where
        F: FnMut(usize, usize) -> f32,
    {
        Self::guard_dims(rows, cols)?;
        let mut data = Vec::with_capacity(rows * cols);
        for r in 0..rows {
            for c in 0..cols {
                data.push(f(r, c));
            }
        }
        Ok(Self { data, rows, cols })
    }

    /// Construct a tensor by sampling a uniform distribution in `[min, max)`.
    ///
    /// When `seed` is provided the RNG becomes deterministic which makes tests
    /// reproducible. Otherwise the process determinism policy decides.
    pub fn random_uniform(
        rows: usize,
        cols: usize,
        min: f32,
        max: f32,
        seed: Option<u64>,
    ) -> PureResult<Self> {
        Self::guard_dims(rows, cols)?;
        if !(min < max) {
            return Err(TensorError::InvalidValue {
                label: "random_uniform_bounds",
            });
        }
        let mut rng = Self::seedable_rng(seed, "st-tensor/tensor/uniform");
        let distribution = Uniform::new(min, max);
        let data = (0..rows * cols)
            .map(|_| distribution.sample(&mut rng))
            .collect();
        Ok(Self { data, rows, cols })
    }

    /// Construct a tensor by sampling a normal distribution.
    pub fn random_normal(
        rows: usize,
        cols: usize,
        mean: f32,
        std: f32,
        seed: Option<u64>,
    ) -> PureResult<Self> {
        Self::guard_dims(rows, cols)?;
        if std <= 0.0 || !std.is_finite() {
            return Err(TensorError::InvalidValue {
                label: "random_normal_std",
            });
        }
        let mut rng = Self::seedable_rng(seed, "st-tensor/tensor/normal");
        let data = (0..rows * cols)
            .map(|_| {
                let sample: f64 = StandardNormal.sample(&mut rng);
                mean + std * sample as f32
            })
            .collect();
        Ok(Self { data, rows, cols })
    }

    /// Returns the `(rows, cols)` pair of the tensor.
    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    /// Total number of elements stored in the tensor.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Tensors always hold at least one element.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    /// Consumes the tensor and returns its row-major buffer.
    pub fn into_vec(self) -> Vec<f32> {
        self.data
    }

    /// Borrow a single row.
    pub fn row(&self, index: usize) -> &[f32] {
        let start = index * self.cols;
        &self.data[start..start + self.cols]
    }

    fn guard_same_shape(&self, other: &Tensor) -> PureResult<()> {
        if self.shape() != other.shape() {
            return Err(TensorError::ShapeMismatch {
                left: self.shape(),
                right: other.shape(),
            });
        }
        Ok(())
    }

    /// Matrix product `self @ other`, rows computed in parallel.
    pub fn matmul(&self, other: &Tensor) -> PureResult<Tensor> {
        if self.cols != other.rows {
            return Err(TensorError::ShapeMismatch {
                left: self.shape(),
                right: other.shape(),
            });
        }
        let inner = self.cols;
        let out_cols = other.cols;
        let mut out = vec![0.0f32; self.rows * out_cols];
        out.par_chunks_mut(out_cols)
            .zip(self.data.par_chunks(inner))
            .for_each(|(dst, lhs)| {
                for (k, &a) in lhs.iter().enumerate() {
                    if a == 0.0 {
                        continue;
                    }
                    let rhs = &other.data[k * out_cols..(k + 1) * out_cols];
                    for (d, &b) in dst.iter_mut().zip(rhs.iter()) {
                        *d += a * b;
                    }
                }
            });
        Tensor::from_vec(self.rows, out_cols, out)
    }

    /// `self += scale * other`.
    pub fn add_scaled(&mut self, other: &Tensor, scale: f32) -> PureResult<()> {
        self.guard_same_shape(other)?;
        for (dst, src) in self.data.iter_mut().zip(other.data.iter()) {
            *dst += scale * src;
        }
        Ok(())
    }

    /// Adds `bias` to every row.
    pub fn add_row_inplace(&mut self, bias: &[f32]) -> PureResult<()> {
        if bias.len() != self.cols {
            return Err(TensorError::ShapeMismatch {
                left: self.shape(),
                right: (1, bias.len()),
            });
        }
        for row in self.data.chunks_mut(self.cols) {
            for (dst, b) in row.iter_mut().zip(bias.iter()) {
                *dst += b;
            }
        }
        Ok(())
    }

    /// Applies `f` to every element in place.
    pub fn map_inplace<F>(&mut self, f: F)
    where
        F: Fn(f32) -> f32 + Sync,
    {
        self.data.par_iter_mut().for_each(|v| *v = f(*v));
    }

    /// Row-wise layer normalisation followed by the `gamma`/`beta` affine map.
    pub fn layer_norm_affine(
        &self,
        gamma: &Tensor,
        beta: &Tensor,
        epsilon: f32,
    ) -> PureResult<Tensor> {
        for param in [gamma, beta] {
            if param.shape() != (1, self.cols) {
                return Err(TensorError::ShapeMismatch {
                    left: param.shape(),
                    right: (1, self.cols),
                });
            }
        }
        let cols = self.cols;
        let gamma = gamma.data();
        let beta = beta.data();
        let mut out = vec![0.0f32; self.data.len()];
        out.par_chunks_mut(cols)
            .zip(self.data.par_chunks(cols))
            .for_each(|(dst, src)| {
                let mean = src.iter().sum::<f32>() / cols as f32;
                let variance = src
                    .iter()
                    .map(|x| {
                        let centered = x - mean;
                        centered * centered
                    })
                    .sum::<f32>()
                    / cols as f32;
                let inv_std = 1.0 / (variance + epsilon).sqrt();
                for c in 0..cols {
                    dst[c] = (src[c] - mean) * inv_std * gamma[c] + beta[c];
                }
            });
        Tensor::from_vec(self.rows, cols, out)
    }

    /// Numerically stable softmax over each row.
    pub fn row_softmax(&self) -> PureResult<Tensor> {
        let cols = self.cols;
        let mut out = self.data.clone();
        out.par_chunks_mut(cols).for_each(|row| {
            let max = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
            let mut sum = 0.0f32;
            for v in row.iter_mut() {
                *v = (*v - max).exp();
                sum += *v;
            }
            for v in row.iter_mut() {
                *v /= sum;
            }
        });
        Tensor::from_vec(self.rows, cols, out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_dimensions() {
        assert_eq!(
            Tensor::zeros(0, 3),
            Err(TensorError::InvalidDimensions { rows: 0, cols: 3 })
        );
        assert!(matches!(
            Tensor::from_vec(2, 2, vec![1.0; 3]),
            Err(TensorError::DataLength { expected: 4, got: 3 })
        ));
    }

    #[test]
    fn matmul_matches_manual_product() {
        let a = Tensor::from_vec(2, 3, vec![1.0, 2.0, 3.0, -1.0, 0.0, 0.5]).unwrap();
        let b = Tensor::from_vec(3, 2, vec![0.5, 1.0, -1.0, 2.0, 0.0, 1.0]).unwrap();
        let c = a.matmul(&b).unwrap();
        assert_eq!(c.shape(), (2, 2));
        assert_eq!(c.data(), &[-1.5, 8.0, -0.5, -0.5]);
        assert!(a.matmul(&a).is_err());
    }

    #[test]
    fn layer_norm_affine_normalises_rows() {
        let x = Tensor::from_vec(2, 4, vec![1.0, 2.0, 3.0, 4.0, -2.0, 0.0, 2.0, 8.0]).unwrap();
        let gamma = Tensor::from_fn(1, 4, |_, _| 1.0).unwrap();
        let beta = Tensor::zeros(1, 4).unwrap();
        let y = x.layer_norm_affine(&gamma, &beta, 1e-5).unwrap();
        for r in 0..2 {
            let row = y.row(r);
            let mean: f32 = row.iter().sum::<f32>() / 4.0;
            let var: f32 = row.iter().map(|v| (v - mean) * (v - mean)).sum::<f32>() / 4.0;
            assert!(mean.abs() < 1e-5);
            assert!((var - 1.0).abs() < 1e-3);
        }
    }

    #[test]
    fn row_softmax_sums_to_one() {
        let x = Tensor::from_vec(1, 3, vec![1000.0, 1001.0, 999.0]).unwrap();
        let p = x.row_softmax().unwrap();
        let total: f32 = p.data().iter().sum();
        assert!((total - 1.0).abs() < 1e-6);
        assert!(p.data()[1] > p.data()[0]);
    }

    #[test]
    fn seeded_random_tensors_repeat() {
        let a = Tensor::random_normal(3, 3, 0.0, 1.0, Some(9)).unwrap();
        let b = Tensor::random_normal(3, 3, 0.0, 1.0, Some(9)).unwrap();
        assert_eq!(a, b);
        assert!(Tensor::random_uniform(1, 1, 1.0, 1.0, Some(1)).is_err());
    }
}
