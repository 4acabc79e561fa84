// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use super::{PureResult, TensorError};
use num_complex::Complex32;

/// Row-major complex matrix used for carried recurrence state.
#[derive(Clone, Debug, PartialEq)]
pub struct ComplexTensor {
    data: Vec<Complex32>,
    rows: usize,
    cols: usize,
}

impl ComplexTensor {
    pub fn from_vec(rows: usize, cols: usize, data: Vec<Complex32>) -> PureResult<Self> {
        if rows == 0 || cols == 0 {
            return Err(TensorError::InvalidDimensions { rows, cols });
        }
        let expected = rows * cols;
        if expected != data.len() {
            return Err(TensorError::DataLength {
                expected,
                got: data.len(),
            });
        }
        Ok(Self { data, rows, cols })
    }

    /// Repeats a real row `rows` times, with zero imaginary part.
    pub fn broadcast_real_row(row: &[f32], rows: usize) -> PureResult<Self> {
        let cols = row.len();
        let mut data = Vec::with_capacity(rows * cols);
        for _ in 0..rows {
            data.extend(row.iter().map(|&re| Complex32::new(re, 0.0)));
        }
        Self::from_vec(rows, cols, data)
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn data(&self) -> &[Complex32] {
        &self.data
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> Complex32 {
        self.data[row * self.cols + col]
    }

    /// Largest modulus over all entries.
    pub fn max_modulus(&self) -> f32 {
        self.data.iter().map(|z| z.norm()).fold(0.0, f32::max)
    }
}
