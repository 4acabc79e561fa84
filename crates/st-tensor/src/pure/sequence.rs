// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Time-major `[length, batch, channels]` buffers for chunked recurrences.
//!
//! Unlike [`Tensor`], a sequence may have zero length so that empty chunks can
//! flow through a stack as no-ops. Batch and channel axes must be non-zero.

use super::{PureResult, Tensor, TensorError};

/// Dense time-major sequence batch.
#[derive(Clone, Debug, PartialEq)]
pub struct SequenceTensor {
    data: Vec<f32>,
    length: usize,
    batch: usize,
    channels: usize,
}

impl SequenceTensor {
    fn guard_axes(batch: usize, channels: usize) -> PureResult<()> {
        if batch == 0 || channels == 0 {
            return Err(TensorError::InvalidDimensions {
                rows: batch,
                cols: channels,
            });
        }
        Ok(())
    }

    /// Zero-filled sequence. `length` may be zero.
    pub fn zeros(length: usize, batch: usize, channels: usize) -> PureResult<Self> {
        Self::guard_axes(batch, channels)?;
        Ok(Self {
            data: vec![0.0; length * batch * channels],
            length,
            batch,
            channels,
        })
    }

    /// Wraps a time-major buffer laid out as `[t][b][c]`.
    pub fn from_vec(
        length: usize,
        batch: usize,
        channels: usize,
        data: Vec<f32>,
    ) -> PureResult<Self> {
        Self::guard_axes(batch, channels)?;
        let expected = length * batch * channels;
        if data.len() != expected {
            return Err(TensorError::DataLength {
                expected,
                got: data.len(),
            });
        }
        Ok(Self {
            data,
            length,
            batch,
            channels,
        })
    }

    /// Builds a sequence from a generator over `(t, b, c)`.
    pub fn from_fn<F>(length: usize, batch: usize, channels: usize, mut f: F) -> PureResult<Self>
    where
        F: FnMut(usize, usize, usize) -> f32,
    {
        Self::guard_axes(batch, channels)?;
        let mut data = Vec::with_capacity(length * batch * channels);
        for t in 0..length {
            for b in 0..batch {
                for c in 0..channels {
                    data.push(f(t, b, c));
                }
            }
        }
        Ok(Self {
            data,
            length,
            batch,
            channels,
        })
    }

    /// Reinterprets a `(length * batch, channels)` matrix as a sequence.
    pub fn from_rows(tensor: Tensor, length: usize, batch: usize) -> PureResult<Self> {
        let (rows, cols) = tensor.shape();
        if rows != length * batch {
            return Err(TensorError::ShapeMismatch {
                left: (rows, cols),
                right: (length * batch, cols),
            });
        }
        Self::from_vec(length, batch, cols, tensor.into_vec())
    }

    /// Flattens time and batch into rows so position-wise layers can run on
    /// a plain matrix. Fails for empty sequences.
    pub fn to_rows(&self) -> PureResult<Tensor> {
        if self.length == 0 {
            return Err(TensorError::EmptyInput("sequence_rows"));
        }
        Tensor::from_vec(self.length * self.batch, self.channels, self.data.clone())
    }

    /// Returns `(length, batch, channels)`.
    pub fn shape(&self) -> (usize, usize, usize) {
        (self.length, self.batch, self.channels)
    }

    pub fn length(&self) -> usize {
        self.length
    }

    pub fn batch(&self) -> usize {
        self.batch
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// True when the sequence holds no time steps.
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    #[inline]
    pub fn index(&self, t: usize, b: usize, c: usize) -> usize {
        (t * self.batch + b) * self.channels + c
    }

    #[inline]
    pub fn get(&self, t: usize, b: usize, c: usize) -> f32 {
        self.data[self.index(t, b, c)]
    }

    /// All `[batch, channels]` values of time step `t`.
    pub fn step(&self, t: usize) -> &[f32] {
        let stride = self.batch * self.channels;
        &self.data[t * stride..(t + 1) * stride]
    }

    /// Gathers the time series of one `(batch, channel)` lane.
    pub fn lane(&self, b: usize, c: usize) -> Vec<f32> {
        (0..self.length).map(|t| self.get(t, b, c)).collect()
    }

    /// Copies `len` time steps starting at `start`.
    pub fn narrow(&self, start: usize, len: usize) -> PureResult<Self> {
        if start + len > self.length {
            return Err(TensorError::ShapeMismatch {
                left: (start + len, self.batch),
                right: (self.length, self.batch),
            });
        }
        let stride = self.batch * self.channels;
        let data = self.data[start * stride..(start + len) * stride].to_vec();
        Self::from_vec(len, self.batch, self.channels, data)
    }

    /// Splits the sequence into consecutive chunks of at most `chunk_len` steps.
    pub fn chunks(&self, chunk_len: usize) -> PureResult<Vec<Self>> {
        if chunk_len == 0 {
            return Err(TensorError::InvalidValue {
                label: "sequence_chunk_len",
            });
        }
        let mut out = Vec::with_capacity(self.length.div_ceil(chunk_len));
        let mut start = 0;
        while start < self.length {
            let len = chunk_len.min(self.length - start);
            out.push(self.narrow(start, len)?);
            start += len;
        }
        Ok(out)
    }

    /// Concatenates sequences along time. Batch and channel axes must agree.
    pub fn concat_time(parts: &[SequenceTensor]) -> PureResult<Self> {
        let Some(first) = parts.first() else {
            return Err(TensorError::EmptyInput("sequence_concat"));
        };
        let mut data = Vec::new();
        let mut length = 0;
        for part in parts {
            if (part.batch, part.channels) != (first.batch, first.channels) {
                return Err(TensorError::ShapeMismatch {
                    left: (part.batch, part.channels),
                    right: (first.batch, first.channels),
                });
            }
            data.extend_from_slice(&part.data);
            length += part.length;
        }
        Self::from_vec(length, first.batch, first.channels, data)
    }

    /// Elementwise sum, used for residual connections.
    pub fn add(&self, other: &SequenceTensor) -> PureResult<Self> {
        if self.shape() != other.shape() {
            return Err(TensorError::ShapeMismatch {
                left: (self.length * self.batch, self.channels),
                right: (other.length * other.batch, other.channels),
            });
        }
        let data = self
            .data
            .iter()
            .zip(other.data.iter())
            .map(|(a, b)| a + b)
            .collect();
        Self::from_vec(self.length, self.batch, self.channels, data)
    }

    /// Largest absolute elementwise difference; `None` if shapes differ.
    pub fn max_abs_diff(&self, other: &SequenceTensor) -> Option<f32> {
        if self.shape() != other.shape() {
            return None;
        }
        Some(
            self.data
                .iter()
                .zip(other.data.iter())
                .map(|(a, b)| (a - b).abs())
                .fold(0.0, f32::max),
        )
    }
}
