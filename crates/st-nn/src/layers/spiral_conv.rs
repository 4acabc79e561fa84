// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Exponential-decay spiral convolution.
//!
//! Every channel `d` owns a complex decay `c_d = gamma_d · e^{iθ_d}` with
//! `gamma_d = exp(-exp(lmlg_d))`. A chunk is convolved with the causal filter
//! `c_d^t` through zero-padded FFTs and the carried state from earlier chunks
//! contributes `h · c_d^{t+1}`, so chunked evaluation reproduces the scan
//! `state_t = c · state_{t-1} + x_t`. The engine output gates the input:
//! `y_t = Re(state_t) · x_t`.

use crate::module::{Module, Parameter};
use crate::{Complex32, ComplexTensor, PureResult, SequenceTensor, Tensor, TensorError};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use spiral_config::determinism::child_seed;
use st_tensor::pure::SpectralConvolver;
use tracing::{debug, trace, warn};

/// Which recurrence value is carried into the next chunk after a refresh.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CarryPolicy {
    /// Last value of the full recurrence (local convolution plus carried
    /// history). Chunked and one-shot evaluation agree for any split.
    #[default]
    Continuous,
    /// Last value of the chunk-local convolution only; the carried history
    /// is dropped at each boundary.
    ChunkLocal,
}

/// Per-channel decay coefficients and the causal filter `c^t` for one chunk
/// length. Taps are stored time-major: `taps[t * dim + d]`.
#[derive(Clone, Debug, PartialEq)]
pub struct DecayFilter {
    coefficients: Vec<Complex32>,
    gammas: Vec<f32>,
    taps: Vec<Complex32>,
    len: usize,
}

impl DecayFilter {
    /// Evaluates the filter in closed polar form in `f64`, with
    /// `tap(0, d) == 1` exactly.
    pub fn new(log_neg_log_gamma: &[f32], theta: &[f32], len: usize) -> PureResult<Self> {
        let dim = log_neg_log_gamma.len();
        if dim == 0 {
            return Err(TensorError::EmptyInput("decay_filter"));
        }
        if theta.len() != dim {
            return Err(TensorError::DataLength {
                expected: dim,
                got: theta.len(),
            });
        }
        for (label, values) in [("log_neg_log_gamma", log_neg_log_gamma), ("theta", theta)] {
            if let Some(&value) = values.iter().find(|v| !v.is_finite()) {
                return Err(TensorError::NonFiniteValue { label, value });
            }
        }

        let rates: Vec<f64> = log_neg_log_gamma
            .iter()
            .map(|&lmlg| (lmlg as f64).exp())
            .collect();
        let gammas: Vec<f64> = rates.iter().map(|rate| (-rate).exp()).collect();
        let coefficients = gammas
            .iter()
            .zip(theta)
            .map(|(&gamma, &angle)| {
                let angle = angle as f64;
                Complex32::new((gamma * angle.cos()) as f32, (gamma * angle.sin()) as f32)
            })
            .collect();

        let mut taps = Vec::with_capacity(len * dim);
        for t in 0..len {
            if t == 0 {
                taps.extend(std::iter::repeat(Complex32::new(1.0, 0.0)).take(dim));
                continue;
            }
            let step = t as f64;
            for (rate, &angle) in rates.iter().zip(theta) {
                let magnitude = (-step * rate).exp();
                let phase = step * angle as f64;
                taps.push(Complex32::new(
                    (magnitude * phase.cos()) as f32,
                    (magnitude * phase.sin()) as f32,
                ));
            }
        }

        Ok(Self {
            coefficients,
            gammas: gammas.into_iter().map(|g| g as f32).collect(),
            taps,
            len,
        })
    }

    /// Decay coefficient `c_d` per channel.
    pub fn coefficients(&self) -> &[Complex32] {
        &self.coefficients
    }

    /// Decay magnitude `gamma_d` per channel.
    pub fn gammas(&self) -> &[f32] {
        &self.gammas
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn dim(&self) -> usize {
        self.coefficients.len()
    }

    /// `c_d^t`.
    #[inline]
    pub fn tap(&self, t: usize, d: usize) -> Complex32 {
        self.taps[t * self.dim() + d]
    }

    /// Filter of one channel in time order.
    pub fn channel(&self, d: usize) -> impl Iterator<Item = Complex32> + '_ {
        let dim = self.dim();
        (0..self.len).map(move |t| self.taps[t * dim + d])
    }

    /// Channels whose decay collapsed to exactly 0 (memoryless) or 1 (no
    /// decay) in single precision.
    pub fn degenerate_channels(&self) -> Vec<usize> {
        self.gammas
            .iter()
            .enumerate()
            .filter(|(_, gamma)| **gamma <= 0.0 || **gamma >= 1.0)
            .map(|(d, _)| d)
            .collect()
    }
}

/// Complex recurrence state `[batch, dim]` carried between chunks.
///
/// The state is materialised lazily from the layer's initial-state parameter
/// on the first read after construction or [`CarryState::reset`]. Values
/// written back are plain data, detached from any parameter.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CarryState {
    carry: Option<ComplexTensor>,
}

impl CarryState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_initialized(&self) -> bool {
        self.carry.is_some()
    }

    /// Batch size the state is bound to, once materialised.
    pub fn batch(&self) -> Option<usize> {
        self.carry.as_ref().map(|carry| carry.shape().0)
    }

    /// Current state without materialising it.
    pub fn snapshot(&self) -> Option<&ComplexTensor> {
        self.carry.as_ref()
    }

    pub fn reset(&mut self) {
        self.carry = None;
    }

    /// Returns the state for `batch` rows, broadcasting `initial` over the
    /// batch when nothing has been carried yet.
    pub fn read(&mut self, initial: &[f32], batch: usize) -> PureResult<&ComplexTensor> {
        if let Some(existing) = &self.carry {
            if existing.shape().0 != batch {
                return Err(TensorError::ShapeMismatch {
                    left: existing.shape(),
                    right: (batch, initial.len()),
                });
            }
        }
        let carry = match self.carry.take() {
            Some(carry) => carry,
            None => ComplexTensor::broadcast_real_row(initial, batch)?,
        };
        Ok(&*self.carry.insert(carry))
    }

    /// Replaces the state. An existing state fixes the accepted shape.
    pub fn write(&mut self, next: ComplexTensor) -> PureResult<()> {
        if let Some(existing) = &self.carry {
            if existing.shape() != next.shape() {
                return Err(TensorError::ShapeMismatch {
                    left: existing.shape(),
                    right: next.shape(),
                });
            }
        }
        self.carry = Some(next);
        Ok(())
    }
}

/// Result of one chunk convolution.
#[derive(Clone, Debug, PartialEq)]
pub struct SpiralConvOutput {
    /// Gated output `Re(state) · x`, same shape as the input.
    pub output: SequenceTensor,
    /// Value to carry into the next chunk, chosen by the layer's
    /// [`CarryPolicy`]. `None` for zero-length chunks.
    pub last_state: Option<ComplexTensor>,
}

/// Depthwise spiral convolution engine with learned decay, phase and initial
/// state per channel.
#[derive(Debug)]
pub struct SpiralConv {
    dim: usize,
    log_neg_log_gamma: Parameter,
    theta: Parameter,
    initial_state: Parameter,
    carry_policy: CarryPolicy,
    convolver: SpectralConvolver,
}

impl SpiralConv {
    /// Standard-normal initialisation for all three per-channel parameters.
    pub fn new(name: impl Into<String>, dim: usize, seed: Option<u64>) -> PureResult<Self> {
        if dim == 0 {
            return Err(TensorError::InvalidDimensions { rows: 1, cols: dim });
        }
        let lmlg = Tensor::random_normal(1, dim, 0.0, 1.0, child_seed(seed, "log_neg_log_gamma"))?;
        let theta = Tensor::random_normal(1, dim, 0.0, 1.0, child_seed(seed, "theta"))?;
        let initial = Tensor::random_normal(1, dim, 0.0, 1.0, child_seed(seed, "initial_state"))?;
        Self::from_parameters(name, lmlg, theta, initial)
    }

    /// Wraps explicit `(1, dim)` parameter rows.
    pub fn from_parameters(
        name: impl Into<String>,
        log_neg_log_gamma: Tensor,
        theta: Tensor,
        initial_state: Tensor,
    ) -> PureResult<Self> {
        let (rows, dim) = log_neg_log_gamma.shape();
        if rows != 1 {
            return Err(TensorError::ShapeMismatch {
                left: (rows, dim),
                right: (1, dim),
            });
        }
        for other in [&theta, &initial_state] {
            if other.shape() != (1, dim) {
                return Err(TensorError::ShapeMismatch {
                    left: other.shape(),
                    right: (1, dim),
                });
            }
        }
        let name = name.into();
        Ok(Self {
            dim,
            log_neg_log_gamma: Parameter::new(
                format!("{name}::log_neg_log_gamma"),
                log_neg_log_gamma,
            ),
            theta: Parameter::new(format!("{name}::theta"), theta),
            initial_state: Parameter::new(format!("{name}::initial_state"), initial_state),
            carry_policy: CarryPolicy::default(),
            convolver: SpectralConvolver::new(),
        })
    }

    pub fn with_carry_policy(mut self, policy: CarryPolicy) -> Self {
        self.carry_policy = policy;
        self
    }

    pub fn set_carry_policy(&mut self, policy: CarryPolicy) {
        self.carry_policy = policy;
    }

    pub fn carry_policy(&self) -> CarryPolicy {
        self.carry_policy
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn log_neg_log_gamma(&self) -> &Parameter {
        &self.log_neg_log_gamma
    }

    pub fn theta(&self) -> &Parameter {
        &self.theta
    }

    pub fn initial_state(&self) -> &Parameter {
        &self.initial_state
    }

    /// Builds the decay filter for chunks of `len` steps from the current
    /// parameter values.
    pub fn decay_filter(&self, len: usize) -> PureResult<DecayFilter> {
        DecayFilter::new(
            self.log_neg_log_gamma.value().data(),
            self.theta.value().data(),
            len,
        )
    }

    /// Channels whose decay is exactly 0 or 1 at the current parameters.
    pub fn degenerate_channels(&self) -> PureResult<Vec<usize>> {
        Ok(self.decay_filter(0)?.degenerate_channels())
    }

    fn guard_channels(&self, input: &SequenceTensor) -> PureResult<()> {
        if input.channels() != self.dim {
            return Err(TensorError::ShapeMismatch {
                left: (input.batch(), input.channels()),
                right: (input.batch(), self.dim),
            });
        }
        Ok(())
    }

    /// Convolves one chunk against `carry` without touching any state.
    pub fn convolve(
        &self,
        input: &SequenceTensor,
        carry: &ComplexTensor,
    ) -> PureResult<SpiralConvOutput> {
        self.guard_channels(input)?;
        let (len, batch, dim) = input.shape();
        if carry.shape() != (batch, dim) {
            return Err(TensorError::ShapeMismatch {
                left: carry.shape(),
                right: (batch, dim),
            });
        }
        if len == 0 {
            return Ok(SpiralConvOutput {
                output: SequenceTensor::zeros(0, batch, dim)?,
                last_state: None,
            });
        }

        let filter = self.decay_filter(len)?;
        let degenerate = filter.degenerate_channels();
        if !degenerate.is_empty() {
            debug!(channels = ?degenerate, len, "degenerate spiral decay in chunk");
        }

        let plan = self.convolver.plan(len)?;
        let spectra = (0..dim)
            .into_par_iter()
            .map(|d| plan.spectrum(filter.channel(d)))
            .collect::<PureResult<Vec<_>>>()?;
        // One lane per (batch, channel), laid out as `lane = b * dim + d`.
        let locals = (0..batch * dim)
            .into_par_iter()
            .map(|lane| {
                let (b, d) = (lane / dim, lane % dim);
                plan.causal_convolve(&input.lane(b, d), &spectra[d])
            })
            .collect::<PureResult<Vec<_>>>()?;

        let coefficients = filter.coefficients();
        let mut output = SequenceTensor::zeros(len, batch, dim)?;
        let mut last = Vec::with_capacity(batch * dim);
        for b in 0..batch {
            for d in 0..dim {
                let local = &locals[b * dim + d];
                let carried = carry.get(b, d) * coefficients[d];
                for (t, &conv) in local.iter().enumerate() {
                    let state = conv + carried * filter.tap(t, d);
                    let idx = output.index(t, b, d);
                    output.data_mut()[idx] = state.re * input.get(t, b, d);
                    if t + 1 == len {
                        last.push(match self.carry_policy {
                            CarryPolicy::Continuous => state,
                            CarryPolicy::ChunkLocal => conv,
                        });
                    }
                }
            }
        }

        Ok(SpiralConvOutput {
            output,
            last_state: Some(ComplexTensor::from_vec(batch, dim, last)?),
        })
    }

    /// Runs one chunk against `state`, advancing it only when `refresh` is set.
    pub fn forward(
        &self,
        input: &SequenceTensor,
        state: &mut CarryState,
        refresh: bool,
    ) -> PureResult<SequenceTensor> {
        self.guard_channels(input)?;
        let (len, batch, dim) = input.shape();
        if len == 0 {
            if let Some(bound) = state.batch().filter(|&bound| bound != batch) {
                return Err(TensorError::ShapeMismatch {
                    left: (bound, dim),
                    right: (batch, dim),
                });
            }
            return SequenceTensor::zeros(0, batch, dim);
        }
        if !state.is_initialized() {
            // Once per carry lifetime; per-chunk reports stay at debug level.
            let degenerate = self.degenerate_channels()?;
            if !degenerate.is_empty() {
                warn!(
                    channels = ?degenerate,
                    "spiral decay collapsed to 0 or 1; channel is memoryless or undamped"
                );
            }
        }
        let result = {
            let carry = state.read(self.initial_state.value().data(), batch)?;
            self.convolve(input, carry)?
        };
        trace!(len, batch, dim, refresh, "spiral conv chunk");
        if refresh {
            if let Some(next) = result.last_state {
                state.write(next)?;
            }
        }
        Ok(result.output)
    }
}

impl Module for SpiralConv {
    fn visit_parameters(
        &self,
        visitor: &mut dyn FnMut(&Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        visitor(&self.log_neg_log_gamma)?;
        visitor(&self.theta)?;
        visitor(&self.initial_state)
    }

    fn visit_parameters_mut(
        &mut self,
        visitor: &mut dyn FnMut(&mut Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        visitor(&mut self.log_neg_log_gamma)?;
        visitor(&mut self.theta)?;
        visitor(&mut self.initial_state)
    }
}
