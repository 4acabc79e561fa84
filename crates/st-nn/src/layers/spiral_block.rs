// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use super::feed_forward::FeedForward;
use super::normalization::LayerNorm;
use super::spiral_conv::{CarryState, SpiralConv};
use crate::config::SpiralConvConfig;
use crate::module::{Layer, Module, Parameter, SequenceModule};
use crate::{PureResult, SequenceTensor, TensorError};
use spiral_config::determinism::child_seed;
use tracing::debug;

/// Residual block `x += conv(LN(x)); x += FFN(LN(x))`.
///
/// Both sublayers read through the same layer norm. The block owns the carry
/// of its spiral convolution and the refresh flag that decides whether a
/// chunk advances it.
#[derive(Debug)]
pub struct SpiralConvBlock {
    conv: SpiralConv,
    norm: LayerNorm,
    ffn: FeedForward,
    carry: CarryState,
    refresh: bool,
}

impl SpiralConvBlock {
    pub fn new(
        name: impl Into<String>,
        dim: usize,
        ff_scale: f32,
        dropout: f32,
        seed: Option<u64>,
    ) -> PureResult<Self> {
        let config = SpiralConvConfig {
            depth: 1,
            dim,
            ff_scale,
            dropout,
            seed,
            ..SpiralConvConfig::default()
        };
        Self::from_config(name, &config)
    }

    /// Builds one block from `config`; `depth` and `vocab_size` are ignored.
    pub fn from_config(name: impl Into<String>, config: &SpiralConvConfig) -> PureResult<Self> {
        let name = name.into();
        let seed = config.seed;
        let conv = SpiralConv::new(format!("{name}.conv"), config.dim, child_seed(seed, "conv"))?
            .with_carry_policy(config.carry_policy);
        let norm = LayerNorm::new(format!("{name}.norm"), config.dim, config.layer_norm_epsilon)?;
        let ffn = FeedForward::new(
            format!("{name}.ffn"),
            config.dim,
            config.ff_scale,
            config.dropout,
            child_seed(seed, "ffn"),
        )?;
        Self::from_parts(conv, norm, ffn)
    }

    pub fn from_parts(conv: SpiralConv, norm: LayerNorm, ffn: FeedForward) -> PureResult<Self> {
        let dim = conv.dim();
        for width in [norm.features(), ffn.dim()] {
            if width != dim {
                return Err(TensorError::ShapeMismatch {
                    left: (1, width),
                    right: (1, dim),
                });
            }
        }
        Ok(Self {
            conv,
            norm,
            ffn,
            carry: CarryState::new(),
            refresh: true,
        })
    }

    pub fn dim(&self) -> usize {
        self.conv.dim()
    }

    pub fn conv(&self) -> &SpiralConv {
        &self.conv
    }

    pub fn conv_mut(&mut self) -> &mut SpiralConv {
        &mut self.conv
    }

    pub fn norm(&self) -> &LayerNorm {
        &self.norm
    }

    pub fn ffn(&self) -> &FeedForward {
        &self.ffn
    }

    pub fn is_refresh(&self) -> bool {
        self.refresh
    }

    /// Carried recurrence state.
    pub fn carry(&self) -> &CarryState {
        &self.carry
    }

    /// Replaces the carried state, e.g. to resume a sequence from a snapshot.
    pub fn restore_carry(&mut self, carry: CarryState) -> PureResult<()> {
        if let Some(state) = carry.snapshot() {
            if state.shape().1 != self.dim() {
                return Err(TensorError::ShapeMismatch {
                    left: state.shape(),
                    right: (state.shape().0, self.dim()),
                });
            }
        }
        self.carry = carry;
        Ok(())
    }

    /// Puts back a carry this block held earlier.
    pub(crate) fn rewind_carry(&mut self, carry: CarryState) {
        self.carry = carry;
    }

    fn guard_input(&self, input: &SequenceTensor) -> PureResult<()> {
        if input.channels() != self.dim() {
            return Err(TensorError::ShapeMismatch {
                left: (input.batch(), input.channels()),
                right: (input.batch(), self.dim()),
            });
        }
        Ok(())
    }
}

impl Module for SpiralConvBlock {
    fn visit_parameters(
        &self,
        visitor: &mut dyn FnMut(&Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        self.conv.visit_parameters(visitor)?;
        self.norm.visit_parameters(visitor)?;
        self.ffn.visit_parameters(visitor)
    }

    fn visit_parameters_mut(
        &mut self,
        visitor: &mut dyn FnMut(&mut Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        self.conv.visit_parameters_mut(visitor)?;
        self.norm.visit_parameters_mut(visitor)?;
        self.ffn.visit_parameters_mut(visitor)
    }

    fn set_training(&mut self, training: bool) {
        self.ffn.set_training(training);
    }
}

impl SequenceModule for SpiralConvBlock {
    fn forward(&mut self, input: &SequenceTensor) -> PureResult<SequenceTensor> {
        self.guard_input(input)?;
        let (len, batch, _) = input.shape();
        if len == 0 {
            // Still validates the batch against an existing carry.
            self.conv.forward(input, &mut self.carry, self.refresh)?;
            return Ok(input.clone());
        }

        let normed = self.norm.forward(&input.to_rows()?)?;
        let mixed = self.conv.forward(
            &SequenceTensor::from_rows(normed, len, batch)?,
            &mut self.carry,
            self.refresh,
        )?;
        let mut hidden = input.add(&mixed)?.to_rows()?;
        let update = self.ffn.forward(&self.norm.forward(&hidden)?)?;
        hidden.add_scaled(&update, 1.0)?;
        SequenceTensor::from_rows(hidden, len, batch)
    }

    fn reset(&mut self) {
        debug!(dim = self.dim(), "spiral block reset");
        self.carry.reset();
    }

    fn set_refresh(&mut self, refresh: bool) {
        if self.refresh != refresh {
            debug!(refresh, "spiral block refresh toggled");
        }
        self.refresh = refresh;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block() -> SpiralConvBlock {
        let mut block = SpiralConvBlock::new("blk", 4, 2.0, 0.0, Some(21)).unwrap();
        block.set_training(false);
        block
    }

    fn input(len: usize) -> SequenceTensor {
        SequenceTensor::from_fn(len, 2, 4, |t, b, c| ((t * 7 + b * 3 + c) as f32 * 0.37).sin())
            .unwrap()
    }

    #[test]
    fn block_preserves_shape_and_advances_carry() {
        let mut block = block();
        assert!(block.is_refresh());
        let out = block.forward(&input(6)).unwrap();
        assert_eq!(out.shape(), (6, 2, 4));
        assert!(out.data().iter().all(|v| v.is_finite()));
        assert_eq!(block.carry().batch(), Some(2));
    }

    #[test]
    fn chunked_block_matches_one_shot() {
        let mut whole = block();
        let reference = whole.forward(&input(9)).unwrap();
        let mut chunked = block();
        let full = input(9);
        let parts: Vec<_> = full
            .chunks(4)
            .unwrap()
            .iter()
            .map(|chunk| chunked.forward(chunk).unwrap())
            .collect();
        let joined = SequenceTensor::concat_time(&parts).unwrap();
        assert!(joined.max_abs_diff(&reference).unwrap() < 1e-4);
    }

    #[test]
    fn refresh_off_freezes_carry() {
        let mut block = block();
        block.forward(&input(3)).unwrap();
        let frozen = block.carry().clone();
        block.set_refresh(false);
        let a = block.forward(&input(5)).unwrap();
        let b = block.forward(&input(5)).unwrap();
        assert_eq!(a, b);
        assert_eq!(block.carry(), &frozen);
    }

    #[test]
    fn reset_and_restore_carry() {
        let mut block = block();
        block.forward(&input(3)).unwrap();
        let saved = block.carry().clone();
        let continued = block.forward(&input(2)).unwrap();

        block.reset();
        assert!(!block.carry().is_initialized());
        block.restore_carry(saved).unwrap();
        assert_eq!(block.forward(&input(2)).unwrap(), continued);
    }

    #[test]
    fn rejects_mismatched_parts_and_inputs() {
        let conv = SpiralConv::new("c", 4, Some(1)).unwrap();
        let norm = LayerNorm::new("n", 3, 1e-5).unwrap();
        let ffn = FeedForward::new("f", 4, 1.0, 0.0, Some(1)).unwrap();
        assert!(SpiralConvBlock::from_parts(conv, norm, ffn).is_err());

        let mut block = block();
        let narrow = SequenceTensor::zeros(2, 2, 3).unwrap();
        assert!(block.forward(&narrow).is_err());
        assert!(!block.carry().is_initialized());
    }

    #[test]
    fn zero_length_chunk_passes_through() {
        let mut block = block();
        let empty = SequenceTensor::zeros(0, 2, 4).unwrap();
        assert_eq!(block.forward(&empty).unwrap(), empty);
        assert!(!block.carry().is_initialized());
    }

    #[test]
    fn parameter_names_follow_block_scope() {
        let block = block();
        let state = block.state_dict().unwrap();
        assert!(state.contains_key("blk.conv::theta"));
        assert!(state.contains_key("blk.norm::gamma"));
        assert!(state.contains_key("blk.ffn.expand::weight"));
        let expected = 3 * 4 + 2 * 4 + (4 * 8 + 8) + (8 * 4 + 4);
        assert_eq!(block.parameter_count().unwrap(), expected);
    }
}
