// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use super::spiral_block::SpiralConvBlock;
use super::spiral_conv::CarryState;
use crate::config::SpiralConvConfig;
use crate::module::{Module, Parameter, SequenceModule};
use crate::{PureResult, SequenceTensor, TensorError};
use spiral_config::determinism::child_seed;
use tracing::debug;

/// Ordered stack of spiral blocks, each with its own carry.
#[derive(Debug)]
pub struct SpiralConvStack {
    blocks: Vec<SpiralConvBlock>,
    dim: usize,
}

impl SpiralConvStack {
    pub fn new(
        name: impl Into<String>,
        depth: usize,
        dim: usize,
        ff_scale: f32,
        dropout: f32,
        seed: Option<u64>,
    ) -> PureResult<Self> {
        let config = SpiralConvConfig {
            depth,
            dim,
            ff_scale,
            dropout,
            seed,
            ..SpiralConvConfig::default()
        };
        Self::from_config(name, &config)
    }

    /// Validates `config` and builds `config.depth` blocks named
    /// `{name}.block{i}`.
    pub fn from_config(name: impl Into<String>, config: &SpiralConvConfig) -> PureResult<Self> {
        config.validate()?;
        let name = name.into();
        let blocks = (0..config.depth)
            .map(|index| {
                let block_config = SpiralConvConfig {
                    seed: child_seed(config.seed, &format!("block{index}")),
                    ..config.clone()
                };
                SpiralConvBlock::from_config(format!("{name}.block{index}"), &block_config)
            })
            .collect::<PureResult<Vec<_>>>()?;
        Self::from_blocks(blocks)
    }

    /// Wraps prebuilt blocks; all must share one width.
    pub fn from_blocks(blocks: Vec<SpiralConvBlock>) -> PureResult<Self> {
        let Some(first) = blocks.first() else {
            return Err(TensorError::EmptyInput("spiral_stack_blocks"));
        };
        let dim = first.dim();
        if let Some(block) = blocks.iter().find(|block| block.dim() != dim) {
            return Err(TensorError::ShapeMismatch {
                left: (1, block.dim()),
                right: (1, dim),
            });
        }
        Ok(Self { blocks, dim })
    }

    pub fn depth(&self) -> usize {
        self.blocks.len()
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn blocks(&self) -> &[SpiralConvBlock] {
        &self.blocks
    }

    pub fn block(&self, index: usize) -> Option<&SpiralConvBlock> {
        self.blocks.get(index)
    }

    pub fn block_mut(&mut self, index: usize) -> Option<&mut SpiralConvBlock> {
        self.blocks.get_mut(index)
    }

    /// Snapshot of every block's carry, in block order.
    pub fn carries(&self) -> Vec<CarryState> {
        self.blocks.iter().map(|block| block.carry().clone()).collect()
    }

    /// Restores carries captured by [`SpiralConvStack::carries`].
    ///
    /// All-or-nothing: every initialised carry must match the stack width and
    /// share one batch size, otherwise no block is touched.
    pub fn restore_carries(&mut self, carries: Vec<CarryState>) -> PureResult<()> {
        if carries.len() != self.blocks.len() {
            return Err(TensorError::DataLength {
                expected: self.blocks.len(),
                got: carries.len(),
            });
        }
        let mut bound: Option<(usize, usize)> = None;
        for state in carries.iter().filter_map(CarryState::snapshot) {
            let (batch, width) = state.shape();
            if width != self.dim {
                return Err(TensorError::ShapeMismatch {
                    left: (batch, width),
                    right: (batch, self.dim),
                });
            }
            match bound {
                Some(shape) if shape != (batch, width) => {
                    return Err(TensorError::ShapeMismatch {
                        left: shape,
                        right: (batch, width),
                    });
                }
                _ => bound = Some((batch, width)),
            }
        }
        for (block, carry) in self.blocks.iter_mut().zip(carries) {
            block.restore_carry(carry)?;
        }
        Ok(())
    }

    /// Rejects `input` before any block runs when its width or batch
    /// disagrees with a carried state.
    fn guard_input(&self, input: &SequenceTensor) -> PureResult<()> {
        let (_, batch, channels) = input.shape();
        if channels != self.dim {
            return Err(TensorError::ShapeMismatch {
                left: (batch, channels),
                right: (batch, self.dim),
            });
        }
        let bound = self
            .blocks
            .iter()
            .filter_map(|block| block.carry().batch())
            .find(|&bound| bound != batch);
        if let Some(bound) = bound {
            return Err(TensorError::ShapeMismatch {
                left: (bound, self.dim),
                right: (batch, self.dim),
            });
        }
        Ok(())
    }

    /// Splits `input` into ordered chunks of at most `chunk_len` steps, runs
    /// them through the stack and joins the outputs along time.
    pub fn forward_chunked(
        &mut self,
        input: &SequenceTensor,
        chunk_len: usize,
    ) -> PureResult<SequenceTensor> {
        if input.is_empty() {
            return self.forward(input);
        }
        let outputs = input
            .chunks(chunk_len)?
            .iter()
            .map(|chunk| self.forward(chunk))
            .collect::<PureResult<Vec<_>>>()?;
        SequenceTensor::concat_time(&outputs)
    }
}

impl Module for SpiralConvStack {
    fn visit_parameters(
        &self,
        visitor: &mut dyn FnMut(&Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        for block in &self.blocks {
            block.visit_parameters(visitor)?;
        }
        Ok(())
    }

    fn visit_parameters_mut(
        &mut self,
        visitor: &mut dyn FnMut(&mut Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        for block in &mut self.blocks {
            block.visit_parameters_mut(visitor)?;
        }
        Ok(())
    }

    fn set_training(&mut self, training: bool) {
        for block in &mut self.blocks {
            block.set_training(training);
        }
    }
}

impl SequenceModule for SpiralConvStack {
    fn forward(&mut self, input: &SequenceTensor) -> PureResult<SequenceTensor> {
        self.guard_input(input)?;
        let saved = self.carries();
        let mut hidden = input.clone();
        let advanced: PureResult<()> = self.blocks.iter_mut().try_for_each(|block| {
            hidden = block.forward(&hidden)?;
            Ok(())
        });
        if let Err(err) = advanced {
            for (block, carry) in self.blocks.iter_mut().zip(saved) {
                block.rewind_carry(carry);
            }
            return Err(err);
        }
        Ok(hidden)
    }

    fn reset(&mut self) {
        debug!(depth = self.blocks.len(), "spiral stack reset");
        for block in &mut self.blocks {
            block.reset();
        }
    }

    fn set_refresh(&mut self, refresh: bool) {
        debug!(depth = self.blocks.len(), refresh, "spiral stack refresh");
        for block in &mut self.blocks {
            block.set_refresh(refresh);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stack() -> SpiralConvStack {
        let mut stack = SpiralConvStack::new("stack", 3, 4, 1.5, 0.1, Some(8)).unwrap();
        stack.set_training(false);
        stack
    }

    fn input(len: usize) -> SequenceTensor {
        SequenceTensor::from_fn(len, 2, 4, |t, b, c| ((t + 2 * b) as f32 * 0.5 - c as f32).cos())
            .unwrap()
    }

    #[test]
    fn blocks_are_named_and_seeded_independently() {
        let stack = stack();
        assert_eq!(stack.depth(), 3);
        let state = stack.state_dict().unwrap();
        let first = &state["stack.block0.conv::theta"];
        let last = &state["stack.block2.conv::theta"];
        assert_ne!(first, last);
        let per_block = stack.blocks()[0].parameter_count().unwrap();
        assert_eq!(stack.parameter_count().unwrap(), 3 * per_block);
    }

    #[test]
    fn forward_chunked_matches_one_shot() {
        let mut one_shot = stack();
        let reference = one_shot.forward(&input(10)).unwrap();
        for chunk_len in [1, 3, 4, 10, 16] {
            let mut chunked = stack();
            let out = chunked.forward_chunked(&input(10), chunk_len).unwrap();
            let diff = out.max_abs_diff(&reference).unwrap();
            assert!(diff < 1e-3, "chunk_len {chunk_len}: {diff}");
        }
    }

    #[test]
    fn controls_broadcast_to_every_block() {
        let mut stack = stack();
        stack.forward(&input(2)).unwrap();
        assert!(stack.blocks().iter().all(|b| b.carry().is_initialized()));
        stack.set_refresh(false);
        assert!(stack.blocks().iter().all(|b| !b.is_refresh()));
        stack.reset();
        assert!(stack.blocks().iter().all(|b| !b.carry().is_initialized()));
        stack.set_training(true);
        assert!(stack.blocks().iter().all(|b| b.ffn().dropout().is_training()));
    }

    #[test]
    fn carries_round_trip() {
        let mut stack = stack();
        stack.forward(&input(4)).unwrap();
        let saved = stack.carries();
        let expected = stack.forward(&input(3)).unwrap();
        stack.reset();
        stack.restore_carries(saved).unwrap();
        assert_eq!(stack.forward(&input(3)).unwrap(), expected);
        assert!(stack.restore_carries(Vec::new()).is_err());
    }

    #[test]
    fn rejects_empty_and_mixed_width_blocks() {
        assert!(SpiralConvStack::from_blocks(Vec::new()).is_err());
        let blocks = vec![
            SpiralConvBlock::new("a", 4, 1.0, 0.0, Some(1)).unwrap(),
            SpiralConvBlock::new("b", 5, 1.0, 0.0, Some(1)).unwrap(),
        ];
        assert!(SpiralConvStack::from_blocks(blocks).is_err());
        assert!(SpiralConvStack::new("s", 0, 4, 1.0, 0.0, None).is_err());
    }
}
