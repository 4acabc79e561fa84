// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use super::activation::Silu;
use super::dropout::Dropout;
use super::linear::Linear;
use crate::module::{Layer, Module, Parameter};
use crate::{PureResult, Tensor, TensorError};
use spiral_config::determinism::child_seed;

/// Position-wise `Linear → SiLU → Linear → Dropout` sublayer.
#[derive(Debug)]
pub struct FeedForward {
    expand: Linear,
    act: Silu,
    contract: Linear,
    dropout: Dropout,
}

impl FeedForward {
    /// Hidden width is `round(dim * ff_scale)`.
    pub fn new(
        name: impl Into<String>,
        dim: usize,
        ff_scale: f32,
        dropout: f32,
        seed: Option<u64>,
    ) -> PureResult<Self> {
        let hidden = Self::hidden_width(dim, ff_scale)?;
        let name = name.into();
        Ok(Self {
            expand: Linear::with_seed(
                format!("{name}.expand"),
                dim,
                hidden,
                child_seed(seed, "expand"),
            )?,
            act: Silu::new(),
            contract: Linear::with_seed(
                format!("{name}.contract"),
                hidden,
                dim,
                child_seed(seed, "contract"),
            )?,
            dropout: Dropout::with_seed(dropout, child_seed(seed, "dropout"))?,
        })
    }

    /// Builds the sublayer from existing parts; widths must chain.
    pub fn from_parts(expand: Linear, contract: Linear, dropout: Dropout) -> PureResult<Self> {
        let chained = expand.output_dim() == contract.input_dim()
            && expand.input_dim() == contract.output_dim();
        if !chained {
            return Err(TensorError::ShapeMismatch {
                left: (expand.input_dim(), expand.output_dim()),
                right: (contract.input_dim(), contract.output_dim()),
            });
        }
        Ok(Self {
            expand,
            act: Silu::new(),
            contract,
            dropout,
        })
    }

    pub fn hidden_width(dim: usize, ff_scale: f32) -> PureResult<usize> {
        if !ff_scale.is_finite() {
            return Err(TensorError::NonFiniteValue {
                label: "ff_scale",
                value: ff_scale,
            });
        }
        if ff_scale <= 0.0 {
            return Err(TensorError::InvalidValue { label: "ff_scale" });
        }
        let hidden = (dim as f32 * ff_scale).round() as usize;
        if hidden == 0 {
            return Err(TensorError::InvalidDimensions {
                rows: dim,
                cols: hidden,
            });
        }
        Ok(hidden)
    }

    pub fn dim(&self) -> usize {
        self.expand.input_dim()
    }

    pub fn hidden(&self) -> usize {
        self.expand.output_dim()
    }

    pub fn dropout(&self) -> &Dropout {
        &self.dropout
    }
}

impl Module for FeedForward {
    fn visit_parameters(
        &self,
        visitor: &mut dyn FnMut(&Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        self.expand.visit_parameters(visitor)?;
        self.contract.visit_parameters(visitor)
    }

    fn visit_parameters_mut(
        &mut self,
        visitor: &mut dyn FnMut(&mut Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        self.expand.visit_parameters_mut(visitor)?;
        self.contract.visit_parameters_mut(visitor)
    }

    fn set_training(&mut self, training: bool) {
        self.dropout.set_training(training);
    }
}

impl Layer for FeedForward {
    fn forward(&self, input: &Tensor) -> PureResult<Tensor> {
        let hidden = self.act.forward(&self.expand.forward(input)?)?;
        let out = self.contract.forward(&hidden)?;
        self.dropout.forward(&out)
    }
}
