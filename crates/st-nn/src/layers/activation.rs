// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use crate::module::{Layer, Module, Parameter};
use crate::{PureResult, Tensor};

/// Sigmoid-weighted linear unit `x * sigmoid(x)`. Stateless, so it does not
/// participate in parameter visits.
#[derive(Debug, Default, Clone, Copy)]
pub struct Silu;

impl Silu {
    pub fn new() -> Self {
        Self
    }

    #[inline]
    fn apply(x: f32) -> f32 {
        // Branch on sign so exp never overflows.
        if x >= 0.0 {
            x / (1.0 + (-x).exp())
        } else {
            let e = x.exp();
            x * e / (1.0 + e)
        }
    }
}

impl Module for Silu {
    fn visit_parameters(
        &self,
        _visitor: &mut dyn FnMut(&Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        Ok(())
    }

    fn visit_parameters_mut(
        &mut self,
        _visitor: &mut dyn FnMut(&mut Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        Ok(())
    }
}

impl Layer for Silu {
    fn forward(&self, input: &Tensor) -> PureResult<Tensor> {
        let mut out = input.clone();
        out.map_inplace(Self::apply);
        Ok(out)
    }
}
