// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use crate::module::{Layer, Module, Parameter};
use crate::{PureResult, Tensor, TensorError};

/// Layer normalisation over the feature axis with a learned affine map.
#[derive(Debug)]
pub struct LayerNorm {
    features: usize,
    epsilon: f32,
    gamma: Parameter,
    beta: Parameter,
}

impl LayerNorm {
    /// Builds a layer norm initialised to the identity affine map.
    pub fn new(name: impl Into<String>, features: usize, epsilon: f32) -> PureResult<Self> {
        if features == 0 {
            return Err(TensorError::InvalidDimensions {
                rows: 1,
                cols: features,
            });
        }
        if epsilon <= 0.0 || !epsilon.is_finite() {
            return Err(TensorError::NonFiniteValue {
                label: "layernorm_epsilon",
                value: epsilon,
            });
        }
        let name: String = name.into();
        let gamma = Tensor::from_fn(1, features, |_, _| 1.0)?;
        let beta = Tensor::zeros(1, features)?;
        Ok(Self {
            features,
            epsilon,
            gamma: Parameter::new(format!("{name}::gamma"), gamma),
            beta: Parameter::new(format!("{name}::beta"), beta),
        })
    }

    /// Returns the number of features normalised per row.
    pub fn features(&self) -> usize {
        self.features
    }

    pub fn epsilon(&self) -> f32 {
        self.epsilon
    }

    pub fn gamma(&self) -> &Parameter {
        &self.gamma
    }

    pub fn beta(&self) -> &Parameter {
        &self.beta
    }
}

impl Module for LayerNorm {
    fn visit_parameters(
        &self,
        visitor: &mut dyn FnMut(&Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        visitor(&self.gamma)?;
        visitor(&self.beta)
    }

    fn visit_parameters_mut(
        &mut self,
        visitor: &mut dyn FnMut(&mut Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        visitor(&mut self.gamma)?;
        visitor(&mut self.beta)
    }
}

impl Layer for LayerNorm {
    fn forward(&self, input: &Tensor) -> PureResult<Tensor> {
        let (rows, cols) = input.shape();
        if cols != self.features {
            return Err(TensorError::ShapeMismatch {
                left: (rows, cols),
                right: (rows, self.features),
            });
        }
        input.layer_norm_affine(self.gamma.value(), self.beta.value(), self.epsilon)
    }
}
