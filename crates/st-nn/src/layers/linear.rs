// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use crate::module::{Layer, Module, Parameter};
use crate::{PureResult, Tensor, TensorError};

/// Fully-connected layer `y = x W + b` with `W` stored as `(input, output)`.
#[derive(Debug)]
pub struct Linear {
    weight: Parameter,
    bias: Parameter,
}

impl Linear {
    /// Creates a linear layer initialised from the process RNG policy.
    pub fn new(name: impl Into<String>, input_dim: usize, output_dim: usize) -> PureResult<Self> {
        Self::with_seed(name, input_dim, output_dim, None)
    }

    /// Uniform `±1/sqrt(input_dim)` initialisation for weight and bias.
    pub fn with_seed(
        name: impl Into<String>,
        input_dim: usize,
        output_dim: usize,
        seed: Option<u64>,
    ) -> PureResult<Self> {
        if input_dim == 0 || output_dim == 0 {
            return Err(TensorError::InvalidDimensions {
                rows: input_dim,
                cols: output_dim,
            });
        }
        let name = name.into();
        let bound = 1.0 / (input_dim as f32).sqrt();
        let weight = Tensor::random_uniform(
            input_dim,
            output_dim,
            -bound,
            bound,
            spiral_config::determinism::child_seed(seed, "weight"),
        )?;
        let bias = Tensor::random_uniform(
            1,
            output_dim,
            -bound,
            bound,
            spiral_config::determinism::child_seed(seed, "bias"),
        )?;
        Self::from_parameters(name, weight, bias)
    }

    /// Wraps explicit weight `(input, output)` and bias `(1, output)` tensors.
    pub fn from_parameters(
        name: impl Into<String>,
        weight: Tensor,
        bias: Tensor,
    ) -> PureResult<Self> {
        if bias.shape() != (1, weight.shape().1) {
            return Err(TensorError::ShapeMismatch {
                left: weight.shape(),
                right: bias.shape(),
            });
        }
        let name = name.into();
        Ok(Self {
            weight: Parameter::new(format!("{name}::weight"), weight),
            bias: Parameter::new(format!("{name}::bias"), bias),
        })
    }

    pub fn input_dim(&self) -> usize {
        self.weight.value().shape().0
    }

    pub fn output_dim(&self) -> usize {
        self.weight.value().shape().1
    }

    /// Returns a reference to the weight parameter.
    pub fn weight(&self) -> &Parameter {
        &self.weight
    }

    /// Returns a reference to the bias parameter.
    pub fn bias(&self) -> &Parameter {
        &self.bias
    }
}

impl Module for Linear {
    fn visit_parameters(
        &self,
        visitor: &mut dyn FnMut(&Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        visitor(&self.weight)?;
        visitor(&self.bias)
    }

    fn visit_parameters_mut(
        &mut self,
        visitor: &mut dyn FnMut(&mut Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        visitor(&mut self.weight)?;
        visitor(&mut self.bias)
    }
}

impl Layer for Linear {
    fn forward(&self, input: &Tensor) -> PureResult<Tensor> {
        if input.shape().1 != self.input_dim() {
            return Err(TensorError::ShapeMismatch {
                left: input.shape(),
                right: self.weight.value().shape(),
            });
        }
        let mut out = input.matmul(self.weight.value())?;
        out.add_row_inplace(self.bias.value().data())?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_forward_matches_manual() {
        let weight = Tensor::from_vec(3, 2, vec![1.0, 0.0, 0.0, 1.0, 2.0, -1.0]).unwrap();
        let bias = Tensor::from_vec(1, 2, vec![0.5, -0.5]).unwrap();
        let layer = Linear::from_parameters("fc", weight, bias).unwrap();
        let input = Tensor::from_vec(1, 3, vec![1.0, -2.0, 0.5]).unwrap();
        let output = layer.forward(&input).unwrap();
        assert_eq!(output.data(), &[2.5, -3.0]);
    }

    #[test]
    fn seeded_layers_are_reproducible_and_bounded() {
        let a = Linear::with_seed("fc", 4, 3, Some(11)).unwrap();
        let b = Linear::with_seed("fc", 4, 3, Some(11)).unwrap();
        assert_eq!(a.weight().value(), b.weight().value());
        assert!(a.weight().value().data().iter().all(|w| w.abs() <= 0.5));
        assert_eq!(a.weight().name(), "fc::weight");
    }

    #[test]
    fn rejects_wrong_input_width() {
        let layer = Linear::with_seed("fc", 4, 3, Some(1)).unwrap();
        let input = Tensor::zeros(2, 5).unwrap();
        assert!(matches!(
            layer.forward(&input),
            Err(TensorError::ShapeMismatch { .. })
        ));
    }
}
