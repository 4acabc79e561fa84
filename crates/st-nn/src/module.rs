// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use crate::{PureResult, SequenceTensor, Tensor, TensorError};
use std::collections::HashMap;

/// Learnable tensor exposed to an external optimiser. Layers only read their
/// parameters; updates arrive through [`Parameter::value_mut`] or
/// [`Module::load_state_dict`].
#[derive(Clone)]
pub struct Parameter {
    name: String,
    value: Tensor,
}

impl core::fmt::Debug for Parameter {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let (rows, cols) = self.value.shape();
        write!(f, "Parameter(name={},shape=({},{}))", self.name, rows, cols)
    }
}

impl Parameter {
    /// Creates a new parameter with the provided tensor value.
    pub fn new(name: impl Into<String>, value: Tensor) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }

    /// Returns the identifier assigned to the parameter.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &Tensor {
        &self.value
    }

    pub fn value_mut(&mut self) -> &mut Tensor {
        &mut self.value
    }

    /// Number of scalar entries.
    pub fn numel(&self) -> usize {
        self.value.len()
    }

    /// Replaces the parameter value, keeping its shape.
    pub fn load_value(&mut self, value: &Tensor) -> PureResult<()> {
        if self.value.shape() != value.shape() {
            return Err(TensorError::ShapeMismatch {
                left: self.value.shape(),
                right: value.shape(),
            });
        }
        self.value = value.clone();
        Ok(())
    }
}

/// Parameter and mode surface shared by every layer.
pub trait Module {
    /// Visits immutable parameters.
    fn visit_parameters(
        &self,
        visitor: &mut dyn FnMut(&Parameter) -> PureResult<()>,
    ) -> PureResult<()>;

    /// Visits mutable parameters.
    fn visit_parameters_mut(
        &mut self,
        visitor: &mut dyn FnMut(&mut Parameter) -> PureResult<()>,
    ) -> PureResult<()>;

    /// Switches stochastic sublayers between training and evaluation.
    fn set_training(&mut self, _training: bool) {}

    /// Total number of learnable scalars.
    fn parameter_count(&self) -> PureResult<usize> {
        let mut total = 0;
        self.visit_parameters(&mut |param| {
            total += param.numel();
            Ok(())
        })?;
        Ok(total)
    }

    /// Captures a copy of every parameter tensor keyed by its canonical name.
    fn state_dict(&self) -> PureResult<HashMap<String, Tensor>> {
        let mut state = HashMap::new();
        self.visit_parameters(&mut |param| {
            state.insert(param.name().to_string(), param.value().clone());
            Ok(())
        })?;
        Ok(state)
    }

    /// Restores parameters from a state dictionary produced by [`Module::state_dict`].
    fn load_state_dict(&mut self, state: &HashMap<String, Tensor>) -> PureResult<()> {
        self.visit_parameters_mut(&mut |param| {
            let Some(value) = state.get(param.name()) else {
                return Err(TensorError::MissingParameter {
                    name: param.name().to_string(),
                });
            };
            param.load_value(value)
        })
    }
}

/// Position-wise layer over `(rows, features)` matrices.
pub trait Layer: Module {
    fn forward(&self, input: &Tensor) -> PureResult<Tensor>;
}

/// Stateful layer over time-major chunks. Chunks of one logical sequence must
/// arrive in order; `reset` starts a new, unrelated batch of sequences.
pub trait SequenceModule: Module {
    /// Processes one `[length, batch, channels]` chunk.
    fn forward(&mut self, input: &SequenceTensor) -> PureResult<SequenceTensor>;

    /// Forgets all carried state.
    fn reset(&mut self);

    /// When disabled, chunks are evaluated against the current carry without
    /// advancing it.
    fn set_refresh(&mut self, refresh: bool);
}
