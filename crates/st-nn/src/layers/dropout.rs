// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use crate::module::{Layer, Module, Parameter};
use crate::{PureResult, Tensor, TensorError};
use rand::{rngs::StdRng, Rng};
use std::cell::{Cell, RefCell};

/// Inverted Bernoulli dropout: zeroes activations with probability `p` and
/// rescales survivors by `1 / (1 - p)` while training; identity otherwise.
pub struct Dropout {
    probability: f32,
    keep_scale: f32,
    training: Cell<bool>,
    rng: RefCell<StdRng>,
}

impl core::fmt::Debug for Dropout {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Dropout")
            .field("probability", &self.probability)
            .field("training", &self.training.get())
            .finish()
    }
}

impl Dropout {
    /// Builds a dropout layer seeded from the process determinism policy.
    pub fn new(probability: f32) -> PureResult<Self> {
        Self::with_seed(probability, None)
    }

    /// Builds a dropout layer with a deterministic RNG seed.
    pub fn with_seed(probability: f32, seed: Option<u64>) -> PureResult<Self> {
        if !(0.0..1.0).contains(&probability) {
            return Err(TensorError::InvalidValue {
                label: "dropout_probability",
            });
        }
        Ok(Self {
            probability,
            keep_scale: 1.0 / (1.0 - probability),
            training: Cell::new(true),
            rng: RefCell::new(spiral_config::determinism::rng_from_optional(
                seed,
                "st-nn/dropout",
            )),
        })
    }

    pub fn probability(&self) -> f32 {
        self.probability
    }

    pub fn is_training(&self) -> bool {
        self.training.get()
    }

    pub fn train(&self) {
        self.training.set(true);
    }

    pub fn eval(&self) {
        self.training.set(false);
    }
}

impl Module for Dropout {
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

    fn set_training(&mut self, training: bool) {
        self.training.set(training);
    }
}

impl Layer for Dropout {
    fn forward(&self, input: &Tensor) -> PureResult<Tensor> {
        if !self.is_training() || self.probability == 0.0 {
            return Ok(input.clone());
        }
        let mut rng = self.rng.borrow_mut();
        let mut out = input.clone();
        for value in out.data_mut() {
            if rng.gen::<f32>() < self.probability {
                *value = 0.0;
            } else {
                *value *= self.keep_scale;
            }
        }
        Ok(out)
    }
}
