// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use crate::config::SpiralConvConfig;
use crate::layers::linear::Linear;
use crate::layers::spiral_stack::SpiralConvStack;
use crate::module::{Layer, Module, Parameter, SequenceModule};
use crate::{PureResult, SequenceTensor, TensorError};
use spiral_config::determinism::child_seed;

/// Token-level head around a spiral stack: one-hot tokens enter through
/// `token_in`, pass the stack and leave as vocabulary logits via `token_out`.
///
/// Token ids are laid out time-major, `tokens[t * batch + b]`, matching
/// [`SequenceTensor`].
#[derive(Debug)]
pub struct SpiralConvLanguageModel {
    token_in: Linear,
    stack: SpiralConvStack,
    token_out: Linear,
    vocab_size: usize,
}

impl SpiralConvLanguageModel {
    pub fn from_config(name: impl Into<String>, config: &SpiralConvConfig) -> PureResult<Self> {
        config.validate()?;
        let name = name.into();
        let seed = config.seed;
        let stack_config = SpiralConvConfig {
            seed: child_seed(seed, "stack"),
            ..config.clone()
        };
        Ok(Self {
            token_in: Linear::with_seed(
                format!("{name}.token_in"),
                config.vocab_size,
                config.dim,
                child_seed(seed, "token_in"),
            )?,
            stack: SpiralConvStack::from_config(format!("{name}.stack"), &stack_config)?,
            token_out: Linear::with_seed(
                format!("{name}.token_out"),
                config.dim,
                config.vocab_size,
                child_seed(seed, "token_out"),
            )?,
            vocab_size: config.vocab_size,
        })
    }

    pub fn vocab_size(&self) -> usize {
        self.vocab_size
    }

    pub fn dim(&self) -> usize {
        self.stack.dim()
    }

    pub fn stack(&self) -> &SpiralConvStack {
        &self.stack
    }

    pub fn stack_mut(&mut self) -> &mut SpiralConvStack {
        &mut self.stack
    }

    /// One-hot projection, computed by gathering rows of `token_in`.
    fn embed(&self, tokens: &[usize], length: usize, batch: usize) -> PureResult<SequenceTensor> {
        if tokens.len() != length * batch {
            return Err(TensorError::DataLength {
                expected: length * batch,
                got: tokens.len(),
            });
        }
        let weight = self.token_in.weight().value();
        let bias = self.token_in.bias().value().data();
        let mut data = Vec::with_capacity(tokens.len() * self.dim());
        for &token in tokens {
            if token >= self.vocab_size {
                return Err(TensorError::InvalidValue { label: "token_id" });
            }
            data.extend(weight.row(token).iter().zip(bias).map(|(w, b)| w + b));
        }
        SequenceTensor::from_vec(length, batch, self.dim(), data)
    }

    /// Returns logits `[length, batch, vocab]` and advances the carries the
    /// same way [`SpiralConvStack::forward`] does.
    pub fn forward(
        &mut self,
        tokens: &[usize],
        length: usize,
        batch: usize,
    ) -> PureResult<SequenceTensor> {
        let embedded = self.embed(tokens, length, batch)?;
        let hidden = self.stack.forward(&embedded)?;
        if length == 0 {
            return SequenceTensor::zeros(0, batch, self.vocab_size);
        }
        let logits = self.token_out.forward(&hidden.to_rows()?)?;
        SequenceTensor::from_rows(logits, length, batch)
    }

    /// Softmax over the vocabulary at every position.
    pub fn predict(
        &mut self,
        tokens: &[usize],
        length: usize,
        batch: usize,
    ) -> PureResult<SequenceTensor> {
        let logits = self.forward(tokens, length, batch)?;
        if logits.is_empty() {
            return Ok(logits);
        }
        let probs = logits.to_rows()?.row_softmax()?;
        SequenceTensor::from_rows(probs, length, batch)
    }

    /// Mean negative log-likelihood of `targets` (time-major) under `logits`.
    pub fn cross_entropy(&self, logits: &SequenceTensor, targets: &[usize]) -> PureResult<f32> {
        let (length, batch, vocab) = logits.shape();
        if vocab != self.vocab_size {
            return Err(TensorError::ShapeMismatch {
                left: (length * batch, vocab),
                right: (length * batch, self.vocab_size),
            });
        }
        if targets.len() != length * batch {
            return Err(TensorError::DataLength {
                expected: length * batch,
                got: targets.len(),
            });
        }
        if targets.is_empty() {
            return Err(TensorError::EmptyInput("cross_entropy_targets"));
        }
        let mut total = 0.0f64;
        for (row, &target) in logits.data().chunks(vocab).zip(targets) {
            if target >= vocab {
                return Err(TensorError::InvalidValue { label: "target_id" });
            }
            let max = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
            let sum: f32 = row.iter().map(|v| (v - max).exp()).sum();
            total += f64::from(max + sum.ln() - row[target]);
        }
        Ok((total / targets.len() as f64) as f32)
    }

    pub fn reset(&mut self) {
        self.stack.reset();
    }

    pub fn set_refresh(&mut self, refresh: bool) {
        self.stack.set_refresh(refresh);
    }
}

impl Module for SpiralConvLanguageModel {
    fn visit_parameters(
        &self,
        visitor: &mut dyn FnMut(&Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        self.token_in.visit_parameters(visitor)?;
        self.stack.visit_parameters(visitor)?;
        self.token_out.visit_parameters(visitor)
    }

    fn visit_parameters_mut(
        &mut self,
        visitor: &mut dyn FnMut(&mut Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        self.token_in.visit_parameters_mut(visitor)?;
        self.stack.visit_parameters_mut(visitor)?;
        self.token_out.visit_parameters_mut(visitor)
    }

    fn set_training(&mut self, training: bool) {
        self.stack.set_training(training);
    }
}
