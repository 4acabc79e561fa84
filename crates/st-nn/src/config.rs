// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Serialisable hyper-parameters for spiral stacks and language models.

use crate::layers::feed_forward::FeedForward;
use crate::layers::spiral_conv::CarryPolicy;
use crate::{PureResult, TensorError};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Shape and regularisation settings shared by blocks, stacks and the
/// language-model head. Missing JSON fields fall back to [`Default`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SpiralConvConfig {
    pub depth: usize,
    pub dim: usize,
    pub ff_scale: f32,
    pub dropout: f32,
    pub layer_norm_epsilon: f32,
    pub carry_policy: CarryPolicy,
    /// Root seed for every initialiser; `None` defers to the process
    /// determinism policy.
    pub seed: Option<u64>,
    pub vocab_size: usize,
}

impl Default for SpiralConvConfig {
    fn default() -> Self {
        Self {
            depth: 32,
            dim: 256,
            ff_scale: 2.0,
            dropout: 0.1,
            layer_norm_epsilon: 1e-5,
            carry_policy: CarryPolicy::Continuous,
            seed: None,
            vocab_size: 256,
        }
    }
}

fn invalid(message: impl Into<String>) -> TensorError {
    TensorError::Config {
        message: message.into(),
    }
}

impl SpiralConvConfig {
    pub fn validate(&self) -> PureResult<()> {
        if self.depth == 0 {
            return Err(invalid("depth must be at least 1"));
        }
        if self.dim == 0 {
            return Err(invalid("dim must be at least 1"));
        }
        if self.vocab_size == 0 {
            return Err(invalid("vocab_size must be at least 1"));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(invalid(format!(
                "dropout must lie in [0, 1), got {}",
                self.dropout
            )));
        }
        if !(self.layer_norm_epsilon > 0.0 && self.layer_norm_epsilon.is_finite()) {
            return Err(invalid(format!(
                "layer_norm_epsilon must be positive, got {}",
                self.layer_norm_epsilon
            )));
        }
        self.hidden_dim().map(|_| ())
    }

    /// Feed-forward width, `round(dim * ff_scale)`.
    pub fn hidden_dim(&self) -> PureResult<usize> {
        FeedForward::hidden_width(self.dim, self.ff_scale).map_err(|err| invalid(err.to_string()))
    }

    pub fn from_json_str(json: &str) -> PureResult<Self> {
        let config: Self = serde_json::from_str(json).map_err(|err| invalid(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> PureResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|err| invalid(format!("{}: {err}", path.display())))?;
        Self::from_json_str(&json)
    }

    pub fn to_json_string(&self) -> PureResult<String> {
        serde_json::to_string_pretty(self).map_err(|err| invalid(err.to_string()))
    }
}
