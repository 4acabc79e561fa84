// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Spiral convolution layers built on SpiralTorch primitives.
//!
//! A spiral convolution replaces attention with a per-channel complex decay
//! recurrence `state_t = c · state_{t-1} + x_t`, evaluated per chunk through an
//! FFT convolution and continued across chunks through an explicit carry.
//! Blocks wrap the recurrence with a shared layer norm and a gated
//! feed-forward sublayer; stacks chain blocks with independent carries.

pub mod config;
pub mod language;
pub mod layers;
pub mod module;
pub mod telemetry;

pub use config::SpiralConvConfig;
pub use language::SpiralConvLanguageModel;
pub use layers::dropout::Dropout;
pub use layers::feed_forward::FeedForward;
pub use layers::linear::Linear;
pub use layers::normalization::LayerNorm;
pub use layers::spiral_block::SpiralConvBlock;
pub use layers::spiral_conv::{CarryPolicy, CarryState, DecayFilter, SpiralConv, SpiralConvOutput};
pub use layers::spiral_stack::SpiralConvStack;
pub use layers::Silu;
pub use module::{Layer, Module, Parameter, SequenceModule};
pub use telemetry::{init_tracing, init_tracing_at};

pub use st_tensor::pure::{
    Complex32, ComplexTensor, PureResult, SequenceTensor, Tensor, TensorError,
};
