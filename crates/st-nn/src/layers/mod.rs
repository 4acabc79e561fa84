pub mod activation;
pub mod dropout;
pub mod feed_forward;
pub mod linear;
pub mod normalization;
pub mod spiral_block;
pub mod spiral_conv;
pub mod spiral_stack;

pub use activation::Silu;
