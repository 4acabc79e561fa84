//! Process-wide configuration shared by every SpiralConv crate: deterministic
//! seeding and the tracing subscriber.

pub mod determinism;
pub mod tracing;
