//! Core primitives.
//!
//! Leaf building blocks shared by the network and game layers: the binary
//! codec, the deterministic RNG, tile-space vectors and invariant checks.

pub mod codec;
pub mod invariant;
pub mod rng;
pub mod vec2;

// Re-export core types
pub use codec::{CodecError, DecodeError, Encoding};
pub use invariant::expect_present;
pub use rng::DeterministicRng;
pub use vec2::Vector;
