//! Core primitives.
//!
//! Seeded randomness for dealing rounds.

pub mod rng;

pub use rng::DeterministicRng;
