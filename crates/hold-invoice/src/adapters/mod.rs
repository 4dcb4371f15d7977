//! # Adapters Layer (Hexagonal Architecture)
//!
//! Implements outbound port traits. Real node backends live in the runtime
//! crate; the simulated node here backs tests and local development.

mod entropy;
mod simulated;

pub use entropy::OsEntropy;
pub use simulated::{SimulatedCalls, SimulatedNode};
