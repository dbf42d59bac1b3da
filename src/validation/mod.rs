//! Property-based fallback: seeded random inputs and concrete sampling

pub mod random;
pub mod sampling;

pub use random::{edge_values, generate_inputs, SamplingConfig, DEFAULT_SAMPLES};
pub use sampling::{Sampler, SamplingOutcome, SamplingSummary};
