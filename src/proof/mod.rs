//! Proof artifacts: tokens, overrides, and the cache that holds them

pub mod cache;
pub mod overrides;
pub mod token;

pub use cache::{LemmaProof, ProofCache};
pub use overrides::{Override, OverrideSet};
pub use token::ProofToken;
