//! symequiv - compositional symbolic equivalence checking
//!
//! Implementations are small imperative functions over bit-vectors and
//! byte-addressed memory ([`ir`]); specifications are pure functional
//! definitions ([`spec`]). Both are reduced to hash-consed terms ([`term`]),
//! simplified with proved lemmas ([`simplify`]), and discharged by an SMT
//! oracle ([`semantics::smt`]). Proved functions become overrides that later
//! proofs use in place of the callee's body ([`proof`]), and the
//! [`scheduler`] orders a batch of jobs so that every override is proved
//! before it is needed.

pub mod error;
pub mod experiments;
pub mod ir;
pub mod proof;
pub mod scheduler;
pub mod semantics;
pub mod simplify;
pub mod spec;
pub mod term;
pub mod validation;

pub use error::{Result, VerifyError};
