//! Semantics of implementations: memory, symbolic and concrete execution,
//! solver queries and equivalence checking

pub mod concrete;
pub mod equivalence;
pub mod executor;
pub mod memory;
pub mod smt;
pub mod state;

// Re-export main functionality
pub use concrete::{ConcreteMachine, ConcreteRun};
pub use equivalence::{
    Counterexample, EquivalenceChecker, EquivalenceOutcome, EquivalenceResult, ObligationRecord, Undecided,
};
pub use executor::{ExecConfig, Executor, LoopStrategy, PathMode};
pub use memory::{AliasPolicy, Memory};
pub use smt::{Oracle, Query, SmtOutcome, SolverConfig, Z3Oracle};
pub use state::{EquivalencePredicate, Narrowing, OutputMask};
