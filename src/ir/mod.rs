//! Intermediate Representation (IR) for implementation functions

pub mod builder;
pub mod cfg;
pub mod instructions;
pub mod liveness;
pub mod types;

// Re-export commonly used types
pub use builder::FunctionBuilder;
pub use instructions::{Instruction, Terminator};
pub use types::{Block, BlockId, Function, GlobalRegion, MemInit, Operand, Program};
