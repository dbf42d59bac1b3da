//! Pure specifications and their symbolic and concrete evaluators.

pub mod concrete;
pub mod evaluator;
pub mod expr;

pub use concrete::eval_spec;
pub use evaluator::SpecEvaluator;
pub use expr::{Expr, SpecFn, SpecModule};
