//! Term simplification ahead of solving: proved rewrite lemmas, then
//! uninterpretation.

pub mod simpset;
pub mod uninterp;

pub use simpset::{Lemma, Simpset};
pub use uninterp::{check_structure, uninterpret, uses_uninterpreted};
