//! Shared, immutable, hash-consed symbolic expressions.

pub mod eval;
pub mod op;
pub mod store;
pub mod subst;

pub use eval::{eval_term, Assignment};
pub use op::{mask, sign_extend, Op, Sort};
pub use store::{store, Term, TermNode, TermStore};
pub use subst::{substitute, transform, visit, Memo};
