//! Concrete evaluation of terms under an assignment.

use crate::error::EvalError;
use crate::term::store::{Term, TermNode};
use std::collections::{BTreeMap, HashMap};

/// Values for free variables and undefined cells, by name.
pub type Assignment = BTreeMap<String, u64>;

/// Evaluate `term`, reading variables and undef cells from `env`.
pub fn eval_term(term: &Term, env: &Assignment) -> Result<u64, EvalError> {
    let mut memo = HashMap::new();
    eval_memo(term, env, &mut memo)
}

fn eval_memo(term: &Term, env: &Assignment, memo: &mut HashMap<u64, u64>) -> Result<u64, EvalError> {
    if let Some(v) = memo.get(&term.id()) {
        return Ok(*v);
    }
    let mask = term.sort().mask();
    let value = match term.node() {
        TermNode::Const(v) => *v,
        TermNode::Var(name) | TermNode::Undef { name, .. } => env
            .get(name)
            .map(|v| v & mask)
            .ok_or_else(|| EvalError::Unbound(name.clone()))?,
        TermNode::Prim(op, args) => {
            let mut values = Vec::with_capacity(args.len());
            for a in args {
                values.push(eval_memo(a, env, memo)?);
            }
            let sorts: Vec<_> = args.iter().map(Term::sort).collect();
            op.eval(&values, &sorts)
        }
        TermNode::Ite(c, t, e) => {
            if eval_memo(c, env, memo)? != 0 {
                eval_memo(t, env, memo)?
            } else {
                eval_memo(e, env, memo)?
            }
        }
        TermNode::Uninterp(name, _) | TermNode::Override { name, .. } => {
            return Err(EvalError::Opaque(name.clone()))
        }
    };
    memo.insert(term.id(), value);
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::term::op::{Op, Sort};

    #[test]
    fn test_eval_prim_and_ite() {
        let x = Term::var("eval_x", Sort::BitVec(8));
        let c = Term::binary(Op::Ult, &x, &Term::bv(10, 8).unwrap()).unwrap();
        let t = Term::ite(&c, &Term::binary(Op::BvAdd, &x, &x).unwrap(), &x).unwrap();
        let mut env = Assignment::new();
        env.insert("eval_x".into(), 3);
        assert_eq!(eval_term(&t, &env), Ok(6));
        env.insert("eval_x".into(), 200);
        assert_eq!(eval_term(&t, &env), Ok(200));
    }

    #[test]
    fn test_eval_unbound_and_opaque() {
        let x = Term::var("eval_unbound", Sort::BitVec(8));
        assert_eq!(
            eval_term(&x, &Assignment::new()),
            Err(EvalError::Unbound("eval_unbound".into()))
        );
        let u = Term::uninterp("h", vec![Term::bv(1, 8).unwrap()], Sort::BitVec(8));
        assert!(matches!(eval_term(&u, &Assignment::new()), Err(EvalError::Opaque(_))));
    }
}
