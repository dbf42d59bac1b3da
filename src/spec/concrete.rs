//! Concrete interpretation of specifications (sampling and replay).

use crate::error::SpecError;
use crate::spec::expr::{Expr, SpecFn, SpecModule};
use crate::spec::evaluator::DEFAULT_RECURSION_LIMIT;
use crate::term::{Op, Sort};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Value {
    bits: u64,
    sort: Sort,
}

type Env = HashMap<String, Value>;

/// Evaluate `name` on concrete arguments (masked to the parameter widths).
pub fn eval_spec(module: &SpecModule, name: &str, args: &[u64]) -> Result<Vec<u64>, SpecError> {
    let f = module
        .get(name)
        .ok_or_else(|| SpecError::UnknownFunction(name.to_string()))?;
    let values: Vec<Value> = f
        .params
        .iter()
        .zip(args)
        .map(|((_, sort), bits)| Value {
            bits: bits & sort.mask(),
            sort: *sort,
        })
        .collect();
    Ok(call(module, name, values, 0)?.into_iter().map(|v| v.bits).collect())
}

fn call(module: &SpecModule, name: &str, args: Vec<Value>, depth: usize) -> Result<Vec<Value>, SpecError> {
    let f = module
        .get(name)
        .ok_or_else(|| SpecError::UnknownFunction(name.to_string()))?;
    if args.len() != f.params.len() {
        return Err(SpecError::ArityMismatch {
            function: name.to_string(),
            expected: f.params.len(),
            actual: args.len(),
        });
    }
    if depth >= DEFAULT_RECURSION_LIMIT {
        return Err(SpecError::RecursionLimit {
            function: name.to_string(),
            limit: DEFAULT_RECURSION_LIMIT,
        });
    }
    let env: Env = f.params.iter().map(|(p, _)| p.clone()).zip(args).collect();
    let out = eval(module, &f.body, &env, f, depth + 1)?;
    if out.len() != f.results.len() {
        return Err(SpecError::TupleShape {
            function: name.to_string(),
            expected: f.results.len(),
            actual: out.len(),
        });
    }
    Ok(out)
}

fn single(module: &SpecModule, expr: &Expr, env: &Env, f: &SpecFn, depth: usize) -> Result<Value, SpecError> {
    let mut v = eval(module, expr, env, f, depth)?;
    if v.len() != 1 {
        return Err(SpecError::TupleShape {
            function: f.name.clone(),
            expected: 1,
            actual: v.len(),
        });
    }
    Ok(v.remove(0))
}

fn eval(module: &SpecModule, expr: &Expr, env: &Env, f: &SpecFn, depth: usize) -> Result<Vec<Value>, SpecError> {
    match expr {
        Expr::Var(name) => env.get(name).map(|v| vec![*v]).ok_or_else(|| SpecError::UnboundVariable {
            function: f.name.clone(),
            var: name.clone(),
        }),
        Expr::Lit { value, width } => {
            let sort = Sort::bv(*width)?;
            Ok(vec![Value {
                bits: value & sort.mask(),
                sort,
            }])
        }
        Expr::Bool(b) => Ok(vec![Value {
            bits: *b as u64,
            sort: Sort::Bool,
        }]),
        Expr::Prim(op, args) => {
            let mut vals = Vec::with_capacity(args.len());
            for a in args {
                vals.push(single(module, a, env, f, depth)?);
            }
            Ok(vec![apply(*op, &vals)?])
        }
        Expr::If(c, t, e) => {
            if single(module, c, env, f, depth)?.bits != 0 {
                eval(module, t, env, f, depth)
            } else {
                eval(module, e, env, f, depth)
            }
        }
        Expr::Let(name, value, body) => {
            let v = single(module, value, env, f, depth)?;
            let mut inner = env.clone();
            inner.insert(name.clone(), v);
            eval(module, body, &inner, f, depth)
        }
        Expr::LetTuple(names, value, body) => {
            let vals = eval(module, value, env, f, depth)?;
            if vals.len() != names.len() {
                return Err(SpecError::TupleShape {
                    function: f.name.clone(),
                    expected: names.len(),
                    actual: vals.len(),
                });
            }
            let mut inner = env.clone();
            inner.extend(names.iter().cloned().zip(vals));
            eval(module, body, &inner, f, depth)
        }
        Expr::Call(callee, args) => {
            let mut vals = Vec::with_capacity(args.len());
            for a in args {
                vals.push(single(module, a, env, f, depth)?);
            }
            call(module, callee, vals, depth)
        }
        Expr::Tuple(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(single(module, item, env, f, depth)?);
            }
            Ok(out)
        }
    }
}

fn apply(op: Op, vals: &[Value]) -> Result<Value, SpecError> {
    let sorts: Vec<Sort> = vals.iter().map(|v| v.sort).collect();
    let sort = op.result_sort(&sorts)?;
    let bits: Vec<u64> = vals.iter().map(|v| v.bits).collect();
    Ok(Value {
        bits: op.eval(&bits, &sorts) & sort.mask(),
        sort,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::expr::*;
    use crate::spec::expr::call;

    #[test]
    fn test_concrete_recursion() {
        let bv = Sort::BitVec(16);
        let mut m = SpecModule::new();
        // sum(n) = n == 0 ? 0 : n + sum(n - 1)
        m.add(SpecFn::new(
            "sum",
            &[("n", bv)],
            &[bv],
            ite(
                bin(Op::Eq, var("n"), lit(0, 16)),
                lit(0, 16),
                bin(
                    Op::BvAdd,
                    var("n"),
                    call("sum", vec![bin(Op::BvSub, var("n"), lit(1, 16))]),
                ),
            ),
        ));
        assert_eq!(eval_spec(&m, "sum", &[10]).unwrap(), vec![55]);
    }

    #[test]
    fn test_concrete_masks_arguments() {
        let bv = Sort::BitVec(8);
        let mut m = SpecModule::new();
        m.add(SpecFn::new("id", &[("x", bv)], &[bv], var("x")));
        assert_eq!(eval_spec(&m, "id", &[0x1ff]).unwrap(), vec![0xff]);
    }

    #[test]
    fn test_concrete_rejects_ill_sorted() {
        let bv = Sort::BitVec(8);
        let mut m = SpecModule::new();
        m.add(SpecFn::new("bad", &[("x", bv)], &[bv], bin(Op::BvAdd, var("x"), lit(1, 16))));
        assert!(matches!(eval_spec(&m, "bad", &[1]), Err(SpecError::Term(_))));
    }
}
