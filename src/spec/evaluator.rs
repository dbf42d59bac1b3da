//! Symbolic evaluation of specifications into terms.

use crate::error::SpecError;
use crate::proof::overrides::OverrideSet;
use crate::spec::expr::{Expr, SpecFn, SpecModule};
use crate::term::{Sort, Term};
use std::collections::{BTreeSet, HashMap};
use tracing::trace;

/// Default bound on nested specification calls.
pub const DEFAULT_RECURSION_LIMIT: usize = 512;

/// Evaluates specification functions over symbolic arguments.
///
/// `if` is lazy when its condition folds to a constant, so recursion on
/// concrete counters unfolds to exactly the needed depth.
pub struct SpecEvaluator<'a> {
    module: &'a SpecModule,
    overrides: &'a OverrideSet,
    uninterpreted: &'a BTreeSet<String>,
    recursion_limit: usize,
}

type Env = HashMap<String, Term>;

impl<'a> SpecEvaluator<'a> {
    pub fn new(module: &'a SpecModule, overrides: &'a OverrideSet, uninterpreted: &'a BTreeSet<String>) -> Self {
        SpecEvaluator {
            module,
            overrides,
            uninterpreted,
            recursion_limit: DEFAULT_RECURSION_LIMIT,
        }
    }

    pub fn with_recursion_limit(mut self, limit: usize) -> Self {
        self.recursion_limit = limit;
        self
    }

    /// Evaluate function `name` at `args`, one term per result.
    pub fn eval_fn(&self, name: &str, args: &[Term]) -> Result<Vec<Term>, SpecError> {
        self.call(name, args.to_vec(), 0)
    }

    fn lookup(&self, name: &str) -> Result<&'a SpecFn, SpecError> {
        self.module
            .get(name)
            .ok_or_else(|| SpecError::UnknownFunction(name.to_string()))
    }

    fn call(&self, name: &str, args: Vec<Term>, depth: usize) -> Result<Vec<Term>, SpecError> {
        let f = self.lookup(name)?;
        if args.len() != f.params.len() {
            return Err(SpecError::ArityMismatch {
                function: name.to_string(),
                expected: f.params.len(),
                actual: args.len(),
            });
        }
        for ((pname, sort), arg) in f.params.iter().zip(&args) {
            if arg.sort() != *sort {
                return Err(SpecError::Opaque {
                    function: name.to_string(),
                    detail: format!("parameter {} expects {}, got {}", pname, sort, arg.sort()),
                });
            }
        }

        if self.uninterpreted.contains(name) {
            return Ok(uninterpreted_results(name, &f.results, args));
        }
        if let Some(ov) = self.overrides.for_spec(name) {
            if ov.results() == f.results.as_slice() {
                trace!(spec = name, override_name = ov.name(), "spec call via override");
                return ov.apply(&args).map_err(|e| SpecError::Opaque {
                    function: name.to_string(),
                    detail: e.to_string(),
                });
            }
        }

        if depth >= self.recursion_limit {
            return Err(SpecError::RecursionLimit {
                function: name.to_string(),
                limit: self.recursion_limit,
            });
        }
        let env: Env = f.params.iter().map(|(p, _)| p.clone()).zip(args).collect();
        let values = self.eval(&f.body, &env, f, depth + 1)?;
        if values.len() != f.results.len() {
            return Err(SpecError::TupleShape {
                function: name.to_string(),
                expected: f.results.len(),
                actual: values.len(),
            });
        }
        for (v, sort) in values.iter().zip(&f.results) {
            if v.sort() != *sort {
                return Err(SpecError::Opaque {
                    function: name.to_string(),
                    detail: format!("result has sort {}, declared {}", v.sort(), sort),
                });
            }
        }
        Ok(values)
    }

    fn eval_single(&self, expr: &Expr, env: &Env, f: &SpecFn, depth: usize) -> Result<Term, SpecError> {
        let mut values = self.eval(expr, env, f, depth)?;
        if values.len() != 1 {
            return Err(SpecError::TupleShape {
                function: f.name.clone(),
                expected: 1,
                actual: values.len(),
            });
        }
        Ok(values.remove(0))
    }

    fn eval(&self, expr: &Expr, env: &Env, f: &SpecFn, depth: usize) -> Result<Vec<Term>, SpecError> {
        match expr {
            Expr::Var(name) => env
                .get(name)
                .cloned()
                .map(|t| vec![t])
                .ok_or_else(|| SpecError::UnboundVariable {
                    function: f.name.clone(),
                    var: name.clone(),
                }),
            Expr::Lit { value, width } => Ok(vec![Term::bv(*value, *width)?]),
            Expr::Bool(b) => Ok(vec![Term::bool(*b)]),
            Expr::Prim(op, args) => {
                let mut terms = Vec::with_capacity(args.len());
                for a in args {
                    terms.push(self.eval_single(a, env, f, depth)?);
                }
                Ok(vec![Term::prim(*op, terms)?])
            }
            Expr::If(c, t, e) => {
                let cond = self.eval_single(c, env, f, depth)?;
                match cond.as_bool() {
                    Some(true) => self.eval(t, env, f, depth),
                    Some(false) => self.eval(e, env, f, depth),
                    None => {
                        let then_v = self.eval(t, env, f, depth)?;
                        let else_v = self.eval(e, env, f, depth)?;
                        if then_v.len() != else_v.len() {
                            return Err(SpecError::TupleShape {
                                function: f.name.clone(),
                                expected: then_v.len(),
                                actual: else_v.len(),
                            });
                        }
                        then_v
                            .iter()
                            .zip(&else_v)
                            .map(|(a, b)| Term::ite(&cond, a, b).map_err(SpecError::from))
                            .collect()
                    }
                }
            }
            Expr::Let(name, value, body) => {
                let v = self.eval_single(value, env, f, depth)?;
                let mut inner = env.clone();
                inner.insert(name.clone(), v);
                self.eval(body, &inner, f, depth)
            }
            Expr::LetTuple(names, value, body) => {
                let values = self.eval(value, env, f, depth)?;
                if values.len() != names.len() {
                    return Err(SpecError::TupleShape {
                        function: f.name.clone(),
                        expected: names.len(),
                        actual: values.len(),
                    });
                }
                let mut inner = env.clone();
                inner.extend(names.iter().cloned().zip(values));
                self.eval(body, &inner, f, depth)
            }
            Expr::Call(callee, args) => {
                let mut terms = Vec::with_capacity(args.len());
                for a in args {
                    terms.push(self.eval_single(a, env, f, depth)?);
                }
                self.call(callee, terms, depth)
            }
            Expr::Tuple(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(self.eval_single(item, env, f, depth)?);
                }
                Ok(out)
            }
        }
    }
}

/// Uninterpreted results of `name`, named `name` or `name.i` per result.
pub fn uninterpreted_results(name: &str, results: &[Sort], args: Vec<Term>) -> Vec<Term> {
    if results.len() == 1 {
        return vec![Term::uninterp(name, args, results[0])];
    }
    results
        .iter()
        .enumerate()
        .map(|(i, s)| Term::uninterp(format!("{}.{}", name, i), args.clone(), *s))
        .collect()
}
